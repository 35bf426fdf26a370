//! Orchestration: one sequential loop from firehose to publisher.

use std::sync::Arc;

use anyhow::Result;
use bsky_core::PostEvent;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::cooldown::{CooldownTracker, PublishHistory};
use crate::matcher::{BufoMatch, BufoMatcher};
use crate::publisher::Publisher;

/// The run loop: match, gate, publish.
pub struct Bot {
    matcher: BufoMatcher,
    cooldowns: CooldownTracker,
    publisher: Arc<dyn Publisher>,
    history: Arc<dyn PublishHistory>,
    posting_enabled: bool,
}

impl Bot {
    pub fn new(
        matcher: BufoMatcher,
        cooldowns: CooldownTracker,
        publisher: Arc<dyn Publisher>,
        history: Arc<dyn PublishHistory>,
        posting_enabled: bool,
    ) -> Self {
        Self {
            matcher,
            cooldowns,
            publisher,
            history,
            posting_enabled,
        }
    }

    /// Process events until shutdown or the stream ends. Strictly
    /// sequential: one post is fully handled before the next is read.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<PostEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("bot loop started ({} phrases indexed)", self.matcher.len());
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("bot loop shutting down");
                    break;
                }
                maybe = events.recv() => match maybe {
                    Some(post) => self.handle_post(post).await,
                    None => {
                        warn!("post stream ended");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_post(&mut self, post: PostEvent) {
        let Some(found) = self.matcher.find_match(&post.text) else {
            return;
        };
        info!("match: '{}' -> {} ({})", found.phrase, found.name, post.uri());
        if !self.posting_enabled {
            info!("posting disabled, skipping");
            return;
        }
        if let Err(e) = self.publish_gated(&post, &found).await {
            error!("failed to post {}: {e:#}", found.name);
        }
    }

    /// Cooldown-gated publish. The publish is recorded before the next
    /// event is read, so a rapid repeat cannot slip through.
    async fn publish_gated(&mut self, post: &PostEvent, found: &BufoMatch) -> Result<()> {
        let now = Utc::now();
        if self.cooldowns.needs_refresh(now) {
            match self.history.recent_posts().await {
                Ok(posts) => self.cooldowns.apply_history(now, &posts),
                Err(e) => {
                    // Fail open: worst case is one duplicate post.
                    warn!("cooldown history fetch failed, failing open: {e:#}");
                    self.cooldowns.apply_history(now, &[]);
                }
            }
        }
        if self.cooldowns.is_on_cooldown(&found.name) {
            info!("{} on cooldown, skipping", found.name);
            return Ok(());
        }
        self.publisher.publish(post, found).await?;
        self.cooldowns.record_publish(&found.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Bufo;
    use crate::cooldown::HistoryPost;
    use anyhow::bail;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubPublisher {
        attempts: AtomicUsize,
        published: Mutex<Vec<String>>,
        fail: bool,
    }

    impl StubPublisher {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicUsize::new(0),
                published: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn published(&self) -> Vec<String> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Publisher for StubPublisher {
        async fn publish(&self, _post: &PostEvent, bufo: &BufoMatch) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("publish exploded");
            }
            self.published.lock().unwrap().push(bufo.name.clone());
            Ok(())
        }
    }

    struct StubHistory {
        calls: AtomicUsize,
        posts: Vec<HistoryPost>,
        fail: bool,
    }

    impl StubHistory {
        fn empty() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                posts: Vec::new(),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                posts: Vec::new(),
                fail: true,
            })
        }

        fn with_posts(posts: Vec<HistoryPost>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                posts,
                fail: false,
            })
        }
    }

    #[async_trait::async_trait]
    impl PublishHistory for StubHistory {
        async fn recent_posts(&self) -> Result<Vec<HistoryPost>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("history unavailable");
            }
            Ok(self.posts.clone())
        }
    }

    fn test_matcher() -> BufoMatcher {
        let bufos = vec![
            Bufo {
                name: "bufo-what-have-you-done.png".to_string(),
                url: "https://img.example/1.png".to_string(),
            },
            Bufo {
                name: "bufo-cool-beans-man-yo.png".to_string(),
                url: "https://img.example/2.png".to_string(),
            },
        ];
        BufoMatcher::new(bufos, 4).unwrap()
    }

    fn event(rkey: &str, text: &str) -> PostEvent {
        PostEvent {
            did: "did:plc:author".to_string(),
            rkey: rkey.to_string(),
            text: text.to_string(),
        }
    }

    fn bot(
        publisher: Arc<StubPublisher>,
        history: Arc<StubHistory>,
        posting_enabled: bool,
    ) -> Bot {
        Bot::new(
            test_matcher(),
            CooldownTracker::new(Duration::minutes(120)),
            publisher,
            history,
            posting_enabled,
        )
    }

    #[tokio::test]
    async fn disabled_posting_only_logs() {
        let publisher = StubPublisher::new(false);
        let history = StubHistory::empty();
        let mut bot = bot(publisher.clone(), history.clone(), false);

        bot.handle_post(event("3k1", "what have you done")).await;

        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(history.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn publishes_and_suppresses_the_repeat() {
        let publisher = StubPublisher::new(false);
        let mut bot = bot(publisher.clone(), StubHistory::empty(), true);

        bot.handle_post(event("3k1", "what have you done")).await;
        bot.handle_post(event("3k2", "seriously, what have you done now"))
            .await;

        assert_eq!(publisher.published(), vec!["bufo-what-have-you-done.png"]);
    }

    #[tokio::test]
    async fn different_bufos_are_not_cross_suppressed() {
        let publisher = StubPublisher::new(false);
        let mut bot = bot(publisher.clone(), StubHistory::empty(), true);

        bot.handle_post(event("3k1", "what have you done")).await;
        bot.handle_post(event("3k2", "cool beans man yo, nice work")).await;

        assert_eq!(
            publisher.published(),
            vec!["bufo-what-have-you-done.png", "bufo-cool-beans-man-yo.png"]
        );
    }

    #[tokio::test]
    async fn non_matching_posts_are_ignored() {
        let publisher = StubPublisher::new(false);
        let history = StubHistory::empty();
        let mut bot = bot(publisher.clone(), history.clone(), true);

        bot.handle_post(event("3k1", "nothing to see here folks")).await;

        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(history.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_publish_is_not_recorded_as_done() {
        let publisher = StubPublisher::new(true);
        let mut bot = bot(publisher.clone(), StubHistory::empty(), true);

        bot.handle_post(event("3k1", "what have you done")).await;
        bot.handle_post(event("3k2", "what have you done again")).await;

        // Both events reached the publisher; neither landed on cooldown.
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 2);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn history_failure_fails_open() {
        let publisher = StubPublisher::new(false);
        let history = StubHistory::failing();
        let mut bot = bot(publisher.clone(), history.clone(), true);

        bot.handle_post(event("3k1", "what have you done")).await;

        assert_eq!(publisher.published(), vec!["bufo-what-have-you-done.png"]);
        assert_eq!(history.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_is_fetched_once_per_interval() {
        let publisher = StubPublisher::new(false);
        let history = StubHistory::empty();
        let mut bot = bot(publisher.clone(), history.clone(), true);

        bot.handle_post(event("3k1", "what have you done")).await;
        bot.handle_post(event("3k2", "cool beans man yo friends")).await;

        assert_eq!(history.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_contents_suppress_a_fresh_match() {
        let publisher = StubPublisher::new(false);
        let history = StubHistory::with_posts(vec![HistoryPost {
            created_at: Utc::now() - Duration::minutes(30),
            image_alts: vec!["bufo what have you done".to_string()],
        }]);
        let mut bot = bot(publisher.clone(), history, true);

        bot.handle_post(event("3k1", "what have you done")).await;

        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn run_drains_events_until_the_stream_closes() {
        let publisher = StubPublisher::new(false);
        let mut bot = bot(publisher.clone(), StubHistory::empty(), true);

        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        tx.send(event("3k1", "what have you done")).await.unwrap();
        tx.send(event("3k2", "no match in this one")).await.unwrap();
        drop(tx);

        bot.run(rx, shutdown_tx.subscribe()).await;

        assert_eq!(publisher.published(), vec!["bufo-what-have-you-done.png"]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let publisher = StubPublisher::new(false);
        let mut bot = bot(publisher.clone(), StubHistory::empty(), true);

        let (_tx, rx) = mpsc::channel::<PostEvent>(8);
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_rx = shutdown_tx.subscribe();

        let handle = tokio::spawn(async move { bot.run(rx, shutdown_rx).await });
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
