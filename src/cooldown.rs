//! Time-windowed republish suppression.
//!
//! The tracker keeps a local set of recently posted image names. Inserts
//! happen immediately on publish, which is what stops rapid double-posting
//! between refreshes; the whole set is rebuilt at most once per refresh
//! interval from the authoritative recent-post history. Alt text is the
//! only surviving trace of which image a historical post carried, so the
//! refresh reconstructs candidate filenames by guessing both extensions.
//! The guess is knowingly lossy and stays that way.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// How often the authoritative history may be refetched, in seconds.
pub const REFRESH_INTERVAL_SECS: i64 = 300;

/// One authoritative recent post: when it was created and the alt texts of
/// any embedded images.
#[derive(Debug, Clone)]
pub struct HistoryPost {
    pub created_at: DateTime<Utc>,
    pub image_alts: Vec<String>,
}

/// Source of the bot's own recent posts, newest first.
#[async_trait]
pub trait PublishHistory: Send + Sync {
    async fn recent_posts(&self) -> Result<Vec<HistoryPost>>;
}

/// Candidate filenames a published alt text could have come from. Alt text
/// keeps no extension, so both known extensions are guessed.
pub fn candidates_for_alt(alt: &str) -> [String; 2] {
    let base = alt.replace(' ', "-");
    [format!("{base}.png"), format!("{base}.gif")]
}

/// Local cooldown set, reconciled against history at most once per
/// interval.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    refresh_interval: Duration,
    recent: HashSet<String>,
    last_refresh: Option<DateTime<Utc>>,
}

impl CooldownTracker {
    /// Tracker with the given cooldown window and the default five-minute
    /// refresh interval.
    pub fn new(window: Duration) -> Self {
        Self::with_refresh_interval(window, Duration::seconds(REFRESH_INTERVAL_SECS))
    }

    pub fn with_refresh_interval(window: Duration, refresh_interval: Duration) -> Self {
        Self {
            window,
            refresh_interval,
            recent: HashSet::new(),
            last_refresh: None,
        }
    }

    /// Pure membership test; never touches I/O.
    pub fn is_on_cooldown(&self, name: &str) -> bool {
        self.recent.contains(name)
    }

    /// Record a successful publish immediately, before the next event is
    /// processed.
    pub fn record_publish(&mut self, name: &str) {
        self.recent.insert(name.to_string());
    }

    /// Whether the refresh interval has elapsed (or no refresh has happened
    /// yet).
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.last_refresh {
            Some(at) => now - at >= self.refresh_interval,
            None => true,
        }
    }

    /// Replace the set wholesale from the newest-first history, keeping
    /// candidates for every image posted inside the window. The scan stops
    /// at the first post older than the window, so anything behind a stale
    /// post is ignored.
    pub fn apply_history(&mut self, now: DateTime<Utc>, posts: &[HistoryPost]) {
        let cutoff = now - self.window;
        let mut fresh = HashSet::new();
        for post in posts {
            if post.created_at < cutoff {
                break;
            }
            for alt in &post.image_alts {
                let [png, gif] = candidates_for_alt(alt);
                fresh.insert(png);
                fresh.insert(gif);
            }
        }
        debug!("cooldown set refreshed: {} candidate names", fresh.len());
        self.recent = fresh;
        self.last_refresh = Some(now);
    }

    /// Number of names currently on cooldown.
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}
