//! Posting collaborators: the reply publisher and the recent-post history.
//!
//! Both sides live on the same Bluesky session. Publishing is a four-stage
//! pipeline (fetch image, upload blob, resolve subject, create record); a
//! failing stage aborts only that attempt and the loop moves on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bsky_core::{image_post_record, quote_with_image_record, record_timestamp, BskyClient, PostEvent};
use chrono::Utc;
use rand::RngExt;
use reqwest::Client;
use tracing::info;

use crate::cooldown::{HistoryPost, PublishHistory};
use crate::matcher::BufoMatch;

const IMAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// How many of the bot's own posts one history refresh inspects.
const HISTORY_PAGE_LIMIT: u32 = 100;

/// Something that can publish a reply for a matched bufo.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, post: &PostEvent, bufo: &BufoMatch) -> Result<()>;
}

/// Alt text for an image: the name minus its extension, hyphens as spaces.
/// The cooldown refresh inverts this mapping, so it stays lossless for
/// well-formed names.
pub fn alt_text(name: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => name,
    };
    stem.replace('-', " ")
}

/// Content type for an image URL, by extension. The catalog serves PNG and
/// GIF only.
fn content_type_for(url: &str) -> &'static str {
    if url.to_lowercase().ends_with(".gif") {
        "image/gif"
    } else {
        "image/png"
    }
}

/// Publishes quote posts (or plain link posts) with the matched image
/// attached.
pub struct BskyPublisher {
    http: Client,
    client: Arc<BskyClient>,
    quote_chance: f64,
}

impl BskyPublisher {
    pub fn new(client: Arc<BskyClient>, quote_chance: f64) -> Result<Self> {
        let http = Client::builder()
            .timeout(IMAGE_TIMEOUT)
            .build()
            .context("failed to build image http client")?;
        Ok(Self {
            http,
            client,
            quote_chance,
        })
    }
}

#[async_trait]
impl Publisher for BskyPublisher {
    async fn publish(&self, post: &PostEvent, bufo: &BufoMatch) -> Result<()> {
        info!("fetching bufo image: {}", bufo.url);
        let image = self
            .http
            .get(&bufo.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("failed to fetch bufo image")?
            .bytes()
            .await
            .context("failed to read bufo image body")?;

        let blob = self
            .client
            .upload_blob(image.to_vec(), content_type_for(&bufo.url))
            .await
            .context("failed to upload image blob")?;

        let subject = self
            .client
            .get_post(&post.did, &post.rkey)
            .await
            .context("failed to resolve subject post")?;

        let alt = alt_text(&bufo.name);
        let created_at = record_timestamp(Utc::now());
        let record = if rand::rng().random_bool(self.quote_chance) {
            quote_with_image_record(&subject, &blob, &alt, &created_at)
        } else {
            let link = format!("https://bsky.app/profile/{}/post/{}", post.did, post.rkey);
            image_post_record(&link, &blob, &alt, &created_at)
        };

        let published = self
            .client
            .create_post(record)
            .await
            .context("failed to send post")?;
        info!(
            "posted {} (phrase: {}) as {}",
            bufo.name, bufo.phrase, published.uri
        );
        Ok(())
    }
}

/// Recent-post history backed by the bot's own repo listing.
pub struct BskyHistory {
    client: Arc<BskyClient>,
}

impl BskyHistory {
    pub fn new(client: Arc<BskyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PublishHistory for BskyHistory {
    async fn recent_posts(&self) -> Result<Vec<HistoryPost>> {
        let records = self
            .client
            .list_posts(HISTORY_PAGE_LIMIT)
            .await
            .context("failed to list recent posts")?;
        // Records without a parseable timestamp cannot be window-checked
        // and are skipped.
        Ok(records
            .into_iter()
            .filter_map(|rec| {
                let created_at = rec.value.created_at()?;
                Some(HistoryPost {
                    created_at,
                    image_alts: rec.value.image_alts(),
                })
            })
            .collect())
    }
}
