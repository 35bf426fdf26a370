//! AT Protocol lexicon pieces the bot touches.
//!
//! Only the fields the bot reads or writes are modeled. Blob refs in
//! particular stay as raw JSON so the value returned by `uploadBlob` is
//! embedded byte-for-byte in the record that references it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Collection NSID for feed posts.
pub const POSTS_COLLECTION: &str = "app.bsky.feed.post";

/// Content-addressed reference to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// Render a timestamp the way record `createdAt` values are expected.
pub fn record_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Post record quoting `subject` with one attached image.
pub fn quote_with_image_record(
    subject: &StrongRef,
    blob: &Value,
    alt: &str,
    created_at: &str,
) -> Value {
    json!({
        "$type": POSTS_COLLECTION,
        "text": "",
        "createdAt": created_at,
        "embed": {
            "$type": "app.bsky.embed.recordWithMedia",
            "record": {
                "$type": "app.bsky.embed.record",
                "record": subject,
            },
            "media": {
                "$type": "app.bsky.embed.images",
                "images": [image_embed(blob, alt)],
            },
        },
    })
}

/// Post record carrying `text` and one attached image, without a quote.
pub fn image_post_record(text: &str, blob: &Value, alt: &str, created_at: &str) -> Value {
    json!({
        "$type": POSTS_COLLECTION,
        "text": text,
        "createdAt": created_at,
        "embed": {
            "$type": "app.bsky.embed.images",
            "images": [image_embed(blob, alt)],
        },
    })
}

fn image_embed(blob: &Value, alt: &str) -> Value {
    json!({ "image": blob, "alt": alt })
}

/// One record from `com.atproto.repo.listRecords`, partially parsed.
#[derive(Debug, Default, Deserialize)]
pub struct ListedPost {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub value: PostRecordView,
}

/// The value of a listed post record. Only the creation timestamp and the
/// alt texts of embedded images are read; everything else is dropped.
#[derive(Debug, Default, Deserialize)]
pub struct PostRecordView {
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    embed: Option<EmbedView>,
}

impl PostRecordView {
    /// The record's own creation timestamp, if present and parseable.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Alt texts of embedded images, covering both plain image embeds and
    /// record-with-media embeds.
    pub fn image_alts(&self) -> Vec<String> {
        let Some(embed) = &self.embed else {
            return Vec::new();
        };
        let images = if !embed.images.is_empty() {
            &embed.images
        } else if let Some(media) = &embed.media {
            &media.images
        } else {
            return Vec::new();
        };
        images.iter().map(|img| img.alt.clone()).collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct EmbedView {
    #[serde(default)]
    images: Vec<ImageView>,
    media: Option<MediaView>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaView {
    #[serde(default)]
    images: Vec<ImageView>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageView {
    #[serde(default)]
    alt: String,
}
