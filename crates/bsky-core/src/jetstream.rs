//! Jetstream wire types and frame classification.
//!
//! Jetstream is Bluesky's JSON-over-WebSocket firehose. The bot cares about
//! exactly one frame shape: a commit that creates a post with text. Every
//! other frame (deletes, updates, identity and account messages, foreign
//! collections, malformed JSON) is classified as skippable, never as an
//! error.

use serde::Deserialize;
use tracing::debug;

use crate::records::POSTS_COLLECTION;

/// A post accepted from the firehose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostEvent {
    pub did: String,
    pub rkey: String,
    pub text: String,
}

impl PostEvent {
    /// The at:// URI of the post record.
    pub fn uri(&self) -> String {
        format!("at://{}/{}/{}", self.did, POSTS_COLLECTION, self.rkey)
    }
}

/// Build the subscription URL for a Jetstream endpoint, filtered to post
/// records. Bare hosts get `wss://`; explicit `ws://` or `wss://` endpoints
/// are used as given, which is how tests point at a local server.
pub fn subscribe_url(endpoint: &str) -> String {
    let base = if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.trim_end_matches('/').to_string()
    } else {
        format!("wss://{}", endpoint.trim_end_matches('/'))
    };
    format!("{base}/subscribe?wantedCollections={POSTS_COLLECTION}")
}

/// Partial parse of one Jetstream frame. Unknown fields are ignored and
/// missing ones default, so frames are rejected by returning `None` from
/// [`parse_post_event`] rather than by failing.
#[derive(Debug, Default, Deserialize)]
struct JetstreamFrame {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    did: String,
    commit: Option<CommitBody>,
}

#[derive(Debug, Default, Deserialize)]
struct CommitBody {
    #[serde(default)]
    operation: String,
    collection: Option<String>,
    #[serde(default)]
    rkey: String,
    record: Option<RecordBody>,
}

#[derive(Debug, Default, Deserialize)]
struct RecordBody {
    #[serde(default)]
    text: String,
}

/// Classify a raw text frame, returning the post it creates, if any.
pub fn parse_post_event(raw: &str) -> Option<PostEvent> {
    let frame: JetstreamFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("skipping malformed jetstream frame: {e}");
            return None;
        }
    };
    if frame.kind != "commit" {
        return None;
    }
    let commit = frame.commit?;
    if commit.operation != "create" {
        return None;
    }
    // The subscription asks for posts only, but the filter lives server
    // side; check the collection whenever the frame carries one.
    if commit.collection.as_deref().is_some_and(|c| c != POSTS_COLLECTION) {
        return None;
    }
    let text = commit.record?.text;
    if text.is_empty() {
        return None;
    }
    Some(PostEvent {
        did: frame.did,
        rkey: commit.rkey,
        text,
    })
}
