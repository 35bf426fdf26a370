//! Shared Bluesky / AT Protocol functionality for the bufo bot.
//!
//! Keeps the protocol surface separate from bot logic: the XRPC session
//! client, the lexicon record shapes the bot reads and writes, and the
//! Jetstream wire parsing.

pub mod client;
pub mod jetstream;
pub mod records;

pub use client::{BskyClient, Error};
pub use jetstream::{parse_post_event, subscribe_url, PostEvent};
pub use records::{
    image_post_record, quote_with_image_record, record_timestamp, ListedPost, PostRecordView,
    StrongRef, POSTS_COLLECTION,
};
