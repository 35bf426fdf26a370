//! Bufo bot: watches the Bluesky firehose for posts whose words contain a
//! bufo phrase and replies with the matching reaction image.

pub mod bot;
pub mod catalog;
pub mod config;
pub mod cooldown;
pub mod firehose;
pub mod matcher;
pub mod publisher;
