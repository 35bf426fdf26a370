//! Self-healing Jetstream consumer.
//!
//! One task owns the WebSocket: connect, read frames, forward accepted
//! posts, and on any failure wait a fixed delay and connect again, forever.
//! Shutdown is cooperative at both blocking points, the frame read and the
//! reconnect wait. There is no backpressure signal upstream; if the
//! receiving loop falls behind, frames queue in the channel and then in
//! the transport.

use std::time::Duration;

use anyhow::{Context, Result};
use bsky_core::jetstream::{parse_post_event, subscribe_url, PostEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Why a connection stopped without an error.
enum ConnectionEnd {
    Closed,
    ReceiverDropped,
}

/// Reconnecting subscription to the post firehose.
pub struct Firehose {
    endpoint: String,
    reconnect_delay: Duration,
}

impl Firehose {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    /// Override the reconnect delay; tests use a short one.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// The subscription URL this consumer connects to.
    pub fn url(&self) -> String {
        subscribe_url(&self.endpoint)
    }

    /// Spawn the consumer task. Accepted posts go to `tx`; the task ends on
    /// shutdown or when the receiving side is dropped.
    pub fn start(
        self,
        tx: mpsc::Sender<PostEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    res = self.run_connection(&tx) => match res {
                        Ok(ConnectionEnd::ReceiverDropped) => {
                            debug!("post receiver dropped, stopping jetstream consumer");
                            break;
                        }
                        Ok(ConnectionEnd::Closed) => {
                            info!(
                                "jetstream connection closed, reconnecting in {:?}",
                                self.reconnect_delay
                            );
                        }
                        Err(e) => {
                            warn!(
                                "jetstream connection error: {e:#}, reconnecting in {:?}",
                                self.reconnect_delay
                            );
                        }
                    },
                }
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(self.reconnect_delay) => {}
                }
            }
            info!("jetstream consumer stopped");
        })
    }

    /// One connection lifetime: connect, then read frames until close or
    /// error.
    async fn run_connection(&self, tx: &mpsc::Sender<PostEvent>) -> Result<ConnectionEnd> {
        let url = self.url();
        info!("connecting to jetstream at {}", self.endpoint);
        let (ws, _) = connect_async(url.as_str())
            .await
            .context("jetstream connection failed")?;
        info!("connected to jetstream");
        let (mut write, mut read) = ws.split();

        while let Some(frame) = read.next().await {
            match frame.context("jetstream read error")? {
                WsMessage::Text(raw) => {
                    if let Some(post) = parse_post_event(&raw) {
                        if tx.send(post).await.is_err() {
                            return Ok(ConnectionEnd::ReceiverDropped);
                        }
                    }
                }
                WsMessage::Ping(payload) => {
                    write.send(WsMessage::Pong(payload)).await.ok();
                }
                WsMessage::Close(_) => return Ok(ConnectionEnd::Closed),
                _ => {}
            }
        }
        Ok(ConnectionEnd::Closed)
    }
}
