//! Upstream WebSocket session (C5) — connect/subscribe/heartbeat/reconnect
//! state machine.
//!
//! One logical owner task per connection: the subscription registry is
//! mutated by `subscribe`/`unsubscribe` and by the owning task's own
//! resubscribe pass under the same mutex, never concurrently from two
//! tasks holding the write half.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use crate::core::{MessageRouter, Sequencer};
use crate::domain::Token;

const SUBSCRIBE_PACING: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Upstream WebSocket session manager. Owns no transport until `run` is
/// called; `subscribe`/`unsubscribe` are safe to call before, during, or
/// after a connection is live.
pub struct UpstreamSession {
    ws_url: String,
    heartbeat_interval: Duration,
    initial_delay: Duration,
    router: Arc<MessageRouter>,
    sequencer: Arc<Sequencer>,
    registry: Mutex<HashSet<Token>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    backoff: Mutex<Duration>,
    running: AtomicBool,
    connected: AtomicBool,
}

impl UpstreamSession {
    pub fn new(
        ws_url: impl Into<String>,
        heartbeat_interval: Duration,
        initial_delay: Duration,
        router: Arc<MessageRouter>,
        sequencer: Arc<Sequencer>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            heartbeat_interval,
            initial_delay,
            router,
            sequencer,
            registry: Mutex::new(HashSet::new()),
            outbound: Mutex::new(None),
            backoff: Mutex::new(initial_delay),
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.lock().expect("upstream registry poisoned").len()
    }

    /// Add `token_id` to the subscription registry unconditionally; if
    /// currently connected, send the subscribe frame immediately.
    /// Re-subscribing an already-registered token is not an error.
    pub fn subscribe(&self, token_id: &Token) {
        let is_new = {
            let mut registry = self.registry.lock().expect("upstream registry poisoned");
            registry.insert(token_id.clone())
        };

        if let Some(tx) = self.outbound.lock().expect("upstream outbound poisoned").as_ref() {
            if let Err(err) = tx.send(subscribe_frame(token_id)) {
                warn!(token_id, error = %err, "failed to queue subscribe frame");
            }
        }

        debug!(token_id, is_new, "subscribed to upstream token");
    }

    /// Remove `token_id` from the registry and reset its order-book
    /// state, so a future resubscribe starts from a clean baseline. The
    /// upstream protocol has no documented unsubscribe frame, so none is
    /// sent.
    pub fn unsubscribe(&self, token_id: &Token) {
        self.registry.lock().expect("upstream registry poisoned").remove(token_id);
        self.sequencer.reset_token(token_id);
    }

    /// Run the connect/stream/reconnect loop until `stop()` is called.
    /// Never returns an error to the caller — failures are retried with
    /// exponential backoff forever while `running`.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            if let Err(err) = self.connect_and_stream().await {
                let delay = *self.backoff.lock().expect("upstream backoff poisoned");
                warn!(error = %err, delay_secs = delay.as_secs(), "upstream session error, backing off");
            }

            self.connected.store(false, Ordering::SeqCst);
            *self.outbound.lock().expect("upstream outbound poisoned") = None;

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let delay = {
                let mut backoff = self.backoff.lock().expect("upstream backoff poisoned");
                let current = *backoff;
                *backoff = std::cmp::min(current * 2, MAX_BACKOFF);
                current
            };
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_stream(&self) -> anyhow::Result<()> {
        let (stream, _response) =
            connect_async(&self.ws_url).await.context("upstream connect failed")?;
        let (mut write, mut read) = stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock().expect("upstream outbound poisoned") = Some(tx);
        self.connected.store(true, Ordering::SeqCst);
        *self.backoff.lock().expect("upstream backoff poisoned") = self.initial_delay;
        info!(url = %self.ws_url, "upstream connected");

        self.resubscribe_all().await;

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = heartbeat.tick() => {
                    self.sequencer.prune();
                    if write.send(Message::Text("PING".into())).await.is_err() {
                        return Err(anyhow::anyhow!("heartbeat send failed"));
                    }
                }

                outgoing = rx.recv() => {
                    match outgoing {
                        Some(msg) => {
                            if write.send(msg).await.is_err() {
                                return Err(anyhow::anyhow!("failed to send queued frame"));
                            }
                        }
                        None => return Err(anyhow::anyhow!("outbound channel closed")),
                    }
                }

                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            self.router.route_frame(text.as_ref()).await;
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(anyhow::anyhow!("upstream connection closed"));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            return Err(anyhow::anyhow!("upstream read error: {err}"));
                        }
                    }
                }
            }
        }
    }

    async fn resubscribe_all(&self) {
        let tokens: Vec<Token> = {
            let registry = self.registry.lock().expect("upstream registry poisoned");
            registry.iter().cloned().collect()
        };

        for token_id in tokens {
            if let Some(tx) = self.outbound.lock().expect("upstream outbound poisoned").as_ref() {
                if let Err(err) = tx.send(subscribe_frame(&token_id)) {
                    warn!(token_id = %token_id, error = %err, "failed to queue resubscribe frame");
                }
            }
            tokio::time::sleep(SUBSCRIBE_PACING).await;
        }
    }

    /// Stop the session. Idempotent; safe to call whether or not a
    /// connection is currently live.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        *self.outbound.lock().expect("upstream outbound poisoned") = None;

        let tokens: Vec<Token> = {
            let mut registry = self.registry.lock().expect("upstream registry poisoned");
            let tokens = registry.iter().cloned().collect();
            registry.clear();
            tokens
        };
        for token_id in tokens {
            self.sequencer.reset_token(&token_id);
        }
    }
}

fn subscribe_frame(token_id: &Token) -> Message {
    let frame = serde_json::json!({ "assets_ids": [token_id], "type": "market" });
    Message::Text(frame.to_string().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_shape_matches_wire_protocol() {
        let msg = subscribe_frame(&"T9".to_string());
        let text = msg.to_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["type"], "market");
        assert_eq!(value["assets_ids"][0], "T9");
    }
}
