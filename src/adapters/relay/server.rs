//! Downstream WebSocket relay server (C6).
//!
//! One mutex guards both subscription indices (`token_to_conns`,
//! `conn_to_tokens`) plus the server's own event-bus registrations; a
//! per-client send uses no shared lock — only that connection's own
//! outbound channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use crate::adapters::upstream::UpstreamSession;
use crate::core::event_bus::{EventBus, SubscriptionId};
use crate::domain::{ForwardEvent, Token};
use crate::ports::persistence::{MarketQuery, Persistence};

const PING_INTERVAL: Duration = Duration::from_secs(20);
const PING_TIMEOUT: Duration = Duration::from_secs(10);
const BULK_SUBSCRIBE_PACING: Duration = Duration::from_millis(50);
const DEFAULT_MARKET_LIMIT: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConnId(u64);

#[derive(Debug, Deserialize)]
struct ClientFrame {
    action: String,
    #[serde(alias = "token")]
    token_id: Option<String>,
    #[serde(default)]
    token_ids: Option<Vec<String>>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Default)]
struct SubscriptionState {
    token_to_conns: HashMap<Token, HashSet<ConnId>>,
    conn_to_tokens: HashMap<ConnId, HashSet<Token>>,
    bus_subscriptions: HashMap<Token, SubscriptionId>,
}

/// WebSocket fan-out server. `run` binds and accepts connections until
/// `shutdown_rx` fires; `stop` tears down every live connection and
/// releases every event-bus registration.
pub struct RelayServer {
    host: String,
    port: u16,
    event_bus: Arc<EventBus>,
    upstream: Arc<UpstreamSession>,
    persistence: Arc<dyn Persistence>,
    market_limit: i64,
    state: Mutex<SubscriptionState>,
    conns: Mutex<HashMap<ConnId, mpsc::UnboundedSender<Message>>>,
    next_conn_id: AtomicU64,
}

impl RelayServer {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        event_bus: Arc<EventBus>,
        upstream: Arc<UpstreamSession>,
        persistence: Arc<dyn Persistence>,
    ) -> Arc<Self> {
        Arc::new(Self {
            host: host.into(),
            port,
            event_bus,
            upstream,
            persistence,
            market_limit: DEFAULT_MARKET_LIMIT,
            state: Mutex::new(SubscriptionState::default()),
            conns: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        })
    }

    #[instrument(skip(self, shutdown_rx), fields(host = %self.host, port = self.port))]
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(address = %addr, "relay server listening");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("relay server shutting down");
                    self.stop();
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = self.clone();
                            tokio::spawn(async move {
                                if let Err(err) = server.handle_connection(stream).await {
                                    debug!(%peer, error = %err, "relay connection ended");
                                }
                            });
                        }
                        Err(err) => warn!(error = %err, "failed to accept relay connection"),
                    }
                }
            }
        }
    }

    /// Close every live connection and release every upstream demand
    /// registration. Idempotent.
    pub fn stop(&self) {
        let conn_ids: Vec<ConnId> = self.conns.lock().expect("relay conns poisoned").keys().copied().collect();
        for conn_id in conn_ids {
            self.cleanup_connection(conn_id);
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> anyhow::Result<()> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws.split();

        let conn_id = ConnId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.conns.lock().expect("relay conns poisoned").insert(conn_id, tx);

        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        let mut last_activity = Instant::now();

        let result: anyhow::Result<()> = loop {
            tokio::select! {
                biased;

                outgoing = rx.recv() => {
                    match outgoing {
                        Some(msg) => {
                            if write.send(msg).await.is_err() {
                                break Err(anyhow::anyhow!("client send failed"));
                            }
                        }
                        None => break Ok(()),
                    }
                }

                _ = ping_interval.tick() => {
                    if last_activity.elapsed() > PING_INTERVAL + PING_TIMEOUT {
                        break Err(anyhow::anyhow!("client ping timeout"));
                    }
                    if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break Err(anyhow::anyhow!("ping send failed"));
                    }
                }

                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            last_activity = Instant::now();
                            self.dispatch_client_frame(conn_id, text.as_ref()).await;
                        }
                        Some(Ok(Message::Pong(_) | Message::Ping(_))) => {
                            last_activity = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => break Err(anyhow::anyhow!("client read error: {err}")),
                    }
                }
            }
        };

        self.cleanup_connection(conn_id);
        result
    }

    async fn dispatch_client_frame(self: &Arc<Self>, conn_id: ConnId, text: &str) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(_) => {
                self.send_error(conn_id, "invalid_json");
                return;
            }
        };

        match frame.action.as_str() {
            "subscribe" => self.handle_subscribe(conn_id, frame).await,
            "subscribe_batch" => self.handle_subscribe_batch(conn_id, frame).await,
            "unsubscribe" => self.handle_unsubscribe(conn_id, frame),
            "list_markets" => self.handle_list_markets(conn_id, frame).await,
            "subscribe_category" => self.handle_subscribe_category(conn_id, frame.category).await,
            "subscribe_all" => self.handle_subscribe_category(conn_id, None).await,
            "ping" => self.send_to(conn_id, json!({ "type": "pong" })),
            _ => self.send_error(conn_id, "unsupported_action"),
        }
    }

    async fn handle_subscribe(self: &Arc<Self>, conn_id: ConnId, frame: ClientFrame) {
        let Some(token_id) = frame.token_id.filter(|t| !t.trim().is_empty()) else {
            self.send_error(conn_id, "invalid_token_id");
            return;
        };
        self.add_subscription(conn_id, &token_id);
        self.send_to(conn_id, json!({ "type": "subscribed", "token_id": token_id }));
    }

    async fn handle_subscribe_batch(self: &Arc<Self>, conn_id: ConnId, frame: ClientFrame) {
        let Some(raw_ids) = frame.token_ids else {
            self.send_error(conn_id, "invalid_token_ids");
            return;
        };

        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        for raw in raw_ids {
            let trimmed = raw.trim().to_string();
            if !trimmed.is_empty() && seen.insert(trimmed.clone()) {
                accepted.push(trimmed);
            }
        }

        if accepted.is_empty() {
            self.send_error(conn_id, "empty_token_ids");
            return;
        }

        self.bulk_subscribe(conn_id, &accepted).await;
        self.send_to(
            conn_id,
            json!({ "type": "subscribed_batch", "token_ids": accepted }),
        );
    }

    fn handle_unsubscribe(self: &Arc<Self>, conn_id: ConnId, frame: ClientFrame) {
        let Some(token_id) = frame.token_id.filter(|t| !t.trim().is_empty()) else {
            self.send_error(conn_id, "invalid_token_id");
            return;
        };
        self.remove_subscription(conn_id, &token_id);
        self.send_to(conn_id, json!({ "type": "unsubscribed", "token_id": token_id }));
    }

    async fn handle_list_markets(self: &Arc<Self>, conn_id: ConnId, frame: ClientFrame) {
        let limit = frame.limit.unwrap_or(self.market_limit).clamp(1, self.market_limit);
        let query = MarketQuery { category: frame.category.clone(), limit };

        match self.persistence.list_active_markets(query).await {
            Ok(markets) => {
                let markets_json: Vec<Value> = markets
                    .iter()
                    .map(|m| {
                        json!({
                            "id": m.id,
                            "slug": m.slug,
                            "question": m.question,
                            "category": m.category,
                            "tokens": m.tokens.iter().map(|t| json!({
                                "token_id": t.token_id,
                                "outcome": t.outcome,
                            })).collect::<Vec<_>>(),
                        })
                    })
                    .collect();

                self.send_to(
                    conn_id,
                    json!({
                        "status": "markets",
                        "category": frame.category,
                        "count": markets_json.len(),
                        "limit": limit,
                        "max_limit": self.market_limit,
                        "markets": markets_json,
                    }),
                );
            }
            Err(err) => {
                warn!(error = %err, "list_markets failed");
                self.send_error(conn_id, "list_markets_failed");
            }
        }
    }

    async fn handle_subscribe_category(self: &Arc<Self>, conn_id: ConnId, category: Option<String>) {
        let query = MarketQuery { category: category.clone(), limit: self.market_limit };

        let markets = match self.persistence.list_active_markets(query).await {
            Ok(markets) => markets,
            Err(err) => {
                warn!(error = %err, "subscribe_category failed");
                self.send_error(conn_id, "subscribe_category_failed");
                return;
            }
        };

        let mut new_subscriptions = 0usize;
        let mut token_count = 0usize;
        let tokens: Vec<Token> = markets.iter().flat_map(|m| m.tokens.iter().map(|t| t.token_id.clone())).collect();
        for token_id in &tokens {
            token_count += 1;
            let was_new = !self.is_subscribed(conn_id, token_id);
            self.add_subscription(conn_id, token_id);
            if was_new {
                new_subscriptions += 1;
                tokio::time::sleep(BULK_SUBSCRIBE_PACING).await;
            }
        }

        self.send_to(
            conn_id,
            json!({
                "status": "subscribed_category",
                "category": category,
                "market_count": markets.len(),
                "token_count": token_count,
                "new_subscriptions": new_subscriptions,
                "limit": self.market_limit,
                "max_limit": self.market_limit,
            }),
        );
    }

    fn is_subscribed(&self, conn_id: ConnId, token_id: &Token) -> bool {
        let state = self.state.lock().expect("relay state poisoned");
        state.conn_to_tokens.get(&conn_id).is_some_and(|tokens| tokens.contains(token_id))
    }

    /// Register a connection's interest in `token_id`. If this is the
    /// first subscriber for the token, registers the relay's own
    /// event-bus callback and signals upstream demand.
    fn add_subscription(self: &Arc<Self>, conn_id: ConnId, token_id: &Token) {
        let needs_bus_registration = {
            let mut state = self.state.lock().expect("relay state poisoned");
            let conns = state.token_to_conns.entry(token_id.clone()).or_default();
            let is_first = conns.is_empty();
            conns.insert(conn_id);
            state.conn_to_tokens.entry(conn_id).or_default().insert(token_id.clone());
            is_first
        };

        if needs_bus_registration {
            let server = self.clone();
            let token_for_callback = token_id.clone();
            let subscription_id = self.event_bus.subscribe(
                token_id.clone(),
                Arc::new(move |event: &ForwardEvent| {
                    server.fan_out(&token_for_callback, event);
                    Ok(())
                }),
            );
            self.state
                .lock()
                .expect("relay state poisoned")
                .bus_subscriptions
                .insert(token_id.clone(), subscription_id);
            self.upstream.subscribe(token_id);
        }
    }

    /// Remove a connection's interest in `token_id`. If it was the last
    /// subscriber, releases the event-bus callback. Upstream is not
    /// auto-unsubscribed — the protocol has no documented unsubscribe and
    /// the pipeline keeps consuming for already-subscribed tokens.
    fn remove_subscription(&self, conn_id: ConnId, token_id: &Token) {
        let released_bus_sub = {
            let mut state = self.state.lock().expect("relay state poisoned");
            if let Some(conns) = state.token_to_conns.get_mut(token_id) {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    state.token_to_conns.remove(token_id);
                }
            }
            if let Some(tokens) = state.conn_to_tokens.get_mut(&conn_id) {
                tokens.remove(token_id);
            }

            if !state.token_to_conns.contains_key(token_id) {
                state.bus_subscriptions.remove(token_id)
            } else {
                None
            }
        };

        if let Some(subscription_id) = released_bus_sub {
            self.event_bus.unsubscribe(token_id, subscription_id);
        }
    }

    async fn bulk_subscribe(self: &Arc<Self>, conn_id: ConnId, token_ids: &[Token]) {
        for token_id in token_ids {
            let was_new = !self.is_subscribed(conn_id, token_id);
            self.add_subscription(conn_id, token_id);
            if was_new {
                tokio::time::sleep(BULK_SUBSCRIBE_PACING).await;
            }
        }
    }

    fn cleanup_connection(&self, conn_id: ConnId) {
        let tokens: Vec<Token> = {
            let mut state = self.state.lock().expect("relay state poisoned");
            state.conn_to_tokens.remove(&conn_id).map(|set| set.into_iter().collect()).unwrap_or_default()
        };
        for token_id in tokens {
            self.remove_subscription(conn_id, &token_id);
        }
        self.conns.lock().expect("relay conns poisoned").remove(&conn_id);
    }

    /// Serialize and send one forward event to every connection
    /// currently subscribed to `token_id`. Send failures are tolerated
    /// per connection; they surface only when that connection's own
    /// read/ping loop next observes the broken socket.
    fn fan_out(&self, token_id: &Token, event: &ForwardEvent) {
        let conn_ids: Vec<ConnId> = {
            let state = self.state.lock().expect("relay state poisoned");
            state.token_to_conns.get(token_id).map(|set| set.iter().copied().collect()).unwrap_or_default()
        };
        if conn_ids.is_empty() {
            return;
        }

        let frame = json!({
            "type": event.event_type,
            "token_id": event.token_id,
            "data": event.payload,
            "timestamp": event.timestamp.to_rfc3339(),
        });
        let message = Message::Text(frame.to_string().into());

        let conns = self.conns.lock().expect("relay conns poisoned");
        for conn_id in conn_ids {
            if let Some(tx) = conns.get(&conn_id) {
                let _ = tx.send(message.clone());
            }
        }
    }

    fn send_to(&self, conn_id: ConnId, payload: Value) {
        if let Some(tx) = self.conns.lock().expect("relay conns poisoned").get(&conn_id) {
            let _ = tx.send(Message::Text(payload.to_string().into()));
        }
    }

    fn send_error(&self, conn_id: ConnId, code: &str) {
        self.send_to(conn_id, json!({ "type": "error", "error": code }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_accepts_legacy_token_alias() {
        let frame: ClientFrame = serde_json::from_str(r#"{"action":"subscribe","token":"T1"}"#).unwrap();
        assert_eq!(frame.token_id.as_deref(), Some("T1"));
    }
}
