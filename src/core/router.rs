//! Message router (C4) — demultiplexes raw upstream frames into trade and
//! order-book handling.
//!
//! Upstream frames are loosely typed JSON with several historical field
//! names for the same concept (`market`/`asset_id`, `ts`/`timestamp`, ...).
//! [`RawMessage`] accepts every alias the venue has shipped; [`classify`]
//! then applies a fixed, ordered set of rules to decide what the frame
//! means. First matching rule wins.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::event_bus::EventBus;
use crate::core::sequencer::{Decision, MessageKind, Sequencer};
use crate::domain::{ForwardEvent, OrderbookLevel, OrderbookSnapshot, TakerSide, Trade};
use crate::ports::persistence::Persistence;

/// One raw upstream frame, normalized across every field alias the venue
/// has used historically. Unknown fields are ignored rather than
/// rejected.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawMessage {
    #[serde(alias = "type", alias = "channel")]
    pub event_type: Option<String>,

    #[serde(alias = "asset_id")]
    pub market: Option<String>,

    #[serde(alias = "sequence")]
    pub seq: Option<i64>,

    #[serde(default)]
    pub bids: Vec<RawLevel>,
    #[serde(default)]
    pub asks: Vec<RawLevel>,

    #[serde(alias = "trade_id")]
    pub id: Option<String>,
    pub price: Option<Decimal>,
    #[serde(alias = "amount")]
    pub size: Option<Decimal>,
    #[serde(alias = "taker_side")]
    pub side: Option<String>,

    #[serde(alias = "timestamp", alias = "created_at")]
    pub ts: Option<Value>,

    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl From<RawLevel> for OrderbookLevel {
    fn from(raw: RawLevel) -> Self {
        Self { price: raw.price, size: raw.size }
    }
}

/// What a raw frame was classified as, once routing rules are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    OrderbookSnapshot,
    OrderbookDelta,
    Trade,
    LastTradePrice,
    TickSizeChange,
    Heartbeat,
    Unknown,
}

/// Classify a raw frame by its `event_type`/`type`/`channel` tag and
/// shape, in fixed priority order. This mirrors the original relay's
/// dispatch table exactly; reordering these arms changes routing
/// behavior.
pub fn classify(raw: &RawMessage) -> Dispatch {
    let tag = raw.event_type.as_deref().unwrap_or_default().to_ascii_lowercase();

    match tag.as_str() {
        "book" | "orderbook_snapshot" | "snapshot" => Dispatch::OrderbookSnapshot,
        "price_change" | "orderbook_delta" | "delta" | "update" => Dispatch::OrderbookDelta,
        "last_trade_price" => Dispatch::LastTradePrice,
        "tick_size_change" => Dispatch::TickSizeChange,
        "trade" | "last_trade" => Dispatch::Trade,
        "heartbeat" | "pong" => Dispatch::Heartbeat,
        _ if raw.id.is_some() && raw.price.is_some() && raw.size.is_some() => Dispatch::Trade,
        _ if !raw.bids.is_empty() || !raw.asks.is_empty() => Dispatch::OrderbookSnapshot,
        _ => Dispatch::Unknown,
    }
}

/// Parse the loosely-typed `ts`/`timestamp`/`created_at` wire field:
/// an integer (seconds or milliseconds since epoch), an all-digit string
/// (same), an ISO-8601 string, or absent — falling back to "now" rather
/// than rejecting the frame.
pub fn parse_timestamp(raw: Option<&Value>) -> DateTime<Utc> {
    let Some(value) = raw else { return Utc::now() };

    let millis_from_number = |n: i64| -> DateTime<Utc> {
        let millis = if n > 10_000_000_000 { n } else { n * 1000 };
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    };

    match value {
        Value::Number(n) => n.as_i64().map(millis_from_number).unwrap_or_else(Utc::now),
        Value::String(s) if s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty() => {
            s.parse::<i64>().map(millis_from_number).unwrap_or_else(Utc::now)
        }
        Value::String(s) => {
            let normalized = s.replace('Z', "+00:00");
            DateTime::parse_from_rfc3339(&normalized)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        }
        _ => Utc::now(),
    }
}

/// Demultiplexes raw upstream frames into sequencer, persistence, and
/// event-bus calls. Owns no transport — the upstream session hands it
/// already-deserialized text frames.
pub struct MessageRouter {
    sequencer: Arc<Sequencer>,
    persistence: Arc<dyn Persistence>,
    event_bus: Arc<EventBus>,
}

impl MessageRouter {
    pub fn new(
        sequencer: Arc<Sequencer>,
        persistence: Arc<dyn Persistence>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self { sequencer, persistence, event_bus }
    }

    /// Parse and route one raw upstream text frame. Frames may arrive as
    /// a bare object or as a single-element array wrapping one; both are
    /// accepted. Malformed JSON is logged and dropped, never propagated —
    /// one bad frame must not break the session loop.
    pub async fn route_frame(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(err) => {
                warn!(error = %err, "failed to parse upstream frame as json");
                return;
            }
        };

        let messages: Vec<Value> = match value {
            Value::Array(items) => items,
            other => vec![other],
        };

        for message in messages {
            self.route_value(message).await;
        }
    }

    async fn route_value(&self, value: Value) {
        let raw: RawMessage = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "failed to deserialize upstream message");
                return;
            }
        };

        match classify(&raw) {
            Dispatch::OrderbookSnapshot => self.handle_orderbook(raw, MessageKind::Snapshot).await,
            Dispatch::OrderbookDelta => self.handle_orderbook(raw, MessageKind::Delta).await,
            Dispatch::Trade => self.handle_trade(raw).await,
            Dispatch::LastTradePrice | Dispatch::TickSizeChange => self.handle_passthrough(raw),
            Dispatch::Heartbeat => debug!("upstream heartbeat"),
            Dispatch::Unknown => debug!(?raw, "unrecognized upstream message, dropping"),
        }
    }

    async fn handle_orderbook(&self, raw: RawMessage, kind: MessageKind) {
        let Some(token_id) = raw.market.clone() else {
            warn!("orderbook message missing market/asset_id, dropping");
            return;
        };
        match self.sequencer.process(&token_id, kind, raw.seq) {
            Decision::Drop(reason) => {
                debug!(token_id, ?reason, "dropped orderbook message");
                return;
            }
            Decision::Accept { gap } => {
                if gap {
                    debug!(token_id, sequence = ?raw.seq, "accepted orderbook message with sequence gap");
                }
            }
        }

        let snapshot = OrderbookSnapshot {
            token_id: token_id.clone(),
            bids: raw.bids.into_iter().map(Into::into).collect(),
            asks: raw.asks.into_iter().map(Into::into).collect(),
            sequence: raw.seq,
            received_at: parse_timestamp(raw.ts.as_ref()),
        };

        if let Err(err) = self.persistence.upsert_orderbook(&snapshot).await {
            warn!(token_id, error = %err, "failed to persist orderbook snapshot");
        }

        let event_type = match kind {
            MessageKind::Snapshot => "book",
            MessageKind::Delta => "price_change",
        };
        let payload = serde_json::to_value(&snapshot).unwrap_or(Value::Null);
        self.event_bus.publish(&ForwardEvent::new(token_id, event_type, payload));
    }

    async fn handle_trade(&self, raw: RawMessage) {
        let (Some(token_id), Some(trade_id), Some(price), Some(size)) =
            (raw.market.clone(), raw.id.clone(), raw.price, raw.size)
        else {
            warn!("trade message missing a required field, dropping");
            return;
        };

        let trade = Trade {
            trade_id,
            token_id: token_id.clone(),
            price,
            amount: size,
            taker_side: raw.side.as_deref().map(TakerSide::parse).unwrap_or(TakerSide::Unknown),
            timestamp: parse_timestamp(raw.ts.as_ref()),
        };

        match self.persistence.save_trade(&trade).await {
            Ok(outcome) if !outcome.inserted => {
                debug!(trade_id = %trade.trade_id, "duplicate trade, still forwarding");
            }
            Err(err) => {
                warn!(trade_id = %trade.trade_id, error = %err, "failed to persist trade, not forwarding");
                return;
            }
            Ok(_) => {}
        }

        let payload = serde_json::to_value(&trade).unwrap_or(Value::Null);
        self.event_bus.publish(&ForwardEvent::new(token_id, "trade", payload));
    }

    /// `last_trade_price`/`tick_size_change` carry no sequencing or
    /// persistence obligation — forward as-is.
    fn handle_passthrough(&self, raw: RawMessage) {
        let Some(token_id) = raw.market.clone() else {
            return;
        };
        let event_type = raw.event_type.clone().unwrap_or_else(|| "unknown".to_string());
        let payload = serde_json::to_value(&raw).unwrap_or(Value::Null);
        self.event_bus.publish(&ForwardEvent::new(token_id, event_type, payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::ports::persistence::{MarketInfo, MarketQuery, SaveTradeOutcome, TokenInfo};

    #[derive(Default)]
    struct FakePersistence {
        trades: Mutex<Vec<Trade>>,
        books: Mutex<Vec<OrderbookSnapshot>>,
        seen_trade_ids: Mutex<std::collections::HashSet<String>>,
    }

    #[async_trait]
    impl Persistence for FakePersistence {
        async fn save_trade(&self, trade: &Trade) -> anyhow::Result<SaveTradeOutcome> {
            let mut seen = self.seen_trade_ids.lock().unwrap();
            if !seen.insert(trade.trade_id.clone()) {
                return Ok(SaveTradeOutcome { inserted: false });
            }
            self.trades.lock().unwrap().push(trade.clone());
            Ok(SaveTradeOutcome { inserted: true })
        }

        async fn upsert_orderbook(&self, snapshot: &OrderbookSnapshot) -> anyhow::Result<()> {
            self.books.lock().unwrap().push(snapshot.clone());
            Ok(())
        }

        async fn get_token_ids_by_market(&self, _market_id: &str) -> anyhow::Result<Vec<TokenInfo>> {
            Ok(vec![])
        }

        async fn list_active_markets(&self, _query: MarketQuery) -> anyhow::Result<Vec<MarketInfo>> {
            Ok(vec![])
        }

        async fn upsert_market(&self, _market: &MarketInfo) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn deactivate_markets_not_in(&self, _active_ids: &[String]) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    fn router() -> (MessageRouter, Arc<FakePersistence>, Arc<EventBus>) {
        let sequencer = Arc::new(Sequencer::new(Default::default()));
        let persistence = Arc::new(FakePersistence::default());
        let bus = Arc::new(EventBus::new());
        let r = MessageRouter::new(sequencer, persistence.clone(), bus.clone());
        (r, persistence, bus)
    }

    #[test]
    fn classify_snapshot_by_event_type() {
        let raw = RawMessage { event_type: Some("book".into()), ..Default::default() };
        assert_eq!(classify(&raw), Dispatch::OrderbookSnapshot);
    }

    #[test]
    fn classify_delta_by_event_type() {
        let raw = RawMessage { event_type: Some("price_change".into()), ..Default::default() };
        assert_eq!(classify(&raw), Dispatch::OrderbookDelta);
    }

    #[test]
    fn classify_trade_by_shape_when_untagged() {
        let raw = RawMessage {
            id: Some("t1".into()),
            price: Some(Decimal::ONE),
            size: Some(Decimal::ONE),
            ..Default::default()
        };
        assert_eq!(classify(&raw), Dispatch::Trade);
    }

    #[test]
    fn parse_timestamp_handles_millis_and_seconds_and_iso() {
        let now_ms = Utc::now().timestamp_millis();
        let from_ms = parse_timestamp(Some(&Value::from(now_ms)));
        assert!((from_ms.timestamp_millis() - now_ms).abs() < 1000);

        let from_str = parse_timestamp(Some(&Value::from("2024-01-01T00:00:00Z")));
        assert_eq!(from_str.to_rfc3339(), "2024-01-01T00:00:00+00:00");

        let from_missing = parse_timestamp(None);
        assert!(from_missing <= Utc::now());
    }

    #[tokio::test]
    async fn snapshot_then_delta_is_forwarded_and_persisted() {
        let (router, persistence, bus) = router();
        let received = Arc::new(Mutex::new(0usize));
        let r = received.clone();
        bus.subscribe(
            "T1",
            Arc::new(move |_| {
                *r.lock().unwrap() += 1;
                Ok(())
            }),
        );

        router
            .route_frame(r#"{"event_type":"book","market":"T1","seq":1,"bids":[{"price":"0.5","size":"10"}],"asks":[]}"#)
            .await;
        router
            .route_frame(r#"{"event_type":"price_change","market":"T1","seq":2,"bids":[{"price":"0.5","size":"5"}],"asks":[]}"#)
            .await;

        assert_eq!(*received.lock().unwrap(), 2);
        assert_eq!(persistence.books.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delta_before_snapshot_is_dropped_and_not_forwarded() {
        let (router, persistence, bus) = router();
        let received = Arc::new(Mutex::new(0usize));
        let r = received.clone();
        bus.subscribe(
            "T1",
            Arc::new(move |_| {
                *r.lock().unwrap() += 1;
                Ok(())
            }),
        );

        router
            .route_frame(r#"{"event_type":"price_change","market":"T1","seq":2,"bids":[],"asks":[]}"#)
            .await;

        assert_eq!(*received.lock().unwrap(), 0);
        assert!(persistence.books.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_trade_id_is_persisted_once_but_forwarded_each_time() {
        let (router, persistence, bus) = router();
        let received = Arc::new(Mutex::new(0usize));
        let r = received.clone();
        bus.subscribe(
            "T1",
            Arc::new(move |_| {
                *r.lock().unwrap() += 1;
                Ok(())
            }),
        );

        let frame = r#"{"event_type":"trade","market":"T1","id":"trade-1","price":"0.5","size":"10","side":"buy"}"#;
        router.route_frame(frame).await;
        router.route_frame(frame).await;

        assert_eq!(*received.lock().unwrap(), 2);
        assert_eq!(persistence.trades.lock().unwrap().len(), 1);
    }
}
