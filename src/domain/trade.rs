//! Core market-data types shared by every pipeline component.
//!
//! `Token` is an opaque string key — nothing in the core ever parses or
//! validates its shape. `price`/`size`/`amount` are `Decimal` and always
//! (de)serialize as canonical strings (never through binary floats), per
//! the wire and persistence contracts in the spec's data model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque tradable-outcome identifier. Treated as an uninterpreted key
/// everywhere in the core; never parsed or validated.
pub type Token = String;

/// Side of a trade's taker, as reported upstream. Unknown/empty sides are
/// preserved rather than rejected — the core is a transport, not a
/// validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TakerSide {
    Buy,
    Sell,
    #[serde(other)]
    Unknown,
}

impl TakerSide {
    /// Parse from the loosely-typed `side`/`taker_side` wire field.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "buy" => Self::Buy,
            "sell" => Self::Sell,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for TakerSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Unknown => write!(f, ""),
        }
    }
}

/// A single executed trade. `trade_id` is globally unique; persisting the
/// same `trade_id` twice is a no-op, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub token_id: Token,
    pub price: Decimal,
    pub amount: Decimal,
    pub taker_side: TakerSide,
    pub timestamp: DateTime<Utc>,
}

/// A single order-book price level. `size == 0` is a deletion marker in
/// the wire protocol and must never be persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl OrderbookLevel {
    /// Whether this level is a wire-protocol deletion marker.
    pub fn is_deletion(&self) -> bool {
        self.size.is_zero()
    }
}

/// A full book state or an incremental delta — the shapes are identical;
/// routing (not the data) distinguishes a snapshot from a delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub token_id: Token,
    #[serde(default)]
    pub bids: Vec<OrderbookLevel>,
    #[serde(default)]
    pub asks: Vec<OrderbookLevel>,
    pub sequence: Option<i64>,
    pub received_at: DateTime<Utc>,
}

/// A normalized message re-published to downstream consumers via the
/// event bus. `payload` is an opaque JSON object — the core never
/// interprets it past routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardEvent {
    pub token_id: Token,
    pub event_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl ForwardEvent {
    pub fn new(token_id: impl Into<Token>, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            token_id: token_id.into(),
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}
