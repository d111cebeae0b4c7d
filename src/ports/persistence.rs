//! Persistence port (C1) — idempotent storage the pipeline calls into.
//!
//! Implementors may fail any operation with a transient I/O error; callers
//! (the router, the relay) log and continue rather than dropping upstream
//! messages from being forwarded via the event bus.

use async_trait::async_trait;

use crate::domain::{OrderbookSnapshot, Token, Trade};

/// A market's tokens, as returned by catalog queries.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TokenInfo {
    pub token_id: Token,
    pub outcome: String,
}

/// A market row, as returned by catalog queries.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MarketInfo {
    pub id: String,
    pub slug: String,
    pub question: String,
    pub category: Option<String>,
    pub tokens: Vec<TokenInfo>,
}

/// Filter/paging for `list_active_markets`.
#[derive(Debug, Clone, Default)]
pub struct MarketQuery {
    pub category: Option<String>,
    pub limit: i64,
}

/// Result of `save_trade`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveTradeOutcome {
    pub inserted: bool,
}

/// Persistence port consumed by the core pipeline (C1).
#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    /// Insert a trade keyed by `trade_id`. A conflicting `trade_id` is not
    /// an error — it returns `inserted: false` and leaves the row
    /// unchanged.
    async fn save_trade(&self, trade: &Trade) -> anyhow::Result<SaveTradeOutcome>;

    /// Upsert every level in the snapshot keyed by `(token_id, side,
    /// price)`, then delete rows for this `token_id` where `size == "0"`.
    async fn upsert_orderbook(&self, snapshot: &OrderbookSnapshot) -> anyhow::Result<()>;

    /// Tokens belonging to a market, used only by the relay's catalog
    /// queries (subscribe by market/category).
    async fn get_token_ids_by_market(&self, market_id: &str) -> anyhow::Result<Vec<TokenInfo>>;

    /// Active markets, optionally filtered by category, used only by the
    /// relay's `list_markets`/`subscribe_category` actions.
    async fn list_active_markets(&self, query: MarketQuery) -> anyhow::Result<Vec<MarketInfo>>;

    /// Upsert a market and its tokens (catalog maintained by the
    /// scanner). Returns `true` if the market row was newly created,
    /// `false` if an existing row was updated.
    async fn upsert_market(&self, market: &MarketInfo) -> anyhow::Result<bool>;

    /// Mark every market not present in `active_ids` as inactive.
    /// Callers are responsible for the scanner's own minimum-threshold
    /// guard against mass deactivation on a partial scan.
    async fn deactivate_markets_not_in(&self, active_ids: &[String]) -> anyhow::Result<u64>;
}
