//! REST client port — market-discovery collaborator.
//!
//! Out of scope for the streaming core per the spec; specified here only
//! as the interface the scanner and URL resolver consume. Grounded on
//! `original_source/polymarket_realtime/api/client.py` (`PolymarketClient`).

use async_trait::async_trait;

use crate::ports::persistence::MarketInfo;

/// A page of markets fetched from the REST API.
#[derive(Debug, Clone, Default)]
pub struct MarketPage {
    pub markets: Vec<MarketInfo>,
    pub has_more: bool,
}

/// Polymarket Gamma-style REST API, as consumed by the scanner and the
/// URL resolver. Implementations are responsible for their own rate
/// limiting and retries.
#[async_trait]
pub trait MarketDataApi: Send + Sync + 'static {
    /// Fetch one page of active markets, optionally filtered by category.
    async fn fetch_markets_page(
        &self,
        category: Option<&str>,
        page_size: u32,
        offset: u32,
    ) -> anyhow::Result<MarketPage>;

    /// Fetch a single market by its slug (used by the URL resolver).
    async fn fetch_market_by_slug(&self, slug: &str) -> anyhow::Result<Option<MarketInfo>>;
}
