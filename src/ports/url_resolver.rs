//! URL resolver port — Polymarket URL/slug → token id collaborator.
//!
//! Out of scope for the streaming core; specified here only as the
//! interface consumed during subscription setup. Grounded on
//! `original_source/polymarket_realtime/services/url_resolver.py`.

use async_trait::async_trait;

use crate::ports::persistence::MarketInfo;

/// Result of resolving a Polymarket URL or slug to its tokens.
#[derive(Debug, Clone)]
pub struct UrlResolveResult {
    pub slug: String,
    pub yes_token: Option<String>,
    pub no_token: Option<String>,
    pub market: MarketInfo,
}

#[async_trait]
pub trait UrlResolver: Send + Sync + 'static {
    /// Resolve a full Polymarket URL or bare slug to its market and
    /// yes/no token ids.
    async fn resolve(&self, url_or_slug: &str) -> anyhow::Result<UrlResolveResult>;
}
