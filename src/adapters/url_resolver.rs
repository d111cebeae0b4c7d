//! Slug-based URL resolver, implementing [`UrlResolver`].
//!
//! Accepts a bare slug or a full Polymarket URL in any of its known
//! shapes (`/event/<slug>`, `/market/<slug>`, or a bare path segment)
//! and resolves it to a market and its yes/no token ids.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::ports::rest_client::MarketDataApi;
use crate::ports::url_resolver::{UrlResolveResult, UrlResolver};

pub struct SlugUrlResolver {
    api: Arc<dyn MarketDataApi>,
}

impl SlugUrlResolver {
    pub fn new(api: Arc<dyn MarketDataApi>) -> Self {
        Self { api }
    }

    /// Extract a market slug from a bare slug or a Polymarket URL.
    fn extract_slug(input: &str) -> Option<String> {
        if !input.contains('/') && !input.contains('.') {
            return Some(input.to_string());
        }

        let path = input.split("://").last().unwrap_or(input);

        for marker in ["/event/", "/market/"] {
            if let Some(idx) = path.find(marker) {
                let rest = &path[idx + marker.len()..];
                let slug = rest.split(['/', '?', '#']).next().unwrap_or(rest);
                if !slug.is_empty() {
                    return Some(slug.to_string());
                }
            }
        }

        path.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty()).map(str::to_string)
    }
}

#[async_trait]
impl UrlResolver for SlugUrlResolver {
    async fn resolve(&self, url_or_slug: &str) -> anyhow::Result<UrlResolveResult> {
        let slug = Self::extract_slug(url_or_slug)
            .ok_or_else(|| anyhow::anyhow!("could not extract slug from: {url_or_slug}"))?;

        info!(slug = %slug, "resolving market url");

        let market = self
            .api
            .fetch_market_by_slug(&slug)
            .await?
            .ok_or_else(|| anyhow::anyhow!("market not found for slug: {slug}"))?;

        anyhow::ensure!(
            market.tokens.len() >= 2,
            "market {slug} has insufficient tokens ({})",
            market.tokens.len()
        );

        let yes_token = market
            .tokens
            .iter()
            .find(|t| t.outcome.eq_ignore_ascii_case("yes"))
            .map(|t| t.token_id.clone());
        let no_token = market
            .tokens
            .iter()
            .find(|t| t.outcome.eq_ignore_ascii_case("no"))
            .map(|t| t.token_id.clone());

        let (yes_token, no_token) = match (yes_token, no_token) {
            (Some(y), Some(n)) => (Some(y), Some(n)),
            _ => (market.tokens.first().map(|t| t.token_id.clone()), market.tokens.get(1).map(|t| t.token_id.clone())),
        };

        Ok(UrlResolveResult { slug, yes_token, no_token, market })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_slug_handles_bare_slug() {
        assert_eq!(SlugUrlResolver::extract_slug("my-market-slug").as_deref(), Some("my-market-slug"));
    }

    #[test]
    fn extract_slug_handles_event_path() {
        assert_eq!(
            SlugUrlResolver::extract_slug("https://polymarket.com/event/my-market-slug").as_deref(),
            Some("my-market-slug")
        );
    }

    #[test]
    fn extract_slug_handles_market_path() {
        assert_eq!(
            SlugUrlResolver::extract_slug("https://polymarket.com/market/my-market-slug?tab=info").as_deref(),
            Some("my-market-slug")
        );
    }

    #[test]
    fn extract_slug_falls_back_to_last_segment() {
        assert_eq!(
            SlugUrlResolver::extract_slug("https://polymarket.com/my-market-slug").as_deref(),
            Some("my-market-slug")
        );
    }
}
