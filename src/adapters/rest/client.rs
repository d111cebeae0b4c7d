//! Gamma-style REST API client, implementing [`MarketDataApi`].
//!
//! Rate-limited to `http_rps` requests per second via `governor`; the
//! scanner and URL resolver share one client and one budget.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ports::persistence::{MarketInfo, TokenInfo};
use crate::ports::rest_client::{MarketDataApi, MarketPage};

type Limiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

#[derive(Debug, Deserialize)]
struct GammaToken {
    #[serde(alias = "tokenId")]
    token_id: String,
    outcome: String,
}

#[derive(Debug, Deserialize)]
struct GammaMarket {
    id: String,
    slug: String,
    question: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, alias = "clobTokenIds")]
    tokens: Vec<GammaToken>,
}

impl From<GammaMarket> for MarketInfo {
    fn from(m: GammaMarket) -> Self {
        Self {
            id: m.id,
            slug: m.slug,
            question: m.question,
            category: m.category,
            tokens: m
                .tokens
                .into_iter()
                .map(|t| TokenInfo { token_id: t.token_id, outcome: t.outcome })
                .collect(),
        }
    }
}

/// Polymarket Gamma-style REST API client, backed by `reqwest` with a
/// rustls TLS backend.
pub struct GammaApiClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<Limiter>,
}

impl GammaApiClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64, rps: u32) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(rps.max(1)).expect("rps clamped to at least 1"));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string(), rate_limiter })
    }
}

#[async_trait]
impl MarketDataApi for GammaApiClient {
    async fn fetch_markets_page(
        &self,
        category: Option<&str>,
        page_size: u32,
        offset: u32,
    ) -> anyhow::Result<MarketPage> {
        self.rate_limiter.until_ready().await;

        let mut request = self
            .client
            .get(format!("{}/markets", self.base_url))
            .query(&[("active", "true"), ("limit", &page_size.to_string()), ("offset", &offset.to_string())]);
        if let Some(category) = category {
            request = request.query(&[("category", category)]);
        }

        let response = request.send().await?.error_for_status()?;
        let markets: Vec<GammaMarket> = response.json().await.unwrap_or_else(|err| {
            warn!(error = %err, "unexpected markets response shape");
            Vec::new()
        });

        debug!(count = markets.len(), offset, "fetched markets page");
        let has_more = markets.len() as u32 == page_size;
        Ok(MarketPage { markets: markets.into_iter().map(Into::into).collect(), has_more })
    }

    async fn fetch_market_by_slug(&self, slug: &str) -> anyhow::Result<Option<MarketInfo>> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(format!("{}/markets", self.base_url))
            .query(&[("slug", slug)])
            .send()
            .await?
            .error_for_status()?;

        let markets: Vec<GammaMarket> = response.json().await.unwrap_or_default();
        Ok(markets.into_iter().next().map(Into::into))
    }
}
