//! Periodic market scanner, implementing [`MarketScanner`].
//!
//! Pages through the REST API's active-market listing, upserts each page
//! into the catalog, and — once a full scan completes with at least
//! [`MIN_MARKETS_FOR_DEACTIVATION`] markets seen — deactivates any market
//! the scan didn't observe. The threshold guards against a partial or
//! failed scan mass-deactivating the catalog.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::ports::persistence::Persistence;
use crate::ports::rest_client::MarketDataApi;
use crate::ports::scanner::{MarketScanner, ScanResult};

/// Minimum markets a scan must observe before deactivation of absent
/// markets is allowed.
pub const MIN_MARKETS_FOR_DEACTIVATION: usize = 10;

const PAGE_SIZE: u32 = 100;

pub struct PeriodicScanner {
    api: Arc<dyn MarketDataApi>,
    persistence: Arc<dyn Persistence>,
}

impl PeriodicScanner {
    pub fn new(api: Arc<dyn MarketDataApi>, persistence: Arc<dyn Persistence>) -> Self {
        Self { api, persistence }
    }
}

#[async_trait]
impl MarketScanner for PeriodicScanner {
    async fn scan_all(&self, category: Option<&str>) -> anyhow::Result<ScanResult> {
        info!(category = ?category, "starting market scan");

        let mut seen_ids = Vec::new();
        let mut new_count = 0usize;
        let mut updated_count = 0usize;
        let mut failed_count = 0usize;
        let mut offset = 0u32;

        loop {
            let page = self.api.fetch_markets_page(category, PAGE_SIZE, offset).await?;
            if page.markets.is_empty() {
                break;
            }

            for market in &page.markets {
                if market.id.is_empty() || market.tokens.iter().all(|t| t.token_id.is_empty()) {
                    failed_count += 1;
                    continue;
                }

                match self.persistence.upsert_market(market).await {
                    Ok(true) => new_count += 1,
                    Ok(false) => updated_count += 1,
                    Err(err) => {
                        failed_count += 1;
                        warn!(market_id = %market.id, error = %err, "failed to persist market");
                        continue;
                    }
                }
                seen_ids.push(market.id.clone());
            }

            offset += PAGE_SIZE;
            if !page.has_more {
                break;
            }
        }

        let total_count = seen_ids.len();
        if total_count >= MIN_MARKETS_FOR_DEACTIVATION {
            match self.persistence.deactivate_markets_not_in(&seen_ids).await {
                Ok(count) if count > 0 => info!(count, "deactivated markets absent from scan"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "failed to deactivate stale markets"),
            }
        } else {
            info!(total_count, threshold = MIN_MARKETS_FOR_DEACTIVATION, "scan below deactivation threshold, skipping");
        }

        info!(total_count, new_count, updated_count, failed_count, "market scan complete");
        Ok(ScanResult { total_count, new_count, updated_count, failed_count })
    }

    async fn start_periodic_scan(
        &self,
        interval_seconds: u64,
        category: Option<String>,
    ) -> anyhow::Result<JoinHandle<()>> {
        self.scan_all(category.as_deref()).await?;

        let api = self.api.clone();
        let persistence = self.persistence.clone();
        let handle = tokio::spawn(async move {
            let scanner = PeriodicScanner::new(api, persistence);
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = scanner.scan_all(category.as_deref()).await {
                    warn!(error = %err, "periodic market scan failed");
                }
            }
        });
        Ok(handle)
    }
}
