//! Market scanner port — periodic market-discovery collaborator.
//!
//! Out of scope for the streaming core; specified here only as the
//! interface `main` wires at startup. Grounded on
//! `original_source/polymarket_realtime/services/market_scanner.py`.

use async_trait::async_trait;

/// Result of a single scan pass.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub total_count: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub failed_count: usize,
}

#[async_trait]
pub trait MarketScanner: Send + Sync + 'static {
    /// Run one full scan (all pages) and persist the results.
    async fn scan_all(&self, category: Option<&str>) -> anyhow::Result<ScanResult>;

    /// Start a periodic background scan at the given interval. Returns
    /// once the first scan has completed; subsequent scans run until the
    /// returned handle is stopped.
    async fn start_periodic_scan(
        &self,
        interval_seconds: u64,
        category: Option<String>,
    ) -> anyhow::Result<tokio::task::JoinHandle<()>>;
}
