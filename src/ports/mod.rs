//! Ports layer — hexagonal architecture boundaries.
//!
//! Defines the interfaces the pipeline core requires from the outside
//! world. Adapters implement these traits.
//!
//! Port categories:
//! - `persistence`: idempotent trade/orderbook storage and catalog queries (C1)
//! - `rest_client`: Polymarket Gamma-style REST API (market discovery collaborator)
//! - `scanner`: periodic market discovery
//! - `url_resolver`: Polymarket URL/slug → token id resolution

pub mod persistence;
pub mod rest_client;
pub mod scanner;
pub mod url_resolver;

pub use persistence::Persistence;
pub use rest_client::MarketDataApi;
pub use scanner::MarketScanner;
pub use url_resolver::UrlResolver;
