//! Adapters layer — hexagonal architecture outer ring.
//!
//! Implements the port traits in `crate::ports`, plus the two transport
//! adapters (`upstream`, `relay`) that drive the core pipeline but have
//! no port of their own — they are wired directly by the composition
//! root in `main`.
//!
//! Adapter categories:
//! - `persistence`: SQLite-backed trade/order-book/catalog storage (C1)
//! - `upstream`: venue WebSocket session manager (C5)
//! - `relay`: downstream WebSocket fan-out server (C6)
//! - `rest`: Polymarket Gamma-style REST API client
//! - `scanner`: periodic market discovery
//! - `url_resolver`: Polymarket URL/slug resolution
//! - `metrics`: health/monitoring HTTP endpoint

pub mod metrics;
pub mod persistence;
pub mod relay;
pub mod rest;
pub mod scanner;
pub mod upstream;
pub mod url_resolver;
