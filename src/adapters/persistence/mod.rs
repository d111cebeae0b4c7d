//! Persistence adapters — SQLite-backed implementation of the
//! [`crate::ports::Persistence`] port (C1).
//!
//! Trades and order-book levels are the hot path; markets/tokens are a
//! catalog maintained by the scanner and read by the relay's
//! `list_markets`/`subscribe_category` actions.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqlitePersistence;
