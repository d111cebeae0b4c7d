//! Polymarket market-data relay — library root.
//!
//! Re-exports every module for the integration tests and the binary
//! entry point in `main.rs`.

pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod ports;
