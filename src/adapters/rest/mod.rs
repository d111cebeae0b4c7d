//! REST adapter — Polymarket Gamma-style market-discovery API client.

pub mod client;

pub use client::GammaApiClient;
