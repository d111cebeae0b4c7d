//! Upstream session adapter (C5) — connects to the venue's market-data
//! WebSocket, keeps it subscribed and alive, and hands every inbound
//! frame to the message router.

pub mod session;

pub use session::UpstreamSession;
