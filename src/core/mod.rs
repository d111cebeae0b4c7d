//! Core pipeline — the streaming data path (C2–C4).
//!
//! Owns no transport. `event_bus` is the in-process publish/subscribe hub,
//! `sequencer` is the order-book integrity core, and `router` demultiplexes
//! raw upstream frames into calls against the sequencer, persistence, and
//! the bus. This module has no hidden singletons — `main` owns one
//! `EventBus` and one `Sequencer` per running pipeline instance and passes
//! them explicitly to whatever needs them.

pub mod event_bus;
pub mod router;
pub mod sequencer;

pub use event_bus::EventBus;
pub use router::MessageRouter;
pub use sequencer::Sequencer;
