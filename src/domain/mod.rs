//! Domain layer — core market-data types.
//!
//! Pure data definitions for the relay pipeline (hexagonal architecture
//! inner ring). No I/O, no transport details — those live in `adapters`.

pub mod trade;

pub use trade::{
    ForwardEvent, OrderbookLevel, OrderbookSnapshot, TakerSide, Token, Trade,
};
