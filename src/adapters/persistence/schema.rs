//! Embedded schema for the SQLite store.
//!
//! Mirrors the original relay's table layout: markets and their tokens
//! form a small catalog, trades are append-only keyed by `trade_id`, and
//! order-book levels are upserted per `(token_id, side, price)` with
//! zero-size levels deleted rather than stored.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS markets (
    id          TEXT PRIMARY KEY,
    slug        TEXT NOT NULL UNIQUE,
    question    TEXT NOT NULL,
    category    TEXT,
    active      INTEGER NOT NULL DEFAULT 1,
    end_date    TEXT,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS tokens (
    token_id    TEXT PRIMARY KEY,
    market_id   TEXT NOT NULL REFERENCES markets(id) ON DELETE CASCADE,
    outcome     TEXT NOT NULL,
    symbol      TEXT
);

CREATE INDEX IF NOT EXISTS idx_tokens_market_id ON tokens(market_id);

CREATE TABLE IF NOT EXISTS trades (
    trade_id    TEXT PRIMARY KEY,
    token_id    TEXT NOT NULL,
    price       TEXT NOT NULL,
    amount      TEXT NOT NULL,
    taker_side  TEXT NOT NULL,
    timestamp   TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_trades_token_id ON trades(token_id);

CREATE TABLE IF NOT EXISTS orderbook_levels (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    token_id    TEXT NOT NULL,
    side        TEXT NOT NULL CHECK (side IN ('bid', 'ask')),
    price       TEXT NOT NULL,
    size        TEXT NOT NULL,
    sequence    INTEGER,
    received_at TEXT NOT NULL,
    UNIQUE(token_id, side, price)
);

CREATE INDEX IF NOT EXISTS idx_orderbook_levels_token_id ON orderbook_levels(token_id);
"#;
