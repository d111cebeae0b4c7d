//! SQLite implementation of the [`Persistence`] port, via `sqlx`.
//!
//! Trades are inserted with `INSERT OR IGNORE`, so a repeated
//! `trade_id` is reported as `inserted: false` rather than an error.
//! Order-book levels are upserted per `(token_id, side, price)`;
//! zero-size levels are deleted instead of stored, per the wire
//! protocol's deletion-marker convention.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteQueryResult};
use sqlx::SqlitePool;
use tracing::info;

use crate::domain::{OrderbookSnapshot, Trade};
use crate::ports::persistence::{MarketInfo, MarketQuery, Persistence, SaveTradeOutcome, TokenInfo};

use super::schema::SCHEMA_SQL;

/// Default page size for `list_active_markets` when the caller passes a
/// non-positive `limit`.
const DEFAULT_MARKET_LIMIT: i64 = 100;

pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Open (creating if absent) the SQLite database at `db_path` and
    /// apply the embedded schema. Idempotent — safe to call on every
    /// startup.
    pub async fn connect(db_path: &str) -> anyhow::Result<Self> {
        let url = format!("sqlite://{db_path}?mode=rwc");
        let pool = SqlitePoolOptions::new().max_connections(5).connect(&url).await?;

        for statement in SCHEMA_SQL.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&pool).await?;
        }

        info!(db_path, "sqlite persistence ready");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> anyhow::Result<Self> {
        Self::connect(":memory:").await
    }
}

fn inserted(result: SqliteQueryResult) -> bool {
    result.rows_affected() > 0
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn save_trade(&self, trade: &Trade) -> anyhow::Result<SaveTradeOutcome> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO trades (trade_id, token_id, price, amount, taker_side, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&trade.trade_id)
        .bind(&trade.token_id)
        .bind(trade.price.to_string())
        .bind(trade.amount.to_string())
        .bind(trade.taker_side.to_string())
        .bind(trade.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(SaveTradeOutcome { inserted: inserted(result) })
    }

    async fn upsert_orderbook(&self, snapshot: &OrderbookSnapshot) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        for (side, levels) in [("bid", &snapshot.bids), ("ask", &snapshot.asks)] {
            for level in levels {
                if level.is_deletion() {
                    sqlx::query(
                        "DELETE FROM orderbook_levels WHERE token_id = ?1 AND side = ?2 AND price = ?3",
                    )
                    .bind(&snapshot.token_id)
                    .bind(side)
                    .bind(level.price.to_string())
                    .execute(&mut *tx)
                    .await?;
                } else {
                    sqlx::query(
                        "INSERT INTO orderbook_levels (token_id, side, price, size, sequence, received_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                         ON CONFLICT(token_id, side, price) \
                         DO UPDATE SET size = excluded.size, sequence = excluded.sequence, received_at = excluded.received_at",
                    )
                    .bind(&snapshot.token_id)
                    .bind(side)
                    .bind(level.price.to_string())
                    .bind(level.size.to_string())
                    .bind(snapshot.sequence)
                    .bind(snapshot.received_at.to_rfc3339())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_token_ids_by_market(&self, market_id: &str) -> anyhow::Result<Vec<TokenInfo>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT token_id, outcome FROM tokens WHERE market_id = ?1")
                .bind(market_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(token_id, outcome)| TokenInfo { token_id, outcome })
            .collect())
    }

    async fn list_active_markets(&self, query: MarketQuery) -> anyhow::Result<Vec<MarketInfo>> {
        let limit = if query.limit > 0 { query.limit } else { DEFAULT_MARKET_LIMIT };

        let markets: Vec<(String, String, String, Option<String>)> = match &query.category {
            Some(category) => {
                sqlx::query_as(
                    "SELECT id, slug, question, category FROM markets \
                     WHERE active = 1 AND category = ?1 ORDER BY updated_at DESC LIMIT ?2",
                )
                .bind(category)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, slug, question, category FROM markets \
                     WHERE active = 1 ORDER BY updated_at DESC LIMIT ?1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut out = Vec::with_capacity(markets.len());
        for (id, slug, question, category) in markets {
            let tokens = self.get_token_ids_by_market(&id).await?;
            out.push(MarketInfo { id, slug, question, category, tokens });
        }
        Ok(out)
    }

    async fn upsert_market(&self, market: &MarketInfo) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let existed: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM markets WHERE id = ?1")
            .bind(&market.id)
            .fetch_optional(&mut *tx)
            .await?;
        let created = existed.is_none();

        sqlx::query(
            "INSERT INTO markets (id, slug, question, category, active, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
             ON CONFLICT(id) DO UPDATE SET \
                slug = excluded.slug, question = excluded.question, category = excluded.category, \
                active = 1, updated_at = excluded.updated_at",
        )
        .bind(&market.id)
        .bind(&market.slug)
        .bind(&market.question)
        .bind(&market.category)
        .execute(&mut *tx)
        .await?;

        for token in &market.tokens {
            sqlx::query(
                "INSERT INTO tokens (token_id, market_id, outcome) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(token_id) DO UPDATE SET market_id = excluded.market_id, outcome = excluded.outcome",
            )
            .bind(&token.token_id)
            .bind(&market.id)
            .bind(&token.outcome)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn deactivate_markets_not_in(&self, active_ids: &[String]) -> anyhow::Result<u64> {
        if active_ids.is_empty() {
            let result = sqlx::query("UPDATE markets SET active = 0 WHERE active = 1")
                .execute(&self.pool)
                .await?;
            return Ok(result.rows_affected());
        }

        let placeholders = active_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!("UPDATE markets SET active = 0 WHERE active = 1 AND id NOT IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in active_ids {
            query = query.bind(id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::domain::{OrderbookLevel, TakerSide};

    fn trade(trade_id: &str) -> Trade {
        Trade {
            trade_id: trade_id.to_string(),
            token_id: "T1".to_string(),
            price: dec!(0.5),
            amount: dec!(10),
            taker_side: TakerSide::Buy,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_trade_is_idempotent_on_trade_id() {
        let store = SqlitePersistence::connect_in_memory().await.unwrap();
        let t = trade("dup-1");

        assert!(store.save_trade(&t).await.unwrap().inserted);
        assert!(!store.save_trade(&t).await.unwrap().inserted);
    }

    #[tokio::test]
    async fn zero_size_level_removes_existing_row() {
        let store = SqlitePersistence::connect_in_memory().await.unwrap();

        let snapshot = OrderbookSnapshot {
            token_id: "T1".into(),
            bids: vec![],
            asks: vec![OrderbookLevel { price: dec!(0.55), size: dec!(8) }],
            sequence: Some(1),
            received_at: Utc::now(),
        };
        store.upsert_orderbook(&snapshot).await.unwrap();

        let deletion = OrderbookSnapshot {
            token_id: "T1".into(),
            bids: vec![],
            asks: vec![OrderbookLevel { price: dec!(0.55), size: dec!(0) }],
            sequence: Some(2),
            received_at: Utc::now(),
        };
        store.upsert_orderbook(&deletion).await.unwrap();

        let remaining: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM orderbook_levels WHERE token_id = 'T1' AND side = 'ask' AND price = '0.55'",
        )
        .fetch_one(&store.pool)
        .await
        .unwrap();
        assert_eq!(remaining.0, 0);
    }
}
