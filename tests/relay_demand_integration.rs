//! Exercises the relay server's downstream-demand-drives-upstream
//! behavior (spec scenario: a second identical client subscribe does
//! not trigger a second upstream frame) over a real WebSocket
//! connection, without requiring a live upstream venue connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use polymarket_relay::adapters::relay::RelayServer;
use polymarket_relay::adapters::upstream::UpstreamSession;
use polymarket_relay::core::{EventBus, MessageRouter, Sequencer};
use polymarket_relay::domain::{OrderbookSnapshot, Trade};
use polymarket_relay::ports::persistence::{MarketInfo, MarketQuery, SaveTradeOutcome, TokenInfo};
use polymarket_relay::ports::Persistence;

struct NoopPersistence;

#[async_trait]
impl Persistence for NoopPersistence {
    async fn save_trade(&self, _trade: &Trade) -> anyhow::Result<SaveTradeOutcome> {
        Ok(SaveTradeOutcome { inserted: true })
    }
    async fn upsert_orderbook(&self, _snapshot: &OrderbookSnapshot) -> anyhow::Result<()> {
        Ok(())
    }
    async fn get_token_ids_by_market(&self, _market_id: &str) -> anyhow::Result<Vec<TokenInfo>> {
        Ok(vec![])
    }
    async fn list_active_markets(&self, _query: MarketQuery) -> anyhow::Result<Vec<MarketInfo>> {
        Ok(vec![])
    }
    async fn upsert_market(&self, _market: &MarketInfo) -> anyhow::Result<bool> {
        Ok(true)
    }
    async fn deactivate_markets_not_in(&self, _active_ids: &[String]) -> anyhow::Result<u64> {
        Ok(0)
    }
}

const TEST_PORT: u16 = 18_765;

#[tokio::test]
async fn second_subscriber_for_the_same_token_does_not_add_upstream_demand() {
    let persistence = Arc::new(NoopPersistence);
    let event_bus = Arc::new(EventBus::new());
    let sequencer = Arc::new(Sequencer::new(Default::default()));
    let router = Arc::new(MessageRouter::new(sequencer.clone(), persistence.clone(), event_bus.clone()));
    let upstream = Arc::new(UpstreamSession::new(
        "wss://example.invalid/ws",
        Duration::from_secs(15),
        Duration::from_secs(5),
        router,
        sequencer,
    ));

    let relay = RelayServer::new("127.0.0.1", TEST_PORT, event_bus, upstream.clone(), persistence);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown_rx = shutdown_tx.subscribe();
    let relay_for_run = relay.clone();
    let server_handle = tokio::spawn(async move {
        relay_for_run.run(shutdown_rx).await.ok();
    });

    // Give the listener a moment to bind before clients connect.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let addr = format!("127.0.0.1:{TEST_PORT}");
    let (mut client_a, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
    let (mut client_b, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();

    client_a
        .send(Message::Text(r#"{"action":"subscribe","token_id":"T1"}"#.to_string().into()))
        .await
        .unwrap();
    let _ = client_a.next().await;

    client_b
        .send(Message::Text(r#"{"action":"subscribe","token_id":"T1"}"#.to_string().into()))
        .await
        .unwrap();
    let _ = client_b.next().await;

    assert_eq!(upstream.subscription_count(), 1, "one downstream token maps to one upstream subscription");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;
}
