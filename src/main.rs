//! Polymarket market-data relay — entry point.
//!
//! Composition root: owns the single `EventBus` and `Sequencer` instance
//! for this process and wires every component explicitly — no hidden
//! globals. Shutdown on `SIGINT`/`SIGTERM` proceeds in reverse dependency
//! order: scanner, web, upstream, relay, REST, persistence.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info};

use polymarket_relay::adapters::metrics::{HealthServer, HealthState};
use polymarket_relay::adapters::persistence::SqlitePersistence;
use polymarket_relay::adapters::relay::RelayServer;
use polymarket_relay::adapters::rest::GammaApiClient;
use polymarket_relay::adapters::scanner::PeriodicScanner;
use polymarket_relay::adapters::upstream::UpstreamSession;
use polymarket_relay::adapters::url_resolver::SlugUrlResolver;
use polymarket_relay::config;
use polymarket_relay::core::sequencer::SequencerPolicy;
use polymarket_relay::core::{EventBus, MessageRouter, Sequencer};
use polymarket_relay::ports::{MarketDataApi, MarketScanner, Persistence, UrlResolver};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::loader::load_config("config.toml").context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(config.log_level.clone())
        .with_target(true)
        .with_thread_ids(true)
        .with_current_span(true)
        .init();

    info!(version = VERSION, pid = std::process::id(), "starting polymarket relay");

    let persistence: Arc<dyn Persistence> =
        Arc::new(SqlitePersistence::connect(&config.db_path).await.context("failed to open persistence store")?);

    let event_bus = Arc::new(EventBus::new());
    let sequencer = Arc::new(Sequencer::new(SequencerPolicy { accept_gaps: config.sequencer_accept_gaps }));

    let router = Arc::new(MessageRouter::new(sequencer.clone(), persistence.clone(), event_bus.clone()));

    let upstream = Arc::new(UpstreamSession::new(
        config.ws_url.clone(),
        Duration::from_secs(config.ws_heartbeat_sec),
        Duration::from_secs(config.ws_reconnect_sec),
        router,
        sequencer.clone(),
    ));

    let rest_client: Arc<dyn MarketDataApi> =
        Arc::new(GammaApiClient::new(config.api_url.clone(), config.http_timeout, config.http_rps)?);
    let url_resolver = SlugUrlResolver::new(rest_client.clone());
    let scanner = Arc::new(PeriodicScanner::new(rest_client, persistence.clone()));

    if let Some(target) = config.subscribe_url.as_deref() {
        match url_resolver.resolve(target).await {
            Ok(resolved) => {
                info!(slug = %resolved.slug, target, "resolved startup market url");
                for token in [resolved.yes_token, resolved.no_token].into_iter().flatten() {
                    upstream.subscribe(&token);
                }
            }
            Err(err) => {
                error!(error = %err, target, "failed to resolve startup market url, continuing without it");
            }
        }
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let upstream_task = {
        let upstream = upstream.clone();
        tokio::spawn(async move {
            upstream.run().await;
        })
    };

    let scanner_handle = scanner
        .start_periodic_scan(config.scan_interval_sec, config.category.clone())
        .await
        .context("initial market scan failed")?;

    let relay_handle = if config.forward_enabled {
        let relay = RelayServer::new(
            config.forward_host.clone(),
            config.forward_port,
            event_bus.clone(),
            upstream.clone(),
            persistence.clone(),
        );
        let shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(err) = relay.run(shutdown_rx).await {
                error!(error = %err, "relay server exited");
            }
        }))
    } else {
        info!("relay server disabled (forward_enabled=false)");
        None
    };

    let web_handle = if config.web_enabled {
        let health_state = Arc::new(HealthState::new(upstream.clone(), sequencer.clone()));
        let health_server = HealthServer::new(health_state, config.web_host.clone(), config.web_port);
        let shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(err) = health_server.run(shutdown_rx).await {
                error!(error = %err, "health server exited");
            }
        }))
    } else {
        info!("health endpoint disabled (web_enabled=false)");
        None
    };

    info!(
        forward_enabled = config.forward_enabled,
        web_enabled = config.web_enabled,
        "relay is running, waiting for shutdown signal"
    );

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping components in reverse dependency order");

    scanner_handle.abort();
    if let Some(handle) = web_handle {
        let _ = shutdown_tx.send(());
        let _ = handle.await;
    }
    upstream.stop();
    upstream_task.abort();
    if let Some(handle) = relay_handle {
        let _ = shutdown_tx.send(());
        let _ = handle.await;
    }

    info!(version = VERSION, "polymarket relay shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
