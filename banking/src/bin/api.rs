//! Banking API server.
//!
//! This binary:
//! - Serves the HTTP API and the `/ws` topic WebSocket
//! - Publishes account and transaction commands to the broker
//! - Consumes the outcome topics and wakes the waiting HTTP requests
//! - Reads accounts and transaction history from `PostgreSQL`
//!
//! # Usage
//!
//! ```bash
//! docker compose up -d
//! cargo run --bin banking-api
//! ```

use banking::api::{AppState, build_router};
use banking::bridge::{CommandPublisher, CorrelationTable, IdempotencyGuard, NotificationRouter};
use banking::ledger::{LedgerStore, PostgresLedgerStore};
use banking::runtime::{EventConsumer, drain, shutdown_signal};
use banking::services::{
    AccountOutcomes, AccountService, RequestBridge, TransactionOutcomes, TransactionService,
};
use banking::{Config, metrics};
use ledger_bridge_core::environment::{Clock, SystemClock};
use ledger_bridge_core::event_bus::EventBus;
use ledger_bridge_redpanda::RedpandaEventBus;
use ledger_bridge_web::TopicBroadcaster;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,banking=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting banking API");

    let config = Config::from_env();
    info!(
        redpanda = %config.redpanda.brokers,
        outcome_group = %config.redpanda.outcome_group,
        timeout_secs = config.bridge.request_timeout,
        "Configuration loaded"
    );

    metrics::install_exporter(config.metrics_address().parse()?)?;
    metrics::register_metrics();

    let store = PostgresLedgerStore::connect(
        &config.postgres.url,
        config.postgres.max_connections,
        Duration::from_secs(config.postgres.connect_timeout),
    )
    .await?;
    info!("Connected to PostgreSQL");

    let event_bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.outcome_group)
            .build()?,
    );
    info!("Connected to Redpanda");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let table = CorrelationTable::new();
    let guard = Arc::new(IdempotencyGuard::new(Arc::clone(&clock), config.guard_ttl()));
    let broadcaster = TopicBroadcaster::new();
    let publisher = Arc::new(CommandPublisher::new(
        Arc::clone(&event_bus),
        table.clone(),
        Arc::clone(&clock),
    ));
    let bridge = RequestBridge::new(
        publisher,
        Arc::clone(&guard),
        Arc::new(store) as Arc<dyn LedgerStore>,
        config.request_timeout(),
    );
    let routing = &config.redpanda.routing;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();

    let account_router = NotificationRouter::new(
        AccountOutcomes,
        table.clone(),
        Arc::clone(&guard),
        broadcaster.clone(),
    );
    let consumer = EventConsumer::builder()
        .name("account-outcomes")
        .topics(routing.account_outcome_topics())
        .event_bus(Arc::clone(&event_bus))
        .handler(Arc::new(account_router))
        .shutdown(shutdown_tx.subscribe())
        .build()?;
    tasks.push((consumer.name().to_string(), consumer.spawn()));

    let transaction_router = NotificationRouter::new(
        TransactionOutcomes,
        table.clone(),
        Arc::clone(&guard),
        broadcaster.clone(),
    );
    let consumer = EventConsumer::builder()
        .name("transaction-outcomes")
        .topics(routing.transaction_outcome_topics())
        .event_bus(Arc::clone(&event_bus))
        .handler(Arc::new(transaction_router))
        .shutdown(shutdown_tx.subscribe())
        .build()?;
    tasks.push((consumer.name().to_string(), consumer.spawn()));

    tasks.push((
        "guard-purge".to_string(),
        spawn_guard_purge(
            Arc::clone(&guard),
            config.guard_purge_interval(),
            shutdown_tx.subscribe(),
        ),
    ));

    let state = AppState::new(
        AccountService::new(bridge.clone(), routing),
        TransactionService::new(bridge, routing),
        broadcaster,
    );
    let app = build_router(state).layer(CorsLayer::permissive());

    let addr = config.server_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, shutting down consumers");
    let _ = shutdown_tx.send(());
    drain(tasks, config.shutdown_timeout()).await;

    info!("Banking API stopped");
    Ok(())
}

/// Periodically drop idempotency keys older than the guard TTL.
fn spawn_guard_purge(
    guard: Arc<IdempotencyGuard>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let purged = guard.purge_expired();
                    debug!(purged, remaining = guard.len(), "Idempotency guard purged");
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}
