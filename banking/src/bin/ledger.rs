//! Banking ledger worker.
//!
//! This binary:
//! - Applies pending `PostgreSQL` migrations
//! - Consumes account and transaction commands from the broker
//! - Applies each command to the ledger once per idempotency key
//! - Publishes the success or failure outcome for the API to pick up
//!
//! # Usage
//!
//! ```bash
//! docker compose up -d
//! cargo run --bin banking-ledger
//! ```

use banking::ledger::{LedgerEngine, PostgresLedgerStore};
use banking::runtime::{EventConsumer, drain, shutdown_signal};
use banking::services::CommandProcessor;
use banking::{Config, metrics};
use ledger_bridge_core::environment::{Clock, SystemClock};
use ledger_bridge_core::event_bus::EventBus;
use ledger_bridge_redpanda::RedpandaEventBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;
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

    info!("Starting banking ledger");

    let config = Config::from_env();
    info!(
        redpanda = %config.redpanda.brokers,
        consumer_group = %config.redpanda.consumer_group,
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
    store.migrate().await?;
    info!("Connected to PostgreSQL, migrations applied");

    let event_bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .build()?,
    );
    info!("Connected to Redpanda");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(LedgerEngine::new(Arc::new(store), Arc::clone(&clock)));
    let processor = CommandProcessor::new(
        engine,
        Arc::clone(&event_bus),
        config.redpanda.routing.clone(),
        clock,
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let consumer = EventConsumer::builder()
        .name("ledger-commands")
        .topics(config.redpanda.routing.command_topics())
        .event_bus(event_bus)
        .handler(Arc::new(processor))
        .shutdown(shutdown_tx.subscribe())
        .build()?;
    let tasks = vec![(consumer.name().to_string(), consumer.spawn())];

    info!("Banking ledger running, press Ctrl+C to stop");
    shutdown_signal().await;

    let _ = shutdown_tx.send(());
    drain(tasks, config.shutdown_timeout()).await;

    info!("Banking ledger stopped");
    Ok(())
}
