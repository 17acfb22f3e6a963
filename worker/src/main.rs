//! Webhook delivery worker.
//!
//! Consumes payment events from Kafka/Redpanda, records a delivery per event
//! in `PostgreSQL`, and delivers pending records to the configured webhooks.
//!
//! # Configuration
//!
//! Environment variables (or a `.env` file), see [`config::Config`]. At least
//! `KAFKA_BROKERS` and `TOPIC_PIX` must be set.
//!
//! # Shutdown
//!
//! Ctrl+C or SIGTERM stops both loops after their current unit of work.

mod config;
mod shutdown;

use anyhow::Context;
use config::{Config, LogFormat};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use webhook_worker_core::environment::SystemClock;
use webhook_worker_http::ReqwestSender;
use webhook_worker_postgres::PostgresDeliveryStore;
use webhook_worker_runtime::{DispatchLoop, EventIngestor, WorkerOrchestrator, retry_startup};

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "webhook_worker=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;
    init_tracing(config.log_format);

    info!(
        pod_name = %config.pod.name,
        api_version = %config.pod.api_version,
        env = %config.pod.env,
        pid = std::process::id(),
        database = %config.database.display_target(),
        brokers = %config.kafka.brokers,
        topics = ?config.kafka.topics,
        group_id = %config.kafka.group_id,
        "Starting webhook worker"
    );

    let options = config.database.connect_options()?;
    let max_connections = config.database.max_connections;
    let store = retry_startup("database", &config.startup, || {
        PostgresDeliveryStore::connect(options.clone(), max_connections)
    })
    .await?;
    if config.database.run_migrations {
        store.migrate().await.context("Failed to apply migrations")?;
    }
    info!("Database ready");

    let source = retry_startup("message bus", &config.startup, || {
        config.kafka.source_builder().connect()
    })
    .await?;
    info!("Message bus ready");

    let sender = ReqwestSender::new().context("Failed to build HTTP client")?;

    let store = Arc::new(store);
    let clock = Arc::new(SystemClock);
    let ingestor = EventIngestor::new(Box::new(source), store.clone(), store.clone(), clock.clone());
    let dispatcher =
        DispatchLoop::new(store, Arc::new(sender), clock).with_settings(config.dispatch);

    WorkerOrchestrator::new(ingestor, dispatcher)
        .run_until(shutdown::wait_for_signal())
        .await
        .context("Worker stopped abnormally")?;

    info!("Webhook worker stopped");
    Ok(())
}
