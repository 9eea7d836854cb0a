use anyhow::Context;
use aws_config::{BehaviorVersion, Region};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use upsync_core::models::DispatchAction;
use upsync_core::Config;
use upsync_db::{PgRecordStore, RecordStore};
use upsync_dispatch::{Dispatcher, WebhookDispatcher, WebhookDispatcherConfig};
use upsync_worker::{ConsumerConfig, EventConsumer, Reconciler, Sweeper};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    upsync_db::MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let store: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pool));
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(build_dispatcher(&config)?);

    let dedup_window_size = NonZeroUsize::new(config.dedup_window_size)
        .context("DEDUP_WINDOW_SIZE must be at least 1")?;
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        dispatcher,
        dedup_window_size,
    ));

    let mut aws_loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(ref region) = config.aws_region {
        aws_loader = aws_loader.region(Region::new(region.clone()));
    }
    let sqs_client = aws_sdk_sqs::Client::new(&aws_loader.load().await);

    let consumer = EventConsumer::new(
        sqs_client,
        ConsumerConfig {
            queue_url: config.queue_url.clone(),
            dead_letter_queue_url: config.dead_letter_queue_url.clone(),
            key_prefix: config.key_prefix.clone(),
            max_workers: config.consumer_max_workers,
            poll_wait_secs: config.consumer_poll_wait_secs as i32,
            max_messages: config.consumer_max_messages,
        },
        reconciler.clone(),
    );
    let sweeper = Sweeper::new(
        store,
        reconciler,
        Duration::from_secs(config.sweep_interval_secs),
    );

    tracing::info!(environment = %config.environment, "Reconciliation worker running");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");
    consumer.shutdown().await;
    sweeper.shutdown().await;

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "upsync=debug".into());
    if config.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn build_dispatcher(config: &Config) -> Result<WebhookDispatcher, anyhow::Error> {
    let mut targets = HashMap::new();
    if let Some(ref url) = config.scan_target_url {
        targets.insert(DispatchAction::Scan, url.clone());
    }
    if let Some(ref url) = config.audit_target_url {
        targets.insert(DispatchAction::Audit, url.clone());
    }
    if let Some(ref url) = config.quota_target_url {
        targets.insert(DispatchAction::Quota, url.clone());
    }
    if targets.is_empty() {
        tracing::warn!("No dispatch targets configured, uploads will not be announced");
    }
    WebhookDispatcher::new(WebhookDispatcherConfig {
        targets,
        timeout_seconds: config.dispatch_timeout_secs,
        signing_secret: config.dispatch_signing_secret.clone(),
    })
}
