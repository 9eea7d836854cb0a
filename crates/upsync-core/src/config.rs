//! Configuration module
//!
//! Environment-driven configuration for the intake service and the
//! reconciliation worker. Every knob has a default except the handful of
//! values that cannot be guessed (database, queue, bucket).

use std::env;

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const CREDENTIAL_TTL_SECS: u64 = 15 * 60;
const CONSUMER_MAX_WORKERS: usize = 4;
const CONSUMER_POLL_WAIT_SECS: u64 = 20;
const CONSUMER_MAX_MESSAGES: i32 = 10;
const SWEEP_INTERVAL_SECS: u64 = 60;
const DEDUP_WINDOW_SIZE: usize = 1024;
const DISPATCH_TIMEOUT_SECS: u64 = 30;

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    // Record store
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    // Queue transport
    pub queue_url: String,
    /// Optional explicit dead-letter queue for unparseable messages. When
    /// unset, malformed messages are logged and dropped; queue-level redrive
    /// is still recommended.
    pub dead_letter_queue_url: Option<String>,
    pub aws_region: Option<String>,
    pub consumer_max_workers: usize,
    pub consumer_poll_wait_secs: u64,
    pub consumer_max_messages: i32,
    // Object store / credential issuer
    pub s3_bucket: String,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers
    /// Only events whose key starts with this prefix belong to this system.
    pub key_prefix: String,
    pub credential_ttl_secs: u64,
    // Reconciler
    pub dedup_window_size: usize,
    pub sweep_interval_secs: u64,
    // Dispatcher
    pub scan_target_url: Option<String>,
    pub audit_target_url: Option<String>,
    pub quota_target_url: Option<String>,
    pub dispatch_timeout_secs: u64,
    pub dispatch_signing_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let config = Config {
            environment,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            queue_url: env::var("QUEUE_URL")
                .map_err(|_| anyhow::anyhow!("QUEUE_URL must be set"))?,
            dead_letter_queue_url: env::var("DEAD_LETTER_QUEUE_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            aws_region: env::var("AWS_REGION").ok(),
            consumer_max_workers: env::var("CONSUMER_MAX_WORKERS")
                .unwrap_or_else(|_| CONSUMER_MAX_WORKERS.to_string())
                .parse()
                .unwrap_or(CONSUMER_MAX_WORKERS),
            consumer_poll_wait_secs: env::var("CONSUMER_POLL_WAIT_SECS")
                .unwrap_or_else(|_| CONSUMER_POLL_WAIT_SECS.to_string())
                .parse()
                .unwrap_or(CONSUMER_POLL_WAIT_SECS),
            consumer_max_messages: env::var("CONSUMER_MAX_MESSAGES")
                .unwrap_or_else(|_| CONSUMER_MAX_MESSAGES.to_string())
                .parse()
                .unwrap_or(CONSUMER_MAX_MESSAGES),
            s3_bucket: env::var("S3_BUCKET")
                .map_err(|_| anyhow::anyhow!("S3_BUCKET must be set"))?,
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            key_prefix: env::var("KEY_PREFIX").unwrap_or_else(|_| "uploads/".to_string()),
            credential_ttl_secs: env::var("CREDENTIAL_TTL_SECS")
                .unwrap_or_else(|_| CREDENTIAL_TTL_SECS.to_string())
                .parse()
                .unwrap_or(CREDENTIAL_TTL_SECS),
            dedup_window_size: env::var("DEDUP_WINDOW_SIZE")
                .unwrap_or_else(|_| DEDUP_WINDOW_SIZE.to_string())
                .parse()
                .unwrap_or(DEDUP_WINDOW_SIZE),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| SWEEP_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(SWEEP_INTERVAL_SECS),
            scan_target_url: env::var("SCAN_TARGET_URL").ok().filter(|s| !s.is_empty()),
            audit_target_url: env::var("AUDIT_TARGET_URL").ok().filter(|s| !s.is_empty()),
            quota_target_url: env::var("QUOTA_TARGET_URL").ok().filter(|s| !s.is_empty()),
            dispatch_timeout_secs: env::var("DISPATCH_TIMEOUT_SECS")
                .unwrap_or_else(|_| DISPATCH_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(DISPATCH_TIMEOUT_SECS),
            dispatch_signing_secret: env::var("DISPATCH_SIGNING_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgresql://")
            && !self.database_url.starts_with("postgres://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        // SQS caps long-poll wait at 20 seconds.
        if self.consumer_poll_wait_secs > 20 {
            return Err(anyhow::anyhow!(
                "CONSUMER_POLL_WAIT_SECS must be at most 20"
            ));
        }

        if !(1..=10).contains(&self.consumer_max_messages) {
            return Err(anyhow::anyhow!(
                "CONSUMER_MAX_MESSAGES must be between 1 and 10"
            ));
        }

        if self.consumer_max_workers == 0 {
            return Err(anyhow::anyhow!("CONSUMER_MAX_WORKERS must be at least 1"));
        }

        if self.dedup_window_size == 0 {
            return Err(anyhow::anyhow!("DEDUP_WINDOW_SIZE must be at least 1"));
        }

        if self.credential_ttl_secs == 0 {
            return Err(anyhow::anyhow!("CREDENTIAL_TTL_SECS must be at least 1"));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}
