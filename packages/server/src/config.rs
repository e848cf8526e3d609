use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chassis::{ChassisConfig, Role};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Reported as `source_service` on every event this server emits.
    pub service_name: String,
    /// Role assumed when a request carries no `X-Actor-Role`.
    pub default_role: Role,
    pub idempotency_ttl: Duration,
    pub event_dedup_ttl: Duration,
    pub outbox_flush_batch_size: usize,
    pub outbox_flush_interval: Duration,
    pub outbox_retention: Duration,
    pub aggregation_timeout: Duration,
    pub aggregation_cache_ttl: Duration,
    pub consumer_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let chassis = ChassisConfig::default();
        Self {
            port: 8080,
            service_name: "fleet-server".to_string(),
            default_role: Role::Creator,
            idempotency_ttl: chassis.idempotency_ttl,
            event_dedup_ttl: chassis.event_dedup_ttl,
            outbox_flush_batch_size: chassis.outbox_flush_batch_size,
            outbox_flush_interval: chassis.outbox_flush_interval,
            outbox_retention: chassis.outbox_retention,
            aggregation_timeout: chassis.aggregation_timeout,
            aggregation_cache_ttl: chassis.aggregation_cache_ttl,
            consumer_poll_interval: chassis.consumer_poll_interval,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = Self::default();
        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            default_role: env::var("DEFAULT_ROLE")
                .unwrap_or_else(|_| "creator".to_string())
                .parse()
                .context("DEFAULT_ROLE must be a known role")?,
            idempotency_ttl: secs("IDEMPOTENCY_TTL_SECS", defaults.idempotency_ttl)?,
            event_dedup_ttl: secs("EVENT_DEDUP_TTL_SECS", defaults.event_dedup_ttl)?,
            outbox_flush_batch_size: positive(
                "OUTBOX_FLUSH_BATCH_SIZE",
                defaults.outbox_flush_batch_size,
            )?,
            outbox_flush_interval: millis(
                "OUTBOX_FLUSH_INTERVAL_MS",
                defaults.outbox_flush_interval,
            )?,
            outbox_retention: secs("OUTBOX_RETENTION_SECS", defaults.outbox_retention)?,
            aggregation_timeout: millis("AGGREGATION_TIMEOUT_MS", defaults.aggregation_timeout)?,
            aggregation_cache_ttl: secs(
                "AGGREGATION_CACHE_TTL_SECS",
                defaults.aggregation_cache_ttl,
            )?,
            consumer_poll_interval: millis(
                "CONSUMER_POLL_INTERVAL_MS",
                defaults.consumer_poll_interval,
            )?,
        })
    }

    /// Chassis options derived from this configuration.
    pub fn chassis(&self) -> ChassisConfig {
        ChassisConfig {
            idempotency_ttl: self.idempotency_ttl,
            event_dedup_ttl: self.event_dedup_ttl,
            outbox_flush_batch_size: self.outbox_flush_batch_size,
            outbox_flush_interval: self.outbox_flush_interval,
            outbox_retention: self.outbox_retention,
            aggregation_timeout: self.aggregation_timeout,
            aggregation_cache_ttl: self.aggregation_cache_ttl,
            consumer_poll_interval: self.consumer_poll_interval,
        }
    }
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        Err(_) => Ok(default),
    }
}

/// Like [`parsed`], but zero is rejected.
fn positive(key: &str, default: usize) -> Result<usize> {
    match parsed(key, default)? {
        0 => bail!("{key} must be greater than zero"),
        n => Ok(n),
    }
}

fn secs(key: &str, default: Duration) -> Result<Duration> {
    parsed(key, default.as_secs()).map(Duration::from_secs)
}

fn millis(key: &str, default: Duration) -> Result<Duration> {
    parsed(key, default.as_millis() as u64).map(Duration::from_millis)
}
