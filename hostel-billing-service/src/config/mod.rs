use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub generation: GenerationConfig,
    pub smtp: SmtpConfig,
    pub notifications: NotificationQueueConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Shared Redis cache. The in-process cache is used when unset.
    pub redis_url: Option<String>,
    pub rule_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub chunk_size: i64,
    /// Days after generation that a billing record falls due.
    pub due_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// Email is logged instead of sent when unset.
    pub host: Option<String>,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationQueueConfig {
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(BillingConfig {
            common,
            service_name: get_env("SERVICE_NAME", Some("hostel-billing-service"))?,
            log_level: get_env("LOG_LEVEL", Some("info"))?,
            otlp_endpoint: get_optional("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            cache: CacheConfig {
                redis_url: get_optional("REDIS_URL"),
                rule_ttl_secs: parse_env("RULE_CACHE_TTL_SECS", 3600)?,
            },
            generation: GenerationConfig {
                chunk_size: parse_env("GENERATION_CHUNK_SIZE", 100)?,
                due_days: parse_env("BILLING_DUE_DAYS", 7)?,
            },
            smtp: SmtpConfig {
                host: get_optional("SMTP_HOST"),
                port: parse_env("SMTP_PORT", 587)?,
                username: get_env("SMTP_USERNAME", Some(""))?,
                password: get_env("SMTP_PASSWORD", Some(""))?,
                from: get_env("SMTP_FROM", Some("Hostel Billing <billing@hostel.local>"))?,
            },
            notifications: NotificationQueueConfig {
                queue_capacity: parse_env("NOTIFICATION_QUEUE_CAPACITY", 1024)?,
            },
            scheduler: SchedulerConfig {
                enabled: parse_env("SCHEDULER_ENABLED", false)?,
                interval_secs: parse_env("SCHEDULER_INTERVAL_SECS", 3600)?,
            },
        }
        .validated()?)
    }

    fn validated(self) -> Result<Self, AppError> {
        if self.generation.chunk_size <= 0 {
            return Err(config_error("GENERATION_CHUNK_SIZE must be positive"));
        }
        if self.generation.due_days < 0 {
            return Err(config_error("BILLING_DUE_DAYS must not be negative"));
        }
        if self.notifications.queue_capacity == 0 {
            return Err(config_error("NOTIFICATION_QUEUE_CAPACITY must be positive"));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(config_error("SCHEDULER_INTERVAL_SECS must be positive"));
        }
        Ok(self)
    }
}

fn config_error(message: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!("{}", message))
}

fn get_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            Some(def) => Ok(def.to_string()),
            None => Err(AppError::ConfigError(anyhow::anyhow!(
                "{} is required but not set",
                key
            ))),
        },
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_optional(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e))
        }),
        None => Ok(default),
    }
}
