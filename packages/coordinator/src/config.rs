//! Process settings read from the environment.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use db::{KeyPrefixes, RetryPolicy, StoreConfig};
use queue_core::{MessageTemplate, QueueConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read message template {path}: {source}")]
    Template {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Everything the coordinator binary needs to start.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    /// Topic namespace; inbound topics look like `{namespace}/job_queue/{action}`.
    pub namespace: String,
    /// Optional outbound message template.
    pub template_path: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Missing keys use defaults;
    /// unparseable values are logged and also use defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let queue_defaults = QueueConfig::default();
        let queue = QueueConfig::default()
            .with_tick_interval_ms(parse_nonzero_or(
                &lookup,
                "JOBQ_TICK_INTERVAL_MS",
                queue_defaults.tick_interval_ms,
            ))
            .with_idle_expiry_multiplier(parse_nonzero_or(
                &lookup,
                "JOBQ_IDLE_EXPIRY_MULTIPLIER",
                queue_defaults.idle_expiry_multiplier,
            ))
            .with_max_lease_multiplier(parse_nonzero_or(
                &lookup,
                "JOBQ_MAX_LEASE_MULTIPLIER",
                queue_defaults.max_lease_multiplier,
            ))
            .with_max_retries(max_retries(&lookup, queue_defaults.max_retries));

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy::default()
            .with_op_timeout(Duration::from_millis(parse_or(
                &lookup,
                "JOBQ_STORE_TIMEOUT_MS",
                retry_defaults.op_timeout.as_millis() as u64,
            )))
            .with_max_attempts(
                parse_or(
                    &lookup,
                    "JOBQ_STORE_MAX_ATTEMPTS",
                    retry_defaults.max_attempts,
                )
                .max(1),
            )
            .with_initial_backoff(Duration::from_millis(parse_or(
                &lookup,
                "JOBQ_STORE_BACKOFF_MS",
                retry_defaults.initial_backoff.as_millis() as u64,
            )))
            .with_max_backoff(Duration::from_millis(parse_or(
                &lookup,
                "JOBQ_STORE_MAX_BACKOFF_MS",
                retry_defaults.max_backoff.as_millis() as u64,
            )));

        let url = lookup("REDIS_URL").unwrap_or_else(|| StoreConfig::default().url);
        let store = StoreConfig::new(url)
            .with_prefixes(key_prefixes(&lookup))
            .with_retry(retry);

        Self {
            store,
            queue,
            namespace: lookup("NAMESPACE_LISTENER").unwrap_or_default(),
            template_path: lookup("JOBQ_MESSAGE_TEMPLATE")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Read the outbound template, if one is configured.
    pub fn load_template(&self) -> Result<Option<MessageTemplate>, ConfigError> {
        let Some(path) = &self.template_path else {
            return Ok(None);
        };

        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Template {
            path: path.clone(),
            source,
        })?;
        tracing::info!("Loaded message template: {}", path.display());
        Ok(Some(MessageTemplate::from_lines(&source)))
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Invalid {}={:?} ({}), using default {}", key, raw, e, default);
            default
        }
    }
}

/// Like [`parse_or`], but zero is rejected too.
fn parse_nonzero_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Display + Default + PartialEq + Copy,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default);
    if value != T::default() {
        return value;
    }
    tracing::warn!("Invalid {}={} (must be greater than zero), using default {}", key, value, default);
    default
}

fn max_retries<F>(lookup: &F, default: Option<u32>) -> Option<u32>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup("JOBQ_MAX_RETRIES") else {
        return default;
    };
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("unlimited") {
        return None;
    }
    match raw.parse() {
        Ok(limit) => Some(limit),
        Err(e) => {
            tracing::warn!("Invalid JOBQ_MAX_RETRIES={:?} ({}), using default {:?}", raw, e, default);
            default
        }
    }
}

fn key_prefixes<F>(lookup: &F) -> KeyPrefixes
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = KeyPrefixes::default();
    let key = |name: &str, default: String| {
        lookup(&format!("JOBQ_KEY_PREFIX_{name}"))
            .filter(|value| !value.is_empty())
            .unwrap_or(default)
    };

    KeyPrefixes {
        queued: key("QUEUED", defaults.queued),
        leased: key("LEASED", defaults.leased),
        processing: key("PROCESSING", defaults.processing),
        progress: key("PROGRESS", defaults.progress),
        idle: key("IDLE", defaults.idle),
        record: key("RECORD", defaults.record),
        registry: key("REGISTRY", defaults.registry),
    }
}
