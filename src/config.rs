//! Settings snapshot for the tracking client.
//!
//! [`Settings::from_env`] reads every tunable declared in [`crate::env`] once,
//! validates it and hands components a plain struct. Components never read the
//! process environment on their own hot paths.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::env::{self, EnvValue, EnvVarError, EnvironmentVariable};

/// Largest worker pool accepted for asynchronous logging.
const MAX_WORKER_COUNT: i64 = 256;

/// Largest queue accepted for asynchronous logging.
const MAX_QUEUE_SIZE: i64 = 1_000_000;

/// Error type for configuration loading failures
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "Configuration error{}: {message}",
    .env_var.as_ref().map(|v| format!(" for {}", v)).unwrap_or_default()
)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: None,
        }
    }

    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl From<EnvVarError> for ConfigError {
    fn from(err: EnvVarError) -> Self {
        Self {
            message: err.to_string(),
            env_var: Some(err.name.to_string()),
        }
    }
}

/// HTTP transport tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    /// Retries after the first attempt, before clamping to `max_retries_limit`
    pub max_retries: u32,

    /// Backoff base in seconds
    pub backoff_factor: f64,

    /// Upper bound of the uniform jitter in seconds
    pub backoff_jitter: f64,

    pub request_timeout: Duration,

    pub respect_retry_after: bool,

    pub allow_redirects: bool,

    pub max_retries_limit: u32,

    pub max_backoff_factor_limit: f64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_factor: 2.0,
            backoff_jitter: 1.0,
            request_timeout: Duration::from_secs(120),
            respect_retry_after: true,
            allow_redirects: true,
            max_retries_limit: 10,
            max_backoff_factor_limit: 120.0,
        }
    }
}

/// Asynchronous logging tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncLoggingSettings {
    /// Route fluent logging calls through the queue by default
    pub enabled: bool,

    pub worker_count: usize,

    /// Batching window; `None` sends as soon as items are available
    pub buffering: Option<Duration>,

    pub queue_size: usize,

    /// Block producers on a full queue (up to `enqueue_timeout`) instead of failing fast
    pub block_on_full: bool,

    pub enqueue_timeout: Duration,

    pub shutdown_grace: Duration,
}

impl Default for AsyncLoggingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_count: 10,
            buffering: None,
            queue_size: 10_000,
            block_on_full: true,
            enqueue_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Process-wide settings, read once at startup.
///
/// All settings are sourced from environment variables; see [`crate::env`]
/// for names and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Tracking server base URL, trailing slash removed
    pub tracking_uri: Option<String>,

    pub http: HttpSettings,

    pub async_logging: AsyncLoggingSettings,

    pub truncate_long_values: bool,

    pub deployments_target: Option<String>,

    pub deployment_predict_timeout: Duration,

    pub auth_config_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tracking_uri: None,
            http: HttpSettings::default(),
            async_logging: AsyncLoggingSettings::default(),
            truncate_long_values: true,
            deployments_target: None,
            deployment_predict_timeout: Duration::from_secs(120),
            auth_config_path: None,
        }
    }
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the offending variable if a value cannot be
    /// converted to its declared type or falls outside its accepted range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let tracking_uri = env::QCFLOW_TRACKING_URI
            .get()?
            .map(|uri| uri.trim_end_matches('/').to_string())
            .filter(|uri| !uri.is_empty());

        let http = HttpSettings {
            max_retries: Self::non_negative_u32(&env::QCFLOW_HTTP_REQUEST_MAX_RETRIES)?,
            backoff_factor: Self::non_negative(&env::QCFLOW_HTTP_REQUEST_BACKOFF_FACTOR)? as f64,
            backoff_jitter: Self::parse_jitter()?,
            request_timeout: Duration::from_secs(Self::positive(
                &env::QCFLOW_HTTP_REQUEST_TIMEOUT,
            )?),
            respect_retry_after: Self::flag(&env::QCFLOW_HTTP_RESPECT_RETRY_AFTER_HEADER)?,
            allow_redirects: Self::flag(&env::QCFLOW_ALLOW_HTTP_REDIRECTS)?,
            max_retries_limit: Self::non_negative_u32(
                &env::QCFLOW_HTTP_REQUEST_MAX_RETRIES_LIMIT,
            )?,
            max_backoff_factor_limit: Self::non_negative(
                &env::QCFLOW_HTTP_REQUEST_MAX_BACKOFF_FACTOR_LIMIT,
            )? as f64,
        };

        let async_logging = AsyncLoggingSettings {
            enabled: Self::flag(&env::QCFLOW_ENABLE_ASYNC_LOGGING)?,
            worker_count: Self::bounded(
                &env::QCFLOW_ASYNC_LOGGING_THREADPOOL_SIZE,
                MAX_WORKER_COUNT,
            )? as usize,
            buffering: env::QCFLOW_ASYNC_LOGGING_BUFFERING_SECONDS
                .get()?
                .map(|secs| {
                    if secs < 0 {
                        Err(ConfigError::for_var(
                            env::QCFLOW_ASYNC_LOGGING_BUFFERING_SECONDS.name(),
                            format!("buffering window {} must not be negative", secs),
                        ))
                    } else {
                        Ok(Duration::from_secs(secs as u64))
                    }
                })
                .transpose()?,
            queue_size: Self::bounded(&env::QCFLOW_ASYNC_LOGGING_QUEUE_SIZE, MAX_QUEUE_SIZE)?
                as usize,
            block_on_full: Self::flag(&env::QCFLOW_ASYNC_LOGGING_BLOCK_ON_FULL)?,
            enqueue_timeout: Duration::from_secs(Self::non_negative(
                &env::QCFLOW_ASYNC_LOGGING_ENQUEUE_TIMEOUT_SECONDS,
            )?),
            shutdown_grace: Duration::from_secs(Self::non_negative(
                &env::QCFLOW_ASYNC_LOGGING_SHUTDOWN_GRACE_SECONDS,
            )?),
        };

        Ok(Self {
            tracking_uri,
            http,
            async_logging,
            truncate_long_values: Self::flag(&env::QCFLOW_TRUNCATE_LONG_VALUES)?,
            deployments_target: env::QCFLOW_DEPLOYMENTS_TARGET.get()?,
            deployment_predict_timeout: Duration::from_secs(Self::positive(
                &env::QCFLOW_DEPLOYMENT_PREDICT_TIMEOUT,
            )?),
            auth_config_path: env::QCFLOW_AUTH_CONFIG_PATH.get()?.map(PathBuf::from),
        })
    }

    /// Read a variable that declares a default, so `None` cannot occur.
    fn required<T: EnvValue>(var: &EnvironmentVariable<T>) -> Result<T, ConfigError> {
        var.get()?.ok_or_else(|| {
            ConfigError::for_var(var.name(), "variable is unset and has no default")
        })
    }

    fn flag(var: &EnvironmentVariable<bool>) -> Result<bool, ConfigError> {
        Self::required(var)
    }

    fn non_negative(var: &EnvironmentVariable<i64>) -> Result<u64, ConfigError> {
        let value = Self::required(var)?;
        if value < 0 {
            return Err(ConfigError::for_var(
                var.name(),
                format!("value {} must not be negative", value),
            ));
        }
        Ok(value as u64)
    }

    fn non_negative_u32(var: &EnvironmentVariable<i64>) -> Result<u32, ConfigError> {
        let value = Self::non_negative(var)?;
        u32::try_from(value).map_err(|_| {
            ConfigError::for_var(
                var.name(),
                format!("value {} exceeds maximum allowed ({})", value, u32::MAX),
            )
        })
    }

    fn positive(var: &EnvironmentVariable<i64>) -> Result<u64, ConfigError> {
        let value = Self::required(var)?;
        if value <= 0 {
            return Err(ConfigError::for_var(
                var.name(),
                format!("value {} must be greater than 0", value),
            ));
        }
        Ok(value as u64)
    }

    fn bounded(var: &EnvironmentVariable<i64>, max: i64) -> Result<u64, ConfigError> {
        let value = Self::positive(var)?;
        if value as i64 > max {
            return Err(ConfigError::for_var(
                var.name(),
                format!("value {} exceeds maximum allowed ({})", value, max),
            ));
        }
        Ok(value)
    }

    fn parse_jitter() -> Result<f64, ConfigError> {
        let var = &env::QCFLOW_HTTP_REQUEST_BACKOFF_JITTER;
        let jitter = Self::required(var)?;
        if !jitter.is_finite() || jitter < 0.0 {
            return Err(ConfigError::for_var(
                var.name(),
                format!("jitter {} must be a finite, non-negative number", jitter),
            ));
        }
        Ok(jitter)
    }

    /// Tracking URI, or a configuration error naming the variable to set.
    pub fn require_tracking_uri(&self) -> Result<&str, ConfigError> {
        self.tracking_uri.as_deref().ok_or_else(|| {
            ConfigError::for_var(env::QCFLOW_TRACKING_URI.name(), "tracking URI is not set")
        })
    }
}
