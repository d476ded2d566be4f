//! Typed environment variables.
//!
//! Every tunable of the client is declared here as an [`EnvironmentVariable`]
//! carrying its name, value type and default. Values are read from the process
//! environment on every [`EnvironmentVariable::get`] call; nothing is cached.
//!
//! The environment is process-wide state: `set`/`unset` affect every thread and
//! are not suitable for per-thread overrides. Components should prefer the
//! [`Settings`](crate::config::Settings) snapshot taken once at startup.

use std::env;
use std::fmt;
use std::marker::PhantomData;

use thiserror::Error;

/// Raised when a variable is set to a value that cannot be coerced to its type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Failed to convert {value:?} to {kind} for {name}: {reason}")]
pub struct EnvVarError {
    pub name: &'static str,
    pub value: String,
    pub kind: &'static str,
    pub reason: String,
}

/// A type that environment variables can be coerced into.
pub trait EnvValue: Sized {
    /// Compile-time representation of the default value.
    type Default: Copy + fmt::Display;

    /// Type name used in messages.
    const KIND: &'static str;

    fn from_default(default: Self::Default) -> Self;

    fn parse_env(raw: &str) -> Result<Self, String>;
}

impl EnvValue for String {
    type Default = &'static str;
    const KIND: &'static str = "str";

    fn from_default(default: &'static str) -> Self {
        default.to_string()
    }

    fn parse_env(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl EnvValue for i64 {
    type Default = i64;
    const KIND: &'static str = "int";

    fn from_default(default: i64) -> Self {
        default
    }

    fn parse_env(raw: &str) -> Result<Self, String> {
        raw.trim().parse::<i64>().map_err(|e| e.to_string())
    }
}

impl EnvValue for f64 {
    type Default = f64;
    const KIND: &'static str = "float";

    fn from_default(default: f64) -> Self {
        default
    }

    fn parse_env(raw: &str) -> Result<Self, String> {
        raw.trim().parse::<f64>().map_err(|e| e.to_string())
    }
}

impl EnvValue for bool {
    type Default = bool;
    const KIND: &'static str = "bool";

    fn from_default(default: bool) -> Self {
        default
    }

    fn parse_env(raw: &str) -> Result<Self, String> {
        match raw.to_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(format!(
                "value must be one of ['true', 'false', '1', '0'] (case-insensitive), but got {}",
                raw
            )),
        }
    }
}

/// A named, typed environment variable with an optional default.
pub struct EnvironmentVariable<T: EnvValue> {
    name: &'static str,
    default: Option<T::Default>,
    _type: PhantomData<fn() -> T>,
}

impl<T: EnvValue> EnvironmentVariable<T> {
    pub const fn new(name: &'static str, default: Option<T::Default>) -> Self {
        Self {
            name,
            default,
            _type: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_value(&self) -> Option<T> {
        self.default.map(T::from_default)
    }

    /// Whether the variable is present in the environment, regardless of its value.
    pub fn is_defined(&self) -> bool {
        env::var_os(self.name).is_some()
    }

    pub fn get_raw(&self) -> Option<String> {
        env::var(self.name).ok()
    }

    pub fn set(&self, value: impl fmt::Display) {
        env::set_var(self.name, value.to_string());
    }

    pub fn unset(&self) {
        env::remove_var(self.name);
    }

    /// Read and coerce the current value.
    ///
    /// Returns the default when the variable is unset, and `None` when there is
    /// no default either. A set value that fails coercion is an error, never a
    /// silent fallback to the default.
    pub fn get(&self) -> Result<Option<T>, EnvVarError> {
        match self.get_raw() {
            Some(raw) => T::parse_env(&raw).map(Some).map_err(|reason| EnvVarError {
                name: self.name,
                value: raw,
                kind: T::KIND,
                reason,
            }),
            None => Ok(self.default_value()),
        }
    }
}

impl<T: EnvValue> fmt::Display for EnvironmentVariable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.default {
            Some(default) => write!(f, "{} (default: {}, type: {})", self.name, default, T::KIND),
            None => write!(f, "{} (default: None, type: {})", self.name, T::KIND),
        }
    }
}

impl<T: EnvValue> fmt::Debug for EnvironmentVariable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.name)
    }
}

/// Tracking server URI.
pub const QCFLOW_TRACKING_URI: EnvironmentVariable<String> =
    EnvironmentVariable::new("QCFLOW_TRACKING_URI", None);

pub const QCFLOW_TRACKING_USERNAME: EnvironmentVariable<String> =
    EnvironmentVariable::new("QCFLOW_TRACKING_USERNAME", None);

pub const QCFLOW_TRACKING_PASSWORD: EnvironmentVariable<String> =
    EnvironmentVariable::new("QCFLOW_TRACKING_PASSWORD", None);

/// Bearer token, takes precedence over basic auth.
pub const QCFLOW_TRACKING_TOKEN: EnvironmentVariable<String> =
    EnvironmentVariable::new("QCFLOW_TRACKING_TOKEN", None);

/// Skip TLS certificate verification.
pub const QCFLOW_TRACKING_INSECURE_TLS: EnvironmentVariable<bool> =
    EnvironmentVariable::new("QCFLOW_TRACKING_INSECURE_TLS", Some(false));

pub const QCFLOW_TRACKING_AWS_SIGV4: EnvironmentVariable<bool> =
    EnvironmentVariable::new("QCFLOW_TRACKING_AWS_SIGV4", Some(false));

/// Name of a custom auth provider used to sign requests.
pub const QCFLOW_TRACKING_AUTH: EnvironmentVariable<String> =
    EnvironmentVariable::new("QCFLOW_TRACKING_AUTH", None);

/// PEM bundle used to verify the server certificate.
pub const QCFLOW_TRACKING_SERVER_CERT_PATH: EnvironmentVariable<String> =
    EnvironmentVariable::new("QCFLOW_TRACKING_SERVER_CERT_PATH", None);

/// PEM file holding the client certificate and private key.
pub const QCFLOW_TRACKING_CLIENT_CERT_PATH: EnvironmentVariable<String> =
    EnvironmentVariable::new("QCFLOW_TRACKING_CLIENT_CERT_PATH", None);

pub const QCFLOW_HTTP_REQUEST_MAX_RETRIES: EnvironmentVariable<i64> =
    EnvironmentVariable::new("QCFLOW_HTTP_REQUEST_MAX_RETRIES", Some(5));

/// Seconds; multiplied by `2^(attempt-1)` between retries.
pub const QCFLOW_HTTP_REQUEST_BACKOFF_FACTOR: EnvironmentVariable<i64> =
    EnvironmentVariable::new("QCFLOW_HTTP_REQUEST_BACKOFF_FACTOR", Some(2));

/// Seconds; upper bound of the uniform jitter added to each backoff.
pub const QCFLOW_HTTP_REQUEST_BACKOFF_JITTER: EnvironmentVariable<f64> =
    EnvironmentVariable::new("QCFLOW_HTTP_REQUEST_BACKOFF_JITTER", Some(1.0));

/// Per-request timeout in seconds.
pub const QCFLOW_HTTP_REQUEST_TIMEOUT: EnvironmentVariable<i64> =
    EnvironmentVariable::new("QCFLOW_HTTP_REQUEST_TIMEOUT", Some(120));

pub const QCFLOW_HTTP_RESPECT_RETRY_AFTER_HEADER: EnvironmentVariable<bool> =
    EnvironmentVariable::new("QCFLOW_HTTP_RESPECT_RETRY_AFTER_HEADER", Some(true));

pub const QCFLOW_ALLOW_HTTP_REDIRECTS: EnvironmentVariable<bool> =
    EnvironmentVariable::new("QCFLOW_ALLOW_HTTP_REDIRECTS", Some(true));

/// Hard upper bound applied to the configured retry count.
pub const QCFLOW_HTTP_REQUEST_MAX_RETRIES_LIMIT: EnvironmentVariable<i64> =
    EnvironmentVariable::new("_QCFLOW_HTTP_REQUEST_MAX_RETRIES_LIMIT", Some(10));

/// Hard upper bound applied to the configured backoff factor.
pub const QCFLOW_HTTP_REQUEST_MAX_BACKOFF_FACTOR_LIMIT: EnvironmentVariable<i64> =
    EnvironmentVariable::new("_QCFLOW_HTTP_REQUEST_MAX_BACKOFF_FACTOR_LIMIT", Some(120));

pub const QCFLOW_ENABLE_ASYNC_LOGGING: EnvironmentVariable<bool> =
    EnvironmentVariable::new("QCFLOW_ENABLE_ASYNC_LOGGING", Some(false));

pub const QCFLOW_ASYNC_LOGGING_THREADPOOL_SIZE: EnvironmentVariable<i64> =
    EnvironmentVariable::new("QCFLOW_ASYNC_LOGGING_THREADPOOL_SIZE", Some(10));

/// Seconds a worker waits to accumulate a batch. Unset means "send as soon as possible".
pub const QCFLOW_ASYNC_LOGGING_BUFFERING_SECONDS: EnvironmentVariable<i64> =
    EnvironmentVariable::new("QCFLOW_ASYNC_LOGGING_BUFFERING_SECONDS", None);

/// Total number of items the queue holds before the full policy applies.
pub const QCFLOW_ASYNC_LOGGING_QUEUE_SIZE: EnvironmentVariable<i64> =
    EnvironmentVariable::new("QCFLOW_ASYNC_LOGGING_QUEUE_SIZE", Some(10_000));

pub const QCFLOW_ASYNC_LOGGING_BLOCK_ON_FULL: EnvironmentVariable<bool> =
    EnvironmentVariable::new("QCFLOW_ASYNC_LOGGING_BLOCK_ON_FULL", Some(true));

pub const QCFLOW_ASYNC_LOGGING_ENQUEUE_TIMEOUT_SECONDS: EnvironmentVariable<i64> =
    EnvironmentVariable::new("QCFLOW_ASYNC_LOGGING_ENQUEUE_TIMEOUT_SECONDS", Some(5));

pub const QCFLOW_ASYNC_LOGGING_SHUTDOWN_GRACE_SECONDS: EnvironmentVariable<i64> =
    EnvironmentVariable::new("QCFLOW_ASYNC_LOGGING_SHUTDOWN_GRACE_SECONDS", Some(30));

/// Truncate over-long param and tag values instead of rejecting them.
pub const QCFLOW_TRUNCATE_LONG_VALUES: EnvironmentVariable<bool> =
    EnvironmentVariable::new("QCFLOW_TRUNCATE_LONG_VALUES", Some(true));

pub const QCFLOW_DEPLOYMENTS_TARGET: EnvironmentVariable<String> =
    EnvironmentVariable::new("QCFLOW_DEPLOYMENTS_TARGET", None);

pub const QCFLOW_DEPLOYMENT_PREDICT_TIMEOUT: EnvironmentVariable<i64> =
    EnvironmentVariable::new("QCFLOW_DEPLOYMENT_PREDICT_TIMEOUT", Some(120));

pub const QCFLOW_AUTH_CONFIG_PATH: EnvironmentVariable<String> =
    EnvironmentVariable::new("QCFLOW_AUTH_CONFIG_PATH", None);

/// Restores an environment variable to its previous state on drop.
#[cfg(test)]
pub(crate) struct EnvGuard {
    key: String,
    original: Option<String>,
}

#[cfg(test)]
impl EnvGuard {
    pub(crate) fn set(key: &str, value: &str) -> Self {
        let original = env::var(key).ok();
        env::set_var(key, value);
        Self {
            key: key.to_string(),
            original,
        }
    }

    pub(crate) fn remove(key: &str) -> Self {
        let original = env::var(key).ok();
        env::remove_var(key);
        Self {
            key: key.to_string(),
            original,
        }
    }
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.original {
            Some(val) => env::set_var(&self.key, val),
            None => env::remove_var(&self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const TEST_INT: EnvironmentVariable<i64> =
        EnvironmentVariable::new("QCFLOW_TEST_ENV_INT", Some(7));
    const TEST_STR: EnvironmentVariable<String> =
        EnvironmentVariable::new("QCFLOW_TEST_ENV_STR", None);
    const TEST_BOOL: EnvironmentVariable<bool> =
        EnvironmentVariable::new("QCFLOW_TEST_ENV_BOOL", Some(true));
    const TEST_FLOAT: EnvironmentVariable<f64> =
        EnvironmentVariable::new("QCFLOW_TEST_ENV_FLOAT", Some(0.5));

    #[test]
    #[serial]
    fn test_unset_returns_default() {
        let _guard = EnvGuard::remove(TEST_INT.name());
        assert_eq!(TEST_INT.get().unwrap(), Some(7));
        assert!(!TEST_INT.is_defined());
    }

    #[test]
    #[serial]
    fn test_unset_without_default_is_none() {
        let _guard = EnvGuard::remove(TEST_STR.name());
        assert_eq!(TEST_STR.get().unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_int_conversion() {
        let _guard = EnvGuard::set(TEST_INT.name(), "42");
        assert_eq!(TEST_INT.get().unwrap(), Some(42));

        let _guard = EnvGuard::set(TEST_INT.name(), "forty-two");
        let err = TEST_INT.get().unwrap_err();
        assert_eq!(err.name, "QCFLOW_TEST_ENV_INT");
        assert_eq!(err.kind, "int");
        assert!(err.to_string().contains("forty-two"));
    }

    #[test]
    #[serial]
    fn test_float_conversion() {
        let _guard = EnvGuard::set(TEST_FLOAT.name(), "2.25");
        assert_eq!(TEST_FLOAT.get().unwrap(), Some(2.25));
    }

    #[test]
    #[serial]
    fn test_bool_accepts_case_insensitive_values() {
        for (raw, expected) in [("TRUE", true), ("1", true), ("False", false), ("0", false)] {
            let _guard = EnvGuard::set(TEST_BOOL.name(), raw);
            assert_eq!(TEST_BOOL.get().unwrap(), Some(expected), "raw value {}", raw);
        }
    }

    #[test]
    #[serial]
    fn test_bool_rejects_other_values() {
        let _guard = EnvGuard::set(TEST_BOOL.name(), "yes");
        let err = TEST_BOOL.get().unwrap_err();
        assert!(err.reason.contains("case-insensitive"));
    }

    #[test]
    #[serial]
    fn test_set_and_unset() {
        let _guard = EnvGuard::remove(TEST_STR.name());
        TEST_STR.set("value");
        assert!(TEST_STR.is_defined());
        assert_eq!(TEST_STR.get().unwrap(), Some("value".to_string()));
        TEST_STR.unset();
        assert_eq!(TEST_STR.get_raw(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            QCFLOW_HTTP_REQUEST_MAX_RETRIES.to_string(),
            "QCFLOW_HTTP_REQUEST_MAX_RETRIES (default: 5, type: int)"
        );
        assert_eq!(
            QCFLOW_TRACKING_URI.to_string(),
            "QCFLOW_TRACKING_URI (default: None, type: str)"
        );
    }
}
