//! Tracking server auth configuration.
//!
//! The configuration is an INI file with a `[qcflow]` section, read from
//! `QCFLOW_AUTH_CONFIG_PATH` or, when unset, from the packaged defaults.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use ini::Ini;
use reqwest::header::HeaderMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::env::{self, EnvVarError};

const AUTH_SECTION: &str = "qcflow";

const DEFAULT_AUTH_CONFIG: &str = include_str!("basic_auth.ini");

pub const DEFAULT_AUTHORIZATION_FUNCTION: &str =
    "qcflow.server.auth:authenticate_request_basic_auth";

#[derive(Debug, Error)]
pub enum AuthConfigError {
    #[error(transparent)]
    Env(#[from] EnvVarError),

    #[error("failed to read auth config {source_name}: {message}")]
    Read { source_name: String, message: String },

    #[error("auth config {source_name} has no [qcflow] section")]
    MissingSection { source_name: String },

    #[error("auth config {source_name} is missing required key {key:?}")]
    MissingKey {
        source_name: String,
        key: &'static str,
    },

    #[error("invalid authorization function reference {0:?}, expected 'module:function'")]
    InvalidFunction(String),

    #[error("authorization function {0:?} is not registered")]
    UnknownFunction(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub default_permission: String,
    pub database_uri: String,
    pub admin_username: String,
    pub admin_password: String,

    /// `module:function` reference, resolved only when used
    pub authorization_function: String,
}

impl AuthConfig {
    /// Split the authorization function reference into module and function.
    pub fn authorization_function_ref(&self) -> Result<(&str, &str), AuthConfigError> {
        match self.authorization_function.split_once(':') {
            Some((module, function)) if !module.is_empty() && !function.is_empty() => {
                Ok((module, function))
            }
            _ => Err(AuthConfigError::InvalidFunction(
                self.authorization_function.clone(),
            )),
        }
    }
}

fn parse_auth_config(conf: &Ini, source_name: &str) -> Result<AuthConfig, AuthConfigError> {
    let section = conf
        .section(Some(AUTH_SECTION))
        .ok_or_else(|| AuthConfigError::MissingSection {
            source_name: source_name.to_string(),
        })?;

    let required = |key: &'static str| {
        section
            .get(key)
            .map(str::to_string)
            .ok_or_else(|| AuthConfigError::MissingKey {
                source_name: source_name.to_string(),
                key,
            })
    };

    Ok(AuthConfig {
        default_permission: required("default_permission")?,
        database_uri: required("database_uri")?,
        admin_username: required("admin_username")?,
        admin_password: required("admin_password")?,
        authorization_function: section
            .get("authorization_function")
            .unwrap_or(DEFAULT_AUTHORIZATION_FUNCTION)
            .to_string(),
    })
}

/// Load the auth config from `path`, or the packaged defaults when `None`.
pub fn read_auth_config_from(path: Option<&Path>) -> Result<AuthConfig, AuthConfigError> {
    match path {
        Some(path) => {
            let source_name = path.display().to_string();
            let conf = Ini::load_from_file(path).map_err(|e| AuthConfigError::Read {
                source_name: source_name.clone(),
                message: e.to_string(),
            })?;
            parse_auth_config(&conf, &source_name)
        }
        None => {
            let conf =
                Ini::load_from_str(DEFAULT_AUTH_CONFIG).map_err(|e| AuthConfigError::Read {
                    source_name: "basic_auth.ini".to_string(),
                    message: e.to_string(),
                })?;
            parse_auth_config(&conf, "basic_auth.ini")
        }
    }
}

/// Load the auth config named by `QCFLOW_AUTH_CONFIG_PATH`.
pub fn read_auth_config() -> Result<AuthConfig, AuthConfigError> {
    let path = env::QCFLOW_AUTH_CONFIG_PATH.get()?.map(PathBuf::from);
    debug!(path = ?path, "Reading auth config");
    read_auth_config_from(path.as_deref())
}

static AUTH_CONFIG: OnceLock<AuthConfig> = OnceLock::new();

/// Process-wide auth config. The first successful load is kept for the
/// lifetime of the process; failures are not cached.
pub fn auth_config() -> Result<&'static AuthConfig, AuthConfigError> {
    if let Some(config) = AUTH_CONFIG.get() {
        return Ok(config);
    }
    let loaded = read_auth_config()?;
    info!(
        default_permission = %loaded.default_permission,
        authorization_function = %loaded.authorization_function,
        "Loaded auth config"
    );
    Ok(AUTH_CONFIG.get_or_init(|| loaded))
}

/// Decides whether a request, given its headers, is authenticated.
pub type AuthFunction = Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>;

/// Named authorization functions, looked up by `module:function` reference.
#[derive(Clone, Default)]
pub struct AuthFunctionRegistry {
    functions: HashMap<String, AuthFunction>,
}

impl fmt::Debug for AuthFunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("AuthFunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl AuthFunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, reference: impl Into<String>, function: AuthFunction) {
        self.functions.insert(reference.into(), function);
    }

    pub fn resolve(&self, reference: &str) -> Result<AuthFunction, AuthConfigError> {
        self.functions
            .get(reference)
            .cloned()
            .ok_or_else(|| AuthConfigError::UnknownFunction(reference.to_string()))
    }

    /// Resolve the function referenced by `config`.
    pub fn resolve_for(&self, config: &AuthConfig) -> Result<AuthFunction, AuthConfigError> {
        config.authorization_function_ref()?;
        self.resolve(&config.authorization_function)
    }
}
