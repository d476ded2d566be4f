//! Credential resolution for the tracking server.
//!
//! Username and password come from `QCFLOW_TRACKING_USERNAME` /
//! `QCFLOW_TRACKING_PASSWORD` first and from the `[qcflow]` section of
//! `~/.qcflow/credentials` second. Nothing is cached: every call re-reads both
//! sources so a rotated password is picked up by the next request.

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;
use tracing::debug;

use crate::env::{self, EnvVarError};

/// Section of the credentials file holding tracking credentials.
const CREDENTIALS_SECTION: &str = "qcflow";

/// Errors raised while resolving credentials.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error(transparent)]
    Env(#[from] EnvVarError),

    #[error("failed to read credentials file {path}: {message}")]
    File { path: PathBuf, message: String },
}

/// Username/password pair; either half may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Everything needed to talk to one tracking or deployment host.
///
/// Built once per client and passed by reference to each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCreds {
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub aws_sigv4: bool,
    pub auth: Option<String>,
    pub tls_verify: bool,
    pub client_cert_path: Option<PathBuf>,
    pub server_cert_path: Option<PathBuf>,
}

impl HostCreds {
    /// Anonymous credentials for `host` with TLS verification enabled.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            username: None,
            password: None,
            token: None,
            aws_sigv4: false,
            auth: None,
            tls_verify: true,
            client_cert_path: None,
            server_cert_path: None,
        }
    }
}

/// Default location of the per-user credentials file.
pub fn credentials_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(".qcflow").join("credentials"))
}

/// Read credentials from an INI file.
///
/// A missing file or a file without a `[qcflow]` section yields empty
/// credentials. A file that exists but cannot be parsed is an error.
pub fn read_credentials_file(path: &Path) -> Result<Credentials, CredentialsError> {
    if !path.exists() {
        debug!(path = %path.display(), "No credentials file");
        return Ok(Credentials::default());
    }

    let conf = Ini::load_from_file(path).map_err(|e| CredentialsError::File {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let Some(section) = conf.section(Some(CREDENTIALS_SECTION)) else {
        return Ok(Credentials::default());
    };

    let username_key = env::QCFLOW_TRACKING_USERNAME.name().to_lowercase();
    let password_key = env::QCFLOW_TRACKING_PASSWORD.name().to_lowercase();

    Ok(Credentials {
        username: section.get(&username_key).map(str::to_string),
        password: section.get(&password_key).map(str::to_string),
    })
}

fn read_credentials_env() -> Result<Credentials, CredentialsError> {
    Ok(Credentials {
        username: env::QCFLOW_TRACKING_USERNAME.get()?,
        password: env::QCFLOW_TRACKING_PASSWORD.get()?,
    })
}

/// Merge environment and file credentials; each field prefers the environment.
pub fn read_credentials_from(path: Option<&Path>) -> Result<Credentials, CredentialsError> {
    let from_file = match path {
        Some(path) => read_credentials_file(path)?,
        None => Credentials::default(),
    };
    let from_env = read_credentials_env()?;

    Ok(Credentials {
        username: from_env.username.or(from_file.username),
        password: from_env.password.or(from_file.password),
    })
}

/// Resolve credentials from the environment and the default credentials file.
pub fn read_credentials() -> Result<Credentials, CredentialsError> {
    read_credentials_from(credentials_path().as_deref())
}

/// Build [`HostCreds`] for `host` from the current environment and credentials file.
pub fn get_default_host_creds(host: &str) -> Result<HostCreds, CredentialsError> {
    let creds = read_credentials()?;
    Ok(HostCreds {
        username: creds.username,
        password: creds.password,
        token: env::QCFLOW_TRACKING_TOKEN.get()?,
        aws_sigv4: env::QCFLOW_TRACKING_AWS_SIGV4.get()?.unwrap_or(false),
        auth: env::QCFLOW_TRACKING_AUTH.get()?,
        tls_verify: !env::QCFLOW_TRACKING_INSECURE_TLS.get()?.unwrap_or(false),
        client_cert_path: env::QCFLOW_TRACKING_CLIENT_CERT_PATH.get()?.map(PathBuf::from),
        server_cert_path: env::QCFLOW_TRACKING_SERVER_CERT_PATH.get()?.map(PathBuf::from),
        ..HostCreds::new(host)
    })
}
