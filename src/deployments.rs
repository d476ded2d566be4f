//! Deployment target resolution and plugin dispatch.
//!
//! A deployment target is named by a URI: `http://gateway:5000` selects the
//! `http` plugin, a bare `sagemaker` selects the `sagemaker` plugin. The
//! target in effect is chosen with the precedence
//! explicit argument > process default > `QCFLOW_DEPLOYMENTS_TARGET`.
//!
//! Plugins are registered by name in a [`PluginRegistry`]; the built-in
//! `http`/`https` plugin talks to a deployments gateway over the retrying
//! [`Transport`](crate::transport::Transport).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, HttpSettings, Settings};
use crate::credentials::HostCreds;
use crate::env::{self, EnvVarError};
use crate::transport::{HttpRequest, RetryPolicy, Transport, TransportError};

/// Target name accepted by `set_deployments_target` without a URI.
pub const DATABRICKS_TARGET: &str = "databricks";

const ENDPOINTS_PATH: &str = "/api/2.0/endpoints/";

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Not a proper deployment URI: {0:?}. Deployment URIs must be of the form 'target' or 'target:/suffix'")]
    InvalidUri(String),

    #[error("The target provided is not a valid uri or 'databricks': {0:?}")]
    InvalidTarget(String),

    #[error(
        "No deployments target has been set. Set one with set_deployments_target() or the {} environment variable",
        env::QCFLOW_DEPLOYMENTS_TARGET.name()
    )]
    NoTargetSet,

    #[error("No deployment plugin registered for target {0:?}")]
    UnknownTarget(String),

    #[error("Deployment plugin {target:?} does not provide a client")]
    AbstractPlugin { target: String },

    #[error("Deployment target {target:?} does not support {operation}")]
    Unsupported {
        target: String,
        operation: &'static str,
    },

    #[error("An endpoint or deployment name is required")]
    MissingEndpoint,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Env(#[from] EnvVarError),
}

/// Split a URI into its scheme and the remainder.
///
/// The scheme must start with a letter and contain only letters, digits,
/// `+`, `-` or `.`.
fn split_scheme(uri: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = uri.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic()
        || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return None;
    }
    Some((scheme, rest))
}

/// Extract the target name from a deployment URI.
///
/// A URI with a scheme names its scheme; a bare string names itself.
pub fn parse_target_uri(target_uri: &str) -> Result<String, DeploymentError> {
    if let Some((scheme, _)) = split_scheme(target_uri) {
        return Ok(scheme.to_lowercase());
    }
    let path = target_uri
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    if path.is_empty() {
        return Err(DeploymentError::InvalidUri(target_uri.to_string()));
    }
    Ok(path.to_string())
}

/// Whether `uri` has both a scheme and a host.
fn is_valid_uri(uri: &str) -> bool {
    Url::parse(uri)
        .map(|url| !url.scheme().is_empty() && url.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

fn is_valid_target(target: &str) -> bool {
    target == DATABRICKS_TARGET || is_valid_uri(target)
}

/// Join `endpoint` onto `base_url` unless it is already a full URL.
pub fn resolve_endpoint_url(base_url: &str, endpoint: &str) -> String {
    if is_valid_uri(endpoint) {
        return endpoint.to_string();
    }
    let base = base_url.trim_end_matches('/');
    let path = endpoint.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

/// Client for one deployment target.
#[async_trait]
pub trait DeploymentClient: Send + Sync {
    fn target_uri(&self) -> &str;

    /// Score `inputs` against a deployment or endpoint.
    async fn predict(
        &self,
        deployment_name: Option<&str>,
        inputs: &Value,
        endpoint: Option<&str>,
    ) -> Result<Value, DeploymentError>;

    async fn list_endpoints(&self) -> Result<Vec<Value>, DeploymentError> {
        Err(DeploymentError::Unsupported {
            target: self.target_uri().to_string(),
            operation: "list_endpoints",
        })
    }

    async fn get_endpoint(&self, endpoint: &str) -> Result<Value, DeploymentError> {
        let _ = endpoint;
        Err(DeploymentError::Unsupported {
            target: self.target_uri().to_string(),
            operation: "get_endpoint",
        })
    }
}

/// A deployment target implementation.
pub trait DeploymentPlugin: Send + Sync {
    /// Build a client for `target_uri`. `None` marks a plugin without a
    /// concrete client.
    fn client(&self, target_uri: &str)
        -> Result<Option<Box<dyn DeploymentClient>>, DeploymentError>;

    /// Deploy a model locally for testing.
    fn run_local(
        &self,
        name: &str,
        model_uri: &str,
        flavor: Option<&str>,
        config: Option<&Value>,
    ) -> Result<(), DeploymentError> {
        let _ = (name, model_uri, flavor, config);
        Err(DeploymentError::Unsupported {
            target: self.name().to_string(),
            operation: "run_local",
        })
    }

    fn target_help(&self) -> String;

    fn name(&self) -> &str;
}

/// Builds a plugin instance on lookup.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn DeploymentPlugin> + Send + Sync>;

/// Target name to plugin factory table.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("targets", &self.names())
            .finish()
    }
}

impl PluginRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the `http` and `https` gateway plugins.
    pub fn with_builtins(http: &HttpSettings, predict_timeout: Duration) -> Self {
        let mut registry = Self::empty();
        for scheme in ["http", "https"] {
            let http = http.clone();
            registry.register(
                scheme,
                Arc::new(move || {
                    Box::new(HttpGatewayPlugin {
                        scheme,
                        http: http.clone(),
                        predict_timeout,
                    }) as Box<dyn DeploymentPlugin>
                }),
            );
        }
        registry
    }

    /// Register a factory, replacing any previous one for `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, target: &str) -> Result<Box<dyn DeploymentPlugin>, DeploymentError> {
        self.factories
            .get(target)
            .map(|factory| factory())
            .ok_or_else(|| DeploymentError::UnknownTarget(target.to_string()))
    }
}

/// Resolver state: the process default target and the plugin table.
///
/// The module-level functions use a process-wide instance of this state;
/// construct one directly to keep resolution isolated.
#[derive(Debug)]
pub struct DeploymentsContext {
    target: RwLock<Option<String>>,
    env_target: Option<String>,
    registry: PluginRegistry,
}

impl DeploymentsContext {
    /// Context with the built-in plugins, falling back to the target in `settings`.
    pub fn new(settings: &Settings) -> Self {
        Self::with_registry(
            PluginRegistry::with_builtins(&settings.http, settings.deployment_predict_timeout),
            settings.deployments_target.clone(),
        )
    }

    pub fn with_registry(registry: PluginRegistry, env_target: Option<String>) -> Self {
        Self {
            target: RwLock::new(None),
            env_target,
            registry,
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn set_target(&self, target: &str) -> Result<(), DeploymentError> {
        if !is_valid_target(target) {
            return Err(DeploymentError::InvalidTarget(target.to_string()));
        }
        *self.target.write().unwrap_or_else(|e| e.into_inner()) = Some(target.to_string());
        Ok(())
    }

    pub fn target(&self) -> Result<String, DeploymentError> {
        let current = self
            .target
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        current
            .or_else(|| self.env_target.clone())
            .ok_or(DeploymentError::NoTargetSet)
    }

    fn resolve_uri(&self, target_uri: Option<&str>) -> Result<String, DeploymentError> {
        match target_uri.filter(|uri| !uri.is_empty()) {
            Some(uri) => Ok(uri.to_string()),
            None => self.target().map_err(|e| {
                info!("No deployments target has been set");
                e
            }),
        }
    }

    pub fn get_deploy_client(
        &self,
        target_uri: Option<&str>,
    ) -> Result<Box<dyn DeploymentClient>, DeploymentError> {
        let uri = self.resolve_uri(target_uri)?;
        let target = parse_target_uri(&uri)?;
        let plugin = self.registry.get(&target)?;
        debug!(target = %target, uri = %uri, "Resolved deployment plugin");
        plugin
            .client(&uri)?
            .ok_or(DeploymentError::AbstractPlugin { target })
    }

    pub fn run_local(
        &self,
        target: &str,
        name: &str,
        model_uri: &str,
        flavor: Option<&str>,
        config: Option<&Value>,
    ) -> Result<(), DeploymentError> {
        self.registry
            .get(target)?
            .run_local(name, model_uri, flavor, config)
    }

    /// Score `inputs` through the client of the resolved target.
    ///
    /// Retries, if any, belong to the plugin's client.
    pub async fn predict_deployment(
        &self,
        target_uri: Option<&str>,
        deployment_name: Option<&str>,
        inputs: &Value,
        endpoint: Option<&str>,
    ) -> Result<Value, DeploymentError> {
        let client = self.get_deploy_client(target_uri)?;
        client.predict(deployment_name, inputs, endpoint).await
    }

    pub fn target_help(&self, target: &str) -> Result<String, DeploymentError> {
        Ok(self.registry.get(target)?.target_help())
    }
}

static DEPLOYMENTS_TARGET: RwLock<Option<String>> = RwLock::new(None);

/// Set the process default target: `"databricks"` or a URI with scheme and host.
pub fn set_deployments_target(target: &str) -> Result<(), DeploymentError> {
    if !is_valid_target(target) {
        return Err(DeploymentError::InvalidTarget(target.to_string()));
    }
    *DEPLOYMENTS_TARGET
        .write()
        .unwrap_or_else(|e| e.into_inner()) = Some(target.to_string());
    Ok(())
}

/// The process default target, else `QCFLOW_DEPLOYMENTS_TARGET`.
pub fn get_deployments_target() -> Result<String, DeploymentError> {
    let current = DEPLOYMENTS_TARGET
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    if let Some(target) = current {
        return Ok(target);
    }
    env::QCFLOW_DEPLOYMENTS_TARGET
        .get()?
        .filter(|t| !t.is_empty())
        .ok_or(DeploymentError::NoTargetSet)
}

#[cfg(test)]
pub(crate) fn reset_deployments_target() {
    *DEPLOYMENTS_TARGET
        .write()
        .unwrap_or_else(|e| e.into_inner()) = None;
}

fn global_context() -> Result<DeploymentsContext, DeploymentError> {
    let settings = Settings::from_env()?;
    let context = DeploymentsContext::with_registry(
        PluginRegistry::with_builtins(&settings.http, settings.deployment_predict_timeout),
        None,
    );
    if let Ok(target) = get_deployments_target() {
        *context.target.write().unwrap_or_else(|e| e.into_inner()) = Some(target);
    }
    Ok(context)
}

/// Client for `target_uri`, or for the process default target.
pub fn get_deploy_client(
    target_uri: Option<&str>,
) -> Result<Box<dyn DeploymentClient>, DeploymentError> {
    global_context()?.get_deploy_client(target_uri)
}

pub fn run_local(
    target: &str,
    name: &str,
    model_uri: &str,
    flavor: Option<&str>,
    config: Option<&Value>,
) -> Result<(), DeploymentError> {
    global_context()?.run_local(target, name, model_uri, flavor, config)
}

pub async fn predict_deployment(
    target_uri: Option<&str>,
    deployment_name: Option<&str>,
    inputs: &Value,
    endpoint: Option<&str>,
) -> Result<Value, DeploymentError> {
    global_context()?
        .predict_deployment(target_uri, deployment_name, inputs, endpoint)
        .await
}

pub fn target_help(target: &str) -> Result<String, DeploymentError> {
    global_context()?.target_help(target)
}

struct HttpGatewayPlugin {
    scheme: &'static str,
    http: HttpSettings,
    predict_timeout: Duration,
}

impl DeploymentPlugin for HttpGatewayPlugin {
    fn client(
        &self,
        target_uri: &str,
    ) -> Result<Option<Box<dyn DeploymentClient>>, DeploymentError> {
        let client = GatewayClient::new(target_uri, &self.http, self.predict_timeout)?;
        Ok(Some(Box::new(client)))
    }

    fn target_help(&self) -> String {
        format!(
            "Deployments gateway reachable over {}. Use the gateway base URL as the target, \
             e.g. {}://localhost:5000. Predictions are sent to /endpoints/<name>/invocations.",
            self.scheme.to_uppercase(),
            self.scheme
        )
    }

    fn name(&self) -> &str {
        self.scheme
    }
}

/// Client for a deployments gateway.
pub struct GatewayClient {
    target_uri: String,
    creds: HostCreds,
    transport: Transport,
    predict_timeout: Duration,
}

impl fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("target_uri", &self.target_uri)
            .field("predict_timeout", &self.predict_timeout)
            .finish()
    }
}

impl GatewayClient {
    pub fn new(
        target_uri: &str,
        http: &HttpSettings,
        predict_timeout: Duration,
    ) -> Result<Self, DeploymentError> {
        let creds = HostCreds::new(target_uri);
        let transport = Transport::new(http, RetryPolicy::deployment(http), &creds)?;
        Ok(Self {
            target_uri: target_uri.to_string(),
            creds,
            transport,
            predict_timeout,
        })
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn url(&self, endpoint: &str) -> String {
        resolve_endpoint_url(&self.target_uri, endpoint)
    }
}

#[async_trait]
impl DeploymentClient for GatewayClient {
    fn target_uri(&self) -> &str {
        &self.target_uri
    }

    async fn predict(
        &self,
        deployment_name: Option<&str>,
        inputs: &Value,
        endpoint: Option<&str>,
    ) -> Result<Value, DeploymentError> {
        let name = endpoint
            .or(deployment_name)
            .ok_or(DeploymentError::MissingEndpoint)?;
        let request = HttpRequest::post(self.url(&format!("/endpoints/{}/invocations", name)))
            .json(inputs)?
            .timeout(self.predict_timeout);
        let response = self.transport.send(&request, &self.creds).await?;
        Ok(response.json()?)
    }

    async fn list_endpoints(&self) -> Result<Vec<Value>, DeploymentError> {
        let request = HttpRequest::get(self.url(ENDPOINTS_PATH));
        let response: Value = self.transport.send(&request, &self.creds).await?.json()?;
        Ok(response
            .get("endpoints")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_endpoint(&self, endpoint: &str) -> Result<Value, DeploymentError> {
        let request = HttpRequest::get(self.url(&format!("{}{}", ENDPOINTS_PATH, endpoint)));
        Ok(self.transport.send(&request, &self.creds).await?.json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvGuard;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_http() -> HttpSettings {
        HttpSettings {
            max_retries: 2,
            backoff_factor: 0.0,
            backoff_jitter: 0.0,
            request_timeout: Duration::from_secs(5),
            ..HttpSettings::default()
        }
    }

    fn context() -> DeploymentsContext {
        DeploymentsContext::with_registry(
            PluginRegistry::with_builtins(&fast_http(), Duration::from_secs(5)),
            None,
        )
    }

    struct AbstractPlugin;

    impl DeploymentPlugin for AbstractPlugin {
        fn client(
            &self,
            _target_uri: &str,
        ) -> Result<Option<Box<dyn DeploymentClient>>, DeploymentError> {
            Ok(None)
        }

        fn run_local(
            &self,
            _name: &str,
            _model_uri: &str,
            _flavor: Option<&str>,
            _config: Option<&Value>,
        ) -> Result<(), DeploymentError> {
            Ok(())
        }

        fn target_help(&self) -> String {
            "abstract target".to_string()
        }

        fn name(&self) -> &str {
            "abstract"
        }
    }

    #[test]
    fn test_parse_target_uri() {
        assert_eq!(parse_target_uri("sagemaker").unwrap(), "sagemaker");
        assert_eq!(parse_target_uri("sagemaker:/us-east-1").unwrap(), "sagemaker");
        assert_eq!(parse_target_uri("http://localhost:5000").unwrap(), "http");
        assert_eq!(parse_target_uri("databricks").unwrap(), "databricks");
        assert!(matches!(
            parse_target_uri(""),
            Err(DeploymentError::InvalidUri(_))
        ));
    }

    #[test]
    fn test_resolve_endpoint_url() {
        assert_eq!(
            resolve_endpoint_url("http://127.0.0.1:6000", "/api/2.0/endpoints/"),
            "http://127.0.0.1:6000/api/2.0/endpoints/"
        );
        assert_eq!(
            resolve_endpoint_url("http://127.0.0.1:6000/", "endpoints/chat"),
            "http://127.0.0.1:6000/endpoints/chat"
        );
        assert_eq!(
            resolve_endpoint_url("http://127.0.0.1:6000", "https://workspace.example.com/serving"),
            "https://workspace.example.com/serving"
        );
    }

    #[test]
    #[serial]
    fn test_set_deployments_target() {
        reset_deployments_target();
        let _env = EnvGuard::remove("QCFLOW_DEPLOYMENTS_TARGET");

        assert!(matches!(
            set_deployments_target("not-a-uri"),
            Err(DeploymentError::InvalidTarget(_))
        ));
        assert!(matches!(
            get_deployments_target(),
            Err(DeploymentError::NoTargetSet)
        ));

        set_deployments_target("databricks").unwrap();
        assert_eq!(get_deployments_target().unwrap(), "databricks");

        set_deployments_target("http://localhost:5000").unwrap();
        assert_eq!(get_deployments_target().unwrap(), "http://localhost:5000");

        reset_deployments_target();
    }

    #[test]
    #[serial]
    fn test_process_target_wins_over_environment() {
        reset_deployments_target();
        let _env = EnvGuard::set("QCFLOW_DEPLOYMENTS_TARGET", "http://from-env:5000");
        assert_eq!(get_deployments_target().unwrap(), "http://from-env:5000");

        set_deployments_target("http://explicit:5000").unwrap();
        assert_eq!(get_deployments_target().unwrap(), "http://explicit:5000");

        reset_deployments_target();
    }

    #[test]
    #[serial]
    fn test_global_client_uses_environment_target() {
        reset_deployments_target();
        let _env = EnvGuard::set("QCFLOW_DEPLOYMENTS_TARGET", "http://gateway:7000");

        let client = get_deploy_client(None).unwrap();
        assert_eq!(client.target_uri(), "http://gateway:7000");

        let explicit = get_deploy_client(Some("https://other:443")).unwrap();
        assert_eq!(explicit.target_uri(), "https://other:443");
    }

    #[test]
    fn test_context_precedence() {
        let ctx = DeploymentsContext::with_registry(
            PluginRegistry::empty(),
            Some("http://env:1".to_string()),
        );
        assert_eq!(ctx.target().unwrap(), "http://env:1");
        ctx.set_target("http://set:2").unwrap();
        assert_eq!(ctx.target().unwrap(), "http://set:2");
        assert_eq!(ctx.resolve_uri(Some("http://arg:3")).unwrap(), "http://arg:3");

        let empty = DeploymentsContext::with_registry(PluginRegistry::empty(), None);
        assert!(matches!(
            empty.get_deploy_client(None),
            Err(DeploymentError::NoTargetSet)
        ));
    }

    #[test]
    fn test_unknown_and_abstract_plugins_are_errors() {
        let mut registry = PluginRegistry::empty();
        registry.register("abstract", Arc::new(|| Box::new(AbstractPlugin) as Box<dyn DeploymentPlugin>));
        let ctx = DeploymentsContext::with_registry(registry, None);

        assert!(matches!(
            ctx.get_deploy_client(Some("nosuch:/x")),
            Err(DeploymentError::UnknownTarget(t)) if t == "nosuch"
        ));
        assert!(matches!(
            ctx.get_deploy_client(Some("abstract:/x")),
            Err(DeploymentError::AbstractPlugin { target }) if target == "abstract"
        ));
    }

    #[test]
    fn test_run_local_and_help_dispatch_through_plugin() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let mut registry = PluginRegistry::empty();
        registry.register(
            "abstract",
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::new(AbstractPlugin) as Box<dyn DeploymentPlugin>
            }),
        );
        let ctx = DeploymentsContext::with_registry(registry, None);

        ctx.run_local("abstract", "spam", "runs:/abc/model", None, None)
            .unwrap();
        assert_eq!(ctx.target_help("abstract").unwrap(), "abstract target");
        assert_eq!(built.load(Ordering::SeqCst), 2);

        let builtin = context();
        assert!(matches!(
            builtin.run_local("http", "spam", "runs:/abc/model", None, None),
            Err(DeploymentError::Unsupported { operation: "run_local", .. })
        ));
        assert!(builtin.target_help("https").unwrap().contains("https://"));
    }

    #[tokio::test]
    async fn test_gateway_predict() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/endpoints/chat/invocations")
            .match_body(Matcher::Json(json!({"prompt": "hello"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"candidates": ["hi"]}"#)
            .create_async()
            .await;

        let response = context()
            .predict_deployment(Some(&server.url()), None, &json!({"prompt": "hello"}), Some("chat"))
            .await
            .unwrap();
        assert_eq!(response, json!({"candidates": ["hi"]}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_gateway_does_not_retry_gateway_timeout() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/endpoints/slow/invocations")
            .with_status(504)
            .expect(1)
            .create_async()
            .await;

        let err = context()
            .predict_deployment(Some(&server.url()), Some("slow"), &json!({}), None)
            .await
            .unwrap_err();
        match err {
            DeploymentError::Transport(e) => assert_eq!(e.status().map(|s| s.as_u16()), Some(504)),
            other => panic!("unexpected error: {other}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_gateway_lists_endpoints() {
        let mut server = Server::new_async().await;
        let _list = server
            .mock("GET", "/api/2.0/endpoints/")
            .with_status(200)
            .with_body(r#"{"endpoints": [{"name": "chat"}, {"name": "embeddings"}]}"#)
            .create_async()
            .await;
        let _get = server
            .mock("GET", "/api/2.0/endpoints/chat")
            .with_status(200)
            .with_body(r#"{"name": "chat", "endpoint_type": "llm/v1/chat"}"#)
            .create_async()
            .await;

        let client = context().get_deploy_client(Some(&server.url())).unwrap();
        let endpoints = client.list_endpoints().await.unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(client.get_endpoint("chat").await.unwrap()["endpoint_type"], "llm/v1/chat");
    }
}
