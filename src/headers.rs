//! Request header providers.
//!
//! Every outgoing request carries the headers produced by the registered
//! providers that report being in context. Providers are applied in
//! registration order and a later provider overrides a header set by an
//! earlier one.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use tracing::warn;

/// Client name reported in the `User-Agent` header.
pub const CLIENT_NAME: &str = "qcflow-rust-client";

/// Source of extra request headers, e.g. describing the execution environment.
pub trait RequestHeaderProvider: Send + Sync {
    /// Whether this provider applies to the current process.
    fn in_context(&self) -> bool;

    /// Headers to attach, as `(name, value)` pairs.
    fn request_headers(&self) -> Vec<(String, String)>;
}

/// Supplies `User-Agent: qcflow-rust-client/<version>`.
#[derive(Debug, Default, Clone)]
pub struct DefaultRequestHeaderProvider;

impl RequestHeaderProvider for DefaultRequestHeaderProvider {
    fn in_context(&self) -> bool {
        true
    }

    fn request_headers(&self) -> Vec<(String, String)> {
        vec![(
            USER_AGENT.as_str().to_string(),
            format!("{}/{}", CLIENT_NAME, env!("CARGO_PKG_VERSION")),
        )]
    }
}

/// Ordered chain of header providers.
#[derive(Clone)]
pub struct HeaderProviderChain {
    providers: Vec<Arc<dyn RequestHeaderProvider>>,
}

impl Default for HeaderProviderChain {
    fn default() -> Self {
        Self {
            providers: vec![Arc::new(DefaultRequestHeaderProvider)],
        }
    }
}

impl std::fmt::Debug for HeaderProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderProviderChain")
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl HeaderProviderChain {
    /// A chain with no providers at all.
    pub fn empty() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Append a provider; it wins over every provider registered before it.
    pub fn register(&mut self, provider: Arc<dyn RequestHeaderProvider>) {
        self.providers.push(provider);
    }

    /// Merge the headers of every in-context provider.
    ///
    /// Headers with names or values that are not valid HTTP are skipped with a
    /// warning rather than failing the request.
    pub fn resolve(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for provider in self.providers.iter().filter(|p| p.in_context()) {
            for (name, value) in provider.request_headers() {
                let parsed = HeaderName::from_bytes(name.as_bytes())
                    .ok()
                    .zip(HeaderValue::from_str(&value).ok());
                match parsed {
                    Some((name, value)) => {
                        headers.insert(name, value);
                    }
                    None => warn!(header = %name, "Skipping invalid request header"),
                }
            }
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvider {
        active: bool,
        headers: Vec<(&'static str, &'static str)>,
    }

    impl RequestHeaderProvider for StaticProvider {
        fn in_context(&self) -> bool {
            self.active
        }

        fn request_headers(&self) -> Vec<(String, String)> {
            self.headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        }
    }

    #[test]
    fn test_default_user_agent() {
        let headers = HeaderProviderChain::default().resolve();
        let agent = headers.get(USER_AGENT).unwrap().to_str().unwrap();
        assert_eq!(agent, format!("qcflow-rust-client/{}", env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_later_provider_overrides_earlier() {
        let mut chain = HeaderProviderChain::default();
        chain.register(Arc::new(StaticProvider {
            active: true,
            headers: vec![("User-Agent", "custom/1.0"), ("X-Env", "notebook")],
        }));

        let headers = chain.resolve();
        assert_eq!(headers.get(USER_AGENT).unwrap(), "custom/1.0");
        assert_eq!(headers.get("x-env").unwrap(), "notebook");
    }

    #[test]
    fn test_out_of_context_provider_is_ignored() {
        let mut chain = HeaderProviderChain::empty();
        chain.register(Arc::new(StaticProvider {
            active: false,
            headers: vec![("X-Env", "job")],
        }));
        assert!(chain.resolve().is_empty());
    }

    #[test]
    fn test_invalid_header_is_skipped() {
        let mut chain = HeaderProviderChain::empty();
        chain.register(Arc::new(StaticProvider {
            active: true,
            headers: vec![("bad header", "x"), ("X-Ok", "yes")],
        }));
        let headers = chain.resolve();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-ok").unwrap(), "yes");
    }
}
