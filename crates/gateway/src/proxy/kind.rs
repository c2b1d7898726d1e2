//! Proxy kinds and the per-request proxy descriptor.

use super::ProxyState;
use super::error::ProxyError;
use super::resolve::SecretScope;
use super::route::ProxyRoute;
use super::transport::{TlsSettings, UpstreamTransport, build_transport};
use dashproxy_model::{
    DatasourceSpec, HTTP_PROXY_KIND, HttpProxyConfigError, HttpProxySpec, SecretSpec,
};
use std::collections::HashMap;
use std::sync::Arc;

/// A way of forwarding requests to a datasource, selected by the `kind` of its proxy block.
pub trait ProxyKind: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Decode and validate the kind-specific spec.
    fn validate_config(&self, spec: &serde_json::Value)
    -> Result<HttpProxySpec, HttpProxyConfigError>;

    /// Build the dedicated upstream transport for one request.
    fn build_transport(&self, secret: Option<&SecretSpec>) -> anyhow::Result<UpstreamTransport>;
}

pub struct HttpProxyKind;

impl ProxyKind for HttpProxyKind {
    fn kind(&self) -> &'static str {
        HTTP_PROXY_KIND
    }

    fn validate_config(
        &self,
        spec: &serde_json::Value,
    ) -> Result<HttpProxySpec, HttpProxyConfigError> {
        HttpProxySpec::validate_and_extract(spec)
    }

    fn build_transport(&self, secret: Option<&SecretSpec>) -> anyhow::Result<UpstreamTransport> {
        build_transport(&TlsSettings::from_secret(secret)?)
    }
}

#[derive(Clone, Default)]
pub struct ProxyKindRegistry {
    kinds: HashMap<&'static str, Arc<dyn ProxyKind>>,
}

impl ProxyKindRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(HttpProxyKind));
        registry
    }

    pub fn register(&mut self, kind: Arc<dyn ProxyKind>) {
        self.kinds.insert(kind.kind(), kind);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ProxyKind>> {
        self.kinds.get(kind)
    }
}

/// Everything needed to forward one request. Owned by that request and dropped with it.
pub struct ProxyDescriptor {
    pub datasource: String,
    pub config: HttpProxySpec,
    pub secret: Option<SecretSpec>,
    pub path: String,
    pub kind: Arc<dyn ProxyKind>,
}

/// Validate the datasource's proxy block and attach its decrypted secret.
///
/// # Errors
///
/// [`ProxyError::UnsupportedConfig`] when the proxy block is missing, of an unknown kind, or
/// invalid; secret lookup errors from [`SecretScope::fetch`].
pub async fn build_descriptor(
    state: &ProxyState,
    route: &ProxyRoute,
    spec: &DatasourceSpec,
    scope: &SecretScope,
) -> Result<ProxyDescriptor, ProxyError> {
    let datasource = route.datasource();
    let proxy = match spec.proxy() {
        Ok(Some(proxy)) => proxy,
        Ok(None) => return Err(ProxyError::kind_not_managed(&spec.plugin.kind)),
        Err(e) => {
            tracing::error!(error = %e, datasource = %datasource, "unable to decode the proxy block of the datasource");
            return Err(ProxyError::invalid_http_config());
        }
    };
    let Some(kind) = state.kinds.get(&proxy.kind) else {
        return Err(ProxyError::kind_not_managed(&proxy.kind));
    };
    let config = kind.validate_config(&proxy.spec).map_err(|e| {
        tracing::error!(error = %e, datasource = %datasource, "unable to build or find the http config in the datasource");
        ProxyError::invalid_http_config()
    })?;

    let secret = match config.secret.as_deref() {
        Some(name) if !name.is_empty() => Some(scope.fetch(state, datasource, name).await?),
        _ => None,
    };

    Ok(ProxyDescriptor {
        datasource: datasource.to_string(),
        config,
        secret,
        path: route.path().to_string(),
        kind: Arc::clone(kind),
    })
}
