//! Datasource reverse proxy.
//!
//! Requests under `/proxy/...` are classified into a [`route::ProxyRoute`], resolved against the
//! store of their scope, checked against the datasource allow-list and forwarded with the
//! datasource's credentials. Every other request goes to the rest of the API untouched.

pub mod error;
pub mod execute;
pub mod kind;
pub mod prepare;
pub mod resolve;
pub mod route;
pub mod transport;


use crate::audit::{AuditSink, ProxyAuditEvent};
use crate::secrets_crypto::Crypto;
use crate::store::{
    DashboardStore, DatasourceStore, GlobalDatasourceStore, GlobalSecretStore, SecretStore,
};
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse as _, Response};
use error::ProxyError;
use kind::ProxyKindRegistry;
use prepare::Caller;
use route::{PathClassifier, ProxyRoute};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Shared, read-only state of the proxy.
pub struct ProxyState {
    pub datasources: Arc<dyn DatasourceStore>,
    pub global_datasources: Arc<dyn GlobalDatasourceStore>,
    pub dashboards: Arc<dyn DashboardStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub global_secrets: Arc<dyn GlobalSecretStore>,
    pub crypto: Arc<dyn Crypto>,
    pub kinds: ProxyKindRegistry,
    pub classifier: PathClassifier,
    pub audit: Arc<dyn AuditSink>,
}

impl ProxyState {
    /// State over a single store that serves every resource type.
    ///
    /// # Errors
    ///
    /// Returns an error if the path templates fail to compile.
    pub fn for_store<S>(
        store: Arc<S>,
        crypto: Arc<dyn Crypto>,
        kinds: ProxyKindRegistry,
        audit: Arc<dyn AuditSink>,
    ) -> anyhow::Result<Self>
    where
        S: DatasourceStore
            + GlobalDatasourceStore
            + DashboardStore
            + SecretStore
            + GlobalSecretStore
            + 'static,
    {
        Ok(Self {
            datasources: store.clone(),
            global_datasources: store.clone(),
            dashboards: store.clone(),
            secrets: store.clone(),
            global_secrets: store,
            crypto,
            kinds,
            classifier: PathClassifier::new()?,
            audit,
        })
    }
}

/// Middleware entry point: proxy `/proxy/...` requests, pass everything else to `next`.
pub async fn proxy_middleware(
    State(state): State<Arc<ProxyState>>,
    request: Request,
    next: Next,
) -> Response {
    let classified = state
        .classifier
        .classify(&route::decode_path(request.uri().path()));
    let route = match classified {
        Ok(Some(route)) => route,
        Ok(None) => return next.run(request).await,
        Err(e) => {
            tracing::warn!(path = %request.uri().path(), "unable to classify proxy request");
            return e.into_response();
        }
    };

    let caller = Caller {
        peer: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip()),
        scheme: "http",
    };
    let method = request.method().as_str().to_string();
    let started = Instant::now();

    let response = match forward(&state, &route, request, &caller).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };

    state
        .audit
        .record(ProxyAuditEvent {
            scope: route.scope_label(),
            project: route.project().map(str::to_string),
            dashboard: route.dashboard().map(str::to_string),
            datasource: route.datasource().to_string(),
            method,
            path: route.path().to_string(),
            status: response.status().as_u16(),
            elapsed: started.elapsed(),
        })
        .await;
    response
}

async fn forward(
    state: &ProxyState,
    route: &ProxyRoute,
    request: Request,
    caller: &Caller,
) -> Result<Response<Body>, ProxyError> {
    let spec = resolve::resolve_datasource(state, route).await?;
    let scope = resolve::SecretScope::for_route(route);
    let descriptor = kind::build_descriptor(state, route, &spec, &scope).await?;
    execute::serve(descriptor, request, caller).await
}
