use anyhow::Context as _;
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use clap::Parser;
use serde::Serialize;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod audit;
mod config;
mod proxy;
mod secrets_crypto;
mod store;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LICENSE: &str = env!("CARGO_PKG_LICENSE");

/// CLI arguments for the API server.
#[derive(Parser, Debug, Clone)]
#[command(name = "dashproxy-gateway")]
#[command(
    version,
    about = "Dashboard API server with a multi-tenant datasource reverse proxy"
)]
struct CliArgs {
    /// Path to a resources config file (YAML).
    #[arg(short = 'c', long = "config", env = "DASHPROXY_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address (ip:port).
    #[arg(
        short = 'b',
        long,
        env = "DASHPROXY_BIND",
        default_value = "127.0.0.1:8080"
    )]
    bind: String,

    /// Log level. Supports tracing filter syntax.
    #[arg(
        short = 'l',
        long = "log-level",
        env = "DASHPROXY_LOG",
        default_value = "info"
    )]
    log_level: String,

    /// Key material for encrypting secrets at rest.
    #[arg(long = "secret-key", env = "DASHPROXY_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,
}

struct AppState {
    start_time: Instant,
    version: &'static str,
    config_loaded: bool,
    resources: store::ResourceCounts,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    version: &'static str,
    license: &'static str,
    uptime_secs: u64,
    config_loaded: bool,
    resources: store::ResourceCounts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(&args.log_level);

    tracing::info!("Starting dashproxy v{VERSION}");
    run(args).await
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let kinds = proxy::kind::ProxyKindRegistry::with_defaults();
    let (config, config_loaded) = load_config(&args, &kinds).await?;

    let cipher: Arc<dyn secrets_crypto::Crypto> =
        Arc::new(load_cipher(args.secret_key.as_deref())?);
    let store = Arc::new(
        store::ConfigStore::new(config, cipher.as_ref()).context("load resources into store")?,
    );

    let state = Arc::new(AppState {
        start_time: Instant::now(),
        version: VERSION,
        config_loaded,
        resources: store.counts(),
    });
    let proxy_state = Arc::new(proxy::ProxyState::for_store(
        store,
        cipher,
        kinds,
        Arc::new(audit::TracingAuditSink),
    )?);

    let bind = parse_socket_addr(&args.bind, "bind")?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind address '{bind}'"))?;
    let bound = listener.local_addr().context("get bind address")?;
    tracing::info!("Starting API HTTP server on {bound}");

    let ct = CancellationToken::new();
    spawn_shutdown_watcher(ct.clone());

    let app = app_router(state, proxy_state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        ct.cancelled().await;
    })
    .await
    .context("serve API")?;

    tracing::info!("API server shut down gracefully");
    Ok(())
}

/// API routes with the datasource proxy in front of them.
fn app_router(state: Arc<AppState>, proxy_state: Arc<proxy::ProxyState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/status", get(status))
        .fallback(not_found)
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            proxy_state,
            proxy::proxy_middleware,
        ))
}

fn load_cipher(secret_key: Option<&str>) -> anyhow::Result<secrets_crypto::SecretsCipher> {
    match secret_key {
        Some(key) if !key.is_empty() => Ok(secrets_crypto::SecretsCipher::new(key.as_bytes())),
        _ => {
            tracing::warn!(
                "DASHPROXY_SECRET_KEY is not set; generating an ephemeral key (secrets are only readable by this process)"
            );
            secrets_crypto::SecretsCipher::ephemeral()
        }
    }
}

fn spawn_shutdown_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                }
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            () = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        ct.cancel();
    });
}

async fn load_config(
    args: &CliArgs,
    kinds: &proxy::kind::ProxyKindRegistry,
) -> anyhow::Result<(config::GatewayConfig, bool)> {
    if let Some(path) = &args.config {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("read config: {}", path.display()))?;
        let cfg: config::GatewayConfig = serde_yaml::from_slice(&bytes)
            .with_context(|| format!("parse YAML config: {}", path.display()))?;
        cfg.validate(kinds)
            .with_context(|| format!("validate config: {}", path.display()))?;
        Ok((cfg, true))
    } else {
        tracing::warn!("No config file given; serving an empty resource set");
        Ok((config::GatewayConfig::default(), false))
    }
}

fn parse_socket_addr(value: &str, name: &str) -> anyhow::Result<SocketAddr> {
    value
        .parse()
        .with_context(|| format!("invalid {name} address '{value}'"))
}

async fn health() -> &'static str {
    "ok"
}

async fn ready() -> &'static str {
    "ready"
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "message": "not found" })),
    )
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: state.version,
        license: LICENSE,
        uptime_secs: state.start_time.elapsed().as_secs(),
        config_loaded: state.config_loaded,
        resources: state.resources,
    })
}

/// Initialize logging based on the log level string.
///
/// `DASHPROXY_LOG_JSON` forces JSON output even on a TTY.
fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let is_tty = atty::is(atty::Stream::Stdout);

    if is_tty && !dashproxy_env::flag("DASHPROXY_LOG_JSON") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }
}
