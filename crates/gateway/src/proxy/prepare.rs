//! Rewriting of the inbound headers before they are forwarded upstream.

use super::error::ProxyError;
use super::kind::ProxyDescriptor;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use dashproxy_model::SecretSpec;
use std::net::IpAddr;

const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Connection-scoped headers that must not travel past a proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The client side of the inbound connection.
#[derive(Debug, Clone)]
pub struct Caller {
    pub peer: Option<IpAddr>,
    pub scheme: &'static str,
}

/// Remove hop-by-hop headers, including the ones named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn first_forwarded_hop(headers: &HeaderMap) -> Option<String> {
    headers
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_blank(headers: &HeaderMap, name: &HeaderName) -> bool {
    headers.get(name).is_none_or(|v| v.is_empty())
}

/// Rewrite `headers` for the upstream of `descriptor`.
///
/// # Errors
///
/// [`ProxyError::Internal`] when a configured header is not a valid HTTP header or a credential
/// cannot be loaded. Details are logged, never returned.
pub fn prepare_request(
    descriptor: &ProxyDescriptor,
    headers: &mut HeaderMap,
    caller: &Caller,
) -> Result<(), ProxyError> {
    let real_ip = first_forwarded_hop(headers).or_else(|| caller.peer.map(|ip| ip.to_string()));

    strip_hop_by_hop(headers);
    if let Some(peer) = caller.peer {
        let forwarded = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) if !prior.is_empty() => format!("{prior}, {peer}"),
            _ => peer.to_string(),
        };
        insert(headers, X_FORWARDED_FOR, &forwarded)?;
    }

    insert(headers, header::HOST, &authority(&descriptor.config.url))?;

    if is_blank(headers, &X_REAL_IP)
        && let Some(ip) = real_ip
    {
        insert(headers, X_REAL_IP, &ip)?;
    }
    if is_blank(headers, &X_FORWARDED_PROTO) {
        insert(headers, X_FORWARDED_PROTO, caller.scheme)?;
    }

    for (name, value) in &descriptor.config.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            tracing::error!(header = %name, datasource = %descriptor.datasource, "invalid header name in datasource config");
            ProxyError::Internal
        })?;
        insert(headers, name, value)?;
    }

    if let Some(secret) = &descriptor.secret {
        setup_authentication(headers, secret).map_err(|e| {
            tracing::error!(error = %format!("{e:#}"), datasource = %descriptor.datasource, "unable to prepare the request");
            ProxyError::Internal
        })?;
    }
    Ok(())
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<(), ProxyError> {
    let value = HeaderValue::from_str(value).map_err(|_| {
        tracing::error!(header = %name, "invalid header value");
        ProxyError::Internal
    })?;
    headers.insert(name, value);
    Ok(())
}

/// Host plus port when the URL names one explicitly.
pub fn authority(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Basic auth first, then the authorization block, which wins when both are configured.
fn setup_authentication(headers: &mut HeaderMap, secret: &SecretSpec) -> anyhow::Result<()> {
    if let Some(basic) = &secret.basic_auth {
        let password = zeroize::Zeroizing::new(basic.password()?);
        let token = zeroize::Zeroizing::new(STANDARD.encode(format!(
            "{}:{}",
            basic.username,
            password.as_str()
        )));
        set_authorization(headers, &format!("Basic {}", token.as_str()))?;
    }
    if let Some(auth) = &secret.authorization {
        let value = zeroize::Zeroizing::new(auth.header_value()?);
        set_authorization(headers, &value)?;
    }
    Ok(())
}

fn set_authorization(headers: &mut HeaderMap, value: &str) -> anyhow::Result<()> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|_| anyhow::anyhow!("credentials are not a valid header value"))?;
    value.set_sensitive(true);
    headers.insert(header::AUTHORIZATION, value);
    Ok(())
}
