//! Configuration of the `HTTPProxy` datasource proxy kind.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Kind tag of the HTTP proxy block inside a datasource plugin spec.
pub const HTTP_PROXY_KIND: &str = "HTTPProxy";

const ALLOWED_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

#[derive(Debug, thiserror::Error)]
pub enum HttpProxyConfigError {
    #[error("invalid HTTP proxy spec: {0}")]
    Spec(#[from] serde_json::Error),
    #[error("unsupported upstream URL scheme '{0}' (expected http or https)")]
    Scheme(String),
    #[error("upstream URL has no host")]
    MissingHost,
    #[error("unsupported HTTP method '{0}' in allowedEndpoints")]
    Method(String),
}

/// Regex matched against the forwarded path. Always compiled fully anchored.
#[derive(Debug, Clone)]
pub struct EndpointPattern {
    source: String,
    regex: Regex,
}

impl EndpointPattern {
    /// # Errors
    ///
    /// Returns an error when the pattern is not a valid regex.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{source})$"))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for EndpointPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for EndpointPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for EndpointPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpAllowedEndpoint {
    pub endpoint_pattern: EndpointPattern,
    pub method: String,
}

/// Forwarding policy of an HTTP datasource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxySpec {
    pub url: Url,
    /// If non-empty, only matching `(method, path)` pairs are forwarded.
    #[serde(default)]
    pub allowed_endpoints: Vec<HttpAllowedEndpoint>,
    /// Headers set on every forwarded request, overriding the caller's.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Name of the secret holding credentials / TLS material for the upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl HttpProxySpec {
    /// Decode and validate the `spec` of an `HTTPProxy` block.
    ///
    /// # Errors
    ///
    /// Returns an error when the block does not decode, the URL is not an absolute http(s) URL
    /// with a host, or an allowed endpoint names an unsupported method.
    pub fn validate_and_extract(spec: &serde_json::Value) -> Result<Self, HttpProxyConfigError> {
        let cfg: Self = serde_json::from_value(spec.clone())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), HttpProxyConfigError> {
        match self.url.scheme() {
            "http" | "https" => {}
            other => return Err(HttpProxyConfigError::Scheme(other.to_string())),
        }
        if self.url.host_str().is_none_or(str::is_empty) {
            return Err(HttpProxyConfigError::MissingHost);
        }
        for ep in &self.allowed_endpoints {
            if !ALLOWED_METHODS.contains(&ep.method.as_str()) {
                return Err(HttpProxyConfigError::Method(ep.method.clone()));
            }
        }
        Ok(())
    }

    /// Allow-list check. Empty list allows everything; otherwise default-deny.
    #[must_use]
    pub fn is_allowed(&self, method: &str, path: &str) -> bool {
        self.allowed_endpoints.is_empty()
            || self
                .allowed_endpoints
                .iter()
                .any(|ep| ep.method == method && ep.endpoint_pattern.is_match(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prometheus_spec() -> HttpProxySpec {
        HttpProxySpec::validate_and_extract(&json!({
            "url": "http://prometheus:9090",
            "allowedEndpoints": [
                {"endpointPattern": "/api/v1/labels", "method": "POST"},
                {"endpointPattern": "/api/v1/query_range", "method": "POST"},
                {"endpointPattern": "/api/v1/label/([a-zA-Z0-9_-]+)/values", "method": "GET"},
            ],
            "secret": "prom-basic",
        }))
        .expect("valid spec")
    }

    #[test]
    fn allow_list_requires_method_and_full_path_match() {
        let spec = prometheus_spec();
        assert!(spec.is_allowed("POST", "/api/v1/labels"));
        assert!(spec.is_allowed("GET", "/api/v1/label/job/values"));
        assert!(!spec.is_allowed("GET", "/api/v1/labels"));
        assert!(!spec.is_allowed("POST", "/api/v1/labels/extra"));
        assert!(!spec.is_allowed("POST", "/prefix/api/v1/labels"));
        assert!(!spec.is_allowed("DELETE", "/api/v1/admin/tsdb/delete_series"));
    }

    #[test]
    fn empty_allow_list_allows_everything() {
        let spec = HttpProxySpec::validate_and_extract(&json!({"url": "https://example.com"}))
            .expect("valid spec");
        assert!(spec.is_allowed("DELETE", "/anything"));
        assert!(spec.secret.is_none());
    }

    #[test]
    fn rejects_non_http_scheme_and_bad_method_and_bad_pattern() {
        assert!(matches!(
            HttpProxySpec::validate_and_extract(&json!({"url": "ftp://example.com"})),
            Err(HttpProxyConfigError::Scheme(_))
        ));
        assert!(matches!(
            HttpProxySpec::validate_and_extract(&json!({
                "url": "http://example.com",
                "allowedEndpoints": [{"endpointPattern": "/x", "method": "get"}],
            })),
            Err(HttpProxyConfigError::Method(_))
        ));
        assert!(matches!(
            HttpProxySpec::validate_and_extract(&json!({
                "url": "http://example.com",
                "allowedEndpoints": [{"endpointPattern": "([", "method": "GET"}],
            })),
            Err(HttpProxyConfigError::Spec(_))
        ));
        assert!(matches!(
            HttpProxySpec::validate_and_extract(&json!({"headers": {}})),
            Err(HttpProxyConfigError::Spec(_))
        ));
    }

    #[test]
    fn endpoint_pattern_serializes_as_source() {
        let p = EndpointPattern::new("/api/.*").expect("valid");
        assert_eq!(serde_json::to_value(&p).expect("serialize"), json!("/api/.*"));
        assert_eq!(p.as_str(), "/api/.*");
    }
}
