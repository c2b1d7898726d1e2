use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures of the datasource proxy, each mapped to the status the caller sees.
///
/// Variants carry only caller-safe text. Internal detail is logged where the failure happens.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unable to forward the request to the datasource, request not properly formatted")]
    Malformed,

    #[error("{0}")]
    NotFound(String),

    #[error("you are not allowed to use this endpoint {path:?} with the HTTP method {method}")]
    Forbidden { path: String, method: String },

    #[error("{0}")]
    UnsupportedConfig(String),

    #[error("unable to build the TLS config")]
    TlsConfig,

    #[error("internal server error")]
    Internal,

    #[error("unable to reach the datasource")]
    Upstream,
}

impl ProxyError {
    pub fn datasource_not_found(datasource: &str) -> Self {
        Self::NotFound(format!(
            "unable to forward the request to the datasource {datasource:?}, datasource doesn't exist"
        ))
    }

    pub fn secret_not_found(datasource: &str, secret: &str) -> Self {
        Self::NotFound(format!(
            "unable to forward the request to the datasource {datasource:?}, secret {secret:?} attached doesn't exist"
        ))
    }

    pub fn kind_not_managed(kind: &str) -> Self {
        Self::UnsupportedConfig(format!("datasource type '{kind}' not managed"))
    }

    pub fn invalid_http_config() -> Self {
        Self::UnsupportedConfig("unable to find the http config".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Malformed | Self::UnsupportedConfig(_) | Self::TlsConfig | Self::Upstream => {
                StatusCode::BAD_GATEWAY
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
