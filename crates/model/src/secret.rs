//! Secret material attached to datasources: basic auth, authorization header and TLS.

use crate::metadata::{Metadata, ProjectMetadata};
use dashproxy_env::serde_helpers::{deserialize_option_string_env, deserialize_string_env};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("both '{0}' and '{0}File' are set")]
    Conflict(&'static str),
    #[error("failed to read '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a piece of PEM material comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemSource<'a> {
    Inline(&'a str),
    File(&'a str),
}

impl PemSource<'_> {
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    pub fn load(&self) -> Result<Vec<u8>, SecretError> {
        match self {
            PemSource::Inline(pem) => Ok(pem.as_bytes().to_vec()),
            PemSource::File(path) => std::fs::read(path).map_err(|source| SecretError::Read {
                path: PathBuf::from(path),
                source,
            }),
        }
    }
}

fn pick<'a>(
    field: &'static str,
    inline: Option<&'a str>,
    file: Option<&'a str>,
) -> Result<Option<PemSource<'a>>, SecretError> {
    match (inline, file) {
        (Some(_), Some(_)) => Err(SecretError::Conflict(field)),
        (Some(v), None) => Ok(Some(PemSource::Inline(v))),
        (None, Some(f)) => Ok(Some(PemSource::File(f))),
        (None, None) => Ok(None),
    }
}

fn read_trimmed(path: &str) -> Result<String, SecretError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SecretError::Read {
        path: PathBuf::from(path),
        source,
    })?;
    Ok(raw.trim_end_matches(['\r', '\n']).to_string())
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Zeroize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuth {
    #[serde(deserialize_with = "deserialize_string_env")]
    pub username: String,
    #[serde(
        default,
        deserialize_with = "deserialize_option_string_env",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<String>,
}

impl BasicAuth {
    /// Password from the inline value or the password file.
    ///
    /// # Errors
    ///
    /// Returns an error when both sources are set or the file cannot be read.
    pub fn password(&self) -> Result<String, SecretError> {
        match (&self.password, &self.password_file) {
            (Some(_), Some(_)) => Err(SecretError::Conflict("password")),
            (Some(p), None) => Ok(p.clone()),
            (None, Some(f)) => read_trimmed(f),
            (None, None) => Ok(String::new()),
        }
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("password_file", &self.password_file)
            .finish()
    }
}

fn default_authorization_type() -> String {
    "Bearer".to_string()
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Zeroize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    #[serde(rename = "type", default = "default_authorization_type")]
    pub kind: String,
    #[serde(
        default,
        deserialize_with = "deserialize_option_string_env",
        skip_serializing_if = "Option::is_none"
    )]
    pub credentials: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,
}

impl Default for Authorization {
    fn default() -> Self {
        Self {
            kind: default_authorization_type(),
            credentials: None,
            credentials_file: None,
        }
    }
}

impl Authorization {
    /// # Errors
    ///
    /// Returns an error when both sources are set or the file cannot be read.
    pub fn credentials(&self) -> Result<String, SecretError> {
        match (&self.credentials, &self.credentials_file) {
            (Some(_), Some(_)) => Err(SecretError::Conflict("credentials")),
            (Some(c), None) => Ok(c.clone()),
            (None, Some(f)) => read_trimmed(f),
            (None, None) => Ok(String::new()),
        }
    }

    /// Full `Authorization` header value, e.g. `Bearer abc`.
    ///
    /// # Errors
    ///
    /// See [`Authorization::credentials`].
    pub fn header_value(&self) -> Result<String, SecretError> {
        Ok(format!("{} {}", self.kind, self.credentials()?))
    }
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorization")
            .field("type", &self.kind)
            .field("credentials", &self.credentials.as_ref().map(|_| "[REDACTED]"))
            .field("credentials_file", &self.credentials_file)
            .finish()
    }
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Zeroize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_option_string_env",
        skip_serializing_if = "Option::is_none"
    )]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    /// Name the upstream certificate is verified against instead of the URL host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// # Errors
    ///
    /// Returns an error when both `ca` and `caFile` are set.
    pub fn ca_source(&self) -> Result<Option<PemSource<'_>>, SecretError> {
        pick("ca", self.ca.as_deref(), self.ca_file.as_deref())
    }

    /// # Errors
    ///
    /// Returns an error when both `cert` and `certFile` are set.
    pub fn cert_source(&self) -> Result<Option<PemSource<'_>>, SecretError> {
        pick("cert", self.cert.as_deref(), self.cert_file.as_deref())
    }

    /// # Errors
    ///
    /// Returns an error when both `key` and `keyFile` are set.
    pub fn key_source(&self) -> Result<Option<PemSource<'_>>, SecretError> {
        pick("key", self.key.as_deref(), self.key_file.as_deref())
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("ca", &self.ca.as_ref().map(|_| "<pem>"))
            .field("cert", &self.cert.as_ref().map(|_| "<pem>"))
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("ca_file", &self.ca_file)
            .field("cert_file", &self.cert_file)
            .field("key_file", &self.key_file)
            .field("server_name", &self.server_name)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// Credentials and TLS material for one upstream.
///
/// Stored encrypted; the proxy decrypts a private copy per request, which is wiped on drop.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct SecretSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
}

impl std::fmt::Debug for SecretSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSpec")
            .field("basic_auth", &self.basic_auth)
            .field("authorization", &self.authorization)
            .field("tls_config", &self.tls_config)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub metadata: ProjectMetadata,
    pub spec: SecretSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSecret {
    pub metadata: Metadata,
    pub spec: SecretSpec,
}
