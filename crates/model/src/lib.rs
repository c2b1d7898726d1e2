//! Resource model for dashproxy.
//!
//! These are the shapes the API server persists (datasources, dashboards, secrets) and the
//! plugin-specific HTTP proxy configuration the datasource proxy forwards with.

pub mod dashboard;
pub mod datasource;
pub mod http_proxy;
pub mod metadata;
pub mod plugin;
pub mod secret;

pub use dashboard::{Dashboard, DashboardSpec};
pub use datasource::{Datasource, DatasourceSpec, Display, GlobalDatasource};
pub use http_proxy::{
    EndpointPattern, HTTP_PROXY_KIND, HttpAllowedEndpoint, HttpProxyConfigError, HttpProxySpec,
};
pub use metadata::{Metadata, ProjectMetadata, is_valid_name};
pub use plugin::Plugin;
pub use secret::{
    Authorization, BasicAuth, GlobalSecret, PemSource, Secret, SecretError, SecretSpec, TlsConfig,
};
