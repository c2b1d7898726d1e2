use super::ProxyState;
use super::error::ProxyError;
use super::route::ProxyRoute;
use dashproxy_model::{DatasourceSpec, SecretSpec};

/// Load the datasource a route points at from the store of its scope.
///
/// # Errors
///
/// [`ProxyError::NotFound`] when the datasource (or the dashboard holding it) does not exist,
/// [`ProxyError::Internal`] when the store fails.
pub async fn resolve_datasource(
    state: &ProxyState,
    route: &ProxyRoute,
) -> Result<DatasourceSpec, ProxyError> {
    let name = route.datasource();
    let found = match route {
        ProxyRoute::Global { name, .. } => state
            .global_datasources
            .get(name)
            .await
            .map(|ds| ds.map(|ds| ds.spec)),
        ProxyRoute::Project { project, name, .. } => state
            .datasources
            .get(project, name)
            .await
            .map(|ds| ds.map(|ds| ds.spec)),
        ProxyRoute::Dashboard {
            project,
            dashboard,
            name,
            ..
        } => match state.dashboards.get(project, dashboard).await {
            Ok(Some(mut db)) => {
                let embedded = db.spec.datasources.remove(name);
                if embedded.is_none() {
                    tracing::debug!(project = %project, dashboard = %dashboard, datasource = %name, "datasource not declared in dashboard");
                }
                Ok(embedded)
            }
            Ok(None) => {
                tracing::debug!(project = %project, dashboard = %dashboard, "dashboard not found");
                Ok(None)
            }
            Err(e) => Err(e),
        },
    };

    match found {
        Ok(Some(spec)) => Ok(spec),
        Ok(None) => {
            tracing::debug!(scope = route.scope_label(), datasource = %name, "datasource not found");
            Err(ProxyError::datasource_not_found(name))
        }
        Err(e) => {
            tracing::error!(
                error = %format!("{e:#}"),
                datasource = %name,
                "unable to find the datasource, something wrong with the store"
            );
            Err(ProxyError::Internal)
        }
    }
}

/// Which secret store a datasource's secret reference is looked up in.
///
/// Global datasources use global secrets. Project and dashboard datasources use the secrets of
/// their project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretScope {
    Global,
    Project(String),
}

impl SecretScope {
    pub fn for_route(route: &ProxyRoute) -> Self {
        match route {
            ProxyRoute::Global { .. } => Self::Global,
            ProxyRoute::Project { project, .. } | ProxyRoute::Dashboard { project, .. } => {
                Self::Project(project.clone())
            }
        }
    }

    /// Fetch a secret and decrypt the returned copy.
    ///
    /// # Errors
    ///
    /// [`ProxyError::NotFound`] when the secret does not exist, [`ProxyError::Internal`] when
    /// the store or the decryption fails.
    pub async fn fetch(
        &self,
        state: &ProxyState,
        datasource: &str,
        name: &str,
    ) -> Result<SecretSpec, ProxyError> {
        let found = match self {
            Self::Global => state
                .global_secrets
                .get(name)
                .await
                .map(|s| s.map(|s| s.spec)),
            Self::Project(project) => state
                .secrets
                .get(project, name)
                .await
                .map(|s| s.map(|s| s.spec)),
        };

        let mut spec = match found {
            Ok(Some(spec)) => spec,
            Ok(None) => {
                tracing::debug!(secret = %name, datasource = %datasource, "secret not found");
                return Err(ProxyError::secret_not_found(datasource, name));
            }
            Err(e) => {
                tracing::error!(
                    error = %format!("{e:#}"),
                    secret = %name,
                    datasource = %datasource,
                    "unable to find the secret attached to the datasource, something wrong with the store"
                );
                return Err(ProxyError::Internal);
            }
        };

        if let Err(e) = state.crypto.decrypt(&mut spec) {
            tracing::error!(
                error = %e,
                secret = %name,
                datasource = %datasource,
                "unable to decrypt the secret"
            );
            return Err(ProxyError::Internal);
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::SecretScope;
    use crate::proxy::route::ProxyRoute;

    #[test]
    fn scope_follows_route() {
        let global = ProxyRoute::Global {
            name: "prom".to_string(),
            path: "/".to_string(),
        };
        let dashboard = ProxyRoute::Dashboard {
            project: "p1".to_string(),
            dashboard: "d".to_string(),
            name: "ds".to_string(),
            path: "/".to_string(),
        };
        assert_eq!(SecretScope::for_route(&global), SecretScope::Global);
        assert_eq!(
            SecretScope::for_route(&dashboard),
            SecretScope::Project("p1".to_string())
        );
    }
}
