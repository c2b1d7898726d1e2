use crate::config::GatewayConfig;
use crate::secrets_crypto::Crypto;
use anyhow::Context as _;
use async_trait::async_trait;
use dashproxy_model::{
    Dashboard, Datasource, GlobalDatasource, GlobalSecret, Metadata, ProjectMetadata, Secret,
    SecretSpec,
};
use std::collections::BTreeMap;

// Store contracts consumed by the proxy. `Ok(None)` is "not found"; `Err` is a storage failure.

#[async_trait]
pub trait DatasourceStore: Send + Sync {
    async fn get(&self, project: &str, name: &str) -> anyhow::Result<Option<Datasource>>;
}

#[async_trait]
pub trait GlobalDatasourceStore: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<Option<GlobalDatasource>>;
}

#[async_trait]
pub trait DashboardStore: Send + Sync {
    async fn get(&self, project: &str, name: &str) -> anyhow::Result<Option<Dashboard>>;
}

/// Secrets are returned as stored, i.e. encrypted.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, project: &str, name: &str) -> anyhow::Result<Option<Secret>>;
}

/// Secrets are returned as stored, i.e. encrypted.
#[async_trait]
pub trait GlobalSecretStore: Send + Sync {
    async fn get(&self, name: &str) -> anyhow::Result<Option<GlobalSecret>>;
}

/// Resource counts reported by `/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCounts {
    pub projects: usize,
    pub global_datasources: usize,
    pub global_secrets: usize,
    pub datasources: usize,
    pub secrets: usize,
    pub dashboards: usize,
}

/// In-memory store backed by the config file.
///
/// Secrets are encrypted once at construction so that, like a database-backed store, it only
/// ever hands out ciphertext.
pub struct ConfigStore {
    config: GatewayConfig,
}

impl ConfigStore {
    /// # Errors
    ///
    /// Returns an error if a secret cannot be encrypted.
    pub fn new(mut config: GatewayConfig, crypto: &dyn Crypto) -> anyhow::Result<Self> {
        for (name, spec) in &mut config.global_secrets {
            crypto
                .encrypt(spec)
                .with_context(|| format!("encrypt global secret '{name}'"))?;
        }
        for (project, p) in &mut config.projects {
            for (name, spec) in &mut p.secrets {
                crypto
                    .encrypt(spec)
                    .with_context(|| format!("encrypt secret '{project}/{name}'"))?;
            }
        }
        Ok(Self { config })
    }

    pub fn counts(&self) -> ResourceCounts {
        let projects = self.config.projects.values();
        ResourceCounts {
            projects: self.config.projects.len(),
            global_datasources: self.config.global_datasources.len(),
            global_secrets: self.config.global_secrets.len(),
            datasources: projects.clone().map(|p| p.datasources.len()).sum(),
            secrets: projects.clone().map(|p| p.secrets.len()).sum(),
            dashboards: projects.map(|p| p.dashboards.len()).sum(),
        }
    }

    fn project_secret(&self, project: &str, name: &str) -> Option<&SecretSpec> {
        self.config.projects.get(project)?.secrets.get(name)
    }
}

fn project_metadata(project: &str, name: &str) -> ProjectMetadata {
    ProjectMetadata {
        project: project.to_string(),
        name: name.to_string(),
    }
}

#[async_trait]
impl DatasourceStore for ConfigStore {
    async fn get(&self, project: &str, name: &str) -> anyhow::Result<Option<Datasource>> {
        Ok(self
            .config
            .projects
            .get(project)
            .and_then(|p| p.datasources.get(name))
            .map(|spec| Datasource {
                metadata: project_metadata(project, name),
                spec: spec.clone(),
            }))
    }
}

#[async_trait]
impl GlobalDatasourceStore for ConfigStore {
    async fn get(&self, name: &str) -> anyhow::Result<Option<GlobalDatasource>> {
        Ok(self
            .config
            .global_datasources
            .get(name)
            .map(|spec| GlobalDatasource {
                metadata: Metadata {
                    name: name.to_string(),
                },
                spec: spec.clone(),
            }))
    }
}

#[async_trait]
impl DashboardStore for ConfigStore {
    async fn get(&self, project: &str, name: &str) -> anyhow::Result<Option<Dashboard>> {
        Ok(self
            .config
            .projects
            .get(project)
            .and_then(|p| p.dashboards.get(name))
            .map(|spec| Dashboard {
                metadata: project_metadata(project, name),
                spec: spec.clone(),
            }))
    }
}

#[async_trait]
impl SecretStore for ConfigStore {
    async fn get(&self, project: &str, name: &str) -> anyhow::Result<Option<Secret>> {
        Ok(self.project_secret(project, name).map(|spec| Secret {
            metadata: project_metadata(project, name),
            spec: spec.clone(),
        }))
    }
}

#[async_trait]
impl GlobalSecretStore for ConfigStore {
    async fn get(&self, name: &str) -> anyhow::Result<Option<GlobalSecret>> {
        Ok(self
            .config
            .global_secrets
            .get(name)
            .map(|spec| GlobalSecret {
                metadata: Metadata {
                    name: name.to_string(),
                },
                spec: spec.clone(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ConfigStore, DashboardStore, DatasourceStore, GlobalDatasourceStore, GlobalSecretStore,
        ResourceCounts, SecretStore,
    };
    use crate::config::GatewayConfig;
    use crate::secrets_crypto::{Crypto as _, SecretsCipher};

    fn config() -> anyhow::Result<GatewayConfig> {
        Ok(serde_yaml::from_str(
            r"
globalDatasources:
  prom:
    plugin:
      kind: PrometheusDatasource
globalSecrets:
  shared:
    authorization:
      credentials: global-token
projects:
  p1:
    datasources:
      local:
        plugin:
          kind: PrometheusDatasource
    secrets:
      creds:
        basicAuth:
          username: u
          password: p
    dashboards:
      d1:
        datasources:
          inline:
            plugin:
              kind: PrometheusDatasource
",
        )?)
    }

    #[tokio::test]
    async fn lookups_return_none_when_missing() -> anyhow::Result<()> {
        let cipher = SecretsCipher::new(b"k");
        let store = ConfigStore::new(config()?, &cipher)?;

        assert!(GlobalDatasourceStore::get(&store, "prom").await?.is_some());
        assert!(GlobalDatasourceStore::get(&store, "nope").await?.is_none());
        let ds = DatasourceStore::get(&store, "p1", "local")
            .await?
            .expect("project datasource");
        assert_eq!(ds.metadata.project, "p1");
        assert!(DatasourceStore::get(&store, "p2", "local").await?.is_none());
        let db = DashboardStore::get(&store, "p1", "d1").await?.expect("dashboard");
        assert!(db.spec.datasources.contains_key("inline"));
        assert!(SecretStore::get(&store, "p1", "missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn secrets_are_stored_encrypted() -> anyhow::Result<()> {
        let cipher = SecretsCipher::new(b"k");
        let store = ConfigStore::new(config()?, &cipher)?;

        let secret = SecretStore::get(&store, "p1", "creds")
            .await?
            .expect("project secret");
        let mut spec = secret.spec.clone();
        let stored = spec
            .basic_auth
            .as_ref()
            .and_then(|b| b.password.clone())
            .unwrap_or_default();
        assert!(stored.starts_with("enc:v1:"));
        cipher.decrypt(&mut spec)?;
        assert_eq!(
            spec.basic_auth.as_ref().and_then(|b| b.password.as_deref()),
            Some("p")
        );

        let global = GlobalSecretStore::get(&store, "shared")
            .await?
            .expect("global secret");
        let mut spec = global.spec.clone();
        cipher.decrypt(&mut spec)?;
        assert_eq!(
            spec.authorization.as_ref().and_then(|a| a.credentials.as_deref()),
            Some("global-token")
        );
        Ok(())
    }

    #[test]
    fn counts_cover_all_resources() -> anyhow::Result<()> {
        let store = ConfigStore::new(config()?, &SecretsCipher::new(b"k"))?;
        assert_eq!(
            store.counts(),
            ResourceCounts {
                projects: 1,
                global_datasources: 1,
                global_secrets: 1,
                datasources: 1,
                secrets: 1,
                dashboards: 1,
            }
        );
        Ok(())
    }
}
