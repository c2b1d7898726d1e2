use dashproxy_model::{DashboardSpec, DatasourceSpec, SecretSpec, is_valid_name};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::proxy::kind::ProxyKindRegistry;

/// Config-file resources served by the API server.
///
/// Layout:
/// - `globalDatasources` / `globalSecrets` are visible to every project
/// - `projects.<name>` owns datasources, secrets and dashboards
///
/// Secrets are written in plaintext here (optionally via `${ENV}` references) and encrypted
/// when the store is built.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default)]
    pub global_datasources: BTreeMap<String, DatasourceSpec>,
    #[serde(default)]
    pub global_secrets: BTreeMap<String, SecretSpec>,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub datasources: BTreeMap<String, DatasourceSpec>,
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretSpec>,
    #[serde(default)]
    pub dashboards: BTreeMap<String, DashboardSpec>,
}

impl GatewayConfig {
    /// Check resource names and every proxy block whose kind the registry knows.
    ///
    /// Unknown kinds are accepted here and rejected per request.
    ///
    /// # Errors
    ///
    /// Returns the first invalid name or proxy block, with its location in the file.
    pub fn validate(&self, registry: &ProxyKindRegistry) -> anyhow::Result<()> {
        check_names("globalSecrets", self.global_secrets.keys())?;
        check_names("globalDatasources", self.global_datasources.keys())?;
        for (name, spec) in &self.global_datasources {
            check_proxy(&format!("globalDatasources.{name}"), spec, registry)?;
        }

        check_names("projects", self.projects.keys())?;
        for (project, p) in &self.projects {
            check_names(&format!("projects.{project}.secrets"), p.secrets.keys())?;
            check_names(&format!("projects.{project}.datasources"), p.datasources.keys())?;
            check_names(&format!("projects.{project}.dashboards"), p.dashboards.keys())?;
            for (name, spec) in &p.datasources {
                check_proxy(
                    &format!("projects.{project}.datasources.{name}"),
                    spec,
                    registry,
                )?;
            }
            for (dashboard, d) in &p.dashboards {
                check_names(
                    &format!("projects.{project}.dashboards.{dashboard}.datasources"),
                    d.datasources.keys(),
                )?;
                for (name, spec) in &d.datasources {
                    check_proxy(
                        &format!("projects.{project}.dashboards.{dashboard}.datasources.{name}"),
                        spec,
                        registry,
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn check_names<'a>(at: &str, names: impl Iterator<Item = &'a String>) -> anyhow::Result<()> {
    for name in names {
        if !is_valid_name(name) {
            anyhow::bail!("{at}: invalid name '{name}' (allowed: letters, digits, '_' and '-')");
        }
    }
    Ok(())
}

fn check_proxy(at: &str, spec: &DatasourceSpec, registry: &ProxyKindRegistry) -> anyhow::Result<()> {
    let proxy = spec
        .proxy()
        .map_err(|e| anyhow::anyhow!("{at}.plugin.spec.proxy: {e}"))?;
    let Some(proxy) = proxy else {
        return Ok(());
    };
    if let Some(kind) = registry.get(&proxy.kind) {
        kind.validate_config(&proxy.spec)
            .map_err(|e| anyhow::anyhow!("{at}.plugin.spec.proxy: {e}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::GatewayConfig;
    use crate::proxy::kind::ProxyKindRegistry;

    #[test]
    fn parses_full_layout() -> anyhow::Result<()> {
        let cfg: GatewayConfig = serde_yaml::from_str(
            r"
globalDatasources:
  prom:
    default: true
    plugin:
      kind: PrometheusDatasource
      spec:
        proxy:
          kind: HTTPProxy
          spec:
            url: http://prometheus:9090
            secret: prom-basic
globalSecrets:
  prom-basic:
    basicAuth:
      username: admin
      password: s3cr3t
projects:
  perses:
    datasources:
      local:
        plugin:
          kind: PrometheusDatasource
          spec:
            proxy:
              kind: HTTPProxy
              spec:
                url: https://prom.internal
                allowedEndpoints:
                  - endpointPattern: /api/v1/query
                    method: POST
    dashboards:
      Demo:
        panels: {}
        datasources:
          ds-key:
            plugin:
              kind: PrometheusDatasource
              spec:
                proxy:
                  kind: HTTPProxy
                  spec:
                    url: http://127.0.0.1:9090
",
        )?;
        cfg.validate(&ProxyKindRegistry::with_defaults())?;
        assert_eq!(cfg.global_datasources.len(), 1);
        assert!(cfg.global_secrets.contains_key("prom-basic"));
        let project = &cfg.projects["perses"];
        assert_eq!(project.datasources.len(), 1);
        assert!(project.dashboards["Demo"].datasources.contains_key("ds-key"));
        Ok(())
    }

    #[test]
    fn rejects_invalid_names() -> anyhow::Result<()> {
        let cfg: GatewayConfig = serde_yaml::from_str(
            r"
projects:
  bad.project: {}
",
        )?;
        let err = cfg
            .validate(&ProxyKindRegistry::with_defaults())
            .expect_err("dot is not allowed");
        assert!(err.to_string().contains("bad.project"));
        Ok(())
    }

    #[test]
    fn rejects_invalid_proxy_block_with_location() -> anyhow::Result<()> {
        let cfg: GatewayConfig = serde_yaml::from_str(
            r"
globalDatasources:
  prom:
    plugin:
      kind: PrometheusDatasource
      spec:
        proxy:
          kind: HTTPProxy
          spec:
            url: ftp://prometheus
",
        )?;
        let err = cfg
            .validate(&ProxyKindRegistry::with_defaults())
            .expect_err("ftp is rejected");
        assert!(err.to_string().contains("globalDatasources.prom"));
        Ok(())
    }

    #[test]
    fn unknown_proxy_kind_is_accepted_at_load() -> anyhow::Result<()> {
        let cfg: GatewayConfig = serde_yaml::from_str(
            r"
globalDatasources:
  sql:
    plugin:
      kind: SQLDatasource
      spec:
        proxy:
          kind: SQLProxy
          spec: {}
",
        )?;
        cfg.validate(&ProxyKindRegistry::with_defaults())?;
        Ok(())
    }
}
