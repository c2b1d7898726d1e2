use crate::metadata::{Metadata, ProjectMetadata};
use crate::plugin::Plugin;
use serde::{Deserialize, Serialize};

/// Human-facing labels for a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Display {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<Display>,
    /// Whether this datasource is the default one for its plugin kind.
    #[serde(default)]
    pub default: bool,
    pub plugin: Plugin,
}

impl DatasourceSpec {
    /// The proxy block embedded in the plugin spec (`plugin.spec.proxy`), if any.
    ///
    /// # Errors
    ///
    /// Returns an error when a `proxy` field exists but is not a valid kind-tagged plugin.
    pub fn proxy(&self) -> Result<Option<Plugin>, serde_json::Error> {
        match self.plugin.spec.get("proxy") {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(raw) => serde_json::from_value(raw.clone()).map(Some),
        }
    }
}

/// A datasource owned by a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    pub metadata: ProjectMetadata,
    pub spec: DatasourceSpec,
}

/// A datasource visible to every project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalDatasource {
    pub metadata: Metadata,
    pub spec: DatasourceSpec,
}

#[cfg(test)]
mod tests {
    use super::DatasourceSpec;

    #[test]
    fn proxy_block_is_extracted_from_plugin_spec() {
        let spec: DatasourceSpec = serde_yaml::from_str(
            r"
default: true
plugin:
  kind: PrometheusDatasource
  spec:
    proxy:
      kind: HTTPProxy
      spec:
        url: http://prometheus:9090
",
        )
        .expect("valid yaml");

        assert!(spec.default);
        let proxy = spec.proxy().expect("proxy parses").expect("proxy present");
        assert_eq!(proxy.kind, "HTTPProxy");
        assert_eq!(proxy.spec["url"], "http://prometheus:9090");
    }

    #[test]
    fn missing_proxy_block_is_none() {
        let spec: DatasourceSpec = serde_yaml::from_str(
            r"
plugin:
  kind: PrometheusDatasource
  spec:
    directUrl: http://prometheus:9090
",
        )
        .expect("valid yaml");
        assert!(spec.proxy().expect("no error").is_none());
    }

    #[test]
    fn proxy_block_without_kind_is_an_error() {
        let spec: DatasourceSpec = serde_yaml::from_str(
            r"
plugin:
  kind: PrometheusDatasource
  spec:
    proxy:
      spec: {}
",
        )
        .expect("valid yaml");
        assert!(spec.proxy().is_err());
    }
}
