use crate::datasource::{DatasourceSpec, Display};
use crate::metadata::ProjectMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<Display>,
    /// Datasources embedded in the dashboard, keyed by the name panels refer to.
    #[serde(default)]
    pub datasources: BTreeMap<String, DatasourceSpec>,
    /// Panels, layouts, variables and the rest of the dashboard body. Not interpreted here.
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub metadata: ProjectMetadata,
    pub spec: DashboardSpec,
}
