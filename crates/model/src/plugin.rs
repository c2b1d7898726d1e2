use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A kind-tagged, plugin-specific configuration blob.
///
/// The `spec` is opaque at this layer; the consumer that understands `kind` interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPlugin")]
pub struct Plugin {
    pub kind: String,
    pub spec: Value,
}

#[derive(Deserialize)]
struct RawPlugin {
    kind: String,
    #[serde(default)]
    spec: Value,
}

impl TryFrom<RawPlugin> for Plugin {
    type Error = String;

    fn try_from(raw: RawPlugin) -> Result<Self, Self::Error> {
        if raw.kind.trim().is_empty() {
            return Err("kind cannot be empty".to_string());
        }
        Ok(Self {
            kind: raw.kind,
            spec: raw.spec,
        })
    }
}
