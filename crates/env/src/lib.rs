/// Parse a boolean-like env var.
///
/// Truthy values (case-insensitive): `1`, `true`, `yes`, `y`, `on`.
#[must_use]
pub fn flag(name: &str) -> bool {
    matches!(
        std::env::var(name)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Expand `${VAR}` occurrences in a string using environment variables.
///
/// An unterminated `${` is kept verbatim.
///
/// # Errors
///
/// Returns `Err(...)` when a referenced environment variable is not set.
pub fn expand_env_string(s: &str) -> Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(dollar_pos) = rest.find("${") {
        out.push_str(&rest[..dollar_pos]);
        let after = &rest[dollar_pos + 2..];
        let Some(end_pos) = after.find('}') else {
            out.push_str(&rest[dollar_pos..]);
            return Ok(out);
        };
        let var_name = &after[..end_pos];
        let var_value = std::env::var(var_name).map_err(|_| {
            format!("Environment variable '{var_name}' not found (referenced in config)")
        })?;
        out.push_str(&var_value);
        rest = &after[end_pos + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

pub mod serde_helpers {
    use super::expand_env_string;
    use serde::{Deserialize, Deserializer};

    /// Deserialize a `String` that may reference `${ENV}`.
    ///
    /// # Errors
    ///
    /// Returns an error when the value is not a string or when env expansion fails.
    pub fn deserialize_string_env<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as DeError;

        let raw = String::deserialize(deserializer)?;
        expand_env_string(&raw).map_err(D::Error::custom)
    }

    /// Deserialize `Option<String>` that may reference `${ENV}` inside the string.
    ///
    /// Supported JSON forms: `null` or string.
    ///
    /// # Errors
    ///
    /// Returns an error when the value is neither null nor a string, or when env expansion
    /// fails.
    pub fn deserialize_option_string_env<'de, D>(
        deserializer: D,
    ) -> std::result::Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as DeError;

        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => {
                expand_env_string(&s).map(Some).map_err(D::Error::custom)
            }
            Some(other) => Err(D::Error::custom(format!(
                "expected string or null, got {other}"
            ))),
        }
    }
}
