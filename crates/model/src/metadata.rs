use serde::{Deserialize, Serialize};

/// Metadata of a globally scoped resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
}

/// Metadata of a resource that lives inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub project: String,
    pub name: String,
}

/// Resource names (projects, dashboards, datasources, secrets) are restricted to
/// `[a-zA-Z0-9_-]+` so they can be addressed unambiguously from a URL path.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::is_valid_name;

    #[test]
    fn names_follow_path_segment_charset() {
        assert!(is_valid_name("prom-1_a"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name("a.b"));
        assert!(!is_valid_name("é"));
    }
}
