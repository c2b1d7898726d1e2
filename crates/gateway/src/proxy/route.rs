//! Classification of inbound paths into proxy routes.

use super::error::ProxyError;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::borrow::Cow;

const ID: &str = "[a-zA-Z0-9_-]+";

/// Where a proxied datasource lives, plus the path to forward to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRoute {
    Global {
        name: String,
        path: String,
    },
    Project {
        project: String,
        name: String,
        path: String,
    },
    Dashboard {
        project: String,
        dashboard: String,
        name: String,
        path: String,
    },
}

impl ProxyRoute {
    /// Name of the datasource as addressed in the URL.
    pub fn datasource(&self) -> &str {
        match self {
            Self::Global { name, .. } | Self::Project { name, .. } | Self::Dashboard { name, .. } => {
                name
            }
        }
    }

    /// Path forwarded upstream. Never empty.
    pub fn path(&self) -> &str {
        match self {
            Self::Global { path, .. } | Self::Project { path, .. } | Self::Dashboard { path, .. } => {
                path
            }
        }
    }

    pub fn project(&self) -> Option<&str> {
        match self {
            Self::Global { .. } => None,
            Self::Project { project, .. } | Self::Dashboard { project, .. } => Some(project),
        }
    }

    pub fn dashboard(&self) -> Option<&str> {
        match self {
            Self::Dashboard { dashboard, .. } => Some(dashboard),
            _ => None,
        }
    }

    pub fn scope_label(&self) -> &'static str {
        match self {
            Self::Global { .. } => "global",
            Self::Project { .. } => "project",
            Self::Dashboard { .. } => "dashboard",
        }
    }
}

/// Percent-decode a request path. Classification, the allow-list and the forwarded path all
/// work on the decoded form; invalid UTF-8 is replaced.
pub fn decode_path(raw: &str) -> Cow<'_, str> {
    percent_decode_str(raw).decode_utf8_lossy()
}

#[derive(Debug, Clone, Copy)]
enum Template {
    Global,
    Project,
    Dashboard,
}

/// Matches request paths against the three proxy URL templates.
///
/// Templates are anchored at both ends, so `/api/proxy/globaldatasources/x` is not a proxy
/// request.
#[derive(Debug, Clone)]
pub struct PathClassifier {
    templates: Vec<(Template, Regex)>,
}

impl PathClassifier {
    /// # Errors
    ///
    /// Returns an error if a template fails to compile.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            templates: vec![
                (
                    Template::Global,
                    Regex::new(&format!("^/proxy/globaldatasources/({ID})(/.*)?$"))?,
                ),
                (
                    Template::Project,
                    Regex::new(&format!("^/proxy/projects/({ID})/datasources/({ID})(/.*)?$"))?,
                ),
                (
                    Template::Dashboard,
                    Regex::new(&format!(
                        "^/proxy/projects/({ID})/dashboards/({ID})/datasources/({ID})(/.*)?$"
                    ))?,
                ),
            ],
        })
    }

    /// Classify a request path.
    ///
    /// `Ok(None)` means the path is not a proxy request and belongs to the rest of the API.
    ///
    /// # Errors
    ///
    /// [`ProxyError::Malformed`] when the path matches several templates, or when the matching
    /// template does not yield exactly one capture set.
    pub fn classify(&self, path: &str) -> Result<Option<ProxyRoute>, ProxyError> {
        let mut matching = self.templates.iter().filter(|(_, re)| re.is_match(path));
        let Some((template, re)) = matching.next() else {
            return Ok(None);
        };
        if matching.next().is_some() {
            return Err(ProxyError::Malformed);
        }

        let mut sets = re.captures_iter(path);
        let (Some(caps), None) = (sets.next(), sets.next()) else {
            return Err(ProxyError::Malformed);
        };
        let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string());
        let forwarded = |i: usize| {
            caps.get(i)
                .map(|m| m.as_str())
                .filter(|p| !p.is_empty())
                .unwrap_or("/")
                .to_string()
        };

        let route = match template {
            Template::Global => ProxyRoute::Global {
                name: group(1).ok_or(ProxyError::Malformed)?,
                path: forwarded(2),
            },
            Template::Project => ProxyRoute::Project {
                project: group(1).ok_or(ProxyError::Malformed)?,
                name: group(2).ok_or(ProxyError::Malformed)?,
                path: forwarded(3),
            },
            Template::Dashboard => ProxyRoute::Dashboard {
                project: group(1).ok_or(ProxyError::Malformed)?,
                dashboard: group(2).ok_or(ProxyError::Malformed)?,
                name: group(3).ok_or(ProxyError::Malformed)?,
                path: forwarded(4),
            },
        };
        Ok(Some(route))
    }
}
