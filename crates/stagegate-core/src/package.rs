use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    #[serde(default, rename = "project", skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl InstalledPackage {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            project: None,
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Project identifier when known, otherwise the package name.
    pub fn project_name(&self) -> &str {
        self.project.as_deref().unwrap_or(&self.name)
    }

    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.name.starts_with(namespace)
    }
}

/// Looks up the project identifier for a package name inside `namespace`
/// (`drupal/` + `token` yields `token`). Names outside the namespace, or
/// with nested segments, have no project identifier.
pub fn project_for_name(name: &str, namespace: &str) -> Option<String> {
    let rest = name.strip_prefix(namespace)?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest.to_string())
}
