use std::sync::OnceLock;

use regex::Regex;

use crate::BatchError;

fn machine_name() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("machine name pattern is valid"))
}

/// A project to install, given either as a machine name or as a project
/// page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallQuery {
    pub project: String,
}

impl InstallQuery {
    pub fn parse(input: &str, url_prefix: &str) -> Result<Self, BatchError> {
        let input = input.trim();
        let project = if input.contains("://") {
            let Some(rest) = input.strip_prefix(url_prefix) else {
                return Err(BatchError::InvalidQuery(format!(
                    "The project URL must start with {url_prefix}."
                )));
            };
            rest.trim_end_matches('/')
        } else {
            input
        };

        if !machine_name().is_match(project) {
            return Err(BatchError::InvalidQuery(
                "The project name must be a valid machine name.".to_string(),
            ));
        }
        Ok(Self {
            project: project.to_string(),
        })
    }

    pub fn package_name(&self, namespace: &str) -> String {
        format!("{namespace}{}", self.project)
    }
}
