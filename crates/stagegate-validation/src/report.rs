use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// One validator finding: a group of messages under an optional heading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub severity: Severity,
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    /// Package the finding is about, when it concerns exactly one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
}

impl ValidationResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            messages: vec![message.into()],
            heading: None,
            package: None,
        }
    }

    pub fn warnings(messages: Vec<String>, heading: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            messages,
            heading: Some(heading.into()),
            package: None,
        }
    }

    pub fn for_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ValidationResult) {
        if result.messages.is_empty() {
            return;
        }
        self.results.push(result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = ValidationResult>) {
        for result in results {
            self.push(result);
        }
    }

    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    pub fn warnings(&self) -> Vec<&ValidationResult> {
        self.with_severity(Severity::Warning)
    }

    pub fn errors(&self) -> Vec<&ValidationResult> {
        self.with_severity(Severity::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.results
            .iter()
            .any(|result| result.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    fn with_severity(&self, severity: Severity) -> Vec<&ValidationResult> {
        self.results
            .iter()
            .filter(|result| result.severity == severity)
            .collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages = self
            .errors()
            .into_iter()
            .flat_map(|result| result.messages.iter().map(String::as_str))
            .collect::<Vec<_>>();
        if messages.is_empty() {
            return f.write_str("no validation errors");
        }
        f.write_str(&messages.join("; "))
    }
}
