use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    Stable,
    Rc,
    Beta,
    Alpha,
    Dev,
}

impl Stability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Rc => "rc",
            Self::Beta => "beta",
            Self::Alpha => "alpha",
            Self::Dev => "dev",
        }
    }

    pub fn is_stable(self) -> bool {
        self == Self::Stable
    }

    fn from_pre_release_tag(tag: &str) -> Option<Self> {
        match tag {
            "stable" | "patch" | "pl" | "p" => Some(Self::Stable),
            "rc" => Some(Self::Rc),
            "beta" | "b" => Some(Self::Beta),
            "alpha" | "a" => Some(Self::Alpha),
            "dev" => Some(Self::Dev),
            _ => None,
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn legacy_prefix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+\.x-(.+)$").expect("legacy prefix pattern is valid"))
}

fn legacy_dev_branch() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)\.x-dev$").expect("legacy dev pattern is valid"))
}

fn legacy_release() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)\.(\d+)(?:-([0-9A-Za-z.]+))?$").expect("legacy release pattern is valid")
    })
}

fn pre_release_tag() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(alpha|a|beta|b|rc|dev|stable|patch|pl|p)\d*$")
            .expect("pre-release tag pattern is valid")
    })
}

/// Converts legacy core-prefixed versions (`8.x-1.2`, `8.x-2.0-beta3`,
/// `8.x-1.x-dev`) to semantic versions. Anything that is not a recognized
/// legacy form comes back as given, minus surrounding whitespace.
pub fn normalize_version(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(captures) = legacy_prefix().captures(trimmed) else {
        return trimmed.to_string();
    };
    let rest = &captures[1];

    if let Some(dev) = legacy_dev_branch().captures(rest) {
        return format!("{}.x-dev", &dev[1]);
    }

    if let Some(release) = legacy_release().captures(rest) {
        let mut version = format!("{}.{}.0", &release[1], &release[2]);
        if let Some(pre) = release.get(3) {
            version.push('-');
            version.push_str(pre.as_str());
        }
        return version;
    }

    trimmed.to_string()
}

/// Classifies the pre-release maturity of a normalized version. Input that
/// cannot be read as a version is `Dev`.
pub fn stability_of(version: &str) -> Stability {
    let lowered = version.trim().to_ascii_lowercase();
    if lowered.is_empty() || lowered.starts_with("dev-") || lowered.ends_with("-dev") {
        return Stability::Dev;
    }

    let Some(parsed) = coerce_semver(&lowered) else {
        return Stability::Dev;
    };
    if parsed.pre.is_empty() {
        return Stability::Stable;
    }

    let first_identifier = parsed.pre.as_str().split('.').next().unwrap_or_default();
    pre_release_tag()
        .captures(first_identifier)
        .and_then(|captures| Stability::from_pre_release_tag(&captures[1]))
        .unwrap_or(Stability::Dev)
}

/// Reads a raw or legacy version as a semantic version, padding missing
/// minor and patch components. Dev branches and other non-releases yield
/// `None`.
pub fn parse_version(raw: &str) -> Option<Version> {
    let normalized = normalize_version(raw).to_ascii_lowercase();
    if normalized.starts_with("dev-") || normalized.ends_with("-dev") {
        return None;
    }
    coerce_semver(&normalized)
}

fn coerce_semver(version: &str) -> Option<Version> {
    let version = version.strip_prefix('v').unwrap_or(version);
    let version = version
        .split_once('+')
        .map(|(without_build, _)| without_build)
        .unwrap_or(version);
    let (core, pre) = match version.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (version, None),
    };

    let parts = core.split('.').collect::<Vec<_>>();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    if parts
        .iter()
        .any(|part| part.is_empty() || !part.chars().all(|ch| ch.is_ascii_digit()))
    {
        return None;
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    if let Some(pre) = pre {
        padded.push('-');
        padded.push_str(pre);
    }

    Version::parse(&padded).ok()
}
