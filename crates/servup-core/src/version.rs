use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;
use thiserror::Error;

static ENTERPRISE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{1,2})\.([0-9]{1,2})\.([0-9]{1,2})$").expect("valid version pattern")
});

// Community releases carry the release year as their minor component.
static COMMUNITY_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+\.[0-9]{4}\.[0-9]+$").expect("valid community version pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Empty selected version, please verify and try again")]
    Empty,
    #[error("Invalid selected version {0}, please verify and try again")]
    InvalidFormat(String),
    #[error("{0} is a Payara Community version. You can only upgrade to a Payara Enterprise version")]
    Community(String),
    #[error(
        "The version indicated is incorrect. You can't downgrade from {current} to {selected} please set correct version and try again"
    )]
    Downgrade {
        current: ServerVersion,
        selected: ServerVersion,
    },
    #[error(
        "It was selected the same version: selected version {selected} and current version {current}, please verify and try again"
    )]
    SameVersion {
        current: ServerVersion,
        selected: ServerVersion,
    },
    #[error("Payara {target_major} requires Java {required} or later, but Java {detected} was detected")]
    JavaIncompatible {
        target_major: u64,
        required: u32,
        detected: u32,
    },
}

/// A `MAJOR.MINOR.UPDATE` server release number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion(Version);

impl ServerVersion {
    pub fn new(major: u64, minor: u64, update: u64) -> Self {
        Self(Version::new(major, minor, update))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn update(&self) -> u64 {
        self.0.patch
    }

    /// Name of the top-level directory inside a distribution archive.
    pub fn archive_root_name(&self) -> String {
        format!("payara{}", self.major())
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0.major, self.0.minor, self.0.patch)
    }
}

pub fn parse_selected_version(input: &str) -> Result<ServerVersion, VersionError> {
    let selected = input.trim();
    if selected.is_empty() {
        return Err(VersionError::Empty);
    }
    if COMMUNITY_VERSION.is_match(selected) {
        return Err(VersionError::Community(selected.to_string()));
    }

    let captures = ENTERPRISE_VERSION
        .captures(selected)
        .ok_or_else(|| VersionError::InvalidFormat(selected.to_string()))?;
    let component = |index: usize| -> Result<u64, VersionError> {
        captures[index]
            .parse::<u64>()
            .map_err(|_| VersionError::InvalidFormat(selected.to_string()))
    };

    Ok(ServerVersion::new(component(1)?, component(2)?, component(3)?))
}

pub fn validate_versions(
    current: &ServerVersion,
    selected: &ServerVersion,
) -> Result<(), VersionError> {
    match selected.cmp(current) {
        std::cmp::Ordering::Less => Err(VersionError::Downgrade {
            current: current.clone(),
            selected: selected.clone(),
        }),
        std::cmp::Ordering::Equal => Err(VersionError::SameVersion {
            current: current.clone(),
            selected: selected.clone(),
        }),
        std::cmp::Ordering::Greater => Ok(()),
    }
}

pub fn required_java_version(target_major: u64) -> u32 {
    match target_major {
        0..=5 => 8,
        6 => 11,
        _ => 21,
    }
}

pub fn validate_java_compatibility(
    target: &ServerVersion,
    detected_java: u32,
) -> Result<(), VersionError> {
    let required = required_java_version(target.major());
    if detected_java < required {
        return Err(VersionError::JavaIncompatible {
            target_major: target.major(),
            required,
            detected: detected_java,
        });
    }
    Ok(())
}

/// Extracts the feature release from `java -version` output, handling both
/// the legacy `1.8.0_292` and the modern `17.0.2` schemes.
pub fn parse_java_feature_version(output: &str) -> Option<u32> {
    let quoted = output.split('"').nth(1)?;
    let mut parts = quoted.split(['.', '_', '-', '+']);
    let first = parts.next()?.parse::<u32>().ok()?;
    if first == 1 {
        return parts.next()?.parse::<u32>().ok();
    }
    Some(first)
}
