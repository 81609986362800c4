//! Resources the manifest names that may legitimately be missing, depending on
//! which distribution variant and layout generation is installed.

use std::fmt;
use std::path::Path;

use servup_core::{DistributionVariant, ServerVersion, VersionDescriptor};
use tracing::debug;

use crate::layout::read_version_descriptor;
use crate::manifest::{Anchor, ManifestEntry};

/// Major versions below this ship the `h2db` directory inside the install
/// root as well as next to it.
const FIRST_CURRENT_LAYOUT_MAJOR: u64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutGeneration {
    Legacy,
    Current,
    Unknown,
}

impl LayoutGeneration {
    pub fn for_version(version: &ServerVersion) -> Self {
        if version.major() < FIRST_CURRENT_LAYOUT_MAJOR {
            Self::Legacy
        } else {
            Self::Current
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsenceReason {
    MessageQueueOnWebDistribution,
    LegacyDuplicateDirectory,
    CacheNeverCreated,
}

impl fmt::Display for AbsenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MessageQueueOnWebDistribution => {
                "message queue is not part of web distributions"
            }
            Self::LegacyDuplicateDirectory => "legacy duplicate directory is not shipped",
            Self::CacheNeverCreated => "domain was never started",
        })
    }
}

/// What is known about an installation when deciding whether a missing
/// resource is expected. Decided once per workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsenceProfile {
    pub variant: Option<DistributionVariant>,
    pub generation: LayoutGeneration,
}

impl Default for AbsenceProfile {
    fn default() -> Self {
        Self {
            variant: None,
            generation: LayoutGeneration::Unknown,
        }
    }
}

impl AbsenceProfile {
    pub fn new(variant: Option<DistributionVariant>, version: Option<&ServerVersion>) -> Self {
        Self {
            variant,
            generation: version
                .map(LayoutGeneration::for_version)
                .unwrap_or(LayoutGeneration::Unknown),
        }
    }

    pub fn from_descriptor(descriptor: &VersionDescriptor) -> Self {
        Self::new(
            descriptor.distribution().map(|d| d.variant()),
            Some(&descriptor.version),
        )
    }

    /// Profile of whatever installation's descriptor is at `path`; unknown
    /// when it cannot be read.
    pub fn probe(path: &Path) -> Self {
        match read_version_descriptor(path) {
            Ok(descriptor) => Self::from_descriptor(&descriptor),
            Err(err) => {
                debug!(path = %path.display(), error = %format!("{err:#}"), "no usable version descriptor");
                Self::default()
            }
        }
    }

    /// `Some` when `entry` may be missing without that being an error.
    pub fn acceptable_absence(&self, entry: &ManifestEntry) -> Option<AbsenceReason> {
        if entry.is_osgi_cache() {
            return Some(AbsenceReason::CacheNeverCreated);
        }
        match (entry.anchor(), entry.components()) {
            (Anchor::InstallParent, [name]) if name == "mq" => {
                (self.variant != Some(DistributionVariant::Full))
                    .then_some(AbsenceReason::MessageQueueOnWebDistribution)
            }
            (Anchor::InstallRoot, [name]) if name == "h2db" => {
                (self.generation != LayoutGeneration::Legacy)
                    .then_some(AbsenceReason::LegacyDuplicateDirectory)
            }
            _ => None,
        }
    }
}
