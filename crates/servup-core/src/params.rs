use std::fmt;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::{parse_selected_version, Distribution, ServerVersion};

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the new distribution comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionSource {
    Download {
        version: ServerVersion,
        credentials: Credentials,
    },
    /// A pre-downloaded archive; its version is read from the archive itself.
    Archive(PathBuf),
}

/// Raw, unvalidated upgrade options as collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct UpgradeRequest {
    pub distribution: Option<String>,
    pub version: Option<String>,
    pub stage: bool,
    pub use_downloaded: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub domain_dir: Option<PathBuf>,
    pub java_version: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeParameters {
    distribution: Distribution,
    distribution_explicit: bool,
    stage: bool,
    source: DistributionSource,
    domain_dir: Option<PathBuf>,
    java_version: Option<u32>,
}

impl UpgradeParameters {
    pub fn from_request(request: UpgradeRequest) -> Result<Self> {
        let distribution_explicit = request.distribution.is_some();
        let distribution = match request.distribution.as_deref() {
            Some(raw) => Distribution::parse(raw).ok_or_else(|| {
                anyhow!(
                    "invalid distribution '{raw}', expected one of: {}",
                    Distribution::ALL.map(Distribution::as_str).join(", ")
                )
            })?,
            None => Distribution::default(),
        };

        let source = match request.use_downloaded {
            Some(path) => {
                if !path.exists() {
                    return Err(anyhow!("File specified does not exist: {}", path.display()));
                }
                DistributionSource::Archive(path)
            }
            None => {
                let version = request
                    .version
                    .ok_or_else(|| anyhow!("missing required option: --version"))?;
                let version = parse_selected_version(&version)?;
                let username = non_empty(request.username)
                    .ok_or_else(|| anyhow!("missing required option: --username"))?;
                let password = non_empty(request.password)
                    .ok_or_else(|| anyhow!("missing required password: --nexus-password"))?;
                DistributionSource::Download {
                    version,
                    credentials: Credentials { username, password },
                }
            }
        };

        Ok(Self {
            distribution,
            distribution_explicit,
            stage: request.stage,
            source,
            domain_dir: request.domain_dir,
            java_version: request.java_version,
        })
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    /// False when the distribution was defaulted rather than chosen, in which
    /// case the archive contents are the only authority on what it ships.
    pub fn distribution_explicit(&self) -> bool {
        self.distribution_explicit
    }

    pub fn stage(&self) -> bool {
        self.stage
    }

    pub fn source(&self) -> &DistributionSource {
        &self.source
    }

    pub fn domain_dir(&self) -> Option<&PathBuf> {
        self.domain_dir.as_ref()
    }

    pub fn java_version(&self) -> Option<u32> {
        self.java_version
    }

    pub fn requested_version(&self) -> Option<&ServerVersion> {
        match &self.source {
            DistributionSource::Download { version, .. } => Some(version),
            DistributionSource::Archive(_) => None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
