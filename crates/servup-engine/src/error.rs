use std::io;
use std::path::{Path, PathBuf};

use servup_core::VersionError;
use thiserror::Error;

/// Failure of a single copy, move or delete over a resource tree.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("source does not exist: {}", path.display())]
    MissingSource { path: PathBuf },
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    pub(crate) fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_missing_source(&self) -> bool {
        matches!(self, Self::MissingSource { .. })
    }
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    /// Refused before anything was touched; nothing to compensate.
    #[error("{0}")]
    Precondition(String),
    #[error("failed to enumerate domains in {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("transfer of {resource} failed: {source}")]
    Transfer {
        resource: String,
        #[source]
        source: TransferError,
    },
    /// Node configuration could not be read; no node was attempted.
    #[error("failed to read node configuration for domain {domain}: {detail}")]
    RemoteNodeSetup { domain: String, detail: String },
    /// Every node was attempted and at least one failed.
    #[error("Error reinstalling nodes: {}", failing.join(", "))]
    RemoteNodes { failing: Vec<String> },
    #[error("{command} failed for domain {domain}: {detail}")]
    Delegated {
        command: &'static str,
        domain: String,
        detail: String,
    },
    #[error("{0}")]
    Download(String),
}

impl From<VersionError> for UpgradeError {
    fn from(err: VersionError) -> Self {
        Self::Precondition(err.to_string())
    }
}
