use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use servup_core::{Credentials, VersionDescriptor};
use thiserror::Error;
use tracing::debug;

use crate::layout::{read_version_descriptor, InstallLayout};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Payara version not found")]
    NotFound,
    #[error("Error connecting to server: {0}")]
    Status(u16),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Downloads a distribution archive to a local file.
pub trait ArchiveFetcher {
    fn fetch(&mut self, url: &str, credentials: &Credentials, destination: &Path)
        -> Result<(), FetchError>;
}

/// An unpacked distribution: `<extract_dir>/payara<N>/glassfish`.
#[derive(Debug, Clone)]
pub struct ExtractedDistribution {
    install_root: PathBuf,
    descriptor: VersionDescriptor,
}

impl ExtractedDistribution {
    /// Locates the single `payara<N>` directory in `extract_dir` and reads the
    /// version descriptor shipped inside it.
    pub fn open(extract_dir: &Path) -> Result<Self> {
        let mut roots = Vec::new();
        for entry in fs::read_dir(extract_dir)
            .with_context(|| format!("failed to read {}", extract_dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let is_root = name
                .strip_prefix("payara")
                .is_some_and(|major| !major.is_empty() && major.chars().all(|c| c.is_ascii_digit()));
            if is_root && entry.file_type()?.is_dir() {
                roots.push(name.to_string());
            }
        }
        roots.sort();

        let root_name = match roots.as_slice() {
            [single] => single.clone(),
            [] => {
                return Err(anyhow!(
                    "archive does not contain a payara<N> directory: {}",
                    extract_dir.display()
                ))
            }
            _ => {
                return Err(anyhow!(
                    "archive contains more than one distribution root: {}",
                    roots.join(", ")
                ))
            }
        };

        let install_root = extract_dir.join(&root_name).join("glassfish");
        let descriptor = read_version_descriptor(&InstallLayout::new(&install_root).version_descriptor_path())
            .context("could not read the version of the supplied distribution")?;
        let expected = descriptor.version.archive_root_name();
        if expected != root_name {
            return Err(anyhow!(
                "distribution root {root_name} does not match its version {}",
                descriptor.version
            ));
        }
        debug!(root = %install_root.display(), version = %descriptor.version, "opened distribution");
        Ok(Self {
            install_root,
            descriptor,
        })
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn descriptor(&self) -> &VersionDescriptor {
        &self.descriptor
    }
}

pub fn extract_zip(archive_path: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    if cfg!(windows) {
        let mut command = Command::new("powershell");
        command.arg("-NoProfile").arg("-Command").arg(format!(
            "Expand-Archive -LiteralPath '{}' -DestinationPath '{}' -Force",
            escape_ps_single_quote(archive_path),
            escape_ps_single_quote(dst)
        ));
        if run_command(&mut command, "failed to extract zip archive with powershell").is_ok() {
            return Ok(());
        }
    }

    let mut unzip_command = Command::new("unzip");
    unzip_command.arg("-q").arg(archive_path).arg("-d").arg(dst);
    if run_command(&mut unzip_command, "failed to extract zip archive with unzip").is_ok() {
        return Ok(());
    }

    run_command(
        Command::new("tar")
            .arg("-xf")
            .arg(archive_path)
            .arg("-C")
            .arg(dst),
        "failed to extract zip archive with tar fallback",
    )
    .map(|_| ())
}

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<String> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        return Ok(stdout.into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

fn escape_ps_single_quote(path: &Path) -> String {
    let mut os = OsString::new();
    os.push(path.as_os_str());
    os.to_string_lossy().replace('\'', "''")
}
