use std::path::PathBuf;
use std::process::Command;

use anyhow::Result;
use tracing::{debug, info};

use crate::archive::run_command;
use crate::error::UpgradeError;
use crate::layout::InstallLayout;

/// Domain configuration backup and restore, delegated to the server's own
/// administration tooling.
pub trait DomainAdmin {
    fn backup_domain(&mut self, domain: &str) -> Result<()>;
    fn restore_domain(&mut self, domain: &str) -> Result<()>;
}

/// Runs `nadmin backup-domain` / `nadmin restore-domain` as subprocesses.
#[derive(Debug, Clone)]
pub struct NadminDomainAdmin {
    script: PathBuf,
    domain_dir: Option<PathBuf>,
}

impl NadminDomainAdmin {
    pub fn new(script: impl Into<PathBuf>, domain_dir: Option<PathBuf>) -> Self {
        Self {
            script: script.into(),
            domain_dir,
        }
    }

    pub(crate) fn build_command(&self, subcommand: &str, domain: &str) -> Command {
        let mut command = Command::new(&self.script);
        command.arg(subcommand);
        if let Some(domain_dir) = &self.domain_dir {
            command.arg("--domaindir").arg(domain_dir);
        }
        command.arg(domain);
        command
    }

    fn run(&self, subcommand: &str, domain: &str) -> Result<()> {
        let mut command = self.build_command(subcommand, domain);
        debug!(script = %self.script.display(), subcommand, domain, "running admin command");
        let output = run_command(&mut command, &format!("{subcommand} failed for domain {domain}"))?;
        if !output.trim().is_empty() {
            debug!(subcommand, domain, output = %output.trim(), "admin command output");
        }
        Ok(())
    }
}

impl DomainAdmin for NadminDomainAdmin {
    fn backup_domain(&mut self, domain: &str) -> Result<()> {
        self.run("backup-domain", domain)
    }

    fn restore_domain(&mut self, domain: &str) -> Result<()> {
        self.run("restore-domain", domain)
    }
}

/// Backs up every domain, stopping at the first failure.
pub fn backup_domains(layout: &InstallLayout, admin: &mut dyn DomainAdmin) -> Result<(), UpgradeError> {
    info!("Backing up domain configs");
    for domain in list_domains(layout)? {
        admin
            .backup_domain(&domain)
            .map_err(|err| UpgradeError::Delegated {
                command: "backup-domain",
                domain: domain.clone(),
                detail: format!("{err:#}"),
            })?;
    }
    Ok(())
}

/// Restores every domain, stopping at the first failure.
pub fn restore_domains(layout: &InstallLayout, admin: &mut dyn DomainAdmin) -> Result<(), UpgradeError> {
    info!("Restoring domain configs");
    for domain in list_domains(layout)? {
        admin
            .restore_domain(&domain)
            .map_err(|err| UpgradeError::Delegated {
                command: "restore-domain",
                domain: domain.clone(),
                detail: format!("{err:#}"),
            })?;
    }
    Ok(())
}

fn list_domains(layout: &InstallLayout) -> Result<Vec<String>, UpgradeError> {
    layout.list_domains().map_err(|source| UpgradeError::Manifest {
        path: layout.domains_dir(),
        source,
    })
}
