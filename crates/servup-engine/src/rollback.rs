use servup_core::Outcome;
use tracing::{debug, error, info, warn};

use crate::absence::AbsenceProfile;
use crate::admin::{restore_domains, DomainAdmin};
use crate::error::UpgradeError;
use crate::escrow::with_caches_escrowed;
use crate::layout::InstallLayout;
use crate::manifest::{build_manifest, ManifestEntry};
use crate::nodes::{reinstall_nodes, NodeInstaller};
use crate::state::Suffix;
use crate::transition::{report_compensation, TransferMode, Transitioner};

pub const NODE_ROLLBACK_WARNING: &str = "Failed to roll back all nodes: inspect the logs from this command for the reasons. You can roll back the node installs individually using the rollback-server command on each node, or attempt to roll them all back again using the reinstall-nodes command.";

/// Returns the installation to the version preserved in the `.old` backups.
pub fn rollback_server(
    layout: &InstallLayout,
    admin: &mut dyn DomainAdmin,
    installer: &mut dyn NodeInstaller,
) -> Outcome {
    if cfg!(windows) {
        error!("Command not supported on Windows. Please use the rollbackUpgrade script.");
        return Outcome::Error;
    }
    if !layout.modules_dir(Suffix::Backup).exists() {
        error!("No old version found to rollback");
        return Outcome::Error;
    }

    let manifest = match build_manifest(layout) {
        Ok(manifest) => manifest,
        Err(err) => {
            error!("{err}");
            return Outcome::Error;
        }
    };
    let current_profile = AbsenceProfile::probe(&layout.version_descriptor_path_in(Suffix::Current));
    let backup_profile = AbsenceProfile::probe(&layout.version_descriptor_path_in(Suffix::Backup));

    info!("Rolling back server...");
    let mut transitioner = Transitioner::new(layout, &manifest);

    let stale = transitioner.delete_all(Suffix::Staged);
    if !stale.is_clean() {
        error!("Error cleaning up previous staged upgrade, aborting rollback");
        return Outcome::Error;
    }

    debug!("Moving current install into a staged rollback directory");
    if let Err(failure) = transitioner.transition_all(
        Suffix::Current,
        Suffix::Staged,
        TransferMode::Move,
        &current_profile,
    ) {
        error!("Error rolling back current install: {failure}");
        info!("Attempting to undo rollback");
        restore_staged(&mut transitioner);
        return Outcome::Error;
    }
    debug!("Moved current install into a staged rollback directory");

    if let Err(failure) = transitioner.transition_all(
        Suffix::Backup,
        Suffix::Current,
        TransferMode::Move,
        &backup_profile,
    ) {
        error!("Error rolling back current install: {failure}");
        info!("Attempting to undo rollback");
        if return_to_backup(&mut transitioner, &failure.completed) {
            restore_staged(&mut transitioner);
        }
        return Outcome::Error;
    }

    let mut outcome = Outcome::Success;

    info!("Rolling back nodes");
    match reinstall_nodes(layout, installer) {
        Ok(_) => info!("Rolled back nodes"),
        Err(err @ UpgradeError::RemoteNodes { .. }) => {
            warn!("{NODE_ROLLBACK_WARNING} {err}");
            outcome = outcome.combine(Outcome::Warning);
        }
        Err(err) => {
            error!("Error rolling back nodes: {err}");
            info!("Attempting to undo rollback");
            let all = manifest.entries().to_vec();
            if return_to_backup(&mut transitioner, &all) {
                restore_staged(&mut transitioner);
            }
            return Outcome::Error;
        }
    }

    let leftover = transitioner.delete_all(Suffix::Staged);
    if !leftover.is_clean() {
        warn!("Error cleaning up rolled back upgrade");
        outcome = outcome.combine(Outcome::Warning);
    }

    let restored = with_caches_escrowed(layout, || {
        restore_domains(layout, admin).map_err(anyhow::Error::from)
    });
    if let Err(err) = restored {
        warn!("Error restore-domain command! Please restore your domain config manually. {err:#}");
        outcome = outcome.combine(Outcome::Warning);
    }

    if outcome == Outcome::Success {
        info!("Rollback successful");
    }
    outcome
}

/// Copies the newer version parked in `.new` back over current.
fn restore_staged(transitioner: &mut Transitioner<'_>) -> bool {
    info!("Moving staged back to current");
    let failures = transitioner.compensate_all(Suffix::Staged, Suffix::Current);
    let clean = report_compensation(&failures);
    if clean {
        info!("Moved staged back to current");
    }
    clean
}

/// Puts the old version that reached current back into `.old`.
fn return_to_backup(transitioner: &mut Transitioner<'_>, entries: &[ManifestEntry]) -> bool {
    info!("Moving current install back to old");
    let failures = transitioner.compensate(entries, Suffix::Current, Suffix::Backup);
    let clean = report_compensation(&failures);
    if clean {
        info!("Moved current install back to old");
    }
    clean
}
