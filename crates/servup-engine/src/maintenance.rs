//! Follow-up commands for a staged or partially successful upgrade.

use servup_core::Outcome;
use tracing::{debug, error, info, warn};

use crate::absence::AbsenceProfile;
use crate::error::UpgradeError;
use crate::layout::InstallLayout;
use crate::manifest::build_manifest;
use crate::nodes::{reinstall_nodes, NodeInstaller};
use crate::state::Suffix;
use crate::transition::{report_compensation, TransferMode, Transitioner};
use crate::upgrade::{remove_scratch, NODE_UPGRADE_WARNING};

/// Swaps a staged upgrade in: current becomes `.old`, `.new` becomes current.
pub fn apply_staged_upgrade(layout: &InstallLayout, installer: &mut dyn NodeInstaller) -> Outcome {
    if !layout.modules_dir(Suffix::Staged).exists() {
        error!("No staged upgrade found to apply");
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
    let staged_profile = AbsenceProfile::probe(&layout.version_descriptor_path_in(Suffix::Staged));

    warn!("Do not interrupt the upgrade process, do not shutdown the server or computer.");
    let mut transitioner = Transitioner::new(layout, &manifest);

    let stale = transitioner.delete_all(Suffix::Backup);
    if !stale.is_clean() {
        error!("Error cleaning up previous upgrades, aborting upgrade");
        return Outcome::Error;
    }

    if let Err(failure) = transitioner.transition_all(
        Suffix::Current,
        Suffix::Backup,
        TransferMode::Move,
        &current_profile,
    ) {
        error!("Error applying staged upgrade, rolling back: {failure}");
        let failures = transitioner.compensate(&failure.completed, Suffix::Backup, Suffix::Current);
        report_compensation(&failures);
        return Outcome::Error;
    }

    if let Err(failure) = transitioner.transition_all(
        Suffix::Staged,
        Suffix::Current,
        TransferMode::Move,
        &staged_profile,
    ) {
        error!("Error applying staged upgrade, rolling back: {failure}");
        unapply(&mut transitioner, &failure.completed);
        return Outcome::Error;
    }

    match reinstall_nodes(layout, installer) {
        Ok(count) => {
            debug!(count, "nodes reinstalled");
            info!("Staged upgrade applied");
            Outcome::Success
        }
        Err(err @ UpgradeError::RemoteNodes { .. }) => {
            warn!("{NODE_UPGRADE_WARNING} {err}");
            Outcome::Warning
        }
        Err(err) => {
            error!("Error upgrading Payara Server nodes, rolling back: {err}");
            let all = manifest.entries().to_vec();
            unapply(&mut transitioner, &all);
            Outcome::Error
        }
    }
}

fn unapply(transitioner: &mut Transitioner<'_>, applied: &[crate::manifest::ManifestEntry]) {
    let mut failures = transitioner.compensate(applied, Suffix::Current, Suffix::Staged);
    if failures.is_empty() {
        failures = transitioner.compensate_all(Suffix::Backup, Suffix::Current);
    }
    report_compensation(&failures);
}

/// Deletes every `.old` and `.new` sibling, keeping going past failures.
pub fn cleanup_upgrade(layout: &InstallLayout) -> Outcome {
    let manifest = match build_manifest(layout) {
        Ok(manifest) => manifest,
        Err(err) => {
            error!("{err}");
            return Outcome::Error;
        }
    };
    let mut transitioner = Transitioner::new(layout, &manifest);
    let backup = transitioner.delete_all(Suffix::Backup);
    let staged = transitioner.delete_all(Suffix::Staged);
    remove_scratch(layout);

    let failed = backup.failures.len() + staged.failures.len();
    if failed > 0 {
        warn!(failed, "some upgrade leftovers could not be deleted");
        return Outcome::Warning;
    }
    info!(
        deleted = backup.deleted.len() + staged.deleted.len(),
        "Upgrade leftovers deleted"
    );
    Outcome::Success
}

/// Retries node reinstallation on its own.
pub fn reinstall_nodes_only(layout: &InstallLayout, installer: &mut dyn NodeInstaller) -> Outcome {
    match reinstall_nodes(layout, installer) {
        Ok(count) => {
            info!(count, "Nodes reinstalled");
            Outcome::Success
        }
        Err(err @ UpgradeError::RemoteNodes { .. }) => {
            warn!("{err}");
            Outcome::Warning
        }
        Err(err) => {
            error!("{err}");
            Outcome::Error
        }
    }
}
