use std::fs;
use std::path::Path;

use servup_core::{
    validate_java_compatibility, validate_versions, DistributionSource, Outcome, ServerVersion,
    ToolConfig, UpgradeParameters, VersionDescriptor,
};
use tracing::{debug, error, info, warn};

use crate::absence::AbsenceProfile;
use crate::admin::{backup_domains, DomainAdmin};
use crate::archive::{extract_zip, ArchiveFetcher, ExtractedDistribution, FetchError};
use crate::control_files::write_control_files;
use crate::error::UpgradeError;
use crate::layout::InstallLayout;
use crate::manifest::{build_manifest, ResourceManifest};
use crate::nodes::{reinstall_nodes, NodeInstaller};
use crate::permissions::fix_permissions;
use crate::state::Suffix;
use crate::transition::{report_compensation, TransferMode, Transitioner};
use crate::tree::{delete_tree, make_tmp_dir};

pub const NODE_UPGRADE_WARNING: &str = "Failed to upgrade all nodes: inspect the logs from this command for the reasons. You can rollback the server upgrade and all of its nodes using the rollback-server command, upgrade the node installs individually using the upgrade-server command on each node, or attempt to upgrade them all again using the reinstall-nodes command.";

/// How the extracted distribution is put in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradePlan {
    pub stage: bool,
    /// Absence rules for the installation being replaced.
    pub current: AbsenceProfile,
    /// Absence rules for the distribution being installed.
    pub target: AbsenceProfile,
}

/// Checks made before anything is written.
pub fn prevalidate(
    layout: &InstallLayout,
    params: &UpgradeParameters,
) -> Result<VersionDescriptor, UpgradeError> {
    if cfg!(windows) && !params.stage() {
        return Err(UpgradeError::Precondition(
            "Non-staged upgrades are not supported on Windows.".to_string(),
        ));
    }

    let current = layout.read_version_descriptor().map_err(|err| {
        UpgradeError::Precondition(format!("could not determine the installed version: {err:#}"))
    })?;

    match current.distribution.as_deref() {
        Some(installed) if !installed.eq_ignore_ascii_case(params.distribution().as_str()) => {
            return Err(UpgradeError::Precondition(format!(
                "The current distribution ({installed}) you are running does not match the requested upgrade distribution ({})",
                params.distribution()
            )));
        }
        Some(_) => {}
        None => info!("The distribution cannot be validated."),
    }

    if let Some(selected) = params.requested_version() {
        check_target_version(&current.version, selected, params.java_version())?;
    }
    Ok(current)
}

fn check_target_version(
    current: &ServerVersion,
    selected: &ServerVersion,
    java_version: Option<u32>,
) -> Result<(), UpgradeError> {
    validate_versions(current, selected)?;
    match java_version {
        Some(detected) => validate_java_compatibility(selected, detected)?,
        None => warn!("Could not determine the Java version, skipping Java compatibility check"),
    }
    Ok(())
}

/// Full `upgrade-server` workflow: validate, acquire and extract the new
/// distribution, then swap or stage it.
pub fn upgrade_server(
    layout: &InstallLayout,
    config: &ToolConfig,
    params: &UpgradeParameters,
    fetcher: &mut dyn ArchiveFetcher,
    admin: &mut dyn DomainAdmin,
    installer: &mut dyn NodeInstaller,
) -> Outcome {
    let current = match prevalidate(layout, params) {
        Ok(current) => current,
        Err(err) => {
            error!("{err}");
            return Outcome::Error;
        }
    };

    let manifest = match build_manifest(layout) {
        Ok(manifest) => manifest,
        Err(err) => {
            error!("{err}");
            return Outcome::Error;
        }
    };
    if let Err(err) = write_control_files(layout, &manifest) {
        error!("{err:#}");
        return Outcome::Error;
    }

    warn!("Do not interrupt the upgrade process, do not shutdown the server or computer.");

    let work_dir = match make_tmp_dir(&layout.scratch_dir(), "upgrade") {
        Ok(dir) => dir,
        Err(err) => {
            error!("Error preparing for upgrade, aborting upgrade: {err:#}");
            return Outcome::Error;
        }
    };
    let outcome = upgrade_with_work_dir(
        layout, config, params, &current, &manifest, &work_dir, fetcher, admin, installer,
    );
    if let Err(err) = delete_tree(&work_dir) {
        warn!(path = %work_dir.display(), error = %err, "failed to remove upgrade work directory");
    }
    outcome
}

#[allow(clippy::too_many_arguments)]
fn upgrade_with_work_dir(
    layout: &InstallLayout,
    config: &ToolConfig,
    params: &UpgradeParameters,
    current: &VersionDescriptor,
    manifest: &ResourceManifest,
    work_dir: &Path,
    fetcher: &mut dyn ArchiveFetcher,
    admin: &mut dyn DomainAdmin,
    installer: &mut dyn NodeInstaller,
) -> Outcome {
    let distribution = match acquire(config, params, work_dir, fetcher) {
        Ok(distribution) => distribution,
        Err(err) => {
            error!("Error preparing for upgrade, aborting upgrade: {err}");
            return Outcome::Error;
        }
    };

    let target_version = &distribution.descriptor().version;
    match params.source() {
        DistributionSource::Archive(_) => {
            if let Err(err) =
                check_target_version(&current.version, target_version, params.java_version())
            {
                error!("{err}");
                return Outcome::Error;
            }
        }
        DistributionSource::Download { version, .. } if version != target_version => {
            warn!(
                requested = %version,
                shipped = %target_version,
                "downloaded distribution reports a different version than requested"
            );
        }
        DistributionSource::Download { .. } => {}
    }

    let current_variant = current
        .distribution()
        .or_else(|| params.distribution_explicit().then(|| params.distribution()))
        .map(|distribution| distribution.variant());
    let target_variant = distribution
        .descriptor()
        .distribution()
        .or_else(|| params.distribution_explicit().then(|| params.distribution()))
        .map(|distribution| distribution.variant());
    let plan = UpgradePlan {
        stage: params.stage(),
        current: AbsenceProfile::new(current_variant, Some(&current.version)),
        target: AbsenceProfile::new(target_variant, Some(target_version)),
    };

    apply_upgrade(layout, manifest, &distribution, &plan, admin, installer)
}

fn acquire(
    config: &ToolConfig,
    params: &UpgradeParameters,
    work_dir: &Path,
    fetcher: &mut dyn ArchiveFetcher,
) -> Result<ExtractedDistribution, UpgradeError> {
    let archive = match params.source() {
        DistributionSource::Archive(path) => path.clone(),
        DistributionSource::Download {
            version,
            credentials,
        } => {
            let url = config.download_url(params.distribution().as_str(), &version.to_string());
            let destination = work_dir.join(params.distribution().archive_file_name(&version.to_string()));
            info!("Downloading new Payara version...");
            debug!(url = %url, "downloading distribution");
            fetcher
                .fetch(&url, credentials, &destination)
                .map_err(|err| {
                    if matches!(err, FetchError::NotFound) {
                        error!("The version indicated is incorrect, please set correct version and try again");
                    }
                    UpgradeError::Download(err.to_string())
                })?;
            destination
        }
    };

    let extract_dir = work_dir.join("extracted");
    extract_zip(&archive, &extract_dir)
        .and_then(|()| ExtractedDistribution::open(&extract_dir))
        .map_err(|err| UpgradeError::Download(format!("could not extract archive: {err:#}")))
}

/// Puts an already extracted distribution in place, in place or staged.
/// Any failure before node reinstallation is compensated.
pub fn apply_upgrade(
    layout: &InstallLayout,
    manifest: &ResourceManifest,
    distribution: &ExtractedDistribution,
    plan: &UpgradePlan,
    admin: &mut dyn DomainAdmin,
    installer: &mut dyn NodeInstaller,
) -> Outcome {
    if let Err(err) = backup_domains(layout, admin) {
        error!("Error executing backup-domain command, aborting upgrade: {err}");
        return Outcome::Error;
    }

    let mut transitioner = Transitioner::new(layout, manifest);
    debug!("Deleting old server backup if present");
    let stale_backup = transitioner.delete_all(Suffix::Backup);
    let stale_staged = transitioner.delete_all(Suffix::Staged);
    if !stale_backup.is_clean() || !stale_staged.is_clean() {
        error!("Error cleaning up previous upgrades, aborting upgrade");
        return Outcome::Error;
    }
    transitioner.mark_baseline();

    if plan.stage {
        return stage_upgrade(&mut transitioner, distribution, plan);
    }

    if let Err(err) = swap_in(&mut transitioner, distribution, plan) {
        error!("Error upgrading Payara Server, rolling back upgrade: {err}");
        undo_in_place(&mut transitioner);
        return Outcome::Error;
    }

    match reinstall_nodes(layout, installer) {
        Ok(count) => {
            debug!(count, "nodes reinstalled");
            info!("Upgrade successful");
            Outcome::Success
        }
        Err(err @ UpgradeError::RemoteNodes { .. }) => {
            warn!("{NODE_UPGRADE_WARNING} {err}");
            Outcome::Warning
        }
        Err(err) => {
            error!("Error upgrading Payara Server nodes, rolling back: {err}");
            undo_in_place(&mut transitioner);
            Outcome::Error
        }
    }
}

fn swap_in(
    transitioner: &mut Transitioner<'_>,
    distribution: &ExtractedDistribution,
    plan: &UpgradePlan,
) -> Result<(), UpgradeError> {
    debug!("Moving files to old");
    transitioner.transition_all(Suffix::Current, Suffix::Backup, TransferMode::Move, &plan.current)?;
    debug!("Copying extracted files");
    transitioner.install_from(distribution.install_root(), Suffix::Current, &plan.target)?;
    if !cfg!(windows) {
        fix_permissions(transitioner.layout(), transitioner.manifest(), Suffix::Current)?;
    }
    Ok(())
}

fn stage_upgrade(
    transitioner: &mut Transitioner<'_>,
    distribution: &ExtractedDistribution,
    plan: &UpgradePlan,
) -> Outcome {
    let staged = transitioner
        .install_from(distribution.install_root(), Suffix::Staged, &plan.target)
        .map_err(UpgradeError::from)
        .and_then(|_| {
            if cfg!(windows) {
                return Ok(0);
            }
            fix_permissions(transitioner.layout(), transitioner.manifest(), Suffix::Staged)
        });

    if let Err(err) = staged {
        error!("Error upgrading Payara Server, rolling back upgrade: {err}");
        let report = transitioner.delete_all(Suffix::Staged);
        report_compensation(&report.failures);
        return Outcome::Error;
    }

    info!(
        "Upgrade successfully staged, please run the applyStagedUpgrade script or the apply-staged-upgrade command to apply the upgrade. The scripts can be found under {}",
        transitioner.layout().root().join("bin").display()
    );
    Outcome::Success
}

/// Returns every resource to its pre-upgrade content: what the new version
/// put in place is removed and the backup is copied back over it.
fn undo_in_place(transitioner: &mut Transitioner<'_>) -> bool {
    debug!("Moving old back");
    let manifest = transitioner.manifest();
    let mut failures = Vec::new();
    for entry in manifest {
        let state = transitioner.resource_state(entry);
        let baseline = transitioner.state().baseline(entry);
        let introduced = state.current && !baseline.current;
        if state.current && (state.backup || introduced) {
            if let Err(err) = transitioner.delete_entry(entry, Suffix::Current) {
                failures.push((entry.clone(), err));
            }
        }
        if state.backup {
            failures.extend(transitioner.compensate([entry], Suffix::Backup, Suffix::Current));
        }
    }
    let clean = report_compensation(&failures);
    if clean {
        debug!("Moved old back");
    }
    clean
}

/// Removes the extraction left behind by an interrupted run.
pub fn remove_scratch(layout: &InstallLayout) {
    let scratch = layout.scratch_dir();
    if fs::symlink_metadata(&scratch).is_ok() {
        if let Err(err) = delete_tree(&scratch) {
            warn!(path = %scratch.display(), error = %err, "failed to remove scratch directory");
        }
    }
}
