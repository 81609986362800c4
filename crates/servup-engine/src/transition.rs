use std::path::Path;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::absence::{AbsenceProfile, AbsenceReason};
use crate::error::{TransferError, UpgradeError};
use crate::layout::InstallLayout;
use crate::manifest::{ManifestEntry, ResourceManifest};
use crate::state::{InstallState, ResourceState, Suffix};
use crate::tree::{copy_tree, delete_tree, move_or_copy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Rename, falling back to copy when the rename is refused.
    Move,
    /// Overwrite the destination file by file, then delete the source. Used
    /// when the destination may already be partially populated.
    CopyThenDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Transferred,
    Skipped(AbsenceReason),
}

#[derive(Debug, Default)]
pub struct TransitionReport {
    pub completed: Vec<ManifestEntry>,
    pub skipped: Vec<(ManifestEntry, AbsenceReason)>,
}

/// A multi-resource transition stopped at `failed`. Everything in
/// `completed` reached the target location; nothing in `pending` was touched.
#[derive(Debug, Error)]
#[error("transfer of {failed} failed: {source}")]
pub struct TransitionFailure {
    pub failed: ManifestEntry,
    #[source]
    pub source: TransferError,
    pub completed: Vec<ManifestEntry>,
    pub pending: Vec<ManifestEntry>,
}

impl From<TransitionFailure> for UpgradeError {
    fn from(failure: TransitionFailure) -> Self {
        UpgradeError::Transfer {
            resource: failure.failed.to_string(),
            source: failure.source,
        }
    }
}

#[derive(Debug, Default)]
pub struct DeleteReport {
    pub deleted: Vec<ManifestEntry>,
    pub failures: Vec<(ManifestEntry, TransferError)>,
}

impl DeleteReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Moves manifest resources between their current, staged and backup
/// locations, tracking per-resource state as it goes.
#[derive(Debug)]
pub struct Transitioner<'a> {
    layout: &'a InstallLayout,
    manifest: &'a ResourceManifest,
    state: InstallState,
}

impl<'a> Transitioner<'a> {
    pub fn new(layout: &'a InstallLayout, manifest: &'a ResourceManifest) -> Self {
        let state = InstallState::probe(layout, manifest);
        Self {
            layout,
            manifest,
            state,
        }
    }

    pub fn layout(&self) -> &'a InstallLayout {
        self.layout
    }

    pub fn manifest(&self) -> &'a ResourceManifest {
        self.manifest
    }

    pub fn state(&self) -> &InstallState {
        &self.state
    }

    pub fn resource_state(&self, entry: &ManifestEntry) -> ResourceState {
        self.state.get(entry)
    }

    pub fn mark_baseline(&mut self) {
        self.state.mark_baseline();
    }

    /// Moves one resource from `from` to `to`. A missing source is skipped
    /// when the profile allows it to be absent and is an error otherwise.
    pub fn transition(
        &mut self,
        entry: &ManifestEntry,
        from: Suffix,
        to: Suffix,
        mode: TransferMode,
        profile: &AbsenceProfile,
    ) -> Result<StepOutcome, TransferError> {
        let source = self.layout.resource_path(entry, from);
        if !self.state.get(entry).has(from) {
            if let Some(reason) = profile.acceptable_absence(entry) {
                debug!(resource = %entry, %reason, "skipping absent resource");
                return Ok(StepOutcome::Skipped(reason));
            }
            return Err(TransferError::MissingSource { path: source });
        }

        let destination = self.layout.resource_path(entry, to);
        debug!(
            from = %source.display(),
            to = %destination.display(),
            ?mode,
            "moving resource"
        );
        let result = match mode {
            TransferMode::Move => move_or_copy(&source, &destination).map(|_| ()),
            TransferMode::CopyThenDelete => copy_then_delete(&source, &destination),
        };

        match result {
            Ok(()) if mode == TransferMode::Move => {
                self.state.record_shift(entry, from, to);
                Ok(StepOutcome::Transferred)
            }
            Ok(()) => {
                // The source may survive a failed cleanup.
                self.state.reprobe(self.layout, entry);
                Ok(StepOutcome::Transferred)
            }
            Err(err) => {
                self.state.reprobe(self.layout, entry);
                Err(err)
            }
        }
    }

    /// Runs [`Self::transition`] over the whole manifest in order, stopping
    /// at the first failure.
    pub fn transition_all(
        &mut self,
        from: Suffix,
        to: Suffix,
        mode: TransferMode,
        profile: &AbsenceProfile,
    ) -> Result<TransitionReport, TransitionFailure> {
        let manifest = self.manifest;
        info!(from = %from, to = %to, "moving resources");
        let mut report = TransitionReport::default();
        for (index, entry) in manifest.iter().enumerate() {
            match self.transition(entry, from, to, mode, profile) {
                Ok(StepOutcome::Transferred) => report.completed.push(entry.clone()),
                Ok(StepOutcome::Skipped(reason)) => report.skipped.push((entry.clone(), reason)),
                Err(source) => {
                    return Err(TransitionFailure {
                        failed: entry.clone(),
                        source,
                        completed: report.completed,
                        pending: manifest.entries()[index + 1..].to_vec(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Copies every manifest resource found under `source_root` (an extracted
    /// distribution's install root) into the `to` location. Runtime caches
    /// are never taken from a distribution.
    pub fn install_from(
        &mut self,
        source_root: &Path,
        to: Suffix,
        profile: &AbsenceProfile,
    ) -> Result<TransitionReport, TransitionFailure> {
        let manifest = self.manifest;
        info!(from = %source_root.display(), to = %to, "copying distribution resources");
        let mut report = TransitionReport::default();
        for (index, entry) in manifest.iter().enumerate() {
            if entry.is_osgi_cache() {
                continue;
            }
            let source = entry.resolve_in(source_root);
            let destination = self.layout.resource_path(entry, to);

            let result = if std::fs::symlink_metadata(&source).is_err() {
                match profile.acceptable_absence(entry) {
                    Some(reason) => {
                        debug!(resource = %entry, %reason, "distribution does not ship resource");
                        report.skipped.push((entry.clone(), reason));
                        continue;
                    }
                    None => Err(TransferError::MissingSource { path: source }),
                }
            } else {
                debug!(from = %source.display(), to = %destination.display(), "copying resource");
                copy_tree(&source, &destination).map(|_| ())
            };

            match result {
                Ok(()) => {
                    self.state.record_present(entry, to, true);
                    report.completed.push(entry.clone());
                }
                Err(source) => {
                    self.state.reprobe(self.layout, entry);
                    return Err(TransitionFailure {
                        failed: entry.clone(),
                        source,
                        completed: report.completed,
                        pending: manifest.entries()[index + 1..].to_vec(),
                    });
                }
            }
        }
        Ok(report)
    }

    pub fn delete_entry(&mut self, entry: &ManifestEntry, suffix: Suffix) -> Result<(), TransferError> {
        let path = self.layout.resource_path(entry, suffix);
        debug!(path = %path.display(), "deleting resource");
        match delete_tree(&path) {
            Ok(()) => {
                self.state.record_present(entry, suffix, false);
                Ok(())
            }
            Err(err) => {
                self.state.reprobe(self.layout, entry);
                Err(err)
            }
        }
    }

    /// Deletes the `suffix` location of every resource that has one,
    /// continuing past failures.
    pub fn delete_all(&mut self, suffix: Suffix) -> DeleteReport {
        let manifest = self.manifest;
        let mut report = DeleteReport::default();
        for entry in manifest {
            if !self.state.get(entry).has(suffix) {
                continue;
            }
            match self.delete_entry(entry, suffix) {
                Ok(()) => report.deleted.push(entry.clone()),
                Err(err) => {
                    warn!(resource = %entry, location = %suffix, error = %err, "failed to delete");
                    report.failures.push((entry.clone(), err));
                }
            }
        }
        report
    }

    /// Best-effort inverse transition: every listed resource that still has
    /// a `from` location is copied over `to` and the source removed. Keeps
    /// going past failures and returns them.
    pub fn compensate<'e, I>(
        &mut self,
        entries: I,
        from: Suffix,
        to: Suffix,
    ) -> Vec<(ManifestEntry, TransferError)>
    where
        I: IntoIterator<Item = &'e ManifestEntry>,
    {
        let mut failures = Vec::new();
        for entry in entries {
            if !self.state.get(entry).has(from) {
                continue;
            }
            if let Err(err) = self.transition(
                entry,
                from,
                to,
                TransferMode::CopyThenDelete,
                &AbsenceProfile::default(),
            ) {
                failures.push((entry.clone(), err));
            }
        }
        failures
    }

    /// Compensates the whole manifest, in manifest order.
    pub fn compensate_all(&mut self, from: Suffix, to: Suffix) -> Vec<(ManifestEntry, TransferError)> {
        let manifest = self.manifest;
        self.compensate(manifest, from, to)
    }
}

/// Logs every failed compensation step. Returns true when there were none.
pub fn report_compensation(failures: &[(ManifestEntry, TransferError)]) -> bool {
    for (entry, err) in failures {
        error!(
            resource = %entry,
            error = %err,
            "failed to restore previous state, manual intervention is required"
        );
    }
    failures.is_empty()
}

fn copy_then_delete(source: &Path, destination: &Path) -> Result<(), TransferError> {
    copy_tree(source, destination)?;
    if let Err(err) = delete_tree(source) {
        // The destination is complete; a leftover source is only clutter.
        warn!(path = %source.display(), error = %err, "copied but could not remove source");
    }
    Ok(())
}
