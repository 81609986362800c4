use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use tracing::trace;

use crate::layout::InstallLayout;
use crate::manifest::{ManifestEntry, ResourceManifest};

/// One of the three sibling locations a resource can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Suffix {
    Current,
    Staged,
    Backup,
}

impl Suffix {
    pub const ALL: [Suffix; 3] = [Suffix::Current, Suffix::Staged, Suffix::Backup];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Current => "",
            Self::Staged => ".new",
            Self::Backup => ".old",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Staged => "staged",
            Self::Backup => "backup",
        }
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which sibling locations of one resource exist on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceState {
    pub current: bool,
    pub staged: bool,
    pub backup: bool,
}

impl ResourceState {
    pub fn has(&self, suffix: Suffix) -> bool {
        match suffix {
            Suffix::Current => self.current,
            Suffix::Staged => self.staged,
            Suffix::Backup => self.backup,
        }
    }

    pub fn set(&mut self, suffix: Suffix, present: bool) {
        match suffix {
            Suffix::Current => self.current = present,
            Suffix::Staged => self.staged = present,
            Suffix::Backup => self.backup = present,
        }
    }

    /// Moves presence from one location to another after a transition.
    pub fn shift(&mut self, from: Suffix, to: Suffix) {
        self.set(from, false);
        self.set(to, true);
    }

    pub fn is_absent(&self) -> bool {
        !self.current && !self.staged && !self.backup
    }
}

fn probe_entry(layout: &InstallLayout, entry: &ManifestEntry) -> ResourceState {
    let mut state = ResourceState::default();
    for suffix in Suffix::ALL {
        // symlink_metadata so a dangling link still counts as present.
        let present = fs::symlink_metadata(layout.resource_path(entry, suffix)).is_ok();
        state.set(suffix, present);
    }
    state
}

/// Per-resource state of the whole manifest, probed from disk once per
/// workflow and updated in memory as transitions succeed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallState {
    resources: BTreeMap<ManifestEntry, ResourceState>,
    baseline: Option<BTreeMap<ManifestEntry, ResourceState>>,
}

impl InstallState {
    pub fn probe(layout: &InstallLayout, manifest: &ResourceManifest) -> Self {
        let resources = manifest
            .iter()
            .map(|entry| {
                let state = probe_entry(layout, entry);
                trace!(resource = %entry, ?state, "probed resource state");
                (entry.clone(), state)
            })
            .collect();
        Self {
            resources,
            baseline: None,
        }
    }

    pub fn get(&self, entry: &ManifestEntry) -> ResourceState {
        self.resources.get(entry).copied().unwrap_or_default()
    }

    pub fn record(&mut self, entry: &ManifestEntry, state: ResourceState) {
        self.resources.insert(entry.clone(), state);
    }

    pub fn record_shift(&mut self, entry: &ManifestEntry, from: Suffix, to: Suffix) {
        let mut state = self.get(entry);
        state.shift(from, to);
        self.record(entry, state);
    }

    pub fn record_present(&mut self, entry: &ManifestEntry, suffix: Suffix, present: bool) {
        let mut state = self.get(entry);
        state.set(suffix, present);
        self.record(entry, state);
    }

    /// Re-reads one resource after a failure left it in an unknown state.
    pub fn reprobe(&mut self, layout: &InstallLayout, entry: &ManifestEntry) -> ResourceState {
        let state = probe_entry(layout, entry);
        self.record(entry, state);
        state
    }

    /// Snapshots the current state so compensation can tell what a workflow
    /// created from what was already there.
    pub fn mark_baseline(&mut self) {
        self.baseline = Some(self.resources.clone());
    }

    pub fn baseline(&self, entry: &ManifestEntry) -> ResourceState {
        self.baseline
            .as_ref()
            .and_then(|baseline| baseline.get(entry).copied())
            .unwrap_or_default()
    }
}
