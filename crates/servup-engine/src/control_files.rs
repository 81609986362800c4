//! Key/value files listing the manifest for the platform scripts that apply,
//! clean up or roll back a staged upgrade.

use std::fs;

use anyhow::{Context, Result};
use tracing::debug;

use crate::layout::InstallLayout;
use crate::manifest::ResourceManifest;
use crate::tree::remove_file_if_exists;

pub const UPGRADE_DIRS_VARIABLE: &str = "PAYARA_UPGRADE_DIRS";

/// Shell-side variant, always with forward slashes.
pub fn render_properties(manifest: &ResourceManifest) -> String {
    format!("{UPGRADE_DIRS_VARIABLE}={}", manifest.render_list('/'))
}

/// Batch-side variant, always with backslashes.
pub fn render_bat(manifest: &ResourceManifest) -> String {
    format!("SET {UPGRADE_DIRS_VARIABLE}={}", manifest.render_list('\\'))
}

/// Replaces both control files in the install's config directory.
pub fn write_control_files(layout: &InstallLayout, manifest: &ResourceManifest) -> Result<()> {
    let files = [
        (layout.upgrade_properties_path(), render_properties(manifest)),
        (layout.upgrade_bat_path(), render_bat(manifest)),
    ];
    for (path, contents) in files {
        remove_file_if_exists(&path)
            .with_context(|| format!("failed to delete existing control file: {}", path.display()))?;
        fs::write(&path, contents)
            .with_context(|| format!("failed to write control file: {}", path.display()))?;
        debug!(path = %path.display(), "wrote control file");
    }
    Ok(())
}
