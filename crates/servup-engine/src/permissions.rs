use std::path::Path;

use tracing::{debug, trace};

use crate::error::{TransferError, UpgradeError};
use crate::layout::InstallLayout;
use crate::manifest::ResourceManifest;
use crate::state::Suffix;
use crate::tree::{walk_tree, NodeKind, WalkAction};

#[cfg(unix)]
const EXECUTABLE_MODE: u32 = 0o755;
const BIN_DIR: &str = "bin";
const ADMIN_SCRIPTS: [&str; 2] = ["nadmin", "nadmin.bat"];

/// Marks launcher scripts executable after resources were copied out of an
/// archive, which does not preserve modes. Returns the number of files
/// changed.
pub fn fix_permissions(
    layout: &InstallLayout,
    manifest: &ResourceManifest,
    location: Suffix,
) -> Result<usize, UpgradeError> {
    debug!(location = %location, "fixing file permissions");
    let mut fixed = 0;

    for entry in manifest.iter().filter(|entry| !entry.is_osgi_cache()) {
        let root = layout.resource_path(entry, location);
        let walked = walk_tree(&root, |node| {
            if node.kind == NodeKind::File && in_bin_dir(node.path, location) {
                trace!(path = %node.path.display(), "fixing file permissions");
                make_executable(node.path)?;
                fixed += 1;
            }
            Ok(WalkAction::Continue)
        });
        match walked {
            Ok(_) => {}
            // Whether a missing resource is acceptable was settled by the copy.
            Err(TransferError::MissingSource { .. }) => {
                trace!(resource = %entry, "resource absent, no permissions to fix");
            }
            Err(source) => {
                return Err(UpgradeError::Transfer {
                    resource: entry.to_string(),
                    source,
                })
            }
        }
    }

    let lib_dir = layout.root().join(format!("lib{}", location.as_str()));
    if manifest.iter().any(|entry| entry.to_string() == "lib") {
        for script in ADMIN_SCRIPTS {
            let path = lib_dir.join(script);
            if path.is_file() {
                make_executable(&path).map_err(|source| UpgradeError::Transfer {
                    resource: format!("lib/{script}"),
                    source,
                })?;
                fixed += 1;
            }
        }
    }

    debug!(fixed, "file permissions fixed");
    Ok(fixed)
}

fn in_bin_dir(path: &Path, location: Suffix) -> bool {
    let staged_bin = format!("{BIN_DIR}{}", location.as_str());
    path.parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .is_some_and(|name| name == BIN_DIR || name == staged_bin)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), TransferError> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)
        .map_err(|err| TransferError::io("stat", path, err))?
        .permissions();
    permissions.set_mode(EXECUTABLE_MODE);
    fs::set_permissions(path, permissions)
        .map_err(|err| TransferError::io("set executable mode on", path, err))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), TransferError> {
    Ok(())
}
