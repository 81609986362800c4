//! Depth-first traversal of resource trees and the copy, delete and move
//! operations built on it. Traversal only reports nodes; what happens at each
//! node is decided by the caller's policy.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, trace, warn};

use crate::error::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    Continue,
    SkipSubtree,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Reported before the directory's children.
    Directory,
    /// Reported after all of the directory's children.
    DirectoryDone,
    File,
    Symlink,
    /// Listed by its parent but gone by the time it was visited.
    Vanished,
}

#[derive(Debug, Clone, Copy)]
pub struct WalkNode<'a> {
    pub path: &'a Path,
    /// Path relative to the walk root; empty for the root itself.
    pub relative: &'a Path,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    Completed,
    Aborted,
}

/// Walks `root` depth-first, children in name order. A missing root is
/// reported as [`TransferError::MissingSource`] without consulting the policy.
pub fn walk_tree<F>(root: &Path, mut policy: F) -> Result<WalkEnd, TransferError>
where
    F: FnMut(WalkNode<'_>) -> Result<WalkAction, TransferError>,
{
    match fs::symlink_metadata(root) {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(TransferError::MissingSource {
                path: root.to_path_buf(),
            });
        }
        Err(err) => return Err(TransferError::io("stat", root, err)),
    }
    walk_node(root, root, &mut policy)
}

fn walk_node<F>(root: &Path, path: &Path, policy: &mut F) -> Result<WalkEnd, TransferError>
where
    F: FnMut(WalkNode<'_>) -> Result<WalkAction, TransferError>,
{
    let relative = path.strip_prefix(root).unwrap_or(Path::new(""));
    let node = |kind| WalkNode {
        path,
        relative,
        kind,
    };

    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return finish(policy(node(NodeKind::Vanished))?);
        }
        Err(err) => return Err(TransferError::io("stat", path, err)),
    };

    if metadata.file_type().is_symlink() {
        return finish(policy(node(NodeKind::Symlink))?);
    }
    if !metadata.is_dir() {
        return finish(policy(node(NodeKind::File))?);
    }

    match policy(node(NodeKind::Directory))? {
        WalkAction::Continue => {}
        WalkAction::SkipSubtree => return Ok(WalkEnd::Completed),
        WalkAction::Abort => return Ok(WalkEnd::Aborted),
    }

    let mut children = Vec::new();
    match fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry.map_err(|err| TransferError::io("read directory", path, err))?;
                children.push(entry.path());
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return finish(policy(node(NodeKind::Vanished))?);
        }
        Err(err) => return Err(TransferError::io("read directory", path, err)),
    }
    children.sort();

    for child in &children {
        if walk_node(root, child, policy)? == WalkEnd::Aborted {
            return Ok(WalkEnd::Aborted);
        }
    }

    finish(policy(node(NodeKind::DirectoryDone))?)
}

fn finish(action: WalkAction) -> Result<WalkEnd, TransferError> {
    match action {
        WalkAction::Abort => Ok(WalkEnd::Aborted),
        WalkAction::Continue | WalkAction::SkipSubtree => Ok(WalkEnd::Completed),
    }
}

fn mirror(destination: &Path, relative: &Path) -> PathBuf {
    if relative.as_os_str().is_empty() {
        destination.to_path_buf()
    } else {
        destination.join(relative)
    }
}

/// Copies a directory tree or a single file onto `destination`, creating
/// missing parents and overwriting existing files. Nothing already present at
/// the destination is removed.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<u64, TransferError> {
    let mut copied = 0_u64;
    walk_tree(source, |node| {
        let target = mirror(destination, node.relative);
        match node.kind {
            NodeKind::Directory => {
                fs::create_dir_all(&target)
                    .map_err(|err| TransferError::io("create directory", &target, err))?;
            }
            NodeKind::File => {
                ensure_parent(&target)?;
                replace_link(&target)?;
                trace!(from = %node.path.display(), to = %target.display(), "copying file");
                fs::copy(node.path, &target)
                    .map_err(|err| TransferError::io("copy file", node.path, err))?;
                copied += 1;
            }
            NodeKind::Symlink => {
                ensure_parent(&target)?;
                copy_symlink(node.path, &target)?;
                copied += 1;
            }
            NodeKind::Vanished => {
                return Err(TransferError::MissingSource {
                    path: node.path.to_path_buf(),
                });
            }
            NodeKind::DirectoryDone => {}
        }
        Ok(WalkAction::Continue)
    })?;
    Ok(copied)
}

fn ensure_parent(target: &Path) -> Result<(), TransferError> {
    if let Some(parent) = target.parent() {
        if !parent.exists() {
            trace!(parent = %parent.display(), "creating missing parent directory");
            fs::create_dir_all(parent)
                .map_err(|err| TransferError::io("create directory", parent, err))?;
        }
    }
    Ok(())
}

// fs::copy follows a symlink at the destination, so an existing link is
// replaced rather than written through.
fn replace_link(target: &Path) -> Result<(), TransferError> {
    match fs::symlink_metadata(target) {
        Ok(metadata) if metadata.file_type().is_symlink() => fs::remove_file(target)
            .map_err(|err| TransferError::io("replace symlink", target, err)),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> Result<(), TransferError> {
    let link = fs::read_link(source).map_err(|err| TransferError::io("read symlink", source, err))?;
    match fs::symlink_metadata(target) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(target)
            .map_err(|err| TransferError::io("replace directory", target, err))?,
        Ok(_) => fs::remove_file(target)
            .map_err(|err| TransferError::io("replace file", target, err))?,
        Err(_) => {}
    }
    std::os::unix::fs::symlink(&link, target)
        .map_err(|err| TransferError::io("create symlink", target, err))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> Result<(), TransferError> {
    fs::copy(source, target)
        .map(|_| ())
        .map_err(|err| TransferError::io("copy file", source, err))
}

/// Deletes a file or directory tree. Nodes that are already gone are skipped,
/// and deletion carries on past failures; the first failure is returned once
/// everything deletable has been deleted.
pub fn delete_tree(path: &Path) -> Result<(), TransferError> {
    let mut first_failure: Option<TransferError> = None;
    let walked = walk_tree(path, |node| {
        let result = match node.kind {
            NodeKind::File | NodeKind::Symlink => {
                trace!(path = %node.path.display(), "deleting file");
                remove_tolerant(fs::remove_file(node.path), "delete file", node.path)
            }
            NodeKind::DirectoryDone => {
                remove_tolerant(fs::remove_dir(node.path), "delete directory", node.path)
            }
            NodeKind::Vanished => {
                debug!(path = %node.path.display(), "already deleted, continuing cleanup");
                return Ok(WalkAction::SkipSubtree);
            }
            NodeKind::Directory => Ok(()),
        };
        if let Err(err) = result {
            warn!(error = %err, "could not delete");
            first_failure.get_or_insert(err);
        }
        Ok(WalkAction::Continue)
    });

    match walked {
        Ok(_) => {}
        Err(TransferError::MissingSource { .. }) => return Ok(()),
        Err(err) => return Err(err),
    }
    match first_failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn remove_tolerant(
    result: io::Result<()>,
    action: &'static str,
    path: &Path,
) -> Result<(), TransferError> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(TransferError::io(action, path, err)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    Renamed,
    Copied,
}

/// Renames `source` onto `destination`, replacing a file or empty directory
/// already there. When the rename is refused the tree is copied instead and
/// the source deleted afterwards; a failed copy removes its partial output so
/// the source remains the only copy.
pub fn move_or_copy(source: &Path, destination: &Path) -> Result<MoveMethod, TransferError> {
    if fs::symlink_metadata(source).is_err() {
        return Err(TransferError::MissingSource {
            path: source.to_path_buf(),
        });
    }
    ensure_parent(destination)?;
    clear_replaceable(destination);

    match fs::rename(source, destination) {
        Ok(()) => return Ok(MoveMethod::Renamed),
        Err(err) => {
            debug!(
                from = %source.display(),
                to = %destination.display(),
                error = %err,
                "rename refused, falling back to copy"
            );
        }
    }

    if let Err(err) = copy_tree(source, destination) {
        if let Err(cleanup) = delete_tree(destination) {
            warn!(error = %cleanup, "failed to remove partial copy");
        }
        return Err(err);
    }
    if let Err(err) = delete_tree(source) {
        warn!(error = %err, "copied but could not remove source");
    }
    Ok(MoveMethod::Copied)
}

fn clear_replaceable(destination: &Path) {
    let Ok(metadata) = fs::symlink_metadata(destination) else {
        return;
    };
    let _ = if metadata.is_dir() {
        // Fails on a non-empty directory, which the rename then reports.
        fs::remove_dir(destination)
    } else {
        fs::remove_file(destination)
    };
}

pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

pub fn make_tmp_dir(base: &Path, prefix: &str) -> Result<PathBuf> {
    fs::create_dir_all(base)
        .with_context(|| format!("failed creating tmp base: {}", base.display()))?;
    let dir = tempfile::Builder::new()
        .prefix(&format!("{prefix}-"))
        .tempdir_in(base)
        .with_context(|| format!("failed creating tmp dir in {}", base.display()))?;
    Ok(dir.keep())
}
