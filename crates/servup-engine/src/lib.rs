mod absence;
mod admin;
mod archive;
mod control_files;
mod error;
mod escrow;
mod layout;
mod maintenance;
mod manifest;
mod nodes;
mod permissions;
mod rollback;
mod state;
mod transition;
mod tree;
mod upgrade;

pub use absence::{AbsenceProfile, AbsenceReason, LayoutGeneration};
pub use admin::{backup_domains, restore_domains, DomainAdmin, NadminDomainAdmin};
pub use archive::{extract_zip, ArchiveFetcher, ExtractedDistribution, FetchError};
pub use control_files::{
    render_bat, render_properties, write_control_files, UPGRADE_DIRS_VARIABLE,
};
pub use error::{TransferError, UpgradeError};
pub use escrow::{with_caches_escrowed, CacheEscrow};
pub use layout::{
    read_version_descriptor, InstallLayout, OSGI_CACHE_DIR, UPGRADE_BAT_FILE,
    UPGRADE_PROPERTIES_FILE,
};
pub use maintenance::{apply_staged_upgrade, cleanup_upgrade, reinstall_nodes_only};
pub use manifest::{
    build_manifest, constant_entries, Anchor, ManifestEntry, ResourceManifest,
};
pub use nodes::{
    parse_domain_nodes, reinstall_nodes, NadminNodeInstaller, NodeConfig, NodeInstaller, NodeType,
    SshNode, INSTALL_FAILURE_MARKER,
};
pub use permissions::fix_permissions;
pub use rollback::{rollback_server, NODE_ROLLBACK_WARNING};
pub use state::{InstallState, ResourceState, Suffix};
pub use transition::{
    report_compensation, DeleteReport, StepOutcome, TransferMode, TransitionFailure,
    TransitionReport, Transitioner,
};
pub use tree::{
    copy_tree, delete_tree, move_or_copy, walk_tree, MoveMethod, NodeKind,
    WalkAction, WalkEnd, WalkNode,
};
pub use upgrade::{apply_upgrade, prevalidate, upgrade_server, UpgradePlan, NODE_UPGRADE_WARNING};

#[cfg(test)]
mod tests;
