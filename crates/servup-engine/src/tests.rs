use super::*;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use servup_core::{
    Credentials, DistributionVariant, Outcome, ServerVersion, ToolConfig, UpgradeParameters,
    UpgradeRequest,
};
use tempfile::TempDir;

const NO_NODES_DOMAIN_XML: &str = r#"<domain log-root="${com.sun.aas.instanceRoot}/logs" version="10.0">
  <nodes>
    <node name="localhost-domain1" type="CONFIG" node-host="localhost" install-dir="${com.sun.aas.productRoot}"></node>
  </nodes>
</domain>
"#;

const NODES_DOMAIN_XML: &str = r#"<domain log-root="${com.sun.aas.instanceRoot}/logs" version="10.0">
  <configs></configs>
  <nodes>
    <node name="localhost-domain1" type="CONFIG" node-host="localhost" install-dir="${com.sun.aas.productRoot}"></node>
    <node name="node-a" type="SSH" node-host="a.example.test" install-dir="/opt/payara6">
      <ssh-connector ssh-port="2222">
        <ssh-auth user-name="deploy" keyfile="/home/deploy/.ssh/id_rsa" key-passphrase="p&amp;ss"></ssh-auth>
      </ssh-connector>
    </node>
    <node name="node-b" type="SSH" node-host="b.example.test">
      <ssh-connector>
        <ssh-auth user-name="ops" password="secret"></ssh-auth>
      </ssh-connector>
    </node>
    <node name="dcom-1" type="DCOM" node-host="win.example.test"></node>
  </nodes>
</domain>
"#;

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent dirs");
    }
    fs::write(path, contents).expect("must write file");
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("must read file")
}

fn descriptor(version: (u64, u64, u64), distribution: &str) -> String {
    format!(
        "product_name=Payara Server\nmajor_version={}\nminor_version={}\nupdate_version={}\ndistribution={distribution}\n",
        version.0, version.1, version.2
    )
}

/// Writes what a distribution ships under its `glassfish` directory and next
/// to it. Only full distributions carry the message queue.
fn write_distribution(root: &Path, version: (u64, u64, u64), distribution: &str, marker: &str) {
    let parent = root.parent().expect("root must have a parent").to_path_buf();
    write(&root.join("common/lib/common.jar"), marker);
    write(
        &root.join("config/branding/glassfish-version.properties"),
        &descriptor(version, distribution),
    );
    write(&root.join("config/osgi.properties"), &format!("osgi.marker={marker}\n"));
    write(&parent.join("h2db/h2.jar"), marker);
    write(&root.join("legal/LICENSE.md"), marker);
    write(&root.join("modules/core.jar"), marker);
    write(&root.join("modules/web/web.jar"), marker);
    write(&root.join("osgi/felix.jar"), marker);
    write(&root.join("lib/nadmin"), &format!("#!/bin/sh\n# {marker}\n"));
    write(&root.join("lib/nadmin.bat"), marker);
    write(&parent.join("README.txt"), marker);
    write(&parent.join("LICENSE.txt"), marker);
    write(&root.join("bin/asadmin"), marker);
    write(&parent.join("bin/asadmin"), marker);
    if distribution == "payara" {
        write(&parent.join("mq/bin/imqbrokerd"), marker);
        write(&parent.join("mq/lib/imq.jar"), marker);
    }
}

fn install_fixture(temp: &TempDir, distribution: &str, domain_xml: &str) -> InstallLayout {
    let root = temp.path().join("payara6").join("glassfish");
    write_distribution(&root, (6, 1, 0), distribution, "old");
    write(&root.join("domains/domain1/config/domain.xml"), domain_xml);
    write(
        &root.join("domains/domain1/osgi-cache/felix/bundle0/state"),
        "cache",
    );
    InstallLayout::new(root)
}

fn distribution_fixture(temp: &TempDir, distribution: &str) -> ExtractedDistribution {
    let extract = temp.path().join("extract");
    let root = extract.join("payara6").join("glassfish");
    write_distribution(&root, (6, 2, 0), distribution, "new");
    ExtractedDistribution::open(&extract).expect("must open extracted distribution")
}

fn full_plan(stage: bool) -> UpgradePlan {
    UpgradePlan {
        stage,
        current: AbsenceProfile::new(
            Some(DistributionVariant::Full),
            Some(&ServerVersion::new(6, 1, 0)),
        ),
        target: AbsenceProfile::new(
            Some(DistributionVariant::Full),
            Some(&ServerVersion::new(6, 2, 0)),
        ),
    }
}

fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    collect_files(dir, dir, &mut files);
    files
}

fn collect_files(base: &Path, dir: &Path, files: &mut BTreeMap<String, Vec<u8>>) {
    let mut children = fs::read_dir(dir)
        .expect("must read dir")
        .map(|entry| entry.expect("must read dir entry").path())
        .collect::<Vec<_>>();
    children.sort();
    for path in children {
        if path.is_dir() {
            collect_files(base, &path, files);
        } else {
            let relative = path
                .strip_prefix(base)
                .expect("must be inside base")
                .to_string_lossy()
                .replace('\\', "/");
            files.insert(relative, fs::read(&path).expect("must read file"));
        }
    }
}

fn leftover_suffixes(files: &BTreeMap<String, Vec<u8>>) -> Vec<String> {
    files
        .keys()
        .filter(|path| {
            path.split('/')
                .any(|part| part.ends_with(".old") || part.ends_with(".new"))
        })
        .cloned()
        .collect()
}

#[derive(Default)]
struct RecordingAdmin {
    calls: Vec<String>,
    fail_backup: bool,
    /// Simulates restore-domain rewriting the domain, cache included.
    clobber_root: Option<PathBuf>,
}

impl DomainAdmin for RecordingAdmin {
    fn backup_domain(&mut self, domain: &str) -> anyhow::Result<()> {
        self.calls.push(format!("backup-domain {domain}"));
        if self.fail_backup {
            return Err(anyhow!("backup refused"));
        }
        Ok(())
    }

    fn restore_domain(&mut self, domain: &str) -> anyhow::Result<()> {
        self.calls.push(format!("restore-domain {domain}"));
        if let Some(root) = &self.clobber_root {
            let cache = root.join("domains").join(domain).join(OSGI_CACHE_DIR);
            fs::create_dir_all(&cache)?;
            fs::write(cache.join("clobbered"), "restore output")?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedInstaller {
    failing: Vec<String>,
    attempted: Vec<String>,
}

impl NodeInstaller for ScriptedInstaller {
    fn install_ssh_node(&mut self, node: &SshNode) -> anyhow::Result<()> {
        self.attempted.push(node.name.clone());
        if self.failing.contains(&node.name) {
            return Err(anyhow!("{INSTALL_FAILURE_MARKER}"));
        }
        Ok(())
    }
}

struct StatusFetcher {
    status: u16,
    requested: Vec<String>,
}

impl ArchiveFetcher for StatusFetcher {
    fn fetch(
        &mut self,
        url: &str,
        _credentials: &Credentials,
        _destination: &Path,
    ) -> Result<(), FetchError> {
        self.requested.push(url.to_string());
        match self.status {
            404 => Err(FetchError::NotFound),
            other => Err(FetchError::Status(other)),
        }
    }
}

fn entry(raw: &str) -> ManifestEntry {
    ManifestEntry::parse(raw).expect("must parse manifest entry")
}

#[test]
fn walk_tree_visits_children_in_name_order() {
    let temp = TempDir::new().expect("must create temp dir");
    write(&temp.path().join("tree/b.txt"), "b");
    write(&temp.path().join("tree/a/x.txt"), "x");

    let mut visited = Vec::new();
    let end = walk_tree(&temp.path().join("tree"), |node| {
        visited.push((node.relative.to_string_lossy().replace('\\', "/"), node.kind));
        Ok(WalkAction::Continue)
    })
    .expect("must walk tree");

    assert_eq!(end, WalkEnd::Completed);
    assert_eq!(
        visited,
        vec![
            (String::new(), NodeKind::Directory),
            ("a".to_string(), NodeKind::Directory),
            ("a/x.txt".to_string(), NodeKind::File),
            ("a".to_string(), NodeKind::DirectoryDone),
            ("b.txt".to_string(), NodeKind::File),
            (String::new(), NodeKind::DirectoryDone),
        ]
    );
}

#[test]
fn walk_tree_honours_skip_and_abort() {
    let temp = TempDir::new().expect("must create temp dir");
    write(&temp.path().join("tree/a/x.txt"), "x");
    write(&temp.path().join("tree/b.txt"), "b");
    write(&temp.path().join("tree/c.txt"), "c");

    let mut files = Vec::new();
    walk_tree(&temp.path().join("tree"), |node| {
        if node.kind == NodeKind::Directory && node.relative == Path::new("a") {
            return Ok(WalkAction::SkipSubtree);
        }
        if node.kind == NodeKind::File {
            files.push(node.relative.to_path_buf());
        }
        Ok(WalkAction::Continue)
    })
    .expect("must walk tree");
    assert_eq!(files, vec![PathBuf::from("b.txt"), PathBuf::from("c.txt")]);

    let mut seen = 0;
    let end = walk_tree(&temp.path().join("tree"), |node| {
        if node.kind == NodeKind::File {
            seen += 1;
            return Ok(WalkAction::Abort);
        }
        Ok(WalkAction::Continue)
    })
    .expect("must walk tree");
    assert_eq!(end, WalkEnd::Aborted);
    assert_eq!(seen, 1);
}

#[test]
fn walk_tree_reports_missing_root() {
    let temp = TempDir::new().expect("must create temp dir");
    let err = walk_tree(&temp.path().join("absent"), |_| Ok(WalkAction::Continue))
        .expect_err("missing root must fail");
    assert!(err.is_missing_source());
}

#[test]
fn copy_tree_overwrites_and_keeps_extra_destination_files() {
    let temp = TempDir::new().expect("must create temp dir");
    let src = temp.path().join("src");
    let dst = temp.path().join("dst");
    write(&src.join("lib/a.jar"), "new-a");
    write(&src.join("lib/deep/b.jar"), "new-b");
    write(&dst.join("lib/a.jar"), "old-a");
    write(&dst.join("lib/extra.jar"), "extra");

    let copied = copy_tree(&src, &dst).expect("must copy tree");

    assert_eq!(copied, 2);
    assert_eq!(read(&dst.join("lib/a.jar")), "new-a");
    assert_eq!(read(&dst.join("lib/deep/b.jar")), "new-b");
    assert_eq!(read(&dst.join("lib/extra.jar")), "extra");
}

#[test]
fn copy_tree_copies_single_file_roots() {
    let temp = TempDir::new().expect("must create temp dir");
    write(&temp.path().join("README.txt"), "readme");

    copy_tree(
        &temp.path().join("README.txt"),
        &temp.path().join("nested/README.txt.old"),
    )
    .expect("must copy file");

    assert_eq!(read(&temp.path().join("nested/README.txt.old")), "readme");
}

#[cfg(unix)]
#[test]
fn copy_tree_recreates_symlinks() {
    let temp = TempDir::new().expect("must create temp dir");
    let src = temp.path().join("src");
    write(&src.join("real.txt"), "real");
    std::os::unix::fs::symlink("real.txt", src.join("link.txt")).expect("must create symlink");

    copy_tree(&src, &temp.path().join("dst")).expect("must copy tree");

    let link = fs::read_link(temp.path().join("dst/link.txt")).expect("must read link");
    assert_eq!(link, PathBuf::from("real.txt"));
}

#[test]
fn delete_tree_tolerates_absent_paths() {
    let temp = TempDir::new().expect("must create temp dir");
    delete_tree(&temp.path().join("never-created")).expect("absent path must be fine");

    write(&temp.path().join("doomed/a/b/c.txt"), "c");
    write(&temp.path().join("doomed/d.txt"), "d");
    delete_tree(&temp.path().join("doomed")).expect("must delete tree");
    assert!(!temp.path().join("doomed").exists());
}

#[test]
fn move_or_copy_replaces_empty_destination_directory() {
    let temp = TempDir::new().expect("must create temp dir");
    write(&temp.path().join("modules/core.jar"), "core");
    fs::create_dir_all(temp.path().join("modules.old")).expect("must create empty dir");

    let method = move_or_copy(&temp.path().join("modules"), &temp.path().join("modules.old"))
        .expect("must move");

    assert_eq!(method, MoveMethod::Renamed);
    assert!(!temp.path().join("modules").exists());
    assert_eq!(read(&temp.path().join("modules.old/core.jar")), "core");
}

#[test]
fn manifest_entries_render_per_platform() {
    let manifest = ResourceManifest::from_entries(vec![
        entry("config/branding"),
        entry("../mq"),
        entry("config\\branding"),
        ManifestEntry::osgi_cache("domain1"),
    ]);

    assert_eq!(manifest.len(), 3);
    assert_eq!(
        manifest.render_list('/'),
        "config/branding,../mq,domains/domain1/osgi-cache"
    );
    assert_eq!(
        manifest.render_list('\\'),
        "config\\branding,..\\mq,domains\\domain1\\osgi-cache"
    );
    assert_eq!(
        ManifestEntry::osgi_cache("domain1").osgi_cache_domain(),
        Some("domain1")
    );
    assert!(ManifestEntry::parse("../../outside").is_err());
    assert!(ManifestEntry::parse("lib/../../x").is_err());
}

#[test]
fn build_manifest_adds_present_caches_only() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    let root = layout.root().to_path_buf();
    write(&root.join("domains/domain2/config/domain.xml"), NO_NODES_DOMAIN_XML);
    write(&root.join("domains/domain3/osgi-cache.old/state"), "cache");

    let manifest = build_manifest(&layout).expect("must build manifest");

    assert_eq!(manifest.len(), constant_entries().len() + 2);
    assert_eq!(manifest.entries()[0], entry("common"));
    assert!(manifest.contains(&ManifestEntry::osgi_cache("domain1")));
    assert!(!manifest.contains(&ManifestEntry::osgi_cache("domain2")));
    assert!(manifest.contains(&ManifestEntry::osgi_cache("domain3")));
}

#[test]
fn build_manifest_fails_without_domains_directory() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = InstallLayout::new(temp.path().join("glassfish"));
    let err = build_manifest(&layout).expect_err("missing domains dir must fail");
    assert!(matches!(err, UpgradeError::Manifest { .. }));
}

#[test]
fn control_files_use_each_platform_separator() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = InstallLayout::new(temp.path().join("glassfish"));
    fs::create_dir_all(layout.config_dir()).expect("must create config dir");
    write(&layout.upgrade_properties_path(), "stale");
    let manifest = ResourceManifest::from_entries(vec![
        entry("config/branding"),
        entry("../mq"),
        entry("bin"),
    ]);

    write_control_files(&layout, &manifest).expect("must write control files");

    assert_eq!(
        read(&layout.upgrade_properties_path()),
        "PAYARA_UPGRADE_DIRS=config/branding,../mq,bin"
    );
    assert_eq!(
        read(&layout.upgrade_bat_path()),
        "SET PAYARA_UPGRADE_DIRS=config\\branding,..\\mq,bin"
    );
}

#[test]
fn acceptable_absence_depends_on_variant_and_generation() {
    let full_current = AbsenceProfile::new(
        Some(DistributionVariant::Full),
        Some(&ServerVersion::new(6, 1, 0)),
    );
    let web_legacy = AbsenceProfile::new(
        Some(DistributionVariant::Web),
        Some(&ServerVersion::new(5, 34, 0)),
    );
    let unknown = AbsenceProfile::default();

    assert_eq!(full_current.acceptable_absence(&entry("../mq")), None);
    assert_eq!(
        web_legacy.acceptable_absence(&entry("../mq")),
        Some(AbsenceReason::MessageQueueOnWebDistribution)
    );
    assert!(unknown.acceptable_absence(&entry("../mq")).is_some());

    assert_eq!(
        full_current.acceptable_absence(&entry("h2db")),
        Some(AbsenceReason::LegacyDuplicateDirectory)
    );
    assert_eq!(web_legacy.acceptable_absence(&entry("h2db")), None);
    assert_eq!(full_current.acceptable_absence(&entry("../h2db")), None);

    assert_eq!(
        full_current.acceptable_absence(&ManifestEntry::osgi_cache("domain1")),
        Some(AbsenceReason::CacheNeverCreated)
    );
    assert_eq!(full_current.acceptable_absence(&entry("modules")), None);
}

#[test]
fn transition_skips_acceptable_absence_and_aborts_otherwise() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara-web", NO_NODES_DOMAIN_XML);
    let manifest = build_manifest(&layout).expect("must build manifest");
    let web = AbsenceProfile::new(
        Some(DistributionVariant::Web),
        Some(&ServerVersion::new(6, 1, 0)),
    );

    let mut transitioner = Transitioner::new(&layout, &manifest);
    let report = transitioner
        .transition_all(Suffix::Current, Suffix::Backup, TransferMode::Move, &web)
        .expect("web install without mq must move");
    assert!(report
        .skipped
        .iter()
        .any(|(skipped, reason)| *skipped == entry("../mq")
            && *reason == AbsenceReason::MessageQueueOnWebDistribution));
    assert!(layout.modules_dir(Suffix::Backup).exists());

    // Move everything back, then lose a resource that must exist.
    let failures = transitioner.compensate_all(Suffix::Backup, Suffix::Current);
    assert!(failures.is_empty());
    fs::remove_dir_all(layout.root().join("legal")).expect("must remove legal");

    let mut transitioner = Transitioner::new(&layout, &manifest);
    let failure = transitioner
        .transition_all(Suffix::Current, Suffix::Backup, TransferMode::Move, &web)
        .expect_err("missing legal must abort");
    assert_eq!(failure.failed, entry("legal"));
    assert!(failure.source.is_missing_source());
    assert!(failure.completed.contains(&entry("common")));
    assert!(failure.pending.contains(&entry("modules")));
    assert!(layout.root().join("modules").exists());
}

#[test]
fn install_state_probe_tracks_all_locations() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    write(&layout.root().join("modules.new/core.jar"), "staged");
    let manifest = build_manifest(&layout).expect("must build manifest");

    let state = InstallState::probe(&layout, &manifest);

    let modules = state.get(&entry("modules"));
    assert!(modules.current && modules.staged && !modules.backup);
    assert!(state.get(&entry("h2db")).is_absent());
}

#[test]
fn rollback_without_backup_fails_without_touching_anything() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    write(&layout.root().join("modules.new/core.jar"), "stale staged");
    let before = snapshot(&layout.parent_dir());

    let mut admin = RecordingAdmin::default();
    let mut installer = ScriptedInstaller::default();
    let outcome = rollback_server(&layout, &mut admin, &mut installer);

    assert_eq!(outcome, Outcome::Error);
    assert_eq!(snapshot(&layout.parent_dir()), before);
    assert!(admin.calls.is_empty());
    assert!(installer.attempted.is_empty());
}

#[test]
fn failed_copy_restores_already_moved_resources() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    let distribution = distribution_fixture(&temp, "payara");
    fs::remove_dir_all(distribution.install_root().join("modules"))
        .expect("must drop modules from distribution");
    let manifest = ResourceManifest::from_entries(vec![entry("common"), entry("modules")]);
    let before = snapshot(&layout.parent_dir());

    let mut admin = RecordingAdmin::default();
    let mut installer = ScriptedInstaller::default();
    let outcome = apply_upgrade(
        &layout,
        &manifest,
        &distribution,
        &full_plan(false),
        &mut admin,
        &mut installer,
    );

    assert_eq!(outcome, Outcome::Error);
    let after = snapshot(&layout.parent_dir());
    assert_eq!(after, before);
    assert!(leftover_suffixes(&after).is_empty());
    assert_eq!(admin.calls, vec!["backup-domain domain1".to_string()]);
    assert!(installer.attempted.is_empty());
}

#[test]
fn failed_domain_backup_aborts_before_any_change() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    let distribution = distribution_fixture(&temp, "payara");
    let manifest = build_manifest(&layout).expect("must build manifest");
    let before = snapshot(&layout.parent_dir());

    let mut admin = RecordingAdmin {
        fail_backup: true,
        ..RecordingAdmin::default()
    };
    let outcome = apply_upgrade(
        &layout,
        &manifest,
        &distribution,
        &full_plan(false),
        &mut admin,
        &mut ScriptedInstaller::default(),
    );

    assert_eq!(outcome, Outcome::Error);
    assert_eq!(snapshot(&layout.parent_dir()), before);
}

#[test]
fn download_not_found_leaves_installation_untouched() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    let before = snapshot(&layout.parent_dir());
    let params = UpgradeParameters::from_request(UpgradeRequest {
        distribution: Some("payara".to_string()),
        version: Some("6.2.0".to_string()),
        username: Some("ops".to_string()),
        password: Some("secret".to_string()),
        java_version: Some(17),
        ..UpgradeRequest::default()
    })
    .expect("parameters must validate");

    let mut fetcher = StatusFetcher {
        status: 404,
        requested: Vec::new(),
    };
    let mut admin = RecordingAdmin::default();
    let outcome = upgrade_server(
        &layout,
        &ToolConfig::default(),
        &params,
        &mut fetcher,
        &mut admin,
        &mut ScriptedInstaller::default(),
    );

    assert_eq!(outcome, Outcome::Error);
    assert_eq!(
        fetcher.requested,
        vec![ToolConfig::default().download_url("payara", "6.2.0")]
    );
    assert!(admin.calls.is_empty());

    let after = snapshot(&layout.parent_dir());
    for (path, contents) in &before {
        assert_eq!(after.get(path), Some(contents), "{path} changed");
    }
    let added = after
        .keys()
        .filter(|path| !before.contains_key(*path))
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(
        added,
        vec![
            "glassfish/config/upgrade-tool.bat".to_string(),
            "glassfish/config/upgrade-tool.properties".to_string(),
        ]
    );
}

#[test]
fn upgrade_rejects_downgrade_before_download() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    let params = UpgradeParameters::from_request(UpgradeRequest {
        version: Some("6.0.0".to_string()),
        username: Some("ops".to_string()),
        password: Some("secret".to_string()),
        java_version: Some(17),
        ..UpgradeRequest::default()
    })
    .expect("parameters must validate");

    let err = prevalidate(&layout, &params).expect_err("downgrade must fail");
    assert!(err.to_string().contains("You can't downgrade from 6.1.0 to 6.0.0"));

    let mut fetcher = StatusFetcher {
        status: 500,
        requested: Vec::new(),
    };
    let outcome = upgrade_server(
        &layout,
        &ToolConfig::default(),
        &params,
        &mut fetcher,
        &mut RecordingAdmin::default(),
        &mut ScriptedInstaller::default(),
    );
    assert_eq!(outcome, Outcome::Error);
    assert!(fetcher.requested.is_empty());
}

#[test]
fn prevalidate_rejects_distribution_mismatch() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara-web", NO_NODES_DOMAIN_XML);
    let params = UpgradeParameters::from_request(UpgradeRequest {
        distribution: Some("payara".to_string()),
        version: Some("6.2.0".to_string()),
        username: Some("ops".to_string()),
        password: Some("secret".to_string()),
        ..UpgradeRequest::default()
    })
    .expect("parameters must validate");

    let err = prevalidate(&layout, &params).expect_err("mismatch must fail");
    assert!(err
        .to_string()
        .contains("The current distribution (payara-web) you are running does not match"));
}

#[test]
fn prevalidate_compares_unknown_distributions_by_name() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara-micro", NO_NODES_DOMAIN_XML);
    let request = |distribution: &str| {
        UpgradeParameters::from_request(UpgradeRequest {
            distribution: Some(distribution.to_string()),
            version: Some("6.2.0".to_string()),
            username: Some("ops".to_string()),
            password: Some("secret".to_string()),
            java_version: Some(17),
            ..UpgradeRequest::default()
        })
        .expect("parameters must validate")
    };

    let err = prevalidate(&layout, &request("payara")).expect_err("unknown installed distribution must fail");
    assert!(err
        .to_string()
        .contains("The current distribution (payara-micro) you are running does not match"));

    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "PAYARA", NO_NODES_DOMAIN_XML);
    let current = prevalidate(&layout, &request("payara")).expect("case must not matter");
    assert_eq!(current.version, ServerVersion::new(6, 1, 0));

    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "", NO_NODES_DOMAIN_XML);
    prevalidate(&layout, &request("payara-web")).expect("undeclared distribution is not validated");
}

#[test]
fn upgrade_then_rollback_restores_identical_content() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    let distribution = distribution_fixture(&temp, "payara");
    let manifest = build_manifest(&layout).expect("must build manifest");
    let before = snapshot(&layout.parent_dir());

    let mut admin = RecordingAdmin {
        clobber_root: Some(layout.root().to_path_buf()),
        ..RecordingAdmin::default()
    };
    let mut installer = ScriptedInstaller::default();
    let outcome = apply_upgrade(
        &layout,
        &manifest,
        &distribution,
        &full_plan(false),
        &mut admin,
        &mut installer,
    );
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(read(&layout.root().join("modules/core.jar")), "new");
    assert_eq!(read(&layout.root().join("modules.old/core.jar")), "old");
    assert_eq!(read(&layout.parent_dir().join("mq.old/lib/imq.jar")), "old");
    assert!(!layout.osgi_cache_dir("domain1").exists());
    assert!(layout
        .domain_dir("domain1")
        .join("osgi-cache.old/felix/bundle0/state")
        .exists());

    let outcome = rollback_server(&layout, &mut admin, &mut installer);

    assert_eq!(outcome, Outcome::Success);
    assert_eq!(
        admin.calls,
        vec![
            "backup-domain domain1".to_string(),
            "restore-domain domain1".to_string(),
        ]
    );
    let after = snapshot(&layout.parent_dir());
    assert_eq!(after, before);
    assert!(leftover_suffixes(&after).is_empty());
}

#[test]
fn staged_upgrade_leaves_current_untouched_until_applied() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    let distribution = distribution_fixture(&temp, "payara");
    let manifest = build_manifest(&layout).expect("must build manifest");

    let mut installer = ScriptedInstaller::default();
    let outcome = apply_upgrade(
        &layout,
        &manifest,
        &distribution,
        &full_plan(true),
        &mut RecordingAdmin::default(),
        &mut installer,
    );
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(read(&layout.root().join("modules/core.jar")), "old");
    assert_eq!(read(&layout.root().join("modules.new/core.jar")), "new");
    assert_eq!(read(&layout.parent_dir().join("README.txt.new")), "new");
    assert!(!layout.modules_dir(Suffix::Backup).exists());
    assert!(!layout.domain_dir("domain1").join("osgi-cache.new").exists());

    let outcome = apply_staged_upgrade(&layout, &mut installer);
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(read(&layout.root().join("modules/core.jar")), "new");
    assert_eq!(read(&layout.root().join("modules.old/core.jar")), "old");
    assert!(!layout.modules_dir(Suffix::Staged).exists());

    let outcome = cleanup_upgrade(&layout);
    assert_eq!(outcome, Outcome::Success);
    assert!(leftover_suffixes(&snapshot(&layout.parent_dir())).is_empty());
    assert_eq!(read(&layout.root().join("modules/core.jar")), "new");
}

/// Runs a successful in-place upgrade so a backup exists to roll back to.
fn upgraded_fixture(temp: &TempDir, domain_xml: &str) -> (InstallLayout, RecordingAdmin) {
    let layout = install_fixture(temp, "payara", domain_xml);
    let distribution = distribution_fixture(temp, "payara");
    let manifest = build_manifest(&layout).expect("must build manifest");
    let mut admin = RecordingAdmin::default();
    let outcome = apply_upgrade(
        &layout,
        &manifest,
        &distribution,
        &full_plan(false),
        &mut admin,
        &mut ScriptedInstaller::default(),
    );
    assert_eq!(outcome, Outcome::Success);
    (layout, admin)
}

#[test]
fn rollback_with_incomplete_backup_puts_everything_back() {
    let temp = TempDir::new().expect("must create temp dir");
    let (layout, mut admin) = upgraded_fixture(&temp, NO_NODES_DOMAIN_XML);
    fs::remove_dir_all(layout.root().join("lib.old")).expect("must remove lib backup");
    let before = snapshot(&layout.parent_dir());

    let mut installer = ScriptedInstaller::default();
    let outcome = rollback_server(&layout, &mut admin, &mut installer);

    assert_eq!(outcome, Outcome::Error);
    assert_eq!(snapshot(&layout.parent_dir()), before);
    assert_eq!(read(&layout.root().join("modules/core.jar")), "new");
    assert_eq!(read(&layout.root().join("modules.old/core.jar")), "old");
    assert!(!layout.modules_dir(Suffix::Staged).exists());
    assert_eq!(admin.calls, vec!["backup-domain domain1".to_string()]);
    assert!(installer.attempted.is_empty());
}

#[test]
fn rollback_with_unreadable_node_configuration_puts_everything_back() {
    let temp = TempDir::new().expect("must create temp dir");
    let (layout, mut admin) = upgraded_fixture(&temp, NO_NODES_DOMAIN_XML);
    write(&layout.domain_xml_path("domain1"), "this is not a domain configuration");
    let before = snapshot(&layout.parent_dir());

    let mut installer = ScriptedInstaller::default();
    let outcome = rollback_server(&layout, &mut admin, &mut installer);

    assert_eq!(outcome, Outcome::Error);
    assert_eq!(snapshot(&layout.parent_dir()), before);
    assert_eq!(read(&layout.root().join("modules/core.jar")), "new");
    assert!(!layout.modules_dir(Suffix::Staged).exists());
    assert_eq!(admin.calls, vec!["backup-domain domain1".to_string()]);
    assert!(installer.attempted.is_empty());
}

#[test]
fn failed_staging_removes_partial_staged_copies() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    let distribution = distribution_fixture(&temp, "payara");
    fs::remove_dir_all(distribution.install_root().join("osgi"))
        .expect("must drop osgi from distribution");
    let manifest = build_manifest(&layout).expect("must build manifest");
    let before = snapshot(&layout.parent_dir());

    let outcome = apply_upgrade(
        &layout,
        &manifest,
        &distribution,
        &full_plan(true),
        &mut RecordingAdmin::default(),
        &mut ScriptedInstaller::default(),
    );

    assert_eq!(outcome, Outcome::Error);
    let after = snapshot(&layout.parent_dir());
    assert_eq!(after, before);
    assert!(leftover_suffixes(&after).is_empty());
    assert!(!layout.modules_dir(Suffix::Staged).exists());
}

#[test]
fn apply_staged_upgrade_requires_staged_modules() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    let before = snapshot(&layout.parent_dir());

    let outcome = apply_staged_upgrade(&layout, &mut ScriptedInstaller::default());

    assert_eq!(outcome, Outcome::Error);
    assert_eq!(snapshot(&layout.parent_dir()), before);
}

#[test]
fn node_failures_are_aggregated_into_a_warning() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NODES_DOMAIN_XML);
    let distribution = distribution_fixture(&temp, "payara");
    let manifest = build_manifest(&layout).expect("must build manifest");

    let mut installer = ScriptedInstaller {
        failing: vec!["node-a".to_string()],
        ..ScriptedInstaller::default()
    };
    let outcome = apply_upgrade(
        &layout,
        &manifest,
        &distribution,
        &full_plan(false),
        &mut RecordingAdmin::default(),
        &mut installer,
    );

    assert_eq!(outcome, Outcome::Warning);
    assert_eq!(installer.attempted, vec!["node-a", "node-b"]);
    assert_eq!(read(&layout.root().join("modules/core.jar")), "new");

    let err = reinstall_nodes(&layout, &mut installer).expect_err("node-a still fails");
    assert_eq!(err.to_string(), "Error reinstalling nodes: node-a");
    assert_eq!(reinstall_nodes_only(&layout, &mut installer), Outcome::Warning);
}

#[test]
fn unreadable_node_configuration_undoes_the_upgrade() {
    let temp = TempDir::new().expect("must create temp dir");
    let broken = r#"<domain><nodes><node type="SSH" node-host="a.example.test"/></nodes></domain>"#;
    let layout = install_fixture(&temp, "payara", broken);
    let distribution = distribution_fixture(&temp, "payara");
    let manifest = build_manifest(&layout).expect("must build manifest");
    let before = snapshot(&layout.parent_dir());

    let mut installer = ScriptedInstaller::default();
    let outcome = apply_upgrade(
        &layout,
        &manifest,
        &distribution,
        &full_plan(false),
        &mut RecordingAdmin::default(),
        &mut installer,
    );

    assert_eq!(outcome, Outcome::Error);
    assert!(installer.attempted.is_empty());
    assert_eq!(snapshot(&layout.parent_dir()), before);
}

#[test]
fn parse_domain_nodes_classifies_node_types() {
    let nodes = parse_domain_nodes(NODES_DOMAIN_XML, "domain1", "/opt/payara6")
        .expect("must parse nodes");

    assert_eq!(nodes.len(), 4);
    assert_eq!(nodes[0].kind, NodeType::DefaultLocal);
    let NodeType::Ssh(node_a) = &nodes[1].kind else {
        panic!("node-a must be an SSH node");
    };
    assert_eq!(node_a.host, "a.example.test");
    assert_eq!(node_a.install_dir, "/opt/payara6");
    assert_eq!(node_a.port, "2222");
    assert_eq!(node_a.user.as_deref(), Some("deploy"));
    assert_eq!(node_a.key_file.as_deref(), Some("/home/deploy/.ssh/id_rsa"));
    assert_eq!(
        node_a.secret_lines(),
        vec!["AS_ADMIN_SSHKEYPASSPHRASE=p&ss".to_string()]
    );

    let NodeType::Ssh(node_b) = &nodes[2].kind else {
        panic!("node-b must be an SSH node");
    };
    assert_eq!(node_b.port, "22");
    assert_eq!(node_b.install_dir, "/opt/payara6");
    assert_eq!(
        node_b.secret_lines(),
        vec!["AS_ADMIN_SSHPASSWORD=secret".to_string()]
    );
    assert!(!format!("{node_b:?}").contains("secret"));

    assert_eq!(
        nodes[3].kind,
        NodeType::Other {
            node_type: "DCOM".to_string()
        }
    );
}

#[test]
fn parse_domain_nodes_rejects_malformed_configuration() {
    assert!(parse_domain_nodes("<config></config>", "domain1", "/opt").is_err());
    let missing_name = r#"<domain><nodes><node type="SSH" node-host="h"/></nodes></domain>"#;
    assert!(parse_domain_nodes(missing_name, "domain1", "/opt").is_err());
    let missing_host = r#"<domain><nodes><node name="n" type="SSH"/></nodes></domain>"#;
    assert!(parse_domain_nodes(missing_host, "domain1", "/opt").is_err());
    let no_nodes = r#"<domain><configs/></domain>"#;
    assert_eq!(
        parse_domain_nodes(no_nodes, "domain1", "/opt").expect("must parse"),
        Vec::new()
    );
}

#[test]
fn parse_domain_nodes_ignores_commented_out_nodes() {
    let xml = r#"<domain>
  <!-- <nodes><node name="decoy" type="SSH" node-host="old.example.test"></node></nodes> -->
  <nodes>
    <node name="localhost-domain1" type="CONFIG" node-host="localhost"></node>
    <!-- <node name="retired" type="SSH" node-host="gone.example.test"></node> -->
    <!--
    <node name="also-retired" type="SSH"
    -->
  </nodes>
</domain>"#;

    let nodes = parse_domain_nodes(xml, "domain1", "/opt/payara6").expect("must parse nodes");

    let names = nodes.iter().map(|node| node.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["localhost-domain1"]);
    assert_eq!(nodes[0].kind, NodeType::DefaultLocal);
}

#[test]
fn node_installer_passes_secrets_on_stdin_only() {
    let nodes = parse_domain_nodes(NODES_DOMAIN_XML, "domain1", "/opt/payara6")
        .expect("must parse nodes");
    let NodeType::Ssh(node_a) = &nodes[1].kind else {
        panic!("node-a must be an SSH node");
    };
    let installer = NadminNodeInstaller::new(
        "/opt/payara6/glassfish/lib/nadmin",
        std::time::Duration::from_secs(300),
    );

    let command = installer.build_command(node_a);
    let args = command
        .get_args()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>();

    assert_eq!(
        args,
        vec![
            "--interactive=false",
            "--passwordfile",
            "-",
            "install-node-ssh",
            "--installdir",
            "/opt/payara6",
            "--force",
            "--sshport",
            "2222",
            "--sshuser",
            "deploy",
            "--sshkeyfile",
            "/home/deploy/.ssh/id_rsa",
            "a.example.test",
        ]
    );
    assert!(!args.iter().any(|arg| arg.contains("p&ss")));
}

#[cfg(unix)]
fn fake_nadmin(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("nadmin");
    fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("must write fake nadmin");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
        .expect("must mark fake nadmin executable");
    script
}

#[cfg(unix)]
fn password_node() -> SshNode {
    SshNode {
        name: "node-b".to_string(),
        host: "b.example.test".to_string(),
        install_dir: "/opt/payara6".to_string(),
        port: "22".to_string(),
        user: Some("ops".to_string()),
        key_file: None,
        password: Some("secret".to_string()),
        key_passphrase: None,
    }
}

#[cfg(unix)]
#[test]
fn node_installer_feeds_password_file_on_stdin() {
    let temp = TempDir::new().expect("must create temp dir");
    let captured = temp.path().join("stdin.txt");
    let script = fake_nadmin(
        temp.path(),
        &format!("cat > '{}'\necho \"Command install-node-ssh executed successfully.\"", captured.display()),
    );
    let mut installer = NadminNodeInstaller::new(&script, std::time::Duration::from_secs(30));

    installer
        .install_ssh_node(&password_node())
        .expect("install must succeed");

    assert_eq!(read(&captured), "AS_ADMIN_SSHPASSWORD=secret\n");
}

#[cfg(unix)]
#[test]
fn node_installer_detects_failure_marker_despite_zero_exit() {
    let temp = TempDir::new().expect("must create temp dir");
    let script = fake_nadmin(
        temp.path(),
        "cat > /dev/null\necho \"Command install-node-ssh failed.\"\nexit 0",
    );
    let mut installer = NadminNodeInstaller::new(&script, std::time::Duration::from_secs(30));

    let err = installer
        .install_ssh_node(&password_node())
        .expect_err("marker must fail the install");

    assert_eq!(err.to_string(), INSTALL_FAILURE_MARKER);
}

#[cfg(unix)]
#[test]
fn node_installer_reports_output_when_stdin_is_never_read() {
    let temp = TempDir::new().expect("must create temp dir");
    let script = fake_nadmin(
        temp.path(),
        "exec 0<&-\necho \"Command install-node-ssh failed.\"\nexit 0",
    );
    let mut installer = NadminNodeInstaller::new(&script, std::time::Duration::from_secs(30));
    let mut node = password_node();
    node.key_passphrase = Some("x".repeat(256 * 1024));

    let err = installer
        .install_ssh_node(&node)
        .expect_err("marker must fail the install");

    assert_eq!(err.to_string(), INSTALL_FAILURE_MARKER);
}

#[cfg(unix)]
#[test]
fn node_installer_kills_installs_that_exceed_the_timeout() {
    let temp = TempDir::new().expect("must create temp dir");
    let script = fake_nadmin(temp.path(), "exec sleep 30");
    let mut installer = NadminNodeInstaller::new(&script, std::time::Duration::from_secs(1));

    let started = std::time::Instant::now();
    let err = installer
        .install_ssh_node(&password_node())
        .expect_err("slow install must time out");

    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert!(err.to_string().contains("did not exit within 1 seconds"));
}

#[test]
fn admin_commands_pass_domain_dir_when_given() {
    let admin = NadminDomainAdmin::new("/opt/nadmin", Some(PathBuf::from("/srv/domains")));
    let args = admin
        .build_command("backup-domain", "domain1")
        .get_args()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(args, vec!["backup-domain", "--domaindir", "/srv/domains", "domain1"]);

    let admin = NadminDomainAdmin::new("/opt/nadmin", None);
    let args = admin
        .build_command("restore-domain", "domain1")
        .get_args()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(args, vec!["restore-domain", "domain1"]);
}

#[test]
fn escrowed_caches_return_even_when_the_operation_fails() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    write(&layout.root().join("domains/domain2/config/domain.xml"), NO_NODES_DOMAIN_XML);
    let cache_state = layout.osgi_cache_dir("domain1").join("felix/bundle0/state");

    let result: anyhow::Result<()> = with_caches_escrowed(&layout, || {
        assert!(!layout.osgi_cache_dir("domain1").exists());
        write(&layout.osgi_cache_dir("domain1").join("clobbered"), "x");
        Err(anyhow!("restore-domain failed"))
    });

    let err = result.expect_err("operation error must surface");
    assert!(err.to_string().contains("restore-domain failed"));
    assert_eq!(read(&cache_state), "cache");
    assert!(!layout.osgi_cache_dir("domain1").join("clobbered").exists());
    assert!(!layout.osgi_cache_dir("domain2").exists());
}

#[test]
fn cache_escrow_holds_caches_outside_their_domains() {
    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    write(&layout.root().join("domains/domain2/config/domain.xml"), NO_NODES_DOMAIN_XML);

    let mut escrow = CacheEscrow::capture(&layout).expect("must escrow caches");

    assert_eq!(escrow.domains().collect::<Vec<_>>(), vec!["domain1"]);
    let held = escrow
        .held_path("domain1")
        .expect("domain1 cache must be held")
        .to_path_buf();
    assert!(held.starts_with(layout.scratch_dir()));
    assert_eq!(read(&held.join("felix/bundle0/state")), "cache");
    assert!(!layout.osgi_cache_dir("domain1").exists());

    let failures = escrow.release(&layout);
    assert!(failures.is_empty());
    assert!(escrow.is_empty());
    assert_eq!(
        read(&layout.osgi_cache_dir("domain1").join("felix/bundle0/state")),
        "cache"
    );
    assert!(!held.exists());
}

#[cfg(unix)]
#[test]
fn fix_permissions_marks_launchers_executable() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().expect("must create temp dir");
    let layout = install_fixture(&temp, "payara", NO_NODES_DOMAIN_XML);
    let manifest = build_manifest(&layout).expect("must build manifest");
    let mode = |path: PathBuf| {
        fs::metadata(path)
            .expect("must stat file")
            .permissions()
            .mode()
            & 0o777
    };

    fix_permissions(&layout, &manifest, Suffix::Current).expect("must fix permissions");

    assert_eq!(mode(layout.root().join("bin/asadmin")), 0o755);
    assert_eq!(mode(layout.parent_dir().join("bin/asadmin")), 0o755);
    assert_eq!(mode(layout.parent_dir().join("mq/bin/imqbrokerd")), 0o755);
    assert_eq!(mode(layout.root().join("lib/nadmin")), 0o755);
    assert_eq!(mode(layout.root().join("lib/nadmin.bat")), 0o755);
    assert_ne!(mode(layout.root().join("modules/core.jar")), 0o755);
}

#[test]
fn extracted_distribution_requires_matching_root() {
    let temp = TempDir::new().expect("must create temp dir");
    let extract = temp.path().join("extract");
    write_distribution(
        &extract.join("payara5").join("glassfish"),
        (6, 2, 0),
        "payara",
        "new",
    );

    let err = ExtractedDistribution::open(&extract).expect_err("mismatched root must fail");
    assert!(err.to_string().contains("does not match its version"));

    let empty = temp.path().join("empty");
    fs::create_dir_all(&empty).expect("must create dir");
    let err = ExtractedDistribution::open(&empty).expect_err("empty archive must fail");
    assert!(err.to_string().contains("payara<N>"));
}
