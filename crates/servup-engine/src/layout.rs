use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use servup_core::{VersionDescriptor, VERSION_DESCRIPTOR_FILE};

use crate::manifest::{Anchor, ManifestEntry};
use crate::state::Suffix;

pub const OSGI_CACHE_DIR: &str = "osgi-cache";
pub const UPGRADE_PROPERTIES_FILE: &str = "upgrade-tool.properties";
pub const UPGRADE_BAT_FILE: &str = "upgrade-tool.bat";

/// Paths of an application-server installation, rooted at its `glassfish`
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory one level above the install root, home of `../`
    /// manifest entries such as the message-queue broker.
    pub fn parent_dir(&self) -> PathBuf {
        match self.root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => self.root.join(".."),
        }
    }

    pub fn anchor_dir(&self, anchor: Anchor) -> PathBuf {
        match anchor {
            Anchor::InstallRoot => self.root.clone(),
            Anchor::InstallParent => self.parent_dir(),
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn branding_dir(&self) -> PathBuf {
        self.config_dir().join("branding")
    }

    pub fn version_descriptor_path(&self) -> PathBuf {
        self.branding_dir().join(VERSION_DESCRIPTOR_FILE)
    }

    /// Version descriptor inside the current, staged or backup branding
    /// directory.
    pub fn version_descriptor_path_in(&self, suffix: Suffix) -> PathBuf {
        self.config_dir()
            .join(format!("branding{}", suffix.as_str()))
            .join(VERSION_DESCRIPTOR_FILE)
    }

    /// Marker checked before rollback and before applying a staged upgrade.
    pub fn modules_dir(&self, suffix: Suffix) -> PathBuf {
        self.root.join(format!("modules{}", suffix.as_str()))
    }

    pub fn upgrade_properties_path(&self) -> PathBuf {
        self.config_dir().join(UPGRADE_PROPERTIES_FILE)
    }

    pub fn upgrade_bat_path(&self) -> PathBuf {
        self.config_dir().join(UPGRADE_BAT_FILE)
    }

    pub fn domains_dir(&self) -> PathBuf {
        self.root.join("domains")
    }

    pub fn domain_dir(&self, domain: &str) -> PathBuf {
        self.domains_dir().join(domain)
    }

    pub fn domain_xml_path(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join("config").join("domain.xml")
    }

    pub fn osgi_cache_dir(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join(OSGI_CACHE_DIR)
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    pub fn default_admin_script(&self) -> PathBuf {
        if cfg!(windows) {
            self.lib_dir().join("nadmin.bat")
        } else {
            self.lib_dir().join("nadmin")
        }
    }

    /// Working area for extraction and cache escrow. It lives inside the
    /// install root so moves out of the installation stay on one filesystem.
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(".servup").join("tmp")
    }

    pub fn resource_path(&self, entry: &ManifestEntry, suffix: Suffix) -> PathBuf {
        entry.resolve_with_suffix(&self.anchor_dir(entry.anchor()), suffix)
    }

    /// Domain names under the domains directory, sorted for stable output.
    pub fn list_domains(&self) -> io::Result<Vec<String>> {
        let mut domains = Vec::new();
        for entry in fs::read_dir(self.domains_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                domains.push(name.to_string());
            }
        }
        domains.sort();
        Ok(domains)
    }

    pub fn read_version_descriptor(&self) -> Result<VersionDescriptor> {
        read_version_descriptor(&self.version_descriptor_path())
    }
}

pub fn read_version_descriptor(path: &Path) -> Result<VersionDescriptor> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read version descriptor: {}", path.display()))?;
    VersionDescriptor::parse(&raw)
        .with_context(|| format!("failed parsing version descriptor: {}", path.display()))
}
