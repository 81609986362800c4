use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use tracing::{debug, trace};

use crate::error::UpgradeError;
use crate::layout::{InstallLayout, OSGI_CACHE_DIR};
use crate::state::Suffix;

/// Resources that always take part in an upgrade, in swap order.
const CONSTANT_ENTRIES: [&str; 14] = [
    "common",
    "config/branding",
    "config/osgi.properties",
    "h2db",
    "../h2db",
    "legal",
    "modules",
    "osgi",
    "lib",
    "../README.txt",
    "../LICENSE.txt",
    "../mq",
    "bin",
    "../bin",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Anchor {
    InstallRoot,
    InstallParent,
}

/// A resource path relative to the install root, kept as components so it is
/// only given a platform separator when rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManifestEntry {
    anchor: Anchor,
    components: Vec<String>,
}

impl ManifestEntry {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut anchor = Anchor::InstallRoot;
        let mut components = Vec::new();
        for part in raw.split(['/', '\\']).filter(|part| !part.is_empty() && *part != ".") {
            if part == ".." {
                if anchor == Anchor::InstallParent || !components.is_empty() {
                    return Err(anyhow!(
                        "manifest entry may only step one level above the install root: {raw}"
                    ));
                }
                anchor = Anchor::InstallParent;
                continue;
            }
            components.push(part.to_string());
        }
        if components.is_empty() {
            return Err(anyhow!("manifest entry must name a resource: {raw}"));
        }
        Ok(Self { anchor, components })
    }

    pub fn osgi_cache(domain: &str) -> Self {
        Self {
            anchor: Anchor::InstallRoot,
            components: vec![
                "domains".to_string(),
                domain.to_string(),
                OSGI_CACHE_DIR.to_string(),
            ],
        }
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The owning domain when this entry is a domain's OSGi runtime cache.
    pub fn osgi_cache_domain(&self) -> Option<&str> {
        match (self.anchor, self.components.as_slice()) {
            (Anchor::InstallRoot, [domains, domain, cache])
                if domains == "domains" && cache == OSGI_CACHE_DIR =>
            {
                Some(domain.as_str())
            }
            _ => None,
        }
    }

    pub fn is_osgi_cache(&self) -> bool {
        self.osgi_cache_domain().is_some()
    }

    pub fn render(&self, separator: char) -> String {
        let mut rendered = String::new();
        if self.anchor == Anchor::InstallParent {
            rendered.push_str("..");
            rendered.push(separator);
        }
        rendered.push_str(&self.components.join(&separator.to_string()));
        rendered
    }

    /// Resolves the entry against `anchor_dir`, appending `suffix` to the last
    /// component.
    pub fn resolve_with_suffix(&self, anchor_dir: &Path, suffix: Suffix) -> PathBuf {
        let mut path = anchor_dir.to_path_buf();
        let Some((last, parents)) = self.components.split_last() else {
            return path;
        };
        for component in parents {
            path.push(component);
        }
        path.push(format!("{last}{}", suffix.as_str()));
        path
    }

    /// Resolves the entry inside an arbitrary install root, such as the
    /// `glassfish` directory of an extracted distribution.
    pub fn resolve_in(&self, root: &Path) -> PathBuf {
        let anchor_dir = match self.anchor {
            Anchor::InstallRoot => root.to_path_buf(),
            Anchor::InstallParent => root
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.join("..")),
        };
        self.resolve_with_suffix(&anchor_dir, Suffix::Current)
    }
}

impl fmt::Display for ManifestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render('/'))
    }
}

/// Ordered, de-duplicated set of resources swapped as one upgrade unit. Built
/// once per command and passed to every operation that needs it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceManifest {
    entries: Vec<ManifestEntry>,
}

impl ResourceManifest {
    pub fn from_entries(entries: impl IntoIterator<Item = ManifestEntry>) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.clone()))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ManifestEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, entry: &ManifestEntry) -> bool {
        self.entries.contains(entry)
    }

    pub fn render_list(&self, separator: char) -> String {
        self.entries
            .iter()
            .map(|entry| entry.render(separator))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<'a> IntoIterator for &'a ResourceManifest {
    type Item = &'a ManifestEntry;
    type IntoIter = std::slice::Iter<'a, ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

pub fn constant_entries() -> Vec<ManifestEntry> {
    CONSTANT_ENTRIES
        .iter()
        .map(|raw| ManifestEntry::parse(raw).expect("constant manifest entries are well formed"))
        .collect()
}

pub fn build_manifest(layout: &InstallLayout) -> Result<ResourceManifest, UpgradeError> {
    let domains = layout
        .list_domains()
        .map_err(|source| UpgradeError::Manifest {
            path: layout.domains_dir(),
            source,
        })?;

    let mut entries = constant_entries();
    for domain in &domains {
        let cache = ManifestEntry::osgi_cache(domain);
        // A rollback may find only the `.old` cache if the upgraded domain was
        // never started.
        let present = layout.resource_path(&cache, Suffix::Current).exists()
            || layout.resource_path(&cache, Suffix::Backup).exists();
        if present {
            entries.push(cache);
        } else {
            trace!(domain = %domain, "no osgi-cache present, not adding to manifest");
        }
    }

    let manifest = ResourceManifest::from_entries(entries);
    debug!(entries = %manifest.render_list('/'), "resolved resource manifest");
    Ok(manifest)
}
