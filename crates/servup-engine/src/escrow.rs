use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, error, warn};

use crate::layout::InstallLayout;
use crate::tree::{delete_tree, make_tmp_dir, move_or_copy};

/// Domain runtime caches moved out of their domains for the duration of one
/// destructive operation. Dropping a record without releasing it leaves the
/// caches in the scratch area.
#[derive(Debug, Default)]
pub struct CacheEscrow {
    holding_dir: Option<PathBuf>,
    caches: BTreeMap<String, PathBuf>,
}

impl CacheEscrow {
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.caches.keys().map(String::as_str)
    }

    pub fn held_path(&self, domain: &str) -> Option<&Path> {
        self.caches.get(domain).map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Moves every existing domain cache into the scratch area. On failure the
    /// caches already moved are put back before the error is returned.
    pub fn capture(layout: &InstallLayout) -> Result<Self> {
        let domains = layout
            .list_domains()
            .with_context(|| format!("failed to list domains: {}", layout.domains_dir().display()))?;

        let mut escrow = Self::default();
        for domain in domains {
            let cache = layout.osgi_cache_dir(&domain);
            if fs::symlink_metadata(&cache).is_err() {
                continue;
            }
            if let Err(err) = escrow.hold(layout, &domain, &cache) {
                let failures = escrow.release(layout);
                for (domain, release_err) in &failures {
                    error!(
                        domain = %domain,
                        error = %release_err,
                        "failed to return osgi-cache, manual intervention is required"
                    );
                }
                return Err(err);
            }
        }
        Ok(escrow)
    }

    fn hold(&mut self, layout: &InstallLayout, domain: &str, cache: &Path) -> Result<()> {
        let holding_dir = match &self.holding_dir {
            Some(dir) => dir.clone(),
            None => {
                let dir = make_tmp_dir(&layout.scratch_dir(), "escrow")?;
                self.holding_dir = Some(dir.clone());
                dir
            }
        };
        let held = holding_dir.join(format!("{domain}-osgi-cache"));
        debug!(from = %cache.display(), to = %held.display(), "escrowing osgi-cache");
        move_or_copy(cache, &held)
            .with_context(|| format!("failed to escrow osgi-cache of domain {domain}"))?;
        self.caches.insert(domain.to_string(), held);
        Ok(())
    }

    /// Puts every held cache back into its domain, replacing whatever the
    /// interim operation left there. Continues past failures and returns them;
    /// a cache that could not be returned stays in the scratch area.
    pub fn release(&mut self, layout: &InstallLayout) -> Vec<(String, anyhow::Error)> {
        let mut failures = Vec::new();
        for (domain, held) in std::mem::take(&mut self.caches) {
            if let Err(err) = return_cache(layout, &domain, &held) {
                failures.push((domain, err));
            }
        }
        if failures.is_empty() {
            if let Some(dir) = self.holding_dir.take() {
                if let Err(err) = delete_tree(&dir) {
                    warn!(path = %dir.display(), error = %err, "failed to remove escrow directory");
                }
            }
        }
        failures
    }
}

fn return_cache(layout: &InstallLayout, domain: &str, held: &Path) -> Result<()> {
    let target = layout.osgi_cache_dir(domain);
    if fs::symlink_metadata(&target).is_ok() {
        delete_tree(&target)
            .with_context(|| format!("failed to clear {} before restoring", target.display()))?;
    }
    if !layout.domain_dir(domain).exists() {
        return Err(anyhow!(
            "domain directory vanished while its osgi-cache was escrowed: {}",
            layout.domain_dir(domain).display()
        ));
    }
    debug!(from = %held.display(), to = %target.display(), "restoring osgi-cache");
    move_or_copy(held, &target)
        .with_context(|| format!("failed to restore osgi-cache of domain {domain}"))?;
    Ok(())
}

/// Runs `operation` with every domain cache escrowed, then always puts the
/// caches back. The operation's own error is returned after the caches are
/// released; release failures are logged.
pub fn with_caches_escrowed<T, F>(layout: &InstallLayout, operation: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let mut escrow = CacheEscrow::capture(layout)?;
    let result = operation();
    let failures = escrow.release(layout);
    for (domain, err) in &failures {
        error!(
            domain = %domain,
            error = %err,
            "failed to restore osgi-cache, manual intervention is required"
        );
    }
    let value = result?;
    if failures.is_empty() {
        return Ok(value);
    }
    let domains = failures
        .iter()
        .map(|(domain, _)| domain.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    Err(anyhow!("failed to restore osgi-cache for domains: {domains}"))
}
