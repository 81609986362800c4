use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REPOSITORY_URL: &str =
    "https://nexus.payara.fish/repository/payara-enterprise-downloadable-artifacts/fish/payara/distributions/";
pub const DEFAULT_NODE_INSTALL_TIMEOUT_SECS: u64 = 300;
pub const CONFIG_FILE_NAME: &str = "servup.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub install_root: Option<PathBuf>,
    pub repository_url: String,
    pub node_install_timeout_secs: u64,
    pub admin_script: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            install_root: None,
            repository_url: DEFAULT_REPOSITORY_URL.to_string(),
            node_install_timeout_secs: DEFAULT_NODE_INSTALL_TIMEOUT_SECS,
            admin_script: None,
        }
    }
}

impl ToolConfig {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse servup config")?;
        if config.repository_url.trim().is_empty() {
            return Err(anyhow!("repository_url must not be empty"));
        }
        if config.node_install_timeout_secs == 0 {
            return Err(anyhow!("node_install_timeout_secs must be greater than zero"));
        }
        Ok(config)
    }

    pub fn node_install_timeout(&self) -> Duration {
        Duration::from_secs(self.node_install_timeout_secs)
    }

    /// Joins the repository base with the distribution artifact path.
    pub fn download_url(&self, distribution: &str, version: &str) -> String {
        let base = self.repository_url.trim_end_matches('/');
        format!("{base}/{distribution}/{version}/{distribution}-{version}.zip")
    }
}
