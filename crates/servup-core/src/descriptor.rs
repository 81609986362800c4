use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};

use crate::{Distribution, ServerVersion};

pub const VERSION_DESCRIPTOR_FILE: &str = "glassfish-version.properties";

/// Contents of the branding `glassfish-version.properties` file shipped with
/// every installation and every distribution archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDescriptor {
    pub version: ServerVersion,
    pub distribution: Option<String>,
}

impl VersionDescriptor {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut fields = HashMap::new();
        for line in raw.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }

        let component = |key: &str| -> Result<u64> {
            fields
                .get(key)
                .ok_or_else(|| anyhow!("missing version descriptor field: {key}"))?
                .parse::<u64>()
                .with_context(|| format!("invalid numeric version descriptor field: {key}"))
        };

        Ok(Self {
            version: ServerVersion::new(
                component("major_version")?,
                component("minor_version")?,
                component("update_version")?,
            ),
            distribution: fields
                .get("distribution")
                .filter(|value| !value.is_empty())
                .cloned(),
        })
    }

    pub fn distribution(&self) -> Option<Distribution> {
        self.distribution.as_deref().and_then(Distribution::parse)
    }
}
