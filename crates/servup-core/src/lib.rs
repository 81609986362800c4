mod config;
mod descriptor;
mod distribution;
mod outcome;
mod params;
mod version;

pub use config::{
    ToolConfig, CONFIG_FILE_NAME, DEFAULT_NODE_INSTALL_TIMEOUT_SECS, DEFAULT_REPOSITORY_URL,
};
pub use descriptor::{VersionDescriptor, VERSION_DESCRIPTOR_FILE};
pub use distribution::{Distribution, DistributionVariant};
pub use outcome::Outcome;
pub use params::{Credentials, DistributionSource, UpgradeParameters, UpgradeRequest};
pub use version::{
    parse_java_feature_version, parse_selected_version, required_java_version,
    validate_java_compatibility, validate_versions, ServerVersion, VersionError,
};
