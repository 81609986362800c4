use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use servup_core::{
    parse_java_feature_version, Outcome, ToolConfig, UpgradeParameters, UpgradeRequest,
    CONFIG_FILE_NAME,
};
use servup_engine::{
    apply_staged_upgrade, cleanup_upgrade, reinstall_nodes_only, rollback_server, upgrade_server,
    InstallLayout, NadminDomainAdmin, NadminNodeInstaller,
};
use tracing::{debug, warn};

use crate::completion::write_completions_script;
use crate::download::HttpArchiveFetcher;
use crate::render::current_output_style;
use crate::{Cli, Commands, ServerCommand, UpgradeArgs};

const REPO_URL_ENV: &str = "SERVUP_REPO_URL";
const INSTALL_ROOT_ENV: &str = "SERVUP_INSTALL_ROOT";
const NEXUS_PASSWORD_ENV: &str = "SERVUP_NEXUS_PASSWORD";

/// Environment values that override the configuration file.
#[derive(Debug, Clone, Default)]
pub(crate) struct EnvOverrides {
    pub(crate) repo_url: Option<String>,
    pub(crate) install_root: Option<PathBuf>,
    pub(crate) nexus_password: Option<String>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|value| !value.trim().is_empty());
        Self {
            repo_url: read(REPO_URL_ENV),
            install_root: read(INSTALL_ROOT_ENV).map(PathBuf::from),
            nexus_password: read(NEXUS_PASSWORD_ENV),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Settings {
    pub(crate) install_root: PathBuf,
    pub(crate) config: ToolConfig,
}

impl Settings {
    pub(crate) fn admin_script(&self, layout: &InstallLayout) -> PathBuf {
        self.config
            .admin_script
            .clone()
            .unwrap_or_else(|| layout.default_admin_script())
    }
}

/// Returns `None` for commands that do not touch an installation.
pub(crate) fn run_cli(cli: Cli) -> Result<Option<Outcome>> {
    let command = match cli.command {
        Commands::Completions { shell } => {
            write_completions_script(shell, &mut std::io::stdout().lock())?;
            return Ok(None);
        }
        Commands::Server(command) => command,
    };

    let env = EnvOverrides::from_env();
    let cwd = std::env::current_dir().context("failed to determine current directory")?;
    let settings = resolve_settings(
        cli.install_root.as_deref(),
        cli.config.as_deref(),
        &env,
        &cwd,
    )?;
    Ok(Some(run_server_command(command, &settings, &env)?))
}

fn run_server_command(
    command: ServerCommand,
    settings: &Settings,
    env: &EnvOverrides,
) -> Result<Outcome> {
    let layout = InstallLayout::new(&settings.install_root);
    debug!(root = %layout.root().display(), "resolved install root");
    let admin_script = settings.admin_script(&layout);
    let mut installer =
        NadminNodeInstaller::new(&admin_script, settings.config.node_install_timeout());

    let outcome = match command {
        ServerCommand::UpgradeServer(args) => {
            let mut admin = NadminDomainAdmin::new(&admin_script, args.domaindir.clone());
            let request = build_upgrade_request(args, env, detect_java_version());
            let params = UpgradeParameters::from_request(request)?;
            let mut fetcher = HttpArchiveFetcher::new(current_output_style());
            upgrade_server(
                &layout,
                &settings.config,
                &params,
                &mut fetcher,
                &mut admin,
                &mut installer,
            )
        }
        ServerCommand::RollbackServer { domaindir } => {
            let mut admin = NadminDomainAdmin::new(&admin_script, domaindir);
            rollback_server(&layout, &mut admin, &mut installer)
        }
        ServerCommand::ApplyStagedUpgrade => apply_staged_upgrade(&layout, &mut installer),
        ServerCommand::CleanupUpgrade => cleanup_upgrade(&layout),
        ServerCommand::ReinstallNodes => reinstall_nodes_only(&layout, &mut installer),
    };
    Ok(outcome)
}

/// Flags win over the environment, the environment over the file, and the
/// file over defaults. Without `--config` the file is looked up inside the
/// resolved install root.
pub(crate) fn resolve_settings(
    flag_root: Option<&Path>,
    config_path: Option<&Path>,
    env: &EnvOverrides,
    cwd: &Path,
) -> Result<Settings> {
    let explicit = config_path.map(load_config).transpose()?;

    let install_root = flag_root
        .map(Path::to_path_buf)
        .or_else(|| env.install_root.clone())
        .or_else(|| explicit.as_ref().and_then(|config| config.install_root.clone()))
        .unwrap_or_else(|| cwd.to_path_buf());
    let install_root = if install_root.is_relative() {
        cwd.join(install_root)
    } else {
        install_root
    };

    let mut config = match explicit {
        Some(config) => config,
        None => {
            let default_path = install_root.join("config").join(CONFIG_FILE_NAME);
            if default_path.is_file() {
                load_config(&default_path)?
            } else {
                ToolConfig::default()
            }
        }
    };
    if let Some(url) = &env.repo_url {
        config.repository_url = url.clone();
    }
    config.install_root = Some(install_root.clone());

    Ok(Settings {
        install_root,
        config,
    })
}

fn load_config(path: &Path) -> Result<ToolConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    ToolConfig::from_toml_str(&raw)
        .with_context(|| format!("invalid config file: {}", path.display()))
}

pub(crate) fn build_upgrade_request(
    args: UpgradeArgs,
    env: &EnvOverrides,
    java_version: Option<u32>,
) -> UpgradeRequest {
    UpgradeRequest {
        distribution: args.distribution,
        version: args.version,
        stage: args.stage.unwrap_or(cfg!(windows)),
        use_downloaded: args.use_downloaded,
        username: args.username,
        password: args.nexus_password.or_else(|| env.nexus_password.clone()),
        domain_dir: args.domaindir,
        java_version,
    }
}

/// Feature version of the Java runtime the server will run on, preferring
/// `JAVA_HOME` over `PATH`.
fn detect_java_version() -> Option<u32> {
    let java = std::env::var_os("JAVA_HOME")
        .map(|home| PathBuf::from(home).join("bin").join("java"))
        .unwrap_or_else(|| PathBuf::from("java"));
    let output = match Command::new(&java).arg("-version").output() {
        Ok(output) => output,
        Err(err) => {
            warn!(java = %java.display(), error = %err, "failed to run java");
            return None;
        }
    };
    // `java -version` prints to stderr.
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stderr),
        String::from_utf8_lossy(&output.stdout)
    );
    let version = parse_java_feature_version(&text);
    debug!(?version, "detected java version");
    version
}
