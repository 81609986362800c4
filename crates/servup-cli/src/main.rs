mod completion;
mod dispatch;
mod download;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use servup_core::Outcome;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::completion::CliCompletionShell;
use crate::dispatch::run_cli;
use crate::render::{current_output_style, render_outcome_line, render_status_line};

const LOG_ENV: &str = "SERVUP_LOG";

#[derive(Parser, Debug)]
#[command(name = "servup")]
#[command(about = "In-place upgrade and rollback for Payara Server installations", long_about = None)]
struct Cli {
    /// The installation's `glassfish` directory.
    #[arg(long, global = true)]
    install_root: Option<PathBuf>,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Server(ServerCommand),
    /// Print a shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

/// Commands that act on an installation.
#[derive(Subcommand, Debug)]
enum ServerCommand {
    /// Replace the installed server with a newer version, or stage it.
    UpgradeServer(UpgradeArgs),
    /// Return to the version kept in the `.old` backups.
    RollbackServer {
        #[arg(long)]
        domaindir: Option<PathBuf>,
    },
    /// Swap a staged upgrade in.
    ApplyStagedUpgrade,
    /// Delete every `.old` and `.new` leftover.
    CleanupUpgrade,
    /// Reinstall the server onto every SSH node.
    ReinstallNodes,
}

#[derive(Args, Debug, Default)]
struct UpgradeArgs {
    #[arg(long)]
    distribution: Option<String>,
    #[arg(long)]
    version: Option<String>,
    #[arg(long)]
    username: Option<String>,
    /// Falls back to SERVUP_NEXUS_PASSWORD.
    #[arg(long)]
    nexus_password: Option<String>,
    /// Install next to the current version instead of replacing it. Always
    /// on for Windows.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    stage: Option<bool>,
    #[arg(long)]
    use_downloaded: Option<PathBuf>,
    #[arg(long)]
    domaindir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let style = current_output_style();
    let outcome = match run_cli(cli) {
        Ok(Some(outcome)) => {
            println!("{}", render_outcome_line(style, outcome));
            outcome
        }
        Ok(None) => Outcome::Success,
        Err(err) => {
            eprintln!("{}", render_status_line(style, "err", &format!("{err:#}")));
            Outcome::Error
        }
    };
    ExitCode::from(u8::try_from(outcome.exit_code()).unwrap_or(1))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
