//! Binary entry point for the `bootstrap-gather` CLI.

use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::process;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use bootstrap_gather::{
    ArchiveError, BackendRegistry, BundleAnalyzer, DirectoryAssetStore, GatherConfig, GatherError,
    GatherId, GatherOrchestrator, GatherRequest, InventoryAnalyzer, RemoteShell,
};

mod cli;

use cli::{BootstrapCommand, Cli, GatherCommand};

/// Log file appended to inside the install directory.
const LOG_FILE_NAME: &str = ".bootstrap_gather.log";

#[derive(Debug, Error)]
enum CliError {
    #[error("invalid install directory {path}: {message}")]
    InstallDir { path: String, message: String },
    #[error("invalid log level {level:?}: {message}")]
    LogLevel { level: String, message: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to open install directory: {0}")]
    Assets(String),
    #[error(transparent)]
    Gather(#[from] GatherError),
    #[error("failed to analyse combined bundle: {0}")]
    Analysis(#[from] ArchiveError),
    #[error("gather interrupted")]
    Interrupted,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match prepare(&cli) {
        Ok(install_dir) => match dispatch(cli, install_dir).await {
            Ok(()) => 0,
            Err(err) => {
                error!(error = %err, "bootstrap gather failed");
                1
            }
        },
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn prepare(cli: &Cli) -> Result<Utf8PathBuf, CliError> {
    let install_dir = absolute_dir(&cli.dir)?;
    init_tracing(&cli.log_level, &install_dir)?;
    Ok(install_dir)
}

async fn dispatch(cli: Cli, install_dir: Utf8PathBuf) -> Result<(), CliError> {
    match cli.command {
        GatherCommand::Bootstrap(args) => gather_bootstrap(install_dir, args).await,
    }
}

async fn gather_bootstrap(
    install_dir: Utf8PathBuf,
    args: BootstrapCommand,
) -> Result<(), CliError> {
    let config =
        GatherConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let api_timeout = config.cloud_api_timeout();
    let shell =
        RemoteShell::with_process_runner(config).map_err(|err| CliError::Config(err.to_string()))?;
    let assets =
        DirectoryAssetStore::open(&install_dir).map_err(|err| CliError::Assets(err.to_string()))?;
    let orchestrator = GatherOrchestrator::new(
        install_dir,
        Box::new(assets),
        BackendRegistry::with_default_platforms(api_timeout),
        shell,
    );

    let request = GatherRequest {
        bootstrap: args.bootstrap.unwrap_or_default(),
        masters: args.masters,
        keys: args.keys.into_iter().map(Utf8PathBuf::from).collect(),
        gather_id: GatherId::now(),
    };
    // Dropping the pipeline future kills any running ssh or scp child.
    let outcome = tokio::select! {
        result = orchestrator.gather_bootstrap(&request) => result?,
        _ = tokio::signal::ctrl_c() => return Err(CliError::Interrupted),
    };

    if let Some(serial) = &outcome.serial_bundle {
        info!(path = %serial, "Serial log bundle written");
    }
    info!(path = %outcome.ssh_bundle, "Bootstrap log bundle written");
    info!(path = %outcome.combined_bundle, "Combined log bundle written");

    if !args.skip_analysis {
        InventoryAnalyzer.analyze(&outcome.combined_bundle)?;
    }
    Ok(())
}

fn absolute_dir(dir: &str) -> Result<Utf8PathBuf, CliError> {
    let path = Utf8Path::new(dir);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().map_err(|err| CliError::InstallDir {
        path: dir.to_owned(),
        message: err.to_string(),
    })?;
    let base = Utf8PathBuf::from_path_buf(cwd).map_err(|cwd_path| CliError::InstallDir {
        path: cwd_path.display().to_string(),
        message: String::from("working directory is not valid UTF-8"),
    })?;
    Ok(base.join(path))
}

fn init_tracing(level: &str, install_dir: &Utf8Path) -> Result<(), CliError> {
    let filter = EnvFilter::try_new(level).map_err(|err| CliError::LogLevel {
        level: level.to_owned(),
        message: err.to_string(),
    })?;
    let log_path = install_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|err| CliError::InstallDir {
            path: install_dir.to_string(),
            message: format!("cannot open {log_path}: {err}"),
        })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .init();
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
