//! NORUN - run Windows programs in isolated Wine/Proton prefixes.
//!
//! Main entry point for the command-line tool. It initializes:
//! - Configuration ([`ConfigManager`]): defaults, `norun.yaml`, `NORUN_*`
//! - Logging (daily rotating file, plus stderr with `--debug`)
//! - Tokio runtime for child-process supervision
//!
//! and then dispatches one subcommand through [`App`]. The process exit code
//! comes from the error kind, or for `launch` from the run outcome.

use anyhow::{Context, Result};
use clap::Parser;
use norun::cli::{App, Cli, exit_code_for};
use norun::{APP_NAME, ConfigManager, VERSION};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(clamp_code(code)),
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(clamp_code(exit_code_for(&e)))
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(ConfigManager::default_dir);
    let config = ConfigManager::new(&config_dir)?;
    let mut settings = config.load_settings().context("Failed to load settings")?;
    settings.debug_mode |= cli.debug;

    // Guard flushes the file appender on drop; keep it for the whole run
    let _log_guard = norun::logging::setup_logging(
        &settings.logs_dir,
        "norun",
        settings.debug_mode,
        cli.debug,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    tracing::debug!("Using config from {}", config.config_dir());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let app = App::new(settings)?;
    let code = runtime.block_on(app.run(cli.command))?;

    tracing::info!("{} exiting with code {}", APP_NAME, code);
    Ok(code)
}

fn clamp_code(code: i32) -> u8 {
    u8::try_from(code & 0xff).unwrap_or(1)
}
