//! jobhub - cron-triggered background job queues
//!
//! Main entry point for the jobhub server and admin CLI.

mod cli;
mod cmd_admin;
mod cmd_run;
mod handlers;
mod signal;

use clap::Parser;
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use jobhub_config::{ConfigLoader, ConfigValidator, LoggingConfig};

use crate::cli::{Cli, Commands};

/// Initialize console and rolling file logging.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let file_layer = if logging.file {
        let log_dir = logging.resolved_directory();
        std::fs::create_dir_all(&log_dir)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("jobhub")
            .filename_suffix("log")
            .max_log_files(logging.max_files.max(1))
            .build(&log_dir)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Dropping the guard flushes and stops the writer thread.
        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
    } else {
        None
    };

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;

    // Console output goes to stderr so --json results stay clean on stdout.
    let (console_json, console_text) = if logging.json {
        (
            Some(fmt::layer().json().with_writer(std::io::stderr)),
            None,
        )
    } else {
        (
            None,
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_or_default(&cli.config)?;
    init_tracing(&config.logging)?;

    let validation = ConfigValidator::validate(&config)?;
    for warning in validation.into_result()? {
        warn!(path = %warning.path, "{}", warning.message);
    }

    match cli.command {
        None | Some(Commands::Run) => cmd_run::run_server(config, &cli.principal).await,
        Some(Commands::Queue { action }) => {
            let engine = cmd_run::open_engine(&config, &cli.principal).await?;
            cmd_admin::handle_queue_command(&engine, action, &cli.principal, cli.json).await
        }
        Some(Commands::Cron { action }) => {
            let engine = cmd_run::open_engine(&config, &cli.principal).await?;
            cmd_admin::handle_cron_command(&engine, action, &cli.principal, cli.json).await
        }
        Some(Commands::Job { action }) => {
            let engine = cmd_run::open_engine(&config, &cli.principal).await?;
            cmd_admin::handle_job_command(&engine, action, &cli.principal, cli.json).await
        }
        Some(Commands::Stats) => {
            let engine = cmd_run::open_engine(&config, &cli.principal).await?;
            cmd_admin::handle_stats_command(&engine, cli.json).await
        }
    }
}
