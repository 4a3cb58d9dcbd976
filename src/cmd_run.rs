//! Foreground server: engine start, signal wait, graceful shutdown.

use std::sync::Arc;

use tracing::{info, warn};

use jobhub_config::Config;
use jobhub_queue::{Engine, HandlerRegistry};

use crate::handlers::register_builtin_handlers;
use crate::signal::SignalHandler;

/// Open the engine with the built-in handlers and create configured queues.
pub(crate) async fn open_engine(
    config: &Config,
    principal: &str,
) -> Result<Engine, Box<dyn std::error::Error>> {
    let handlers = Arc::new(HandlerRegistry::new());
    register_builtin_handlers(&handlers)?;
    let engine = Engine::open(config, handlers).await?;

    let created = engine.bootstrap_queues(&config.queues, principal).await?;
    if created > 0 {
        info!(created, "Bootstrapped queues from config");
    }
    Ok(engine)
}

/// Run until SIGINT or SIGTERM.
pub(crate) async fn run_server(
    config: Config,
    principal: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting jobhub v{}", env!("CARGO_PKG_VERSION"));

    let engine = open_engine(&config, principal).await?;
    info!(task_classes = ?engine.handlers().task_classes(), "Handlers registered");

    let signals = SignalHandler::new();
    signals.setup_os_signals()?;

    engine.start().await?;
    info!("jobhub running; press Ctrl+C to stop");

    signals.wait_for_shutdown().await;

    let report = engine.shutdown().await;
    if report.drained {
        info!("jobhub stopped");
    } else {
        warn!(
            interrupted = report.interrupted.len(),
            "jobhub stopped with interrupted jobs"
        );
    }
    Ok(())
}
