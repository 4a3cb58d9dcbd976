//! Built-in task classes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use jobhub_queue::{HandlerError, HandlerRegistry, HandlerResult, JobContext, JobHandler, QueueError};

/// Register `echo`, `sleep` and `shell`.
pub(crate) fn register_builtin_handlers(registry: &HandlerRegistry) -> Result<(), QueueError> {
    registry.register("echo", Arc::new(EchoHandler))?;
    registry.register("sleep", Arc::new(SleepHandler))?;
    registry.register("shell", Arc::new(ShellHandler))?;
    Ok(())
}

/// Returns its params as output.
pub(crate) struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    async fn handle(&self, ctx: &JobContext) -> HandlerResult {
        Ok(Some(ctx.params.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SleepParams {
    millis: u64,
}

/// Waits `params.millis` milliseconds.
pub(crate) struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    async fn handle(&self, ctx: &JobContext) -> HandlerResult {
        let params: SleepParams = ctx.params_as()?;
        tokio::time::sleep(Duration::from_millis(params.millis)).await;
        Ok(Some(format!("slept {}ms", params.millis)))
    }
}

#[derive(Debug, Deserialize)]
struct ShellParams {
    command: String,
    #[serde(default)]
    args: Vec<String>,
}

/// Runs `params.command` with `params.args` and captures stdout.
pub(crate) struct ShellHandler;

#[async_trait]
impl JobHandler for ShellHandler {
    async fn handle(&self, ctx: &JobContext) -> HandlerResult {
        let params: ShellParams = ctx.params_as()?;
        debug!(job_id = %ctx.job_id, command = %params.command, "Running shell command");

        let output = tokio::process::Command::new(&params.command)
            .args(&params.args)
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Ok(Some(stdout.trim_end().to_string()));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(HandlerError::new(format!(
            "{} exited with {}: {}",
            params.command,
            code,
            stderr.trim_end()
        )))
    }
}
