//! Worker for the `cert_rotation` example.
//!
//! Reads `TEMPORAL_ADDRESS`, `TEMPORAL_NAMESPACE`, `TEMPORAL_TLS_CERT` and
//! `TEMPORAL_TLS_KEY`, connects with the certificate found at those paths and
//! serves `GreetSomeone` until Ctrl-C / SIGTERM. Replace the files at any time:
//! the worker re-checks them every `TEMPORAL_TLS_REFRESH_SECS` (60 by default)
//! and re-dials with the new pair when it has changed.

use std::process::ExitCode;

use anyhow::Context;
use helpers::{Settings, init_logger};
use log::{error, info};

use cert_rotation::workflow::{WORKFLOW_TYPE, greet_someone};
use cert_rotation::{LOG_TARGET, TaskExecutor, WorkflowRegistry, bootstrap, shutdown_signal};

#[tokio::main]
async fn main() -> ExitCode {
    init_logger();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: LOG_TARGET, "worker terminated: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;

    info!(target: LOG_TARGET, "Starting cert_rotation worker...");

    let connection = bootstrap::connect(&settings).await?;

    let mut registry = WorkflowRegistry::new();
    registry.register(WORKFLOW_TYPE, greet_someone)?;

    let mut executor = TaskExecutor::new(settings.task_queue.as_str());
    if let Some(every) = settings.cert_refresh {
        executor = executor.rotation_check(every);
    }
    let result = executor
        .run(&connection, registry, shutdown_signal())
        .await;

    // Released here on both the interrupt and the error path.
    connection.close();

    result.context("unable to run worker")
}
