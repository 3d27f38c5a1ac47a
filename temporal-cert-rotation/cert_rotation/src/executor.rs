//! Runs the SDK worker on one task queue until told to stop.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use temporal_sdk::Worker;
use temporal_sdk_core::{CoreRuntime, Worker as CoreWorker, init_worker};
use temporal_sdk_core_api::{
    telemetry::TelemetryOptionsBuilder,
    worker::{WorkerConfigBuilder, WorkerVersioningStrategy},
};
use thiserror::Error;

use crate::LOG_TARGET;
use crate::connection::Connection;
use crate::registry::WorkflowRegistry;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_BUILD_ID: &str = "rust-sdk";

/// How often a running worker checks whether its client certificate rotated.
pub const DEFAULT_ROTATION_CHECK: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RunLoopError {
    #[error("unable to start worker on task queue {task_queue}")]
    Start {
        task_queue: String,
        #[source]
        source: BoxError,
    },

    #[error("worker on task queue {task_queue} stopped with an error")]
    Run {
        task_queue: String,
        #[source]
        source: BoxError,
    },
}

#[derive(Debug, Clone)]
pub struct TaskExecutor {
    task_queue: String,
    build_id: String,
    rotation_check: Duration,
}

impl TaskExecutor {
    pub fn new(task_queue: impl Into<String>) -> Self {
        Self {
            task_queue: task_queue.into(),
            build_id: DEFAULT_BUILD_ID.to_owned(),
            rotation_check: DEFAULT_ROTATION_CHECK,
        }
    }

    pub fn build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = build_id.into();
        self
    }

    /// Interval between rotation checks while the worker runs.
    pub fn rotation_check(mut self, every: Duration) -> Self {
        self.rotation_check = every;
        self
    }

    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    /// Poll the task queue over `connection`, dispatching to the handlers in
    /// `registry`, until `interrupt` resolves or the worker fails.
    ///
    /// While running, the certificate on disk is checked every
    /// `rotation_check`; a rotated pair is dialed with and the new client
    /// replaces the worker's. On interrupt the worker is asked to shut down
    /// and this returns once it has drained. The connection is only borrowed;
    /// closing it afterwards is the caller's job.
    pub async fn run<I>(
        &self,
        connection: &Connection,
        registry: WorkflowRegistry,
        interrupt: I,
    ) -> Result<(), RunLoopError>
    where
        I: Future<Output = ()>,
    {
        let StartedWorker {
            _runtime,
            core,
            mut worker,
        } = self
            .start(connection, registry)
            .map_err(|e| RunLoopError::Start {
                task_queue: self.task_queue.clone(),
                source: e.into(),
            })?;

        info!(
            target: LOG_TARGET,
            "worker polling task queue {} in namespace {}",
            self.task_queue,
            connection.namespace(),
        );

        let shutdown = worker.shutdown_handle();
        let polling = async {
            tokio::select! {
                res = worker.run() => res,
                never = watch_rotation(connection, &core, self.rotation_check) => match never {},
            }
        };
        let result = run_until_interrupted(polling, interrupt, move || {
            info!(target: LOG_TARGET, "interrupt received, shutting down worker");
            shutdown();
        })
        .await;

        match result {
            Ok(()) => {
                info!(target: LOG_TARGET, "worker on task queue {} stopped", self.task_queue);
                Ok(())
            }
            Err(e) => Err(RunLoopError::Run {
                task_queue: self.task_queue.clone(),
                source: e.into(),
            }),
        }
    }

    fn start(
        &self,
        connection: &Connection,
        registry: WorkflowRegistry,
    ) -> anyhow::Result<StartedWorker> {
        let telemetry_options = TelemetryOptionsBuilder::default().build()?;
        let runtime = CoreRuntime::new_assume_tokio(telemetry_options)?;

        let worker_config = WorkerConfigBuilder::default()
            .namespace(connection.namespace())
            .task_queue(self.task_queue.as_str())
            .versioning_strategy(WorkerVersioningStrategy::None {
                build_id: self.build_id.clone(),
            })
            .build()?;

        let core = Arc::new(init_worker(&runtime, worker_config, connection.client().clone())?);
        let mut worker = Worker::new_from_core(core.clone(), self.task_queue.as_str());

        if registry.is_empty() {
            warn!(target: LOG_TARGET, "no workflows registered for task queue {}", self.task_queue);
        }
        for (workflow_type, function) in registry.into_entries() {
            info!(target: LOG_TARGET, "registering workflow {workflow_type}");
            worker.register_wf(workflow_type, function);
        }

        Ok(StartedWorker {
            _runtime: runtime,
            core,
            worker,
        })
    }
}

/// The core runtime has to outlive the worker built on it.
struct StartedWorker {
    _runtime: CoreRuntime,
    core: Arc<CoreWorker>,
    worker: Worker,
}

/// Re-dial with the rotated pair whenever one appears and swap the client
/// under the running worker. A failed check leaves the current client in
/// place until the next tick.
async fn watch_rotation(
    connection: &Connection,
    core: &CoreWorker,
    every: Duration,
) -> Infallible {
    let mut ticks = tokio::time::interval(every);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the pair was just dialed with.
    ticks.tick().await;
    loop {
        ticks.tick().await;
        match connection.refresh().await {
            Ok(Some(client)) => {
                core.replace_client(client);
                info!(target: LOG_TARGET, "worker switched to the rotated client certificate");
            }
            Ok(None) => {}
            Err(err) => {
                warn!(target: LOG_TARGET, "client certificate refresh failed: {err:#}");
            }
        }
    }
}

/// Drive `run` to completion. If `interrupt` resolves first, call
/// `on_interrupt` once and keep driving `run` so it can finish cleanly.
pub async fn run_until_interrupted<R, T, I, S>(run: R, interrupt: I, on_interrupt: S) -> T
where
    R: Future<Output = T>,
    I: Future<Output = ()>,
    S: FnOnce(),
{
    tokio::pin!(run);
    tokio::select! {
        out = &mut run => return out,
        () = interrupt => on_interrupt(),
    }
    run.await
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target: LOG_TARGET, "failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(err) => {
                warn!(target: LOG_TARGET, "failed to register SIGTERM handler: {err}");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
