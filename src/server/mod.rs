//! The background processing server: a supervisor hosting a set of
//! [`process::BackgroundProcess`]es behind cooperative, three-stage
//! shutdown.

pub mod options;
pub mod process;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use options::ProcessingServerOptions;
pub use process::{BackgroundProcess, BackgroundProcessContext};

use crate::error::ServerError;
use process::{AutomaticRetryTask, InfiniteLoopTask};

static SUPERVISOR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Supervises a fixed set of background processes for the lifetime of the
/// server. Construction spawns the supervisor task immediately; it never
/// blocks the caller.
pub struct ProcessingServer {
    stopping: CancellationToken,
    stopped: CancellationToken,
    shutdown: CancellationToken,
    options: ProcessingServerOptions,
    dispatcher: JoinHandle<()>,
    /// Cached once `wait_for_shutdown` has observed the dispatcher actually
    /// complete (as opposed to timing out waiting on it). A `JoinHandle`
    /// must not be polled again after it resolves, so once this is set,
    /// further calls return the cached outcome instead of re-awaiting
    /// `dispatcher`.
    dispatcher_outcome: Option<bool>,
    disposed: Arc<AtomicBool>,
}

impl ProcessingServer {
    pub fn new(processes: Vec<Arc<dyn BackgroundProcess>>, options: ProcessingServerOptions) -> Self {
        let stopping = CancellationToken::new();
        let stopped = CancellationToken::new();
        let shutdown = CancellationToken::new();
        let disposed = Arc::new(AtomicBool::new(false));

        let supervisor_id = SUPERVISOR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dispatcher = {
            let stopping = stopping.clone();
            let stopped = stopped.clone();
            let shutdown = shutdown.clone();
            let options = options.clone();
            tokio::spawn(async move {
                run_dispatcher(supervisor_id, processes, stopping, stopped, shutdown, options).await;
            })
        };

        Self {
            stopping,
            stopped,
            shutdown,
            options,
            dispatcher,
            dispatcher_outcome: None,
            disposed,
        }
    }

    fn check_disposed(&self) -> Result<(), ServerError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(ServerError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Begins cooperative shutdown: fires `stopping` immediately, schedules
    /// `stopped` after `stop_timeout` and `shutdown` after `shutdown_timeout`.
    /// Idempotent — calling it again after the first call is a no-op.
    pub fn send_stop(&self) -> Result<(), ServerError> {
        self.check_disposed()?;
        if self.stopping.is_cancelled() {
            return Ok(());
        }
        info!("processing server stop requested");
        self.stopping.cancel();

        let stopped = self.stopped.clone();
        let stop_timeout = self.options.stop_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(stop_timeout).await;
            stopped.cancel();
        });

        let shutdown = self.shutdown.clone();
        let shutdown_timeout = self.options.shutdown_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(shutdown_timeout).await;
            shutdown.cancel();
        });

        Ok(())
    }

    /// Waits until the supervisor task has exited, up to
    /// `shutdown_timeout + last_chance_timeout`. Returns whether it
    /// actually stopped within that bound. Idempotent: once the dispatcher
    /// has genuinely completed, later calls return the cached outcome
    /// rather than polling the same `JoinHandle` again, which tokio does
    /// not support.
    pub async fn wait_for_shutdown(&mut self) -> bool {
        if let Some(outcome) = self.dispatcher_outcome {
            return outcome;
        }
        let deadline = self.options.shutdown_timeout + self.options.last_chance_timeout;
        match tokio::time::timeout(deadline, &mut self.dispatcher).await {
            Ok(Ok(())) => {
                self.dispatcher_outcome = Some(true);
                true
            }
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "processing server supervisor task panicked");
                self.dispatcher_outcome = Some(true);
                true
            }
            Err(_) => {
                warn!("processing server did not stop within the shutdown deadline");
                false
            }
        }
    }

    /// Convenience combining `send_stop` and `wait_for_shutdown`.
    pub async fn shutdown(&mut self) -> Result<bool, ServerError> {
        self.send_stop()?;
        Ok(self.wait_for_shutdown().await)
    }

    /// Ensures shutdown has been requested, waits for it, then releases the
    /// server's cancellation sources. Safe to call more than once: later
    /// calls observe `disposed` already set and return immediately.
    pub async fn dispose(&mut self) -> Result<(), ServerError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.stopping.is_cancelled() {
            self.stopping.cancel();
        }
        self.stopped.cancel();
        self.shutdown.cancel();
        let _ = self.wait_for_shutdown().await;
        Ok(())
    }

    /// True once `send_stop` has been called.
    pub fn is_stopping(&self) -> bool {
        self.stopping.is_cancelled()
    }
}

/// Wraps [`run_supervisor`] with error-bounded retry: a panic in the
/// supervisor body is itself restarted after `options.restart_delay`,
/// mirroring the retry envelope each individual process already gets from
/// [`AutomaticRetryTask`]. Stops retrying once `shutdown` has fired.
async fn run_dispatcher(
    supervisor_id: u64,
    processes: Vec<Arc<dyn BackgroundProcess>>,
    stopping: CancellationToken,
    stopped: CancellationToken,
    shutdown: CancellationToken,
    options: ProcessingServerOptions,
) {
    loop {
        let processes = processes.clone();
        let stopping = stopping.clone();
        let stopped = stopped.clone();
        let shutdown_child = shutdown.clone();
        let options_child = options.clone();
        let attempt = tokio::spawn(async move {
            run_supervisor(supervisor_id, processes, stopping, stopped, shutdown_child, options_child).await;
        });
        match attempt.await {
            Ok(()) => return,
            Err(join_err) if shutdown.is_cancelled() => {
                warn!(error = %join_err, "processing server supervisor exited during shutdown");
                return;
            }
            Err(join_err) => {
                error!(error = %join_err, delay = ?options.restart_delay, "processing server supervisor crashed, restarting");
                tokio::time::sleep(options.restart_delay).await;
            }
        }
    }
}

async fn run_supervisor(
    supervisor_id: u64,
    processes: Vec<Arc<dyn BackgroundProcess>>,
    stopping: CancellationToken,
    stopped: CancellationToken,
    shutdown: CancellationToken,
    options: ProcessingServerOptions,
) {
    let span_name = format!("background-server-process-#{supervisor_id}");
    let _span = tracing::info_span!("processing_server", supervisor = %span_name).entered();
    info!(processes = processes.len(), "processing server starting");

    let handles: Vec<_> = processes
        .iter()
        .cloned()
        .map(|process| {
            let ctx = BackgroundProcessContext {
                stopping: stopping.child_token(),
                stopped: stopped.child_token(),
                shutdown: shutdown.child_token(),
            };
            let options = options.clone();
            tokio::spawn(async move {
                let name = process.name();
                let task = InfiniteLoopTask::new(AutomaticRetryTask::new(process, &options));
                if let Err(err) = task.run(&ctx).await {
                    if !err.is_canceled() {
                        warn!(process = %name, error = %err, "background process exited with an error");
                    }
                }
            })
        })
        .collect();

    let joined = futures::future::join_all(handles);
    tokio::select! {
        _ = joined => {}
        _ = shutdown.cancelled() => {
            warn!("shutdown signal fired before all processes exited; abandoning supervision");
        }
    }

    info!("processing server stopped");
}

/// Blocks the current task until an OS shutdown signal (Ctrl-C, SIGTERM
/// where supported) arrives, then drives `server` through `shutdown` with
/// `last_chance_timeout` as the final grace period.
pub async fn run_until_signal(server: &mut ProcessingServer) -> Result<(), ServerError> {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    let last_chance = server.options.last_chance_timeout;
    server.send_stop()?;
    let stopped = tokio::time::timeout(last_chance, server.wait_for_shutdown()).await;
    if stopped.is_err() {
        warn!("processing server did not stop within the last-chance timeout");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct CountingProcess {
        name: &'static str,
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BackgroundProcess for CountingProcess {
        fn name(&self) -> String {
            self.name.to_string()
        }

        async fn execute(&self, ctx: &BackgroundProcessContext) -> Result<(), ProcessError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if ctx.is_stopping() {
                return Err(ProcessError::Canceled);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_stops_dispatcher() {
        let runs = Arc::new(AtomicU32::new(0));
        let process = Arc::new(CountingProcess {
            name: "counter",
            runs: runs.clone(),
        });
        let options = ProcessingServerOptions {
            stop_timeout: Duration::from_millis(20),
            shutdown_timeout: Duration::from_millis(40),
            last_chance_timeout: Duration::from_millis(20),
            restart_delay: Duration::from_millis(5),
            max_attempts: 5,
            max_retry_delay: Duration::from_millis(10),
        };
        let mut server = ProcessingServer::new(vec![process], options);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let first = server.dispose().await;
        let second = server.dispose().await;
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(runs.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn operations_fail_after_dispose() {
        let process = Arc::new(CountingProcess {
            name: "counter",
            runs: Arc::new(AtomicU32::new(0)),
        });
        let mut server = ProcessingServer::new(
            vec![process],
            ProcessingServerOptions {
                stop_timeout: Duration::from_millis(5),
                shutdown_timeout: Duration::from_millis(5),
                last_chance_timeout: Duration::from_millis(5),
                ..ProcessingServerOptions::default()
            },
        );
        server.dispose().await.unwrap();
        assert!(matches!(server.send_stop(), Err(ServerError::Disposed)));
    }
}
