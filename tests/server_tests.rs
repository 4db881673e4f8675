//! End-to-end scenarios for the processing server's shutdown protocol and
//! per-process retry/restart envelopes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use processing_server::error::{ProcessError, ServerError};
use processing_server::server::{BackgroundProcess, BackgroundProcessContext, ProcessingServer, ProcessingServerOptions};

fn fast_options() -> ProcessingServerOptions {
    ProcessingServerOptions {
        stop_timeout: Duration::from_millis(20),
        shutdown_timeout: Duration::from_millis(40),
        last_chance_timeout: Duration::from_millis(20),
        restart_delay: Duration::from_millis(5),
        max_attempts: 5,
        max_retry_delay: Duration::from_millis(10),
    }
}

struct TickingProcess {
    runs: Arc<AtomicU32>,
}

#[async_trait]
impl BackgroundProcess for TickingProcess {
    fn name(&self) -> String {
        "ticking".to_string()
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

/// A freshly constructed server is not stopping and runs its process at
/// least once before any shutdown is requested.
#[tokio::test]
async fn server_runs_processes_until_stopped() {
    let runs = Arc::new(AtomicU32::new(0));
    let process = Arc::new(TickingProcess { runs: runs.clone() });
    let mut server = ProcessingServer::new(vec![process], fast_options());

    assert!(!server.is_stopping());
    tokio::time::sleep(Duration::from_millis(15)).await;
    assert!(runs.load(Ordering::SeqCst) >= 1);

    server.dispose().await.unwrap();
}

/// `dispose` is idempotent: calling it twice observes the same effect as
/// calling it once, and leaves the dispatcher stopped.
#[tokio::test]
async fn dispose_is_idempotent() {
    let runs = Arc::new(AtomicU32::new(0));
    let process = Arc::new(TickingProcess { runs: runs.clone() });
    let mut server = ProcessingServer::new(vec![process], fast_options());

    tokio::time::sleep(Duration::from_millis(10)).await;
    server.dispose().await.unwrap();
    server.dispose().await.unwrap();
    assert!(server.is_stopping());
}

/// Every public operation fails with `ServerError::Disposed` once the
/// server has been torn down.
#[tokio::test]
async fn operations_after_dispose_fail() {
    let process = Arc::new(TickingProcess {
        runs: Arc::new(AtomicU32::new(0)),
    });
    let mut server = ProcessingServer::new(vec![process], fast_options());
    server.dispose().await.unwrap();

    assert!(matches!(server.send_stop(), Err(ServerError::Disposed)));
}

/// `send_stop` is itself idempotent — a second call before dispose is a
/// harmless no-op, not an error.
#[tokio::test]
async fn send_stop_called_twice_is_a_no_op() {
    let process = Arc::new(TickingProcess {
        runs: Arc::new(AtomicU32::new(0)),
    });
    let mut server = ProcessingServer::new(vec![process], fast_options());
    server.send_stop().unwrap();
    server.send_stop().unwrap();
    server.dispose().await.unwrap();
}

/// `wait_for_shutdown` reports whether the dispatcher actually stopped
/// within `shutdown_timeout + last_chance_timeout`.
#[tokio::test]
async fn shutdown_reports_whether_dispatcher_stopped() {
    let process = Arc::new(TickingProcess {
        runs: Arc::new(AtomicU32::new(0)),
    });
    let mut server = ProcessingServer::new(vec![process], fast_options());
    let stopped = server.shutdown().await.unwrap();
    assert!(stopped);
}

struct AlwaysCancelingProcess;

#[async_trait]
impl BackgroundProcess for AlwaysCancelingProcess {
    fn name(&self) -> String {
        "always-canceling".to_string()
    }

    async fn execute(&self, _ctx: &BackgroundProcessContext) -> Result<(), ProcessError> {
        Err(ProcessError::Canceled)
    }
}

/// A process that reports cancellation outside of shutdown still gets
/// retried by `AutomaticRetryTask` rather than tearing down the server.
#[tokio::test]
async fn process_reporting_cancellation_outside_shutdown_is_retried() {
    let process = Arc::new(AlwaysCancelingProcess);
    let mut server = ProcessingServer::new(
        vec![process],
        ProcessingServerOptions {
            max_attempts: 2,
            max_retry_delay: Duration::from_millis(5),
            ..fast_options()
        },
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    // The server itself is unaffected by an individual process giving up —
    // it keeps running until explicitly stopped.
    assert!(!server.is_stopping());
    server.dispose().await.unwrap();
}
