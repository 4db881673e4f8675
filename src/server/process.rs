//! Background processes and the retry/loop envelopes that wrap them.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ProcessError;
use crate::server::options::ProcessingServerOptions;

/// Cancellation context handed to a [`BackgroundProcess`] on each
/// invocation, carrying the server's three nested shutdown signals:
/// `stopping` asks the process to wind down cooperatively and is what
/// stops the infinite loop; `stopped` escalates to "no more blocking,
/// cooperative cancellation now"; `shutdown` means the server has given up
/// waiting and the process should abandon whatever it is doing.
#[derive(Clone)]
pub struct BackgroundProcessContext {
    pub stopping: CancellationToken,
    pub stopped: CancellationToken,
    pub shutdown: CancellationToken,
}

impl BackgroundProcessContext {
    pub fn is_stopping(&self) -> bool {
        self.stopping.is_cancelled()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// A single long-running unit of server work. The wrapper in this module
/// supplies the infinite-loop and retry behavior; implementors only need to
/// do one unit of work and return.
///
/// An implementation that never awaits (pure synchronous work inside the
/// `async fn` body) runs to completion on first poll — there is no separate
/// "sync-only" variant to model, `async fn` already covers it.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait BackgroundProcess: Send + Sync {
    /// A human-readable name used in logs and in `ServerError::ProcessFailed`.
    fn name(&self) -> String;

    async fn execute(&self, ctx: &BackgroundProcessContext) -> Result<(), ProcessError>;
}

/// Computes `D = min(max_delay, uniform(i^2, (i+1)^2 + 1) seconds)` for
/// 0-based retry attempt `i`.
pub fn retry_delay(attempt: u32, max_delay: Duration) -> Duration {
    let lo = (attempt as u64).saturating_mul(attempt as u64);
    let hi = ((attempt as u64) + 1).saturating_mul((attempt as u64) + 1) + 1;
    let seconds = rand::rng().random_range(lo..hi);
    std::cmp::min(Duration::from_secs(seconds), max_delay)
}

fn log_retry(attempt: u32, process_name: &str, delay: Duration, err: &ProcessError) {
    match attempt {
        0 => debug!(process = process_name, ?delay, error = %err, "retrying background process"),
        1 => info!(process = process_name, ?delay, error = %err, "retrying background process"),
        2 => warn!(process = process_name, ?delay, error = %err, "retrying background process"),
        _ => error!(process = process_name, ?delay, error = %err, "retrying background process"),
    }
}

/// Wraps a [`BackgroundProcess`] with bounded, jittered-exponential retry.
/// A cancellation observed while the inner process is shutting down
/// propagates without being retried.
pub struct AutomaticRetryTask {
    inner: Arc<dyn BackgroundProcess>,
    max_attempts: u32,
    max_retry_delay: Duration,
}

impl AutomaticRetryTask {
    pub fn new(inner: Arc<dyn BackgroundProcess>, options: &ProcessingServerOptions) -> Self {
        Self {
            inner,
            max_attempts: options.max_attempts,
            max_retry_delay: options.max_retry_delay,
        }
    }

    pub async fn run(&self, ctx: &BackgroundProcessContext) -> Result<(), ProcessError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.execute(ctx).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if err.is_canceled() && ctx.is_shutdown() {
                        return Err(err);
                    }
                    if attempt + 1 >= self.max_attempts {
                        error!(process = %self.inner.name(), attempt, "background process exhausted retries");
                        return Err(err);
                    }
                    let delay = retry_delay(attempt, self.max_retry_delay);
                    log_retry(attempt, &self.inner.name(), delay, &err);
                    tokio::select! {
                        biased;
                        _ = ctx.shutdown.cancelled() => return Err(ProcessError::Canceled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Repeats the wrapped task while the server is not stopping.
pub struct InfiniteLoopTask {
    inner: AutomaticRetryTask,
}

impl InfiniteLoopTask {
    pub fn new(inner: AutomaticRetryTask) -> Self {
        Self { inner }
    }

    pub async fn run(&self, ctx: &BackgroundProcessContext) -> Result<(), ProcessError> {
        while !ctx.is_stopping() {
            self.inner.run(ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProcess {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl BackgroundProcess for FlakyProcess {
        fn name(&self) -> String {
            "flaky".to_string()
        }

        async fn execute(&self, _ctx: &BackgroundProcessContext) -> Result<(), ProcessError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(ProcessError::Failed(Box::new(std::io::Error::other("nope"))))
            } else {
                Ok(())
            }
        }
    }

    fn ctx() -> BackgroundProcessContext {
        BackgroundProcessContext {
            stopping: CancellationToken::new(),
            stopped: CancellationToken::new(),
            shutdown: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let process = Arc::new(FlakyProcess {
            fail_times: 2,
            calls: AtomicU32::new(0),
        });
        let options = ProcessingServerOptions {
            max_retry_delay: Duration::from_millis(1),
            ..ProcessingServerOptions::default()
        };
        let task = AutomaticRetryTask::new(process.clone(), &options);
        let result = task.run(&ctx()).await;
        assert!(result.is_ok());
        assert_eq!(process.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let process = Arc::new(FlakyProcess {
            fail_times: 100,
            calls: AtomicU32::new(0),
        });
        let options = ProcessingServerOptions {
            max_attempts: 3,
            max_retry_delay: Duration::from_millis(1),
            ..ProcessingServerOptions::default()
        };
        let task = AutomaticRetryTask::new(process.clone(), &options);
        let result = task.run(&ctx()).await;
        assert!(result.is_err());
        assert_eq!(process.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_during_wait_stops_without_extra_attempt() {
        let process = Arc::new(FlakyProcess {
            fail_times: 100,
            calls: AtomicU32::new(0),
        });
        let options = ProcessingServerOptions {
            max_retry_delay: Duration::from_secs(3600),
            ..ProcessingServerOptions::default()
        };
        let task = AutomaticRetryTask::new(process.clone(), &options);
        let context = ctx();
        context.shutdown.cancel();
        let result = task.run(&context).await;
        assert!(result.is_err());
        assert_eq!(process.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stopped_alone_does_not_cut_the_retry_wait_short() {
        let process = Arc::new(FlakyProcess {
            fail_times: 1,
            calls: AtomicU32::new(0),
        });
        let options = ProcessingServerOptions {
            max_retry_delay: Duration::from_millis(20),
            ..ProcessingServerOptions::default()
        };
        let task = AutomaticRetryTask::new(process.clone(), &options);
        let context = ctx();
        context.stopped.cancel();
        let result = task.run(&context).await;
        assert!(result.is_ok());
        assert_eq!(process.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retry_delay_is_bounded_by_max() {
        for attempt in 0..6 {
            let delay = retry_delay(attempt, Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(5));
        }
    }
}
