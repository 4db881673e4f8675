//! A minimal logging filter and a ticking background process, used by the
//! demo binary and by the integration tests to exercise the pipeline and
//! the server end to end without any domain-specific job logic.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::context::{PerformedContext, PerformingContext, ServerExceptionContext};
use crate::error::{FilterException, JobError, ProcessError};
use crate::filter::{Filter, ServerExceptionFilter, ServerFilter};
use crate::job::JobResult;
use crate::pipeline::InnerPerformer;
use crate::server::{BackgroundProcess, BackgroundProcessContext};
use crate::PerformContext;

/// Logs job entry/exit at the `info` level, the way
/// `background_jobs::audit_logger::JobAuditLogger` logs job lifecycle
/// events, but as a reusable [`Filter`] instead of a job-specific helper.
pub struct LoggingFilter;

impl Filter for LoggingFilter {
    fn as_server_filter(&self) -> Option<&dyn ServerFilter> {
        Some(self)
    }
}

impl ServerFilter for LoggingFilter {
    fn on_performing(&self, context: &mut PerformingContext<'_>) -> Result<(), FilterException> {
        info!(job_id = %context.perform.job_id(), "job performing");
        Ok(())
    }

    fn on_performed(&self, context: &mut PerformedContext<'_>) -> Result<(), FilterException> {
        if let Some(exception) = &context.exception {
            info!(job_id = %context.perform.job_id(), error = %exception, "job performed with error");
        } else {
            info!(job_id = %context.perform.job_id(), "job performed");
        }
        Ok(())
    }
}

/// Logs, and marks handled, any exception that reaches the exception
/// filter chain — a catch-all matching how dashboards typically want every
/// job failure recorded even when no other filter claims it.
pub struct LoggingExceptionFilter;

impl Filter for LoggingExceptionFilter {
    fn as_server_exception_filter(&self) -> Option<&dyn ServerExceptionFilter> {
        Some(self)
    }
}

impl ServerExceptionFilter for LoggingExceptionFilter {
    fn on_server_exception(&self, context: &mut ServerExceptionContext<'_>) {
        info!(job_id = %context.perform.job_id(), error = %context.exception, "unhandled job exception logged");
    }
}

/// A trivial inner performer returning a fixed counter value, standing in
/// for whatever a real job-method invocation dispatcher would do.
pub struct CountingPerformer {
    calls: AtomicU64,
}

impl Default for CountingPerformer {
    fn default() -> Self {
        Self {
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl InnerPerformer for CountingPerformer {
    async fn perform(&self, ctx: &PerformContext) -> Result<JobResult, JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Canceled);
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(JobResult::new(n))
    }
}

/// A background process that ticks on an interval until asked to stop,
/// demonstrating `BackgroundProcess` the way a periodic maintenance task
/// (event pruning, storage metrics) might tick.
pub struct TickingProcess {
    name: String,
    interval: std::time::Duration,
}

impl TickingProcess {
    pub fn new(name: impl Into<String>, interval: std::time::Duration) -> Self {
        Self {
            name: name.into(),
            interval,
        }
    }
}

#[async_trait]
impl BackgroundProcess for TickingProcess {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn execute(&self, ctx: &BackgroundProcessContext) -> Result<(), ProcessError> {
        tokio::select! {
            _ = ctx.stopped.cancelled() => Err(ProcessError::Canceled),
            _ = tokio::time::sleep(self.interval) => {
                info!(process = %self.name, "tick");
                Ok(())
            }
        }
    }
}
