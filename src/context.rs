//! Execution context threaded through a single job performance.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::job::{JobId, JobResult};

/// Job-level and server-wide cancellation, bundled so call sites never have
/// to juggle two tokens separately.
///
/// `job` is cancelled when the caller cancels this one invocation; `shutdown`
/// is a child of the server's shutdown token and is cancelled when the whole
/// process is tearing down. A pipeline treats the two uniformly for the
/// purpose of "should I stop now", but distinguishes them when deciding
/// whether a [`PipelineError::Canceled`] should pass through unwrapped.
#[derive(Clone)]
pub struct CancellationSignals {
    job: CancellationToken,
    shutdown: CancellationToken,
}

impl CancellationSignals {
    pub fn new(job: CancellationToken, shutdown: CancellationToken) -> Self {
        Self { job, shutdown }
    }

    /// A signals pair with no parent shutdown token, for standalone use
    /// (tests, one-off invocations outside a hosted server).
    pub fn standalone() -> Self {
        Self {
            job: CancellationToken::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn job_token(&self) -> &CancellationToken {
        &self.job
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// True if either the job or the shutdown signal has fired.
    pub fn is_requested(&self) -> bool {
        self.job.is_cancelled() || self.shutdown.is_cancelled()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Returns `Err(PipelineError::Canceled)` if either signal has fired.
    pub fn throw_if_requested(&self) -> Result<(), PipelineError> {
        if self.is_requested() {
            Err(PipelineError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// A storage handle opaque to the pipeline; the core never interprets it,
/// it only threads it through to the inner performer and user filters.
pub type StorageHandle = Arc<dyn std::any::Any + Send + Sync>;

/// The execution request passed into [`crate::pipeline::FilterPipeline::perform`].
#[derive(Clone)]
pub struct PerformContext {
    job_id: JobId,
    storage: StorageHandle,
    cancellation: CancellationSignals,
}

impl PerformContext {
    pub fn new(job_id: JobId, storage: StorageHandle, cancellation: CancellationSignals) -> Self {
        Self {
            job_id,
            storage,
            cancellation,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    pub fn cancellation(&self) -> &CancellationSignals {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_requested()
    }
}

/// Mutable view handed to pre-filters. Setting `canceled` short-circuits the
/// rest of the pre-phase and the job body.
pub struct PerformingContext<'a> {
    pub perform: &'a PerformContext,
    pub canceled: bool,
}

impl<'a> PerformingContext<'a> {
    pub fn new(perform: &'a PerformContext) -> Self {
        Self {
            perform,
            canceled: false,
        }
    }
}

/// View handed to post-filters, carrying either a result or an exception.
pub struct PerformedContext<'a> {
    pub perform: &'a PerformContext,
    pub result: Option<JobResult>,
    pub canceled: bool,
    pub exception: Option<PipelineError>,
    pub exception_handled: bool,
}

impl<'a> PerformedContext<'a> {
    pub fn canceled(perform: &'a PerformContext) -> Self {
        Self {
            perform,
            result: None,
            canceled: true,
            exception: None,
            exception_handled: false,
        }
    }

    pub fn succeeded(perform: &'a PerformContext, result: JobResult) -> Self {
        Self {
            perform,
            result: Some(result),
            canceled: false,
            exception: None,
            exception_handled: false,
        }
    }

    pub fn failed(perform: &'a PerformContext, exception: PipelineError) -> Self {
        Self {
            perform,
            result: None,
            canceled: false,
            exception: Some(exception),
            exception_handled: false,
        }
    }
}

/// View handed to exception filters.
pub struct ServerExceptionContext<'a> {
    pub perform: &'a PerformContext,
    pub exception: &'a PipelineError,
    pub exception_handled: bool,
}

impl<'a> ServerExceptionContext<'a> {
    pub fn new(perform: &'a PerformContext, exception: &'a PipelineError) -> Self {
        Self {
            perform,
            exception,
            exception_handled: false,
        }
    }
}
