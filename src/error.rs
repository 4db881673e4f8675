//! Error taxonomy for the filter pipeline and the processing server.

use thiserror::Error;

/// Errors that can escape [`crate::pipeline::FilterPipeline::perform`].
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Internal control signal: abandon this execution, skip retries and
    /// exception filters, and rethrow verbatim wherever it is observed.
    #[error("job was aborted")]
    Aborted,

    /// Cooperative cancellation. Rethrown verbatim when shutdown is in
    /// progress, otherwise wrapped into [`PipelineError::Performance`] by
    /// whichever call site observes it escaping a filter method.
    #[error("job was canceled")]
    Canceled,

    /// Wraps any non-control-flow error that escaped a pre- or post-filter
    /// method (as opposed to the job body itself).
    #[error("filter raised an exception while performing the job")]
    Performance {
        #[source]
        source: anyhow::Error,
    },

    /// The job body itself failed. Delivered to post-filters and, if left
    /// unhandled, to exception filters before being rethrown.
    #[error("job execution failed: {0}")]
    Job(#[from] JobError),

    /// A public operation was called with an invalid `PerformContext`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl PipelineError {
    /// True for the two control-flow kinds that must never be wrapped or
    /// handed to exception filters under their respective conditions.
    pub fn is_aborted(&self) -> bool {
        matches!(self, PipelineError::Aborted)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, PipelineError::Canceled)
    }
}

/// What a filter hook (`on_performing`, `on_performed`, the internal
/// per-step cancellation check) can raise. Distinct from [`PipelineError`]
/// because only two of its variants carry special "never wrap, never hand
/// to exception filters under some condition" behavior — everything else
/// is an arbitrary filter-author error, folded through `anyhow`.
#[derive(Error, Debug)]
pub enum FilterException {
    #[error("job was aborted")]
    Aborted,

    #[error("job was canceled")]
    Canceled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FilterException {
    /// Implements `handle_job_performance_exception`: abort and
    /// shutdown-cancel pass through verbatim, everything else becomes
    /// [`PipelineError::Performance`].
    pub fn into_pipeline_error(self, shutdown_requested: bool) -> PipelineError {
        match self {
            FilterException::Aborted => PipelineError::Aborted,
            FilterException::Canceled if shutdown_requested => PipelineError::Canceled,
            FilterException::Canceled => PipelineError::Performance {
                source: anyhow::Error::new(FilterException::Canceled),
            },
            FilterException::Other(source) => PipelineError::Performance { source },
        }
    }
}

/// Errors raised by an [`crate::pipeline::InnerPerformer`] while executing the
/// job body.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("job method invocation failed: {0}")]
    Invocation(String),

    #[error("job was canceled")]
    Canceled,

    #[error("job was aborted")]
    Aborted,
}

/// Errors raised by a [`crate::server::process::BackgroundProcess`].
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("process was canceled")]
    Canceled,

    #[error("process failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ProcessError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, ProcessError::Canceled)
    }
}

/// Errors raised by [`crate::server::ProcessingServer`]'s public operations.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("processing server has already been disposed")]
    Disposed,

    #[error("background process {name:?} failed permanently: {source}")]
    ProcessFailed {
        name: String,
        #[source]
        source: ProcessError,
    },
}
