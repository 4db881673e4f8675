//! The filter pipeline: wraps a single job execution with ordered server
//! filters and a fallback exception-filter chain.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::context::{PerformContext, PerformedContext, PerformingContext, ServerExceptionContext};
use crate::cursor::{CursorStep, FilterCursor};
use crate::error::{FilterException, JobError, PipelineError};
use crate::filter::{FilterHandle, FilterProvider};
use crate::job::JobResult;

/// Invokes the job body itself. The one piece of the pipeline that is
/// never generic over sync/async duality, since a job either is the thing
/// being performed or it isn't.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait InnerPerformer: Send + Sync {
    async fn perform(&self, ctx: &PerformContext) -> Result<JobResult, JobError>;
}

/// Drives one [`PerformContext`] through the pre-filter phase, the inner
/// performer, the post-filter phase, and (on unhandled failure) the
/// exception-filter chain.
///
/// The post-filter phase walks filters **forward** on the success/error
/// path, but the cancellation short-circuit walks **backward** from the
/// canceling filter. This asymmetry is specified, observed behavior, not an
/// oversight — see `DESIGN.md` for the rationale.
pub struct FilterPipeline {
    filter_provider: Arc<dyn FilterProvider>,
    inner_performer: Arc<dyn InnerPerformer>,
}

/// Explicit states driving the pre-filter / post-filter walk, matched in a
/// loop so every transition is independently auditable and testable.
enum JobFilters {
    Begin,
    OnPerformingNext,
    OnPerformingInvoke(usize, bool),
    OnPerformingCheckCancel(usize),
    OnCancelPrev,
    OnCancelInvoke(usize, bool),
    PerformInner,
    OnPerformedNext,
    OnPerformedInvoke(usize, bool),
    End,
}

enum ExceptionFilters {
    Begin,
    ErrorHandlerNext,
    ErrorHandlerInvoke(usize, bool),
    End,
}

fn has_async_performing(handle: &FilterHandle) -> bool {
    handle.filter.as_async_server_filter().is_some()
}

fn has_sync_performing(handle: &FilterHandle) -> bool {
    handle.filter.as_server_filter().is_some()
}

fn has_async_exception(handle: &FilterHandle) -> bool {
    handle.filter.as_async_server_exception_filter().is_some()
}

fn has_sync_exception(handle: &FilterHandle) -> bool {
    handle.filter.as_server_exception_filter().is_some()
}

fn step_parts(step: CursorStep) -> Option<(usize, bool)> {
    match step {
        CursorStep::Async(i) => Some((i, true)),
        CursorStep::Sync(i) => Some((i, false)),
        CursorStep::NotFound => None,
    }
}

impl FilterPipeline {
    pub fn new(filter_provider: Arc<dyn FilterProvider>, inner_performer: Arc<dyn InnerPerformer>) -> Self {
        Self {
            filter_provider,
            inner_performer,
        }
    }

    /// Runs the full pipeline for `ctx`. `Ok(None)` means a pre-filter
    /// canceled the job before the inner performer ran.
    pub async fn perform(&self, ctx: &PerformContext) -> Result<Option<JobResult>, PipelineError> {
        let filters = self.filter_provider.get_filters(ctx.job_id());
        let mut cursor = FilterCursor::new(&filters);
        let mut performing = PerformingContext::new(ctx);
        let mut performed: Option<PerformedContext<'_>> = None;
        let mut state = JobFilters::Begin;

        loop {
            state = match state {
                JobFilters::Begin => JobFilters::OnPerformingNext,

                JobFilters::OnPerformingNext => {
                    if let Err(e) = self.check_cancellation(ctx) {
                        return self.escape_pre_post(e, ctx).await;
                    }
                    match step_parts(cursor.next_matching(has_async_performing, has_sync_performing)) {
                        None => JobFilters::PerformInner,
                        Some((idx, is_async)) => JobFilters::OnPerformingInvoke(idx, is_async),
                    }
                }

                JobFilters::OnPerformingInvoke(idx, is_async) => {
                    let handle = &filters[idx];
                    debug!(job_id = %ctx.job_id(), filter_index = idx, is_async, "on_performing");
                    let outcome = if is_async {
                        let f = handle
                            .filter
                            .as_async_server_filter()
                            .expect("cursor resolved an async-capable filter");
                        f.on_performing_async(&mut performing).await
                    } else {
                        let f = handle
                            .filter
                            .as_server_filter()
                            .expect("cursor resolved a sync-capable filter");
                        f.on_performing(&mut performing)
                    };
                    if let Err(e) = outcome {
                        return self.escape_pre_post(e, ctx).await;
                    }
                    JobFilters::OnPerformingCheckCancel(idx)
                }

                JobFilters::OnPerformingCheckCancel(_idx) => {
                    if performing.canceled {
                        performed = Some(PerformedContext::canceled(ctx));
                        JobFilters::OnCancelPrev
                    } else {
                        JobFilters::OnPerformingNext
                    }
                }

                JobFilters::OnCancelPrev => {
                    match step_parts(cursor.prev_matching(has_async_performing, has_sync_performing)) {
                        None => JobFilters::End,
                        Some((idx, is_async)) => JobFilters::OnCancelInvoke(idx, is_async),
                    }
                }

                JobFilters::OnCancelInvoke(idx, is_async) => {
                    let handle = &filters[idx];
                    let ctx_mut = performed.as_mut().expect("canceled context set before OnCancelPrev");
                    debug!(job_id = %ctx.job_id(), filter_index = idx, is_async, "on_performed (cancel)");
                    let outcome = if is_async {
                        let f = handle
                            .filter
                            .as_async_server_filter()
                            .expect("cursor resolved an async-capable filter");
                        f.on_performed_async(ctx_mut).await
                    } else {
                        let f = handle
                            .filter
                            .as_server_filter()
                            .expect("cursor resolved a sync-capable filter");
                        f.on_performed(ctx_mut)
                    };
                    if let Err(e) = outcome {
                        return self.escape_pre_post(e, ctx).await;
                    }
                    JobFilters::OnCancelPrev
                }

                JobFilters::PerformInner => {
                    debug!(job_id = %ctx.job_id(), "invoking inner performer");
                    performed = Some(match self.inner_performer.perform(ctx).await {
                        Ok(result) => PerformedContext::succeeded(ctx, result),
                        // JobAbortedException and OperationCanceledException raised by the
                        // job body carry the same special passthrough/wrapping rules as
                        // when they escape a filter method, so they are unwrapped here
                        // rather than buried inside `PipelineError::Job`.
                        Err(JobError::Aborted) => PerformedContext::failed(ctx, PipelineError::Aborted),
                        Err(JobError::Canceled) => PerformedContext::failed(ctx, PipelineError::Canceled),
                        Err(job_err) => PerformedContext::failed(ctx, PipelineError::Job(job_err)),
                    });
                    cursor.reset();
                    JobFilters::OnPerformedNext
                }

                JobFilters::OnPerformedNext => {
                    // No inter-iteration cancellation check here: every filter whose
                    // `on_performing` ran during the pre-phase must observe its
                    // `on_performed` call, and by the time the post-phase starts the
                    // pre-phase has already run to completion.
                    match step_parts(cursor.next_matching(has_async_performing, has_sync_performing)) {
                        None => JobFilters::End,
                        Some((idx, is_async)) => JobFilters::OnPerformedInvoke(idx, is_async),
                    }
                }

                JobFilters::OnPerformedInvoke(idx, is_async) => {
                    let handle = &filters[idx];
                    let ctx_mut = performed.as_mut().expect("performed context set before post-walk");
                    debug!(job_id = %ctx.job_id(), filter_index = idx, is_async, "on_performed");
                    let outcome = if is_async {
                        let f = handle
                            .filter
                            .as_async_server_filter()
                            .expect("cursor resolved an async-capable filter");
                        f.on_performed_async(ctx_mut).await
                    } else {
                        let f = handle
                            .filter
                            .as_server_filter()
                            .expect("cursor resolved a sync-capable filter");
                        f.on_performed(ctx_mut)
                    };
                    if let Err(e) = outcome {
                        return self.escape_pre_post(e, ctx).await;
                    }
                    JobFilters::OnPerformedNext
                }

                JobFilters::End => {
                    let performed = performed.expect("End is only reached after a performed context is set");
                    if performed.canceled {
                        return Ok(None);
                    }
                    return self.finish(ctx, performed).await;
                }
            };
        }
    }

    fn check_cancellation(&self, ctx: &PerformContext) -> Result<(), FilterException> {
        if ctx.is_cancelled() {
            Err(FilterException::Canceled)
        } else {
            Ok(())
        }
    }

    /// Wraps an exception that escaped a pre- or post-filter method and
    /// routes it through the same exception-filter chain a job-body
    /// exception goes through, rather than returning it to the caller
    /// directly.
    async fn escape_pre_post(
        &self,
        e: FilterException,
        ctx: &PerformContext,
    ) -> Result<Option<JobResult>, PipelineError> {
        let shutdown_requested = ctx.cancellation().shutdown_requested();
        let wrapped = e.into_pipeline_error(shutdown_requested);
        if wrapped.is_aborted() {
            warn!(job_id = %ctx.job_id(), "job aborted by filter");
        } else {
            warn!(job_id = %ctx.job_id(), error = %wrapped, "filter raised an exception");
        }
        self.route_exception(ctx, wrapped).await
    }

    /// Runs the tail of the pipeline once the post-phase has completed
    /// without a filter escaping: dispatches to the exception-filter chain
    /// if there's an unhandled exception, then returns.
    async fn finish(
        &self,
        ctx: &PerformContext,
        performed: PerformedContext<'_>,
    ) -> Result<Option<JobResult>, PipelineError> {
        match performed.exception {
            None => Ok(performed.result),
            Some(_) if performed.exception_handled => Ok(performed.result),
            Some(exception) => self.route_exception(ctx, exception).await,
        }
    }

    /// Shared tail for any unhandled `PipelineError`, whether it came from
    /// the job body (via `finish`) or escaped a filter method (via
    /// `escape_pre_post`): `Aborted` and a shutdown-time `Canceled` are
    /// rethrown before the exception-filter chain starts; everything else
    /// is offered to the chain, and rethrown only if still unhandled.
    async fn route_exception(
        &self,
        ctx: &PerformContext,
        exception: PipelineError,
    ) -> Result<Option<JobResult>, PipelineError> {
        if exception.is_aborted()
            || (exception.is_canceled() && ctx.cancellation().shutdown_requested())
        {
            return Err(exception);
        }
        let handled = self.run_exception_filters(ctx, &exception).await;
        if handled {
            Ok(None)
        } else {
            error!(job_id = %ctx.job_id(), error = %exception, "job execution failed, unhandled");
            Err(exception)
        }
    }

    async fn run_exception_filters(&self, ctx: &PerformContext, exception: &PipelineError) -> bool {
        let filters = self.filter_provider.get_filters(ctx.job_id());
        let mut cursor = FilterCursor::new(&filters);
        let mut handler_ctx = ServerExceptionContext::new(ctx, exception);
        let mut state = ExceptionFilters::Begin;

        loop {
            state = match state {
                ExceptionFilters::Begin => ExceptionFilters::ErrorHandlerNext,
                ExceptionFilters::ErrorHandlerNext => {
                    match step_parts(cursor.next_matching(has_async_exception, has_sync_exception)) {
                        None => ExceptionFilters::End,
                        Some((idx, is_async)) => ExceptionFilters::ErrorHandlerInvoke(idx, is_async),
                    }
                }
                ExceptionFilters::ErrorHandlerInvoke(idx, is_async) => {
                    let handle = &filters[idx];
                    debug!(job_id = %ctx.job_id(), filter_index = idx, is_async, "on_server_exception");
                    if is_async {
                        let f = handle
                            .filter
                            .as_async_server_exception_filter()
                            .expect("cursor resolved an async-capable exception filter");
                        f.on_server_exception_async(&mut handler_ctx).await;
                    } else {
                        let f = handle
                            .filter
                            .as_server_exception_filter()
                            .expect("cursor resolved a sync-capable exception filter");
                        f.on_server_exception(&mut handler_ctx);
                    }
                    ExceptionFilters::ErrorHandlerNext
                }
                ExceptionFilters::End => return handler_ctx.exception_handled,
            };
        }
    }
}
