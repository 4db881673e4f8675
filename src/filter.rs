//! Server filters and exception filters.
//!
//! A filter is any object implementing one or more of the four capabilities
//! below. Rather than four marker interfaces checked at invocation time,
//! each capability is exposed through an accessor method on [`Filter`] that
//! returns `None` when unimplemented; the pipeline resolves a filter's hook
//! once per call site into a [`PerformingHook`]/[`PerformedHook`]/
//! [`ExceptionHook`] value and never re-derives it, so there is nothing for
//! a stale downcast to get wrong after an `.await`.

use async_trait::async_trait;

use crate::context::{PerformedContext, PerformingContext, ServerExceptionContext};
use crate::error::FilterException;
use crate::job::JobId;

/// Synchronous pre/post execution hook. Returning `Err` short-circuits the
/// rest of the phase; see [`FilterException`] for what that is allowed to
/// carry.
pub trait ServerFilter: Send + Sync {
    fn on_performing(&self, context: &mut PerformingContext<'_>) -> Result<(), FilterException>;
    fn on_performed(&self, context: &mut PerformedContext<'_>) -> Result<(), FilterException>;
}

/// Asynchronous pre/post execution hook, preferred over [`ServerFilter`]
/// when a filter implements both.
#[async_trait]
pub trait AsyncServerFilter: Send + Sync {
    async fn on_performing_async(
        &self,
        context: &mut PerformingContext<'_>,
    ) -> Result<(), FilterException>;
    async fn on_performed_async(
        &self,
        context: &mut PerformedContext<'_>,
    ) -> Result<(), FilterException>;
}

/// Synchronous exception hook. The hook itself cannot fail further; an
/// exception raised while handling an exception is not part of this
/// contract, matching other error-boundary layers in this crate, which
/// never nest fallibility inside a handler.
pub trait ServerExceptionFilter: Send + Sync {
    fn on_server_exception(&self, context: &mut ServerExceptionContext<'_>);
}

/// Asynchronous exception hook, preferred over [`ServerExceptionFilter`]
/// when a filter implements both.
#[async_trait]
pub trait AsyncServerExceptionFilter: Send + Sync {
    async fn on_server_exception_async(&self, context: &mut ServerExceptionContext<'_>);
}

/// A single registered interceptor. Implementors opt into whichever
/// capabilities they support by overriding the corresponding accessor;
/// the defaults declare no support at all.
///
/// Note the pipeline resolves, per call site, "does this filter implement
/// the async variant of this capability" first and falls back to the sync
/// variant only if not — it never calls both for the same phase.
pub trait Filter: Send + Sync {
    fn as_server_filter(&self) -> Option<&dyn ServerFilter> {
        None
    }

    fn as_async_server_filter(&self) -> Option<&dyn AsyncServerFilter> {
        None
    }

    fn as_server_exception_filter(&self) -> Option<&dyn ServerExceptionFilter> {
        None
    }

    fn as_async_server_exception_filter(&self) -> Option<&dyn AsyncServerExceptionFilter> {
        None
    }
}

/// A filter handle as returned by a [`FilterProvider`]. `order` is accepted
/// for compatibility with richer providers but is not interpreted by the
/// core — ordering is entirely the sequence the provider returns.
#[derive(Clone)]
pub struct FilterHandle {
    pub filter: std::sync::Arc<dyn Filter>,
    pub order: i32,
}

impl FilterHandle {
    pub fn new(filter: std::sync::Arc<dyn Filter>) -> Self {
        Self { filter, order: 0 }
    }

    pub fn with_order(filter: std::sync::Arc<dyn Filter>, order: i32) -> Self {
        Self { filter, order }
    }
}

/// Supplies the ordered list of filters that apply to a job. Filters arrive
/// outer-to-inner: index 0 runs its pre-hook first and its post-hook last
/// on the success/error path (but first on the cancellation path — see
/// [`crate::pipeline::FilterPipeline`]).
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait FilterProvider: Send + Sync {
    fn get_filters(&self, job_id: &JobId) -> Vec<FilterHandle>;
}

/// A [`FilterProvider`] returning a fixed list regardless of job, useful for
/// tests and for the demo binary.
pub struct StaticFilterProvider {
    filters: Vec<FilterHandle>,
}

impl StaticFilterProvider {
    pub fn new(filters: Vec<std::sync::Arc<dyn Filter>>) -> Self {
        Self {
            filters: filters.into_iter().map(FilterHandle::new).collect(),
        }
    }
}

impl FilterProvider for StaticFilterProvider {
    fn get_filters(&self, _job_id: &JobId) -> Vec<FilterHandle> {
        self.filters.clone()
    }
}
