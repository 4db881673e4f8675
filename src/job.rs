//! Minimal job identity and result types.
//!
//! The persistence format and wire protocol for jobs are out of scope for
//! this crate; these types only carry enough identity for filters and the
//! inner performer to log and branch on.

use std::fmt;

/// Identifies a single background-job invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The outcome of a successfully executed job body. Opaque to the pipeline;
/// filters that care about the payload downcast it.
#[derive(Clone)]
pub struct JobResult(std::sync::Arc<dyn std::any::Any + Send + Sync>);

impl JobResult {
    pub fn new<T: std::any::Any + Send + Sync>(value: T) -> Self {
        Self(std::sync::Arc::new(value))
    }

    pub fn downcast_ref<T: std::any::Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JobResult").field(&"..").finish()
    }
}
