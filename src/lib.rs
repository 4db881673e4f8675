//! Core execution engine for a background-job processing platform: a
//! filter pipeline that wraps job invocation with ordered interception
//! hooks, and a processing server that supervises long-running background
//! processes with cooperative, three-stage shutdown.
//!
//! Persistence, the wire protocol, dashboard rendering, authentication, and
//! time-zone resolution are out of scope — this crate only owns the
//! execution semantics around a job once something else has decided it
//! should run.

pub mod config;
pub mod context;
pub mod cursor;
pub mod demo_job;
pub mod error;
pub mod filter;
pub mod job;
pub mod pipeline;
pub mod server;

pub use context::{CancellationSignals, PerformContext};
pub use error::{FilterException, JobError, PipelineError, ProcessError, ServerError};
pub use filter::{AsyncServerExceptionFilter, AsyncServerFilter, Filter, FilterProvider, ServerExceptionFilter, ServerFilter};
pub use job::{JobId, JobResult};
pub use pipeline::{FilterPipeline, InnerPerformer};
pub use server::{BackgroundProcess, BackgroundProcessContext, ProcessingServer, ProcessingServerOptions};
