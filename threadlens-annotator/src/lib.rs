//! threadlens-annotator library interface
//!
//! Incremental LLM annotation of customer-interaction threads. Each run
//! selects work not yet annotated under the current contract version, asks the
//! oracle for a judgment per item, validates it and appends the batch.

pub mod config;
pub mod error;
pub mod models;
pub mod oracle;
pub mod pipeline;
pub mod prompt;
pub mod selector;
pub mod store;
pub mod tasks;
pub mod validate;
pub mod writer;

pub use crate::error::{PipelineError, WriteFailure};
pub use crate::pipeline::{Orchestrator, PipelineContext, RunReport};
