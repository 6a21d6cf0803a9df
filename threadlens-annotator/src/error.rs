//! Error types for threadlens-annotator

use crate::pipeline::RunReport;
use crate::store::StoreError;
use thiserror::Error;

/// Run-level failure of one annotation pass
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Destination unreachable or not creatable; raised before any oracle call
    #[error("Destination provisioning failed: {0}")]
    Provisioning(#[source] StoreError),

    /// Candidate universe or annotated keys could not be read
    #[error("Work selection failed: {0}")]
    Selection(#[source] StoreError),

    /// The destination refused part of the batch
    #[error(transparent)]
    Write(#[from] WriteFailure),
}

/// Partial write: the report names every key written and every row rejected
#[derive(Debug, Error)]
#[error(
    "Destination rejected {} of {} rows",
    .report.rejected.len(),
    .report.rows_attempted()
)]
pub struct WriteFailure {
    pub report: Box<RunReport>,
}
