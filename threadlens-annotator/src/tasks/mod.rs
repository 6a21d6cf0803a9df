//! Annotation tasks
//!
//! A task bundles everything that differs between the sibling pipelines:
//! - which candidate universe it draws from and how its natural key is shaped
//! - the prompt template and its closed decision taxonomy
//! - the output contract enforced on oracle payloads
//! - the destination table and how a record maps onto its columns
//!
//! The pipeline itself is shared (see [`crate::pipeline`]).

pub mod sentiment;
pub mod status_explain;

pub use sentiment::{SentimentJudgment, SentimentScore, SentimentTask};
pub use status_explain::{ActionOwner, StatusExplainTask, StatusJudgment, ThreadStatus};

use crate::models::{AnnotationRecord, Validated, WorkItem};
use crate::prompt::RenderedPrompt;
use crate::store::{AnnotationRow, CandidateUniverse, Destination};
use crate::validate::ValidationError;
use serde_json::Value;
use std::fmt;

/// Identifies the annotation task in logs and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Sentiment,
    StatusExplain,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Sentiment => write!(f, "sentiment"),
            TaskKind::StatusExplain => write!(f, "status_explain"),
        }
    }
}

/// Task-specific half of an annotation pipeline
pub trait AnnotationTask: Send + Sync {
    /// Validated task-specific classification (confidence is carried separately)
    type Judgment: Clone + fmt::Debug + Send + Sync;

    fn kind(&self) -> TaskKind;

    /// Version tag scoping both the output contract and the idempotency check
    fn contract_version(&self) -> &str;

    fn universe(&self) -> CandidateUniverse;

    fn destination(&self) -> Destination;

    fn render_prompt(&self, item: &WorkItem) -> RenderedPrompt;

    /// Enforce the output contract on an extracted payload
    fn validate(&self, payload: &Value) -> Result<Validated<Self::Judgment>, ValidationError>;

    /// Map a record onto the destination columns, in declaration order
    fn encode_row(&self, record: &AnnotationRecord<Self::Judgment>) -> AnnotationRow;

    /// Log progress every this many items
    fn progress_interval(&self) -> usize {
        10
    }
}
