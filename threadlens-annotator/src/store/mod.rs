//! Annotation store
//!
//! Read side: the candidate universe (latest message bodies and heuristic
//! status per natural key) and the set of keys already annotated under a
//! contract version. Write side: create-if-absent destination provisioning and
//! append-only batched inserts with per-row error reporting.
//!
//! Source tables are owned upstream and only ever read here.

pub mod sqlite;

pub use sqlite::SqliteAnnotationStore;

use crate::models::{KeyShape, NaturalKey, WorkItem};
use async_trait::async_trait;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use thiserror::Error;
use threadlens_common::db::{Provisioned, SqlValue, TableSchema};

/// Which source rows a task draws its work items from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateUniverse {
    /// Latest message of every thread, keyed by (thread_id, message_id)
    LatestMessagePerThread,
    /// Threads carrying a heuristic status, with their last two messages
    ThreadsWithHeuristicStatus,
}

/// Destination table of one task
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub schema: TableSchema,
    pub key_shape: KeyShape,
}

impl Destination {
    pub fn table(&self) -> &str {
        &self.schema.name
    }
}

/// One encoded record, values aligned with the destination columns
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRow {
    pub key: NaturalKey,
    pub values: Vec<SqlValue>,
}

/// A row the store refused
#[derive(Debug, Clone, PartialEq)]
pub struct RowRejection {
    /// Position in the submitted batch
    pub index: usize,
    pub key: NaturalKey,
    pub reason: String,
}

/// Result of one append call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppendOutcome {
    pub inserted: Vec<NaturalKey>,
    pub rejected: Vec<RowRejection>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Common(#[from] threadlens_common::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed source row: {0}")]
    MalformedSource(String),
}

/// Persistence collaborator of the pipeline
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Create the destination if absent; never alters an existing table
    async fn ensure_destination(&self, destination: &Destination) -> Result<Provisioned, StoreError>;

    /// Every work item of `universe`, unfiltered and in no particular order
    async fn candidates(&self, universe: CandidateUniverse) -> Result<Vec<WorkItem>, StoreError>;

    /// Natural keys already annotated under `contract_version`
    async fn annotated_keys(
        &self,
        destination: &Destination,
        contract_version: &str,
    ) -> Result<HashSet<NaturalKey>, StoreError>;

    /// Up to `batch_limit` items of `universe` not yet annotated under
    /// `contract_version`, unique per key and ordered by natural key.
    ///
    /// The default loads both sides and anti-joins in memory; stores that can
    /// push the join and limit into a query should override it.
    async fn pending(
        &self,
        universe: CandidateUniverse,
        destination: &Destination,
        contract_version: &str,
        batch_limit: NonZeroUsize,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let candidates = self.candidates(universe).await?;
        let annotated = self.annotated_keys(destination, contract_version).await?;
        Ok(crate::selector::pending(candidates, &annotated, batch_limit))
    }

    /// Append `rows`, reporting each rejected row instead of failing the batch
    async fn append(
        &self,
        destination: &Destination,
        rows: &[AnnotationRow],
    ) -> Result<AppendOutcome, StoreError>;
}
