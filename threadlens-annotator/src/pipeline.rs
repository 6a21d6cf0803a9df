//! Orchestrator
//!
//! One pipeline pass for one task:
//! 1. Ensure the destination exists (fail fast, before any oracle call)
//! 2. Select up to `batch_limit` pending work items
//! 3. For each item in selection order: build prompt, call the oracle (with
//!    retries), accumulate the validated record
//! 4. Write the accumulated batch once
//! 5. Report {selected, written, failed}
//!
//! # Batch policy
//! Best-effort. An item whose oracle call ends in a [`TerminalOracleFailure`]
//! is skipped and recorded in the report; the remaining items are still
//! processed and written. The skipped item stays unannotated, so the next run
//! selects it again.
//!
//! The orchestrator holds no state between runs.

use crate::error::{PipelineError, WriteFailure};
use crate::models::{AnnotationRecord, NaturalKey};
use crate::oracle::{OracleClient, TerminalOracleFailure};
use crate::selector::WorkSelector;
use crate::store::{AnnotationStore, RowRejection};
use crate::tasks::{AnnotationTask, TaskKind};
use crate::writer::ResultWriter;
use chrono::Utc;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Collaborators shared by every run, built once at startup
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn AnnotationStore>,
    pub oracle: OracleClient,
}

/// Item skipped because the oracle never produced a valid judgment
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub key: NaturalKey,
    pub cause: TerminalOracleFailure,
}

/// Outcome of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub task: TaskKind,
    pub contract_version: String,
    pub selected: usize,
    pub written: Vec<NaturalKey>,
    pub failed: Vec<ItemFailure>,
    pub rejected: Vec<RowRejection>,
}

impl RunReport {
    fn empty(run_id: Uuid, task: TaskKind, contract_version: &str) -> Self {
        Self {
            run_id,
            task,
            contract_version: contract_version.to_string(),
            selected: 0,
            written: Vec::new(),
            failed: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Rows handed to the writer: written plus rejected
    pub fn rows_attempted(&self) -> usize {
        self.written.len() + self.rejected.len()
    }
}

pub struct Orchestrator {
    ctx: PipelineContext,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Run one annotation pass of `task`
    pub async fn run<T: AnnotationTask>(
        &self,
        task: &T,
        batch_limit: NonZeroUsize,
    ) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "annotation_run",
            %run_id,
            task = %task.kind(),
            contract_version = task.contract_version()
        );

        self.run_pass(run_id, task, batch_limit).instrument(span).await
    }

    async fn run_pass<T: AnnotationTask>(
        &self,
        run_id: Uuid,
        task: &T,
        batch_limit: NonZeroUsize,
    ) -> Result<RunReport, PipelineError> {
        let store = self.ctx.store.as_ref();
        let destination = task.destination();

        store
            .ensure_destination(&destination)
            .await
            .map_err(PipelineError::Provisioning)?;

        let items = WorkSelector::new(store)
            .select(task, batch_limit)
            .await
            .map_err(PipelineError::Selection)?;

        let mut report = RunReport::empty(run_id, task.kind(), task.contract_version());
        if items.is_empty() {
            info!("No new items to annotate");
            return Ok(report);
        }
        report.selected = items.len();
        info!("Selected {} item(s) for annotation", items.len());

        // One timestamp for every record of the run
        let created_at = Utc::now();
        let model_name = self.ctx.oracle.model_name().to_string();
        let interval = task.progress_interval().max(1);
        let total = items.len();
        let mut rows = Vec::with_capacity(total);

        for (i, item) in items.iter().enumerate() {
            let prompt = task.render_prompt(item);
            for input in prompt.inputs.iter().filter(|p| p.truncated) {
                debug!(natural_key = %item.key, input = input.name, "Prompt input truncated");
            }

            match self.ctx.oracle.annotate(task, &prompt).await {
                Ok(validated) => {
                    let record = AnnotationRecord {
                        key: item.key.clone(),
                        judgment: validated.judgment,
                        confidence: validated.confidence,
                        contract_version: task.contract_version().to_string(),
                        model_name: model_name.clone(),
                        created_at,
                    };
                    rows.push(task.encode_row(&record));
                }
                Err(failure) => {
                    error!(
                        natural_key = %item.key,
                        attempts = failure.attempts,
                        "Skipping item: {}",
                        failure.last_cause
                    );
                    report.failed.push(ItemFailure {
                        key: item.key.clone(),
                        cause: failure,
                    });
                }
            }

            if (i + 1) % interval == 0 {
                info!("Processed {}/{} items...", i + 1, total);
            }
        }

        let written = ResultWriter::new(store).write(&destination, rows).await;
        report.written = written.written;
        report.rejected = written.rejected;

        info!(
            selected = report.selected,
            written = report.written.len(),
            failed = report.failed.len(),
            rejected = report.rejected.len(),
            "Inserted {} row(s) into {}",
            report.written.len(),
            destination.table()
        );

        if !report.rejected.is_empty() {
            return Err(WriteFailure {
                report: Box::new(report),
            }
            .into());
        }

        Ok(report)
    }
}

/// Provision and select without calling the oracle; returns the pending keys
pub async fn preview<T: AnnotationTask>(
    store: &dyn AnnotationStore,
    task: &T,
    batch_limit: NonZeroUsize,
) -> Result<Vec<NaturalKey>, PipelineError> {
    let span = info_span!(
        "annotation_preview",
        task = %task.kind(),
        contract_version = task.contract_version()
    );

    async {
        store
            .ensure_destination(&task.destination())
            .await
            .map_err(PipelineError::Provisioning)?;

        let items = WorkSelector::new(store)
            .select(task, batch_limit)
            .await
            .map_err(PipelineError::Selection)?;

        info!("{} item(s) pending", items.len());
        for item in &items {
            info!(natural_key = %item.key, "Pending");
        }

        Ok::<_, PipelineError>(items.into_iter().map(|i| i.key).collect())
    }
    .instrument(span)
    .await
}
