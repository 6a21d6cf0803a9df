//! Result Writer
//!
//! Appends the batch accumulated during one run in a single store operation.
//! Rows the store refuses come back as an explicit rejection list.

use crate::models::NaturalKey;
use crate::store::{AnnotationRow, AnnotationStore, Destination, RowRejection};
use tracing::{error, info};

/// Which keys reached the destination and which did not
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteReport {
    pub written: Vec<NaturalKey>,
    pub rejected: Vec<RowRejection>,
}

impl WriteReport {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

pub struct ResultWriter<'a> {
    store: &'a dyn AnnotationStore,
}

impl<'a> ResultWriter<'a> {
    pub fn new(store: &'a dyn AnnotationStore) -> Self {
        Self { store }
    }

    /// Append `rows` to `destination`.
    ///
    /// An empty batch never reaches the store. If the store call fails as a
    /// whole, every row is reported as rejected with that cause.
    pub async fn write(&self, destination: &Destination, rows: Vec<AnnotationRow>) -> WriteReport {
        if rows.is_empty() {
            return WriteReport::default();
        }

        match self.store.append(destination, &rows).await {
            Ok(outcome) => {
                info!(
                    table = destination.table(),
                    written = outcome.inserted.len(),
                    rejected = outcome.rejected.len(),
                    "Appended annotation batch"
                );
                WriteReport {
                    written: outcome.inserted,
                    rejected: outcome.rejected,
                }
            }
            Err(e) => {
                error!(table = destination.table(), rows = rows.len(), "Batch append failed: {}", e);
                let reason = e.to_string();
                WriteReport {
                    written: Vec::new(),
                    rejected: rows
                        .into_iter()
                        .enumerate()
                        .map(|(index, row)| RowRejection {
                            index,
                            key: row.key,
                            reason: reason.clone(),
                        })
                        .collect(),
                }
            }
        }
    }
}
