//! Work Selector
//!
//! Computes the delta of items needing annotation under one contract version:
//! the candidate universe minus the keys already annotated, deduplicated,
//! ordered by natural key and truncated to the batch limit.
//!
//! The store performs the anti-join ([`AnnotationStore::pending`]); SQLite
//! does it in one query, other stores fall back to [`pending`] in memory.
//!
//! Membership is reproducible across calls with no intervening writes. A
//! concurrent run may still select the same keys; nothing here prevents it.

use crate::models::{NaturalKey, WorkItem};
use crate::store::{AnnotationStore, StoreError};
use crate::tasks::AnnotationTask;
use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;
use tracing::debug;

pub struct WorkSelector<'a> {
    store: &'a dyn AnnotationStore,
}

impl<'a> WorkSelector<'a> {
    pub fn new(store: &'a dyn AnnotationStore) -> Self {
        Self { store }
    }

    /// Up to `batch_limit` unannotated work items for `task`, ordered by natural key
    pub async fn select<T: AnnotationTask + ?Sized>(
        &self,
        task: &T,
        batch_limit: NonZeroUsize,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let selected = self
            .store
            .pending(
                task.universe(),
                &task.destination(),
                task.contract_version(),
                batch_limit,
            )
            .await?;

        debug!(
            batch_limit = batch_limit.get(),
            selected = selected.len(),
            "Computed pending work"
        );

        Ok(selected)
    }
}

/// Anti-join `candidates` against `annotated`, keep the first item per key,
/// sort by key and truncate
pub fn pending(
    candidates: Vec<WorkItem>,
    annotated: &HashSet<NaturalKey>,
    batch_limit: NonZeroUsize,
) -> Vec<WorkItem> {
    let mut by_key: BTreeMap<NaturalKey, WorkItem> = BTreeMap::new();
    for item in candidates {
        if annotated.contains(&item.key) {
            continue;
        }
        by_key.entry(item.key.clone()).or_insert(item);
    }

    by_key.into_values().take(batch_limit.get()).collect()
}
