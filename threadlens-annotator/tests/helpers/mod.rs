//! Test Helper Utilities
//!
//! Shared utilities for testing threadlens-annotator

#![allow(dead_code)]

pub mod db_utils;
pub mod stub_oracle;

pub use db_utils::{create_test_db, seed_event, seed_thread_status, table_row_count};
pub use stub_oracle::KeyedOracle;

use std::sync::Arc;
use threadlens_annotator::oracle::{OracleClient, RecordingSleeper, RetryPolicy};
use threadlens_annotator::pipeline::{Orchestrator, PipelineContext};
use threadlens_annotator::store::SqliteAnnotationStore;

/// Route pipeline logs to the test harness; safe to call from every test
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("threadlens_annotator=debug")
        .with_test_writer()
        .try_init();
}

/// Orchestrator over `pool` with a stub oracle and a sleeper that never waits
pub fn create_test_orchestrator(
    pool: sqlx::SqlitePool,
    oracle: Arc<KeyedOracle>,
) -> (Orchestrator, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::new());
    let orchestrator = Orchestrator::new(PipelineContext {
        store: Arc::new(SqliteAnnotationStore::new(pool)),
        oracle: OracleClient::new(oracle, RetryPolicy::default(), sleeper.clone()),
    });
    (orchestrator, sleeper)
}
