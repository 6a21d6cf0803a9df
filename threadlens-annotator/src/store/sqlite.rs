//! SQLite-backed annotation store
//!
//! Source tables (read-only):
//! - `interaction_event (thread_id, message_id, body_text, event_ts)`
//! - `thread_state (thread_id, thread_status)`
//!
//! Destination tables are declared by each task and provisioned through
//! [`SchemaManager`].

use super::{
    AnnotationRow, AnnotationStore, AppendOutcome, CandidateUniverse, Destination, RowRejection,
    StoreError,
};
use crate::models::{KeyShape, NaturalKey, WorkItem};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use threadlens_common::db::{Provisioned, SchemaIntrospector, SchemaManager};
use tracing::{debug, warn};

/// Latest message per thread; ties on `event_ts` resolved by message id
const LATEST_MESSAGE_SQL: &str = r#"
    SELECT thread_id, message_id, body_text
    FROM (
        SELECT
            thread_id,
            message_id,
            body_text,
            ROW_NUMBER() OVER (
                PARTITION BY thread_id
                ORDER BY event_ts DESC, message_id DESC
            ) AS rn
        FROM interaction_event
        WHERE thread_id IS NOT NULL AND message_id IS NOT NULL
    )
    WHERE rn = 1
"#;

/// Threads known to the heuristic classifier with their last two message bodies
const THREAD_CONTEXT_SQL: &str = r#"
    WITH thread_statuses AS (
        SELECT thread_id, MAX(thread_status) AS thread_status
        FROM thread_state
        WHERE thread_id IS NOT NULL
        GROUP BY thread_id
    ),
    ranked AS (
        SELECT
            ie.thread_id,
            ie.body_text,
            ROW_NUMBER() OVER (
                PARTITION BY ie.thread_id
                ORDER BY ie.event_ts DESC, ie.message_id DESC
            ) AS rn
        FROM interaction_event ie
        INNER JOIN thread_statuses ts ON ts.thread_id = ie.thread_id
    )
    SELECT
        ts.thread_id,
        ts.thread_status,
        MAX(CASE WHEN r.rn = 1 THEN r.body_text END) AS last_message_body,
        MAX(CASE WHEN r.rn = 2 THEN r.body_text END) AS previous_message_body
    FROM thread_statuses ts
    INNER JOIN ranked r ON r.thread_id = ts.thread_id AND r.rn <= 2
    GROUP BY ts.thread_id, ts.thread_status
"#;

pub struct SqliteAnnotationStore {
    pool: SqlitePool,
}

impl SqliteAnnotationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn required_text(row: &SqliteRow, column: &str) -> Result<String, StoreError> {
    row.try_get::<Option<String>, _>(column)?
        .ok_or_else(|| StoreError::MalformedSource(format!("NULL {}", column)))
}

fn latest_message_item(row: &SqliteRow) -> Result<WorkItem, StoreError> {
    let key = NaturalKey::message(required_text(row, "thread_id")?, required_text(row, "message_id")?);
    let body: Option<String> = row.try_get("body_text")?;
    Ok(WorkItem::message(key, body.unwrap_or_default()))
}

type DecodeItem = fn(&SqliteRow) -> Result<WorkItem, StoreError>;

/// Candidate query, row decoder and natural-key ordering of a universe
fn universe_query(universe: CandidateUniverse) -> (&'static str, DecodeItem, &'static str) {
    match universe {
        CandidateUniverse::LatestMessagePerThread => {
            (LATEST_MESSAGE_SQL, latest_message_item, "c.thread_id, c.message_id")
        }
        CandidateUniverse::ThreadsWithHeuristicStatus => {
            (THREAD_CONTEXT_SQL, thread_context_item, "c.thread_id")
        }
    }
}

fn thread_context_item(row: &SqliteRow) -> Result<WorkItem, StoreError> {
    Ok(WorkItem {
        key: NaturalKey::thread(required_text(row, "thread_id")?),
        last_message_body: row
            .try_get::<Option<String>, _>("last_message_body")?
            .unwrap_or_default(),
        previous_message_body: row.try_get("previous_message_body")?,
        heuristic_status: row.try_get("thread_status")?,
    })
}

#[async_trait]
impl AnnotationStore for SqliteAnnotationStore {
    async fn ensure_destination(&self, destination: &Destination) -> Result<Provisioned, StoreError> {
        Ok(SchemaManager::ensure_table(&self.pool, &destination.schema).await?)
    }

    async fn candidates(&self, universe: CandidateUniverse) -> Result<Vec<WorkItem>, StoreError> {
        let (sql, decode, _) = universe_query(universe);

        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let items = rows.iter().map(decode).collect::<Result<Vec<_>, _>>()?;

        debug!(?universe, candidates = items.len(), "Loaded candidate universe");
        Ok(items)
    }

    async fn annotated_keys(
        &self,
        destination: &Destination,
        contract_version: &str,
    ) -> Result<HashSet<NaturalKey>, StoreError> {
        destination.schema.validate()?;

        // Nothing can be annotated in a table that was never provisioned
        if !SchemaIntrospector::table_exists(&self.pool, destination.table()).await? {
            return Ok(HashSet::new());
        }

        let columns = match destination.key_shape {
            KeyShape::Thread => "thread_id",
            KeyShape::Message => "thread_id, message_id",
        };
        let sql = format!(
            "SELECT DISTINCT {} FROM {} WHERE contract_version = ?",
            columns,
            destination.table()
        );

        let rows = sqlx::query(&sql)
            .bind(contract_version)
            .fetch_all(&self.pool)
            .await?;

        let mut keys = HashSet::with_capacity(rows.len());
        for row in &rows {
            let thread_id: Option<String> = row.try_get("thread_id")?;
            let Some(thread_id) = thread_id else {
                continue;
            };
            let key = match destination.key_shape {
                KeyShape::Thread => NaturalKey::thread(thread_id),
                KeyShape::Message => match row.try_get::<Option<String>, _>("message_id")? {
                    Some(message_id) => NaturalKey::message(thread_id, message_id),
                    None => continue,
                },
            };
            keys.insert(key);
        }

        Ok(keys)
    }

    async fn pending(
        &self,
        universe: CandidateUniverse,
        destination: &Destination,
        contract_version: &str,
        batch_limit: NonZeroUsize,
    ) -> Result<Vec<WorkItem>, StoreError> {
        destination.schema.validate()?;

        let (candidates_sql, decode, order_by) = universe_query(universe);
        let limit = i64::try_from(batch_limit.get()).unwrap_or(i64::MAX);

        // An unprovisioned destination holds no annotations to exclude
        let provisioned = SchemaIntrospector::table_exists(&self.pool, destination.table()).await?;

        let sql = if provisioned {
            let key_match = match destination.key_shape {
                KeyShape::Thread => "a.thread_id = c.thread_id",
                KeyShape::Message => "a.thread_id = c.thread_id AND a.message_id = c.message_id",
            };
            format!(
                "SELECT c.* FROM ({}) c WHERE NOT EXISTS (SELECT 1 FROM {} a WHERE {} AND a.contract_version = ?) ORDER BY {} LIMIT ?",
                candidates_sql,
                destination.table(),
                key_match,
                order_by
            )
        } else {
            format!("SELECT c.* FROM ({}) c ORDER BY {} LIMIT ?", candidates_sql, order_by)
        };

        let mut query = sqlx::query(&sql);
        if provisioned {
            query = query.bind(contract_version);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;
        let items = rows.iter().map(decode).collect::<Result<Vec<_>, _>>()?;

        debug!(?universe, table = destination.table(), pending = items.len(), "Selected pending items");
        Ok(items)
    }

    async fn append(
        &self,
        destination: &Destination,
        rows: &[AnnotationRow],
    ) -> Result<AppendOutcome, StoreError> {
        destination.schema.validate()?;

        let sql = destination.schema.insert_sql();
        let expected_columns = destination.schema.columns.len();
        let mut outcome = AppendOutcome::default();

        // A failed statement does not abort the SQLite transaction, so the
        // remaining rows still commit together
        let mut tx = self.pool.begin().await?;

        for (index, row) in rows.iter().enumerate() {
            if row.values.len() != expected_columns {
                outcome.rejected.push(RowRejection {
                    index,
                    key: row.key.clone(),
                    reason: format!(
                        "expected {} values, got {}",
                        expected_columns,
                        row.values.len()
                    ),
                });
                continue;
            }

            let mut query = sqlx::query(&sql);
            for value in &row.values {
                query = value.bind_to(query);
            }

            match query.execute(&mut *tx).await {
                Ok(_) => outcome.inserted.push(row.key.clone()),
                Err(e) => {
                    warn!(table = destination.table(), natural_key = %row.key, "Row rejected: {}", e);
                    outcome.rejected.push(RowRejection {
                        index,
                        key: row.key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tx.commit().await?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{AnnotationTask, SentimentTask, StatusExplainTask};
    use threadlens_common::db::{init_memory_database, SqlValue};

    async fn store_with_sources() -> SqliteAnnotationStore {
        let pool = init_memory_database().await.unwrap();
        sqlx::query(
            "CREATE TABLE interaction_event (thread_id TEXT, message_id TEXT, body_text TEXT, event_ts TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("CREATE TABLE thread_state (thread_id TEXT, thread_status TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        SqliteAnnotationStore::new(pool)
    }

    async fn event(store: &SqliteAnnotationStore, thread: &str, message: &str, body: Option<&str>, ts: &str) {
        sqlx::query("INSERT INTO interaction_event VALUES (?, ?, ?, ?)")
            .bind(thread)
            .bind(message)
            .bind(body)
            .bind(ts)
            .execute(store.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_latest_message_per_thread() {
        let store = store_with_sources().await;
        event(&store, "t1", "m1", Some("first"), "2024-01-01T10:00:00Z").await;
        event(&store, "t1", "m2", Some("second"), "2024-01-01T11:00:00Z").await;
        event(&store, "t2", "m3", None, "2024-01-01T09:00:00Z").await;

        let mut items = store
            .candidates(CandidateUniverse::LatestMessagePerThread)
            .await
            .unwrap();
        items.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, NaturalKey::message("t1", "m2"));
        assert_eq!(items[0].last_message_body, "second");
        assert_eq!(items[1].key, NaturalKey::message("t2", "m3"));
        assert_eq!(items[1].last_message_body, "");
    }

    #[tokio::test]
    async fn test_thread_context_takes_last_two_messages() {
        let store = store_with_sources().await;
        event(&store, "t1", "m1", Some("one"), "2024-01-01T10:00:00Z").await;
        event(&store, "t1", "m2", Some("two"), "2024-01-01T11:00:00Z").await;
        event(&store, "t1", "m3", Some("three"), "2024-01-01T12:00:00Z").await;
        event(&store, "t2", "m4", Some("only"), "2024-01-01T12:00:00Z").await;
        event(&store, "t3", "m5", Some("no status row"), "2024-01-01T12:00:00Z").await;
        sqlx::query("INSERT INTO thread_state VALUES ('t1', 'closed'), ('t2', NULL)")
            .execute(store.pool())
            .await
            .unwrap();

        let mut items = store
            .candidates(CandidateUniverse::ThreadsWithHeuristicStatus)
            .await
            .unwrap();
        items.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, NaturalKey::thread("t1"));
        assert_eq!(items[0].last_message_body, "three");
        assert_eq!(items[0].previous_message_body.as_deref(), Some("two"));
        assert_eq!(items[0].heuristic_status.as_deref(), Some("closed"));
        assert_eq!(items[1].key, NaturalKey::thread("t2"));
        assert_eq!(items[1].previous_message_body, None);
        assert_eq!(items[1].heuristic_status, None);
    }

    #[tokio::test]
    async fn test_annotated_keys_empty_before_provisioning() {
        let store = store_with_sources().await;
        let destination = SentimentTask::default().destination();

        let keys = store.annotated_keys(&destination, "sentiment_v0.2").await.unwrap();
        assert!(keys.is_empty());
    }

    fn sentiment_row(thread: &str, message: &str, score: i64, confidence: f64, version: &str) -> AnnotationRow {
        AnnotationRow {
            key: NaturalKey::message(thread, message),
            values: vec![
                SqlValue::from(message),
                SqlValue::from(thread),
                SqlValue::Integer(score),
                SqlValue::Real(confidence),
                SqlValue::from(version),
                SqlValue::from("test-model"),
                SqlValue::from("2024-01-01T00:00:00+00:00"),
            ],
        }
    }

    #[tokio::test]
    async fn test_append_reports_rejected_rows_and_keeps_the_rest() {
        let store = store_with_sources().await;
        let destination = SentimentTask::default().destination();
        store.ensure_destination(&destination).await.unwrap();

        let rows = vec![
            sentiment_row("t1", "m1", 2, 0.8, "v1"),
            sentiment_row("t2", "m2", 9, 0.8, "v1"),
            sentiment_row("t3", "m3", 4, 0.4, "v1"),
        ];
        let outcome = store.append(&destination, &rows).await.unwrap();

        assert_eq!(
            outcome.inserted,
            vec![NaturalKey::message("t1", "m1"), NaturalKey::message("t3", "m3")]
        );
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].index, 1);
        assert_eq!(outcome.rejected[0].key, NaturalKey::message("t2", "m2"));

        let keys = store.annotated_keys(&destination, "v1").await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&NaturalKey::message("t3", "m3")));
        assert!(store.annotated_keys(&destination, "v2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_rejects_misaligned_row() {
        let store = store_with_sources().await;
        let destination = StatusExplainTask::default().destination();
        store.ensure_destination(&destination).await.unwrap();

        let row = AnnotationRow {
            key: NaturalKey::thread("t1"),
            values: vec![SqlValue::from("t1")],
        };
        let outcome = store.append(&destination, &[row]).await.unwrap();

        assert!(outcome.inserted.is_empty());
        assert_eq!(outcome.rejected[0].reason, "expected 8 values, got 1");
    }

    #[tokio::test]
    async fn test_sql_pending_matches_in_memory_anti_join() {
        let store = store_with_sources().await;
        for (thread, message, ts) in [
            ("t4", "m7", "2024-01-01T10:00:00Z"),
            ("t1", "m1", "2024-01-01T10:00:00Z"),
            ("t1", "m2", "2024-01-01T11:00:00Z"),
            ("t3", "m5", "2024-01-01T09:00:00Z"),
            ("t2", "m3", "2024-01-01T08:00:00Z"),
        ] {
            event(&store, thread, message, Some("body"), ts).await;
        }
        let destination = SentimentTask::default().destination();
        let universe = CandidateUniverse::LatestMessagePerThread;
        let limit = NonZeroUsize::new(2).unwrap();

        // Destination not provisioned yet
        let before = store.pending(universe, &destination, "v1", limit).await.unwrap();
        let keys: Vec<_> = before.iter().map(|i| i.key.clone()).collect();
        assert_eq!(keys, vec![NaturalKey::message("t1", "m2"), NaturalKey::message("t2", "m3")]);

        store.ensure_destination(&destination).await.unwrap();
        store
            .append(&destination, &[sentiment_row("t1", "m2", 3, 0.5, "v1"), sentiment_row("t3", "m5", 3, 0.5, "v0")])
            .await
            .unwrap();

        let in_sql = store.pending(universe, &destination, "v1", limit).await.unwrap();
        let in_memory = crate::selector::pending(
            store.candidates(universe).await.unwrap(),
            &store.annotated_keys(&destination, "v1").await.unwrap(),
            limit,
        );

        assert_eq!(in_sql, in_memory);
        let keys: Vec<_> = in_sql.iter().map(|i| i.key.clone()).collect();
        assert_eq!(keys, vec![NaturalKey::message("t2", "m3"), NaturalKey::message("t3", "m5")]);
    }

    #[tokio::test]
    async fn test_sql_pending_for_thread_keys() {
        let store = store_with_sources().await;
        event(&store, "t1", "m1", Some("one"), "2024-01-01T10:00:00Z").await;
        event(&store, "t1", "m2", Some("two"), "2024-01-01T11:00:00Z").await;
        event(&store, "t2", "m3", Some("three"), "2024-01-01T12:00:00Z").await;
        sqlx::query("INSERT INTO thread_state VALUES ('t1', 'open'), ('t2', 'closed')")
            .execute(store.pool())
            .await
            .unwrap();

        let task = StatusExplainTask::default();
        let destination = task.destination();
        store.ensure_destination(&destination).await.unwrap();
        sqlx::query(
            "INSERT INTO thread_state_explain VALUES ('t1', 'open', 'org', 'Waiting on us.', 0.8, ?, 'm', '2024-01-01T00:00:00+00:00')",
        )
        .bind(task.contract_version())
        .execute(store.pool())
        .await
        .unwrap();

        let items = store
            .pending(
                CandidateUniverse::ThreadsWithHeuristicStatus,
                &destination,
                task.contract_version(),
                NonZeroUsize::new(10).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, NaturalKey::thread("t2"));
        assert_eq!(items[0].last_message_body, "three");
    }

    #[tokio::test]
    async fn test_ensure_destination_is_idempotent() {
        let store = store_with_sources().await;
        let destination = StatusExplainTask::default().destination();

        assert_eq!(store.ensure_destination(&destination).await.unwrap(), Provisioned::Created);
        assert_eq!(
            store.ensure_destination(&destination).await.unwrap(),
            Provisioned::AlreadyPresent { drift: vec![] }
        );
    }
}
