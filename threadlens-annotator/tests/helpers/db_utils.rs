//! Database Test Utilities
//!
//! Temporary databases with the upstream source tables in place

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use sqlx::SqlitePool;
use tempfile::TempDir;
use threadlens_annotator::models::SourceEvent;
use threadlens_common::db::init_database;

/// Create a temporary database holding empty `interaction_event` and `thread_state` tables
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let pool = init_database(&temp_dir.path().join("threadlens_test.db")).await?;

    sqlx::query(
        r#"
        CREATE TABLE interaction_event (
            thread_id TEXT,
            message_id TEXT,
            body_text TEXT,
            event_ts TEXT
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE TABLE thread_state (thread_id TEXT, thread_status TEXT)")
        .execute(&pool)
        .await?;

    Ok((temp_dir, pool))
}

/// Minutes after a fixed epoch, for readable event ordering
pub fn at_minute(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

pub fn event(thread_id: &str, message_id: &str, body: &str, minute: i64) -> SourceEvent {
    SourceEvent {
        thread_id: thread_id.to_string(),
        message_id: message_id.to_string(),
        body_text: Some(body.to_string()),
        event_ts: at_minute(minute),
    }
}

pub async fn seed_event(pool: &SqlitePool, event: &SourceEvent) -> Result<()> {
    sqlx::query("INSERT INTO interaction_event (thread_id, message_id, body_text, event_ts) VALUES (?, ?, ?, ?)")
        .bind(&event.thread_id)
        .bind(&event.message_id)
        .bind(&event.body_text)
        .bind(event.event_ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn seed_thread_status(pool: &SqlitePool, thread_id: &str, status: Option<&str>) -> Result<()> {
    sqlx::query("INSERT INTO thread_state (thread_id, thread_status) VALUES (?, ?)")
        .bind(thread_id)
        .bind(status)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn table_row_count(pool: &SqlitePool, table: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(count)
}
