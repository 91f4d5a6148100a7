//! Collection-run audit trail, shared by both stores.
//!
//! One append-only row per collection invocation. Rows transition
//! running → completed|failed and are never rewritten after that.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::HarvestResult;
use crate::models::{CollectionRun, RunKind, RunStatus};

pub async fn start_run(
    pool: &SqlitePool,
    source: &str,
    kind: RunKind,
    query: &str,
) -> HarvestResult<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO collection_runs (id, source, kind, query, started_at, status)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(source)
    .bind(kind.as_str())
    .bind(query)
    .bind(Utc::now().timestamp())
    .bind(RunStatus::Running.as_str())
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn finish_run(
    pool: &SqlitePool,
    run_id: &str,
    status: RunStatus,
    collected: u64,
    errors: u64,
    error: Option<&str>,
) -> HarvestResult<()> {
    sqlx::query(
        r#"
        UPDATE collection_runs
        SET status = ?, collected = ?, errors = ?, finished_at = ?, error = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(collected as i64)
    .bind(errors as i64)
    .bind(Utc::now().timestamp())
    .bind(error)
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn recent_runs(pool: &SqlitePool, limit: i64) -> HarvestResult<Vec<CollectionRun>> {
    let rows = sqlx::query(
        "SELECT * FROM collection_runs ORDER BY started_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| CollectionRun {
            id: row.get("id"),
            source: row.get("source"),
            kind: row.get("kind"),
            query: row.get("query"),
            collected: row.get("collected"),
            errors: row.get("errors"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            status: row.get("status"),
            error: row.get("error"),
        })
        .collect())
}
