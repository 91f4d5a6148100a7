//! SQLite store for issue-tracker records, comments, and the
//! collection audit trail.
//!
//! Upserts are idempotent per issue key: a re-collection overwrites
//! mutable fields and bumps `last_synced_at` without creating a second
//! row. A batch is one transaction — either every row in it lands or
//! none do. Comments cascade away with their owning issue.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::error::{HarvestError, HarvestResult};
use crate::migrate;
use crate::models::{CachedComment, CachedIssue, CollectionRun, RunKind, RunStatus};
use crate::{db, runs};

pub struct IssueStore {
    pool: SqlitePool,
}

/// Aggregate view over the issue cache.
#[derive(Debug, Clone)]
pub struct IssueStats {
    pub total_issues: i64,
    pub total_comments: i64,
    pub last_synced_at: Option<i64>,
    pub status_distribution: Vec<(String, i64)>,
    pub oldest_created: Option<i64>,
    pub newest_updated: Option<i64>,
}

impl IssueStore {
    /// Open the store file, applying the schema if needed.
    pub async fn open(path: &Path) -> HarvestResult<Self> {
        let pool = db::connect(path)
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        migrate::migrate_issue_store(&pool)
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Insert-or-replace a batch of issues as one atomic unit.
    /// Returns the number of rows written.
    pub async fn upsert_issues(&self, batch: &[CachedIssue]) -> HarvestResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for issue in batch {
            sqlx::query(
                r#"
                INSERT INTO issues (
                    issue_key, summary, description, status, issue_type, priority,
                    assignee, reporter, created_at, updated_at, resolved_at,
                    labels, components, raw_json, collected_at, last_synced_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(issue_key) DO UPDATE SET
                    summary = excluded.summary,
                    description = excluded.description,
                    status = excluded.status,
                    issue_type = excluded.issue_type,
                    priority = excluded.priority,
                    assignee = excluded.assignee,
                    reporter = excluded.reporter,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    resolved_at = excluded.resolved_at,
                    labels = excluded.labels,
                    components = excluded.components,
                    raw_json = excluded.raw_json,
                    last_synced_at = excluded.last_synced_at
                "#,
            )
            .bind(&issue.key)
            .bind(&issue.summary)
            .bind(&issue.description)
            .bind(&issue.status)
            .bind(&issue.issue_type)
            .bind(&issue.priority)
            .bind(&issue.assignee)
            .bind(&issue.reporter)
            .bind(issue.created_at.map(|t| t.timestamp()))
            .bind(issue.updated_at.map(|t| t.timestamp()))
            .bind(issue.resolved_at.map(|t| t.timestamp()))
            .bind(serde_json::to_string(&issue.labels)?)
            .bind(serde_json::to_string(&issue.components)?)
            .bind(&issue.raw_json)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch.len() as u64)
    }

    /// Insert-or-replace comments, keyed by the remote comment id.
    pub async fn upsert_comments(&self, batch: &[CachedComment]) -> HarvestResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for comment in batch {
            sqlx::query(
                r#"
                INSERT INTO comments (
                    remote_id, issue_key, author, body, created_at, updated_at, collected_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(remote_id) DO UPDATE SET
                    author = excluded.author,
                    body = excluded.body,
                    updated_at = excluded.updated_at,
                    collected_at = excluded.collected_at
                "#,
            )
            .bind(&comment.remote_id)
            .bind(&comment.issue_key)
            .bind(&comment.author)
            .bind(&comment.body)
            .bind(comment.created_at.map(|t| t.timestamp()))
            .bind(comment.updated_at.map(|t| t.timestamp()))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch.len() as u64)
    }

    /// Delete one issue; its comments cascade away with it.
    pub async fn delete_issue(&self, key: &str) -> HarvestResult<bool> {
        let result = sqlx::query("DELETE FROM issues WHERE issue_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All issues whose updated timestamp is at or after the cutoff,
    /// newest first. Supports incremental re-sync decisions.
    pub async fn get_since(&self, cutoff: DateTime<Utc>) -> HarvestResult<Vec<CachedIssue>> {
        let rows = sqlx::query(
            "SELECT * FROM issues WHERE updated_at >= ? ORDER BY updated_at DESC",
        )
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(issue_from_row).collect()
    }

    pub async fn get_issue(&self, key: &str) -> HarvestResult<Option<CachedIssue>> {
        let row = sqlx::query("SELECT * FROM issues WHERE issue_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(issue_from_row).transpose()
    }

    pub async fn comments_for(&self, key: &str) -> HarvestResult<Vec<CachedComment>> {
        let rows = sqlx::query(
            "SELECT * FROM comments WHERE issue_key = ? ORDER BY created_at ASC",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CachedComment {
                remote_id: row.get("remote_id"),
                issue_key: row.get("issue_key"),
                author: row.get("author"),
                body: row.get("body"),
                created_at: ts_opt(row.get("created_at")),
                updated_at: ts_opt(row.get("updated_at")),
            })
            .collect())
    }

    pub async fn stats(&self) -> HarvestResult<IssueStats> {
        let total_issues: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issues")
            .fetch_one(&self.pool)
            .await?;
        let total_comments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments")
            .fetch_one(&self.pool)
            .await?;
        let last_synced_at: Option<i64> =
            sqlx::query_scalar("SELECT MAX(last_synced_at) FROM issues")
                .fetch_one(&self.pool)
                .await?;

        let status_rows = sqlx::query(
            r#"
            SELECT COALESCE(status, 'unknown') AS status, COUNT(*) AS count
            FROM issues GROUP BY status ORDER BY count DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let status_distribution = status_rows
            .iter()
            .map(|row| (row.get::<String, _>("status"), row.get::<i64, _>("count")))
            .collect();

        let range = sqlx::query("SELECT MIN(created_at) AS oldest, MAX(updated_at) AS newest FROM issues")
            .fetch_one(&self.pool)
            .await?;

        Ok(IssueStats {
            total_issues,
            total_comments,
            last_synced_at,
            status_distribution,
            oldest_created: range.get("oldest"),
            newest_updated: range.get("newest"),
        })
    }

    /// Remove every cached issue and comment in one transaction. The
    /// audit trail is kept. Call sites must gate this behind an
    /// explicit confirmation flag.
    pub async fn clear(&self) -> HarvestResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM comments").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM issues").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn start_run(&self, kind: RunKind, query: &str) -> HarvestResult<String> {
        runs::start_run(&self.pool, "issues", kind, query).await
    }

    pub async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        collected: u64,
        errors: u64,
        error: Option<&str>,
    ) -> HarvestResult<()> {
        runs::finish_run(&self.pool, run_id, status, collected, errors, error).await
    }

    pub async fn recent_runs(&self, limit: i64) -> HarvestResult<Vec<CollectionRun>> {
        runs::recent_runs(&self.pool, limit).await
    }
}

fn issue_from_row(row: &sqlx::sqlite::SqliteRow) -> HarvestResult<CachedIssue> {
    let labels: String = row.get("labels");
    let components: String = row.get("components");

    Ok(CachedIssue {
        key: row.get("issue_key"),
        summary: row.get("summary"),
        description: row.get("description"),
        status: row.get("status"),
        issue_type: row.get("issue_type"),
        priority: row.get("priority"),
        assignee: row.get("assignee"),
        reporter: row.get("reporter"),
        created_at: ts_opt(row.get("created_at")),
        updated_at: ts_opt(row.get("updated_at")),
        resolved_at: ts_opt(row.get("resolved_at")),
        labels: serde_json::from_str(&labels)?,
        components: serde_json::from_str(&components)?,
        raw_json: row.get::<Option<String>, _>("raw_json").unwrap_or_default(),
    })
}

pub(crate) fn ts_opt(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| DateTime::from_timestamp(t, 0))
}
