//! SQLite store for wiki pages and spaces.
//!
//! Same contract as the issue store, with one extra rule: the remote
//! is authoritative even when a fetched page carries a version lower
//! than the cached one (clock skew and out-of-order fetches are
//! expected under concurrent incremental updates). The write is still
//! applied, but a regression is logged so real data loss cannot pass
//! silently.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::warn;

use crate::error::{HarvestError, HarvestResult};
use crate::issue_store::ts_opt;
use crate::migrate;
use crate::models::{CachedPage, CachedSpace, CollectionRun, RunKind, RunStatus};
use crate::{db, runs};

pub struct PageStore {
    pool: SqlitePool,
}

/// Aggregate view over the page cache.
#[derive(Debug, Clone)]
pub struct PageStats {
    pub total_pages: i64,
    pub total_spaces: i64,
    pub last_synced_at: Option<i64>,
    pub space_distribution: Vec<(String, i64)>,
    pub oldest_created: Option<i64>,
    pub newest_updated: Option<i64>,
}

impl PageStore {
    pub async fn open(path: &Path) -> HarvestResult<Self> {
        let pool = db::connect(path)
            .await
            .map_err(|e| HarvestError::Storage(e.to_string()))?;
        migrate::migrate_page_store(&pool)
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

    /// Insert-or-replace a batch of pages as one atomic unit. Version
    /// regressions are written through and warned about; returns the
    /// number of rows written.
    pub async fn upsert_pages(&self, batch: &[CachedPage]) -> HarvestResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for page in batch {
            let cached_version: Option<i64> =
                sqlx::query_scalar("SELECT version FROM pages WHERE page_id = ?")
                    .bind(&page.page_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .flatten();

            if let (Some(cached), Some(incoming)) = (cached_version, page.version) {
                if incoming < cached {
                    warn!(
                        page_id = %page.page_id,
                        cached_version = cached,
                        incoming_version = incoming,
                        "page version regressed; applying remote state anyway"
                    );
                }
            }

            sqlx::query(
                r#"
                INSERT INTO pages (
                    page_id, space_key, space_name, title, body_storage, body_view,
                    body_text, version, creator, last_modifier, created_at, updated_at,
                    labels, url, parent_id, raw_json, collected_at, last_synced_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(page_id) DO UPDATE SET
                    space_key = excluded.space_key,
                    space_name = excluded.space_name,
                    title = excluded.title,
                    body_storage = excluded.body_storage,
                    body_view = excluded.body_view,
                    body_text = excluded.body_text,
                    version = excluded.version,
                    creator = excluded.creator,
                    last_modifier = excluded.last_modifier,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    labels = excluded.labels,
                    url = excluded.url,
                    parent_id = excluded.parent_id,
                    raw_json = excluded.raw_json,
                    last_synced_at = excluded.last_synced_at
                "#,
            )
            .bind(&page.page_id)
            .bind(&page.space_key)
            .bind(&page.space_name)
            .bind(&page.title)
            .bind(&page.body_storage)
            .bind(&page.body_view)
            .bind(&page.body_text)
            .bind(page.version)
            .bind(&page.creator)
            .bind(&page.last_modifier)
            .bind(page.created_at.map(|t| t.timestamp()))
            .bind(page.updated_at.map(|t| t.timestamp()))
            .bind(serde_json::to_string(&page.labels)?)
            .bind(&page.url)
            .bind(&page.parent_id)
            .bind(&page.raw_json)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch.len() as u64)
    }

    pub async fn upsert_spaces(&self, batch: &[CachedSpace]) -> HarvestResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for space in batch {
            sqlx::query(
                r#"
                INSERT INTO spaces (space_key, name, space_type, description, homepage_id, collected_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(space_key) DO UPDATE SET
                    name = excluded.name,
                    space_type = excluded.space_type,
                    description = excluded.description,
                    homepage_id = excluded.homepage_id,
                    collected_at = excluded.collected_at
                "#,
            )
            .bind(&space.space_key)
            .bind(&space.name)
            .bind(&space.space_type)
            .bind(&space.description)
            .bind(&space.homepage_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch.len() as u64)
    }

    /// All pages whose updated timestamp is at or after the cutoff,
    /// newest first.
    pub async fn get_since(&self, cutoff: DateTime<Utc>) -> HarvestResult<Vec<CachedPage>> {
        let rows =
            sqlx::query("SELECT * FROM pages WHERE updated_at >= ? ORDER BY updated_at DESC")
                .bind(cutoff.timestamp())
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(page_from_row).collect()
    }

    pub async fn get_page(&self, page_id: &str) -> HarvestResult<Option<CachedPage>> {
        let row = sqlx::query("SELECT * FROM pages WHERE page_id = ?")
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(page_from_row).transpose()
    }

    pub async fn list_cached_spaces(&self) -> HarvestResult<Vec<CachedSpace>> {
        let rows = sqlx::query("SELECT * FROM spaces ORDER BY space_key ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| CachedSpace {
                space_key: row.get("space_key"),
                name: row.get("name"),
                space_type: row.get("space_type"),
                description: row.get("description"),
                homepage_id: row.get("homepage_id"),
            })
            .collect())
    }

    pub async fn stats(&self) -> HarvestResult<PageStats> {
        let total_pages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(&self.pool)
            .await?;
        let total_spaces: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT space_key) FROM pages")
                .fetch_one(&self.pool)
                .await?;
        let last_synced_at: Option<i64> =
            sqlx::query_scalar("SELECT MAX(last_synced_at) FROM pages")
                .fetch_one(&self.pool)
                .await?;

        let space_rows = sqlx::query(
            "SELECT space_key, COUNT(*) AS count FROM pages GROUP BY space_key ORDER BY count DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        let space_distribution = space_rows
            .iter()
            .map(|row| (row.get::<String, _>("space_key"), row.get::<i64, _>("count")))
            .collect();

        let range =
            sqlx::query("SELECT MIN(created_at) AS oldest, MAX(updated_at) AS newest FROM pages")
                .fetch_one(&self.pool)
                .await?;

        Ok(PageStats {
            total_pages,
            total_spaces,
            last_synced_at,
            space_distribution,
            oldest_created: range.get("oldest"),
            newest_updated: range.get("newest"),
        })
    }

    /// Remove every cached page and space in one transaction. The
    /// audit trail is kept.
    pub async fn clear(&self) -> HarvestResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM pages").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM spaces").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn start_run(&self, kind: RunKind, query: &str) -> HarvestResult<String> {
        runs::start_run(&self.pool, "pages", kind, query).await
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

fn page_from_row(row: &sqlx::sqlite::SqliteRow) -> HarvestResult<CachedPage> {
    let labels: String = row.get("labels");

    Ok(CachedPage {
        page_id: row.get("page_id"),
        space_key: row.get("space_key"),
        space_name: row.get("space_name"),
        title: row.get("title"),
        body_storage: row.get("body_storage"),
        body_view: row.get("body_view"),
        body_text: row.get("body_text"),
        version: row.get("version"),
        creator: row.get("creator"),
        last_modifier: row.get("last_modifier"),
        created_at: ts_opt(row.get("created_at")),
        updated_at: ts_opt(row.get("updated_at")),
        labels: serde_json::from_str(&labels)?,
        url: row.get("url"),
        parent_id: row.get("parent_id"),
        raw_json: row.get::<Option<String>, _>("raw_json").unwrap_or_default(),
    })
}
