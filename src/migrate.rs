use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Apply both store schemas. Safe to re-run.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let issues = db::connect(&config.cache.issues_db).await?;
    migrate_issue_store(&issues).await?;
    issues.close().await;

    let pages = db::connect(&config.cache.pages_db).await?;
    migrate_page_store(&pages).await?;
    pages.close().await;

    Ok(())
}

pub async fn migrate_issue_store(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS issues (
            issue_key TEXT PRIMARY KEY,
            summary TEXT NOT NULL,
            description TEXT,
            status TEXT,
            issue_type TEXT,
            priority TEXT,
            assignee TEXT,
            reporter TEXT,
            created_at INTEGER,
            updated_at INTEGER,
            resolved_at INTEGER,
            labels TEXT NOT NULL DEFAULT '[]',
            components TEXT NOT NULL DEFAULT '[]',
            raw_json TEXT,
            collected_at INTEGER NOT NULL,
            last_synced_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            remote_id TEXT NOT NULL UNIQUE,
            issue_key TEXT NOT NULL,
            author TEXT,
            body TEXT NOT NULL,
            created_at INTEGER,
            updated_at INTEGER,
            collected_at INTEGER NOT NULL,
            FOREIGN KEY (issue_key) REFERENCES issues(issue_key) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_runs_table(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_issues_updated_at ON issues(updated_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_issue_key ON comments(issue_key)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn migrate_page_store(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            page_id TEXT PRIMARY KEY,
            space_key TEXT NOT NULL,
            space_name TEXT,
            title TEXT NOT NULL,
            body_storage TEXT,
            body_view TEXT,
            body_text TEXT,
            version INTEGER,
            creator TEXT,
            last_modifier TEXT,
            created_at INTEGER,
            updated_at INTEGER,
            labels TEXT NOT NULL DEFAULT '[]',
            url TEXT,
            parent_id TEXT,
            raw_json TEXT,
            collected_at INTEGER NOT NULL,
            last_synced_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS spaces (
            space_key TEXT PRIMARY KEY,
            name TEXT,
            space_type TEXT,
            description TEXT,
            homepage_id TEXT,
            collected_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_runs_table(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_space_key ON pages(space_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_updated_at ON pages(updated_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}

/// The collection audit trail, identical in both stores.
async fn create_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collection_runs (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            kind TEXT NOT NULL,
            query TEXT NOT NULL,
            collected INTEGER NOT NULL DEFAULT 0,
            errors INTEGER NOT NULL DEFAULT 0,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            status TEXT NOT NULL,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runs_started_at ON collection_runs(started_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
