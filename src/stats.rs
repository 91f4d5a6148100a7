//! Cache statistics overview.
//!
//! Provides a quick summary of what's cached: record counts, status
//! and space distributions, date ranges, and recent collection runs.
//! Used by `harvest stats` to give confidence that syncs are working
//! as expected.

use anyhow::Result;

use crate::config::Config;
use crate::issue_store::IssueStore;
use crate::page_store::PageStore;

pub async fn run_stats(config: &Config, source: &str) -> Result<()> {
    match source {
        "issues" => print_issue_stats(config).await?,
        "pages" => print_page_stats(config).await?,
        "all" => {
            print_issue_stats(config).await?;
            println!();
            print_page_stats(config).await?;
        }
        other => anyhow::bail!("Unknown source: '{}'. Available: issues, pages, all", other),
    }
    Ok(())
}

async fn print_issue_stats(config: &Config) -> Result<()> {
    let store = IssueStore::open(&config.cache.issues_db).await?;
    let stats = store.stats().await?;

    println!("Issue cache — {}", config.cache.issues_db.display());
    println!("  Issues:      {}", stats.total_issues);
    println!("  Comments:    {}", stats.total_comments);
    println!("  Last sync:   {}", sync_display(stats.last_synced_at));
    print_range(stats.oldest_created, stats.newest_updated);

    if !stats.status_distribution.is_empty() {
        println!("  By status:");
        for (status, count) in &stats.status_distribution {
            println!("    {:<24} {:>6}", status, count);
        }
    }

    print_runs(&store.recent_runs(5).await?);
    store.close().await;
    Ok(())
}

async fn print_page_stats(config: &Config) -> Result<()> {
    let store = PageStore::open(&config.cache.pages_db).await?;
    let stats = store.stats().await?;

    println!("Page cache — {}", config.cache.pages_db.display());
    println!("  Pages:       {}", stats.total_pages);
    println!("  Spaces:      {}", stats.total_spaces);
    println!("  Last sync:   {}", sync_display(stats.last_synced_at));
    print_range(stats.oldest_created, stats.newest_updated);

    if !stats.space_distribution.is_empty() {
        println!("  By space:");
        for (space, count) in &stats.space_distribution {
            println!("    {:<24} {:>6}", space, count);
        }
    }

    print_runs(&store.recent_runs(5).await?);
    store.close().await;
    Ok(())
}

fn print_range(oldest: Option<i64>, newest: Option<i64>) {
    if oldest.is_some() || newest.is_some() {
        println!(
            "  Date range:  {} .. {}",
            oldest.map(format_ts_iso).unwrap_or_else(|| "-".to_string()),
            newest.map(format_ts_iso).unwrap_or_else(|| "-".to_string()),
        );
    }
}

fn print_runs(runs: &[crate::models::CollectionRun]) {
    if runs.is_empty() {
        return;
    }
    println!("  Recent runs:");
    println!(
        "    {:<12} {:<11} {:>9} {:>7}   {}",
        "KIND", "STATUS", "COLLECTED", "ERRORS", "STARTED"
    );
    for run in runs {
        println!(
            "    {:<12} {:<11} {:>9} {:>7}   {}",
            run.kind,
            run.status,
            run.collected,
            run.errors,
            format_ts_relative(run.started_at)
        );
    }
}

fn sync_display(ts: Option<i64>) -> String {
    match ts {
        Some(ts) => format_ts_relative(ts),
        None => "never".to_string(),
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
