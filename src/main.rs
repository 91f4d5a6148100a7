//! # case-harvest CLI (`harvest`)
//!
//! The `harvest` binary drives the collection pipeline: cache
//! initialization, remote tool discovery, full and incremental
//! collection runs, cache statistics, and guarded cache clearing.
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest init` | Create the SQLite cache files and apply schemas |
//! | `harvest sources` | Show configured sources and server health |
//! | `harvest tools` | List the remote server's tools |
//! | `harvest collect <source>` | Run a collection (full or `--incremental N`) |
//! | `harvest get <source> <id>` | Fetch and cache one record by key/id |
//! | `harvest stats [source]` | Cache statistics and recent runs |
//! | `harvest clear <source> --yes` | Delete all cached rows of a source |
//!
//! Exit status: 0 on success, 2 when a run completed with per-record
//! errors (partial failure), 1 on hard failure.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use case_harvest::collector_issues::IssueCollector;
use case_harvest::collector_pages::PageCollector;
use case_harvest::config::{self, Config};
use case_harvest::issue_store::IssueStore;
use case_harvest::mcp::McpClient;
use case_harvest::models::RunSummary;
use case_harvest::page_store::PageStore;
use case_harvest::{migrate, sources, stats};

/// case-harvest CLI — collect issue-tracker and wiki content from an
/// MCP tool server into a local SQLite cache.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Collect issue-tracker and wiki content from an MCP tool server into a local cache",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the cache schemas.
    ///
    /// Creates both SQLite files and all required tables. Idempotent —
    /// running it multiple times is safe.
    Init,

    /// Show configured sources and remote server health.
    Sources,

    /// List the tools exposed by the remote server.
    Tools,

    /// Run a collection against a source (`issues` or `pages`).
    ///
    /// Without flags this is a full query-driven run using the
    /// default query; `--incremental N` bounds it to records updated
    /// in the last N hours instead.
    Collect {
        /// Source to collect: `issues` or `pages`.
        source: String,

        /// Query string (JQL for issues, CQL for pages). Overrides the
        /// default query.
        #[arg(long)]
        query: Option<String>,

        /// Maximum number of records to collect.
        #[arg(long)]
        limit: Option<usize>,

        /// Incremental run: only records updated in the last N hours.
        #[arg(long, value_name = "HOURS")]
        incremental: Option<u32>,

        /// Project key filter (issues only, ignored when --query is given).
        #[arg(long)]
        project: Option<String>,

        /// Status filter (issues only, ignored when --query is given).
        #[arg(long)]
        status: Option<String>,

        /// Space key filter (pages only; repeatable).
        #[arg(long = "space")]
        spaces: Vec<String>,
    },

    /// Fetch one record by issue key or page id and cache it.
    Get {
        /// Source: `issues` or `pages`.
        source: String,
        /// Issue key (e.g. PROJ-123) or page id.
        id: String,
    },

    /// Show cache statistics and recent collection runs.
    Stats {
        /// Source: `issues`, `pages`, or `all`.
        #[arg(default_value = "all")]
        source: String,
    },

    /// Delete all cached rows of a source. Requires `--yes`.
    Clear {
        /// Source: `issues` or `pages`.
        source: String,
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "case_harvest=info".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Cache initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Tools => {
            run_tools(&cfg).await?;
        }
        Commands::Collect {
            source,
            query,
            limit,
            incremental,
            project,
            status,
            spaces,
        } => {
            let summary = run_collect(
                &cfg,
                &source,
                query,
                limit,
                incremental,
                project,
                status,
                spaces,
            )
            .await?;
            print_summary(&source, &summary);
            if summary.is_partial() {
                std::process::exit(2);
            }
        }
        Commands::Get { source, id } => {
            run_get(&cfg, &source, &id).await?;
        }
        Commands::Stats { source } => {
            stats::run_stats(&cfg, &source).await?;
        }
        Commands::Clear { source, yes } => {
            run_clear(&cfg, &source, yes).await?;
        }
    }

    Ok(())
}

async fn run_tools(cfg: &Config) -> anyhow::Result<()> {
    let mut client = McpClient::new(&cfg.mcp)?;
    client.connect().await?;
    let tools = client.list_tools().await?;
    client.disconnect().await;

    println!("{} tool(s) on {}", tools.len(), cfg.mcp.server_url());
    for tool in &tools {
        println!("  {} — {}", tool.name, tool.description);
        for param in &tool.parameters {
            let req = if param.required { " (required)" } else { "" };
            println!("    {}: {}{}", param.name, param.param_type, req);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_collect(
    cfg: &Config,
    source: &str,
    query: Option<String>,
    limit: Option<usize>,
    incremental: Option<u32>,
    project: Option<String>,
    status: Option<String>,
    spaces: Vec<String>,
) -> anyhow::Result<RunSummary> {
    let max_results = limit.unwrap_or(cfg.collect.max_results);

    let mut client = McpClient::new(&cfg.mcp)?;
    client.connect().await?;
    // Refresh descriptors so argument validation can fail fast; a
    // listing failure is not fatal to the run.
    if let Err(e) = client.list_tools().await {
        tracing::warn!("could not list tools: {e}");
    }

    let result = match source {
        "issues" => {
            let store = IssueStore::open(&cfg.cache.issues_db).await?;
            let mut collector =
                IssueCollector::new(&mut client, &store, &cfg.tools, &cfg.collect);
            let outcome = match incremental {
                Some(hours) => collector.incremental_update(hours).await,
                None => {
                    let jql = query.or_else(|| {
                        (project.is_some() || status.is_some()).then(|| {
                            case_harvest::collector_issues::default_jql(
                                project.as_deref(),
                                status.as_deref(),
                            )
                        })
                    });
                    collector.collect_issues(jql.as_deref(), max_results).await
                }
            };
            store.close().await;
            outcome
        }
        "pages" => {
            let store = PageStore::open(&cfg.cache.pages_db).await?;
            let mut collector =
                PageCollector::new(&mut client, &store, &cfg.tools, &cfg.collect);
            let outcome = match incremental {
                Some(hours) => collector.incremental_update(hours).await,
                None => {
                    let keys = (!spaces.is_empty()).then_some(spaces);
                    collector.collect_pages(keys, max_results).await
                }
            };
            store.close().await;
            outcome
        }
        other => anyhow::bail!("Unknown source: '{}'. Available: issues, pages", other),
    };

    client.disconnect().await;
    Ok(result?)
}

async fn run_get(cfg: &Config, source: &str, id: &str) -> anyhow::Result<()> {
    let mut client = McpClient::new(&cfg.mcp)?;
    client.connect().await?;

    let outcome = match source {
        "issues" => {
            let store = IssueStore::open(&cfg.cache.issues_db).await?;
            let mut collector =
                IssueCollector::new(&mut client, &store, &cfg.tools, &cfg.collect);
            let result = collector.get_issue_details(id).await;
            store.close().await;
            result.map(|issue| {
                println!(
                    "[{}] {} ({})",
                    issue.key,
                    issue.summary,
                    issue.status.as_deref().unwrap_or("unknown")
                );
            })
        }
        "pages" => {
            let store = PageStore::open(&cfg.cache.pages_db).await?;
            let mut collector =
                PageCollector::new(&mut client, &store, &cfg.tools, &cfg.collect);
            let result = collector.get_page_details(id).await;
            store.close().await;
            result.map(|page| {
                println!(
                    "[{}] {} (space {}, v{})",
                    page.page_id,
                    page.title,
                    page.space_key,
                    page.version.unwrap_or(0)
                );
            })
        }
        other => anyhow::bail!("Unknown source: '{}'. Available: issues, pages", other),
    };

    client.disconnect().await;
    outcome?;
    Ok(())
}

async fn run_clear(cfg: &Config, source: &str, yes: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!("Refusing to clear the {} cache without --yes", source);
    }
    match source {
        "issues" => {
            let store = IssueStore::open(&cfg.cache.issues_db).await?;
            store.clear().await?;
            store.close().await;
        }
        "pages" => {
            let store = PageStore::open(&cfg.cache.pages_db).await?;
            store.clear().await?;
            store.close().await;
        }
        other => anyhow::bail!("Unknown source: '{}'. Available: issues, pages", other),
    }
    println!("{} cache cleared.", source);
    Ok(())
}

fn print_summary(source: &str, summary: &RunSummary) {
    println!("collect {}", source);
    println!("  collected: {}", summary.collected);
    println!("  errors:    {}", summary.errors);
    println!("  elapsed:   {:.1}s", summary.elapsed.as_secs_f64());
    println!("{}", if summary.is_partial() { "partial" } else { "ok" });
}
