use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub mcp: McpConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub tools: ToolNames,
}

/// Connection settings for the remote MCP tool server. Held as an
/// explicit struct injected into the client constructor so tests can
/// point at arbitrary endpoints without touching the environment.
#[derive(Debug, Deserialize, Clone)]
pub struct McpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Full URL override; when set, scheme/host/port/base_path are ignored.
    #[serde(default)]
    pub server_url: Option<String>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            scheme: default_scheme(),
            base_path: default_base_path(),
            timeout_secs: default_timeout_secs(),
            server_url: None,
        }
    }
}

impl McpConfig {
    pub fn server_url(&self) -> String {
        match &self.server_url {
            Some(url) => url.clone(),
            None => format!(
                "{}://{}:{}{}",
                self.scheme, self.host, self.port, self.base_path
            ),
        }
    }

    /// Point this config at a full URL (used by tests and `--server`).
    pub fn with_url(url: &str) -> Self {
        Self {
            server_url: Some(url.to_string()),
            ..Self::default()
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    9000
}
fn default_scheme() -> String {
    "http".to_string()
}
fn default_base_path() -> String {
    "/mcp".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// SQLite file for the issue-tracker store.
    pub issues_db: PathBuf,
    /// SQLite file for the wiki store.
    pub pages_db: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectConfig {
    /// Records per upsert transaction. Pacing only, not a correctness
    /// boundary.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Page size for remote issue-search pagination.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_results: default_max_results(),
            page_size: default_page_size(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_max_results() -> usize {
    1000
}
fn default_page_size() -> usize {
    100
}

/// Remote tool names, overridable for servers that expose the same
/// operations under different names.
#[derive(Debug, Deserialize, Clone)]
pub struct ToolNames {
    #[serde(default = "default_issue_search")]
    pub issue_search: String,
    #[serde(default = "default_issue_get")]
    pub issue_get: String,
    #[serde(default = "default_page_search")]
    pub page_search: String,
    #[serde(default = "default_page_get")]
    pub page_get: String,
    #[serde(default = "default_space_list")]
    pub space_list: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            issue_search: default_issue_search(),
            issue_get: default_issue_get(),
            page_search: default_page_search(),
            page_get: default_page_get(),
            space_list: default_space_list(),
        }
    }
}

fn default_issue_search() -> String {
    "jira_search_issues".to_string()
}
fn default_issue_get() -> String {
    "jira_get_issue".to_string()
}
fn default_page_search() -> String {
    "confluence_search".to_string()
}
fn default_page_get() -> String {
    "confluence_get_page".to_string()
}
fn default_space_list() -> String {
    "confluence_list_spaces".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.collect.batch_size == 0 {
        anyhow::bail!("collect.batch_size must be > 0");
    }
    if config.collect.page_size == 0 {
        anyhow::bail!("collect.page_size must be > 0");
    }
    if config.mcp.timeout_secs == 0 {
        anyhow::bail!("mcp.timeout_secs must be > 0");
    }
    if config.cache.issues_db == config.cache.pages_db {
        anyhow::bail!("cache.issues_db and cache.pages_db must be different files");
    }

    Ok(config)
}
