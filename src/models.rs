//! Core data models used throughout case-harvest.
//!
//! These types represent the remote tool surface, the normalized
//! records the collectors write to the cache, and the bookkeeping
//! rows that make up the collection audit trail.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// One declared parameter of a remote tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: String,
    pub description: String,
    pub required: bool,
}

/// A remote tool descriptor as reported by `tools/list`. Immutable
/// once listed; refreshed on every listing call.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

/// Result of a transport health probe. Never raised as an error —
/// failures are folded into `healthy = false`.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub server_url: String,
    pub connected: bool,
    pub response_time_ms: f64,
    pub error: Option<String>,
}

/// Normalized issue-tracker record, keyed by the remote issue key.
#[derive(Debug, Clone)]
pub struct CachedIssue {
    pub key: String,
    pub summary: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub issue_type: Option<String>,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub reporter: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
    pub components: Vec<String>,
    /// Full original payload, kept opaque for forward compatibility.
    pub raw_json: String,
}

/// A comment under a cached issue. Deleting the issue cascades here.
#[derive(Debug, Clone)]
pub struct CachedComment {
    pub remote_id: String,
    pub issue_key: String,
    pub author: Option<String>,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Normalized wiki page, keyed by the remote page id.
#[derive(Debug, Clone)]
pub struct CachedPage {
    pub page_id: String,
    pub space_key: String,
    pub space_name: Option<String>,
    pub title: String,
    /// Original storage-format markup, unmodified.
    pub body_storage: Option<String>,
    /// Rendered markup, unmodified.
    pub body_view: Option<String>,
    /// Sanitized plain text extracted from the markup.
    pub body_text: Option<String>,
    pub version: Option<i64>,
    pub creator: Option<String>,
    pub last_modifier: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
    pub url: Option<String>,
    /// Parent page id; nullable and not enforced as a foreign key
    /// since parents may be uncollected.
    pub parent_id: Option<String>,
    pub raw_json: String,
}

/// A wiki space.
#[derive(Debug, Clone)]
pub struct CachedSpace {
    pub space_key: String,
    pub name: Option<String>,
    pub space_type: Option<String>,
    pub description: Option<String>,
    pub homepage_id: Option<String>,
}

/// Full query-driven run vs. time-window-bounded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Full,
    Incremental,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Full => "full",
            RunKind::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// One audit-trail row per collection invocation.
#[derive(Debug, Clone)]
pub struct CollectionRun {
    pub id: String,
    pub source: String,
    pub kind: String,
    pub query: String,
    pub collected: i64,
    pub errors: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: String,
    pub error: Option<String>,
}

/// What a collector hands back to its caller.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub collected: u64,
    pub errors: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Partial failure: some records collected, some rejected.
    pub fn is_partial(&self) -> bool {
        self.errors > 0
    }
}
