//! Issue collection orchestration.
//!
//! Coordinates the flow: remote issue-search tool → normalization →
//! batched cache upserts → run summary. Per-record normalization
//! failures are counted and logged, never fatal — remote data quality
//! is not guaranteed. A storage failure drops that one batch (its
//! records join the error count) and collection continues; only
//! transport failures abort the run.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{CollectConfig, ToolNames};
use crate::error::{HarvestError, HarvestResult};
use crate::issue_store::IssueStore;
use crate::mcp::McpClient;
use crate::models::{CachedComment, CachedIssue, RunKind, RunStatus, RunSummary};

pub struct IssueCollector<'a> {
    client: &'a mut McpClient,
    store: &'a IssueStore,
    tools: ToolNames,
    batch_size: usize,
    page_size: usize,
    default_max_results: usize,
}

impl<'a> IssueCollector<'a> {
    pub fn new(
        client: &'a mut McpClient,
        store: &'a IssueStore,
        tools: &ToolNames,
        collect: &CollectConfig,
    ) -> Self {
        Self {
            client,
            store,
            tools: tools.clone(),
            batch_size: collect.batch_size,
            page_size: collect.page_size,
            default_max_results: collect.max_results,
        }
    }

    /// Full query-driven collection. Paginates the remote search until
    /// `max_results` or remote exhaustion, then batch-upserts.
    pub async fn collect_issues(
        &mut self,
        query: Option<&str>,
        max_results: usize,
    ) -> HarvestResult<RunSummary> {
        let jql = query
            .map(str::to_string)
            .unwrap_or_else(|| default_jql(None, None));
        self.run_collection(&jql, max_results, RunKind::Full).await
    }

    /// Time-window collection: everything updated in the last
    /// `since_hours` hours. Same normalization and batching as a full
    /// run — this only narrows the query.
    pub async fn incremental_update(&mut self, since_hours: u32) -> HarvestResult<RunSummary> {
        let jql = format!("updated >= -{since_hours}h ORDER BY updated DESC");
        self.run_collection(&jql, self.default_max_results, RunKind::Incremental)
            .await
    }

    /// Single-record fetch + normalize + upsert.
    pub async fn get_issue_details(&mut self, key: &str) -> HarvestResult<CachedIssue> {
        let args = HashMap::from([("issueKey".to_string(), json!(key))]);
        let records = self.client.call_tool(&self.tools.issue_get, args).await?;

        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| HarvestError::NotFound(format!("issue {key}")))?;

        let (issue, comments) = normalize_issue(&record)?;
        self.store.upsert_issues(std::slice::from_ref(&issue)).await?;
        self.store.upsert_comments(&comments).await?;
        info!(key, "retrieved and cached issue");
        Ok(issue)
    }

    async fn run_collection(
        &mut self,
        jql: &str,
        max_results: usize,
        kind: RunKind,
    ) -> HarvestResult<RunSummary> {
        let start = Instant::now();
        let run_id = self.store.start_run(kind, jql).await?;
        info!(kind = kind.as_str(), jql, "starting issue collection");

        let raw = match self.fetch_pages(jql, max_results).await {
            Ok(raw) => raw,
            Err(e) => {
                let message = e.to_string();
                self.store
                    .finish_run(&run_id, RunStatus::Failed, 0, 0, Some(&message))
                    .await?;
                return Err(e);
            }
        };

        let (collected, errors) = self.save_batches(&raw).await;
        self.store
            .finish_run(&run_id, RunStatus::Completed, collected, errors, None)
            .await?;

        let summary = RunSummary {
            collected,
            errors,
            elapsed: start.elapsed(),
        };
        info!(
            collected = summary.collected,
            errors = summary.errors,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "issue collection finished"
        );
        Ok(summary)
    }

    /// Page through the remote search until the limit or exhaustion.
    async fn fetch_pages(&mut self, jql: &str, max_results: usize) -> HarvestResult<Vec<Value>> {
        let mut raw = Vec::new();
        let mut start_at = 0usize;

        loop {
            let remaining = max_results.saturating_sub(raw.len());
            if remaining == 0 {
                break;
            }
            let page_limit = remaining.min(self.page_size);

            let args = HashMap::from([
                ("jql".to_string(), json!(jql)),
                ("maxResults".to_string(), json!(page_limit)),
                ("startAt".to_string(), json!(start_at)),
            ]);
            let page = self.client.call_tool(&self.tools.issue_search, args).await?;
            let fetched = page.len();
            raw.extend(page);

            // Short page means the remote is exhausted.
            if fetched < page_limit {
                break;
            }
            start_at += fetched;
        }

        // The remote may oversend past maxResults; the limit is ours
        // to enforce.
        raw.truncate(max_results);
        Ok(raw)
    }

    /// Normalize and upsert in batches. Returns (collected, errors).
    async fn save_batches(&mut self, raw: &[Value]) -> (u64, u64) {
        let mut collected = 0u64;
        let mut errors = 0u64;

        for chunk in raw.chunks(self.batch_size) {
            let mut issues = Vec::with_capacity(chunk.len());
            let mut comments = Vec::new();
            for record in chunk {
                match normalize_issue(record) {
                    Ok((issue, mut issue_comments)) => {
                        issues.push(issue);
                        comments.append(&mut issue_comments);
                    }
                    Err(e) => {
                        warn!("skipping issue record: {e}");
                        errors += 1;
                    }
                }
            }

            match self.store.upsert_issues(&issues).await {
                Ok(written) => {
                    collected += written;
                    // Lost comments do not reject the issues they
                    // belong to; `errors` counts records only.
                    if let Err(e) = self.store.upsert_comments(&comments).await {
                        warn!(batch_len = comments.len(), "comment batch dropped: {e}");
                    }
                }
                Err(e) => {
                    // Batch rolled back; count its records and move on.
                    warn!(batch_len = issues.len(), "issue batch dropped: {e}");
                    errors += issues.len() as u64;
                }
            }
        }

        (collected, errors)
    }
}

/// Default query: resolved work from the last 180 days, newest first.
pub fn default_jql(project: Option<&str>, status: Option<&str>) -> String {
    let mut conditions = Vec::new();
    if let Some(project) = project {
        conditions.push(format!("project = {project}"));
    }
    match status {
        Some(status) => conditions.push(format!("status = '{status}'")),
        None => {
            conditions.push("status IN (Done, Resolved, Closed)".to_string());
            conditions.push("resolved >= -180d".to_string());
        }
    }
    if conditions.is_empty() {
        "ORDER BY updated DESC".to_string()
    } else {
        format!("{} ORDER BY updated DESC", conditions.join(" AND "))
    }
}

/// Normalize a raw remote record into a cached issue plus any inline
/// comments. `key` and `summary` are required; everything else
/// defaults to absent.
pub fn normalize_issue(record: &Value) -> HarvestResult<(CachedIssue, Vec<CachedComment>)> {
    let obj = record
        .as_object()
        .ok_or_else(|| HarvestError::Validation("issue record is not an object".to_string()))?;

    let key = str_field(obj, "key")
        .ok_or_else(|| HarvestError::Validation("issue record missing 'key'".to_string()))?;
    let summary = str_field(obj, "summary")
        .ok_or_else(|| HarvestError::Validation(format!("issue {key} missing 'summary'")))?;

    let issue = CachedIssue {
        key: key.clone(),
        summary,
        description: str_field(obj, "description"),
        status: str_field(obj, "status"),
        issue_type: str_field(obj, "issue_type").or_else(|| str_field(obj, "issueType")),
        priority: str_field(obj, "priority"),
        assignee: str_field(obj, "assignee"),
        reporter: str_field(obj, "reporter"),
        created_at: time_field(obj, "created"),
        updated_at: time_field(obj, "updated"),
        resolved_at: time_field(obj, "resolved").or_else(|| time_field(obj, "resolutiondate")),
        labels: string_list(obj.get("labels")),
        components: string_list(obj.get("components")),
        raw_json: record.to_string(),
    };

    let mut comments = Vec::new();
    if let Some(items) = obj.get("comments").and_then(Value::as_array) {
        for item in items {
            let Some(c) = item.as_object() else { continue };
            let Some(remote_id) = str_field(c, "id") else {
                warn!(issue = %key, "comment without id skipped");
                continue;
            };
            comments.push(CachedComment {
                remote_id,
                issue_key: key.clone(),
                author: str_field(c, "author"),
                body: str_field(c, "body").unwrap_or_default(),
                created_at: time_field(c, "created"),
                updated_at: time_field(c, "updated"),
            });
        }
    }

    Ok((issue, comments))
}

fn str_field(obj: &serde_json::Map<String, Value>, name: &str) -> Option<String> {
    obj.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn time_field(obj: &serde_json::Map<String, Value>, name: &str) -> Option<DateTime<Utc>> {
    obj.get(name).and_then(Value::as_str).and_then(parse_timestamp)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Lenient timestamp parsing: remote systems emit RFC 3339 with and
/// without offsets, and plain dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_full_record() {
        let record = json!({
            "key": "PROJ-42",
            "summary": "Login broken",
            "description": "500 on submit",
            "status": "Done",
            "issueType": "Bug",
            "priority": "High",
            "assignee": "dana",
            "reporter": "lee",
            "created": "2025-04-01T09:00:00Z",
            "updated": "2025-04-02T10:30:00Z",
            "labels": ["auth", "regression"],
            "components": ["web"],
            "comments": [
                {"id": "c-1", "author": "dana", "body": "fixed in 1.2", "created": "2025-04-02T10:00:00Z"}
            ]
        });

        let (issue, comments) = normalize_issue(&record).unwrap();
        assert_eq!(issue.key, "PROJ-42");
        assert_eq!(issue.issue_type.as_deref(), Some("Bug"));
        assert_eq!(issue.labels, vec!["auth", "regression"]);
        assert!(issue.created_at.is_some());
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].issue_key, "PROJ-42");
    }

    #[test]
    fn normalize_requires_key_and_summary() {
        assert!(matches!(
            normalize_issue(&json!({"summary": "no key"})),
            Err(HarvestError::Validation(_))
        ));
        assert!(matches!(
            normalize_issue(&json!({"key": "PROJ-1"})),
            Err(HarvestError::Validation(_))
        ));
        assert!(matches!(
            normalize_issue(&json!("not an object")),
            Err(HarvestError::Validation(_))
        ));
    }

    #[test]
    fn normalize_defaults_optionals() {
        let (issue, comments) =
            normalize_issue(&json!({"key": "PROJ-2", "summary": "minimal"})).unwrap();
        assert!(issue.description.is_none());
        assert!(issue.labels.is_empty());
        assert!(issue.updated_at.is_none());
        assert!(comments.is_empty());
    }

    #[test]
    fn default_jql_shapes() {
        assert_eq!(
            default_jql(None, None),
            "status IN (Done, Resolved, Closed) AND resolved >= -180d ORDER BY updated DESC"
        );
        assert_eq!(
            default_jql(Some("OPS"), Some("Open")),
            "project = OPS AND status = 'Open' ORDER BY updated DESC"
        );
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp("2025-04-01T09:00:00Z").is_some());
        assert!(parse_timestamp("2025-04-01T09:00:00.123+0900").is_some());
        assert!(parse_timestamp("2025-04-01 09:00:00").is_some());
        assert!(parse_timestamp("2025-04-01").is_some());
        assert!(parse_timestamp("not a date").is_none());
    }
}
