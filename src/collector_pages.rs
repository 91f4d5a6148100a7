//! Wiki page collection orchestration.
//!
//! Same shape as the issue collector, with two extra steps: space
//! enumeration before content fetch, and HTML sanitization of page
//! bodies into the plain-text column. Both markup representations are
//! stored unmodified alongside the extracted text.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{CollectConfig, ToolNames};
use crate::error::{HarvestError, HarvestResult};
use crate::mcp::McpClient;
use crate::models::{CachedPage, CachedSpace, RunKind, RunStatus, RunSummary};
use crate::page_store::PageStore;
use crate::sanitize::html_to_text;

use crate::collector_issues::parse_timestamp;

pub struct PageCollector<'a> {
    client: &'a mut McpClient,
    store: &'a PageStore,
    tools: ToolNames,
    batch_size: usize,
    default_max_results: usize,
}

impl<'a> PageCollector<'a> {
    pub fn new(
        client: &'a mut McpClient,
        store: &'a PageStore,
        tools: &ToolNames,
        collect: &CollectConfig,
    ) -> Self {
        Self {
            client,
            store,
            tools: tools.clone(),
            batch_size: collect.batch_size,
            default_max_results: collect.max_results,
        }
    }

    /// Enumerate remote spaces and cache them.
    pub async fn list_spaces(&mut self) -> HarvestResult<Vec<CachedSpace>> {
        let records = self
            .client
            .call_tool(&self.tools.space_list, HashMap::new())
            .await?;

        let spaces: Vec<CachedSpace> = records.iter().filter_map(normalize_space).collect();
        self.store.upsert_spaces(&spaces).await?;
        info!(count = spaces.len(), "listed wiki spaces");
        Ok(spaces)
    }

    /// Raw page records for one space, or type-filtered across all
    /// spaces when no key is given.
    pub async fn list_pages(
        &mut self,
        space_key: Option<&str>,
        limit: usize,
    ) -> HarvestResult<Vec<Value>> {
        let cql = match space_key {
            Some(key) => format!("space = {key}"),
            None => "type = page".to_string(),
        };
        self.search(&cql, limit).await
    }

    /// Collect pages from the given spaces (all known spaces when
    /// none are named), sanitize, and batch-upsert.
    pub async fn collect_pages(
        &mut self,
        space_keys: Option<Vec<String>>,
        max_pages: usize,
    ) -> HarvestResult<RunSummary> {
        let start = Instant::now();

        let keys = match space_keys {
            Some(keys) if !keys.is_empty() => keys,
            _ => {
                let spaces = self.list_spaces().await?;
                spaces.into_iter().map(|s| s.space_key).collect()
            }
        };

        let query = format!("spaces: {}", keys.join(", "));
        let run_id = self.store.start_run(RunKind::Full, &query).await?;
        info!(spaces = keys.len(), "starting page collection");

        let mut raw = Vec::new();
        for key in &keys {
            let remaining = max_pages.saturating_sub(raw.len());
            if remaining == 0 {
                break;
            }
            match self.list_pages(Some(key), remaining).await {
                Ok(mut pages) => {
                    info!(space = %key, count = pages.len(), "fetched space pages");
                    raw.append(&mut pages);
                }
                Err(e) => {
                    let message = e.to_string();
                    self.store
                        .finish_run(&run_id, RunStatus::Failed, 0, 0, Some(&message))
                        .await?;
                    return Err(e);
                }
            }
        }

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
            "page collection finished"
        );
        Ok(summary)
    }

    /// Time-window collection over last-modified pages.
    pub async fn incremental_update(&mut self, since_hours: u32) -> HarvestResult<RunSummary> {
        let start = Instant::now();
        let cql = format!("lastmodified >= now(\"-{since_hours}h\")");
        let run_id = self.store.start_run(RunKind::Incremental, &cql).await?;
        info!(since_hours, "starting incremental page collection");

        let raw = match self.search(&cql, self.default_max_results).await {
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

        Ok(RunSummary {
            collected,
            errors,
            elapsed: start.elapsed(),
        })
    }

    /// Single-page fetch + normalize + upsert.
    pub async fn get_page_details(&mut self, page_id: &str) -> HarvestResult<CachedPage> {
        let args = HashMap::from([("pageId".to_string(), json!(page_id))]);
        let records = self.client.call_tool(&self.tools.page_get, args).await?;

        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| HarvestError::NotFound(format!("page {page_id}")))?;

        let page = normalize_page(&record)?;
        self.store.upsert_pages(std::slice::from_ref(&page)).await?;
        info!(page_id, "retrieved and cached page");
        Ok(page)
    }

    async fn search(&mut self, cql: &str, limit: usize) -> HarvestResult<Vec<Value>> {
        let args = HashMap::from([
            ("cql".to_string(), json!(cql)),
            ("limit".to_string(), json!(limit)),
        ]);
        let mut records = self.client.call_tool(&self.tools.page_search, args).await?;
        records.truncate(limit);
        Ok(records)
    }

    async fn save_batches(&mut self, raw: &[Value]) -> (u64, u64) {
        let mut collected = 0u64;
        let mut errors = 0u64;

        for chunk in raw.chunks(self.batch_size) {
            let mut pages = Vec::with_capacity(chunk.len());
            for record in chunk {
                match normalize_page(record) {
                    Ok(page) => pages.push(page),
                    Err(e) => {
                        warn!("skipping page record: {e}");
                        errors += 1;
                    }
                }
            }

            match self.store.upsert_pages(&pages).await {
                Ok(written) => collected += written,
                Err(e) => {
                    warn!(batch_len = pages.len(), "page batch dropped: {e}");
                    errors += pages.len() as u64;
                }
            }
        }

        (collected, errors)
    }
}

/// Normalize a raw page record. `id`, `title`, and a space key are
/// required; the body goes through sanitization, originals untouched.
pub fn normalize_page(record: &Value) -> HarvestResult<CachedPage> {
    let obj = record
        .as_object()
        .ok_or_else(|| HarvestError::Validation("page record is not an object".to_string()))?;

    let page_id = str_field(obj, "id")
        .ok_or_else(|| HarvestError::Validation("page record missing 'id'".to_string()))?;
    let title = str_field(obj, "title")
        .ok_or_else(|| HarvestError::Validation(format!("page {page_id} missing 'title'")))?;
    let space_key = str_field(obj, "space")
        .or_else(|| str_field(obj, "spaceKey"))
        .ok_or_else(|| HarvestError::Validation(format!("page {page_id} missing 'space'")))?;

    let body_storage = str_field(obj, "content").or_else(|| str_field(obj, "body_storage"));
    let body_view = str_field(obj, "body_view").or_else(|| body_storage.clone());
    let body_text = body_storage
        .as_deref()
        .or(body_view.as_deref())
        .map(html_to_text);

    let author = str_field(obj, "author");
    Ok(CachedPage {
        page_id,
        space_key,
        space_name: str_field(obj, "spaceName"),
        title,
        body_storage,
        body_view,
        body_text,
        version: obj.get("version").and_then(Value::as_i64),
        creator: str_field(obj, "creator").or_else(|| author.clone()),
        last_modifier: str_field(obj, "lastModifier").or(author),
        created_at: obj
            .get("created")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
        updated_at: obj
            .get("updated")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
        labels: obj
            .get("labels")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        url: str_field(obj, "url"),
        parent_id: str_field(obj, "parentId"),
        raw_json: record.to_string(),
    })
}

fn normalize_space(record: &Value) -> Option<CachedSpace> {
    let obj = record.as_object()?;
    let space_key = str_field(obj, "key")?;
    Some(CachedSpace {
        space_key,
        name: str_field(obj, "name"),
        space_type: str_field(obj, "type"),
        description: str_field(obj, "description"),
        homepage_id: str_field(obj, "homepageId"),
    })
}

fn str_field(obj: &serde_json::Map<String, Value>, name: &str) -> Option<String> {
    obj.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_sanitizes_body() {
        let record = json!({
            "id": "98765",
            "title": "Runbook",
            "space": "OPS",
            "content": "<h1>Steps</h1><script>x()</script><p>Restart the  service</p>",
            "version": 7,
            "author": "kim",
            "updated": "2025-05-01T12:00:00Z",
        });

        let page = normalize_page(&record).unwrap();
        assert_eq!(page.page_id, "98765");
        assert_eq!(page.body_text.as_deref(), Some("Steps Restart the service"));
        // Originals preserved verbatim.
        assert!(page.body_storage.as_deref().unwrap().contains("<script>"));
        assert_eq!(page.version, Some(7));
        assert_eq!(page.creator.as_deref(), Some("kim"));
    }

    #[test]
    fn normalize_requires_id_title_space() {
        assert!(normalize_page(&json!({"title": "t", "space": "S"})).is_err());
        assert!(normalize_page(&json!({"id": "1", "space": "S"})).is_err());
        assert!(normalize_page(&json!({"id": "1", "title": "t"})).is_err());
    }

    #[test]
    fn normalize_space_fields() {
        let space = normalize_space(&json!({
            "key": "ENG",
            "name": "Engineering",
            "type": "global",
            "homepageId": "100"
        }))
        .unwrap();
        assert_eq!(space.space_key, "ENG");
        assert_eq!(space.space_type.as_deref(), Some("global"));
        assert!(normalize_space(&json!({"name": "keyless"})).is_none());
    }
}
