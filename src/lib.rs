//! # case-harvest
//!
//! Collects issue-tracker and wiki content from a remote MCP tool
//! server into a local SQLite cache with incremental-sync semantics,
//! batch writes, and retry/backoff under intermittent connectivity.
//! Downstream retrieval pipelines read the cache directly.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────────┐
//! │  Collectors  │──▶│ MCP Client  │──▶│  Tool server  │
//! │ issues/pages │   │ retry + SSE │   │  (JSON-RPC)   │
//! └──────┬───────┘   └─────────────┘   └───────────────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │    SQLite    │  two store files: issues + comments,
//! │  cache files │  pages + spaces, each with a run log
//! └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvest init                        # create cache files
//! harvest sources                     # check server health
//! harvest collect issues --limit 500  # full query-driven run
//! harvest collect pages --incremental 24
//! harvest stats all
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`retry`] | Retry/backoff decision procedure |
//! | [`sse`] | Server-sent event reassembly |
//! | [`mcp`] | Transport client |
//! | [`models`] | Core data types |
//! | [`issue_store`] / [`page_store`] | SQLite cache stores |
//! | [`collector_issues`] / [`collector_pages`] | Collection orchestration |
//! | [`sanitize`] | HTML to plain text |
//! | [`migrate`] | Schema application |

pub mod collector_issues;
pub mod collector_pages;
pub mod config;
pub mod db;
pub mod error;
pub mod issue_store;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod page_store;
pub mod retry;
pub mod runs;
pub mod sanitize;
pub mod sources;
pub mod sse;
pub mod stats;
