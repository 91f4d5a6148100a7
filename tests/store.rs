//! Cache store behavior: idempotent upserts, cascade delete,
//! incremental windows, version regression, clear, and the run log.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tempfile::TempDir;

use case_harvest::db;
use case_harvest::issue_store::IssueStore;
use case_harvest::models::{
    CachedComment, CachedIssue, CachedPage, CachedSpace, RunKind, RunStatus,
};
use case_harvest::page_store::PageStore;

/// Collects log output so tests can assert on emitted warnings.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn issue(key: &str, summary: &str, updated_hours_ago: i64) -> CachedIssue {
    CachedIssue {
        key: key.to_string(),
        summary: summary.to_string(),
        description: None,
        status: Some("Done".to_string()),
        issue_type: Some("Bug".to_string()),
        priority: None,
        assignee: Some("dana".to_string()),
        reporter: None,
        created_at: Some(Utc::now() - Duration::hours(updated_hours_ago + 1)),
        updated_at: Some(Utc::now() - Duration::hours(updated_hours_ago)),
        resolved_at: None,
        labels: vec!["cache".to_string()],
        components: vec![],
        raw_json: "{}".to_string(),
    }
}

fn page(id: &str, title: &str, version: i64) -> CachedPage {
    CachedPage {
        page_id: id.to_string(),
        space_key: "OPS".to_string(),
        space_name: None,
        title: title.to_string(),
        body_storage: Some("<p>body</p>".to_string()),
        body_view: Some("<p>body</p>".to_string()),
        body_text: Some("body".to_string()),
        version: Some(version),
        creator: Some("kim".to_string()),
        last_modifier: Some("kim".to_string()),
        created_at: Some(Utc::now() - Duration::hours(48)),
        updated_at: Some(Utc::now() - Duration::hours(1)),
        labels: vec![],
        url: None,
        parent_id: None,
        raw_json: "{}".to_string(),
    }
}

async fn issue_store(tmp: &TempDir) -> IssueStore {
    IssueStore::open(&tmp.path().join("issues.sqlite"))
        .await
        .unwrap()
}

async fn page_store(tmp: &TempDir) -> PageStore {
    PageStore::open(&tmp.path().join("pages.sqlite"))
        .await
        .unwrap()
}

#[tokio::test]
async fn issue_upsert_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let store = issue_store(&tmp).await;

    let batch = vec![issue("PROJ-1", "first", 2), issue("PROJ-2", "second", 3)];
    store.upsert_issues(&batch).await.unwrap();
    store.upsert_issues(&batch).await.unwrap();

    let all = store.get_since(Utc::now() - Duration::hours(100)).await.unwrap();
    assert_eq!(all.len(), 2);

    let got = store.get_issue("PROJ-1").await.unwrap().unwrap();
    assert_eq!(got.summary, "first");
    assert_eq!(got.labels, vec!["cache"]);
}

#[tokio::test]
async fn reupsert_overwrites_mutable_fields() {
    let tmp = TempDir::new().unwrap();
    let store = issue_store(&tmp).await;

    store.upsert_issues(&[issue("PROJ-7", "old summary", 5)]).await.unwrap();
    let mut updated = issue("PROJ-7", "new summary", 1);
    updated.status = Some("Closed".to_string());
    store.upsert_issues(&[updated]).await.unwrap();

    let got = store.get_issue("PROJ-7").await.unwrap().unwrap();
    assert_eq!(got.summary, "new summary");
    assert_eq!(got.status.as_deref(), Some("Closed"));

    // Still exactly one row.
    let all = store.get_since(Utc::now() - Duration::hours(100)).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn deleting_issue_cascades_to_comments() {
    let tmp = TempDir::new().unwrap();
    let store = issue_store(&tmp).await;

    store.upsert_issues(&[issue("PROJ-9", "with comments", 1)]).await.unwrap();
    let comments = vec![
        CachedComment {
            remote_id: "c-1".to_string(),
            issue_key: "PROJ-9".to_string(),
            author: Some("lee".to_string()),
            body: "first".to_string(),
            created_at: Some(Utc::now()),
            updated_at: None,
        },
        CachedComment {
            remote_id: "c-2".to_string(),
            issue_key: "PROJ-9".to_string(),
            author: None,
            body: "second".to_string(),
            created_at: Some(Utc::now()),
            updated_at: None,
        },
    ];
    store.upsert_comments(&comments).await.unwrap();
    assert_eq!(store.comments_for("PROJ-9").await.unwrap().len(), 2);

    assert!(store.delete_issue("PROJ-9").await.unwrap());
    assert!(store.comments_for("PROJ-9").await.unwrap().is_empty());
    assert_eq!(store.stats().await.unwrap().total_comments, 0);
}

#[tokio::test]
async fn comment_upsert_is_idempotent_by_remote_id() {
    let tmp = TempDir::new().unwrap();
    let store = issue_store(&tmp).await;

    store.upsert_issues(&[issue("PROJ-3", "issue", 1)]).await.unwrap();
    let comment = CachedComment {
        remote_id: "c-42".to_string(),
        issue_key: "PROJ-3".to_string(),
        author: Some("dana".to_string()),
        body: "v1".to_string(),
        created_at: None,
        updated_at: None,
    };
    store.upsert_comments(std::slice::from_ref(&comment)).await.unwrap();
    let mut edited = comment.clone();
    edited.body = "v2".to_string();
    store.upsert_comments(&[edited]).await.unwrap();

    let got = store.comments_for("PROJ-3").await.unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].body, "v2");
}

#[tokio::test]
async fn get_since_filters_and_orders() {
    let tmp = TempDir::new().unwrap();
    let store = issue_store(&tmp).await;

    store
        .upsert_issues(&[
            issue("OLD-1", "ancient", 200),
            issue("MID-1", "recent", 10),
            issue("NEW-1", "fresh", 1),
        ])
        .await
        .unwrap();

    let window = store.get_since(Utc::now() - Duration::hours(24)).await.unwrap();
    let keys: Vec<&str> = window.iter().map(|i| i.key.as_str()).collect();
    assert_eq!(keys, vec!["NEW-1", "MID-1"]);
}

#[tokio::test]
async fn page_upsert_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let store = page_store(&tmp).await;

    let batch = vec![page("100", "Runbook", 3), page("101", "Postmortem", 1)];
    store.upsert_pages(&batch).await.unwrap();
    store.upsert_pages(&batch).await.unwrap();

    assert_eq!(store.stats().await.unwrap().total_pages, 2);
    let got = store.get_page("100").await.unwrap().unwrap();
    assert_eq!(got.title, "Runbook");
    assert_eq!(got.version, Some(3));
}

#[tokio::test]
async fn version_regression_writes_and_warns() {
    let tmp = TempDir::new().unwrap();
    let store = page_store(&tmp).await;

    store.upsert_pages(&[page("200", "Current", 9)]).await.unwrap();

    // An out-of-order fetch with an older version: the remote is
    // authoritative, so the write must land, but never silently.
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);

    let mut stale = page("200", "Stale title", 4);
    stale.body_text = Some("stale body".to_string());
    store.upsert_pages(&[stale]).await.unwrap();
    drop(guard);

    let got = store.get_page("200").await.unwrap().unwrap();
    assert_eq!(got.version, Some(4));
    assert_eq!(got.title, "Stale title");
    assert_eq!(got.body_text.as_deref(), Some("stale body"));

    let logs = capture.contents();
    assert!(logs.contains("WARN"), "no warning emitted: {logs}");
    assert!(logs.contains("version regressed"));
    assert!(logs.contains("page_id=200"));
    assert!(logs.contains("cached_version=9"));
    assert!(logs.contains("incoming_version=4"));
}

#[tokio::test]
async fn matching_version_upsert_does_not_warn() {
    let tmp = TempDir::new().unwrap();
    let store = page_store(&tmp).await;

    store.upsert_pages(&[page("300", "Steady", 5)]).await.unwrap();

    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    store.upsert_pages(&[page("300", "Steady", 6)]).await.unwrap();
    drop(guard);

    assert!(!capture.contents().contains("version regressed"));
}

#[tokio::test]
async fn upsert_batch_rolls_back_as_one() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("issues.sqlite");
    let store = IssueStore::open(&path).await.unwrap();

    // Make one key unstorable to simulate a write failure mid-batch.
    let pool = db::connect(&path).await.unwrap();
    sqlx::query(
        "CREATE TRIGGER reject_bad_key BEFORE INSERT ON issues \
         WHEN NEW.issue_key = 'BAD-1' \
         BEGIN SELECT RAISE(ABORT, 'simulated write failure'); END",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let batch = vec![issue("GOOD-1", "fine", 1), issue("BAD-1", "unstorable", 1)];
    assert!(store.upsert_issues(&batch).await.is_err());

    // All-or-nothing: the good row did not land either.
    assert!(store.get_issue("GOOD-1").await.unwrap().is_none());
    assert_eq!(store.stats().await.unwrap().total_issues, 0);
}

#[tokio::test]
async fn spaces_upsert_and_list() {
    let tmp = TempDir::new().unwrap();
    let store = page_store(&tmp).await;

    let spaces = vec![
        CachedSpace {
            space_key: "OPS".to_string(),
            name: Some("Operations".to_string()),
            space_type: Some("global".to_string()),
            description: None,
            homepage_id: Some("1".to_string()),
        },
        CachedSpace {
            space_key: "ENG".to_string(),
            name: Some("Engineering".to_string()),
            space_type: Some("global".to_string()),
            description: None,
            homepage_id: None,
        },
    ];
    store.upsert_spaces(&spaces).await.unwrap();
    store.upsert_spaces(&spaces).await.unwrap();

    let listed = store.list_cached_spaces().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].space_key, "ENG");
}

#[tokio::test]
async fn clear_empties_both_tables() {
    let tmp = TempDir::new().unwrap();
    let store = issue_store(&tmp).await;

    store.upsert_issues(&[issue("PROJ-5", "to clear", 1)]).await.unwrap();
    store
        .upsert_comments(&[CachedComment {
            remote_id: "c-9".to_string(),
            issue_key: "PROJ-5".to_string(),
            author: None,
            body: "gone soon".to_string(),
            created_at: None,
            updated_at: None,
        }])
        .await
        .unwrap();

    store.clear().await.unwrap();
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_issues, 0);
    assert_eq!(stats.total_comments, 0);
}

#[tokio::test]
async fn run_log_transitions() {
    let tmp = TempDir::new().unwrap();
    let store = issue_store(&tmp).await;

    let run_id = store.start_run(RunKind::Incremental, "updated >= -24h").await.unwrap();
    let running = store.recent_runs(5).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].status, "running");
    assert_eq!(running[0].kind, "incremental");

    store
        .finish_run(&run_id, RunStatus::Completed, 8, 2, None)
        .await
        .unwrap();
    let done = store.recent_runs(5).await.unwrap();
    assert_eq!(done[0].status, "completed");
    assert_eq!(done[0].collected, 8);
    assert_eq!(done[0].errors, 2);
    assert!(done[0].finished_at.is_some());
}

#[tokio::test]
async fn failed_run_records_message() {
    let tmp = TempDir::new().unwrap();
    let store = issue_store(&tmp).await;

    let run_id = store.start_run(RunKind::Full, "project = OPS").await.unwrap();
    store
        .finish_run(&run_id, RunStatus::Failed, 0, 0, Some("connection refused"))
        .await
        .unwrap();

    let runs = store.recent_runs(1).await.unwrap();
    assert_eq!(runs[0].status, "failed");
    assert_eq!(runs[0].error.as_deref(), Some("connection refused"));
}

#[tokio::test]
async fn stats_distributions() {
    let tmp = TempDir::new().unwrap();
    let store = issue_store(&tmp).await;

    let mut open = issue("PROJ-10", "open one", 1);
    open.status = Some("Open".to_string());
    store
        .upsert_issues(&[issue("PROJ-11", "done a", 2), issue("PROJ-12", "done b", 3), open])
        .await
        .unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_issues, 3);
    assert_eq!(stats.status_distribution[0], ("Done".to_string(), 2));
    assert!(stats.last_synced_at.is_some());
    assert!(stats.oldest_created.unwrap() <= stats.newest_updated.unwrap());
}
