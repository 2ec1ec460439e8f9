//! Integration tests for the execution pipeline.
//!
//! These tests run the full path — render, hook pipeline, adapter call,
//! hydration, model hooks — against an in-memory adapter that replays
//! canned rows and records every statement it receives.

use quarry_core::{QuarryError, QuarryResult};
use quarry_db::db::{Db, ExecuteAdapter};
use quarry_db::dialect::Dialect;
use quarry_db::hook::{QueryEvent, QueryHook};
use quarry_db::model::Model;
use quarry_db::row::Row;
use quarry_db::table::{Field, Table};
use quarry_db::value::Value;
use std::collections::VecDeque;
use std::sync::{Arc, LazyLock, Mutex};

// ── Test adapter ──────────────────────────────────────────────────────

/// Replays queued responses in order and records every statement.
struct ReplayAdapter {
    responses: Mutex<VecDeque<Vec<Row>>>,
    statements: Mutex<Vec<String>>,
    concurrent: bool,
}

impl ReplayAdapter {
    fn new(responses: Vec<Vec<Row>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            statements: Mutex::new(Vec::new()),
            concurrent: true,
        })
    }

    fn pinned(responses: Vec<Vec<Row>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            statements: Mutex::new(Vec::new()),
            concurrent: false,
        })
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ExecuteAdapter for ReplayAdapter {
    async fn query_rows(&self, sql: &str) -> QuarryResult<Vec<Row>> {
        self.statements.lock().unwrap().push(sql.to_string());
        // Count statements are answered by content so the concurrent
        // scan-and-count path stays order-independent.
        if sql.contains("count(*)") {
            return Ok(vec![Row::new(
                vec!["count".into()],
                vec![Value::Int(42)],
            )]);
        }
        Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn execute(&self, sql: &str) -> QuarryResult<u64> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(0)
    }

    fn supports_concurrency(&self) -> bool {
        self.concurrent
    }
}

// ── Test model ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct User {
    id: i64,
    name: String,
    age: i64,
    scan_count: u32,
    select_count: u32,
}

impl Model for User {
    fn table() -> &'static Table {
        static TABLE: LazyLock<Table> = LazyLock::new(|| Table {
            fields: vec![Field::new("id"), Field::new("name"), Field::new("age")],
            ..Table::new("users")
        });
        &TABLE
    }

    fn from_row(row: &Row) -> QuarryResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            age: row.get("age")?,
            ..Self::default()
        })
    }

    fn pk(&self) -> Option<Value> {
        (self.id != 0).then(|| Value::Int(self.id))
    }

    fn set_pk(&mut self, value: Value) {
        if let Value::Int(id) = value {
            self.id = id;
        }
    }

    fn field_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", Value::Int(self.id)),
            ("name", Value::String(self.name.clone())),
            ("age", Value::Int(self.age)),
        ]
    }

    fn after_scan(&mut self) -> QuarryResult<()> {
        self.scan_count += 1;
        Ok(())
    }

    fn after_select(&mut self) -> QuarryResult<()> {
        self.select_count += 1;
        Ok(())
    }
}

fn user_row(id: i64, name: &str, age: i64) -> Row {
    Row::new(
        vec!["id".into(), "name".into(), "age".into()],
        vec![Value::Int(id), Value::String(name.into()), Value::Int(age)],
    )
}

// ── Fetch and hydration ───────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_hydrates_models_and_runs_hooks() {
    let adapter = ReplayAdapter::new(vec![vec![
        user_row(1, "alice", 30),
        user_row(2, "bob", 25),
    ]]);
    let db = Db::new(adapter.clone(), Dialect::postgres());

    let users = db.select::<User>().order("name").fetch().await.unwrap();

    assert_eq!(users.len(), 2);
    assert_eq!(users[0].name, "alice");
    assert_eq!(users[1].age, 25);
    // Per-entity hooks ran exactly once per model.
    assert!(users.iter().all(|u| u.scan_count == 1));
    assert!(users.iter().all(|u| u.select_count == 1));

    let statements = adapter.statements();
    assert_eq!(statements.len(), 1);
    assert_eq!(
        statements[0],
        "SELECT \"users\".\"id\", \"users\".\"name\", \"users\".\"age\" FROM \"users\" ORDER BY \"name\""
    );
}

#[tokio::test]
async fn test_fetch_one_semantics() {
    // No rows.
    let db = Db::new(ReplayAdapter::new(vec![vec![]]), Dialect::postgres());
    let err = db.select::<User>().fetch_one().await.unwrap_err();
    assert!(matches!(err, QuarryError::DoesNotExist(_)));

    // Exactly one row.
    let db = Db::new(
        ReplayAdapter::new(vec![vec![user_row(1, "alice", 30)]]),
        Dialect::postgres(),
    );
    let user = db.select::<User>().fetch_one().await.unwrap();
    assert_eq!(user.id, 1);

    // More than one row.
    let db = Db::new(
        ReplayAdapter::new(vec![vec![user_row(1, "a", 1), user_row(2, "b", 2)]]),
        Dialect::postgres(),
    );
    let err = db.select::<User>().fetch_one().await.unwrap_err();
    assert!(matches!(err, QuarryError::MultipleObjectsReturned(_)));
}

#[tokio::test]
async fn test_fetch_one_renders_limit_two() {
    let adapter = ReplayAdapter::new(vec![vec![user_row(1, "a", 1)]]);
    let db = Db::new(adapter.clone(), Dialect::postgres());
    db.select::<User>().fetch_one().await.unwrap();
    assert!(adapter.statements()[0].ends_with(" LIMIT 2"));
}

// ── Count and exists ──────────────────────────────────────────────────

#[tokio::test]
async fn test_count_execution() {
    let adapter = ReplayAdapter::new(vec![]);
    let db = Db::new(adapter.clone(), Dialect::postgres());
    let count = db
        .select::<User>()
        .where_("age > ?", vec![18.into()])
        .count()
        .await
        .unwrap();
    assert_eq!(count, 42);
    assert_eq!(
        adapter.statements()[0],
        "SELECT count(*) FROM \"users\" WHERE (age > 18)"
    );
}

#[tokio::test]
async fn test_exists_native_form() {
    let adapter = ReplayAdapter::new(vec![vec![Row::new(
        vec!["exists".into()],
        vec![Value::Bool(true)],
    )]]);
    let db = Db::new(adapter.clone(), Dialect::postgres());
    let exists = db.select::<User>().exists().await.unwrap();
    assert!(exists);
    assert!(adapter.statements()[0].starts_with("SELECT EXISTS ("));
}

#[tokio::test]
async fn test_exists_portable_form_zero_rows_is_false() {
    // A dialect without native EXISTS over a filter matching nothing must
    // report false with no error.
    let adapter = ReplayAdapter::new(vec![vec![]]);
    let db = Db::new(adapter.clone(), Dialect::mysql());
    let exists = db
        .select::<User>()
        .where_("age > ?", vec![200.into()])
        .exists()
        .await
        .unwrap();
    assert!(!exists);
    assert!(adapter.statements()[0].starts_with("SELECT 1 WHERE EXISTS ("));
}

// ── Combined scan and count ───────────────────────────────────────────

#[tokio::test]
async fn test_fetch_and_count_single_statement_without_paging() {
    let adapter = ReplayAdapter::new(vec![vec![
        user_row(1, "a", 1),
        user_row(2, "b", 2),
        user_row(3, "c", 3),
    ]]);
    let db = Db::new(adapter.clone(), Dialect::postgres());
    let (users, count) = db.select::<User>().fetch_and_count().await.unwrap();
    assert_eq!(users.len(), 3);
    assert_eq!(count, 3);
    // One execution serves both results.
    assert_eq!(adapter.statements().len(), 1);
}

#[tokio::test]
async fn test_fetch_and_count_concurrent_when_paged() {
    let adapter = ReplayAdapter::new(vec![vec![user_row(1, "a", 1)]]);
    let db = Db::new(adapter.clone(), Dialect::postgres());
    let (users, count) = db
        .select::<User>()
        .limit(1)
        .offset(2)
        .fetch_and_count()
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(count, 42);

    let statements = adapter.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements.iter().any(|s| s.contains("LIMIT 1 OFFSET 2")));
    // The count statement is derived from an independent clone and drops
    // paging.
    assert!(statements
        .iter()
        .any(|s| s.contains("count(*)") && !s.contains("LIMIT")));
}

#[tokio::test]
async fn test_fetch_and_count_sequential_on_pinned_connection() {
    let adapter = ReplayAdapter::pinned(vec![vec![user_row(1, "a", 1)]]);
    let db = Db::new(adapter.clone(), Dialect::postgres());
    let (users, count) = db
        .select::<User>()
        .limit(1)
        .fetch_and_count()
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(count, 42);

    // Sequential execution: the scan statement strictly precedes the count.
    let statements = adapter.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].contains("LIMIT 1"));
    assert!(statements[1].contains("count(*)"));
}

// ── Statement hooks and statistics ────────────────────────────────────

struct EventRecorder {
    queries: Arc<Mutex<Vec<String>>>,
}

impl QueryHook for EventRecorder {
    fn before_query(&self, event: &mut QueryEvent) {
        event
            .stash
            .insert("marker".into(), Box::new("set-in-before".to_string()));
    }

    fn after_query(&self, event: &mut QueryEvent) {
        // The stash carries data from the before phase.
        let marker = event
            .stash
            .get("marker")
            .and_then(|v| v.downcast_ref::<String>())
            .cloned()
            .unwrap_or_default();
        assert_eq!(marker, "set-in-before");
        self.queries.lock().unwrap().push(event.query.clone());
    }
}

#[tokio::test]
async fn test_statement_hooks_observe_rendered_sql() {
    let queries = Arc::new(Mutex::new(Vec::new()));
    let adapter = ReplayAdapter::new(vec![vec![]]);
    let db = Db::new(adapter, Dialect::postgres()).with_hook(Arc::new(EventRecorder {
        queries: Arc::clone(&queries),
    }));

    db.select::<User>()
        .where_("age > ?", vec![21.into()])
        .fetch()
        .await
        .unwrap();

    let seen = queries.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("WHERE (age > 21)"));
}

#[tokio::test]
async fn test_stats_counters() {
    let adapter = ReplayAdapter::new(vec![vec![], vec![]]);
    let db = Db::new(adapter, Dialect::postgres());
    db.select::<User>().fetch().await.unwrap();
    db.select::<User>().count().await.unwrap();
    assert_eq!(db.stats().queries(), 2);
    assert_eq!(db.stats().errors(), 0);
}

// ── Sticky errors through terminals ───────────────────────────────────

#[tokio::test]
async fn test_sticky_error_blocks_every_terminal() {
    let adapter = ReplayAdapter::new(vec![vec![]]);
    let db = Db::new(adapter.clone(), Dialect::postgres());
    let query = db.select::<User>().join_on("broken", vec![]);

    assert!(query.fetch().await.is_err());
    assert!(query.count().await.is_err());
    assert!(query.exists().await.is_err());
    assert!(query.fetch_and_count().await.is_err());
    // Nothing ever reached the adapter.
    assert!(adapter.statements().is_empty());
}
