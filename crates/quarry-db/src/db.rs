//! The database handle: adapter, dialect, hooks, statistics, cancellation.
//!
//! [`Db`] is the cheap-to-clone bundle every query carries: the execution
//! adapter (the only thing that talks to a live connection), the shared
//! [`Dialect`], the ordered statement-hook registry, atomic statistics
//! counters, and a cancellation token. The engine performs no connection
//! management of its own — everything I/O goes through [`ExecuteAdapter`].

use crate::dialect::Dialect;
use crate::hook::{ExecOutcome, QueryEvent, QueryHook};
use crate::model::{Model, NoModel};
use crate::query::select::SelectQuery;
use crate::row::Row;
use crate::value::Value;
use quarry_core::{QuarryError, QuarryResult};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The narrow interface the engine requires from a live connection or pool.
///
/// Implementations wrap a driver; the engine never constructs connections,
/// never retries, and hands over fully rendered SQL text.
#[async_trait::async_trait]
pub trait ExecuteAdapter: Send + Sync {
    /// Executes a statement and returns its result rows.
    async fn query_rows(&self, sql: &str) -> QuarryResult<Vec<Row>>;

    /// Executes a row-less statement and returns the affected-row count.
    async fn execute(&self, sql: &str) -> QuarryResult<u64>;

    /// Executes an INSERT and returns the generated key, when the backend
    /// can report one without `RETURNING`. The default runs the statement
    /// and reports no key.
    async fn insert_returning(&self, sql: &str) -> QuarryResult<Value> {
        self.execute(sql).await?;
        Ok(Value::Null)
    }

    /// Whether two statements may be in flight at once through this
    /// adapter. A pinned single connection returns `false`, forcing
    /// combined scan-and-count to run its two statements sequentially.
    fn supports_concurrency(&self) -> bool {
        true
    }
}

/// Execution statistics, updated unconditionally for every statement.
///
/// A "no rows" outcome counts as a success; only true failures increment
/// the error counter.
#[derive(Debug, Default)]
pub struct DbStats {
    queries: AtomicU64,
    errors: AtomicU64,
}

impl DbStats {
    /// Total statements executed.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Statements that failed with a true error.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// A handle to one logical database: adapter + dialect + hooks + stats.
///
/// Cloning is cheap and shares the underlying state, so a `Db` can be
/// handed to every query and spawned task freely.
#[derive(Clone)]
pub struct Db {
    adapter: Arc<dyn ExecuteAdapter>,
    dialect: Arc<Dialect>,
    hooks: Vec<Arc<dyn QueryHook>>,
    stats: Arc<DbStats>,
    cancel: CancellationToken,
}

impl Db {
    /// Creates a handle over an adapter and a dialect.
    pub fn new(adapter: Arc<dyn ExecuteAdapter>, dialect: Dialect) -> Self {
        Self {
            adapter,
            dialect: Arc::new(dialect),
            hooks: Vec::new(),
            stats: Arc::new(DbStats::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Registers a statement hook. Hooks run `before` in registration order
    /// and `after` in reverse registration order.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn QueryHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Attaches a cancellation token. Every execution races the adapter
    /// against this token and maps a trip to [`QuarryError::Cancelled`].
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The dialect shared by every query built from this handle.
    pub fn dialect(&self) -> &Arc<Dialect> {
        &self.dialect
    }

    /// Execution statistics.
    pub fn stats(&self) -> &DbStats {
        &self.stats
    }

    /// Starts a SELECT bound to a model's table.
    pub fn select<M: Model>(&self) -> SelectQuery<M> {
        SelectQuery::for_model(self.clone())
    }

    /// Starts a SELECT with no model binding; consume it with
    /// `fetch_rows`.
    pub fn select_raw(&self) -> SelectQuery<NoModel> {
        SelectQuery::unbound(self.clone())
    }

    pub(crate) fn concurrent_ok(&self) -> bool {
        self.adapter.supports_concurrency()
    }

    /// Executes a row-returning statement through the hook pipeline.
    pub(crate) async fn run_rows(
        &self,
        model: Option<&'static str>,
        operation: &'static str,
        sql: String,
        args: Vec<Value>,
    ) -> QuarryResult<Vec<Row>> {
        self.run_with(
            model,
            operation,
            sql,
            args,
            |adapter, sql| async move { adapter.query_rows(&sql).await },
            |rows: &Vec<Row>| ExecOutcome::Rows(rows.len() as u64),
        )
        .await
    }

    /// Executes a row-less statement through the hook pipeline.
    pub(crate) async fn run_execute(
        &self,
        model: Option<&'static str>,
        operation: &'static str,
        sql: String,
        args: Vec<Value>,
    ) -> QuarryResult<u64> {
        self.run_with(
            model,
            operation,
            sql,
            args,
            |adapter, sql| async move { adapter.execute(&sql).await },
            |n: &u64| ExecOutcome::Affected(*n),
        )
        .await
    }

    /// Executes an INSERT expecting a generated key, through the hook
    /// pipeline.
    pub(crate) async fn run_insert_returning(
        &self,
        model: Option<&'static str>,
        sql: String,
        args: Vec<Value>,
    ) -> QuarryResult<Value> {
        self.run_with(
            model,
            "INSERT",
            sql,
            args,
            |adapter, sql| async move { adapter.insert_returning(&sql).await },
            |_: &Value| ExecOutcome::Affected(1),
        )
        .await
    }

    /// The shared execution path: counters, hook pipeline, cancellation.
    ///
    /// With no hooks registered the event is never constructed; the
    /// counters are still updated. The `after` phase runs even on
    /// cancellation, with the error populated, so hooks can observe it.
    async fn run_with<T, Fut>(
        &self,
        model: Option<&'static str>,
        operation: &'static str,
        sql: String,
        args: Vec<Value>,
        start: impl FnOnce(Arc<dyn ExecuteAdapter>, String) -> Fut,
        outcome_of: impl FnOnce(&T) -> ExecOutcome,
    ) -> QuarryResult<T>
    where
        Fut: Future<Output = QuarryResult<T>> + Send,
    {
        self.stats.queries.fetch_add(1, Ordering::Relaxed);

        let mut event = if self.hooks.is_empty() {
            None
        } else {
            Some(QueryEvent::new(model, operation, sql.clone(), args))
        };
        if let Some(event) = &mut event {
            for hook in &self.hooks {
                hook.before_query(event);
            }
        }

        let fut = start(Arc::clone(&self.adapter), sql);
        let result = tokio::select! {
            () = self.cancel.cancelled() => Err(QuarryError::Cancelled),
            res = fut => res,
        };

        if let Err(err) = &result {
            if !err.is_not_found() {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(event) = &mut event {
            match &result {
                Ok(value) => event.outcome = Some(outcome_of(value)),
                Err(err) => event.error = Some(err.clone()),
            }
            for hook in self.hooks.iter().rev() {
                hook.after_query(event);
            }
        }

        result
    }
}
