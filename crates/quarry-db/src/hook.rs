//! Statement-level hook pipeline and model-hook batch helpers.
//!
//! Statement hooks observe every statement the engine executes. `before`
//! hooks run in registration order over a mutable [`QueryEvent`]; `after`
//! hooks run in reverse registration order once the outcome is recorded.
//! When no hooks are registered the event is never built — only the
//! database handle's statistics counters are touched.
//!
//! The batch helpers at the bottom implement the model-hook aggregation
//! contract: `before_*` hooks stop at the first error, `after_*` and scan
//! hooks run over the whole batch and report the first error collected.

use crate::value::Value;
use quarry_core::{QuarryError, QuarryResult};
use std::any::Any;
use std::collections::HashMap;
use std::time::Instant;

/// What a statement execution produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// A row set with this many rows.
    Rows(u64),
    /// A row-less statement affecting this many rows.
    Affected(u64),
}

impl ExecOutcome {
    /// The row count, whichever kind it is.
    pub const fn count(self) -> u64 {
        match self {
            Self::Rows(n) | Self::Affected(n) => n,
        }
    }
}

/// A value capturing one statement execution, threaded through the hook
/// pipeline.
///
/// The event is constructed before execution, mutated in place with the
/// outcome or error, then handed to `after_query` hooks in reverse
/// registration order. The stash is an open side-channel for hooks to pass
/// data from their `before` phase to their `after` phase.
pub struct QueryEvent {
    /// Table name of the statement's model, when one is bound.
    pub model: Option<&'static str>,
    /// Statement verb: `"SELECT"`, `"INSERT"`, `"UPDATE"`, `"DELETE"`.
    pub operation: &'static str,
    /// The rendered SQL text.
    pub query: String,
    /// The argument values that were formatted into the text, in order.
    pub args: Vec<Value>,
    /// When the engine started executing the statement.
    pub start_time: Instant,
    /// Execution outcome; `None` until execution finishes or on error.
    pub outcome: Option<ExecOutcome>,
    /// Execution error, populated before the `after` phase runs.
    pub error: Option<QuarryError>,
    /// Hook-to-hook key-value side channel.
    pub stash: HashMap<String, Box<dyn Any + Send>>,
}

impl QueryEvent {
    /// Creates an event for a statement about to execute.
    pub fn new(
        model: Option<&'static str>,
        operation: &'static str,
        query: String,
        args: Vec<Value>,
    ) -> Self {
        Self {
            model,
            operation,
            query,
            args,
            start_time: Instant::now(),
            outcome: None,
            error: None,
            stash: HashMap::new(),
        }
    }
}

/// A statement-level lifecycle interceptor.
///
/// Hooks must be cheap and must not perform I/O of their own against the
/// same connection; they observe, they do not participate.
pub trait QueryHook: Send + Sync {
    /// Runs before execution, in registration order.
    fn before_query(&self, event: &mut QueryEvent);

    /// Runs after execution, in reverse registration order, with
    /// `event.outcome` or `event.error` populated. Cancellation is reported
    /// here like any other error.
    fn after_query(&self, event: &mut QueryEvent);
}

/// A hook that logs statement lifecycles through [`tracing`].
///
/// The engine itself never logs; attach this hook to get per-statement
/// debug output with timing, and warnings for failed statements.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingQueryHook;

impl QueryHook for TracingQueryHook {
    fn before_query(&self, event: &mut QueryEvent) {
        tracing::debug!(
            operation = event.operation,
            model = event.model,
            query = %event.query,
            "executing statement"
        );
    }

    fn after_query(&self, event: &mut QueryEvent) {
        let elapsed = event.start_time.elapsed();
        match (&event.error, event.outcome) {
            (Some(err), _) => tracing::warn!(
                operation = event.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "statement failed"
            ),
            (None, outcome) => tracing::debug!(
                operation = event.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                rows = outcome.map(ExecOutcome::count),
                "statement finished"
            ),
        }
    }
}

// ── Model-hook batch helpers ───────────────────────────────────────────

/// Runs a `before_*` hook over a batch, stopping at the first error.
pub(crate) fn run_before_batch<M>(
    models: &mut [M],
    mut hook: impl FnMut(&mut M) -> QuarryResult<()>,
) -> QuarryResult<()> {
    for model in models {
        hook(model)?;
    }
    Ok(())
}

/// Runs an `after_*` or scan hook over the whole batch, returning the first
/// error collected without short-circuiting.
pub(crate) fn run_after_batch<M>(
    models: &mut [M],
    mut hook: impl FnMut(&mut M) -> QuarryResult<()>,
) -> QuarryResult<()> {
    let mut first_err = None;
    for model in models {
        if let Err(err) = hook(model) {
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    }
    first_err.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_outcome_count() {
        assert_eq!(ExecOutcome::Rows(4).count(), 4);
        assert_eq!(ExecOutcome::Affected(2).count(), 2);
    }

    #[test]
    fn test_event_stash_round_trip() {
        let mut event = QueryEvent::new(None, "SELECT", "SELECT 1".into(), vec![]);
        event.stash.insert("trace_id".into(), Box::new(42_u64));
        let got = event
            .stash
            .get("trace_id")
            .and_then(|v| v.downcast_ref::<u64>());
        assert_eq!(got, Some(&42));
    }

    #[test]
    fn test_before_batch_stops_at_first_error() {
        let mut calls = 0;
        let mut items = [1, -1, 1];
        let result = run_before_batch(&mut items, |n| {
            calls += 1;
            if *n < 0 {
                Err(QuarryError::Database("bad".into()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_after_batch_runs_to_completion() {
        let mut calls = 0;
        let mut items = [-1, 1, -2];
        let result = run_after_batch(&mut items, |n| {
            calls += 1;
            if *n < 0 {
                Err(QuarryError::Database(format!("bad {n}")))
            } else {
                Ok(())
            }
        });
        assert_eq!(calls, 3);
        // First error wins even though a later entry also failed.
        assert_eq!(result.unwrap_err(), QuarryError::Database("bad -1".into()));
    }

    #[test]
    fn test_after_batch_all_ok() {
        let mut items = [1, 2];
        assert!(run_after_batch(&mut items, |_| Ok(())).is_ok());
    }

    #[test]
    fn test_tracing_hook_phases_run() {
        let hook = TracingQueryHook;
        let mut event = QueryEvent::new(Some("users"), "SELECT", "SELECT 1".into(), vec![]);
        hook.before_query(&mut event);
        event.outcome = Some(ExecOutcome::Rows(1));
        hook.after_query(&mut event);
        event.error = Some(QuarryError::Cancelled);
        hook.after_query(&mut event);
    }
}
