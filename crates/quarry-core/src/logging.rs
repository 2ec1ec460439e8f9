//! Logging integration for the quarry ORM.
//!
//! The engine itself never logs; observability is layered on through query
//! hooks. This module provides the [`tracing`] subscriber bootstrap that
//! applications call once at startup, plus a span helper for grouping all
//! statements issued on behalf of one logical operation.

/// Sets up the global tracing subscriber.
///
/// `level` is an env-filter directive such as `"debug"` or
/// `"quarry_db=debug,info"`. When `pretty` is set a human-readable format
/// with file/line locations is used; otherwise output is structured JSON.
/// Installing a second subscriber is a no-op rather than a panic so tests
/// can call this freely.
pub fn setup_logging(level: &str, pretty: bool) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    if pretty {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span covering one logical database operation.
///
/// Statement-level hooks emit their events inside whatever span is current,
/// so entering this span groups the primary statement and any relation
/// follow-up statements under one name.
///
/// # Examples
///
/// ```
/// use quarry_core::logging::operation_span;
///
/// let span = operation_span("load_dashboard");
/// let _guard = span.enter();
/// tracing::info!("issuing queries");
/// ```
pub fn operation_span(name: &str) -> tracing::Span {
    tracing::info_span!("db_operation", op = name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_is_idempotent() {
        setup_logging("info", true);
        setup_logging("debug", false); // second call must not panic
    }

    #[test]
    fn test_operation_span_enter() {
        let span = operation_span("refresh");
        let _guard = span.enter(); // must not panic without a subscriber
    }
}
