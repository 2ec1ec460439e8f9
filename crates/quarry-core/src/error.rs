//! Core error types for the quarry ORM.
//!
//! [`QuarryError`] covers the three failure families the engine distinguishes:
//! configuration errors (fatal at build/construction time), builder state
//! errors (recorded once on a query and surfaced by every later call), and
//! execution errors (surfaced from the adapter). The enum is `Clone` so that
//! a sticky error stored on a query can be handed back to every subsequent
//! caller without consuming it.

use thiserror::Error;

/// The primary error type for the quarry ORM.
///
/// Adapter errors are carried as messages rather than boxed sources so the
/// enum stays `Clone`; the adapter is expected to render its own error
/// context into the string it hands over.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuarryError {
    // ── Configuration errors (fatal, never retried) ──────────────────

    /// A dialect, table, or relation is mis-declared.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A relation name was requested that the model does not declare.
    #[error("{model} has no relation named {name:?}")]
    UnknownRelation {
        /// The table name of the model the lookup ran against.
        model: String,
        /// The relation name that failed to resolve.
        name: String,
    },

    // ── Builder state errors (sticky on the query) ───────────────────

    /// A builder call could not be satisfied by the current query state,
    /// e.g. a join condition added before any join exists.
    #[error("malformed query: {0}")]
    InvalidQuery(String),

    /// A clause requires a capability the target dialect does not declare.
    #[error("dialect does not support {0}")]
    Unsupported(String),

    // ── Execution errors ─────────────────────────────────────────────

    /// An error surfaced by the execution adapter, message-wrapped.
    #[error("database error: {0}")]
    Database(String),

    /// A single-row terminal matched no rows.
    #[error("object does not exist: {0}")]
    DoesNotExist(String),

    /// A single-row terminal matched more than one row.
    #[error("multiple objects returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    /// The execution was cancelled through the database handle's
    /// cancellation token before the adapter completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl QuarryError {
    /// Returns `true` for errors that indicate mis-configuration rather
    /// than a runtime failure. Configuration errors should abort startup;
    /// retrying them cannot succeed.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::UnknownRelation { .. }
        )
    }

    /// Returns `true` when the error represents a missing-row outcome.
    ///
    /// "No rows" is distinct from a true failure: the statistics counters
    /// treat it as a success, and callers frequently map it to an `Option`.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::DoesNotExist(_))
    }
}

/// A convenience type alias for `Result<T, QuarryError>`.
pub type QuarryResult<T> = Result<T, QuarryError>;
