//! # quarry
//!
//! A dialect-aware SQL query builder and relation-resolving ORM core.
//!
//! quarry translates typed in-memory models into dialect-correct SQL text
//! and re-hydrates result rows back into those models. Statements are built
//! fluently and rendered lazily; backend differences (identifier quoting,
//! `EXISTS` support, composite `IN`, identity columns) live in a
//! [`Dialect`] capability registry rather than in per-backend subclasses.
//! To-one relations fold into the primary statement as joins; to-many
//! relations load through one follow-up statement per relation, scoped to
//! the parent keys the primary scan materialized.
//!
//! This is the meta-crate that re-exports the workspace crates for
//! convenient access; depend on the individual crates for finer-grained
//! control.
//!
//! ```no_run
//! use quarry::{Db, Dialect, ExecuteAdapter};
//! use std::sync::Arc;
//!
//! # fn adapter() -> Arc<dyn ExecuteAdapter> { unimplemented!() }
//! # async fn example() -> quarry::QuarryResult<()> {
//! let db = Db::new(adapter(), Dialect::postgres());
//! let rows = db
//!     .select_raw()
//!     .table("users")
//!     .where_("age > ?", vec![18.into()])
//!     .limit(10)
//!     .fetch_rows()
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// Error types and logging bootstrap.
pub use quarry_core as core;

/// The engine: query assembly, dialect registry, relation resolver, hook
/// pipeline, and CRUD paths.
pub use quarry_db as db;

// The most commonly used types, flattened at the crate root.
pub use quarry_core::{logging, QuarryError, QuarryResult};
pub use quarry_db::{
    delete_many, delete_model, insert_many, insert_model, update_model, DatabaseConfig, Db,
    DbStats, Dialect, DialectName, DialectSpec, ExecOutcome, ExecuteAdapter, Feature, Field,
    Fragment, FromValue, JoinTable, Model, NoModel, QueryEvent, QueryHook, Relation,
    RelationKind, RelationOptions, RelationQuery, Row, SelectQuery, SepFragment, Table,
    TracingQueryHook, Value, ENGINE_VERSION,
};
