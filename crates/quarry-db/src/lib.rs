//! # quarry-db
//!
//! The quarry engine: a dialect-aware SQL query builder and relation
//! resolver. A [`SelectQuery`](query::SelectQuery) accumulates clause
//! fragments through fluent calls and renders them into one statement on a
//! terminal call, consulting the [`Dialect`](dialect::Dialect) capability
//! registry to decide whether a feature is emitted natively or through a
//! portable fallback.
//!
//! ## Architecture
//!
//! Rendering is lazy and pure: builder methods only mutate fragment lists,
//! and `to_sql()` is a deterministic function of the accumulated state. A
//! builder call that cannot be satisfied records a sticky error that every
//! later call surfaces, so a partially built statement never executes.
//!
//! Declared relations resolve along two paths: to-one edges are inlined
//! into the primary statement as LEFT JOINs with aliased columns, and
//! to-many edges run as deferred follow-up statements scoped to the parent
//! keys the primary scan materialized — one statement per relation, never
//! one per row.
//!
//! All I/O goes through the [`ExecuteAdapter`](db::ExecuteAdapter) trait;
//! the engine renders text, runs the statement hook pipeline around the
//! adapter call, and maps rows back onto models.
//!
//! ## Module Overview
//!
//! - [`dialect`] - Capability bit-set and literal rendering per backend
//! - [`fragment`] - SQL snippets plus bound arguments
//! - [`value`] / [`row`] - Backend-agnostic values and result rows
//! - [`table`] - Table/field/relation metadata
//! - [`model`] - The [`Model`](model::Model) trait and lifecycle hooks
//! - [`query`] - Query assembly, relation resolution, CRUD paths
//! - [`hook`] - Statement-level hook pipeline
//! - [`db`] - The database handle and execution adapter trait
//! - [`config`] - Connection configuration

// format_push_string: format! with push_str reads better than write! for
// SQL assembly, which never fails on a String sink.
#![allow(clippy::format_push_string)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::result_large_err)]

pub mod config;
pub mod db;
pub mod dialect;
pub mod fragment;
pub mod hook;
pub mod model;
pub mod query;
pub mod row;
pub mod table;
pub mod value;

// Re-export the most commonly used types at the crate root.
pub use config::DatabaseConfig;
pub use db::{Db, DbStats, ExecuteAdapter};
pub use dialect::{Dialect, DialectName, DialectSpec, Feature, ENGINE_VERSION};
pub use fragment::{Fragment, SepFragment};
pub use hook::{ExecOutcome, QueryEvent, QueryHook, TracingQueryHook};
pub use model::{Model, NoModel};
pub use query::{
    delete_many, delete_model, insert_many, insert_model, update_model, RelationOptions,
    RelationQuery, SelectQuery,
};
pub use row::{FromValue, Row};
pub use table::{Field, JoinTable, Relation, RelationKind, Table};
pub use value::Value;
