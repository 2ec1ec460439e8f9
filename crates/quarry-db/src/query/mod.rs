//! Query construction and execution.
//!
//! [`select`] holds the assembly engine: the fluent [`SelectQuery`](select::SelectQuery)
//! builder and its terminal operations. [`relation`] resolves the model's
//! declared relation graph — to-one edges are inlined into the primary
//! statement, to-many edges run as deferred follow-up statements. [`crud`]
//! provides the insert/update/delete execution paths that carry the
//! model-level lifecycle hooks.

pub mod crud;
pub mod relation;
pub mod select;

pub use crud::{delete_many, delete_model, insert_many, insert_model, update_model};
pub use relation::{RelationOptions, RelationQuery};
pub use select::SelectQuery;
