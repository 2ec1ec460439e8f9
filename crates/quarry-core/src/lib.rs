//! # quarry-core
//!
//! Foundation types for the quarry ORM. This crate has no knowledge of SQL,
//! dialects, or queries; it provides the error enum shared by every other
//! crate and the logging bootstrap helpers.
//!
//! ## Modules
//!
//! - [`error`] - [`QuarryError`] and the [`QuarryResult`] alias
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;

// Re-export the most commonly used types at the crate root.
pub use error::{QuarryError, QuarryResult};
