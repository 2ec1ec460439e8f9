//! Dialect capability registry.
//!
//! A [`Dialect`] describes one SQL backend as data: a [`Feature`] bit-set
//! gating syntax the engine may emit, the identifier quote character, and the
//! literal-rendering rules for [`Value`]s. The engine is parameterized by a
//! dialect instead of subclassed per backend, so backend differences stay in
//! this one place.
//!
//! Dialects are immutable after construction and shared behind `Arc` by every
//! query built against them.

use crate::value::Value;
use quarry_core::{QuarryError, QuarryResult};

/// The engine version a dialect must be built against.
///
/// A [`DialectSpec`] declaring a different version is rejected at
/// construction time; a mismatched dialect must never make it to query
/// rendering.
pub const ENGINE_VERSION: u32 = 1;

bitflags::bitflags! {
    /// Discrete SQL capabilities a backend may support.
    ///
    /// A set bit means the backend supports the feature natively; the engine
    /// either gates emission on the bit or falls back to a portable spelling.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Feature: u32 {
        /// `WITH ...` common table expressions.
        const CTE = 1 << 0;
        /// `WITH ... AS (VALUES ...)` literal row sources.
        const WITH_VALUES = 1 << 1;
        /// `RETURNING` on UPDATE/DELETE.
        const RETURNING = 1 << 2;
        /// `RETURNING` on INSERT.
        const INSERT_RETURNING = 1 << 3;
        /// `DEFAULT` usable as a value placeholder in VALUES lists.
        const DEFAULT_PLACEHOLDER = 1 << 4;
        /// `expr::type` cast syntax.
        const DOUBLE_COLON_CAST = 1 << 5;
        /// `INSERT ... ON CONFLICT` upserts.
        const ON_CONFLICT = 1 << 6;
        /// `SELECT EXISTS (...)` as a boolean expression.
        const SELECT_EXISTS = 1 << 7;
        /// Identity columns in table definitions.
        const TABLE_IDENTITY = 1 << 8;
        /// `GENERATED ... AS IDENTITY` column syntax.
        const GENERATED_IDENTITY = 1 << 9;
        /// Composite `(a, b) IN ((...), (...))` predicates.
        const COMPOSITE_IN = 1 << 10;
    }
}

/// Identifies a SQL backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectName {
    /// PostgreSQL.
    Postgres,
    /// SQLite.
    Sqlite,
    /// MySQL / MariaDB.
    Mysql,
}

impl std::fmt::Display for DialectName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Mysql => write!(f, "mysql"),
        }
    }
}

/// Declarative description of a dialect, used to build custom [`Dialect`]s.
#[derive(Debug, Clone)]
pub struct DialectSpec {
    /// The backend family this dialect targets.
    pub name: DialectName,
    /// The engine version the dialect was written against. Must equal
    /// [`ENGINE_VERSION`].
    pub engine_version: u32,
    /// Supported capabilities.
    pub features: Feature,
    /// The identifier quote character (`"` or `` ` ``).
    pub ident_quote: char,
    /// A column expression injected into the SELECT list when a LIMIT is
    /// present without ORDER BY, for backends that reject order-less LIMIT.
    pub synthetic_limit_order: Option<&'static str>,
    /// Column suffix used to declare an auto-generated identity column.
    pub identity_column: &'static str,
}

/// A SQL backend profile: capability bit-set plus rendering rules.
#[derive(Debug)]
pub struct Dialect {
    name: DialectName,
    features: Feature,
    ident_quote: char,
    synthetic_limit_order: Option<&'static str>,
    identity_column: &'static str,
}

impl Dialect {
    /// Builds a dialect from a spec, verifying the declared engine version.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `spec.engine_version` differs from
    /// [`ENGINE_VERSION`]. This is fatal at startup, never at query time.
    pub fn new(spec: DialectSpec) -> QuarryResult<Self> {
        if spec.engine_version != ENGINE_VERSION {
            return Err(QuarryError::Configuration(format!(
                "dialect {} targets engine version {}, expected {}",
                spec.name, spec.engine_version, ENGINE_VERSION
            )));
        }
        Ok(Self {
            name: spec.name,
            features: spec.features,
            ident_quote: spec.ident_quote,
            synthetic_limit_order: spec.synthetic_limit_order,
            identity_column: spec.identity_column,
        })
    }

    /// The PostgreSQL profile.
    pub fn postgres() -> Self {
        Self {
            name: DialectName::Postgres,
            features: Feature::CTE
                | Feature::WITH_VALUES
                | Feature::RETURNING
                | Feature::INSERT_RETURNING
                | Feature::DEFAULT_PLACEHOLDER
                | Feature::DOUBLE_COLON_CAST
                | Feature::ON_CONFLICT
                | Feature::SELECT_EXISTS
                | Feature::TABLE_IDENTITY
                | Feature::GENERATED_IDENTITY
                | Feature::COMPOSITE_IN,
            ident_quote: '"',
            synthetic_limit_order: None,
            identity_column: " GENERATED BY DEFAULT AS IDENTITY",
        }
    }

    /// The SQLite profile.
    pub fn sqlite() -> Self {
        Self {
            name: DialectName::Sqlite,
            features: Feature::CTE
                | Feature::WITH_VALUES
                | Feature::RETURNING
                | Feature::INSERT_RETURNING
                | Feature::ON_CONFLICT
                | Feature::COMPOSITE_IN,
            ident_quote: '"',
            synthetic_limit_order: None,
            identity_column: " AUTOINCREMENT",
        }
    }

    /// The MySQL profile.
    pub fn mysql() -> Self {
        Self {
            name: DialectName::Mysql,
            features: Feature::CTE | Feature::ON_CONFLICT | Feature::TABLE_IDENTITY,
            ident_quote: '`',
            synthetic_limit_order: None,
            identity_column: " AUTO_INCREMENT",
        }
    }

    /// Returns the backend family.
    pub const fn name(&self) -> DialectName {
        self.name
    }

    /// Returns `true` if the dialect declares every bit in `feature`.
    pub const fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(feature)
    }

    /// The column expression to inject when a LIMIT has no ORDER BY, if the
    /// backend requires one.
    pub const fn synthetic_limit_order(&self) -> Option<&'static str> {
        self.synthetic_limit_order
    }

    /// The suffix that declares an auto-generated identity column.
    pub const fn identity_column(&self) -> &'static str {
        self.identity_column
    }

    /// Appends `ident` to `out` wrapped in the dialect's quote character.
    ///
    /// An embedded quote character is doubled.
    pub fn push_ident(&self, out: &mut String, ident: &str) {
        out.push(self.ident_quote);
        for ch in ident.chars() {
            if ch == self.ident_quote {
                out.push(ch);
            }
            out.push(ch);
        }
        out.push(self.ident_quote);
    }

    /// Appends an unsigned 32-bit literal.
    ///
    /// PostgreSQL has no unsigned types, so values are reinterpreted as
    /// signed 32-bit; other backends render the plain digits.
    pub fn push_uint32(&self, out: &mut String, n: u32) {
        match self.name {
            DialectName::Postgres => out.push_str(&(n as i32).to_string()),
            _ => out.push_str(&n.to_string()),
        }
    }

    /// Appends an unsigned 64-bit literal, reinterpreted as signed on
    /// PostgreSQL.
    pub fn push_uint64(&self, out: &mut String, n: u64) {
        match self.name {
            DialectName::Postgres => out.push_str(&(n as i64).to_string()),
            _ => out.push_str(&n.to_string()),
        }
    }

    /// Appends `value` to `out` as a dialect-correct SQL literal.
    pub fn push_value(&self, out: &mut String, value: &Value) {
        match value {
            Value::Null => out.push_str("NULL"),
            Value::Bool(true) => out.push_str("TRUE"),
            Value::Bool(false) => out.push_str("FALSE"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Uint(u) => self.push_uint64(out, *u),
            Value::Float(f) => out.push_str(&f.to_string()),
            Value::String(s) => self.push_string(out, s),
            Value::Bytes(b) => self.push_bytes(out, b),
            Value::Date(d) => self.push_string(out, &d.to_string()),
            Value::DateTime(dt) => self.push_string(out, &dt.to_string()),
            Value::DateTimeTz(dt) => self.push_string(out, &dt.to_rfc3339()),
            Value::Uuid(u) => self.push_string(out, &u.to_string()),
            Value::Json(j) => self.push_string(out, &j.to_string()),
            Value::List(vals) => {
                out.push('(');
                for (i, v) in vals.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.push_value(out, v);
                }
                out.push(')');
            }
        }
    }

    fn push_string(&self, out: &mut String, s: &str) {
        out.push('\'');
        for ch in s.chars() {
            if ch == '\'' {
                out.push('\'');
            }
            out.push(ch);
        }
        out.push('\'');
    }

    fn push_bytes(&self, out: &mut String, bytes: &[u8]) {
        match self.name {
            DialectName::Postgres => out.push_str("'\\x"),
            _ => out.push_str("X'"),
        }
        for b in bytes {
            out.push_str(&format!("{b:02x}"));
        }
        out.push('\'');
    }
}
