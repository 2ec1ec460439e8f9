//! Backend-agnostic value types.
//!
//! [`Value`] is the single representation used for bound query arguments,
//! model field values, and result cells. Dialects decide how a `Value` is
//! spelled as a SQL literal; this module only carries the data.

use std::fmt;

/// A backend-agnostic database value.
///
/// Conversions from the common Rust types are provided via `From`, so call
/// sites can write `18.into()` or `"alice".into()` when binding arguments.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// SQL NULL.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit unsigned integer. Kept separate from `Int` because some
    /// backends spell large unsigned literals differently.
    Uint(u64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// Raw binary data.
    Bytes(Vec<u8>),
    /// A date without time.
    Date(chrono::NaiveDate),
    /// A date and time without timezone.
    DateTime(chrono::NaiveDateTime),
    /// A date and time in UTC.
    DateTimeTz(chrono::DateTime<chrono::Utc>),
    /// A UUID value.
    Uuid(uuid::Uuid),
    /// A JSON document.
    Json(serde_json::Value),
    /// An ordered list of values, rendered as a parenthesized tuple.
    /// Used for `IN` lists and composite-key tuples.
    List(Vec<Value>),
}

impl Value {
    /// Returns `true` if this value is `Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attempts to extract a boolean.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to extract a signed integer.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to extract a float.
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Attempts to extract a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to extract a UUID.
    pub const fn as_uuid(&self) -> Option<uuid::Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(dt) => write!(f, "{dt}"),
            Self::DateTimeTz(dt) => write!(f, "{dt}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Json(j) => write!(f, "{j}"),
            Self::List(vals) => {
                write!(f, "(")?;
                for (i, v) in vals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// ── From implementations ───────────────────────────────────────────────

macro_rules! value_from {
    ($($ty:ty => $variant:ident via $conv:expr;)*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant($conv(v))
                }
            }
        )*
    };
}

value_from! {
    bool => Bool via std::convert::identity;
    i16 => Int via i64::from;
    i32 => Int via i64::from;
    i64 => Int via std::convert::identity;
    u32 => Uint via u64::from;
    u64 => Uint via std::convert::identity;
    f32 => Float via f64::from;
    f64 => Float via std::convert::identity;
    String => String via std::convert::identity;
    Vec<u8> => Bytes via std::convert::identity;
    chrono::NaiveDate => Date via std::convert::identity;
    chrono::NaiveDateTime => DateTime via std::convert::identity;
    chrono::DateTime<chrono::Utc> => DateTimeTz via std::convert::identity;
    uuid::Uuid => Uuid via std::convert::identity;
    serde_json::Value => Json via std::convert::identity;
    Vec<Value> => List via std::convert::identity;
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
