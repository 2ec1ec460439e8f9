//! SQL fragments: raw snippets plus their bound arguments.
//!
//! Every clause a query accumulates is stored as a [`Fragment`] — the SQL
//! text exactly as the caller wrote it, with `?` marking positional argument
//! slots. Rendering substitutes each slot with the dialect-formatted literal
//! of the corresponding [`Value`]. [`SepFragment`] adds the separator used
//! when a fragment is joined to the one before it (WHERE and join-ON lists).

use crate::dialect::Dialect;
use crate::value::Value;
use quarry_core::{QuarryError, QuarryResult};

/// A SQL snippet plus its ordered bound arguments.
///
/// Fragments are immutable once appended to a query; cloning a query clones
/// its fragments defensively.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    sql: String,
    args: Vec<Value>,
}

impl Fragment {
    /// Creates a fragment with bound arguments. Each `?` in `sql` consumes
    /// one argument in order; `??` renders a literal question mark.
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// Creates an argument-free fragment.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Creates a fragment holding a single quoted identifier.
    pub fn ident(name: &str, dialect: &Dialect) -> Self {
        let mut sql = String::with_capacity(name.len() + 2);
        dialect.push_ident(&mut sql, name);
        Self::raw(sql)
    }

    /// Returns the raw SQL text (argument slots unexpanded).
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the bound arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Returns `true` if the fragment has no text.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// Renders the fragment into `out`, expanding each `?` slot into the
    /// dialect literal of the matching argument and recording the consumed
    /// arguments into `used`.
    ///
    /// # Errors
    ///
    /// Fails when the number of `?` slots does not match the number of bound
    /// arguments; a mismatched fragment must never produce partial SQL.
    pub fn render_into(
        &self,
        out: &mut String,
        used: &mut Vec<Value>,
        dialect: &Dialect,
    ) -> QuarryResult<()> {
        let mut next_arg = 0;
        let mut chars = self.sql.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '?' {
                out.push(ch);
                continue;
            }
            if chars.peek() == Some(&'?') {
                chars.next();
                out.push('?');
                continue;
            }
            let Some(arg) = self.args.get(next_arg) else {
                return Err(self.arity_error());
            };
            dialect.push_value(out, arg);
            used.push(arg.clone());
            next_arg += 1;
        }
        if next_arg != self.args.len() {
            return Err(self.arity_error());
        }
        Ok(())
    }

    fn arity_error(&self) -> QuarryError {
        QuarryError::InvalidQuery(format!(
            "fragment {:?} has {} argument slots but {} bound arguments",
            self.sql,
            self.sql.matches('?').count() - 2 * self.sql.matches("??").count(),
            self.args.len()
        ))
    }
}

/// A fragment joined to its predecessor by a separator (` AND `, ` OR `,
/// `, `).
///
/// The separator belongs to the fragment it precedes: a WHERE list renders
/// `f0`, then `f1.sep f1`, then `f2.sep f2`, and so on. The first fragment's
/// separator is not emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct SepFragment {
    sep: &'static str,
    fragment: Fragment,
}

impl SepFragment {
    /// Couples `fragment` with the separator used to join it to the previous
    /// fragment in its list.
    pub fn new(sep: &'static str, fragment: Fragment) -> Self {
        Self { sep, fragment }
    }

    /// The joining separator.
    pub const fn sep(&self) -> &'static str {
        self.sep
    }

    /// The wrapped fragment.
    pub const fn fragment(&self) -> &Fragment {
        &self.fragment
    }
}

/// Renders a separator-joined list into `out`, parenthesizing each entry.
///
/// Produces `(f0) SEP1 (f1) SEP2 (f2)`; used for WHERE clauses and join ON
/// lists so caller-supplied snippets cannot bleed precedence into each other.
pub fn render_sep_list(
    list: &[SepFragment],
    out: &mut String,
    used: &mut Vec<Value>,
    dialect: &Dialect,
) -> QuarryResult<()> {
    for (i, entry) in list.iter().enumerate() {
        if i > 0 {
            out.push_str(entry.sep());
        }
        out.push('(');
        entry.fragment().render_into(out, used, dialect)?;
        out.push(')');
    }
    Ok(())
}
