//! The `Model` trait: metadata access, row hydration, and lifecycle hooks.
//!
//! A model is any struct mapped to a table. The trait carries three concerns:
//! static metadata (`table`), hydration (`from_row`, `attach_related`), and
//! the optional per-entity lifecycle hooks. Hooks have default no-op bodies,
//! so a model participates in a lifecycle event exactly when it overrides
//! the corresponding method; the check is resolved at compile time, once per
//! model type, with no runtime capability probing.

use crate::row::Row;
use crate::table::Table;
use crate::value::Value;
use quarry_core::{QuarryError, QuarryResult};

/// The core trait for all mapped models.
///
/// # Examples
///
/// ```
/// use quarry_db::model::Model;
/// use quarry_db::row::Row;
/// use quarry_db::table::{Field, Table};
/// use quarry_db::value::Value;
/// use quarry_core::QuarryResult;
///
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl Model for User {
///     fn table() -> &'static Table {
///         use std::sync::LazyLock;
///         static TABLE: LazyLock<Table> = LazyLock::new(|| Table {
///             fields: vec![Field::new("id"), Field::new("name")],
///             ..Table::new("users")
///         });
///         &TABLE
///     }
///
///     fn from_row(row: &Row) -> QuarryResult<Self> {
///         Ok(User {
///             id: row.get("id")?,
///             name: row.get("name")?,
///         })
///     }
///
///     fn pk(&self) -> Option<Value> {
///         (self.id != 0).then(|| Value::Int(self.id))
///     }
///
///     fn set_pk(&mut self, value: Value) {
///         if let Value::Int(id) = value {
///             self.id = id;
///         }
///     }
///
///     fn field_values(&self) -> Vec<(&'static str, Value)> {
///         vec![
///             ("id", Value::Int(self.id)),
///             ("name", Value::String(self.name.clone())),
///         ]
///     }
/// }
/// ```
pub trait Model: Send + Sync + Sized + 'static {
    /// Returns the static table metadata for this model type.
    fn table() -> &'static Table;

    /// Constructs an instance from a result row.
    fn from_row(row: &Row) -> QuarryResult<Self>;

    /// Returns the primary key value, or `None` when unsaved.
    fn pk(&self) -> Option<Value>;

    /// Sets the primary key (used after INSERT with a returned id).
    fn set_pk(&mut self, value: Value);

    /// Returns all field name-value pairs for this instance.
    fn field_values(&self) -> Vec<(&'static str, Value)>;

    /// Returns the value of one logical field, if the model reports it.
    fn field_value(&self, name: &str) -> Option<Value> {
        self.field_values()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Returns field name-value pairs excluding the primary key.
    fn non_pk_field_values(&self) -> Vec<(&'static str, Value)> {
        let pk = Self::table().pk;
        self.field_values()
            .into_iter()
            .filter(|(name, _)| *name != pk)
            .collect()
    }

    /// Receives the rows of one deferred to-many relation after the primary
    /// scan. `relation` is the declared relation name; `rows` are the
    /// related rows belonging to this instance. The default drops them.
    fn attach_related(&mut self, relation: &str, rows: Vec<Row>) {
        let _ = (relation, rows);
    }

    // ── Lifecycle hooks (override to participate) ─────────────────────

    /// Called once per SELECT statement, before rendering. Failing aborts
    /// the statement.
    fn before_select() -> QuarryResult<()> {
        Ok(())
    }

    /// Called per entity after a SELECT completes, relations included.
    fn after_select(&mut self) -> QuarryResult<()> {
        Ok(())
    }

    /// Called per entity immediately after its row is mapped, before
    /// relation resolution.
    fn after_scan(&mut self) -> QuarryResult<()> {
        Ok(())
    }

    /// Called per entity before it is inserted. The first failing entity
    /// aborts the batch.
    fn before_insert(&mut self) -> QuarryResult<()> {
        Ok(())
    }

    /// Called per entity after a successful insert.
    fn after_insert(&mut self) -> QuarryResult<()> {
        Ok(())
    }

    /// Called before an update. A failure aborts the statement.
    fn before_update(&mut self) -> QuarryResult<()> {
        Ok(())
    }

    /// Called after a successful update.
    fn after_update(&mut self) -> QuarryResult<()> {
        Ok(())
    }

    /// Called per entity before it is deleted. The first failing entity
    /// aborts the batch.
    fn before_delete(&mut self) -> QuarryResult<()> {
        Ok(())
    }

    /// Called per entity after a successful delete.
    fn after_delete(&mut self) -> QuarryResult<()> {
        Ok(())
    }
}

/// The placeholder model for queries built without a model binding.
///
/// Such queries render `SELECT *` (or the explicitly selected columns) and
/// are consumed through `fetch_rows`; hydrating a `NoModel` is an error.
pub struct NoModel;

impl Model for NoModel {
    fn table() -> &'static Table {
        use std::sync::LazyLock;
        static TABLE: LazyLock<Table> = LazyLock::new(|| Table::new(""));
        &TABLE
    }

    fn from_row(_row: &Row) -> QuarryResult<Self> {
        Err(QuarryError::InvalidQuery(
            "query has no model bound; use fetch_rows".to_string(),
        ))
    }

    fn pk(&self) -> Option<Value> {
        None
    }

    fn set_pk(&mut self, _value: Value) {}

    fn field_values(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Field;
    use std::sync::LazyLock;

    struct Widget {
        id: i64,
        label: String,
    }

    impl Model for Widget {
        fn table() -> &'static Table {
            static TABLE: LazyLock<Table> = LazyLock::new(|| Table {
                fields: vec![Field::new("id"), Field::new("label")],
                ..Table::new("widgets")
            });
            &TABLE
        }

        fn from_row(row: &Row) -> QuarryResult<Self> {
            Ok(Self {
                id: row.get("id")?,
                label: row.get("label")?,
            })
        }

        fn pk(&self) -> Option<Value> {
            (self.id != 0).then(|| Value::Int(self.id))
        }

        fn set_pk(&mut self, value: Value) {
            if let Value::Int(id) = value {
                self.id = id;
            }
        }

        fn field_values(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", Value::Int(self.id)),
                ("label", Value::String(self.label.clone())),
            ]
        }
    }

    #[test]
    fn test_field_value_lookup() {
        let w = Widget {
            id: 3,
            label: "bolt".into(),
        };
        assert_eq!(w.field_value("id"), Some(Value::Int(3)));
        assert_eq!(w.field_value("missing"), None);
    }

    #[test]
    fn test_non_pk_field_values_excludes_pk() {
        let w = Widget {
            id: 3,
            label: "bolt".into(),
        };
        let fields = w.non_pk_field_values();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, "label");
    }

    #[test]
    fn test_default_hooks_are_noops() {
        let mut w = Widget {
            id: 1,
            label: "nut".into(),
        };
        assert!(Widget::before_select().is_ok());
        assert!(w.after_scan().is_ok());
        assert!(w.before_insert().is_ok());
        assert!(w.after_delete().is_ok());
    }

    #[test]
    fn test_no_model_from_row_fails() {
        let row = Row::new(vec!["x".into()], vec![Value::Int(1)]);
        assert!(NoModel::from_row(&row).is_err());
    }

    #[test]
    fn test_attach_related_default_drops() {
        let mut w = Widget {
            id: 1,
            label: "nut".into(),
        };
        w.attach_related("anything", vec![]); // must not panic
    }
}
