//! Table, field, and relation metadata.
//!
//! The engine consumes this metadata read-only: a [`Table`] is an ordered
//! sequence of [`Field`]s plus the [`Relation`]s declared from its model to
//! others. Metadata is produced once per model type (typically inside a
//! `LazyLock` in the `Model::table` implementation) and shared as
//! `&'static` thereafter, so unsynchronized concurrent reads are safe.

/// One column of a table: a logical field name and its SQL column name.
///
/// The logical name is what `Model::field_values` reports and what relation
/// declarations refer to; the column name is what rendering emits. They are
/// usually identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Logical field name.
    pub name: &'static str,
    /// SQL column name.
    pub column: &'static str,
}

impl Field {
    /// Creates a field whose column name equals its logical name.
    pub const fn new(name: &'static str) -> Self {
        Self { name, column: name }
    }

    /// Overrides the SQL column name.
    #[must_use]
    pub const fn with_column(mut self, column: &'static str) -> Self {
        self.column = column;
        self
    }
}

/// The kind of edge a [`Relation`] describes.
///
/// To-one kinds (`HasOne`, `BelongsTo`) are inlined into the primary
/// statement as joins; to-many kinds (`HasMany`, `ManyToMany`) are resolved
/// with a deferred follow-up statement after the primary scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// The related row holds a foreign key back to this model (one-to-one,
    /// owning side here).
    HasOne,
    /// This model holds the foreign key to the related row.
    BelongsTo,
    /// Many related rows hold a foreign key back to this model.
    HasMany,
    /// Related through a join table.
    ManyToMany,
}

impl RelationKind {
    /// Returns `true` for kinds resolved by inlining a join into the
    /// primary statement.
    pub const fn is_inline(self) -> bool {
        matches!(self, Self::HasOne | Self::BelongsTo)
    }
}

/// The join table of a [`RelationKind::ManyToMany`] relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    /// Join table name.
    pub name: &'static str,
    /// Columns referencing the owning model's key fields, in order.
    pub src_columns: &'static [&'static str],
    /// Columns referencing the related model's key fields, in order.
    pub dst_columns: &'static [&'static str],
}

/// One named edge from an owning model to a related model.
///
/// `base_fields` and `related_fields` are parallel lists of logical field
/// names; entry *i* of one matches entry *i* of the other. For `HasOne` and
/// `HasMany` the related side holds the foreign key; for `BelongsTo` the
/// base side does. `ManyToMany` routes both sides through `join_table`.
///
/// The related table is reached through a function pointer so mutually
/// related tables can both be declared as statics.
#[derive(Debug, Clone)]
pub struct Relation {
    /// The name relations are looked up by.
    pub name: &'static str,
    /// Edge kind; decides inline vs deferred resolution.
    pub kind: RelationKind,
    /// Accessor for the related table's metadata.
    pub related: fn() -> &'static Table,
    /// Key fields on the owning model.
    pub base_fields: &'static [&'static str],
    /// Key fields on the related model.
    pub related_fields: &'static [&'static str],
    /// Join table, required for `ManyToMany` and ignored otherwise.
    pub join_table: Option<JoinTable>,
    /// Raw SQL conditions always applied when the relation is resolved.
    pub conditions: &'static [&'static str],
}

/// Metadata for one mapped table.
#[derive(Debug, Clone)]
pub struct Table {
    /// SQL table name.
    pub name: &'static str,
    /// Alias used to qualify columns; defaults to the table name.
    pub alias: &'static str,
    /// Logical name of the primary key field.
    pub pk: &'static str,
    /// Ordered fields.
    pub fields: Vec<Field>,
    /// Declared relations, forming a directed acyclic join graph.
    pub relations: Vec<Relation>,
}

impl Table {
    /// Creates a table with no fields or relations, aliased to its own name
    /// and keyed by `id`.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            alias: name,
            pk: "id",
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Looks up a field by logical name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the SQL column name for a logical field name.
    pub fn column_of(&self, name: &str) -> Option<&'static str> {
        self.field(name).map(|f| f.column)
    }

    /// Looks up a relation by name.
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// The primary key field.
    pub fn pk_field(&self) -> Option<&Field> {
        self.field(self.pk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Table {
        Table {
            name: "users",
            alias: "u",
            pk: "id",
            fields: vec![
                Field::new("id"),
                Field::new("full_name").with_column("name"),
            ],
            relations: vec![Relation {
                name: "orders",
                kind: RelationKind::HasMany,
                related: orders_table,
                base_fields: &["id"],
                related_fields: &["user_id"],
                join_table: None,
                conditions: &[],
            }],
        }
    }

    fn orders_table() -> &'static Table {
        use std::sync::LazyLock;
        static TABLE: LazyLock<Table> = LazyLock::new(|| Table {
            fields: vec![Field::new("id"), Field::new("user_id")],
            ..Table::new("orders")
        });
        &TABLE
    }

    #[test]
    fn test_field_lookup() {
        let t = users();
        assert_eq!(t.field("id").unwrap().column, "id");
        assert_eq!(t.column_of("full_name"), Some("name"));
        assert!(t.field("missing").is_none());
    }

    #[test]
    fn test_relation_lookup() {
        let t = users();
        let rel = t.relation("orders").unwrap();
        assert_eq!(rel.kind, RelationKind::HasMany);
        assert_eq!((rel.related)().name, "orders");
        assert!(t.relation("nope").is_none());
    }

    #[test]
    fn test_pk_field() {
        let t = users();
        assert_eq!(t.pk_field().unwrap().name, "id");
    }

    #[test]
    fn test_inline_kinds() {
        assert!(RelationKind::HasOne.is_inline());
        assert!(RelationKind::BelongsTo.is_inline());
        assert!(!RelationKind::HasMany.is_inline());
        assert!(!RelationKind::ManyToMany.is_inline());
    }

    #[test]
    fn test_table_new_defaults() {
        let t = Table::new("things");
        assert_eq!(t.alias, "things");
        assert_eq!(t.pk, "id");
        assert!(t.fields.is_empty());
    }
}
