//! Insert, update, and delete execution paths.
//!
//! These free functions render the mutation statements for model instances
//! and carry the model-level lifecycle hooks around them: `before_*` hooks
//! stop the batch at the first error, `after_*` hooks run over the whole
//! batch and report the first error collected. Generated keys are read back
//! through `RETURNING` when the dialect declares the capability, falling
//! back to the adapter's generated-key report for single inserts.

use crate::db::Db;
use crate::dialect::Feature;
use crate::hook;
use crate::model::Model;
use crate::table::Field;
use crate::value::Value;
use quarry_core::{QuarryError, QuarryResult};

/// Inserts one model, setting its primary key from the generated value when
/// the backend reports one.
pub async fn insert_model<M: Model>(db: &Db, model: &mut M) -> QuarryResult<()> {
    insert_many(db, std::slice::from_mut(model)).await
}

/// Inserts a batch of models with one multi-row statement.
pub async fn insert_many<M: Model>(db: &Db, models: &mut [M]) -> QuarryResult<()> {
    if models.is_empty() {
        return Ok(());
    }
    hook::run_before_batch(models, M::before_insert)?;

    let table = M::table();
    let dialect = db.dialect();
    let columns: Vec<&Field> = table
        .fields
        .iter()
        .filter(|f| f.name != table.pk)
        .collect();
    if columns.is_empty() {
        return Err(QuarryError::InvalidQuery(format!(
            "table {:?} has no insertable fields",
            table.name
        )));
    }

    let mut sql = String::from("INSERT INTO ");
    dialect.push_ident(&mut sql, table.name);
    sql.push_str(" (");
    for (i, field) in columns.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        dialect.push_ident(&mut sql, field.column);
    }
    sql.push_str(") VALUES ");

    let mut args = Vec::new();
    for (i, model) in models.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        let values = model.field_values();
        for (j, field) in columns.iter().enumerate() {
            if j > 0 {
                sql.push_str(", ");
            }
            let value = values
                .iter()
                .find(|(name, _)| *name == field.name)
                .map_or(Value::Null, |(_, v)| v.clone());
            dialect.push_value(&mut sql, &value);
            args.push(value);
        }
        sql.push(')');
    }

    let pk_column = table.column_of(table.pk);
    match pk_column {
        Some(pk_column) if dialect.has_feature(Feature::INSERT_RETURNING) => {
            sql.push_str(" RETURNING ");
            dialect.push_ident(&mut sql, pk_column);
            let rows = db.run_rows(Some(table.name), "INSERT", sql, args).await?;
            for (model, row) in models.iter_mut().zip(rows) {
                if let Some(value) = row.get_value(pk_column) {
                    model.set_pk(value.clone());
                }
            }
        }
        _ if models.len() == 1 => {
            let key = db.run_insert_returning(Some(table.name), sql, args).await?;
            if !key.is_null() {
                models[0].set_pk(key);
            }
        }
        _ => {
            // Multi-row insert without RETURNING: keys stay unset.
            db.run_execute(Some(table.name), "INSERT", sql, args).await?;
        }
    }

    hook::run_after_batch(models, M::after_insert)
}

/// Updates all non-key fields of one saved model, keyed by its primary key.
/// Returns the affected-row count.
pub async fn update_model<M: Model>(db: &Db, model: &mut M) -> QuarryResult<u64> {
    model.before_update()?;

    let table = M::table();
    let dialect = db.dialect();
    let pk = model.pk().ok_or_else(|| {
        QuarryError::InvalidQuery("cannot update a model without a primary key".to_string())
    })?;
    let pk_column = table.column_of(table.pk).ok_or_else(|| {
        QuarryError::Configuration(format!(
            "table {:?} declares no primary key field",
            table.name
        ))
    })?;

    let fields = model.non_pk_field_values();
    if fields.is_empty() {
        model.after_update()?;
        return Ok(0);
    }

    let mut sql = String::from("UPDATE ");
    dialect.push_ident(&mut sql, table.name);
    sql.push_str(" SET ");
    let mut args = Vec::new();
    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        dialect.push_ident(&mut sql, table.column_of(name).unwrap_or(name));
        sql.push_str(" = ");
        dialect.push_value(&mut sql, value);
        args.push(value.clone());
    }
    sql.push_str(" WHERE ");
    dialect.push_ident(&mut sql, pk_column);
    sql.push_str(" = ");
    dialect.push_value(&mut sql, &pk);
    args.push(pk);

    let affected = db.run_execute(Some(table.name), "UPDATE", sql, args).await?;
    model.after_update()?;
    Ok(affected)
}

/// Deletes one saved model by primary key. Returns the affected-row count.
pub async fn delete_model<M: Model>(db: &Db, model: &mut M) -> QuarryResult<u64> {
    delete_many(db, std::slice::from_mut(model)).await
}

/// Deletes a batch of saved models with one `IN`-scoped statement.
pub async fn delete_many<M: Model>(db: &Db, models: &mut [M]) -> QuarryResult<u64> {
    if models.is_empty() {
        return Ok(0);
    }
    hook::run_before_batch(models, M::before_delete)?;

    let table = M::table();
    let dialect = db.dialect();
    let pk_column = table.column_of(table.pk).ok_or_else(|| {
        QuarryError::Configuration(format!(
            "table {:?} declares no primary key field",
            table.name
        ))
    })?;
    let pks = models
        .iter()
        .map(Model::pk)
        .collect::<Option<Vec<Value>>>()
        .ok_or_else(|| {
            QuarryError::InvalidQuery(
                "cannot delete a model without a primary key".to_string(),
            )
        })?;

    let mut sql = String::from("DELETE FROM ");
    dialect.push_ident(&mut sql, table.name);
    sql.push_str(" WHERE ");
    dialect.push_ident(&mut sql, pk_column);
    sql.push_str(" IN ");
    let key_list = Value::List(pks);
    dialect.push_value(&mut sql, &key_list);

    let affected = db
        .run_execute(Some(table.name), "DELETE", sql, vec![key_list])
        .await?;
    hook::run_after_batch(models, M::after_delete)?;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ExecuteAdapter;
    use crate::dialect::Dialect;
    use crate::row::Row;
    use crate::table::Table;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, LazyLock, Mutex};

    /// Records every statement and answers INSERT ... RETURNING with
    /// sequential ids.
    struct CaptureAdapter {
        statements: Mutex<Vec<String>>,
        next_id: AtomicI64,
    }

    impl CaptureAdapter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                statements: Mutex::new(Vec::new()),
                next_id: AtomicI64::new(1),
            })
        }

        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ExecuteAdapter for CaptureAdapter {
        async fn query_rows(&self, sql: &str) -> QuarryResult<Vec<Row>> {
            self.statements.lock().unwrap().push(sql.to_string());
            // One id per VALUES tuple.
            let rows = sql
                .split(" VALUES ")
                .nth(1)
                .map_or(1, |values| values.matches('(').count().max(1));
            Ok((0..rows)
                .map(|_| {
                    Row::new(
                        vec!["id".into()],
                        vec![Value::Int(self.next_id.fetch_add(1, Ordering::SeqCst))],
                    )
                })
                .collect())
        }

        async fn execute(&self, sql: &str) -> QuarryResult<u64> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(1)
        }
    }

    #[derive(Debug, Default)]
    struct Note {
        id: i64,
        body: String,
        fail_before_insert: bool,
    }

    impl Model for Note {
        fn table() -> &'static Table {
            static TABLE: LazyLock<Table> = LazyLock::new(|| Table {
                fields: vec![Field::new("id"), Field::new("body")],
                ..Table::new("notes")
            });
            &TABLE
        }

        fn from_row(row: &Row) -> QuarryResult<Self> {
            Ok(Self {
                id: row.get("id")?,
                body: row.get("body").unwrap_or_default(),
                fail_before_insert: false,
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
                ("body", Value::String(self.body.clone())),
            ]
        }

        fn before_insert(&mut self) -> QuarryResult<()> {
            if self.fail_before_insert {
                Err(QuarryError::Database("before_insert veto".into()))
            } else {
                Ok(())
            }
        }
    }

    fn note(body: &str) -> Note {
        Note {
            body: body.into(),
            ..Note::default()
        }
    }

    #[tokio::test]
    async fn test_insert_uses_returning_on_postgres() {
        let adapter = CaptureAdapter::new();
        let db = Db::new(adapter.clone(), Dialect::postgres());
        let mut notes = [note("a"), note("b")];
        insert_many(&db, &mut notes).await.unwrap();

        let statements = adapter.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0],
            "INSERT INTO \"notes\" (\"body\") VALUES ('a'), ('b') RETURNING \"id\""
        );
        assert_eq!(notes[0].id, 1);
        assert_eq!(notes[1].id, 2);
    }

    #[tokio::test]
    async fn test_insert_without_returning_on_mysql() {
        let adapter = CaptureAdapter::new();
        let db = Db::new(adapter.clone(), Dialect::mysql());
        let mut notes = [note("a"), note("b")];
        insert_many(&db, &mut notes).await.unwrap();

        let statements = adapter.statements();
        assert!(!statements[0].contains("RETURNING"));
        // Multi-row insert without RETURNING leaves keys unset.
        assert_eq!(notes[0].id, 0);
    }

    #[tokio::test]
    async fn test_before_insert_veto_aborts_batch() {
        let adapter = CaptureAdapter::new();
        let db = Db::new(adapter.clone(), Dialect::postgres());
        let mut notes = [note("a"), note("b")];
        notes[1].fail_before_insert = true;
        let err = insert_many(&db, &mut notes).await.unwrap_err();
        assert_eq!(err, QuarryError::Database("before_insert veto".into()));
        assert!(adapter.statements().is_empty());
    }

    #[tokio::test]
    async fn test_update_renders_set_and_pk_filter() {
        let adapter = CaptureAdapter::new();
        let db = Db::new(adapter.clone(), Dialect::postgres());
        let mut saved = Note {
            id: 7,
            body: "new".into(),
            fail_before_insert: false,
        };
        let affected = update_model(&db, &mut saved).await.unwrap();
        assert_eq!(affected, 1);
        assert_eq!(
            adapter.statements()[0],
            "UPDATE \"notes\" SET \"body\" = 'new' WHERE \"id\" = 7"
        );
    }

    #[tokio::test]
    async fn test_update_unsaved_model_fails() {
        let adapter = CaptureAdapter::new();
        let db = Db::new(adapter, Dialect::postgres());
        let mut unsaved = note("x");
        assert!(update_model(&db, &mut unsaved).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_many_scopes_by_key_list() {
        let adapter = CaptureAdapter::new();
        let db = Db::new(adapter.clone(), Dialect::postgres());
        let mut notes = [
            Note {
                id: 1,
                ..Note::default()
            },
            Note {
                id: 2,
                ..Note::default()
            },
        ];
        delete_many(&db, &mut notes).await.unwrap();
        assert_eq!(
            adapter.statements()[0],
            "DELETE FROM \"notes\" WHERE \"id\" IN (1, 2)"
        );
    }

    #[tokio::test]
    async fn test_delete_unsaved_model_fails() {
        let adapter = CaptureAdapter::new();
        let db = Db::new(adapter, Dialect::postgres());
        let mut unsaved = note("x");
        assert!(delete_model(&db, &mut unsaved).await.is_err());
    }
}
