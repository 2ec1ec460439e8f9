//! Relation graph resolution.
//!
//! A query bound to a model may name relations to load. Each named relation
//! becomes a [`RelationJoin`] node in a tree rooted at the query: to-one
//! edges (`HasOne`/`BelongsTo`) are inlined into the primary statement as
//! LEFT JOINs with `alias__field` column aliases, recursively and
//! depth-first; to-many edges (`HasMany`/`ManyToMany`) are deferred and run
//! as one follow-up statement each, scoped with `IN` over the key values the
//! primary scan materialized. Deferring avoids the row duplication a single
//! joined statement would produce for one-to-many fan-out.

use crate::db::Db;
use crate::dialect::{Dialect, Feature};
use crate::fragment::{Fragment, SepFragment};
use crate::model::{Model, NoModel};
use crate::query::select::SelectQuery;
use crate::row::Row;
use crate::table::{Relation, RelationKind, Table};
use crate::value::Value;
use quarry_core::{QuarryError, QuarryResult};
use std::sync::Arc;

/// Maximum number of segments in a dotted relation path. To-one chains are
/// resolved by unbounded recursive descent in principle; the cap keeps a
/// mis-declared cyclic graph from recursing forever.
pub(crate) const MAX_RELATION_DEPTH: usize = 8;

/// Alias of the join table in a many-to-many follow-up statement.
const M2M_JOIN_ALIAS: &str = "__rel_jt";

/// Alias prefix for the parent-key columns selected alongside a
/// many-to-many follow-up, used to group rows by parent.
const M2M_KEY_PREFIX: &str = "__rel_src_";

/// A user refinement applied to one relation's statement.
pub type RelationApply = Arc<dyn Fn(RelationQuery) -> RelationQuery + Send + Sync>;

/// The refinement surface exposed to [`RelationApply`] closures.
///
/// For an inlined to-one relation, selected columns restrict the joined
/// column list and filters are merged into the primary statement's WHERE;
/// ordering and limits do not apply to inline joins and are ignored there.
/// For a deferred to-many relation, everything is applied to the follow-up
/// statement. Apply closures must be pure: they are re-evaluated on every
/// render, and rendering must stay deterministic.
#[derive(Debug, Clone, Default)]
pub struct RelationQuery {
    pub(crate) columns: Option<Vec<String>>,
    pub(crate) wheres: Vec<SepFragment>,
    pub(crate) order: Vec<Fragment>,
    pub(crate) limit: Option<i64>,
}

impl RelationQuery {
    /// Restricts the related columns to `name` (plus any previously named).
    /// Key columns needed for distribution are always re-added.
    #[must_use]
    pub fn column(mut self, name: &str) -> Self {
        self.columns.get_or_insert_with(Vec::new).push(name.to_string());
        self
    }

    /// Adds an AND-joined filter on the relation.
    #[must_use]
    pub fn where_(mut self, cond: &str, args: Vec<Value>) -> Self {
        self.wheres
            .push(SepFragment::new(" AND ", Fragment::new(cond, args)));
        self
    }

    /// Adds an OR-joined filter on the relation.
    #[must_use]
    pub fn where_or(mut self, cond: &str, args: Vec<Value>) -> Self {
        self.wheres
            .push(SepFragment::new(" OR ", Fragment::new(cond, args)));
        self
    }

    /// Adds a raw ORDER BY expression (deferred relations only).
    #[must_use]
    pub fn order_expr(mut self, sql: &str, args: Vec<Value>) -> Self {
        self.order.push(Fragment::new(sql, args));
        self
    }

    /// Caps the number of related rows (deferred relations only).
    #[must_use]
    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }
}

/// Options accepted by `SelectQuery::relation_with`.
#[derive(Default)]
pub struct RelationOptions {
    pub(crate) apply: Option<RelationApply>,
    pub(crate) extra_join_conditions: Vec<Fragment>,
}

impl RelationOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the refinement closure run over the relation's statement.
    #[must_use]
    pub fn apply(
        mut self,
        f: impl Fn(RelationQuery) -> RelationQuery + Send + Sync + 'static,
    ) -> Self {
        self.apply = Some(Arc::new(f));
        self
    }

    /// Adds a condition to the JOIN ON clause of an inlined relation.
    #[must_use]
    pub fn join_condition(mut self, cond: &str, args: Vec<Value>) -> Self {
        self.extra_join_conditions.push(Fragment::new(cond, args));
        self
    }
}

/// One resolved instantiation of a [`Relation`] for one query.
///
/// Nodes own their children, forming the query's join tree; the query owns
/// the root list. There are no back-references.
#[derive(Clone)]
pub(crate) struct RelationJoin {
    pub(crate) relation: &'static Relation,
    pub(crate) alias: String,
    pub(crate) apply: Option<RelationApply>,
    pub(crate) extra_on: Vec<SepFragment>,
    pub(crate) children: Vec<RelationJoin>,
}

impl RelationJoin {
    /// Evaluates the user refinement, or yields the empty refinement.
    pub(crate) fn refinement(&self) -> RelationQuery {
        self.apply
            .as_ref()
            .map_or_else(RelationQuery::default, |f| f(RelationQuery::default()))
    }
}

/// Resolves a dotted relation path against `root`, merging it into `joins`.
///
/// Path segments descend through to-one edges only; a to-many relation must
/// be the whole path. Repeated paths merge into one node, so
/// `relation("author")` followed by `relation("author.publisher")` yields a
/// single `author` join with one child.
pub(crate) fn add_relation_path(
    joins: &mut Vec<RelationJoin>,
    root: &'static Table,
    path: &str,
    options: RelationOptions,
) -> QuarryResult<()> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(QuarryError::InvalidQuery(format!(
            "invalid relation path {path:?}"
        )));
    }
    if segments.len() > MAX_RELATION_DEPTH {
        return Err(QuarryError::InvalidQuery(format!(
            "relation path {path:?} exceeds the maximum depth of {MAX_RELATION_DEPTH}"
        )));
    }
    add_segments(joins, root, &segments, "", options)
}

fn add_segments(
    joins: &mut Vec<RelationJoin>,
    table: &'static Table,
    segments: &[&str],
    alias_prefix: &str,
    options: RelationOptions,
) -> QuarryResult<()> {
    let name = segments[0];
    let rest = &segments[1..];
    let relation = table.relation(name).ok_or_else(|| QuarryError::UnknownRelation {
        model: table.name.to_string(),
        name: name.to_string(),
    })?;

    if !relation.kind.is_inline() && (!rest.is_empty() || !alias_prefix.is_empty()) {
        return Err(QuarryError::InvalidQuery(format!(
            "to-many relation {name:?} must be the entire relation path"
        )));
    }

    let alias = if alias_prefix.is_empty() {
        name.to_string()
    } else {
        format!("{alias_prefix}__{name}")
    };

    let idx = match joins.iter().position(|j| j.relation.name == name) {
        Some(idx) => idx,
        None => {
            joins.push(RelationJoin {
                relation,
                alias: alias.clone(),
                apply: None,
                extra_on: Vec::new(),
                children: Vec::new(),
            });
            joins.len() - 1
        }
    };

    if rest.is_empty() {
        let join = &mut joins[idx];
        if options.apply.is_some() {
            join.apply = options.apply;
        }
        join.extra_on.extend(
            options
                .extra_join_conditions
                .into_iter()
                .map(|f| SepFragment::new(" AND ", f)),
        );
        Ok(())
    } else {
        add_segments(
            &mut joins[idx].children,
            (relation.related)(),
            rest,
            &alias,
            options,
        )
    }
}

/// A flattened inline join together with its parent's table and alias,
/// produced by depth-first traversal over the join tree.
pub(crate) struct InlineJoin<'a> {
    pub(crate) join: &'a RelationJoin,
    pub(crate) parent_table: &'static Table,
    pub(crate) parent_alias: &'a str,
}

/// Collects the inline (to-one) joins in depth-first order.
pub(crate) fn collect_inline<'a>(
    joins: &'a [RelationJoin],
    parent_table: &'static Table,
    parent_alias: &'a str,
    out: &mut Vec<InlineJoin<'a>>,
) {
    for join in joins {
        if join.relation.kind.is_inline() {
            out.push(InlineJoin {
                join,
                parent_table,
                parent_alias,
            });
            collect_inline(
                &join.children,
                (join.relation.related)(),
                &join.alias,
                out,
            );
        }
    }
}

// ── Deferred (to-many) resolution ──────────────────────────────────────

/// Executes the deferred relations of a query after the primary scan.
///
/// Callers must skip this entirely when the scan produced zero rows; the
/// key-collection short-circuit below is a second line of defense, not the
/// contract.
pub(crate) async fn resolve_deferred<M: Model>(
    db: &Db,
    joins: &[RelationJoin],
    models: &mut [M],
) -> QuarryResult<()> {
    for join in joins {
        match join.relation.kind {
            RelationKind::HasMany => select_has_many(db, join, models).await?,
            RelationKind::ManyToMany => select_many_to_many(db, join, models).await?,
            RelationKind::HasOne | RelationKind::BelongsTo => {}
        }
    }
    Ok(())
}

async fn select_has_many<M: Model>(
    db: &Db,
    join: &RelationJoin,
    models: &mut [M],
) -> QuarryResult<()> {
    let relation = join.relation;
    let related = (relation.related)();
    let keys = parent_keys(models, relation.base_fields);
    if keys.is_empty() {
        return Ok(());
    }

    let key_columns = related_columns(related, relation.related_fields);
    let mut query = follow_up_query(db, related, join, Some(relation.related_fields));

    let filter = key_filter(db.dialect().as_ref(), related.alias, &key_columns, &keys);
    query = query.where_fragment(SepFragment::new(" AND ", filter));

    let rows = query.fetch_rows().await?;
    let groups = group_rows(rows, related.alias, &key_columns);
    distribute(models, relation.name, relation.base_fields, &groups);
    Ok(())
}

async fn select_many_to_many<M: Model>(
    db: &Db,
    join: &RelationJoin,
    models: &mut [M],
) -> QuarryResult<()> {
    let relation = join.relation;
    let related = (relation.related)();
    let join_table = relation.join_table.as_ref().ok_or_else(|| {
        QuarryError::Configuration(format!(
            "many-to-many relation {:?} declares no join table",
            relation.name
        ))
    })?;
    let keys = parent_keys(models, relation.base_fields);
    if keys.is_empty() {
        return Ok(());
    }

    let dialect = db.dialect().clone();
    let mut query = follow_up_query(db, related, join, None);

    // The join-table key expressions below force an explicit column list;
    // re-add the related table's own fields when the refinement named none.
    if !query.has_columns() {
        for field in &related.fields {
            query = query.column(field.name);
        }
    }

    // Select the join table's parent-key columns under grouping aliases.
    for (i, src) in join_table.src_columns.iter().enumerate() {
        let mut expr = String::new();
        dialect.push_ident(&mut expr, M2M_JOIN_ALIAS);
        expr.push('.');
        dialect.push_ident(&mut expr, src);
        expr.push_str(" AS ");
        dialect.push_ident(&mut expr, &format!("{M2M_KEY_PREFIX}{i}"));
        query = query.column_expr(&expr, vec![]);
    }

    // JOIN the join table on the related side's key columns.
    let related_cols = related_columns(related, relation.related_fields);
    let mut join_sql = String::from("JOIN ");
    dialect.push_ident(&mut join_sql, join_table.name);
    join_sql.push_str(" AS ");
    dialect.push_ident(&mut join_sql, M2M_JOIN_ALIAS);
    join_sql.push_str(" ON ");
    for (i, (dst, rel_col)) in join_table
        .dst_columns
        .iter()
        .zip(&related_cols)
        .enumerate()
    {
        if i > 0 {
            join_sql.push_str(" AND ");
        }
        join_sql.push('(');
        dialect.push_ident(&mut join_sql, M2M_JOIN_ALIAS);
        join_sql.push('.');
        dialect.push_ident(&mut join_sql, dst);
        join_sql.push_str(" = ");
        dialect.push_ident(&mut join_sql, related.alias);
        join_sql.push('.');
        dialect.push_ident(&mut join_sql, rel_col);
        join_sql.push(')');
    }
    query = query.join(&join_sql, vec![]);

    let src_columns: Vec<&str> = join_table.src_columns.to_vec();
    let filter = key_filter(db.dialect().as_ref(), M2M_JOIN_ALIAS, &src_columns, &keys);
    query = query.where_fragment(SepFragment::new(" AND ", filter));

    let rows = query.fetch_rows().await?;
    let key_aliases: Vec<String> = (0..join_table.src_columns.len())
        .map(|i| format!("{M2M_KEY_PREFIX}{i}"))
        .collect();
    let key_refs: Vec<&str> = key_aliases.iter().map(String::as_str).collect();
    let groups = group_rows(rows, related.alias, &key_refs);
    distribute(models, relation.name, relation.base_fields, &groups);
    Ok(())
}

/// Builds the base follow-up statement: related table, refined columns,
/// static conditions, refinement filters/ordering/limit.
fn follow_up_query(
    db: &Db,
    related: &'static Table,
    join: &RelationJoin,
    required_columns: Option<&[&'static str]>,
) -> SelectQuery<NoModel> {
    let refinement = join.refinement();
    let mut query = SelectQuery::for_table(db.clone(), related);

    if let Some(columns) = refinement.columns {
        let mut columns: Vec<String> = columns;
        if let Some(required) = required_columns {
            for field in required {
                if !columns.iter().any(|c| c == field) {
                    columns.push((*field).to_string());
                }
            }
        }
        for column in &columns {
            query = query.column(column);
        }
    }
    for cond in join.relation.conditions {
        query = query.where_(cond, vec![]);
    }
    for w in refinement.wheres {
        query = query.where_fragment(w);
    }
    for o in refinement.order {
        query = query.order_fragment(o);
    }
    if let Some(limit) = refinement.limit {
        query = query.limit(limit);
    }
    query
}

/// Builds the `IN` filter scoping a follow-up statement to the parent keys.
///
/// Single-column keys render `"a"."c" IN (...)`. Multi-column keys use the
/// composite form `("a"."c1", "a"."c2") IN ((...), (...))` when the dialect
/// declares [`Feature::COMPOSITE_IN`], and an OR-of-conjunctions expansion
/// otherwise.
fn key_filter(dialect: &Dialect, alias: &str, columns: &[&str], keys: &[Vec<Value>]) -> Fragment {
    if columns.len() == 1 {
        let mut sql = String::new();
        dialect.push_ident(&mut sql, alias);
        sql.push('.');
        dialect.push_ident(&mut sql, columns[0]);
        sql.push_str(" IN ?");
        let list = keys.iter().map(|k| k[0].clone()).collect::<Vec<_>>();
        return Fragment::new(sql, vec![Value::List(list)]);
    }

    if dialect.has_feature(Feature::COMPOSITE_IN) {
        let mut sql = String::from("(");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            dialect.push_ident(&mut sql, alias);
            sql.push('.');
            dialect.push_ident(&mut sql, column);
        }
        sql.push_str(") IN ?");
        let tuples = keys
            .iter()
            .map(|k| Value::List(k.clone()))
            .collect::<Vec<_>>();
        return Fragment::new(sql, vec![Value::List(tuples)]);
    }

    let mut sql = String::new();
    let mut args = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            sql.push_str(" OR ");
        }
        sql.push('(');
        for (j, column) in columns.iter().enumerate() {
            if j > 0 {
                sql.push_str(" AND ");
            }
            dialect.push_ident(&mut sql, alias);
            sql.push('.');
            dialect.push_ident(&mut sql, column);
            sql.push_str(" = ?");
            args.push(key[j].clone());
        }
        sql.push(')');
    }
    Fragment::new(sql, args)
}

/// Resolves logical field names to SQL column names on the related table.
fn related_columns(table: &'static Table, fields: &[&'static str]) -> Vec<&'static str> {
    fields
        .iter()
        .map(|f| table.column_of(f).unwrap_or(f))
        .collect()
}

/// Collects the distinct key tuples of the scanned parents, in first-seen
/// order. Parents missing any key component contribute nothing.
fn parent_keys<M: Model>(models: &[M], base_fields: &[&'static str]) -> Vec<Vec<Value>> {
    let mut keys: Vec<Vec<Value>> = Vec::new();
    for model in models {
        if let Some(key) = model_key(model, base_fields) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

fn model_key<M: Model>(model: &M, base_fields: &[&'static str]) -> Option<Vec<Value>> {
    let mut key = Vec::with_capacity(base_fields.len());
    for field in base_fields {
        match model.field_value(field) {
            Some(v) if !v.is_null() => key.push(v),
            _ => return None,
        }
    }
    Some(key)
}

/// Groups follow-up rows by their key columns. Result rows name columns
/// either bare or alias-qualified depending on the adapter; both are tried.
/// Rows missing a key component are dropped.
fn group_rows(rows: Vec<Row>, alias: &str, key_columns: &[&str]) -> Vec<(Vec<Value>, Vec<Row>)> {
    let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
    'rows: for row in rows {
        let mut key = Vec::with_capacity(key_columns.len());
        for column in key_columns {
            let qualified = format!("{alias}.{column}");
            let value = row
                .get_value(column)
                .or_else(|| row.get_value(&qualified))
                .cloned();
            match value {
                Some(v) if !v.is_null() => key.push(v),
                _ => continue 'rows,
            }
        }
        if let Some(group) = groups.iter_mut().find(|(k, _)| *k == key) {
            group.1.push(row);
        } else {
            groups.push((key, vec![row]));
        }
    }
    groups
}

/// Hands each parent the rows belonging to it. Parents with no related rows
/// receive an empty batch so they can initialize empty collections.
fn distribute<M: Model>(
    models: &mut [M],
    relation_name: &str,
    base_fields: &[&'static str],
    groups: &[(Vec<Value>, Vec<Row>)],
) {
    for model in models {
        let Some(key) = model_key(model, base_fields) else {
            continue;
        };
        let rows = groups
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default();
        model.attach_related(relation_name, rows);
    }
}
