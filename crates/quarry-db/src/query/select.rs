//! The query assembly engine.
//!
//! [`SelectQuery`] accumulates clause fragments through fluent calls and
//! renders them into one SQL string on a terminal call. Rendering is a pure
//! function of the accumulated state: calling [`SelectQuery::to_sql`] twice
//! without intervening mutation yields byte-identical output.
//!
//! A builder call that cannot be satisfied records a sticky error; every
//! later builder and terminal call short-circuits and returns that first
//! error, so a partially built statement can never execute.

use crate::db::Db;
use crate::dialect::{Dialect, Feature};
use crate::fragment::{render_sep_list, Fragment, SepFragment};
use crate::hook;
use crate::model::{Model, NoModel};
use crate::query::relation::{
    add_relation_path, collect_inline, resolve_deferred, InlineJoin, RelationJoin,
    RelationOptions, RelationQuery,
};
use crate::row::Row;
use crate::table::Table;
use crate::value::Value;
use quarry_core::{QuarryError, QuarryResult};
use std::marker::PhantomData;

/// A column entry in the SELECT list.
#[derive(Debug, Clone)]
enum SelectColumn {
    /// A plain name, resolved against the model table when one is bound.
    Name(String),
    /// A raw expression.
    Expr(Fragment),
}

/// One common table expression. The body is captured (rendered) when the
/// CTE is registered; later mutation of the source query does not reach it.
#[derive(Debug, Clone)]
struct Cte {
    name: String,
    recursive: bool,
    body: Fragment,
}

/// One explicit JOIN plus its ON conditions.
#[derive(Debug, Clone)]
struct JoinClause {
    join: Fragment,
    on: Vec<SepFragment>,
}

/// One trailing set-operation branch.
struct SetOp<M: Model> {
    op: &'static str,
    query: Box<SelectQuery<M>>,
}

impl<M: Model> Clone for SetOp<M> {
    fn clone(&self) -> Self {
        Self {
            op: self.op,
            query: self.query.clone(),
        }
    }
}

/// A fluent SELECT statement under construction.
///
/// The query is owned by a single caller while being built; builder methods
/// consume and return it. Cloning produces a structurally independent deep
/// copy (sharing only the dialect and static table metadata) that is safe
/// to refine and execute concurrently with the original.
pub struct SelectQuery<M: Model = NoModel> {
    db: Db,
    model_table: Option<&'static Table>,
    columns: Option<Vec<SelectColumn>>,
    excluded: Vec<String>,
    tables: Vec<Fragment>,
    ctes: Vec<Cte>,
    distinct: Option<Vec<Fragment>>,
    joins: Vec<JoinClause>,
    wheres: Vec<SepFragment>,
    group: Vec<Fragment>,
    having: Vec<Fragment>,
    order: Vec<Fragment>,
    limit: Option<i64>,
    offset: Option<i64>,
    lock: Option<Fragment>,
    set_ops: Vec<SetOp<M>>,
    comment: Option<String>,
    relations: Vec<RelationJoin>,
    err: Option<QuarryError>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for SelectQuery<M> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            model_table: self.model_table,
            columns: self.columns.clone(),
            excluded: self.excluded.clone(),
            tables: self.tables.clone(),
            ctes: self.ctes.clone(),
            distinct: self.distinct.clone(),
            joins: self.joins.clone(),
            wheres: self.wheres.clone(),
            group: self.group.clone(),
            having: self.having.clone(),
            order: self.order.clone(),
            limit: self.limit,
            offset: self.offset,
            lock: self.lock.clone(),
            set_ops: self.set_ops.clone(),
            comment: self.comment.clone(),
            relations: self.relations.clone(),
            err: self.err.clone(),
            _model: PhantomData,
        }
    }
}

impl<M: Model> SelectQuery<M> {
    fn empty(db: Db, model_table: Option<&'static Table>) -> Self {
        Self {
            db,
            model_table,
            columns: None,
            excluded: Vec::new(),
            tables: Vec::new(),
            ctes: Vec::new(),
            distinct: None,
            joins: Vec::new(),
            wheres: Vec::new(),
            group: Vec::new(),
            having: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            lock: None,
            set_ops: Vec::new(),
            comment: None,
            relations: Vec::new(),
            err: None,
            _model: PhantomData,
        }
    }

    /// Creates a query bound to `M`'s table.
    pub(crate) fn for_model(db: Db) -> Self {
        Self::empty(db, Some(M::table()))
    }

    fn dialect(&self) -> &Dialect {
        self.db.dialect().as_ref()
    }

    fn model_name(&self) -> Option<&'static str> {
        self.model_table.map(|t| t.name)
    }

    fn record_err(&mut self, err: QuarryError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    /// The sticky error recorded on this query, if any.
    pub fn error(&self) -> Option<&QuarryError> {
        self.err.as_ref()
    }

    /// Records an error on the query, as if a builder call had failed.
    #[must_use]
    pub fn err(mut self, err: QuarryError) -> Self {
        self.record_err(err);
        self
    }

    /// Passes the query through `f`; useful for composing reusable query
    /// functions.
    #[must_use]
    pub fn apply(self, f: impl FnOnce(Self) -> Self) -> Self {
        f(self)
    }

    // ── Columns ──────────────────────────────────────────────────────

    /// Selects a column by name. Names matching a field of the bound model
    /// table render alias-qualified.
    #[must_use]
    pub fn column(mut self, name: &str) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.columns
            .get_or_insert_with(Vec::new)
            .push(SelectColumn::Name(name.to_string()));
        self
    }

    /// Selects a raw expression.
    #[must_use]
    pub fn column_expr(mut self, sql: &str, args: Vec<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.columns
            .get_or_insert_with(Vec::new)
            .push(SelectColumn::Expr(Fragment::new(sql, args)));
        self
    }

    /// Removes fields from the default column set of the bound model table.
    /// Has no effect when explicit columns are selected.
    #[must_use]
    pub fn exclude_column(mut self, names: &[&str]) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.excluded.extend(names.iter().map(|n| (*n).to_string()));
        self
    }

    pub(crate) fn has_columns(&self) -> bool {
        self.columns.is_some()
    }

    // ── Tables ───────────────────────────────────────────────────────

    /// Adds a table to the FROM clause by name.
    #[must_use]
    pub fn table(mut self, name: &str) -> Self {
        if self.err.is_some() {
            return self;
        }
        let fragment = Fragment::ident(name, self.dialect());
        self.tables.push(fragment);
        self
    }

    /// Adds a raw table expression to the FROM clause.
    #[must_use]
    pub fn table_expr(mut self, sql: &str, args: Vec<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.tables.push(Fragment::new(sql, args));
        self
    }

    // ── Common table expressions ─────────────────────────────────────

    /// Registers `query` as a CTE named `name`. The query is captured at
    /// registration; later mutation of it does not reach the CTE.
    #[must_use]
    pub fn with<N: Model>(self, name: &str, query: &SelectQuery<N>) -> Self {
        self.add_cte(name, query, false)
    }

    /// Registers a recursive CTE.
    #[must_use]
    pub fn with_recursive<N: Model>(self, name: &str, query: &SelectQuery<N>) -> Self {
        self.add_cte(name, query, true)
    }

    fn add_cte<N: Model>(mut self, name: &str, query: &SelectQuery<N>, recursive: bool) -> Self {
        if self.err.is_some() {
            return self;
        }
        match query.render(false) {
            Ok((sql, _)) => self.ctes.push(Cte {
                name: name.to_string(),
                recursive,
                body: Fragment::raw(sql),
            }),
            Err(err) => self.record_err(err),
        }
        self
    }

    // ── Distinct ─────────────────────────────────────────────────────

    /// Emits `SELECT DISTINCT`.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.distinct.get_or_insert_with(Vec::new);
        self
    }

    /// Adds an expression to `SELECT DISTINCT ON (...)`.
    #[must_use]
    pub fn distinct_on(mut self, sql: &str, args: Vec<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.distinct
            .get_or_insert_with(Vec::new)
            .push(Fragment::new(sql, args));
        self
    }

    // ── Joins ────────────────────────────────────────────────────────

    /// Adds a raw join clause, e.g. `"LEFT JOIN orders AS o"`.
    #[must_use]
    pub fn join(mut self, sql: &str, args: Vec<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.joins.push(JoinClause {
            join: Fragment::new(sql, args),
            on: Vec::new(),
        });
        self
    }

    /// Adds an AND-joined ON condition to the most recent join.
    #[must_use]
    pub fn join_on(self, cond: &str, args: Vec<Value>) -> Self {
        self.add_join_on(cond, args, " AND ")
    }

    /// Adds an OR-joined ON condition to the most recent join.
    #[must_use]
    pub fn join_on_or(self, cond: &str, args: Vec<Value>) -> Self {
        self.add_join_on(cond, args, " OR ")
    }

    fn add_join_on(mut self, cond: &str, args: Vec<Value>, sep: &'static str) -> Self {
        if self.err.is_some() {
            return self;
        }
        match self.joins.last_mut() {
            Some(join) => join
                .on
                .push(SepFragment::new(sep, Fragment::new(cond, args))),
            None => self.record_err(QuarryError::InvalidQuery(
                "join condition added but query has no joins".to_string(),
            )),
        }
        self
    }

    // ── Filtering ────────────────────────────────────────────────────

    /// Adds an AND-joined WHERE condition. `?` slots consume `args`.
    #[must_use]
    pub fn where_(mut self, cond: &str, args: Vec<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.wheres
            .push(SepFragment::new(" AND ", Fragment::new(cond, args)));
        self
    }

    /// Adds an OR-joined WHERE condition.
    #[must_use]
    pub fn where_or(mut self, cond: &str, args: Vec<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.wheres
            .push(SepFragment::new(" OR ", Fragment::new(cond, args)));
        self
    }

    /// Collects the conditions added inside `f` into one parenthesized
    /// group joined to the preceding conditions by `sep`.
    #[must_use]
    pub fn where_group(mut self, sep: &'static str, f: impl FnOnce(Self) -> Self) -> Self {
        if self.err.is_some() {
            return self;
        }
        let saved = std::mem::take(&mut self.wheres);
        let mut query = f(self);
        let grouped = std::mem::replace(&mut query.wheres, saved);
        if grouped.is_empty() || query.err.is_some() {
            return query;
        }
        let mut sql = String::new();
        let mut args = Vec::new();
        for (i, entry) in grouped.iter().enumerate() {
            if i > 0 {
                sql.push_str(entry.sep());
            }
            sql.push('(');
            sql.push_str(entry.fragment().sql());
            sql.push(')');
            args.extend(entry.fragment().args().iter().cloned());
        }
        query.wheres.push(SepFragment::new(sep, Fragment::new(sql, args)));
        query
    }

    /// Filters on the bound model table's primary key.
    #[must_use]
    pub fn where_pk(mut self, pk: Value) -> Self {
        if self.err.is_some() {
            return self;
        }
        let Some(table) = self.model_table else {
            self.record_err(QuarryError::InvalidQuery(
                "where_pk requires a model-bound query".to_string(),
            ));
            return self;
        };
        let Some(column) = table.column_of(table.pk) else {
            self.record_err(QuarryError::Configuration(format!(
                "table {:?} declares no primary key field", table.name
            )));
            return self;
        };
        let mut sql = String::new();
        self.dialect().push_ident(&mut sql, table.alias);
        sql.push('.');
        self.dialect().push_ident(&mut sql, column);
        sql.push_str(" = ?");
        self.wheres
            .push(SepFragment::new(" AND ", Fragment::new(sql, vec![pk])));
        self
    }

    pub(crate) fn where_fragment(mut self, fragment: SepFragment) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.wheres.push(fragment);
        self
    }

    // ── Grouping, having, ordering ───────────────────────────────────

    /// Adds GROUP BY columns by name.
    #[must_use]
    pub fn group(mut self, columns: &[&str]) -> Self {
        if self.err.is_some() {
            return self;
        }
        for column in columns {
            let fragment = Fragment::ident(column, self.dialect());
            self.group.push(fragment);
        }
        self
    }

    /// Adds a raw GROUP BY expression.
    #[must_use]
    pub fn group_expr(mut self, sql: &str, args: Vec<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.group.push(Fragment::new(sql, args));
        self
    }

    /// Adds a HAVING condition; conditions are parenthesized and
    /// AND-joined.
    #[must_use]
    pub fn having(mut self, cond: &str, args: Vec<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.having.push(Fragment::new(cond, args));
        self
    }

    /// Adds an ORDER BY column, optionally suffixed with a direction:
    /// `"name"` or `"name DESC"`.
    #[must_use]
    pub fn order(mut self, order: &str) -> Self {
        if self.err.is_some() {
            return self;
        }
        let (field, direction) = match order.split_once(char::is_whitespace) {
            Some((field, rest)) => (field, Some(rest.trim())),
            None => (order, None),
        };
        let mut sql = String::new();
        self.dialect().push_ident(&mut sql, field);
        if let Some(direction) = direction {
            if direction.eq_ignore_ascii_case("asc") || direction.eq_ignore_ascii_case("desc") {
                sql.push(' ');
                sql.push_str(&direction.to_ascii_uppercase());
            } else {
                self.record_err(QuarryError::InvalidQuery(format!(
                    "invalid sort direction {direction:?}"
                )));
                return self;
            }
        }
        self.order.push(Fragment::raw(sql));
        self
    }

    /// Adds a raw ORDER BY expression.
    #[must_use]
    pub fn order_expr(mut self, sql: &str, args: Vec<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.order.push(Fragment::new(sql, args));
        self
    }

    pub(crate) fn order_fragment(mut self, fragment: Fragment) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.order.push(fragment);
        self
    }

    // ── Paging and locking ───────────────────────────────────────────

    /// Sets the LIMIT. Values of zero or less suppress the clause.
    #[must_use]
    pub fn limit(mut self, n: i64) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.limit = Some(n);
        self
    }

    /// Sets the OFFSET. Values of zero or less suppress the clause.
    #[must_use]
    pub fn offset(mut self, n: i64) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.offset = Some(n);
        self
    }

    /// Appends a raw locking clause: `locking("UPDATE", ...)` renders
    /// `FOR UPDATE`.
    #[must_use]
    pub fn locking(mut self, sql: &str, args: Vec<Value>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.lock = Some(Fragment::new(sql, args));
        self
    }

    /// Appends `FOR UPDATE`.
    #[must_use]
    pub fn for_update(self) -> Self {
        self.locking("UPDATE", vec![])
    }

    // ── Set operations ───────────────────────────────────────────────

    /// Appends a `UNION` branch.
    #[must_use]
    pub fn union(self, other: SelectQuery<M>) -> Self {
        self.add_set_op(" UNION ", other)
    }

    /// Appends a `UNION ALL` branch.
    #[must_use]
    pub fn union_all(self, other: SelectQuery<M>) -> Self {
        self.add_set_op(" UNION ALL ", other)
    }

    /// Appends an `INTERSECT` branch.
    #[must_use]
    pub fn intersect(self, other: SelectQuery<M>) -> Self {
        self.add_set_op(" INTERSECT ", other)
    }

    /// Appends an `INTERSECT ALL` branch.
    #[must_use]
    pub fn intersect_all(self, other: SelectQuery<M>) -> Self {
        self.add_set_op(" INTERSECT ALL ", other)
    }

    /// Appends an `EXCEPT` branch.
    #[must_use]
    pub fn except(self, other: SelectQuery<M>) -> Self {
        self.add_set_op(" EXCEPT ", other)
    }

    /// Appends an `EXCEPT ALL` branch.
    #[must_use]
    pub fn except_all(self, other: SelectQuery<M>) -> Self {
        self.add_set_op(" EXCEPT ALL ", other)
    }

    fn add_set_op(mut self, op: &'static str, other: SelectQuery<M>) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.set_ops.push(SetOp {
            op,
            query: Box::new(other),
        });
        self
    }

    // ── Comments and relations ───────────────────────────────────────

    /// Sets a leading `/* ... */` comment on the rendered statement.
    #[must_use]
    pub fn comment(mut self, text: &str) -> Self {
        if self.err.is_some() {
            return self;
        }
        self.comment = Some(text.to_string());
        self
    }

    /// Loads a declared relation by name. Dotted paths descend through
    /// to-one edges: `relation("author.publisher")`.
    #[must_use]
    pub fn relation(self, path: &str) -> Self {
        self.relation_with(path, RelationOptions::new())
    }

    /// Loads a relation with a refinement and/or extra join conditions.
    #[must_use]
    pub fn relation_with(mut self, path: &str, options: RelationOptions) -> Self {
        if self.err.is_some() {
            return self;
        }
        let Some(table) = self.model_table else {
            self.record_err(QuarryError::InvalidQuery(
                "relation() requires a model-bound query".to_string(),
            ));
            return self;
        };
        if let Err(err) = add_relation_path(&mut self.relations, table, path, options) {
            self.record_err(err);
        }
        self
    }

    // ── Rendering ────────────────────────────────────────────────────

    /// Renders the statement. Pure: repeated calls over unchanged state
    /// yield byte-identical output.
    pub fn to_sql(&self) -> QuarryResult<String> {
        self.render(false).map(|(sql, _)| sql)
    }

    /// Renders the derived count statement. When the query groups or is
    /// distinct, the statement is wrapped so the count reflects groups, not
    /// underlying rows.
    pub fn count_sql(&self) -> QuarryResult<String> {
        self.render(true).map(|(sql, _)| sql)
    }

    /// Renders the derived existence statement in the form [`exists`] would
    /// execute for this query's dialect.
    pub fn exists_sql(&self) -> QuarryResult<String> {
        let (inner, _) = self.render(false)?;
        if self.dialect().has_feature(Feature::SELECT_EXISTS) {
            Ok(format!("SELECT EXISTS ({inner})"))
        } else {
            Ok(format!("SELECT 1 WHERE EXISTS ({inner})"))
        }
    }

    pub(crate) fn render(&self, count: bool) -> QuarryResult<(String, Vec<Value>)> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        let dialect = self.dialect();
        let mut sql = String::new();
        let mut args = Vec::new();

        if let Some(comment) = &self.comment {
            sql.push_str("/* ");
            sql.push_str(&comment.replace("*/", ""));
            sql.push_str(" */ ");
        }

        // Counting over grouped or distinct results must count result rows,
        // not underlying rows, so the whole statement is wrapped.
        let wrap_count = count && (!self.group.is_empty() || self.distinct.is_some());
        let native_cte = dialect.has_feature(Feature::CTE);
        if wrap_count {
            if native_cte {
                sql.push_str("WITH _count_wrapper AS (");
            } else {
                sql.push_str("SELECT count(*) FROM (");
            }
        }

        if !self.set_ops.is_empty() {
            sql.push('(');
        }

        if !self.ctes.is_empty() {
            if !native_cte {
                return Err(QuarryError::Unsupported(
                    "common table expressions".to_string(),
                ));
            }
            sql.push_str("WITH ");
            for (i, cte) in self.ctes.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                if cte.recursive {
                    sql.push_str("RECURSIVE ");
                }
                dialect.push_ident(&mut sql, &cte.name);
                sql.push_str(" AS (");
                cte.body.render_into(&mut sql, &mut args, dialect)?;
                sql.push(')');
            }
            sql.push(' ');
        }

        let mut inline = Vec::new();
        if let Some(table) = self.model_table {
            collect_inline(&self.relations, table, table.alias, &mut inline);
        }
        let refinements: Vec<RelationQuery> =
            inline.iter().map(|ij| ij.join.refinement()).collect();

        sql.push_str("SELECT ");

        if count && !wrap_count {
            sql.push_str("count(*)");
        } else {
            match &self.distinct {
                Some(exprs) if !exprs.is_empty() => {
                    sql.push_str("DISTINCT ON (");
                    for (i, expr) in exprs.iter().enumerate() {
                        if i > 0 {
                            sql.push_str(", ");
                        }
                        expr.render_into(&mut sql, &mut args, dialect)?;
                    }
                    sql.push_str(") ");
                }
                Some(_) => sql.push_str("DISTINCT "),
                None => {}
            }
            if !count && self.limit.map_or(false, |n| n > 0) && self.order.is_empty() {
                if let Some(column) = dialect.synthetic_limit_order() {
                    sql.push_str(column);
                    sql.push_str(", ");
                }
            }
            self.render_columns(&mut sql, &mut args, &inline, &refinements)?;
        }

        if self.model_table.is_some() || !self.tables.is_empty() {
            sql.push_str(" FROM ");
            let mut first = true;
            if let Some(table) = self.model_table {
                dialect.push_ident(&mut sql, table.name);
                if table.alias != table.name {
                    sql.push_str(" AS ");
                    dialect.push_ident(&mut sql, table.alias);
                }
                first = false;
            }
            for table in &self.tables {
                if !first {
                    sql.push_str(", ");
                }
                table.render_into(&mut sql, &mut args, dialect)?;
                first = false;
            }
        }

        for inline_join in &inline {
            self.render_inline_join(&mut sql, &mut args, inline_join)?;
        }

        for join in &self.joins {
            sql.push(' ');
            join.join.render_into(&mut sql, &mut args, dialect)?;
            if !join.on.is_empty() {
                sql.push_str(" ON ");
                render_sep_list(&join.on, &mut sql, &mut args, dialect)?;
            }
        }

        let mut wheres = self.wheres.clone();
        for (inline_join, refinement) in inline.iter().zip(&refinements) {
            for cond in inline_join.join.relation.conditions {
                wheres.push(SepFragment::new(" AND ", Fragment::raw(*cond)));
            }
            wheres.extend(refinement.wheres.iter().cloned());
        }
        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            render_sep_list(&wheres, &mut sql, &mut args, dialect)?;
        }

        if !self.group.is_empty() {
            sql.push_str(" GROUP BY ");
            for (i, expr) in self.group.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                expr.render_into(&mut sql, &mut args, dialect)?;
            }
        }

        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            for (i, cond) in self.having.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                sql.push('(');
                cond.render_into(&mut sql, &mut args, dialect)?;
                sql.push(')');
            }
        }

        if !count {
            if !self.order.is_empty() {
                sql.push_str(" ORDER BY ");
                for (i, expr) in self.order.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    expr.render_into(&mut sql, &mut args, dialect)?;
                }
            }
            if let Some(limit) = self.limit {
                if limit > 0 {
                    sql.push_str(" LIMIT ");
                    sql.push_str(&limit.to_string());
                }
            }
            if let Some(offset) = self.offset {
                if offset > 0 {
                    sql.push_str(" OFFSET ");
                    sql.push_str(&offset.to_string());
                }
            }
            if let Some(lock) = &self.lock {
                sql.push_str(" FOR ");
                lock.render_into(&mut sql, &mut args, dialect)?;
            }
        }

        if !self.set_ops.is_empty() {
            sql.push(')');
            for set_op in &self.set_ops {
                sql.push_str(set_op.op);
                sql.push('(');
                let (branch_sql, branch_args) = set_op.query.render(false)?;
                sql.push_str(&branch_sql);
                args.extend(branch_args);
                sql.push(')');
            }
        }

        if wrap_count {
            if native_cte {
                sql.push_str(") SELECT count(*) FROM _count_wrapper");
            } else {
                sql.push_str(") AS _count_wrapper");
            }
        }

        Ok((sql, args))
    }

    fn render_columns(
        &self,
        sql: &mut String,
        args: &mut Vec<Value>,
        inline: &[InlineJoin<'_>],
        refinements: &[RelationQuery],
    ) -> QuarryResult<()> {
        let dialect = self.dialect();
        let mut emitted = false;

        match &self.columns {
            Some(columns) => {
                for column in columns {
                    if emitted {
                        sql.push_str(", ");
                    }
                    match column {
                        SelectColumn::Name(name) => {
                            let field = self.model_table.and_then(|t| t.field(name));
                            if let (Some(table), Some(field)) = (self.model_table, field) {
                                dialect.push_ident(sql, table.alias);
                                sql.push('.');
                                dialect.push_ident(sql, field.column);
                            } else {
                                dialect.push_ident(sql, name);
                            }
                        }
                        SelectColumn::Expr(expr) => expr.render_into(sql, args, dialect)?,
                    }
                    emitted = true;
                }
            }
            None => {
                if let Some(table) = self.model_table {
                    for field in &table.fields {
                        if self.excluded.iter().any(|e| e == field.name) {
                            continue;
                        }
                        if emitted {
                            sql.push_str(", ");
                        }
                        dialect.push_ident(sql, table.alias);
                        sql.push('.');
                        dialect.push_ident(sql, field.column);
                        emitted = true;
                    }
                }
                if !emitted {
                    sql.push('*');
                    emitted = true;
                }
            }
        }

        // Splice in the aliased columns of every inlined to-one relation.
        for (inline_join, refinement) in inline.iter().zip(refinements) {
            let related = (inline_join.join.relation.related)();
            let alias = &inline_join.join.alias;
            let field_names: Vec<&str> = match &refinement.columns {
                Some(names) => names.iter().map(String::as_str).collect(),
                None => related.fields.iter().map(|f| f.name).collect(),
            };
            for name in field_names {
                if emitted {
                    sql.push_str(", ");
                }
                let column = related.column_of(name).unwrap_or(name);
                dialect.push_ident(sql, alias);
                sql.push('.');
                dialect.push_ident(sql, column);
                sql.push_str(" AS ");
                dialect.push_ident(sql, &format!("{alias}__{name}"));
                emitted = true;
            }
        }

        Ok(())
    }

    fn render_inline_join(
        &self,
        sql: &mut String,
        args: &mut Vec<Value>,
        inline_join: &InlineJoin<'_>,
    ) -> QuarryResult<()> {
        let dialect = self.dialect();
        let relation = inline_join.join.relation;
        let related = (relation.related)();

        sql.push_str(" LEFT JOIN ");
        dialect.push_ident(sql, related.name);
        sql.push_str(" AS ");
        dialect.push_ident(sql, &inline_join.join.alias);
        sql.push_str(" ON (");
        for (i, (base, rel)) in relation
            .base_fields
            .iter()
            .zip(relation.related_fields)
            .enumerate()
        {
            if i > 0 {
                sql.push_str(" AND ");
            }
            let base_column = inline_join.parent_table.column_of(base).unwrap_or(base);
            let rel_column = related.column_of(rel).unwrap_or(rel);
            dialect.push_ident(sql, inline_join.parent_alias);
            sql.push('.');
            dialect.push_ident(sql, base_column);
            sql.push_str(" = ");
            dialect.push_ident(sql, &inline_join.join.alias);
            sql.push('.');
            dialect.push_ident(sql, rel_column);
        }
        sql.push(')');
        for extra in &inline_join.join.extra_on {
            sql.push_str(extra.sep());
            sql.push('(');
            extra.fragment().render_into(sql, args, dialect)?;
            sql.push(')');
        }
        Ok(())
    }

    // ── Terminal operations ──────────────────────────────────────────

    /// Executes the statement and hydrates every row into `M`, resolving
    /// deferred relations when at least one row was returned.
    pub async fn fetch(&self) -> QuarryResult<Vec<M>> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        M::before_select()?;
        let (sql, args) = self.render(false)?;
        let rows = self
            .db
            .run_rows(self.model_name(), "SELECT", sql, args)
            .await?;
        let mut models = Vec::with_capacity(rows.len());
        for row in &rows {
            models.push(M::from_row(row)?);
        }
        hook::run_after_batch(&mut models, M::after_scan)?;
        if !models.is_empty() {
            resolve_deferred(&self.db, &self.relations, &mut models).await?;
        }
        hook::run_after_batch(&mut models, M::after_select)?;
        Ok(models)
    }

    /// Executes the statement and returns raw rows, bypassing model
    /// hydration and model-level hooks. Statement hooks still run.
    pub async fn fetch_rows(&self) -> QuarryResult<Vec<Row>> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        let (sql, args) = self.render(false)?;
        self.db
            .run_rows(self.model_name(), "SELECT", sql, args)
            .await
    }

    /// Executes the statement expecting exactly one row.
    ///
    /// # Errors
    ///
    /// [`QuarryError::DoesNotExist`] when no row matches and
    /// [`QuarryError::MultipleObjectsReturned`] when more than one does.
    pub async fn fetch_one(&self) -> QuarryResult<M> {
        // LIMIT 2 is enough to distinguish one row from many.
        let mut models = self.clone().limit(2).fetch().await?;
        let name = self.model_name().unwrap_or("query");
        match models.len() {
            0 => Err(QuarryError::DoesNotExist(name.to_string())),
            1 => Ok(models.remove(0)),
            n => Err(QuarryError::MultipleObjectsReturned(format!(
                "{name} matched {n} rows"
            ))),
        }
    }

    /// Executes the derived count statement.
    pub async fn count(&self) -> QuarryResult<i64> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        let (sql, args) = self.render(true)?;
        let rows = self
            .db
            .run_rows(self.model_name(), "SELECT", sql, args)
            .await?;
        rows.first().map_or(Ok(0), |row| row.get_by_index::<i64>(0))
    }

    /// Executes the derived existence statement, using the native
    /// `SELECT EXISTS` form when the dialect supports it and the portable
    /// `SELECT 1 WHERE EXISTS (...)` form otherwise. Zero matching rows is
    /// `Ok(false)`, never an error.
    pub async fn exists(&self) -> QuarryResult<bool> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        let sql = self.exists_sql()?;
        let rows = self
            .db
            .run_rows(self.model_name(), "SELECT", sql, Vec::new())
            .await?;
        if self.dialect().has_feature(Feature::SELECT_EXISTS) {
            rows.first()
                .map_or(Ok(false), |row| row.get_by_index::<bool>(0))
        } else {
            Ok(!rows.is_empty())
        }
    }

    /// Fetches rows and the un-paged total count in one call.
    ///
    /// With no limit or offset, a single execution serves both. Otherwise
    /// the count runs against an independent clone — concurrently with the
    /// scan when the adapter allows two in-flight statements, sequentially
    /// on a pinned connection. The first recorded error wins.
    pub async fn fetch_and_count(&self) -> QuarryResult<(Vec<M>, i64)> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        let paged =
            self.limit.map_or(false, |n| n > 0) || self.offset.map_or(false, |n| n > 0);
        if !paged {
            let models = self.fetch().await?;
            let count = models.len() as i64;
            return Ok((models, count));
        }

        // Clone-before-fork: the two statements must not share mutable
        // fragment storage.
        let count_query = self.clone();
        let (scan_result, count_result) = if self.db.concurrent_ok() {
            tokio::join!(self.fetch(), count_query.count())
        } else {
            let scan = self.fetch().await;
            let count = count_query.count().await;
            (scan, count)
        };
        match (scan_result, count_result) {
            (Ok(models), Ok(count)) => Ok((models, count)),
            (Err(err), _) => Err(err),
            (_, Err(err)) => Err(err),
        }
    }
}

impl SelectQuery<NoModel> {
    /// Creates a query with no model and no table; select columns and
    /// tables explicitly and consume it with [`SelectQuery::fetch_rows`].
    pub(crate) fn unbound(db: Db) -> Self {
        Self::empty(db, None)
    }

    /// Creates a model-less query bound to the given table metadata; used
    /// for relation follow-up statements.
    pub(crate) fn for_table(db: Db, table: &'static Table) -> Self {
        Self::empty(db, Some(table))
    }
}
