//! Query engine seams.
//!
//! The view subsystem never parses SQL queries or touches pages itself; it
//! consumes a [`QueryCompiler`] that turns query text into a [`Plan`] and a
//! [`Storage`] that holds rows for tables and backing stores. The crate ships
//! one implementation of each: [`sql::SqlCompiler`] (a SELECT subset with
//! nested-loop joins) and [`memory::MemoryStore`].

pub mod memory;
pub mod sql;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, EntityId};
use crate::error::MatViewResult;
use crate::schema::{Column, CompareOp, DataType, Row, Value};

/// A column of the source at position `source` in a plan's source list.
///
/// Positions are fixed when a plan (or a refresh rule) is bound; nothing
/// is looked up by name at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub source: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Column(ColumnRef),
    Literal(Value),
}

impl ExprKind {
    fn evaluate(&self, combo: &[&Row]) -> Value {
        match self {
            ExprKind::Column(r) => combo
                .get(r.source)
                .and_then(|row| row.get(r.column))
                .cloned()
                .unwrap_or(Value::Null),
            ExprKind::Literal(v) => v.clone(),
        }
    }
}

/// One output expression of a compiled query
#[derive(Debug, Clone, PartialEq)]
pub struct OutputExpr {
    /// Explicit alias, or the column name for a plain column reference
    pub alias: Option<String>,
    /// Expression text as written
    pub sql: String,
    pub data_type: DataType,
    pub kind: ExprKind,
}

/// A typed predicate over the sources of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Equality join between two source columns
    Join { left: ColumnRef, right: ColumnRef },
    /// `column op literal`
    Compare { column: ColumnRef, op: CompareOp, value: Value },
}

impl Condition {
    /// Highest source position the condition reads
    fn last_source(&self) -> usize {
        match self {
            Condition::Join { left, right } => left.source.max(right.source),
            Condition::Compare { column, .. } => column.source,
        }
    }

    /// True when the condition reads `column` of the source at `source`
    pub fn references(&self, source: usize, column: usize) -> bool {
        let hit = |r: &ColumnRef| r.source == source && r.column == column;
        match self {
            Condition::Join { left, right } => hit(left) || hit(right),
            Condition::Compare { column: c, .. } => hit(c),
        }
    }

    fn evaluate(&self, combo: &[&Row]) -> bool {
        let value = |r: &ColumnRef| combo.get(r.source).and_then(|row| row.get(r.column));
        match self {
            Condition::Join { left, right } => match (value(left), value(right)) {
                (Some(l), Some(r)) => CompareOp::Eq.evaluate(l, r).unwrap_or(false),
                _ => false,
            },
            Condition::Compare { column, op, value: literal } => match value(column) {
                Some(v) => op.evaluate(v, literal).unwrap_or(false),
                None => false,
            },
        }
    }
}

/// Answers "what is the newest modification of this entity"
pub trait ModificationSource {
    fn modification_id(&self, entity: EntityId) -> u64;
}

/// Produces the current rows of a table or view
pub trait RowSource {
    fn scan_entity(&self, entity: EntityId) -> MatViewResult<Vec<Row>>;
}

/// A compiled read-only query
pub trait Plan: fmt::Debug + Send + Sync {
    /// Output expressions in order
    fn expressions(&self) -> &[OutputExpr];

    /// Entities read, by source position (an entity may appear twice)
    fn sources(&self) -> &[EntityId];

    /// Conjunction of typed predicates
    fn conditions(&self) -> &[Condition];

    /// Canonical re-renderable text of the query
    fn plan_sql(&self) -> &str;

    fn execute(&self, rows: &dyn RowSource) -> MatViewResult<Vec<Row>>;

    /// Newest modification of anything the plan reads
    fn max_modification_id(&self, clock: &dyn ModificationSource) -> u64 {
        self.sources()
            .iter()
            .map(|s| clock.modification_id(*s))
            .max()
            .unwrap_or(0)
    }
}

/// Result of preparing a statement
#[derive(Debug, Clone)]
pub enum Prepared {
    Query(Arc<dyn Plan>),
    /// Anything that is not a read-only query
    Command { kind: String },
}

/// What a compiler may consult while resolving names
pub struct CompileContext<'a> {
    pub catalog: &'a Catalog,
    pub default_schema: &'a str,
}

pub trait QueryCompiler: Send + Sync {
    fn prepare(&self, sql: &str, ctx: &CompileContext<'_>) -> MatViewResult<Prepared>;
}

/// A base table as seen by a refresh rule at binding time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundTable {
    pub id: EntityId,
    pub name: String,
    pub columns: Vec<Column>,
}

/// Parameterized read used by refresh rules.
///
/// The source at `pinned.0` contributes exactly the given row image instead
/// of its stored rows; every other source is read from storage.
#[derive(Debug, Clone)]
pub struct DerivedRead<'a> {
    pub tables: &'a [BoundTable],
    pub pinned: Option<(usize, &'a Row)>,
    pub conditions: &'a [Condition],
    pub projection: &'a [ExprKind],
}

impl DerivedRead<'_> {
    /// SQL rendering of the read, for diagnostics only.
    ///
    /// The pinned row shows up as an equality filter over each of its
    /// columns, formatted per the column's declared type.
    pub fn to_sql(&self) -> String {
        let column_name = |r: &ColumnRef| -> String {
            match self.tables.get(r.source) {
                Some(t) => {
                    let col = t.columns.get(r.column).map_or("?", |c| c.name.as_str());
                    format!("t{}.{}", r.source, col)
                }
                None => format!("t{}.?", r.source),
            }
        };

        let projection: Vec<String> = self
            .projection
            .iter()
            .map(|e| match e {
                ExprKind::Column(r) => column_name(r),
                ExprKind::Literal(v) => v.to_sql_literal(),
            })
            .collect();

        let from: Vec<String> = self
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{} t{}", t.name, i))
            .collect();

        let mut predicates: Vec<String> = self
            .conditions
            .iter()
            .map(|c| match c {
                Condition::Join { left, right } => format!("{} = {}", column_name(left), column_name(right)),
                Condition::Compare { column, op, value } => {
                    format!("{} {} {}", column_name(column), op, value.to_sql_literal())
                }
            })
            .collect();

        if let Some((source, row)) = self.pinned {
            if let Some(table) = self.tables.get(source) {
                for (i, (col, value)) in table.columns.iter().zip(row.iter()).enumerate() {
                    let lhs = column_name(&ColumnRef { source, column: i });
                    if value.is_null() {
                        predicates.push(format!("{} IS NULL", lhs));
                    } else {
                        predicates.push(format!("{} = {}", lhs, col.data_type.format_literal(value)));
                    }
                }
            }
        }

        let mut sql = format!("SELECT {} FROM {}", projection.join(", "), from.join(", "));
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        sql
    }
}

/// Row storage for base tables and backing stores
pub trait Storage: Send + Sync {
    fn create_store(&self, id: EntityId) -> MatViewResult<()>;

    fn drop_store(&self, id: EntityId);

    fn insert(&self, id: EntityId, row: Row) -> MatViewResult<()>;

    fn rows(&self, id: EntityId) -> MatViewResult<Vec<Row>>;

    /// Set `set` on rows matching every `locate` pair (NULL matches NULL),
    /// at most `limit` rows when given. Returns (old, new) images.
    fn update_where(
        &self,
        id: EntityId,
        locate: &[(usize, Value)],
        set: &[(usize, Value)],
        limit: Option<usize>,
    ) -> MatViewResult<Vec<(Row, Row)>>;

    /// Delete rows matching every `locate` pair. Returns the deleted images.
    fn delete_where(&self, id: EntityId, locate: &[(usize, Value)]) -> MatViewResult<Vec<Row>>;

    fn replace_all(&self, id: EntityId, rows: Vec<Row>) -> MatViewResult<()>;

    fn truncate(&self, id: EntityId) -> MatViewResult<usize>;

    /// Execute a refresh rule's derived read
    fn execute_read(&self, read: &DerivedRead<'_>) -> MatViewResult<Vec<Row>> {
        let mut inputs = Vec::with_capacity(read.tables.len());
        for (pos, table) in read.tables.iter().enumerate() {
            match read.pinned {
                Some((pinned, row)) if pinned == pos => inputs.push(vec![row.clone()]),
                _ => inputs.push(self.rows(table.id)?),
            }
        }
        Ok(evaluate(&inputs, read.conditions, read.projection))
    }
}

/// Nested-loop join of `inputs` filtered by `conditions`, projected by `projection`.
///
/// Each condition is checked as soon as every source it reads is bound.
pub fn evaluate(inputs: &[Vec<Row>], conditions: &[Condition], projection: &[ExprKind]) -> Vec<Row> {
    let mut output = Vec::new();
    if inputs.is_empty() {
        return output;
    }

    let mut staged: Vec<Vec<&Condition>> = vec![Vec::new(); inputs.len()];
    for condition in conditions {
        let at = condition.last_source().min(inputs.len() - 1);
        staged[at].push(condition);
    }

    let mut combo: Vec<&Row> = Vec::with_capacity(inputs.len());
    join_level(inputs, &staged, projection, &mut combo, &mut output);
    output
}

fn join_level<'r>(
    inputs: &'r [Vec<Row>],
    staged: &[Vec<&Condition>],
    projection: &[ExprKind],
    combo: &mut Vec<&'r Row>,
    output: &mut Vec<Row>,
) {
    let level = combo.len();
    if level == inputs.len() {
        output.push(projection.iter().map(|e| e.evaluate(combo)).collect());
        return;
    }

    for row in &inputs[level] {
        combo.push(row);
        if staged[level].iter().all(|c| c.evaluate(combo)) {
            join_level(inputs, staged, projection, combo, output);
        }
        combo.pop();
    }
}
