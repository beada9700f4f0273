//! Schema: columns, values and column derivation for views
//!
//! - **Types**: [`DataType`], [`Value`] and row images
//! - **Columns**: [`Column`] with an optional single-column [`CheckConstraint`]
//! - **Parsing**: column lists from DDL (`(id INT, name)`), literals, check clauses
//! - **Inference**: the column derivation of a compiled view query, including
//!   the generated-name policy and check-constraint propagation
//!
//! ## Example
//!
//! ```rust,ignore
//! use matview::schema::parser::parse_column_list;
//!
//! let templates = parse_column_list("id INT, name")?;
//! assert_eq!(templates[0].data_type, DataType::Integer);
//! assert!(!templates[1].data_type.is_known());
//! ```

pub mod inference;
pub mod parser;
pub mod types;

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use types::{DataType, Row, Value};

/// A column of a table, a view, or a column template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub check: Option<CheckConstraint>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            check: None,
        }
    }

    /// A template column without a declared type
    pub fn untyped(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Unknown)
    }

    pub fn with_check(mut self, check: CheckConstraint) -> Self {
        self.check = Some(check);
        self
    }

    /// `name TYPE [CHECK (...)]`, the type omitted when unknown
    pub fn to_sql(&self) -> String {
        let mut sql = self.name.clone();
        if self.data_type.is_known() {
            sql.push(' ');
            sql.push_str(self.data_type.sql_name());
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!(" CHECK ({})", check.to_sql()));
        }
        sql
    }
}

/// Comparison operators of check constraints and row filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" => Some(CompareOp::Eq),
            "<>" | "!=" => Some(CompareOp::NotEq),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::LtEq),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::GtEq),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }

    /// Evaluate `left op right`; `None` when the comparison is unknown (NULL)
    pub fn evaluate(&self, left: &Value, right: &Value) -> Option<bool> {
        let ord = left.compare(right)?;
        Some(match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::NotEq => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::LtEq => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::GtEq => ord != Ordering::Less,
        })
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-column check constraint: `column op literal`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConstraint {
    pub column: String,
    pub op: CompareOp,
    pub operand: Value,
}

impl CheckConstraint {
    pub fn new(column: impl Into<String>, op: CompareOp, operand: Value) -> Self {
        Self {
            column: column.into(),
            op,
            operand,
        }
    }

    /// The same predicate evaluated against a column named `column`
    pub fn for_column(&self, column: &str) -> Self {
        Self {
            column: column.to_string(),
            op: self.op,
            operand: self.operand.clone(),
        }
    }

    /// A NULL value never violates a check constraint
    pub fn check(&self, value: &Value) -> bool {
        self.op.evaluate(value, &self.operand).unwrap_or(true)
    }

    pub fn to_sql(&self) -> String {
        format!("{} {} {}", self.column, self.op, self.operand.to_sql_literal())
    }
}
