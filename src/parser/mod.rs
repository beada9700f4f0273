//! SQL Parser: statement routing for the DDL surface and table statements
//!
//! This module recognizes:
//! - **CREATE [OR REPLACE] [FORCE] MATERIALIZED VIEW [TABLE_EXPRESSION] name [(cols)] AS query**
//! - **DROP MATERIALIZED VIEW [IF EXISTS] name [CASCADE | RESTRICT]**
//! - **CREATE TABLE / DROP TABLE / TRUNCATE TABLE / ALTER ... RENAME TO / CREATE INDEX**
//! - **INSERT INTO ... VALUES / UPDATE ... SET ... WHERE / DELETE FROM ... WHERE**
//! - **SELECT**, passed through untouched to the query compiler
//!
//! ## Supported Syntax
//!
//! ```sql
//! CREATE MATERIALIZED VIEW emp_loc(name, location) AS
//!     SELECT e.name, l.location FROM employee e JOIN location l ON e.id = l.id;
//!
//! CREATE OR REPLACE FORCE MATERIALIZED VIEW TABLE_EXPRESSION r(n INT) AS SELECT n FROM r;
//!
//! DROP MATERIALIZED VIEW IF EXISTS emp_loc CASCADE;
//! ```
//!
//! ## Limitations
//!
//! - Regex-based parsing of statement shapes; only the view query itself is tokenized
//! - WHERE clauses of UPDATE/DELETE are conjunctions of `column op literal`
//! - A quoted string containing ` WHERE ` confuses the UPDATE splitter

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MatViewError, MatViewResult};
use crate::schema::parser::{parse_column_definitions, parse_column_list, parse_literal, split_by_top_level_comma, unquote_identifier};
use crate::schema::{Column, CompareOp, Row, Value};
use crate::view::ViewFlags;

/// A regex compiled on first use; a compile failure is reported, not panicked on
pub(crate) type Pattern = Lazy<Result<Regex, regex::Error>>;

pub(crate) fn compiled(pattern: &'static Pattern) -> MatViewResult<&'static Regex> {
    pattern
        .as_ref()
        .map_err(|e| crate::internal_error!("Regex compilation failed: {}", e))
}

const NAME: &str = r#"(?:"[^"]+"|[A-Za-z_][A-Za-z0-9_$]*)(?:\s*\.\s*(?:"[^"]+"|[A-Za-z_][A-Za-z0-9_$]*))?"#;

macro_rules! statement_pattern {
    ($($part:expr),+ $(,)?) => {
        Lazy::new(|| Regex::new(&[$($part),+].concat()))
    };
}

static CREATE_VIEW: Pattern = statement_pattern!(
    r"(?is)^\s*CREATE\s+(OR\s+REPLACE\s+)?(FORCE\s+)?MATERIALIZED\s+VIEW\s+",
    r"(TABLE_EXPRESSION\s+)?(IF\s+NOT\s+EXISTS\s+)?(",
    NAME,
    r")(?:\s*\((.*?)\))?\s+AS\s+(.+?)\s*;?\s*$",
);

static DROP_VIEW: Pattern = statement_pattern!(
    r"(?is)^\s*DROP\s+MATERIALIZED\s+VIEW\s+(IF\s+EXISTS\s+)?(",
    NAME,
    r")(\s+CASCADE|\s+RESTRICT)?\s*;?\s*$",
);

static CREATE_TABLE: Pattern = statement_pattern!(
    r"(?is)^\s*CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?(",
    NAME,
    r")\s*\((.*)\)\s*;?\s*$",
);

static DROP_TABLE: Pattern = statement_pattern!(r"(?is)^\s*DROP\s+TABLE\s+(IF\s+EXISTS\s+)?(", NAME, r")\s*;?\s*$");

static TRUNCATE: Pattern = statement_pattern!(r"(?is)^\s*TRUNCATE\s+TABLE\s+(", NAME, r")\s*;?\s*$");

static RENAME: Pattern = statement_pattern!(
    r"(?is)^\s*ALTER\s+(TABLE|VIEW|MATERIALIZED\s+VIEW)\s+(",
    NAME,
    r")\s+RENAME\s+TO\s+(",
    NAME,
    r")\s*;?\s*$",
);

static CREATE_INDEX: Pattern = statement_pattern!(
    r"(?is)^\s*CREATE\s+(?:UNIQUE\s+)?INDEX\s+(",
    NAME,
    r")\s+ON\s+(",
    NAME,
    r")\s*\(([^)]*)\)\s*;?\s*$",
);

static INSERT: Pattern = statement_pattern!(
    r"(?is)^\s*INSERT\s+INTO\s+(",
    NAME,
    r")\s*(?:\(([^)]*)\))?\s*VALUES\s*(.+?)\s*;?\s*$",
);

static UPDATE: Pattern = statement_pattern!(
    r"(?is)^\s*UPDATE\s+(",
    NAME,
    r")\s+SET\s+(.+?)(?:\s+WHERE\s+(.+?))?\s*;?\s*$",
);

static DELETE: Pattern = statement_pattern!(r"(?is)^\s*DELETE\s+FROM\s+(", NAME, r")(?:\s+WHERE\s+(.+?))?\s*;?\s*$");

static SELECT: Pattern = Lazy::new(|| Regex::new(r"(?is)^\s*SELECT\b"));

static COMPARISON: Pattern = Lazy::new(|| {
    Regex::new(r#"(?is)^\s*("[^"]+"|[A-Za-z_][A-Za-z0-9_$]*)\s*(<>|!=|<=|>=|=|<|>)\s*(.+?)\s*$"#)
});

static KEYWORD_AND: Pattern = Lazy::new(|| Regex::new(r"(?i)^AND$"));

#[derive(Debug, Clone, PartialEq)]
pub struct CreateViewStmt {
    pub name: String,
    pub templates: Option<Vec<Column>>,
    pub query_sql: String,
    pub flags: ViewFlags,
    pub or_replace: bool,
    pub force: bool,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropViewStmt {
    pub name: String,
    pub if_exists: bool,
    pub cascade: bool,
}

/// `column op literal` in a WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Filter {
    /// Unknown (NULL) comparisons do not match
    pub fn matches(&self, value: &Value) -> bool {
        self.op.evaluate(value, &self.value).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateMaterializedView(CreateViewStmt),
    DropMaterializedView(DropViewStmt),
    CreateTable {
        name: String,
        columns: Vec<Column>,
        if_not_exists: bool,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Row>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        filters: Vec<Filter>,
    },
    Delete {
        table: String,
        filters: Vec<Filter>,
    },
    Truncate {
        table: String,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
    },
    Rename {
        name: String,
        new_name: String,
    },
    Query(String),
}

fn syntax_error(sql: &str, reason: impl Into<String>) -> MatViewError {
    MatViewError::InvalidSelectStatement {
        sql: sql.to_string(),
        reason: reason.into(),
    }
}

/// `"Schema" . name` → `Schema.name`
fn normalize_name(raw: &str) -> String {
    raw.split('.').map(unquote_identifier).collect::<Vec<_>>().join(".")
}

fn group<'t>(caps: &regex::Captures<'t>, i: usize) -> &'t str {
    caps.get(i).map_or("", |m| m.as_str())
}

fn flag(caps: &regex::Captures<'_>, i: usize) -> bool {
    caps.get(i).is_some()
}

/// Parse one statement into its typed form
pub fn parse_statement(sql: &str) -> MatViewResult<Statement> {
    if let Some(caps) = compiled(&CREATE_VIEW)?.captures(sql) {
        return parse_create_view(&caps).map(Statement::CreateMaterializedView);
    }
    if let Some(caps) = compiled(&DROP_VIEW)?.captures(sql) {
        return Ok(Statement::DropMaterializedView(DropViewStmt {
            name: normalize_name(group(&caps, 2)),
            if_exists: flag(&caps, 1),
            cascade: group(&caps, 3).trim().eq_ignore_ascii_case("CASCADE"),
        }));
    }
    if let Some(caps) = compiled(&CREATE_TABLE)?.captures(sql) {
        return Ok(Statement::CreateTable {
            name: normalize_name(group(&caps, 2)),
            columns: parse_column_definitions(group(&caps, 3))?,
            if_not_exists: flag(&caps, 1),
        });
    }
    if let Some(caps) = compiled(&DROP_TABLE)?.captures(sql) {
        return Ok(Statement::DropTable {
            name: normalize_name(group(&caps, 2)),
            if_exists: flag(&caps, 1),
        });
    }
    if let Some(caps) = compiled(&TRUNCATE)?.captures(sql) {
        return Ok(Statement::Truncate {
            table: normalize_name(group(&caps, 1)),
        });
    }
    if let Some(caps) = compiled(&RENAME)?.captures(sql) {
        return Ok(Statement::Rename {
            name: normalize_name(group(&caps, 2)),
            new_name: normalize_name(group(&caps, 3)),
        });
    }
    if let Some(caps) = compiled(&CREATE_INDEX)?.captures(sql) {
        return Ok(Statement::CreateIndex {
            name: normalize_name(group(&caps, 1)),
            table: normalize_name(group(&caps, 2)),
            columns: split_by_top_level_comma(group(&caps, 3))
                .iter()
                .map(|c| unquote_identifier(c))
                .collect(),
        });
    }
    if let Some(caps) = compiled(&INSERT)?.captures(sql) {
        let columns = caps.get(2).map(|m| {
            split_by_top_level_comma(m.as_str())
                .iter()
                .map(|c| unquote_identifier(c))
                .collect()
        });
        return Ok(Statement::Insert {
            table: normalize_name(group(&caps, 1)),
            columns,
            rows: parse_values(sql, group(&caps, 3))?,
        });
    }
    if let Some(caps) = compiled(&UPDATE)?.captures(sql) {
        let mut assignments = Vec::new();
        for part in split_by_top_level_comma(group(&caps, 2)) {
            let filter = parse_comparison(sql, &part)?;
            if filter.op != CompareOp::Eq {
                return Err(syntax_error(sql, format!("Expected 'column = value' in SET, found '{}'", part)));
            }
            assignments.push((filter.column, filter.value));
        }
        return Ok(Statement::Update {
            table: normalize_name(group(&caps, 1)),
            assignments,
            filters: parse_filters(sql, caps.get(3).map(|m| m.as_str()))?,
        });
    }
    if let Some(caps) = compiled(&DELETE)?.captures(sql) {
        return Ok(Statement::Delete {
            table: normalize_name(group(&caps, 1)),
            filters: parse_filters(sql, caps.get(2).map(|m| m.as_str()))?,
        });
    }
    if compiled(&SELECT)?.is_match(sql) {
        return Ok(Statement::Query(sql.trim().trim_end_matches(';').trim().to_string()));
    }

    Err(syntax_error(sql, "Unsupported statement"))
}

fn parse_create_view(caps: &regex::Captures<'_>) -> MatViewResult<CreateViewStmt> {
    let table_expression = flag(caps, 3);
    let templates = match caps.get(6) {
        Some(list) => Some(parse_column_list(list.as_str())?),
        None => None,
    };

    let query_sql = group(caps, 7).trim().to_string();
    if query_sql.is_empty() {
        return Err(syntax_error(group(caps, 0), "Missing query after AS"));
    }

    Ok(CreateViewStmt {
        name: normalize_name(group(caps, 5)),
        templates,
        query_sql,
        flags: ViewFlags {
            recursion_permitted: table_expression,
            table_expression,
            transient: false,
        },
        or_replace: flag(caps, 1),
        force: flag(caps, 2),
        if_not_exists: flag(caps, 4),
    })
}

/// `(1, 'a'), (2, NULL)` → rows of literals
fn parse_values(sql: &str, values: &str) -> MatViewResult<Vec<Row>> {
    let mut rows = Vec::new();
    for tuple in split_by_top_level_comma(values) {
        let inner = tuple
            .strip_prefix('(')
            .and_then(|t| t.strip_suffix(')'))
            .ok_or_else(|| syntax_error(sql, format!("Expected a parenthesized row, found '{}'", tuple)))?;

        let row = split_by_top_level_comma(inner)
            .iter()
            .map(|v| parse_literal(v).ok_or_else(|| syntax_error(sql, format!("Expected a literal, found '{}'", v))))
            .collect::<MatViewResult<Row>>()?;
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(syntax_error(sql, "VALUES needs at least one row"));
    }
    Ok(rows)
}

fn parse_comparison(sql: &str, text: &str) -> MatViewResult<Filter> {
    let caps = compiled(&COMPARISON)?
        .captures(text)
        .ok_or_else(|| syntax_error(sql, format!("Expected 'column op literal', found '{}'", text.trim())))?;

    let op = CompareOp::parse(group(&caps, 2)).ok_or_else(|| syntax_error(sql, "Unknown comparison operator"))?;
    let value = parse_literal(group(&caps, 3))
        .ok_or_else(|| syntax_error(sql, format!("Expected a literal, found '{}'", group(&caps, 3))))?;

    Ok(Filter {
        column: unquote_identifier(group(&caps, 1)),
        op,
        value,
    })
}

fn parse_filters(sql: &str, clause: Option<&str>) -> MatViewResult<Vec<Filter>> {
    match clause {
        Some(clause) => split_conjunction(clause)?
            .iter()
            .map(|part| parse_comparison(sql, part))
            .collect(),
        None => Ok(Vec::new()),
    }
}

/// Split on top-level `AND` words outside string literals
fn split_conjunction(clause: &str) -> MatViewResult<Vec<String>> {
    let and = compiled(&KEYWORD_AND)?;
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut word = String::new();
    let mut in_quote = false;

    let flush_word = |word: &mut String, current: &mut String, parts: &mut Vec<String>| {
        if and.is_match(word) {
            parts.push(current.trim().to_string());
            current.clear();
        } else {
            current.push_str(word);
        }
        word.clear();
    };

    for c in clause.chars() {
        if c == '\'' {
            in_quote = !in_quote;
        }
        if !in_quote && (c.is_alphanumeric() || c == '_') {
            word.push(c);
            continue;
        }
        flush_word(&mut word, &mut current, &mut parts);
        current.push(c);
    }
    flush_word(&mut word, &mut current, &mut parts);

    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::schema::DataType;

    fn create(sql: &str) -> CreateViewStmt {
        match parse_statement(sql).unwrap() {
            Statement::CreateMaterializedView(stmt) => stmt,
            other => panic!("expected CREATE MATERIALIZED VIEW, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_view() {
        let stmt = create("CREATE MATERIALIZED VIEW v AS SELECT id, name FROM base");

        assert_eq!(stmt.name, "v");
        assert_eq!(stmt.query_sql, "SELECT id, name FROM base");
        assert!(stmt.templates.is_none());
        assert!(!stmt.or_replace && !stmt.force);
        assert_eq!(stmt.flags, ViewFlags::default());
    }

    #[test]
    fn test_parse_every_option() {
        let stmt = create(
            "create or replace force materialized view table_expression \"Sales\".r(n INT, label VARCHAR(20)) as\n\
             select n, 'x' from r;",
        );

        assert_eq!(stmt.name, "Sales.r");
        assert!(stmt.or_replace && stmt.force);
        assert!(stmt.flags.table_expression && stmt.flags.recursion_permitted);
        assert_eq!(
            stmt.templates,
            Some(vec![Column::new("n", DataType::Integer), Column::new("label", DataType::Varchar)])
        );
        assert_eq!(stmt.query_sql, "select n, 'x' from r");
    }

    #[test]
    fn test_parse_multiline_view() {
        let stmt = create(
            r#"
            CREATE MATERIALIZED VIEW emp_loc AS
            SELECT
                e.name,
                l.location
            FROM employee e JOIN location l ON e.id = l.id
        "#,
        );
        assert_eq!(stmt.name, "emp_loc");
        assert!(stmt.query_sql.contains("l.location"));
    }

    #[test]
    fn test_parse_drop_view() {
        assert_eq!(
            parse_statement("DROP MATERIALIZED VIEW IF EXISTS public.v CASCADE;").unwrap(),
            Statement::DropMaterializedView(DropViewStmt {
                name: "public.v".to_string(),
                if_exists: true,
                cascade: true,
            })
        );
        assert_eq!(
            parse_statement("drop materialized view v restrict").unwrap(),
            Statement::DropMaterializedView(DropViewStmt {
                name: "v".to_string(),
                if_exists: false,
                cascade: false,
            })
        );
    }

    #[test]
    fn test_parse_table_statements() {
        match parse_statement("CREATE TABLE base (id INT CHECK (id > 0), name VARCHAR(255))").unwrap() {
            Statement::CreateTable { name, columns, .. } => {
                assert_eq!(name, "base");
                assert_eq!(columns.len(), 2);
                assert!(columns[0].check.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            parse_statement("INSERT INTO base VALUES (1, 'Hello'), (2, 'it''s, ok')").unwrap(),
            Statement::Insert {
                table: "base".to_string(),
                columns: None,
                rows: vec![row![1, "Hello"], row![2, "it's, ok"]],
            }
        );

        assert_eq!(
            parse_statement("UPDATE base SET name = 'Brand' WHERE id >= 2 AND name = 'band and more'").unwrap(),
            Statement::Update {
                table: "base".to_string(),
                assignments: vec![("name".to_string(), Value::from("Brand"))],
                filters: vec![
                    Filter { column: "id".to_string(), op: CompareOp::GtEq, value: Value::Integer(2) },
                    Filter { column: "name".to_string(), op: CompareOp::Eq, value: Value::from("band and more") },
                ],
            }
        );

        assert_eq!(
            parse_statement("DELETE FROM base").unwrap(),
            Statement::Delete { table: "base".to_string(), filters: vec![] }
        );
        assert_eq!(
            parse_statement("ALTER TABLE base RENAME TO base2").unwrap(),
            Statement::Rename { name: "base".to_string(), new_name: "base2".to_string() }
        );
        assert_eq!(
            parse_statement("CREATE INDEX idx ON base (name)").unwrap(),
            Statement::CreateIndex {
                name: "idx".to_string(),
                table: "base".to_string(),
                columns: vec!["name".to_string()],
            }
        );
        assert_eq!(
            parse_statement("SELECT * FROM base;").unwrap(),
            Statement::Query("SELECT * FROM base".to_string())
        );
    }

    #[test]
    fn test_parse_errors() {
        crate::error::testing::assert_error_sqlstate(parse_statement("GRANT ALL ON base TO bob"), "42601");
        crate::error::testing::assert_error_sqlstate(parse_statement("INSERT INTO base VALUES (1, nope)"), "42601");
        crate::error::testing::assert_error_sqlstate(parse_statement("CREATE MATERIALIZED VIEW v(x BLOB) AS SELECT 1 FROM t"), "42601");
    }

    #[test]
    fn test_filter_null_never_matches() {
        let filter = Filter { column: "id".to_string(), op: CompareOp::Eq, value: Value::Integer(1) };
        assert!(filter.matches(&Value::Integer(1)));
        assert!(!filter.matches(&Value::Null));
    }
}
