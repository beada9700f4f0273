//! Parsing helpers for the column-level fragments of DDL:
//! column template lists, column definitions, check clauses and literals.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{CheckConstraint, Column, CompareOp, DataType, Value};
use crate::error::{MatViewError, MatViewResult};
use crate::parser::{compiled, Pattern};

static CHECK_CLAUSE: Pattern = Lazy::new(|| {
    Regex::new(r#"(?is)^\s*("[^"]+"|[A-Za-z_][A-Za-z0-9_]*)\s*(<>|!=|<=|>=|=|<|>)\s*(.+?)\s*$"#)
});

static CHECK_SUFFIX: Pattern = Lazy::new(|| Regex::new(r"(?is)\bCHECK\s*\((.*)\)\s*$"));

/// Column constraints the reference engine accepts and does not enforce
static IGNORED_CONSTRAINTS: Pattern =
    Lazy::new(|| Regex::new(r"(?is)(?:\s+(?:PRIMARY\s+KEY|NOT\s+NULL|NULL|UNIQUE))+\s*$"));

/// Split string by commas, but only at top level (outside parentheses and quotes)
pub fn split_by_top_level_comma(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut paren_depth: i32 = 0;
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    for c in s.chars() {
        match c {
            '(' if !in_single_quote && !in_double_quote => {
                paren_depth += 1;
                current.push(c);
            }
            ')' if !in_single_quote && !in_double_quote => {
                paren_depth = paren_depth.saturating_sub(1);
                current.push(c);
            }
            // a doubled '' toggles twice, which keeps the state right
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                current.push(c);
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                current.push(c);
            }
            ',' if paren_depth == 0 && !in_single_quote && !in_double_quote => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}

/// Strip double quotes from a quoted identifier
pub fn unquote_identifier(ident: &str) -> String {
    let ident = ident.trim();
    if ident.len() >= 2 && ident.starts_with('"') && ident.ends_with('"') {
        ident[1..ident.len() - 1].replace("\"\"", "\"")
    } else {
        ident.to_string()
    }
}

/// Parse a view's column template list: `id INT, name, total DOUBLE`.
///
/// Types are optional; a template without one keeps `DataType::Unknown`
/// so the query expression decides the type.
pub fn parse_column_list(list: &str) -> MatViewResult<Vec<Column>> {
    let mut columns = Vec::new();

    for part in split_by_top_level_comma(list) {
        let (name, rest) = split_name(&part);
        if name.is_empty() {
            return Err(MatViewError::InvalidSelectStatement {
                sql: list.to_string(),
                reason: "Empty column name in column list".to_string(),
            });
        }
        crate::validation::validate_column_name(&name)?;

        let data_type = if rest.is_empty() {
            DataType::Unknown
        } else {
            DataType::parse(rest).ok_or_else(|| MatViewError::InvalidSelectStatement {
                sql: list.to_string(),
                reason: format!("Unknown data type '{}' for column '{}'", rest, name),
            })?
        };
        columns.push(Column::new(name, data_type));
    }

    if columns.is_empty() {
        return Err(MatViewError::InvalidSelectStatement {
            sql: list.to_string(),
            reason: "Column list is empty".to_string(),
        });
    }

    Ok(columns)
}

/// Parse table column definitions: `id INT CHECK (id > 0), name VARCHAR(20)`
pub fn parse_column_definitions(list: &str) -> MatViewResult<Vec<Column>> {
    let mut columns = Vec::new();

    for part in split_by_top_level_comma(list) {
        let (name, rest) = split_name(&part);
        crate::validation::validate_column_name(&name)?;

        let (type_text, check) = match compiled(&CHECK_SUFFIX)?.captures(rest) {
            Some(caps) => {
                let whole = caps.get(0).map_or(rest.len(), |m| m.start());
                let clause = caps.get(1).map_or("", |m| m.as_str());
                (rest[..whole].trim(), Some(parse_check(&name, clause)?))
            }
            None => (rest, None),
        };
        let type_text = compiled(&IGNORED_CONSTRAINTS)?
            .find(type_text)
            .map_or(type_text, |m| type_text[..m.start()].trim());

        let data_type = DataType::parse(type_text).ok_or_else(|| MatViewError::InvalidSelectStatement {
            sql: list.to_string(),
            reason: format!("Unknown data type '{}' for column '{}'", type_text, name),
        })?;

        let mut column = Column::new(name, data_type);
        column.check = check;
        columns.push(column);
    }

    if columns.is_empty() {
        return Err(MatViewError::InvalidSelectStatement {
            sql: list.to_string(),
            reason: "Table must declare at least one column".to_string(),
        });
    }

    Ok(columns)
}

/// Parse a check clause of the form `column op literal` declared on `column`
pub fn parse_check(column: &str, clause: &str) -> MatViewResult<CheckConstraint> {
    let invalid = |reason: &str| MatViewError::InvalidSelectStatement {
        sql: clause.to_string(),
        reason: reason.to_string(),
    };

    let caps = compiled(&CHECK_CLAUSE)?
        .captures(clause)
        .ok_or_else(|| invalid("Check constraint must have the form 'column op literal'"))?;

    let target = unquote_identifier(caps.get(1).map_or("", |m| m.as_str()));
    if !target.eq_ignore_ascii_case(column) {
        return Err(invalid("Check constraint must reference its own column"));
    }

    let op = CompareOp::parse(caps.get(2).map_or("", |m| m.as_str()))
        .ok_or_else(|| invalid("Unknown comparison operator"))?;
    let operand = parse_literal(caps.get(3).map_or("", |m| m.as_str()))
        .ok_or_else(|| invalid("Check operand must be a literal"))?;

    Ok(CheckConstraint::new(column, op, operand))
}

/// Parse a SQL literal: numbers, `'text'` (with `''` escapes), TRUE, FALSE, NULL
pub fn parse_literal(text: &str) -> Option<Value> {
    let text = text.trim();
    let upper = text.to_ascii_uppercase();

    match upper.as_str() {
        "NULL" => return Some(Value::Null),
        "TRUE" => return Some(Value::Boolean(true)),
        "FALSE" => return Some(Value::Boolean(false)),
        _ => {}
    }

    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        let inner = &text[1..text.len() - 1];
        // a lone quote inside means this was more than one literal
        if inner.replace("''", "").contains('\'') {
            return None;
        }
        return Some(Value::Text(inner.replace("''", "'")));
    }

    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    if text.chars().any(|c| c.is_ascii_digit()) {
        if let Ok(d) = text.parse::<f64>() {
            return Some(Value::Double(d));
        }
    }
    None
}

fn split_name(part: &str) -> (String, &str) {
    let part = part.trim();
    let end = if part.starts_with('"') {
        part[1..].find('"').map_or(part.len(), |i| i + 2)
    } else {
        part.find(char::is_whitespace).unwrap_or(part.len())
    };
    (unquote_identifier(&part[..end]), part[end..].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_parens_and_quotes() {
        let parts = split_by_top_level_comma("a INT, b VARCHAR(10), c DECIMAL(10, 2), 'x,y'");
        assert_eq!(parts, vec!["a INT", "b VARCHAR(10)", "c DECIMAL(10, 2)", "'x,y'"]);
    }

    #[test]
    fn test_column_list_with_optional_types() {
        let cols = parse_column_list("id INT, name, \"Location\" VARCHAR(255)").unwrap();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[0].data_type, DataType::Integer);
        assert_eq!(cols[1].data_type, DataType::Unknown);
        assert_eq!(cols[2].name, "Location");
        assert_eq!(cols[2].data_type, DataType::Varchar);
    }

    #[test]
    fn test_column_list_rejects_unknown_type() {
        assert!(parse_column_list("id FANCYTYPE").is_err());
        assert!(parse_column_list("").is_err());
    }

    #[test]
    fn test_column_definitions_with_check() {
        let cols = parse_column_definitions("id INT CHECK (id > 0), name VARCHAR(20)").unwrap();
        assert_eq!(cols[0].check, Some(CheckConstraint::new("id", CompareOp::Gt, Value::Integer(0))));
        assert!(cols[1].check.is_none());
        assert_eq!(cols[1].data_type, DataType::Varchar);
    }

    #[test]
    fn test_column_definitions_ignore_key_and_null_constraints() {
        let cols = parse_column_definitions("id int primary key, name varchar(255) NOT NULL").unwrap();
        assert_eq!(cols[0].data_type, DataType::Integer);
        assert_eq!(cols[1].data_type, DataType::Varchar);

        let cols = parse_column_definitions("id INT NOT NULL UNIQUE CHECK (id > 0)").unwrap();
        assert_eq!(cols[0].data_type, DataType::Integer);
        assert!(cols[0].check.is_some());

        assert!(parse_column_definitions("id int foreign key").is_err());
    }

    #[test]
    fn test_check_must_reference_own_column() {
        assert!(parse_check("id", "other > 0").is_err());
        assert!(parse_check("id", "id > other").is_err());
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("42"), Some(Value::Integer(42)));
        assert_eq!(parse_literal("-1.5"), Some(Value::Double(-1.5)));
        assert_eq!(parse_literal("'it''s'"), Some(Value::Text("it's".to_string())));
        assert_eq!(parse_literal("null"), Some(Value::Null));
        assert_eq!(parse_literal("'a' 'b'"), None);
        assert_eq!(parse_literal("name"), None);
    }
}
