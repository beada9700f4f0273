//! Input Validation Module
//!
//! Every name that reaches the catalog through DDL or the table API passes
//! through here first. Identifiers are checked against a whitelist
//! (alphanumeric + underscore, no leading digit, bounded length), so names
//! can be echoed into canonical SQL text without quoting.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use matview::validation::validate_sql_identifier;
//!
//! validate_sql_identifier("orders", "table_name")?;
//! ```

use crate::config::MAX_IDENTIFIER_LENGTH;
use crate::error::{MatViewError, MatViewResult};

/// Validate an identifier (table, view, column or schema name)
///
/// Allows alphanumeric characters and underscores; rejects quotes,
/// semicolons, dashes, whitespace and a leading digit.
///
/// # Examples
///
/// ```rust,ignore
/// validate_sql_identifier("my_table", "table_name")?;     // ✓
/// validate_sql_identifier("users; DROP TABLE", "table")?;  // ✗ dangerous char
/// validate_sql_identifier("user-data", "table")?;          // ✗ dash
/// ```
pub fn validate_sql_identifier(identifier: &str, param_name: &str) -> MatViewResult<()> {
    validate_identifier_with_limit(identifier, param_name, MAX_IDENTIFIER_LENGTH)
}

/// Same as [`validate_sql_identifier`] with a caller-provided length limit
pub fn validate_identifier_with_limit(identifier: &str, param_name: &str, max_len: usize) -> MatViewResult<()> {
    let invalid = |reason: String| MatViewError::InvalidName {
        name: sanitize_for_logging(identifier),
        reason: format!("{} ({})", reason, param_name),
    };

    let first = match identifier.chars().next() {
        Some(c) => c,
        None => return Err(invalid("Identifier cannot be empty".to_string())),
    };

    let dangerous_chars = [';', '-', '\'', '"', '/', '*', '\\', '\0'];
    for &ch in &dangerous_chars {
        if identifier.contains(ch) {
            return Err(invalid(format!("Identifier contains dangerous character: '{}'", ch)));
        }
    }

    if !identifier.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(invalid(
            "Identifier must contain only alphanumeric characters and underscores".to_string(),
        ));
    }

    if first.is_numeric() {
        return Err(invalid("Identifier cannot start with a digit".to_string()));
    }

    if identifier.chars().count() > max_len {
        return Err(invalid(format!("Identifier too long (max {} characters)", max_len)));
    }

    Ok(())
}

/// Validate a possibly schema-qualified name (`schema.name` or `name`)
pub fn validate_qualified_name(name: &str, param_name: &str, max_len: usize) -> MatViewResult<()> {
    let mut parts = name.split('.');
    let count = name.split('.').count();
    if count > 2 {
        return Err(MatViewError::InvalidName {
            name: sanitize_for_logging(name),
            reason: format!("Too many name qualifiers ({})", param_name),
        });
    }
    parts.try_for_each(|part| validate_identifier_with_limit(part, param_name, max_len))
}

/// Validate column name (alias for identifier)
pub fn validate_column_name(name: &str) -> MatViewResult<()> {
    validate_sql_identifier(name, "column_name")
}

/// Sanitize string for logging (truncate, escape control chars)
fn sanitize_for_logging(s: &str) -> String {
    let max_len = 50;
    let truncated = match s.char_indices().nth(max_len) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    };

    truncated
        .replace('\0', "\\0")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}
