use std::fmt;

pub mod testing;

/// Main error type for the materialized view subsystem
#[derive(Debug, Clone, PartialEq)]
pub enum MatViewError {
    // ============ Catalog Errors (42xxx) ============
    /// Table or view not found
    ObjectNotFound {
        name: String,
    },

    /// Table or view already exists
    ObjectAlreadyExists {
        name: String,
    },

    /// Invalid identifier
    InvalidName {
        name: String,
        reason: String,
    },

    // ============ Dependency Errors (55xxx / 54xxx) ============
    /// Circular dependency detected
    CircularDependency {
        cycle: Vec<String>,
    },

    /// Maximum dependency depth exceeded
    DependencyDepthExceeded {
        depth: usize,
        max_depth: usize,
    },

    // ============ Compile Errors (42xxx) ============
    /// Defining query is not a valid read query
    InvalidSelectStatement {
        sql: String,
        reason: String,
    },

    /// Column referenced by a query or statement does not exist
    ColumnNotFound {
        column: String,
        context: String,
    },

    /// Value does not fit the declared column type
    TypeMismatch {
        column: String,
        expected: String,
        found: String,
    },

    /// Row violates a column check constraint
    CheckViolation {
        column: String,
        constraint: String,
    },

    // ============ View State Errors ============
    /// View carries a retained compile error and cannot be scanned
    ViewInvalid {
        view: String,
        reason: String,
    },

    /// Operation is never supported against the entity kind
    UnsupportedOperation {
        operation: String,
        entity: String,
    },

    // ============ Refresh Errors ============
    /// Derived read returned zero or many rows where exactly one was expected
    CardinalityViolation {
        view: String,
        rows: usize,
    },

    /// Synthesized refresh statement failed during execution
    RefreshReconstructionFailed {
        view: String,
        rule: String,
        reason: String,
    },

    // ============ I/O and System Errors (XX000) ============
    /// Catalog bookkeeping failed
    CatalogError {
        operation: String,
        reason: String,
    },

    /// Row storage failed
    StorageError {
        store: String,
        reason: String,
    },

    /// Serialization/deserialization failed
    SerializationError {
        message: String,
    },

    /// Configuration error (invalid setting value)
    ConfigError {
        setting: String,
        value: String,
        reason: String,
    },

    /// Internal error (bug in the subsystem)
    InternalError {
        message: String,
        file: &'static str,
        line: u32,
    },
}

impl MatViewError {
    /// Get the SQLSTATE code for this error
    pub fn sqlstate(&self) -> &'static str {
        use MatViewError::*;
        match self {
            ObjectNotFound { .. } => "42P01",      // Undefined table
            ObjectAlreadyExists { .. } => "42P07", // Duplicate table
            InvalidName { .. } => "42602",         // Invalid name

            CircularDependency { .. } => "55P03", // Lock not available (cycle)
            DependencyDepthExceeded { .. } => "54001", // Statement too complex

            InvalidSelectStatement { .. } => "42601", // Syntax error
            ColumnNotFound { .. } => "42703",         // Undefined column
            TypeMismatch { .. } => "42804",           // Datatype mismatch
            CheckViolation { .. } => "23514",         // Check violation

            ViewInvalid { .. } => "55000",          // Object not in prerequisite state
            UnsupportedOperation { .. } => "0A000", // Feature not supported

            CardinalityViolation { .. } => "21000",
            RefreshReconstructionFailed { .. } => "XX000",

            CatalogError { .. } => "XX000",
            StorageError { .. } => "XX000",
            SerializationError { .. } => "XX000",
            ConfigError { .. } => "XX000",
            InternalError { .. } => "XX000",
        }
    }

    /// Create internal error with file/line info
    pub fn internal(message: String, file: &'static str, line: u32) -> Self {
        MatViewError::InternalError { message, file, line }
    }

    /// True when this is a "relation not found" diagnostic naming `name`.
    ///
    /// A view whose own definition fails this way is referencing itself,
    /// which is how recursive definitions are recognized while compiling.
    /// When both names carry a schema they must agree in full; an
    /// unqualified reference matches on the object name alone.
    pub fn is_relation_not_found(&self, name: &str) -> bool {
        match self {
            MatViewError::ObjectNotFound { name: missing } => match (missing.rsplit_once('.'), name.rsplit_once('.')) {
                (Some(_), Some(_)) => missing.eq_ignore_ascii_case(name),
                _ => {
                    let missing = missing.rsplit('.').next().unwrap_or(missing);
                    let name = name.rsplit('.').next().unwrap_or(name);
                    missing.eq_ignore_ascii_case(name)
                }
            },
            _ => false,
        }
    }

    /// True when this diagnostic blames the invalid view `name`
    pub fn is_invalid_view(&self, name: &str) -> bool {
        match self {
            MatViewError::ViewInvalid { view, .. } => view.eq_ignore_ascii_case(name),
            _ => false,
        }
    }

    /// Wrap an execution failure of a refresh rule
    pub fn refresh_failed(view: &str, rule: &str, cause: &MatViewError) -> Self {
        match cause {
            MatViewError::RefreshReconstructionFailed { .. } | MatViewError::CardinalityViolation { .. } => {
                cause.clone()
            }
            other => MatViewError::RefreshReconstructionFailed {
                view: view.to_string(),
                rule: rule.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl fmt::Display for MatViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MatViewError::*;
        match self {
            ObjectNotFound { name } => {
                write!(f, "Table or view \"{}\" not found", name)
            }
            ObjectAlreadyExists { name } => {
                write!(f, "Table or view \"{}\" already exists", name)
            }
            InvalidName { name, reason } => {
                write!(f, "Invalid name '{}': {}", name, reason)
            }
            CircularDependency { cycle } => {
                write!(f, "Circular dependency detected: {}", cycle.join(" → "))
            }
            DependencyDepthExceeded { depth, max_depth } => {
                write!(f, "Dependency depth {} exceeds maximum {}", depth, max_depth)
            }
            InvalidSelectStatement { sql, reason } => {
                write!(f, "Invalid SELECT statement: {}\nSQL: {}", reason, truncate_sql(sql))
            }
            ColumnNotFound { column, context } => {
                write!(f, "Column \"{}\" not found in {}", column, context)
            }
            TypeMismatch { column, expected, found } => {
                write!(f, "Type mismatch for column \"{}\": expected {}, found {}", column, expected, found)
            }
            CheckViolation { column, constraint } => {
                write!(f, "Check constraint violation on column \"{}\": {}", column, constraint)
            }
            ViewInvalid { view, reason } => {
                write!(f, "View \"{}\" is invalid: {}", view, reason)
            }
            UnsupportedOperation { operation, entity } => {
                write!(f, "Feature not supported: \"{}\" on {}", operation, entity)
            }
            CardinalityViolation { view, rows } => {
                write!(f, "Refresh of \"{}\" expected exactly one derived row, got {}", view, rows)
            }
            RefreshReconstructionFailed { view, rule, reason } => {
                write!(f, "Refresh rule '{}' for \"{}\" failed: {}", rule, view, reason)
            }
            CatalogError { operation, reason } => {
                write!(f, "Catalog operation '{}' failed: {}", operation, reason)
            }
            StorageError { store, reason } => {
                write!(f, "Storage error on '{}': {}", store, reason)
            }
            SerializationError { message } => {
                write!(f, "Serialization error: {}", message)
            }
            ConfigError { setting, value, reason } => {
                write!(f, "Configuration error for '{}': {} (value: {})", setting, reason, value)
            }
            InternalError { message, file, line } => {
                write!(f, "Internal error at {}:{}: {}\nPlease report this bug.", file, line, message)
            }
        }
    }
}

fn truncate_sql(sql: &str) -> &str {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => &sql[..idx],
        None => sql,
    }
}

impl std::error::Error for MatViewError {}

/// Result type for materialized view operations
pub type MatViewResult<T> = Result<T, MatViewError>;

/// Convert serde_json::Error to MatViewError
impl From<serde_json::Error> for MatViewError {
    fn from(e: serde_json::Error) -> Self {
        MatViewError::SerializationError {
            message: format!("JSON serialization error: {}", e),
        }
    }
}

/// Convert bincode::Error to MatViewError
impl From<bincode::Error> for MatViewError {
    fn from(e: bincode::Error) -> Self {
        MatViewError::SerializationError {
            message: format!("Binary serialization error: {}", e),
        }
    }
}

/// Convert regex::Error to MatViewError
impl From<regex::Error> for MatViewError {
    fn from(e: regex::Error) -> Self {
        MatViewError::InvalidSelectStatement {
            sql: "Unknown".to_string(),
            reason: format!("Regex compilation failed: {}", e),
        }
    }
}

/// Convert std::io::Error to MatViewError
impl From<std::io::Error> for MatViewError {
    fn from(e: std::io::Error) -> Self {
        MatViewError::SerializationError {
            message: format!("I/O error: {}", e),
        }
    }
}

/// Helper macro for creating internal errors with automatic file/line
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::MatViewError::internal($msg.to_string(), file!(), line!())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::MatViewError::internal(format!($fmt, $($arg)*), file!(), line!())
    };
}

/// Unwrap an `Option` or return the given error
#[macro_export]
macro_rules! require {
    ($opt:expr, $err:expr) => {
        match $opt {
            Some(v) => v,
            None => return Err($err),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = MatViewError::ObjectNotFound {
            name: "TEST".to_string(),
        };

        let msg = err.to_string();
        assert_eq!(msg, "Table or view \"TEST\" not found");
        assert_eq!(err.sqlstate(), "42P01");
    }

    #[test]
    fn test_relation_not_found_matching() {
        let err = MatViewError::ObjectNotFound {
            name: "public.R".to_string(),
        };

        assert!(err.is_relation_not_found("r"));
        assert!(err.is_relation_not_found("PUBLIC.r"));
        assert!(!err.is_relation_not_found("rr"));

        // a qualified reference only matches its own schema
        assert!(!err.is_relation_not_found("other.r"));
        let unqualified = MatViewError::ObjectNotFound { name: "r".to_string() };
        assert!(unqualified.is_relation_not_found("other.r"));

        let other = MatViewError::ColumnNotFound {
            column: "r".to_string(),
            context: "r".to_string(),
        };
        assert!(!other.is_relation_not_found("r"));
    }

    #[test]
    fn test_invalid_view_matches_qualified_name() {
        let err = MatViewError::ViewInvalid {
            view: "public.v1".to_string(),
            reason: "Table or view \"gone\" not found".to_string(),
        };

        assert_eq!(err.sqlstate(), "55000");
        assert!(err.is_invalid_view("PUBLIC.V1"));
        assert!(!err.is_invalid_view("public.v2"));
        assert!(!err.is_relation_not_found("v1"));
    }

    #[test]
    fn test_circular_dependency_message() {
        let err = MatViewError::CircularDependency {
            cycle: vec!["v_a".to_string(), "v_b".to_string(), "v_a".to_string()],
        };

        let msg = err.to_string();
        assert!(msg.contains("v_a → v_b → v_a"));
        assert_eq!(err.sqlstate(), "55P03");
    }

    #[test]
    fn test_internal_error_macro() {
        let err = internal_error!("Test error at {}", "location");

        match err {
            MatViewError::InternalError { message, file, line } => {
                assert!(message.contains("Test error"));
                assert!(file.ends_with("mod.rs"));
                assert!(line > 0);
            }
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_refresh_failed_keeps_cardinality() {
        let cause = MatViewError::CardinalityViolation {
            view: "mv".to_string(),
            rows: 0,
        };
        assert_eq!(MatViewError::refresh_failed("mv", "r1", &cause), cause);

        let wrapped = MatViewError::refresh_failed(
            "mv",
            "r1",
            &MatViewError::StorageError { store: "t".to_string(), reason: "gone".to_string() },
        );
        assert_eq!(wrapped.sqlstate(), "XX000");
        assert!(wrapped.to_string().contains("gone"));
    }

    #[test]
    fn test_long_sql_is_truncated() {
        let sql = "x".repeat(300);
        let err = MatViewError::InvalidSelectStatement {
            sql,
            reason: "bad".to_string(),
        };
        assert!(err.to_string().len() < 200);
    }
}
