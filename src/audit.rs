use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditOperation {
    Create,
    Replace,
    Drop,
    Rebuild,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub operation: AuditOperation,
    pub entity: String,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    pub details: serde_json::Value,
}

/// In-memory DDL audit trail, oldest entry first
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, operation: AuditOperation, entity: &str, user: &str, details: serde_json::Value) {
        self.entries.lock().push(AuditEntry {
            operation,
            entity: entity.to_string(),
            performed_by: user.to_string(),
            performed_at: Utc::now(),
            details,
        });
    }

    /// Log view creation
    pub fn log_create(&self, entity: &str, user: &str, definition: &str) {
        self.push(
            AuditOperation::Create,
            entity,
            user,
            json!({
                "definition": definition,
                "version": env!("CARGO_PKG_VERSION")
            }),
        );
    }

    /// Log OR REPLACE of an existing view
    pub fn log_replace(&self, entity: &str, user: &str, previous: &str, definition: &str) {
        self.push(
            AuditOperation::Replace,
            entity,
            user,
            json!({
                "previous": previous,
                "definition": definition
            }),
        );
    }

    /// Log view drop
    pub fn log_drop(&self, entity: &str, user: &str, cascade: bool) {
        self.push(AuditOperation::Drop, entity, user, json!({ "cascade": cascade }));
    }

    /// Log a full rebuild of a backing store
    pub fn log_rebuild(&self, entity: &str, rows_affected: usize) {
        self.push(
            AuditOperation::Rebuild,
            entity,
            "system",
            json!({ "rows_affected": rows_affected }),
        );
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn entries_for(&self, entity: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.entity.eq_ignore_ascii_case(entity))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_in_order() {
        let log = AuditLog::new();
        log.log_create("public.v", "alice", "SELECT 1 FROM t");
        log.log_rebuild("public.v", 3);
        log.log_drop("public.v", "bob", false);

        let entries = log.entries_for("PUBLIC.V");
        let ops: Vec<AuditOperation> = entries.iter().map(|e| e.operation).collect();
        assert_eq!(ops, vec![AuditOperation::Create, AuditOperation::Rebuild, AuditOperation::Drop]);
        assert_eq!(entries[0].details["definition"], "SELECT 1 FROM t");
        assert_eq!(entries[1].details["rows_affected"], 3);
        assert_eq!(entries[2].performed_by, "bob");
    }

    #[test]
    fn test_serializes_operation_uppercase() {
        let log = AuditLog::new();
        log.log_drop("public.v", "alice", true);
        let json = serde_json::to_string(&log.entries()[0]).unwrap();
        assert!(json.contains("\"DROP\""));
        assert!(json.contains("\"cascade\":true"));
    }
}
