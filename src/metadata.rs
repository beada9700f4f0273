//! Catalog snapshots
//!
//! A snapshot records table shapes and view definitions, not rows. It is
//! written as JSON (human-readable), bincode (compact) or gzip-compressed
//! bincode, and replayed into an empty database with [`Database::restore`].
//! Views are replayed with FORCE in id order and then force-recompiled
//! together, so a view defined before something it now reads comes back
//! valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::Database;
use crate::ddl;
use crate::error::{MatViewError, MatViewResult};
use crate::parser::CreateViewStmt;
use crate::schema::Column;
use crate::view::ViewFlags;

/// Format version written into every snapshot
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDescriptor {
    pub name: String,
    pub owner: String,
    /// Canonical query text when the view compiled, the original text otherwise
    pub query_sql: String,
    pub templates: Option<Vec<Column>>,
    pub flags: ViewFlags,
    pub columns: Vec<Column>,
    pub sources: Vec<String>,
    /// Retained compile error, rendered
    pub error: Option<String>,
    pub refresh_rules: Vec<String>,
}

/// Serialized catalog format for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// Schema version for forward compatibility
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub default_schema: String,
    pub tables: Vec<TableDescriptor>,
    pub views: Vec<ViewDescriptor>,
}

impl CatalogSnapshot {
    pub fn capture(db: &Database) -> Self {
        let catalog = db.catalog();

        let tables = catalog
            .tables()
            .iter()
            .map(|t| TableDescriptor {
                name: t.qualified_name(),
                columns: t.columns.clone(),
                indexes: t.indexes(),
            })
            .collect();

        let views = catalog
            .views()
            .iter()
            .map(|v| {
                let definition = v.definition();
                ViewDescriptor {
                    name: v.qualified_name(),
                    owner: v.owner().to_string(),
                    query_sql: definition.query_sql,
                    templates: definition.templates,
                    flags: definition.flags,
                    columns: v.columns(),
                    sources: catalog
                        .sources_of(v.id())
                        .into_iter()
                        .map(|id| catalog.entity_name(id))
                        .collect(),
                    error: v.error().map(|e| e.to_string()),
                    refresh_rules: db
                        .triggers()
                        .rules_for_view(v.id())
                        .iter()
                        .map(|r| r.name.clone())
                        .collect(),
                }
            })
            .collect();

        Self {
            version: SNAPSHOT_VERSION,
            taken_at: Utc::now(),
            default_schema: catalog.default_schema().to_string(),
            tables,
            views,
        }
    }

    /// Recreate every table and view of the snapshot in `db`
    pub fn replay(&self, db: &Database) -> MatViewResult<()> {
        if self.version > SNAPSHOT_VERSION {
            return Err(MatViewError::SerializationError {
                message: format!(
                    "snapshot version {} is newer than supported version {}",
                    self.version, SNAPSHOT_VERSION
                ),
            });
        }

        for table in &self.tables {
            db.create_table(&table.name, table.columns.clone(), false)?;
            for index in &table.indexes {
                db.create_index(index, &table.name, &[])?;
            }
        }

        for view in &self.views {
            let stmt = CreateViewStmt {
                name: view.name.clone(),
                templates: view.templates.clone(),
                query_sql: view.query_sql.clone(),
                flags: ViewFlags {
                    transient: false,
                    ..view.flags
                },
                or_replace: false,
                force: true,
                if_not_exists: false,
            };
            ddl::create_view(db, stmt, &view.owner)?;
        }

        let env = db.compile_env();
        for view in db.catalog().views() {
            view.recompile(&env, true);
        }

        info!(
            "restored snapshot taken at {} ({} tables, {} views)",
            self.taken_at.to_rfc3339(),
            self.tables.len(),
            self.views.len()
        );
        Ok(())
    }

    /// Serialize to JSON format (human-readable, easier debugging)
    pub fn to_json(&self) -> MatViewResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| MatViewError::SerializationError {
            message: format!("Failed to serialize snapshot to JSON: {e}"),
        })
    }

    pub fn from_json(json: &str) -> MatViewResult<Self> {
        serde_json::from_str(json).map_err(|e| MatViewError::SerializationError {
            message: format!("Failed to deserialize snapshot from JSON: {e}"),
        })
    }

    /// Serialize to binary format (compact)
    pub fn to_binary(&self) -> MatViewResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| MatViewError::SerializationError {
            message: format!("Failed to serialize snapshot to binary: {e}"),
        })
    }

    pub fn from_binary(data: &[u8]) -> MatViewResult<Self> {
        bincode::deserialize(data).map_err(|e| MatViewError::SerializationError {
            message: format!("Failed to deserialize binary snapshot: {e}"),
        })
    }

    /// Serialize to gzip-compressed bincode
    pub fn to_compressed(&self) -> MatViewResult<Vec<u8>> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let binary = self.to_binary()?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&binary).map_err(|e| MatViewError::SerializationError {
            message: format!("Failed to compress snapshot: {e}"),
        })?;
        encoder.finish().map_err(|e| MatViewError::SerializationError {
            message: format!("Failed to finish compression: {e}"),
        })
    }

    pub fn from_compressed(data: &[u8]) -> MatViewResult<Self> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let mut decoder = GzDecoder::new(data);
        let mut binary = Vec::new();
        decoder
            .read_to_end(&mut binary)
            .map_err(|e| MatViewError::SerializationError {
                message: format!("Decompression failed: {e}"),
            })?;
        Self::from_binary(&binary)
    }
}

impl Database {
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot::capture(self)
    }

    /// Replay a snapshot; names it defines must not exist yet
    pub fn restore(&self, snapshot: &CatalogSnapshot) -> MatViewResult<()> {
        snapshot.replay(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::ViewStatus;

    fn database() -> Database {
        let db = Database::default();
        db.execute("CREATE TABLE base (id INT CHECK (id > 0), name VARCHAR(20))").unwrap();
        db.execute("CREATE INDEX idx_base_name ON base (name)").unwrap();
        db.execute("INSERT INTO base VALUES (1, 'Hello')").unwrap();
        db.execute("CREATE MATERIALIZED VIEW v(key, label) AS SELECT id, name FROM base").unwrap();
        db.execute("CREATE MATERIALIZED VIEW w AS SELECT label FROM v").unwrap();
        db.execute("CREATE FORCE MATERIALIZED VIEW broken AS SELECT x FROM nowhere").unwrap();
        db
    }

    #[test]
    fn test_capture_describes_catalog() {
        let snapshot = database().snapshot();

        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.tables.len(), 1);
        assert_eq!(snapshot.tables[0].indexes, vec!["idx_base_name"]);

        let names: Vec<&str> = snapshot.views.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["public.v", "public.w", "public.broken"]);

        let v = &snapshot.views[0];
        assert_eq!(v.sources, vec!["public.base"]);
        assert_eq!(v.refresh_rules, vec!["trg_mv_public_v_on_public_base"]);
        assert!(snapshot.views[1].refresh_rules.is_empty());
        assert!(snapshot.views[2].error.as_deref().is_some_and(|e| e.contains("nowhere")));
    }

    #[test]
    fn test_formats_preserve_snapshot() {
        let snapshot = database().snapshot();

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"default_schema\": \"public\""));
        assert_eq!(CatalogSnapshot::from_json(&json).unwrap(), snapshot);
        assert_eq!(CatalogSnapshot::from_binary(&snapshot.to_binary().unwrap()).unwrap(), snapshot);
        assert_eq!(CatalogSnapshot::from_compressed(&snapshot.to_compressed().unwrap()).unwrap(), snapshot);
    }

    #[test]
    fn test_restore_into_empty_database() {
        let snapshot = database().snapshot();
        let restored = Database::default();
        restored.restore(&snapshot).unwrap();

        let v = restored.view("v").unwrap();
        assert_eq!(v.status(), ViewStatus::Valid);
        assert_eq!(v.columns().iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["key", "label"]);
        assert_eq!(restored.view("w").unwrap().status(), ViewStatus::Valid);
        assert_eq!(restored.view("broken").unwrap().status(), ViewStatus::Invalid);

        // shapes only; rows are not part of a snapshot
        assert!(restored.scan("v").unwrap().is_empty());
        restored.execute("INSERT INTO base VALUES (7, 'Seven')").unwrap();
        assert_eq!(restored.scan("w").unwrap().len(), 1);
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut snapshot = database().snapshot();
        snapshot.version = SNAPSHOT_VERSION + 1;
        let result = Database::default().restore(&snapshot);
        crate::error::testing::assert_error_contains(result, "newer than supported");
    }

    #[test]
    fn test_corrupt_input_rejected() {
        crate::error::testing::assert_error_sqlstate(CatalogSnapshot::from_compressed(b"not gzip"), "XX000");
        crate::error::testing::assert_error_sqlstate(CatalogSnapshot::from_json("{"), "XX000");
    }
}
