use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::{Entity, EntityId};
use crate::database::Database;
use crate::dependency::remove_refresh_rules;
use crate::error::{MatViewError, MatViewResult};
use crate::parser::DropViewStmt;
use crate::view::MaterializedView;

/// Drop a materialized view
///
/// Returns `false` when the view did not exist and IF EXISTS was given.
/// With CASCADE every transitive dependent is dropped first; without it the
/// dependents stay registered and are force-recompiled into the invalid
/// state, to come back once something of the dropped name exists again.
pub fn drop_view(db: &Database, stmt: &DropViewStmt, user: &str) -> MatViewResult<bool> {
    let view = match db.catalog().lookup(&stmt.name) {
        Some(Entity::View(view)) => view,
        Some(Entity::Table(_)) | None if stmt.if_exists => {
            info!("materialized view {} does not exist, skipping", stmt.name);
            return Ok(false);
        }
        _ => {
            return Err(MatViewError::ObjectNotFound {
                name: stmt.name.clone(),
            })
        }
    };

    let mut visited = HashSet::new();
    drop_recursive(db, &view, stmt.cascade, user, &mut visited, 0)?;
    Ok(true)
}

fn drop_recursive(
    db: &Database,
    view: &Arc<MaterializedView>,
    cascade: bool,
    user: &str,
    visited: &mut HashSet<EntityId>,
    depth: usize,
) -> MatViewResult<()> {
    if !visited.insert(view.id()) {
        return Ok(());
    }
    let max_depth = db.config().max_cascade_depth;
    if depth > max_depth {
        return Err(MatViewError::DependencyDepthExceeded { depth, max_depth });
    }

    let dependents: Vec<Arc<MaterializedView>> = db
        .catalog()
        .dependent_views(view.id())
        .into_iter()
        .filter(|d| d.id() != view.id())
        .collect();

    if cascade {
        for dependent in &dependents {
            info!("Dropping dependent view {} (CASCADE)", dependent.qualified_name());
            drop_recursive(db, dependent, true, user, visited, depth + 1)?;
        }
    }

    remove_view(db, view);
    info!("Dropped materialized view {}", view.qualified_name());
    db.audit().log_drop(&view.qualified_name(), user, cascade);

    if !cascade && !dependents.is_empty() {
        warn!(
            "{} dependent view(s) of {} are now invalid",
            dependents.len(),
            view.qualified_name()
        );
        let env = db.compile_env();
        for dependent in &dependents {
            dependent.recompile(&env, true);
        }
    }
    Ok(())
}

/// Unhook a view from everything: rules, backing store, edges, catalog
fn remove_view(db: &Database, view: &Arc<MaterializedView>) {
    let catalog = db.catalog();

    view.retire(|| {
        catalog.detach_view(view.id());
        remove_refresh_rules(db.triggers(), view.id());
        db.release_backing(view);
    });
    catalog.remove(view.id());
    catalog.invalidate_plan_caches();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::testing::assert_error_sqlstate;
    use crate::view::ViewStatus;

    fn database() -> Database {
        let db = Database::default();
        db.execute("CREATE TABLE base (id INT, name VARCHAR(20))").unwrap();
        db.execute("INSERT INTO base VALUES (1, 'Hello')").unwrap();
        db.execute("CREATE MATERIALIZED VIEW v1 AS SELECT id, name FROM base").unwrap();
        db.execute("CREATE MATERIALIZED VIEW v2 AS SELECT name FROM v1").unwrap();
        db.execute("CREATE MATERIALIZED VIEW v3 AS SELECT name FROM v2").unwrap();
        db
    }

    #[test]
    fn test_drop_cascade_removes_dependents() {
        let db = database();
        let v2 = db.view("v2").unwrap();

        db.execute("DROP MATERIALIZED VIEW v1 CASCADE").unwrap();

        for name in ["v1", "v2", "v3"] {
            assert!(db.catalog().lookup(name).is_none(), "{} still registered", name);
        }
        assert_eq!(v2.status(), ViewStatus::Removed);
        assert!(db.catalog().edges().is_empty());
        assert!(db.triggers().is_empty());
    }

    #[test]
    fn test_drop_without_cascade_invalidates_dependents() {
        let db = database();
        db.execute("DROP MATERIALIZED VIEW v1").unwrap();

        let v2 = db.view("v2").unwrap();
        assert_eq!(v2.status(), ViewStatus::Invalid);
        assert!(v2.columns().is_empty());
        assert_eq!(db.view("v3").unwrap().status(), ViewStatus::Invalid);
        assert!(db.catalog().sources_of(v2.id()).is_empty());

        // a new v1 brings the dependents back
        db.execute("CREATE MATERIALIZED VIEW v1 AS SELECT id, name FROM base").unwrap();
        assert_eq!(db.view("v2").unwrap().status(), ViewStatus::Valid);
        assert_eq!(db.view("v3").unwrap().status(), ViewStatus::Valid);
    }

    #[test]
    fn test_drop_missing() {
        let db = database();
        assert_error_sqlstate(db.execute("DROP MATERIALIZED VIEW nope"), "42P01");
        db.execute("DROP MATERIALIZED VIEW IF EXISTS nope").unwrap();
        assert_error_sqlstate(db.execute("DROP MATERIALIZED VIEW base"), "42P01");
    }

    #[test]
    fn test_drop_releases_backing_store() {
        let db = database();
        let backing = db.view("v1").unwrap().backing().unwrap();

        db.execute("DROP MATERIALIZED VIEW v1 CASCADE").unwrap();
        assert!(db.catalog().table(backing.id).is_none());
        assert!(db.storage().rows(backing.id).is_err());
    }
}
