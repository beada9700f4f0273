//! Bulk population of backing stores
//!
//! Row rules only ever append or patch. Whenever a change cannot be folded
//! in (deletes, membership changes, failed rules, recompiles) the backing
//! store is marked stale and the next scan repopulates it here from the
//! view's plan.

use tracing::{info, warn};

use crate::engine::{Plan, RowSource, Storage};
use crate::error::MatViewResult;
use crate::view::BackingStore;

/// Replace the backing store's contents with a full evaluation of `plan`
pub fn rebuild(backing: &BackingStore, plan: &dyn Plan, source: &dyn RowSource, storage: &dyn Storage) -> MatViewResult<usize> {
    let rows = plan.execute(source)?;
    let count = rows.len();
    storage.replace_all(backing.id, rows)?;
    Ok(count)
}

/// Rebuild when marked stale. Returns the new row count when a rebuild ran.
///
/// A failed rebuild leaves the store stale so the next scan tries again.
pub fn rebuild_if_stale(
    view_name: &str,
    backing: &BackingStore,
    plan: &dyn Plan,
    source: &dyn RowSource,
    storage: &dyn Storage,
) -> MatViewResult<Option<usize>> {
    if !backing.take_stale() {
        return Ok(None);
    }

    match rebuild(backing, plan, source, storage) {
        Ok(count) => {
            info!("rebuilt backing store of {} ({} rows)", view_name, count);
            Ok(Some(count))
        }
        Err(e) => {
            warn!("rebuild of {} failed: {}", view_name, e);
            backing.mark_stale();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, EntityId, TableEntry};
    use crate::engine::memory::MemoryStore;
    use crate::engine::sql::SqlCompiler;
    use crate::engine::{CompileContext, Prepared, QueryCompiler};
    use crate::row;
    use crate::schema::{Column, DataType, Row};
    use std::sync::Arc;

    struct Source<'a>(&'a MemoryStore);

    impl RowSource for Source<'_> {
        fn scan_entity(&self, entity: EntityId) -> MatViewResult<Vec<Row>> {
            self.0.rows(entity)
        }
    }

    fn setup() -> (MemoryStore, Arc<dyn Plan>, EntityId) {
        let catalog = Catalog::new("public");
        let id = catalog.allocate_id();
        catalog
            .register_table(TableEntry::new(id, "public", "base", vec![Column::new("id", DataType::Integer)]))
            .unwrap();
        let ctx = CompileContext { catalog: &catalog, default_schema: "public" };
        let plan = match SqlCompiler::new().prepare("SELECT id FROM base", &ctx).unwrap() {
            Prepared::Query(plan) => plan,
            Prepared::Command { .. } => panic!("not a query"),
        };

        let store = MemoryStore::new();
        store.create_store(id).unwrap();
        store.insert(id, row![1]).unwrap();
        store.insert(id, row![2]).unwrap();
        (store, plan, id)
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let (store, plan, _) = setup();
        let backing = BackingStore::new(EntityId(50));
        store.create_store(backing.id).unwrap();
        store.insert(backing.id, row![99]).unwrap();

        assert_eq!(rebuild(&backing, plan.as_ref(), &Source(&store), &store).unwrap(), 2);
        assert_eq!(store.rows(backing.id).unwrap(), vec![row![1], row![2]]);
    }

    #[test]
    fn test_rebuild_only_when_stale() {
        let (store, plan, _) = setup();
        let backing = BackingStore::new(EntityId(50));
        store.create_store(backing.id).unwrap();

        assert_eq!(rebuild_if_stale("v", &backing, plan.as_ref(), &Source(&store), &store).unwrap(), None);
        backing.mark_stale();
        assert_eq!(rebuild_if_stale("v", &backing, plan.as_ref(), &Source(&store), &store).unwrap(), Some(2));
        assert!(!backing.is_stale());
    }

    #[test]
    fn test_failed_rebuild_stays_stale() {
        let (store, plan, _) = setup();
        let backing = BackingStore::new(EntityId(77));
        backing.mark_stale();

        // no store was created for the backing id
        assert!(rebuild_if_stale("v", &backing, plan.as_ref(), &Source(&store), &store).is_err());
        assert!(backing.is_stale());
    }
}
