use std::collections::HashMap;

use parking_lot::RwLock;

use super::Storage;
use crate::catalog::EntityId;
use crate::error::{MatViewError, MatViewResult};
use crate::schema::{Row, Value};

/// Heap-backed row storage, one vector of rows per entity
#[derive(Debug, Default)]
pub struct MemoryStore {
    stores: RwLock<HashMap<EntityId, Vec<Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn missing(id: EntityId) -> MatViewError {
        MatViewError::StorageError {
            store: id.to_string(),
            reason: "store does not exist".to_string(),
        }
    }
}

fn matches(row: &Row, locate: &[(usize, Value)]) -> bool {
    locate
        .iter()
        .all(|(i, v)| row.get(*i).is_some_and(|actual| actual.not_distinct(v)))
}

impl Storage for MemoryStore {
    fn create_store(&self, id: EntityId) -> MatViewResult<()> {
        let mut stores = self.stores.write();
        if stores.contains_key(&id) {
            return Err(MatViewError::StorageError {
                store: id.to_string(),
                reason: "store already exists".to_string(),
            });
        }
        stores.insert(id, Vec::new());
        Ok(())
    }

    fn drop_store(&self, id: EntityId) {
        self.stores.write().remove(&id);
    }

    fn insert(&self, id: EntityId, row: Row) -> MatViewResult<()> {
        let mut stores = self.stores.write();
        let rows = stores.get_mut(&id).ok_or_else(|| Self::missing(id))?;
        rows.push(row);
        Ok(())
    }

    fn rows(&self, id: EntityId) -> MatViewResult<Vec<Row>> {
        self.stores.read().get(&id).cloned().ok_or_else(|| Self::missing(id))
    }

    fn update_where(
        &self,
        id: EntityId,
        locate: &[(usize, Value)],
        set: &[(usize, Value)],
        limit: Option<usize>,
    ) -> MatViewResult<Vec<(Row, Row)>> {
        let mut stores = self.stores.write();
        let rows = stores.get_mut(&id).ok_or_else(|| Self::missing(id))?;

        let mut changed = Vec::new();
        for row in rows.iter_mut().filter(|r| matches(r, locate)) {
            if limit.is_some_and(|max| changed.len() >= max) {
                break;
            }
            let old = row.clone();
            for (i, value) in set {
                match row.get_mut(*i) {
                    Some(slot) => *slot = value.clone(),
                    None => {
                        return Err(MatViewError::StorageError {
                            store: id.to_string(),
                            reason: format!("column position {} out of range", i),
                        })
                    }
                }
            }
            changed.push((old, row.clone()));
        }
        Ok(changed)
    }

    fn delete_where(&self, id: EntityId, locate: &[(usize, Value)]) -> MatViewResult<Vec<Row>> {
        let mut stores = self.stores.write();
        let rows = stores.get_mut(&id).ok_or_else(|| Self::missing(id))?;

        let (deleted, kept): (Vec<Row>, Vec<Row>) = rows.drain(..).partition(|r| matches(r, locate));
        *rows = kept;
        Ok(deleted)
    }

    fn replace_all(&self, id: EntityId, new_rows: Vec<Row>) -> MatViewResult<()> {
        let mut stores = self.stores.write();
        let rows = stores.get_mut(&id).ok_or_else(|| Self::missing(id))?;
        *rows = new_rows;
        Ok(())
    }

    fn truncate(&self, id: EntityId) -> MatViewResult<usize> {
        let mut stores = self.stores.write();
        let rows = stores.get_mut(&id).ok_or_else(|| Self::missing(id))?;
        let count = rows.len();
        rows.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_update_with_limit() {
        let store = MemoryStore::new();
        let id = EntityId(7);
        store.create_store(id).unwrap();
        store.insert(id, row![1, "a"]).unwrap();
        store.insert(id, row![1, "a"]).unwrap();

        let changed = store
            .update_where(id, &[(1, Value::from("a"))], &[(1, Value::from("b"))], Some(1))
            .unwrap();
        assert_eq!(changed, vec![(row![1, "a"], row![1, "b"])]);
        assert_eq!(store.rows(id).unwrap(), vec![row![1, "b"], row![1, "a"]]);
    }

    #[test]
    fn test_delete_matches_null() {
        let store = MemoryStore::new();
        let id = EntityId(3);
        store.create_store(id).unwrap();
        store.insert(id, vec![Value::Integer(1), Value::Null]).unwrap();
        store.insert(id, row![2, "x"]).unwrap();

        let deleted = store.delete_where(id, &[(1, Value::Null)]).unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(store.rows(id).unwrap(), vec![row![2, "x"]]);
    }

    #[test]
    fn test_missing_store() {
        let store = MemoryStore::new();
        assert!(store.rows(EntityId(99)).is_err());
        assert_eq!(store.truncate(EntityId(99)).unwrap_err().sqlstate(), "XX000");
    }
}
