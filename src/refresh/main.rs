//! # Firing a refresh rule
//!
//! 1. **Pin**: the changed table contributes only the changed row image
//! 2. **Derive**: run the rule's read (joins, filters, projection) through
//!    [`Storage::execute_read`]
//! 3. **Fold**: append derived rows, or update the backing rows that the
//!    old image derived, setting only the projected columns that changed
//!
//! ## Example
//!
//! ```sql
//! CREATE MATERIALIZED VIEW emp_loc AS
//!     SELECT t1.name, t2.location FROM table1 t1, table2 t2 WHERE t1.value = t2.value;
//!
//! -- table2 already holds (2, 'Paso Robles')
//! INSERT INTO table1 VALUES (2, 'Wes Janson');
//! -- derived read: SELECT t0.name, t1.location FROM table1 t0, table2 t1
//! --               WHERE t0.value = t1.value AND t0.value = 2 AND t0.name = 'Wes Janson'
//! -- appends ('Wes Janson', 'Paso Robles') to the backing store
//! ```

use tracing::debug;

use super::{RefreshMode, RefreshOutcome, RefreshRule};
use crate::engine::Storage;
use crate::error::{MatViewError, MatViewResult};
use crate::schema::{Row, Value};
use crate::trigger::RowChange;

/// Apply one row change to the rule's backing store.
///
/// # Errors
///
/// - `CardinalityViolation` in `ExactlyOne` mode when the derived read
///   does not produce exactly one row
/// - any storage error of the derived read or the backing write
pub fn fire(rule: &RefreshRule, change: &RowChange, storage: &dyn Storage) -> MatViewResult<RefreshOutcome> {
    match change {
        RowChange::Insert { new } => append(rule, new, storage),
        RowChange::Update { old, new } => update(rule, old, new, storage),
        RowChange::Delete { .. } => Ok(RefreshOutcome::RebuildRequired("row deleted".to_string())),
    }
}

fn derive(rule: &RefreshRule, changed: &Row, storage: &dyn Storage) -> MatViewResult<Vec<Row>> {
    let read = rule.derived_read(changed);
    debug!("refresh rule {}: {}", rule.name, read.to_sql());
    let rows = storage.execute_read(&read)?;

    if rule.mode == RefreshMode::ExactlyOne && rows.len() != 1 {
        return Err(MatViewError::CardinalityViolation {
            view: rule.view_name.clone(),
            rows: rows.len(),
        });
    }
    Ok(rows)
}

fn append(rule: &RefreshRule, new: &Row, storage: &dyn Storage) -> MatViewResult<RefreshOutcome> {
    let rows = derive(rule, new, storage)?;
    let count = rows.len();
    for row in rows {
        storage.insert(rule.backing, row)?;
    }
    Ok(RefreshOutcome::Appended(count))
}

fn update(rule: &RefreshRule, old: &Row, new: &Row, storage: &dyn Storage) -> MatViewResult<RefreshOutcome> {
    if old.len() != new.len() {
        return Ok(RefreshOutcome::RebuildRequired("row images differ in width".to_string()));
    }

    let changed: Vec<usize> = old
        .iter()
        .zip(new.iter())
        .enumerate()
        .filter(|(_, (o, n))| !o.not_distinct(n))
        .map(|(i, _)| i)
        .collect();

    if changed.is_empty() {
        return Ok(RefreshOutcome::Unchanged);
    }
    if let Some(column) = changed.iter().find(|c| rule.decides_membership(**c)) {
        return Ok(RefreshOutcome::RebuildRequired(format!(
            "join or filter column {} changed",
            column + 1
        )));
    }

    let positions: Vec<usize> = changed.iter().flat_map(|c| rule.projected_positions(*c)).collect();
    if positions.is_empty() {
        return Ok(RefreshOutcome::Unchanged);
    }

    // membership is unchanged, so both reads pair up row for row
    let before = derive(rule, old, storage)?;
    let after = derive(rule, new, storage)?;
    if before.len() != after.len() {
        return Ok(RefreshOutcome::RebuildRequired("derived row count changed".to_string()));
    }

    let mut updated = 0;
    for (old_row, new_row) in before.iter().zip(after.iter()) {
        let locate: Vec<(usize, Value)> = old_row.iter().cloned().enumerate().collect();
        let set: Vec<(usize, Value)> = positions
            .iter()
            .filter_map(|p| new_row.get(*p).map(|v| (*p, v.clone())))
            .collect();

        if storage.update_where(rule.backing, &locate, &set, Some(1))?.is_empty() {
            return Ok(RefreshOutcome::RebuildRequired(
                "derived row not present in backing store".to_string(),
            ));
        }
        updated += 1;
    }

    Ok(RefreshOutcome::Updated(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityId;
    use crate::engine::memory::MemoryStore;
    use crate::engine::{BoundTable, ColumnRef, Condition, ExprKind};
    use crate::row;
    use crate::schema::{Column, CompareOp, DataType};

    const T1: EntityId = EntityId(1);
    const T2: EntityId = EntityId(2);
    const BACKING: EntityId = EntityId(9);

    fn col(source: usize, column: usize) -> ColumnRef {
        ColumnRef { source, column }
    }

    fn rule(trigger_source: usize, mode: RefreshMode) -> RefreshRule {
        RefreshRule {
            name: "trg_mv_emp_loc_on_table1".to_string(),
            view: EntityId(8),
            view_name: "public.emp_loc".to_string(),
            backing: BACKING,
            tables: vec![
                BoundTable {
                    id: T1,
                    name: "public.table1".to_string(),
                    columns: vec![Column::new("value", DataType::Integer), Column::new("name", DataType::Varchar)],
                },
                BoundTable {
                    id: T2,
                    name: "public.table2".to_string(),
                    columns: vec![Column::new("value", DataType::Integer), Column::new("location", DataType::Varchar)],
                },
            ],
            trigger_source,
            conditions: vec![
                Condition::Join { left: col(0, 0), right: col(1, 0) },
                Condition::Compare { column: col(0, 0), op: CompareOp::Gt, value: Value::Integer(0) },
            ],
            projection: vec![ExprKind::Column(col(0, 1)), ExprKind::Column(col(1, 1))],
            mode,
        }
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        for id in [T1, T2, BACKING] {
            store.create_store(id).unwrap();
        }
        store.insert(T2, row![2, "Paso Robles"]).unwrap();
        store.insert(T2, row![3, "Austin"]).unwrap();
        store
    }

    #[test]
    fn test_insert_appends_joined_row() {
        let store = store();
        store.insert(BACKING, row!["Luke", "Tatooine"]).unwrap();

        let new = row![2, "Wes Janson"];
        store.insert(T1, new.clone()).unwrap();
        let outcome = fire(&rule(0, RefreshMode::Each), &RowChange::Insert { new }, &store).unwrap();

        assert_eq!(outcome, RefreshOutcome::Appended(1));
        assert_eq!(
            store.rows(BACKING).unwrap(),
            vec![row!["Luke", "Tatooine"], row!["Wes Janson", "Paso Robles"]]
        );
    }

    #[test]
    fn test_insert_filtered_out_appends_nothing() {
        let store = store();
        let outcome = fire(&rule(0, RefreshMode::Each), &RowChange::Insert { new: row![-2, "Nobody"] }, &store).unwrap();
        assert_eq!(outcome, RefreshOutcome::Appended(0));
        assert!(store.rows(BACKING).unwrap().is_empty());
    }

    #[test]
    fn test_exactly_one_rejects_missing_partner() {
        let store = store();
        let result = fire(&rule(0, RefreshMode::ExactlyOne), &RowChange::Insert { new: row![7, "Ghost"] }, &store);
        crate::error::testing::assert_error_sqlstate(result, "21000");
    }

    #[test]
    fn test_duplicate_images_are_not_amplified() {
        let store = store();
        store.insert(T1, row![2, "Wes Janson"]).unwrap();
        store.insert(T1, row![2, "Wes Janson"]).unwrap();

        let outcome = fire(&rule(0, RefreshMode::Each), &RowChange::Insert { new: row![2, "Wes Janson"] }, &store).unwrap();
        assert_eq!(outcome, RefreshOutcome::Appended(1));
    }

    #[test]
    fn test_update_of_projected_column() {
        let store = store();
        store.insert(BACKING, row!["Wes Janson", "Paso Robles"]).unwrap();
        store.insert(BACKING, row!["Hobbie", "Austin"]).unwrap();

        let change = RowChange::Update {
            old: row![2, "Paso Robles"],
            new: row![2, "San Luis Obispo"],
        };
        store.insert(T1, row![2, "Wes Janson"]).unwrap();
        store.delete_where(T2, &[(0, Value::Integer(2))]).unwrap();
        store.insert(T2, row![2, "San Luis Obispo"]).unwrap();

        let outcome = fire(&rule(1, RefreshMode::Each), &change, &store).unwrap();
        assert_eq!(outcome, RefreshOutcome::Updated(1));
        assert_eq!(
            store.rows(BACKING).unwrap(),
            vec![row!["Wes Janson", "San Luis Obispo"], row!["Hobbie", "Austin"]]
        );
    }

    #[test]
    fn test_update_of_join_column_requires_rebuild() {
        let store = store();
        let change = RowChange::Update {
            old: row![2, "Wes Janson"],
            new: row![3, "Wes Janson"],
        };
        assert!(matches!(
            fire(&rule(0, RefreshMode::Each), &change, &store).unwrap(),
            RefreshOutcome::RebuildRequired(_)
        ));
    }

    #[test]
    fn test_update_without_relevant_change() {
        let store = store();
        let same = RowChange::Update { old: row![2, "x"], new: row![2, "x"] };
        assert_eq!(fire(&rule(0, RefreshMode::Each), &same, &store).unwrap(), RefreshOutcome::Unchanged);
    }

    #[test]
    fn test_update_missing_backing_row_requires_rebuild() {
        let store = store();
        store.insert(T1, row![2, "Wes"]).unwrap();
        let change = RowChange::Update { old: row![2, "Wes"], new: row![2, "Wes Janson"] };
        assert!(matches!(
            fire(&rule(0, RefreshMode::Each), &change, &store).unwrap(),
            RefreshOutcome::RebuildRequired(_)
        ));
    }

    #[test]
    fn test_delete_requires_rebuild() {
        let store = store();
        let change = RowChange::Delete { old: row![2, "Wes Janson"] };
        assert!(matches!(
            fire(&rule(0, RefreshMode::Each), &change, &store).unwrap(),
            RefreshOutcome::RebuildRequired(_)
        ));
    }
}
