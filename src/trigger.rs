//! Trigger Handler: row-change notification and rule dispatch
//!
//! Every write to a base table produces one [`RowChange`] per affected row,
//! delivered synchronously to every [`RefreshRule`] bound to that table,
//! inline with the write.
//!
//! ## Failure handling
//!
//! A rule failure never fails the write and is never retried. It is logged
//! at `warn`, counted, reported in the [`DispatchReport`], and the view's
//! backing store is flagged for a rebuild on its next scan.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::catalog::EntityId;
use crate::engine::Storage;
use crate::error::{MatViewError, MatViewResult};
use crate::metrics::Metrics;
use crate::refresh::{fire, RefreshOutcome, RefreshRule};
use crate::schema::Row;

/// Row images of one changed row
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert { new: Row },
    Update { old: Row, new: Row },
    Delete { old: Row },
}

/// What dispatching row changes to the rules of a table did
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    pub fired: usize,
    pub appended: usize,
    pub updated: usize,
    /// Views whose backing store must be rebuilt, each listed once
    pub stale_views: Vec<EntityId>,
    /// (rule name, error) of every failed rule execution
    pub failures: Vec<(String, MatViewError)>,
}

impl DispatchReport {
    fn mark_stale(&mut self, view: EntityId) {
        if !self.stale_views.contains(&view) {
            self.stale_views.push(view);
        }
    }
}

/// Refresh rules keyed by the base table they are installed on
#[derive(Debug, Default)]
pub struct TriggerRegistry {
    rules: RwLock<HashMap<EntityId, Vec<Arc<RefreshRule>>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `rule` on `table`.
    ///
    /// A view has at most one rule per table; a second one for the same
    /// (view, table) pair is rejected. Names are descriptive only.
    pub fn install(&self, table: EntityId, rule: RefreshRule) -> MatViewResult<()> {
        let mut rules = self.rules.write();
        let bound = rules.entry(table).or_default();
        if bound.iter().any(|r| r.view == rule.view) {
            return Err(MatViewError::ObjectAlreadyExists { name: rule.name });
        }
        bound.push(Arc::new(rule));
        Ok(())
    }

    /// Remove every rule maintaining `view`, returning the removed rules
    pub fn remove_for_view(&self, view: EntityId) -> Vec<Arc<RefreshRule>> {
        let mut rules = self.rules.write();
        let mut removed = Vec::new();
        for bound in rules.values_mut() {
            let (gone, kept): (Vec<_>, Vec<_>) = bound.drain(..).partition(|r| r.view == view);
            *bound = kept;
            removed.extend(gone);
        }
        rules.retain(|_, bound| !bound.is_empty());
        removed
    }

    /// Drop every rule installed on `table`
    pub fn remove_for_table(&self, table: EntityId) -> Vec<Arc<RefreshRule>> {
        self.rules.write().remove(&table).unwrap_or_default()
    }

    pub fn rules_for(&self, table: EntityId) -> Vec<Arc<RefreshRule>> {
        self.rules.read().get(&table).cloned().unwrap_or_default()
    }

    pub fn rules_for_view(&self, view: EntityId) -> Vec<Arc<RefreshRule>> {
        let mut rules: Vec<_> = self
            .rules
            .read()
            .values()
            .flatten()
            .filter(|r| r.view == view)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    pub fn len(&self) -> usize {
        self.rules.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver row changes of `table` to its rules, in installation order
    pub fn dispatch(&self, table: EntityId, changes: &[RowChange], storage: &dyn Storage, metrics: &Metrics) -> DispatchReport {
        let mut report = DispatchReport::default();
        let rules = self.rules_for(table);
        if rules.is_empty() || changes.is_empty() {
            return report;
        }

        let timer = metrics.start_timer();
        for change in changes {
            for rule in &rules {
                // a view already waiting for a rebuild gains nothing from row rules
                if report.stale_views.contains(&rule.view) {
                    continue;
                }

                report.fired += 1;
                metrics.record_rule_fired();

                match fire(rule, change, storage) {
                    Ok(RefreshOutcome::Appended(n)) => {
                        report.appended += n;
                        metrics.record_rows_appended(n);
                    }
                    Ok(RefreshOutcome::Updated(n)) => {
                        report.updated += n;
                        metrics.record_rows_updated(n);
                    }
                    Ok(RefreshOutcome::Unchanged) => {}
                    Ok(RefreshOutcome::RebuildRequired(reason)) => {
                        tracing::debug!("{} needs a rebuild: {}", rule.view_name, reason);
                        report.mark_stale(rule.view);
                    }
                    Err(e) => {
                        let error = MatViewError::refresh_failed(&rule.view_name, &rule.name, &e);
                        warn!("refresh rule {} for {} failed: {}", rule.name, rule.view_name, error);
                        metrics.record_refresh_failure();
                        report.mark_stale(rule.view);
                        report.failures.push((rule.name.clone(), error));
                    }
                }
            }
        }
        metrics.record_dispatch(timer);

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryStore;
    use crate::engine::{BoundTable, ColumnRef, ExprKind};
    use crate::refresh::RefreshMode;
    use crate::row;
    use crate::schema::{Column, DataType};

    const TABLE: EntityId = EntityId(1);

    fn rule(name: &str, view: u32, backing: u32, mode: RefreshMode) -> RefreshRule {
        RefreshRule {
            name: name.to_string(),
            view: EntityId(view),
            view_name: format!("public.v{}", view),
            backing: EntityId(backing),
            tables: vec![BoundTable {
                id: TABLE,
                name: "public.base".to_string(),
                columns: vec![Column::new("id", DataType::Integer)],
            }],
            trigger_source: 0,
            conditions: vec![],
            projection: vec![ExprKind::Column(ColumnRef { source: 0, column: 0 })],
            mode,
        }
    }

    #[test]
    fn test_install_is_keyed_by_view() {
        let registry = TriggerRegistry::new();
        registry.install(TABLE, rule("r1", 10, 11, RefreshMode::Each)).unwrap();
        let duplicate = registry.install(TABLE, rule("r1_again", 10, 11, RefreshMode::Each));
        crate::error::testing::assert_error_sqlstate(duplicate, "42P07");
        // a clashing name on another view is still a separate rule
        registry.install(TABLE, rule("r1", 20, 21, RefreshMode::Each)).unwrap();
        assert_eq!(registry.len(), 2);

        let removed = registry.remove_for_view(EntityId(10));
        assert_eq!(removed.len(), 1);
        assert_eq!(registry.rules_for(TABLE).len(), 1);
        assert!(registry.rules_for_view(EntityId(10)).is_empty());
    }

    #[test]
    fn test_dispatch_appends_and_reports() {
        let store = MemoryStore::new();
        store.create_store(EntityId(11)).unwrap();
        let registry = TriggerRegistry::new();
        let metrics = Metrics::new();
        registry.install(TABLE, rule("r1", 10, 11, RefreshMode::Each)).unwrap();

        let changes = vec![RowChange::Insert { new: row![1] }, RowChange::Insert { new: row![2] }];
        let report = registry.dispatch(TABLE, &changes, &store, &metrics);

        assert_eq!(report.fired, 2);
        assert_eq!(report.appended, 2);
        assert!(report.failures.is_empty());
        assert_eq!(store.rows(EntityId(11)).unwrap(), vec![row![1], row![2]]);
        assert_eq!(metrics.snapshot(0, 0).rows_appended, 2);
    }

    #[test]
    fn test_failure_never_propagates() {
        let store = MemoryStore::new();
        let registry = TriggerRegistry::new();
        let metrics = Metrics::new();
        // backing store 11 was never created, so the append fails
        registry.install(TABLE, rule("broken", 10, 11, RefreshMode::Each)).unwrap();

        let changes = vec![RowChange::Insert { new: row![1] }, RowChange::Insert { new: row![2] }];
        let report = registry.dispatch(TABLE, &changes, &store, &metrics);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].1.sqlstate(), "XX000");
        assert_eq!(report.stale_views, vec![EntityId(10)]);
        assert_eq!(metrics.snapshot(0, 0).refresh_failures, 1);
    }

    #[test]
    fn test_delete_marks_stale_once() {
        let store = MemoryStore::new();
        let registry = TriggerRegistry::new();
        registry.install(TABLE, rule("r1", 10, 11, RefreshMode::Each)).unwrap();

        let changes = vec![RowChange::Delete { old: row![1] }, RowChange::Delete { old: row![2] }];
        let report = registry.dispatch(TABLE, &changes, &store, &Metrics::new());
        assert_eq!(report.fired, 1);
        assert_eq!(report.stale_views, vec![EntityId(10)]);
    }
}
