use tracing::{info, warn};

use crate::error::MatViewResult;
use crate::refresh::RefreshRule;
use crate::trigger::TriggerRegistry;

/// Install refresh rules on the base tables they are bound to.
///
/// Rule names follow `trg_mv_{view}_on_{table}`. A view that already holds
/// a rule on one of the tables fails the install; rules installed before
/// the failure stay and are the caller's to remove. Returns the names of
/// installed rules.
pub fn install_refresh_rules(registry: &TriggerRegistry, rules: Vec<RefreshRule>) -> MatViewResult<Vec<String>> {
    let mut installed = Vec::with_capacity(rules.len());

    for rule in rules {
        let Some(table) = rule.trigger_table() else {
            warn!("Refresh rule {} has no trigger table, skipping", rule.name);
            continue;
        };
        let (table_id, table_name) = (table.id, table.name.clone());
        let name = rule.name.clone();

        if let Err(e) = registry.install(table_id, rule) {
            warn!("Refresh rule {} already exists on {}", name, table_name);
            return Err(e);
        }

        info!("Installed refresh rule {} on {}", name, table_name);
        installed.push(name);
    }

    Ok(installed)
}

/// Remove every refresh rule maintaining `view`. Returns the removed names.
pub fn remove_refresh_rules(registry: &TriggerRegistry, view: crate::catalog::EntityId) -> Vec<String> {
    registry
        .remove_for_view(view)
        .into_iter()
        .map(|rule| {
            let table = rule.trigger_table().map_or("?", |t| t.name.as_str());
            info!("Removed refresh rule {} from {}", rule.name, table);
            rule.name.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityId;
    use crate::engine::{BoundTable, ColumnRef, ExprKind};
    use crate::refresh::RefreshMode;
    use crate::schema::{Column, DataType};

    fn rule(table: u32) -> RefreshRule {
        RefreshRule {
            name: format!("trg_mv_v_on_t{}", table),
            view: EntityId(10),
            view_name: "public.v".to_string(),
            backing: EntityId(11),
            tables: vec![BoundTable {
                id: EntityId(table),
                name: format!("public.t{}", table),
                columns: vec![Column::new("id", DataType::Integer)],
            }],
            trigger_source: 0,
            conditions: vec![],
            projection: vec![ExprKind::Column(ColumnRef { source: 0, column: 0 })],
            mode: RefreshMode::Each,
        }
    }

    #[test]
    fn test_install_then_remove() {
        let registry = TriggerRegistry::new();
        let installed = install_refresh_rules(&registry, vec![rule(1), rule(2)]).unwrap();
        assert_eq!(installed, vec!["trg_mv_v_on_t1", "trg_mv_v_on_t2"]);

        let mut removed = remove_refresh_rules(&registry, EntityId(10));
        removed.sort();
        assert_eq!(removed, vec!["trg_mv_v_on_t1", "trg_mv_v_on_t2"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rule_without_table_is_skipped() {
        let registry = TriggerRegistry::new();
        let mut broken = rule(1);
        broken.trigger_source = 5;
        assert!(install_refresh_rules(&registry, vec![broken]).unwrap().is_empty());
    }

    #[test]
    fn test_second_rule_for_same_view_and_table_fails() {
        let registry = TriggerRegistry::new();
        install_refresh_rules(&registry, vec![rule(1)]).unwrap();

        let result = install_refresh_rules(&registry, vec![rule(2), rule(1)]);
        crate::error::testing::assert_error_sqlstate(result, "42P07");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_rules_of_different_views_share_a_name() {
        let registry = TriggerRegistry::new();
        let mut other = rule(1);
        other.view = EntityId(20);
        other.backing = EntityId(21);

        // same descriptive name, distinct views
        assert_eq!(other.name, rule(1).name);
        install_refresh_rules(&registry, vec![rule(1), other]).unwrap();
        assert_eq!(registry.rules_for(EntityId(1)).len(), 2);

        remove_refresh_rules(&registry, EntityId(10));
        let left = registry.rules_for(EntityId(1));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].view, EntityId(20));
    }
}
