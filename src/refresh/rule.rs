use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::RefreshMode;
use crate::catalog::{Catalog, EntityId};
use crate::engine::{BoundTable, Condition, DerivedRead, ExprKind, Plan};
use crate::schema::Row;

/// Typed descriptor of one row-change rule.
///
/// Column positions are fixed when the rule is bound; firing never looks
/// anything up by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshRule {
    pub name: String,
    pub view: EntityId,
    pub view_name: String,
    pub backing: EntityId,
    pub tables: Vec<BoundTable>,
    /// Position in `tables` of the table this rule is installed on
    pub trigger_source: usize,
    pub conditions: Vec<Condition>,
    pub projection: Vec<ExprKind>,
    pub mode: RefreshMode,
}

impl RefreshRule {
    pub fn trigger_table(&self) -> Option<&BoundTable> {
        self.tables.get(self.trigger_source)
    }

    /// Derived read with the trigger table contributing only `changed`
    pub fn derived_read<'a>(&'a self, changed: &'a Row) -> DerivedRead<'a> {
        DerivedRead {
            tables: &self.tables,
            pinned: Some((self.trigger_source, changed)),
            conditions: &self.conditions,
            projection: &self.projection,
        }
    }

    /// True when a join or filter reads `column` of the trigger table
    pub fn decides_membership(&self, column: usize) -> bool {
        self.conditions
            .iter()
            .any(|c| c.references(self.trigger_source, column))
    }

    /// Output positions that project `column` of the trigger table
    pub fn projected_positions(&self, column: usize) -> impl Iterator<Item = usize> + '_ {
        self.projection.iter().enumerate().filter_map(move |(i, e)| match e {
            ExprKind::Column(r) if r.source == self.trigger_source && r.column == column => Some(i),
            _ => None,
        })
    }
}

pub fn rule_name(view: &str, table: &str) -> String {
    format!("trg_mv_{}_on_{}", view, table).replace('.', "_")
}

/// A plan can be maintained row by row when it reads base tables only,
/// each at most once.
pub fn is_backable(plan: &dyn Plan, catalog: &Catalog) -> bool {
    let mut seen = HashSet::new();
    !plan.sources().is_empty()
        && plan
            .sources()
            .iter()
            .all(|s| catalog.is_base_table(*s) && seen.insert(*s))
}

/// One rule per table the plan reads, or `None` when the plan is not backable
pub fn derive_rules(
    view: EntityId,
    view_name: &str,
    backing: EntityId,
    plan: &dyn Plan,
    catalog: &Catalog,
    mode: RefreshMode,
) -> Option<Vec<RefreshRule>> {
    if !is_backable(plan, catalog) {
        return None;
    }

    let tables = plan
        .sources()
        .iter()
        .map(|id| {
            let table = catalog.table(*id)?;
            Some(BoundTable {
                id: *id,
                name: table.qualified_name(),
                columns: table.columns.clone(),
            })
        })
        .collect::<Option<Vec<_>>>()?;

    let projection: Vec<ExprKind> = plan.expressions().iter().map(|e| e.kind.clone()).collect();

    let rules = tables
        .iter()
        .enumerate()
        .map(|(position, table)| RefreshRule {
            name: rule_name(view_name, &table.name),
            view,
            view_name: view_name.to_string(),
            backing,
            tables: tables.clone(),
            trigger_source: position,
            conditions: plan.conditions().to_vec(),
            projection: projection.clone(),
            mode,
        })
        .collect();

    Some(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableEntry;
    use crate::engine::sql::SqlCompiler;
    use crate::engine::{CompileContext, Prepared, QueryCompiler};
    use crate::schema::{Column, DataType};
    use std::sync::Arc;

    fn setup() -> Catalog {
        let catalog = Catalog::new("public");
        for (name, second) in [("table1", "name"), ("table2", "location")] {
            let id = catalog.allocate_id();
            catalog
                .register_table(TableEntry::new(
                    id,
                    "public",
                    name,
                    vec![Column::new("value", DataType::Integer), Column::new(second, DataType::Varchar)],
                ))
                .unwrap();
        }
        catalog
    }

    fn plan(catalog: &Catalog, sql: &str) -> Arc<dyn Plan> {
        let ctx = CompileContext { catalog, default_schema: "public" };
        match SqlCompiler::new().prepare(sql, &ctx).unwrap() {
            Prepared::Query(plan) => plan,
            Prepared::Command { .. } => panic!("not a query"),
        }
    }

    #[test]
    fn test_one_rule_per_table() {
        let catalog = setup();
        let plan = plan(&catalog, "SELECT a.name, b.location FROM table1 a, table2 b WHERE a.value = b.value");

        let rules = derive_rules(EntityId(10), "public.emp_loc", EntityId(11), plan.as_ref(), &catalog, RefreshMode::Each)
            .unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "trg_mv_public_emp_loc_on_public_table1");
        assert_eq!(rules[1].trigger_table().unwrap().name, "public.table2");

        // value decides membership, name is projected at output 0
        assert!(rules[0].decides_membership(0));
        assert!(!rules[0].decides_membership(1));
        assert_eq!(rules[0].projected_positions(1).collect::<Vec<_>>(), vec![0]);
        assert_eq!(rules[1].projected_positions(1).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_self_join_is_not_backable() {
        let catalog = setup();
        let plan = plan(&catalog, "SELECT a.name FROM table1 a, table1 b WHERE a.value = b.value");
        assert!(!is_backable(plan.as_ref(), &catalog));
        assert!(derive_rules(EntityId(10), "v", EntityId(11), plan.as_ref(), &catalog, RefreshMode::Each).is_none());
    }

    #[test]
    fn test_descriptor_serializes() {
        let catalog = setup();
        let plan = plan(&catalog, "SELECT name FROM table1 WHERE value > 1");
        let rules = derive_rules(EntityId(10), "v", EntityId(11), plan.as_ref(), &catalog, RefreshMode::ExactlyOne)
            .unwrap();

        let json = serde_json::to_string(&rules[0]).unwrap();
        assert!(json.contains("\"exactly_one\""));
        let back: RefreshRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rules[0]);
    }
}
