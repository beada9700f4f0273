use std::collections::HashSet;

use super::Column;
use crate::engine::{ColumnRef, ExprKind, OutputExpr};

/// Generates column names for output expressions that carry none.
///
/// Names are seeded by the expression text when it sanitizes to a usable
/// identifier, otherwise by position (`C1`, `C2`, ...). Every name handed
/// out is unique within one namer, case-insensitively.
#[derive(Debug)]
pub struct ColumnNamer {
    prefix: String,
    max_len: usize,
    used: HashSet<String>,
}

impl ColumnNamer {
    pub fn new(prefix: &str, max_len: usize) -> Self {
        Self {
            prefix: prefix.to_string(),
            max_len,
            used: HashSet::new(),
        }
    }

    /// Name for output position `index`: template name, then alias, then generated.
    pub fn column_name(&mut self, index: usize, expr: &OutputExpr, template_name: Option<&str>) -> String {
        let base = match (template_name, expr.alias.as_deref()) {
            (Some(name), _) => name.to_string(),
            (None, Some(alias)) => alias.to_string(),
            (None, None) => self.generated(index, &expr.sql),
        };
        self.unique(base)
    }

    fn generated(&self, index: usize, expr_sql: &str) -> String {
        let sanitized: String = expr_sql
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let sanitized = sanitized.trim_matches('_');

        let usable = sanitized
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && sanitized.len() <= self.max_len;

        if usable {
            sanitized.to_string()
        } else {
            format!("{}{}", self.prefix, index + 1)
        }
    }

    fn unique(&mut self, base: String) -> String {
        let mut candidate = base.clone();
        let mut suffix = 2;
        while self.used.contains(&candidate.to_lowercase()) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        self.used.insert(candidate.to_lowercase());
        candidate
    }
}

/// Derive the column list of a compiled view query.
///
/// For position i the template (if any) names the column, and its type
/// is used when known; otherwise the expression's alias and evaluated type
/// apply. A direct column reference carries the source column's check
/// constraint over, retargeted to the derived column name.
pub fn derive_columns(
    exprs: &[OutputExpr],
    templates: Option<&[Column]>,
    source_column: impl Fn(&ColumnRef) -> Option<Column>,
    namer: &mut ColumnNamer,
) -> Vec<Column> {
    exprs
        .iter()
        .enumerate()
        .map(|(i, expr)| {
            let template = templates.and_then(|t| t.get(i));
            let name = namer.column_name(i, expr, template.map(|t| t.name.as_str()));

            let data_type = match template {
                Some(t) if t.data_type.is_known() => t.data_type,
                _ => expr.data_type,
            };

            let check = match &expr.kind {
                ExprKind::Column(r) => source_column(r)
                    .and_then(|c| c.check)
                    .map(|c| c.for_column(&name)),
                ExprKind::Literal(_) => None,
            };

            Column { name, data_type, check }
        })
        .collect()
}
