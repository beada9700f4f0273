use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::Entity;
use crate::database::Database;
use crate::error::{MatViewError, MatViewResult};
use crate::parser::CreateViewStmt;
use crate::validation::validate_qualified_name;
use crate::view::{compile, MaterializedView, ViewDefinition};

/// Create (or replace) a materialized view
///
/// Steps:
/// 1. Validate the name; an existing table of that name is a conflict
/// 2. An existing view is kept (IF NOT EXISTS), replaced (OR REPLACE) or a conflict
/// 3. Compile the definition; a compile error fails the statement unless FORCE
/// 4. Register the view and set up its backing store and refresh rules
/// 5. Recompile views that failed only because this name did not exist yet
pub fn create_view(db: &Database, stmt: CreateViewStmt, owner: &str) -> MatViewResult<Arc<MaterializedView>> {
    validate_qualified_name(&stmt.name, "view_name", db.config().max_identifier_length)?;

    match db.catalog().lookup(&stmt.name) {
        Some(Entity::Table(table)) => Err(MatViewError::ObjectAlreadyExists {
            name: table.qualified_name(),
        }),
        Some(Entity::View(existing)) if stmt.or_replace => replace_view(db, &existing, stmt, owner),
        Some(Entity::View(existing)) if stmt.if_not_exists => {
            debug!("materialized view {} already exists, skipping", existing.qualified_name());
            Ok(existing)
        }
        Some(Entity::View(existing)) => Err(MatViewError::ObjectAlreadyExists {
            name: existing.qualified_name(),
        }),
        None => create_new_view(db, stmt, owner),
    }
}

fn definition_of(stmt: &CreateViewStmt) -> ViewDefinition {
    ViewDefinition {
        query_sql: stmt.query_sql.clone(),
        templates: stmt.templates.clone(),
        flags: stmt.flags,
        or_replace: stmt.or_replace,
        force: stmt.force,
    }
}

fn create_new_view(db: &Database, stmt: CreateViewStmt, owner: &str) -> MatViewResult<Arc<MaterializedView>> {
    let catalog = db.catalog();
    let (schema, name) = catalog.split_name(&stmt.name);
    let id = catalog.allocate_id();

    let view = Arc::new(MaterializedView::new(
        id,
        &schema,
        &name,
        owner,
        definition_of(&stmt),
        db.config().staleness_cache,
    ));
    view.initialize(&db.compile_env());

    if let Some(error) = view.error() {
        if !stmt.force {
            catalog.detach_view(id);
            return Err(error);
        }
        info!("creating {} without a valid definition (FORCE): {}", view.qualified_name(), error);
    }

    if let Err(e) = catalog.register_view(Arc::clone(&view)) {
        catalog.detach_view(id);
        return Err(e);
    }

    view.serialized(|| db.bind_backing(&view));
    db.populate_backing(&view);
    catalog.invalidate_plan_caches();

    info!(
        "Created materialized view {} ({} columns, {:?})",
        view.qualified_name(),
        view.columns().len(),
        view.status()
    );
    db.audit().log_create(&view.qualified_name(), owner, &view.create_sql());

    db.retry_invalid_views(&view.qualified_name());
    Ok(view)
}

/// OR REPLACE keeps the view's identity and rewires its dependents.
///
/// Without FORCE the candidate must compile, and a dependent that fails to
/// recompile against the new definition restores the old one.
fn replace_view(
    db: &Database,
    existing: &Arc<MaterializedView>,
    stmt: CreateViewStmt,
    owner: &str,
) -> MatViewResult<Arc<MaterializedView>> {
    let catalog = db.catalog();
    let definition = definition_of(&stmt);

    match compile(&definition.query_sql, definition.templates.as_deref(), &db.compile_env()) {
        Ok(candidate) => {
            if !definition.flags.recursion_permitted {
                if candidate.sources.contains(&existing.id()) {
                    let name = existing.qualified_name();
                    return Err(MatViewError::CircularDependency {
                        cycle: vec![name.clone(), name],
                    });
                }
                if let Some(cycle) = catalog.find_cycle(existing.id(), &candidate.sources) {
                    return Err(MatViewError::CircularDependency { cycle });
                }
            }
        }
        Err(e) if !stmt.force => return Err(e),
        Err(e) => debug!("replacing {} with an invalid definition (FORCE): {}", existing.qualified_name(), e),
    }

    let previous = existing.replace_definition(definition);
    let env = db.compile_env();
    if let Some(error) = existing.recompile(&env, stmt.force) {
        info!(
            "replacing {} failed, restoring previous definition: {}",
            existing.qualified_name(),
            error
        );
        existing.replace_definition(previous);
        existing.recompile(&env, true);
        return Err(error);
    }

    info!("Replaced materialized view {}", existing.qualified_name());
    db.audit().log_replace(
        &existing.qualified_name(),
        owner,
        &previous.query_sql,
        &existing.definition().query_sql,
    );
    if existing.error().is_none() {
        db.retry_invalid_views(&existing.qualified_name());
    }
    Ok(Arc::clone(existing))
}
