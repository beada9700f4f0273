//! The database facade: catalog, query engine, storage and refresh
//! machinery behind one statement-level API.
//!
//! Every write to a base table goes through here, so this is where row
//! changes are handed to the refresh rules and where views learn that
//! their backing stores have to be rebuilt.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::catalog::{Catalog, Entity, EntityId, TableEntry};
use crate::config::MatViewConfig;
use crate::ddl;
use crate::dependency::{install_refresh_rules, remove_refresh_rules};
use crate::engine::memory::MemoryStore;
use crate::engine::sql::SqlCompiler;
use crate::engine::{Plan, QueryCompiler, RowSource, Storage};
use crate::error::{MatViewError, MatViewResult};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::parser::{parse_statement, Filter, Statement};
use crate::refresh::bulk::rebuild_if_stale;
use crate::refresh::derive_rules;
use crate::schema::{Column, Row, Value};
use crate::session::Session;
use crate::trigger::{DispatchReport, RowChange, TriggerRegistry};
use crate::validation::{validate_identifier_with_limit, validate_qualified_name};
use crate::view::{BackingStore, CompileEnv, MaterializedView, RecompileListener, ViewOperation};

/// Owner recorded for statements not issued through a [`Session`]
pub const DEFAULT_USER: &str = "system";

/// Rows written by one statement, and what its refresh rules did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    pub count: usize,
    pub report: DispatchReport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Done,
    /// IF [NOT] EXISTS turned the statement into a no-op
    Skipped,
    RowsAffected(WriteOutcome),
    Rows(Vec<Row>),
}

pub struct Database {
    config: MatViewConfig,
    catalog: Catalog,
    compiler: Box<dyn QueryCompiler>,
    storage: Box<dyn Storage>,
    triggers: TriggerRegistry,
    metrics: Metrics,
    audit: AuditLog,
}

impl Default for Database {
    fn default() -> Self {
        Self::new(MatViewConfig::default())
    }
}

impl Database {
    pub fn new(config: MatViewConfig) -> Self {
        Self::with_engine(config, Box::new(SqlCompiler::new()), Box::new(MemoryStore::new()))
    }

    /// A database over a caller-provided query compiler and row storage
    pub fn with_engine(config: MatViewConfig, compiler: Box<dyn QueryCompiler>, storage: Box<dyn Storage>) -> Self {
        info!(
            "opening database (schema {}, refresh mode {:?})",
            config.default_schema, config.refresh_mode
        );
        Self {
            catalog: Catalog::new(&config.default_schema),
            config,
            compiler,
            storage,
            triggers: TriggerRegistry::new(),
            metrics: Metrics::new(),
            audit: AuditLog::new(),
        }
    }

    pub fn config(&self) -> &MatViewConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn triggers(&self) -> &TriggerRegistry {
        &self.triggers
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn session(&self, user: &str) -> Session<'_> {
        Session::new(self, user)
    }

    pub fn view(&self, name: &str) -> Option<Arc<MaterializedView>> {
        match self.catalog.lookup(name)? {
            Entity::View(view) => Some(view),
            Entity::Table(_) => None,
        }
    }

    /// Compile environment that rebinds backing stores as views recompile
    pub(crate) fn compile_env(&self) -> CompileEnv<'_> {
        CompileEnv {
            catalog: &self.catalog,
            compiler: self.compiler.as_ref(),
            config: &self.config,
            listener: Some(self),
        }
    }

    /// Counters, with the staleness cache figures summed over all views
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let (hits, misses) = self
            .catalog
            .views()
            .iter()
            .map(|v| v.staleness_stats())
            .fold((0, 0), |(h, m), s| (h + s.hits, m + s.misses));
        self.metrics.snapshot(hits, misses)
    }

    pub fn execute(&self, sql: &str) -> MatViewResult<StatementResult> {
        self.execute_as(DEFAULT_USER, sql)
    }

    pub(crate) fn execute_as(&self, user: &str, sql: &str) -> MatViewResult<StatementResult> {
        let statement = parse_statement(sql)?;
        debug!("{} executing {:?}", user, statement);

        let done = |applied: bool| {
            if applied {
                StatementResult::Done
            } else {
                StatementResult::Skipped
            }
        };

        match statement {
            Statement::CreateMaterializedView(stmt) => {
                ddl::create_view(self, stmt, user)?;
                Ok(StatementResult::Done)
            }
            Statement::DropMaterializedView(stmt) => ddl::drop_view(self, &stmt, user).map(done),
            Statement::CreateTable {
                name,
                columns,
                if_not_exists,
            } => self.create_table(&name, columns, if_not_exists).map(done),
            Statement::DropTable { name, if_exists } => self.drop_table(&name, if_exists).map(done),
            Statement::Insert { table, columns, rows } => self
                .insert_columns(&table, columns.as_deref(), rows)
                .map(StatementResult::RowsAffected),
            Statement::Update {
                table,
                assignments,
                filters,
            } => self
                .update(&table, &assignments, &filters)
                .map(StatementResult::RowsAffected),
            Statement::Delete { table, filters } => self.delete(&table, &filters).map(StatementResult::RowsAffected),
            Statement::Truncate { table } => self.truncate(&table).map(StatementResult::RowsAffected),
            Statement::CreateIndex { name, table, columns } => {
                self.create_index(&name, &table, &columns)?;
                Ok(StatementResult::Done)
            }
            Statement::Rename { name, new_name } => {
                self.rename_table(&name, &new_name)?;
                Ok(StatementResult::Done)
            }
            Statement::Query(query) => self.query_as(user, &query).map(StatementResult::Rows),
        }
    }

    // ============ Tables ============

    /// Returns `false` when IF NOT EXISTS skipped an existing name
    pub fn create_table(&self, name: &str, columns: Vec<Column>, if_not_exists: bool) -> MatViewResult<bool> {
        let max_len = self.config.max_identifier_length;
        validate_qualified_name(name, "table_name", max_len)?;
        for (i, column) in columns.iter().enumerate() {
            validate_identifier_with_limit(&column.name, "column_name", max_len)?;
            if columns[..i].iter().any(|c| c.name.eq_ignore_ascii_case(&column.name)) {
                return Err(MatViewError::InvalidName {
                    name: column.name.clone(),
                    reason: "Duplicate column name".to_string(),
                });
            }
        }

        if let Some(existing) = self.catalog.lookup(name) {
            if if_not_exists {
                debug!("{} already exists, skipping", self.catalog.entity_name(existing.id()));
                return Ok(false);
            }
            return Err(MatViewError::ObjectAlreadyExists {
                name: self.catalog.entity_name(existing.id()),
            });
        }

        let (schema, table_name) = self.catalog.split_name(name);
        let id = self.catalog.allocate_id();
        let table = self
            .catalog
            .register_table(TableEntry::new(id, &schema, &table_name, columns))?;
        if let Err(e) = self.storage.create_store(id) {
            self.catalog.remove(id);
            return Err(e);
        }
        self.catalog.invalidate_plan_caches();
        info!("Created table {} ({} columns)", table.qualified_name(), table.columns.len());

        self.retry_invalid_views(&table.qualified_name());
        Ok(true)
    }

    /// Dependent views stay registered and turn invalid
    pub fn drop_table(&self, name: &str, if_exists: bool) -> MatViewResult<bool> {
        let table = match self.catalog.lookup(name) {
            Some(Entity::Table(table)) => table,
            Some(Entity::View(_)) => {
                return Err(MatViewError::UnsupportedOperation {
                    operation: "DROP TABLE".to_string(),
                    entity: "VIEW".to_string(),
                })
            }
            None if if_exists => return Ok(false),
            None => return Err(MatViewError::ObjectNotFound { name: name.to_string() }),
        };

        let dependents = self.catalog.dependent_views(table.id);
        self.triggers.remove_for_table(table.id);
        self.catalog.remove(table.id);
        self.storage.drop_store(table.id);
        self.catalog.invalidate_plan_caches();
        info!(
            "Dropped table {} ({} dependent views)",
            table.qualified_name(),
            dependents.len()
        );

        let env = self.compile_env();
        for view in dependents {
            view.recompile(&env, true);
        }
        Ok(true)
    }

    /// Rename a base table; views reading it by its old name become invalid
    pub fn rename_table(&self, name: &str, new_name: &str) -> MatViewResult<()> {
        let table = match self.catalog.lookup(name) {
            Some(Entity::Table(table)) => table,
            Some(Entity::View(view)) => return Err(view.unsupported(ViewOperation::Rename)),
            None => return Err(MatViewError::ObjectNotFound { name: name.to_string() }),
        };

        let (schema, new_table_name) = self.catalog.split_name(new_name);
        if !schema.eq_ignore_ascii_case(&table.schema) {
            return Err(MatViewError::InvalidName {
                name: new_name.to_string(),
                reason: format!("cannot move {} to schema {}", table.qualified_name(), schema),
            });
        }
        validate_identifier_with_limit(&new_table_name, "table_name", self.config.max_identifier_length)?;

        let old_name = table.qualified_name();
        let dependents = self.catalog.dependent_views(table.id);
        self.catalog.rename_table(table.id, &new_table_name)?;
        self.catalog.invalidate_plan_caches();
        info!("Renamed table {} to {}", old_name, table.qualified_name());

        let env = self.compile_env();
        for view in dependents {
            view.recompile(&env, true);
        }
        self.retry_invalid_views(&table.qualified_name());
        Ok(())
    }

    pub fn create_index(&self, name: &str, table: &str, columns: &[String]) -> MatViewResult<()> {
        let table = match self.catalog.lookup(table) {
            Some(Entity::Table(t)) => t,
            Some(Entity::View(view)) => return Err(view.unsupported(ViewOperation::CreateIndex)),
            None => return Err(MatViewError::ObjectNotFound { name: table.to_string() }),
        };
        validate_qualified_name(name, "index_name", self.config.max_identifier_length)?;

        for column in columns {
            if table.column_index(column).is_none() {
                return Err(MatViewError::ColumnNotFound {
                    column: column.clone(),
                    context: table.qualified_name(),
                });
            }
        }
        if table.indexes().iter().any(|i| i.eq_ignore_ascii_case(name)) {
            return Err(MatViewError::ObjectAlreadyExists { name: name.to_string() });
        }

        table.add_index(name);
        info!("Created index {} on {}({})", name, table.qualified_name(), columns.join(", "));
        Ok(())
    }

    // ============ Writes ============

    fn writable_table(&self, name: &str, operation: ViewOperation) -> MatViewResult<Arc<TableEntry>> {
        match self.catalog.lookup(name) {
            Some(Entity::Table(table)) => Ok(table),
            Some(Entity::View(view)) => Err(view.unsupported(operation)),
            None => Err(MatViewError::ObjectNotFound { name: name.to_string() }),
        }
    }

    pub fn insert(&self, table: &str, rows: Vec<Row>) -> MatViewResult<WriteOutcome> {
        self.insert_columns(table, None, rows)
    }

    /// Insert rows naming a subset of the columns; the others are NULL
    pub fn insert_columns(&self, table: &str, columns: Option<&[String]>, rows: Vec<Row>) -> MatViewResult<WriteOutcome> {
        let table = self.writable_table(table, ViewOperation::Insert)?;
        let positions = match columns {
            Some(names) => Some(
                names
                    .iter()
                    .map(|c| column_position(&table, c))
                    .collect::<MatViewResult<Vec<_>>>()?,
            ),
            None => None,
        };

        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            let row = match &positions {
                None => row,
                Some(positions) => {
                    if row.len() != positions.len() {
                        return Err(width_mismatch(&table, positions.len(), row.len()));
                    }
                    let mut full = vec![Value::Null; table.columns.len()];
                    for (position, value) in positions.iter().zip(row) {
                        full[*position] = value;
                    }
                    full
                }
            };
            prepared.push(conform_row(&table, row)?);
        }

        for row in &prepared {
            self.storage.insert(table.id, row.clone())?;
        }
        let changes = prepared.into_iter().map(|new| RowChange::Insert { new }).collect();
        Ok(self.after_write(&table, changes))
    }

    pub fn update(&self, table: &str, assignments: &[(String, Value)], filters: &[Filter]) -> MatViewResult<WriteOutcome> {
        let table = self.writable_table(table, ViewOperation::Update)?;
        let set = assignments
            .iter()
            .map(|(column, value)| Ok((column_position(&table, column)?, value.clone())))
            .collect::<MatViewResult<Vec<_>>>()?;
        let locate = filter_positions(&table, filters)?;

        let mut changes = Vec::new();
        let mut next = Vec::new();
        for row in self.storage.rows(table.id)? {
            if !row_matches(&row, &locate) {
                next.push(row);
                continue;
            }
            let mut new = row.clone();
            for (position, value) in &set {
                if let Some(slot) = new.get_mut(*position) {
                    *slot = value.clone();
                }
            }
            let new = conform_row(&table, new)?;
            next.push(new.clone());
            changes.push(RowChange::Update { old: row, new });
        }

        if !changes.is_empty() {
            self.storage.replace_all(table.id, next)?;
        }
        Ok(self.after_write(&table, changes))
    }

    pub fn delete(&self, table: &str, filters: &[Filter]) -> MatViewResult<WriteOutcome> {
        let table = self.writable_table(table, ViewOperation::Delete)?;
        let locate = filter_positions(&table, filters)?;

        let (deleted, kept): (Vec<Row>, Vec<Row>) = self
            .storage
            .rows(table.id)?
            .into_iter()
            .partition(|row| row_matches(row, &locate));

        if !deleted.is_empty() {
            self.storage.replace_all(table.id, kept)?;
        }
        let changes = deleted.into_iter().map(|old| RowChange::Delete { old }).collect();
        Ok(self.after_write(&table, changes))
    }

    pub fn truncate(&self, table: &str) -> MatViewResult<WriteOutcome> {
        let table = self.writable_table(table, ViewOperation::Truncate)?;
        let removed = self.storage.rows(table.id)?;
        self.storage.truncate(table.id)?;
        let changes = removed.into_iter().map(|old| RowChange::Delete { old }).collect();
        Ok(self.after_write(&table, changes))
    }

    /// Advance the clock, run the table's refresh rules, flag stale views
    fn after_write(&self, table: &TableEntry, changes: Vec<RowChange>) -> WriteOutcome {
        let count = changes.len();
        if count == 0 {
            return WriteOutcome::default();
        }

        self.catalog.record_write(table);
        let report = self
            .triggers
            .dispatch(table.id, &changes, self.storage.as_ref(), &self.metrics);

        for view in &report.stale_views {
            if let Some(backing) = self.catalog.view(*view).and_then(|v| v.backing()) {
                backing.mark_stale();
            }
        }
        if !report.failures.is_empty() {
            warn!(
                "{} refresh rule failure(s) while writing {}",
                report.failures.len(),
                table.qualified_name()
            );
        }

        WriteOutcome { count, report }
    }

    // ============ Reads ============

    /// Rows of a table or view
    pub fn scan(&self, name: &str) -> MatViewResult<Vec<Row>> {
        match self.catalog.lookup(name) {
            Some(entity) => self.scan_entity(entity.id()),
            None => Err(MatViewError::ObjectNotFound { name: name.to_string() }),
        }
    }

    /// Evaluate an ad-hoc query through a transient view
    pub fn query(&self, sql: &str) -> MatViewResult<Vec<Row>> {
        self.query_as(DEFAULT_USER, sql)
    }

    fn query_as(&self, user: &str, sql: &str) -> MatViewResult<Vec<Row>> {
        let view = MaterializedView::transient(sql, user, &self.compile_env())?;
        let plan = view.check_scan()?;
        self.scan_view(&view, plan)
    }

    /// Scan `view` with `plan`.
    ///
    /// A scan of a view this thread is already scanning yields no rows; a
    /// view without a plan (recursive bootstrap) yields no rows. A backed
    /// view reads its backing store, rebuilding it first when stale.
    pub(crate) fn scan_view(&self, view: &MaterializedView, plan: Option<Arc<dyn Plan>>) -> MatViewResult<Vec<Row>> {
        let Some(_guard) = view.enter_scan() else {
            debug!("re-entrant scan of {} yields no rows", view.qualified_name());
            return Ok(Vec::new());
        };
        let Some(plan) = plan else {
            return Ok(Vec::new());
        };

        let Some(backing) = view.backing() else {
            return plan.execute(self);
        };
        match self.read_backing(view, &backing, plan.as_ref()) {
            // rebound by a concurrent recompile; finish on the plan this scan holds
            Err(e) if !view.backing().is_some_and(|b| Arc::ptr_eq(&b, &backing)) => {
                debug!("backing store of {} went away during the scan: {}", view.qualified_name(), e);
                plan.execute(self)
            }
            result => result,
        }
    }

    fn read_backing(&self, view: &MaterializedView, backing: &BackingStore, plan: &dyn Plan) -> MatViewResult<Vec<Row>> {
        let name = view.qualified_name();
        if let Some(rows) = rebuild_if_stale(&name, backing, plan, self, self.storage.as_ref())? {
            self.metrics.record_rebuild();
            self.audit.log_rebuild(&name, rows);
        }
        self.storage.rows(backing.id)
    }

    /// Current contents of a view's backing store, if it has one
    pub fn backing_rows(&self, name: &str) -> MatViewResult<Option<Vec<Row>>> {
        let view = crate::require!(self.view(name), MatViewError::ObjectNotFound { name: name.to_string() });
        view.backing().map(|b| self.storage.rows(b.id)).transpose()
    }

    // ============ Views ============

    /// Recompile a view and its dependents.
    ///
    /// Without `force` the first failure is returned; with it every view
    /// reached keeps its own outcome.
    pub fn recompile_view(&self, name: &str, force: bool) -> MatViewResult<()> {
        let view = crate::require!(self.view(name), MatViewError::ObjectNotFound { name: name.to_string() });
        match view.recompile(&self.compile_env(), force) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Give invalid views that could not resolve `name` another try.
    ///
    /// A failed compile records no edges, so views blocked on a view that
    /// comes back here are retried by name as well.
    pub(crate) fn retry_invalid_views(&self, name: &str) {
        let env = self.compile_env();
        let mut pending = vec![name.to_string()];
        while let Some(name) = pending.pop() {
            for view in self.catalog.views() {
                let waiting = view
                    .error()
                    .is_some_and(|e| e.is_relation_not_found(&name) || e.is_invalid_view(&name));
                if !waiting {
                    continue;
                }
                info!("retrying invalid view {} now that {} is usable", view.qualified_name(), name);
                view.recompile(&env, true);
                if view.error().is_none() {
                    pending.push(view.qualified_name());
                }
            }
        }
    }

    /// Replace the view's backing store and refresh rules to match its plan.
    ///
    /// Views whose plan reads anything but distinct base tables get neither
    /// and are evaluated on every scan. A new backing store starts stale.
    /// Runs under the view's recompile lock.
    pub(crate) fn bind_backing(&self, view: &Arc<MaterializedView>) {
        remove_refresh_rules(&self.triggers, view.id());
        self.release_backing(view);

        if view.is_removed() || view.is_transient() || view.error().is_some() {
            return;
        }
        let Some(plan) = view.plan() else {
            return;
        };

        let id = self.catalog.allocate_id();
        let name = view.qualified_name();
        let Some(rules) = derive_rules(view.id(), &name, id, plan.as_ref(), &self.catalog, self.config.refresh_mode)
        else {
            debug!("{} reads views or repeats a table; no backing store", name);
            return;
        };

        let created = self
            .catalog
            .register_table(TableEntry::backing(id, view, view.columns()))
            .and_then(|_| self.storage.create_store(id));
        if let Err(e) = created {
            warn!("could not create backing store for {}: {}", name, e);
            self.catalog.remove(id);
            return;
        }

        let backing = Arc::new(BackingStore::new(id));
        backing.mark_stale();
        if let Err(e) = install_refresh_rules(&self.triggers, rules) {
            warn!("could not install refresh rules for {}, evaluating on scan: {}", name, e);
            remove_refresh_rules(&self.triggers, view.id());
            self.discard_backing(&backing);
            return;
        }

        // published only once its rules are live
        if let Some(displaced) = view.set_backing(Some(backing)) {
            self.discard_backing(&displaced);
        }
    }

    /// Callers hold the view's recompile lock (see [`MaterializedView::serialized`])
    pub(crate) fn release_backing(&self, view: &MaterializedView) {
        if let Some(backing) = view.set_backing(None) {
            self.discard_backing(&backing);
        }
    }

    fn discard_backing(&self, backing: &BackingStore) {
        self.catalog.remove(backing.id);
        self.storage.drop_store(backing.id);
    }

    /// Fill a freshly bound backing store right away
    pub(crate) fn populate_backing(&self, view: &MaterializedView) {
        let (Some(backing), Some(plan)) = (view.backing(), view.plan()) else {
            return;
        };
        if let Err(e) = rebuild_if_stale(&view.qualified_name(), &backing, plan.as_ref(), self, self.storage.as_ref()) {
            warn!("initial population of {} failed, deferred to next scan: {}", view.qualified_name(), e);
        }
    }
}

impl RowSource for Database {
    fn scan_entity(&self, entity: EntityId) -> MatViewResult<Vec<Row>> {
        match self.catalog.entity(entity) {
            Some(Entity::Table(table)) => self.storage.rows(table.id),
            Some(Entity::View(view)) => {
                let plan = view.check_scan()?;
                self.scan_view(&view, plan)
            }
            None => Err(MatViewError::ObjectNotFound {
                name: entity.to_string(),
            }),
        }
    }
}

impl RecompileListener for Database {
    fn view_recompiled(&self, view: &Arc<MaterializedView>) {
        self.metrics.record_recompile();
        self.bind_backing(view);
    }
}

fn column_position(table: &TableEntry, column: &str) -> MatViewResult<usize> {
    table.column_index(column).ok_or_else(|| MatViewError::ColumnNotFound {
        column: column.to_string(),
        context: table.qualified_name(),
    })
}

fn filter_positions<'f>(table: &TableEntry, filters: &'f [Filter]) -> MatViewResult<Vec<(usize, &'f Filter)>> {
    filters
        .iter()
        .map(|f| Ok((column_position(table, &f.column)?, f)))
        .collect()
}

fn row_matches(row: &Row, locate: &[(usize, &Filter)]) -> bool {
    locate
        .iter()
        .all(|(position, filter)| row.get(*position).is_some_and(|v| filter.matches(v)))
}

fn width_mismatch(table: &TableEntry, expected: usize, found: usize) -> MatViewError {
    MatViewError::TypeMismatch {
        column: table.qualified_name(),
        expected: format!("{} values", expected),
        found: format!("{} values", found),
    }
}

/// Coerce a row to the table's column types and enforce check constraints
fn conform_row(table: &TableEntry, row: Row) -> MatViewResult<Row> {
    if row.len() != table.columns.len() {
        return Err(width_mismatch(table, table.columns.len(), row.len()));
    }

    row.into_iter()
        .zip(&table.columns)
        .map(|(value, column)| {
            let value = value.coerce(column.data_type, &column.name)?;
            if let Some(check) = &column.check {
                if !check.check(&value) {
                    return Err(MatViewError::CheckViolation {
                        column: column.name.clone(),
                        constraint: check.to_sql(),
                    });
                }
            }
            Ok(value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::testing::assert_error_sqlstate;
    use crate::row;
    use crate::view::ViewStatus;

    fn database() -> Database {
        let db = Database::default();
        db.execute("CREATE TABLE base (id INT CHECK (id > 0), name VARCHAR(20))").unwrap();
        db.execute("INSERT INTO base VALUES (1, 'Hello'), (2, 'World')").unwrap();
        db
    }

    #[test]
    fn test_table_statements() {
        let db = database();
        assert_eq!(db.scan("base").unwrap(), vec![row![1, "Hello"], row![2, "World"]]);

        db.execute("UPDATE base SET name = 'Earth' WHERE id = 2").unwrap();
        db.execute("INSERT INTO base (name, id) VALUES ('!!!', 3)").unwrap();
        db.execute("DELETE FROM base WHERE id = 1").unwrap();
        assert_eq!(db.scan("base").unwrap(), vec![row![2, "Earth"], row![3, "!!!"]]);

        match db.execute("TRUNCATE TABLE base").unwrap() {
            StatementResult::RowsAffected(outcome) => assert_eq!(outcome.count, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(db.scan("base").unwrap().is_empty());
    }

    #[test]
    fn test_writes_are_checked() {
        let db = database();
        assert_error_sqlstate(db.execute("INSERT INTO base VALUES (0, 'zero')"), "23514");
        assert_error_sqlstate(db.execute("INSERT INTO base VALUES ('x', 'bad')"), "42804");
        assert_error_sqlstate(db.execute("INSERT INTO base VALUES (5)"), "42804");
        assert_error_sqlstate(db.execute("UPDATE base SET nope = 1"), "42703");
        assert_error_sqlstate(db.execute("INSERT INTO missing VALUES (1)"), "42P01");

        // a rejected statement writes nothing
        assert_eq!(db.scan("base").unwrap().len(), 2);
    }

    #[test]
    fn test_create_table_conflicts() {
        let db = database();
        assert_error_sqlstate(db.execute("CREATE TABLE base (id INT)"), "42P07");
        assert_eq!(
            db.execute("CREATE TABLE IF NOT EXISTS base (id INT)").unwrap(),
            StatementResult::Skipped
        );
        assert_error_sqlstate(db.execute("CREATE TABLE t2 (a INT, A INT)"), "42602");
        assert_eq!(db.execute("DROP TABLE IF EXISTS nope").unwrap(), StatementResult::Skipped);
    }

    #[test]
    fn test_view_rejects_direct_mutation() {
        let db = database();
        db.execute("CREATE MATERIALIZED VIEW v AS SELECT id, name FROM base").unwrap();

        for sql in [
            "INSERT INTO v VALUES (9, 'x')",
            "UPDATE v SET name = 'x'",
            "DELETE FROM v",
            "TRUNCATE TABLE v",
            "CREATE INDEX idx ON v (name)",
            "ALTER TABLE v RENAME TO w",
            "DROP TABLE v",
        ] {
            assert_error_sqlstate(db.execute(sql), "0A000");
        }
    }

    #[test]
    fn test_create_index() {
        let db = database();
        db.execute("CREATE INDEX idx_name ON base (name)").unwrap();
        assert_eq!(db.catalog().table(db.catalog().lookup_id("base").unwrap()).unwrap().indexes(), vec!["idx_name"]);

        assert_error_sqlstate(db.execute("CREATE INDEX idx_name ON base (id)"), "42P07");
        assert_error_sqlstate(db.execute("CREATE INDEX idx2 ON base (nope)"), "42703");
    }

    #[test]
    fn test_rename_invalidates_then_restores_dependents() {
        let db = database();
        db.execute("CREATE MATERIALIZED VIEW v AS SELECT name FROM base").unwrap();

        db.execute("ALTER TABLE base RENAME TO renamed").unwrap();
        assert_eq!(db.view("v").unwrap().status(), ViewStatus::Invalid);
        assert_eq!(db.scan("renamed").unwrap().len(), 2);

        db.execute("ALTER TABLE renamed RENAME TO base").unwrap();
        assert_eq!(db.view("v").unwrap().status(), ViewStatus::Valid);
        assert_eq!(db.scan("v").unwrap().len(), 2);
    }

    #[test]
    fn test_query_evaluates_transiently() {
        let db = database();
        let rows = db.query("SELECT name FROM base WHERE id = 2").unwrap();
        assert_eq!(rows, vec![row!["World"]]);
        assert!(db.catalog().views().is_empty());

        match db.execute("SELECT id FROM base WHERE id > 1").unwrap() {
            StatementResult::Rows(rows) => assert_eq!(rows, vec![row![2]]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unbacked_view_evaluates_plan() {
        let db = database();
        db.execute("CREATE MATERIALIZED VIEW v AS SELECT id, name FROM base").unwrap();
        db.execute("CREATE MATERIALIZED VIEW w AS SELECT name FROM v WHERE id = 1").unwrap();

        assert!(db.view("w").unwrap().backing().is_none());
        assert_eq!(db.scan("w").unwrap(), vec![row!["Hello"]]);
        db.execute("UPDATE base SET name = 'Howdy' WHERE id = 1").unwrap();
        assert_eq!(db.scan("w").unwrap(), vec![row!["Howdy"]]);
    }

    #[test]
    fn test_delete_rebuilds_backing_on_scan() {
        let db = database();
        db.execute("CREATE MATERIALIZED VIEW v AS SELECT id, name FROM base").unwrap();

        let outcome = match db.execute("DELETE FROM base WHERE id = 1").unwrap() {
            StatementResult::RowsAffected(outcome) => outcome,
            other => panic!("unexpected {:?}", other),
        };
        let view = db.view("v").unwrap();
        assert_eq!(outcome.report.stale_views, vec![view.id()]);
        assert!(view.backing().unwrap().is_stale());

        assert_eq!(db.scan("v").unwrap(), vec![row![2, "World"]]);
        assert_eq!(db.metrics_snapshot().rebuilds, 1);
        assert!(!view.backing().unwrap().is_stale());
    }

    #[test]
    fn test_metrics_snapshot_sums_staleness() {
        let db = database();
        db.execute("CREATE MATERIALIZED VIEW v AS SELECT id FROM base").unwrap();
        let view = db.view("v").unwrap();

        view.max_data_modification_id(db.catalog());
        view.max_data_modification_id(db.catalog());
        let snapshot = db.metrics_snapshot();
        assert_eq!(snapshot.staleness_hits, 1);
        assert_eq!(snapshot.staleness_misses, 1);
    }
}
