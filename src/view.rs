//! Materialized view definitions: compilation, column derivation,
//! cascade recompilation and the staleness cache.
//!
//! A view moves through `Uncompiled → Valid | Invalid` on its first
//! compile and between `Valid` and `Invalid` on every recompile, until
//! `drop` leaves it `Removed`. A compile error is retained in the view
//! state and surfaces only when the view is scanned.
//!
//! Recompiling a view is serialized per view by its mutator lock; cascades
//! visit dependents depth-first without holding any lock across views.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::LocalKey;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, EntityId};
use crate::config::MatViewConfig;
use crate::engine::{CompileContext, Plan, Prepared, QueryCompiler};
use crate::error::{MatViewError, MatViewResult};
use crate::schema::inference::{derive_columns, ColumnNamer};
use crate::schema::Column;

thread_local! {
    static MODIFICATION_CHECKS: RefCell<HashSet<EntityId>> = RefCell::new(HashSet::new());
    static SCANS: RefCell<HashSet<EntityId>> = RefCell::new(HashSet::new());
}

/// Marks an entity as in progress on the current thread until dropped
pub struct ReentryGuard {
    set: &'static LocalKey<RefCell<HashSet<EntityId>>>,
    id: EntityId,
}

impl ReentryGuard {
    fn enter(set: &'static LocalKey<RefCell<HashSet<EntityId>>>, id: EntityId) -> Option<Self> {
        set.with(|s| s.borrow_mut().insert(id)).then_some(Self { set, id })
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        self.set.with(|s| {
            s.borrow_mut().remove(&self.id);
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFlags {
    pub recursion_permitted: bool,
    pub table_expression: bool,
    pub transient: bool,
}

/// The user-supplied part of a view: query text, column templates, options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub query_sql: String,
    pub templates: Option<Vec<Column>>,
    pub flags: ViewFlags,
    pub or_replace: bool,
    pub force: bool,
}

impl ViewDefinition {
    pub fn new(query_sql: impl Into<String>) -> Self {
        Self {
            query_sql: query_sql.into(),
            templates: None,
            flags: ViewFlags::default(),
            or_replace: false,
            force: false,
        }
    }
}

/// Output of a successful compile
#[derive(Debug, Clone)]
pub struct Compiled {
    pub plan: Arc<dyn Plan>,
    pub columns: Vec<Column>,
    pub sources: Vec<EntityId>,
}

/// Everything recompilation replaces at once
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub plan: Option<Arc<dyn Plan>>,
    pub columns: Vec<Column>,
    /// Distinct entities read, ordered by id
    pub sources: Vec<EntityId>,
    pub error: Option<MatViewError>,
    pub recursion_detected: bool,
    compiled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewStatus {
    Uncompiled,
    Valid,
    Invalid,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewOperation {
    Insert,
    Update,
    Delete,
    Truncate,
    CreateIndex,
    Rename,
}

impl ViewOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewOperation::Insert => "INSERT",
            ViewOperation::Update => "UPDATE",
            ViewOperation::Delete => "DELETE",
            ViewOperation::Truncate => "TRUNCATE",
            ViewOperation::CreateIndex => "CREATE INDEX",
            ViewOperation::Rename => "RENAME",
        }
    }
}

#[derive(Debug, Default)]
struct StalenessRecord {
    checked: bool,
    last_checked: u64,
    cached: u64,
    hits: u64,
    misses: u64,
}

/// Staleness cache counters of one view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StalenessStats {
    pub last_checked: u64,
    pub cached: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Physical copy of a view's rows, kept current by refresh rules
#[derive(Debug)]
pub struct BackingStore {
    pub id: EntityId,
    stale: AtomicBool,
}

impl BackingStore {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            stale: AtomicBool::new(false),
        }
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Clear the stale flag, returning whether it was set
    pub fn take_stale(&self) -> bool {
        self.stale.swap(false, Ordering::SeqCst)
    }
}

/// Called after every single-view recompile, before the cascade continues.
///
/// Runs while the view's recompile lock is held: implementations must not
/// recompile, retire or serialize on that same view.
pub trait RecompileListener {
    fn view_recompiled(&self, view: &Arc<MaterializedView>);
}

/// What compiling a view needs from its surroundings
pub struct CompileEnv<'a> {
    pub catalog: &'a Catalog,
    pub compiler: &'a dyn QueryCompiler,
    pub config: &'a MatViewConfig,
    pub listener: Option<&'a dyn RecompileListener>,
}

/// Compile `query_sql` and derive the view's columns.
///
/// Anything the compiler prepares that is not a read-only query is
/// rejected as a syntax error.
pub fn compile(query_sql: &str, templates: Option<&[Column]>, env: &CompileEnv<'_>) -> MatViewResult<Compiled> {
    let ctx = CompileContext {
        catalog: env.catalog,
        default_schema: &env.config.default_schema,
    };

    let plan = match env.compiler.prepare(query_sql, &ctx)? {
        Prepared::Query(plan) => plan,
        Prepared::Command { kind } => {
            return Err(MatViewError::InvalidSelectStatement {
                sql: query_sql.to_string(),
                reason: format!("{} is not a query", kind),
            })
        }
    };

    let plan_sources = plan.sources().to_vec();
    let mut namer = ColumnNamer::new(&env.config.generated_column_prefix, env.config.max_identifier_length);
    let columns = derive_columns(
        plan.expressions(),
        templates,
        |r| {
            let source = plan_sources.get(r.source)?;
            env.catalog.columns_of(*source)?.into_iter().nth(r.column)
        },
        &mut namer,
    );

    let mut sources = plan_sources;
    sources.sort();
    sources.dedup();

    Ok(Compiled { plan, columns, sources })
}

pub struct MaterializedView {
    id: EntityId,
    schema: String,
    name: String,
    owner: String,
    cache_staleness: bool,
    definition: RwLock<ViewDefinition>,
    state: RwLock<ViewState>,
    mutator: Mutex<()>,
    staleness: Mutex<StalenessRecord>,
    backing: RwLock<Option<Arc<BackingStore>>>,
    removed: AtomicBool,
}

impl fmt::Debug for MaterializedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedView")
            .field("id", &self.id)
            .field("name", &self.qualified_name())
            .field("status", &self.status())
            .finish()
    }
}

impl MaterializedView {
    pub fn new(
        id: EntityId,
        schema: &str,
        name: &str,
        owner: &str,
        definition: ViewDefinition,
        cache_staleness: bool,
    ) -> Self {
        Self {
            id,
            schema: schema.to_string(),
            name: name.to_string(),
            owner: owner.to_string(),
            cache_staleness,
            definition: RwLock::new(definition),
            state: RwLock::new(ViewState::default()),
            mutator: Mutex::new(()),
            staleness: Mutex::new(StalenessRecord::default()),
            backing: RwLock::new(None),
            removed: AtomicBool::new(false),
        }
    }

    /// A never-registered view wrapping an ad-hoc query.
    ///
    /// Fails immediately when the query does not compile.
    pub fn transient(query_sql: &str, owner: &str, env: &CompileEnv<'_>) -> MatViewResult<Arc<Self>> {
        let mut definition = ViewDefinition::new(query_sql);
        definition.flags.transient = true;

        let view = Arc::new(Self::new(
            EntityId::TRANSIENT,
            env.catalog.default_schema(),
            "_transient",
            owner,
            definition,
            false,
        ));
        view.initialize(env);

        match view.error() {
            Some(e) => Err(e),
            None => Ok(view),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_transient(&self) -> bool {
        self.id.is_transient() || self.definition.read().flags.transient
    }

    pub fn definition(&self) -> ViewDefinition {
        self.definition.read().clone()
    }

    pub fn flags(&self) -> ViewFlags {
        self.definition.read().flags
    }

    pub fn state(&self) -> ViewState {
        self.state.read().clone()
    }

    pub fn columns(&self) -> Vec<Column> {
        self.state.read().columns.clone()
    }

    pub fn plan(&self) -> Option<Arc<dyn Plan>> {
        self.state.read().plan.clone()
    }

    pub fn error(&self) -> Option<MatViewError> {
        self.state.read().error.clone()
    }

    pub fn recursion_detected(&self) -> bool {
        self.state.read().recursion_detected
    }

    pub fn status(&self) -> ViewStatus {
        if self.removed.load(Ordering::SeqCst) {
            return ViewStatus::Removed;
        }
        let state = self.state.read();
        match (state.compiled, &state.error) {
            (false, _) => ViewStatus::Uncompiled,
            (true, Some(_)) => ViewStatus::Invalid,
            (true, None) => ViewStatus::Valid,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// Terminal transition; the view no longer recompiles
    pub fn mark_removed(&self) {
        self.retire(|| ());
    }

    /// Run `teardown` and mark the view removed, serialized with recompiles
    pub fn retire(&self, teardown: impl FnOnce()) {
        let _guard = self.mutator.lock();
        teardown();
        self.removed.store(true, Ordering::SeqCst);
    }

    /// Run `f` while no recompile of this view is in progress.
    ///
    /// Backing store and refresh rule changes go through here so they
    /// never interleave with a rebind done by a recompile.
    pub fn serialized<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.mutator.lock();
        f()
    }

    pub fn backing(&self) -> Option<Arc<BackingStore>> {
        self.backing.read().clone()
    }

    pub fn set_backing(&self, backing: Option<Arc<BackingStore>>) -> Option<Arc<BackingStore>> {
        std::mem::replace(&mut *self.backing.write(), backing)
    }

    /// First compile of a new view
    pub fn initialize(&self, env: &CompileEnv<'_>) {
        let _guard = self.mutator.lock();
        self.init_columns_and_sources(env);
    }

    /// Swap the definition without compiling; returns the previous one.
    ///
    /// Callers follow up with [`MaterializedView::recompile`].
    pub fn replace_definition(&self, definition: ViewDefinition) -> ViewDefinition {
        let _guard = self.mutator.lock();
        std::mem::replace(&mut *self.definition.write(), definition)
    }

    /// Recompile from the stored query text.
    ///
    /// Edges are detached before compiling and re-attached to the fresh
    /// source set afterwards, whatever the outcome. A failed compile leaves
    /// either the column templates (recursion permitted) or zero columns.
    fn init_columns_and_sources(&self, env: &CompileEnv<'_>) {
        let persistent = !self.is_transient();
        if persistent {
            env.catalog.detach_view(self.id);
        }

        let definition = self.definition.read().clone();
        let state = match compile(&definition.query_sql, definition.templates.as_deref(), env) {
            Ok(compiled) => {
                let canonical = compiled.plan.plan_sql().to_string();
                if canonical != definition.query_sql {
                    self.definition.write().query_sql = canonical;
                }
                ViewState {
                    plan: Some(compiled.plan),
                    columns: compiled.columns,
                    sources: compiled.sources,
                    error: None,
                    recursion_detected: false,
                    compiled: true,
                }
            }
            Err(error) => {
                let permitted = definition.flags.recursion_permitted;
                let recursion_detected = permitted && error.is_relation_not_found(&self.qualified_name());
                let mut state = ViewState {
                    recursion_detected,
                    compiled: true,
                    ..ViewState::default()
                };

                match (&definition.templates, permitted) {
                    (Some(templates), true) => {
                        debug!(
                            "view {} compiled to template shape ({} columns): {}",
                            self.qualified_name(),
                            templates.len(),
                            error
                        );
                        state.columns = templates.clone();
                    }
                    _ => {
                        debug!("view {} is invalid: {}", self.qualified_name(), error);
                        state.error = Some(error);
                    }
                }
                state
            }
        };

        if persistent {
            env.catalog.attach_view(self.id, &state.sources);
        }
        *self.state.write() = state;
        self.staleness.lock().checked = false;
    }

    /// Recompile this view and cascade into every view that depends on it.
    ///
    /// Without `force` the first error (this view's or a dependent's) stops
    /// the cascade and is returned. With `force` every reachable view is
    /// recompiled, each keeps its own error, and nothing is returned.
    pub fn recompile(self: &Arc<Self>, env: &CompileEnv<'_>, force: bool) -> Option<MatViewError> {
        let mut visited = HashSet::new();
        let result = self.recompile_cascade(env, force, &mut visited, 0);
        env.catalog.invalidate_plan_caches();
        info!(
            "recompiled {} ({} views visited, force={})",
            self.qualified_name(),
            visited.len(),
            force
        );
        result
    }

    fn recompile_cascade(
        self: &Arc<Self>,
        env: &CompileEnv<'_>,
        force: bool,
        visited: &mut HashSet<EntityId>,
        depth: usize,
    ) -> Option<MatViewError> {
        if self.is_removed() || !visited.insert(self.id) {
            return None;
        }

        if depth > env.config.max_cascade_depth {
            let error = MatViewError::DependencyDepthExceeded {
                depth,
                max_depth: env.config.max_cascade_depth,
            };
            warn!("cascade stopped at {}: {}", self.qualified_name(), error);
            return (!force).then_some(error);
        }

        let own_error = {
            let _guard = self.mutator.lock();
            if self.is_removed() {
                return None;
            }
            self.init_columns_and_sources(env);
            // the rebind belongs to this recompile, not to an overlapping one
            if let Some(listener) = env.listener {
                listener.view_recompiled(self);
            }
            self.error()
        };

        if let Some(error) = own_error {
            if !force {
                return Some(error);
            }
        }

        for dependent in env.catalog.dependent_views(self.id) {
            if let Some(error) = dependent.recompile_cascade(env, force, visited, depth + 1) {
                if !force {
                    return Some(error);
                }
            }
        }

        None
    }

    /// Newest modification of anything this view reads.
    ///
    /// `u64::MAX` while the view has an error or no plan. Otherwise the
    /// value is recomputed from the plan only when the global clock moved
    /// past the last check, and never decreases.
    pub fn max_data_modification_id(&self, catalog: &Catalog) -> u64 {
        let plan = {
            let state = self.state.read();
            match (&state.error, &state.plan) {
                (None, Some(plan)) => Arc::clone(plan),
                _ => return u64::MAX,
            }
        };

        let db_clock = catalog.clock().current();
        {
            let mut record = self.staleness.lock();
            if self.cache_staleness && record.checked && db_clock <= record.last_checked {
                record.hits += 1;
                return record.cached;
            }
        }

        let fresh = match ReentryGuard::enter(&MODIFICATION_CHECKS, self.id) {
            Some(_guard) => plan.max_modification_id(catalog),
            // a self-referencing plan asks about itself; answer with what we know
            None => return self.staleness.lock().cached,
        };

        let mut record = self.staleness.lock();
        record.misses += 1;
        record.cached = record.cached.max(fresh);
        record.last_checked = record.last_checked.max(db_clock);
        record.checked = true;
        record.cached
    }

    pub fn staleness_stats(&self) -> StalenessStats {
        let record = self.staleness.lock();
        StalenessStats {
            last_checked: record.last_checked,
            cached: record.cached,
            hits: record.hits,
            misses: record.misses,
        }
    }

    /// Plan to scan with, or the diagnostic for an invalid view
    pub fn check_scan(&self) -> MatViewResult<Option<Arc<dyn Plan>>> {
        if self.is_removed() {
            return Err(MatViewError::ObjectNotFound {
                name: self.qualified_name(),
            });
        }
        let state = self.state.read();
        match &state.error {
            Some(error) => Err(MatViewError::ViewInvalid {
                view: self.qualified_name(),
                reason: error.to_string(),
            }),
            None => Ok(state.plan.clone()),
        }
    }

    /// `None` when this thread is already scanning the view
    pub fn enter_scan(&self) -> Option<ReentryGuard> {
        ReentryGuard::enter(&SCANS, self.id)
    }

    /// Direct mutation, indexing, rename and truncate never apply to a view
    pub fn unsupported(&self, operation: ViewOperation) -> MatViewError {
        MatViewError::UnsupportedOperation {
            operation: operation.as_str().to_string(),
            entity: "VIEW".to_string(),
        }
    }

    pub fn create_sql(&self) -> String {
        let definition = self.definition.read();
        let mut sql = String::from("CREATE ");
        if definition.or_replace {
            sql.push_str("OR REPLACE ");
        }
        if definition.force {
            sql.push_str("FORCE ");
        }
        sql.push_str("MATERIALIZED VIEW ");
        if definition.flags.table_expression {
            sql.push_str("TABLE_EXPRESSION ");
        }
        sql.push_str(&self.qualified_name());

        let columns = self.columns();
        if !columns.is_empty() {
            let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
            sql.push('(');
            sql.push_str(&names.join(", "));
            sql.push(')');
        }
        sql.push_str(" AS\n");
        sql.push_str(&definition.query_sql);
        sql
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP MATERIALIZED VIEW IF EXISTS {} CASCADE", self.qualified_name())
    }
}
