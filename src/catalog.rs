//! Catalog: an arena of tables and views addressed by [`EntityId`].
//!
//! The catalog owns the global modification clock, the structural version
//! token sessions use to drop cached plans, and the dependency edge sets.
//! Entities never hold references to each other; everything goes through ids.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::dependency::graph::DependencyGraph;
use crate::engine::ModificationSource;
use crate::error::{MatViewError, MatViewResult};
use crate::schema::Column;
use crate::view::MaterializedView;

/// Stable identity of a catalog entity. Id 0 marks transient views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl EntityId {
    pub const TRANSIENT: EntityId = EntityId(0);

    pub fn is_transient(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic counter bumped on every data-affecting write
#[derive(Debug, Default)]
pub struct ModificationClock(AtomicU64);

impl ModificationClock {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Advance and return the new value
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A base table, or the hidden backing store of a view
#[derive(Debug)]
pub struct TableEntry {
    pub id: EntityId,
    pub schema: String,
    name: RwLock<String>,
    pub columns: Vec<Column>,
    /// Set for backing stores, which have no catalog name
    pub backing_for: Option<EntityId>,
    modification_id: AtomicU64,
    indexes: Mutex<Vec<String>>,
}

impl TableEntry {
    pub fn new(id: EntityId, schema: &str, name: &str, columns: Vec<Column>) -> Self {
        Self {
            id,
            schema: schema.to_string(),
            name: RwLock::new(name.to_string()),
            columns,
            backing_for: None,
            modification_id: AtomicU64::new(0),
            indexes: Mutex::new(Vec::new()),
        }
    }

    pub fn backing(id: EntityId, view: &MaterializedView, columns: Vec<Column>) -> Self {
        let mut entry = Self::new(id, view.schema(), &format!("_backing_{}", view.name()), columns);
        entry.backing_for = Some(view.id());
        entry
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name.read())
    }

    pub fn modification_id(&self) -> u64 {
        self.modification_id.load(Ordering::SeqCst)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn indexes(&self) -> Vec<String> {
        self.indexes.lock().clone()
    }

    pub fn add_index(&self, index: &str) {
        self.indexes.lock().push(index.to_string());
    }
}

/// Either kind of catalog entity
#[derive(Debug, Clone)]
pub enum Entity {
    Table(Arc<TableEntry>),
    View(Arc<MaterializedView>),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Table(t) => t.id,
            Entity::View(v) => v.id(),
        }
    }
}

#[derive(Debug)]
pub struct Catalog {
    default_schema: String,
    next_id: AtomicU32,
    clock: ModificationClock,
    version: AtomicU64,
    names: RwLock<HashMap<String, EntityId>>,
    tables: RwLock<HashMap<EntityId, Arc<TableEntry>>>,
    views: RwLock<HashMap<EntityId, Arc<MaterializedView>>>,
    graph: Mutex<DependencyGraph>,
}

impl Catalog {
    pub fn new(default_schema: &str) -> Self {
        Self {
            default_schema: default_schema.to_string(),
            next_id: AtomicU32::new(1),
            clock: ModificationClock::default(),
            version: AtomicU64::new(1),
            names: RwLock::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            views: RwLock::new(HashMap::new()),
            graph: Mutex::new(DependencyGraph::new()),
        }
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    pub fn allocate_id(&self) -> EntityId {
        EntityId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Split `schema.name` (or `name`) into its parts, applying the default schema
    pub fn split_name(&self, name: &str) -> (String, String) {
        match name.split_once('.') {
            Some((schema, table)) => (schema.to_string(), table.to_string()),
            None => (self.default_schema.clone(), name.to_string()),
        }
    }

    fn key(schema: &str, name: &str) -> String {
        format!("{}.{}", schema.to_lowercase(), name.to_lowercase())
    }

    pub fn lookup_id(&self, name: &str) -> Option<EntityId> {
        let (schema, name) = self.split_name(name);
        self.names.read().get(&Self::key(&schema, &name)).copied()
    }

    pub fn lookup(&self, name: &str) -> Option<Entity> {
        self.lookup_id(name).and_then(|id| self.entity(id))
    }

    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        if let Some(table) = self.tables.read().get(&id) {
            return Some(Entity::Table(Arc::clone(table)));
        }
        self.views.read().get(&id).map(|v| Entity::View(Arc::clone(v)))
    }

    pub fn table(&self, id: EntityId) -> Option<Arc<TableEntry>> {
        self.tables.read().get(&id).cloned()
    }

    pub fn view(&self, id: EntityId) -> Option<Arc<MaterializedView>> {
        self.views.read().get(&id).cloned()
    }

    pub fn is_base_table(&self, id: EntityId) -> bool {
        self.tables.read().get(&id).is_some_and(|t| t.backing_for.is_none())
    }

    /// Registered views, ordered by id
    pub fn views(&self) -> Vec<Arc<MaterializedView>> {
        let mut views: Vec<_> = self.views.read().values().cloned().collect();
        views.sort_by_key(|v| v.id());
        views
    }

    /// Named base tables, ordered by id
    pub fn tables(&self) -> Vec<Arc<TableEntry>> {
        let mut tables: Vec<_> = self
            .tables
            .read()
            .values()
            .filter(|t| t.backing_for.is_none())
            .cloned()
            .collect();
        tables.sort_by_key(|t| t.id);
        tables
    }

    /// Backing stores of views, ordered by id
    pub fn backing_tables(&self) -> Vec<Arc<TableEntry>> {
        let mut tables: Vec<_> = self
            .tables
            .read()
            .values()
            .filter(|t| t.backing_for.is_some())
            .cloned()
            .collect();
        tables.sort_by_key(|t| t.id);
        tables
    }

    /// Current columns of a table or view
    pub fn columns_of(&self, id: EntityId) -> Option<Vec<Column>> {
        match self.entity(id)? {
            Entity::Table(t) => Some(t.columns.clone()),
            Entity::View(v) => Some(v.columns()),
        }
    }

    pub fn entity_name(&self, id: EntityId) -> String {
        match self.entity(id) {
            Some(Entity::Table(t)) => t.qualified_name(),
            Some(Entity::View(v)) => v.qualified_name(),
            None => id.to_string(),
        }
    }

    fn claim_name(&self, schema: &str, name: &str, id: EntityId) -> MatViewResult<()> {
        let mut names = self.names.write();
        let key = Self::key(schema, name);
        if names.contains_key(&key) {
            return Err(MatViewError::ObjectAlreadyExists {
                name: format!("{}.{}", schema, name),
            });
        }
        names.insert(key, id);
        Ok(())
    }

    pub fn register_table(&self, table: TableEntry) -> MatViewResult<Arc<TableEntry>> {
        if table.backing_for.is_none() {
            self.claim_name(&table.schema, &table.name(), table.id)?;
        }
        let table = Arc::new(table);
        self.tables.write().insert(table.id, Arc::clone(&table));
        Ok(table)
    }

    pub fn register_view(&self, view: Arc<MaterializedView>) -> MatViewResult<()> {
        if view.is_transient() {
            return Err(MatViewError::CatalogError {
                operation: "register view".to_string(),
                reason: format!("transient view \"{}\" cannot be registered", view.name()),
            });
        }
        self.claim_name(view.schema(), view.name(), view.id())?;
        self.views.write().insert(view.id(), view);
        Ok(())
    }

    /// Remove an entity, its name and every dependency edge touching it
    pub fn remove(&self, id: EntityId) -> Option<Entity> {
        let entity = self.entity(id)?;
        let key = match &entity {
            Entity::Table(t) => (t.backing_for.is_none()).then(|| Self::key(&t.schema, &t.name())),
            Entity::View(v) => Some(Self::key(v.schema(), v.name())),
        };
        if let Some(key) = key {
            self.names.write().remove(&key);
        }
        self.tables.write().remove(&id);
        self.views.write().remove(&id);
        self.graph.lock().remove_entity(id);
        Some(entity)
    }

    pub fn rename_table(&self, id: EntityId, new_name: &str) -> MatViewResult<()> {
        let table = self.table(id).ok_or_else(|| MatViewError::ObjectNotFound { name: id.to_string() })?;
        self.claim_name(&table.schema, new_name, id)?;
        self.names.write().remove(&Self::key(&table.schema, &table.name()));
        *table.name.write() = new_name.to_string();
        Ok(())
    }

    pub fn clock(&self) -> &ModificationClock {
        &self.clock
    }

    /// Advance the clock for a write to `table`
    pub fn record_write(&self, table: &TableEntry) -> u64 {
        let id = self.clock.advance();
        table.modification_id.store(id, Ordering::SeqCst);
        id
    }

    /// Structural version; sessions drop their cached plans when it moves
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn invalidate_plan_caches(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn attach_view(&self, view: EntityId, sources: &[EntityId]) {
        self.graph.lock().attach(view, sources);
    }

    pub fn detach_view(&self, view: EntityId) {
        self.graph.lock().detach(view);
    }

    pub fn sources_of(&self, view: EntityId) -> Vec<EntityId> {
        self.graph.lock().sources_of(view)
    }

    pub fn dependents_of(&self, entity: EntityId) -> Vec<EntityId> {
        self.graph.lock().dependents_of(entity)
    }

    /// Views directly reading `entity`, resolved
    pub fn dependent_views(&self, entity: EntityId) -> Vec<Arc<MaterializedView>> {
        self.dependents_of(entity)
            .into_iter()
            .filter_map(|id| self.view(id))
            .collect()
    }

    pub fn transitive_dependents(&self, entity: EntityId, max_depth: usize) -> MatViewResult<Vec<EntityId>> {
        self.graph.lock().transitive_dependents(entity, max_depth)
    }

    pub fn find_cycle(&self, view: EntityId, sources: &[EntityId]) -> Option<Vec<String>> {
        let cycle = self.graph.lock().find_cycle(view, sources)?;
        Some(cycle.into_iter().map(|id| self.entity_name(id)).collect())
    }

    /// Every (view, source) edge
    pub fn edges(&self) -> Vec<(EntityId, EntityId)> {
        self.graph.lock().edges()
    }
}

impl ModificationSource for Catalog {
    fn modification_id(&self, entity: EntityId) -> u64 {
        match self.entity(entity) {
            Some(Entity::Table(t)) => t.modification_id(),
            Some(Entity::View(v)) => v.max_data_modification_id(self),
            None => u64::MAX,
        }
    }
}
