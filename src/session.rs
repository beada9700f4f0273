//! Sessions and their resolved-plan caches.
//!
//! Each session owns a cache of view plans keyed by view id. The cache is
//! stamped with the catalog's structural version; a lookup under a newer
//! version clears it first. A plan already handed out keeps running, so a
//! scan that started before a drop or recompile completes against the old
//! plan and only the next statement re-resolves.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::catalog::{Catalog, EntityId};
use crate::database::{Database, StatementResult};
use crate::engine::Plan;
use crate::error::{MatViewError, MatViewResult};
use crate::metrics::Metrics;
use crate::schema::Row;
use crate::view::MaterializedView;

#[derive(Debug, Default)]
pub struct PlanCache {
    version: u64,
    plans: HashMap<EntityId, Arc<dyn Plan>>,
    hits: u64,
    misses: u64,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached plan for `view`, resolving it on a miss.
    ///
    /// `None` means the view scans to no rows (a recursive definition
    /// still on its template shape); nothing is cached for it.
    pub fn resolve(
        &mut self,
        catalog: &Catalog,
        view: &MaterializedView,
        metrics: &Metrics,
    ) -> MatViewResult<Option<Arc<dyn Plan>>> {
        let version = catalog.version();
        if version != self.version {
            if !self.plans.is_empty() {
                debug!("plan cache cleared ({} plans, version {} -> {})", self.plans.len(), self.version, version);
            }
            self.plans.clear();
            self.version = version;
        }

        if let Some(plan) = self.plans.get(&view.id()) {
            self.hits += 1;
            metrics.record_plan_cache_hit();
            return Ok(Some(Arc::clone(plan)));
        }

        self.misses += 1;
        metrics.record_plan_cache_miss();
        let plan = view.check_scan()?;
        if let Some(plan) = &plan {
            self.plans.insert(view.id(), Arc::clone(plan));
        }
        Ok(plan)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// A connection-like handle: a user name plus a private plan cache
pub struct Session<'db> {
    db: &'db Database,
    user: String,
    cache: PlanCache,
}

impl<'db> Session<'db> {
    pub(crate) fn new(db: &'db Database, user: &str) -> Self {
        Self {
            db,
            user: user.to_string(),
            cache: PlanCache::new(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn plan_cache(&self) -> &PlanCache {
        &self.cache
    }

    /// Execute one statement as this session's user
    pub fn execute(&mut self, sql: &str) -> MatViewResult<StatementResult> {
        self.db.execute_as(&self.user, sql)
    }

    /// Rows of a table or view; view plans come from the session cache
    pub fn scan(&mut self, name: &str) -> MatViewResult<Vec<Row>> {
        let view = match self.db.catalog().lookup(name) {
            Some(crate::catalog::Entity::View(view)) => view,
            Some(crate::catalog::Entity::Table(_)) => return self.db.scan(name),
            None => return Err(MatViewError::ObjectNotFound { name: name.to_string() }),
        };

        if !self.db.config().plan_cache {
            return self.db.scan(name);
        }
        let plan = self.cache.resolve(self.db.catalog(), &view, self.db.metrics())?;
        self.db.scan_view(&view, plan)
    }
}
