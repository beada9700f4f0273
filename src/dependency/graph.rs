use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::catalog::EntityId;
use crate::error::{MatViewError, MatViewResult};

/// Dependency edges between views and the entities they read.
///
/// Both directions are index sets keyed by [`EntityId`]: `reads[v]` holds
/// the sources of view `v`, `read_by[s]` the views reading `s`. The two
/// sides always describe the same edge set.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    reads: HashMap<EntityId, HashSet<EntityId>>,
    read_by: HashMap<EntityId, HashSet<EntityId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `view` as a reader of every entity in `sources`
    pub fn attach(&mut self, view: EntityId, sources: &[EntityId]) {
        for source in sources {
            self.reads.entry(view).or_default().insert(*source);
            self.read_by.entry(*source).or_default().insert(view);
        }
    }

    /// Remove every edge where `view` is the reader
    pub fn detach(&mut self, view: EntityId) {
        if let Some(sources) = self.reads.remove(&view) {
            for source in sources {
                if let Some(readers) = self.read_by.get_mut(&source) {
                    readers.remove(&view);
                    if readers.is_empty() {
                        self.read_by.remove(&source);
                    }
                }
            }
        }
    }

    /// Remove an entity entirely: its own reads and every edge pointing at it
    pub fn remove_entity(&mut self, entity: EntityId) {
        self.detach(entity);
        if let Some(readers) = self.read_by.remove(&entity) {
            for reader in readers {
                if let Some(sources) = self.reads.get_mut(&reader) {
                    sources.remove(&entity);
                    if sources.is_empty() {
                        self.reads.remove(&reader);
                    }
                }
            }
        }
    }

    /// Sources of `view`, ordered by id
    pub fn sources_of(&self, view: EntityId) -> Vec<EntityId> {
        sorted(self.reads.get(&view))
    }

    /// Views directly reading `entity`, ordered by id
    pub fn dependents_of(&self, entity: EntityId) -> Vec<EntityId> {
        sorted(self.read_by.get(&entity))
    }

    pub fn has_dependents(&self, entity: EntityId) -> bool {
        self.read_by.get(&entity).is_some_and(|r| !r.is_empty())
    }

    /// Every edge as (view, source), ordered
    pub fn edges(&self) -> Vec<(EntityId, EntityId)> {
        let set: BTreeSet<(EntityId, EntityId)> = self
            .reads
            .iter()
            .flat_map(|(view, sources)| sources.iter().map(move |s| (*view, *s)))
            .collect();
        set.into_iter().collect()
    }

    /// All views that transitively read `entity`, breadth-first.
    ///
    /// Cycles are walked once. Exceeding `max_depth` levels is an error.
    pub fn transitive_dependents(&self, entity: EntityId, max_depth: usize) -> MatViewResult<Vec<EntityId>> {
        let mut visited = HashSet::new();
        let mut result = Vec::new();
        let mut queue = VecDeque::new();

        visited.insert(entity);
        queue.push_back((entity, 0usize));

        while let Some((current, depth)) = queue.pop_front() {
            for dependent in self.dependents_of(current) {
                if !visited.insert(dependent) {
                    continue;
                }
                if depth + 1 > max_depth {
                    return Err(MatViewError::DependencyDepthExceeded {
                        depth: depth + 1,
                        max_depth,
                    });
                }
                result.push(dependent);
                queue.push_back((dependent, depth + 1));
            }
        }

        Ok(result)
    }

    /// Path `start → … → start` through read edges if `start` would read
    /// itself after adding `new_sources`, excluding direct self-reference.
    pub fn find_cycle(&self, start: EntityId, new_sources: &[EntityId]) -> Option<Vec<EntityId>> {
        let mut visiting: Vec<EntityId> = vec![start];
        let mut visited = HashSet::new();

        for source in new_sources.iter().filter(|s| **s != start) {
            if self.walk(*source, start, &mut visiting, &mut visited) {
                visiting.push(start);
                return Some(visiting);
            }
        }
        None
    }

    fn walk(
        &self,
        current: EntityId,
        target: EntityId,
        visiting: &mut Vec<EntityId>,
        visited: &mut HashSet<EntityId>,
    ) -> bool {
        if current == target {
            return true;
        }
        if !visited.insert(current) {
            return false;
        }
        visiting.push(current);
        for next in self.sources_of(current) {
            if self.walk(next, target, visiting, visited) {
                return true;
            }
        }
        visiting.pop();
        false
    }
}

fn sorted(set: Option<&HashSet<EntityId>>) -> Vec<EntityId> {
    let mut ids: Vec<EntityId> = set.map(|s| s.iter().copied().collect()).unwrap_or_default();
    ids.sort();
    ids
}
