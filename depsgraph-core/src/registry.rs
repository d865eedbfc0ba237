//! Graph Registry
//!
//! Owns one [`Depsgraph`] per evaluation scope. Graphs are created on first
//! use and live until their scope is removed.
//!
//! Each graph sits behind its own lock, so rebuilding or propagating is
//! single-writer per graph while different scopes proceed in parallel.
//! Requesting a rebuild does not need the lock: the registry keeps a handle
//! to every graph's relations flag.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::GraphConfig;
use crate::graph::{Depsgraph, Recalc, RelationsTag};
use crate::pipeline::EvaluationScope;
use crate::store::DatablockId;
use crate::tag::{self, UpdateSource};

/// A graph shared between threads.
pub type SharedGraph = Arc<Mutex<Depsgraph>>;

#[derive(Debug, Clone)]
struct Entry {
    graph: SharedGraph,
    relations: RelationsTag,
}

/// Every live graph, keyed by scope.
#[derive(Debug, Default)]
pub struct GraphRegistry {
    config: GraphConfig,
    graphs: DashMap<EvaluationScope, Entry>,
}

impl GraphRegistry {
    /// Graphs created by this registry get a copy of `config`.
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            graphs: DashMap::new(),
        }
    }

    /// The graph of `scope`, created empty if it does not exist yet. A new
    /// graph is tagged for rebuild.
    pub fn ensure(&self, scope: &EvaluationScope) -> SharedGraph {
        if let Some(entry) = self.graphs.get(scope) {
            return Arc::clone(&entry.graph);
        }
        let entry = self.graphs.entry(scope.clone()).or_insert_with(|| {
            debug!(?scope, "graph created");
            let graph = Depsgraph::new(scope.clone(), self.config.clone());
            let relations = graph.relations_tag();
            Entry {
                graph: Arc::new(Mutex::new(graph)),
                relations,
            }
        });
        Arc::clone(&entry.graph)
    }

    pub fn get(&self, scope: &EvaluationScope) -> Option<SharedGraph> {
        self.graphs.get(scope).map(|entry| Arc::clone(&entry.graph))
    }

    /// Drop the registry's reference to the graph of `scope`.
    pub fn remove(&self, scope: &EvaluationScope) -> Option<SharedGraph> {
        let (_, entry) = self.graphs.remove(scope)?;
        debug!(?scope, "graph removed");
        Some(entry.graph)
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn scopes(&self) -> Vec<EvaluationScope> {
        self.graphs.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Request a relations rebuild of every graph. Does not wait for any
    /// graph lock.
    pub fn tag_relations_update_all(&self) {
        for entry in self.graphs.iter() {
            entry.relations.tag();
        }
        debug!(graphs = self.graphs.len(), "relations tagged on every graph");
    }

    /// Tag a datablock in every graph that contains it. Returns how many
    /// graphs were reached.
    pub fn id_tag_update_all(&self, id: DatablockId, recalc: Recalc, source: UpdateSource) -> usize {
        // Locks are taken after the map guards are released.
        let graphs: Vec<SharedGraph> = self.graphs.iter().map(|entry| Arc::clone(&entry.graph)).collect();
        graphs
            .iter()
            .filter(|graph| {
                let mut graph = graph.lock();
                if graph.find_id_node(id).is_none() {
                    return false;
                }
                tag::id_tag_update(&mut graph, id, recalc, source);
                true
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::graph::{ComponentKey, NodeType};
    use crate::pipeline;
    use crate::store::{DatablockStore, ObjectType};

    #[test]
    fn ensure_is_idempotent() {
        let registry = GraphRegistry::default();
        let first = registry.ensure(&EvaluationScope::AllObjects);
        let second = registry.ensure(&EvaluationScope::AllObjects);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&EvaluationScope::AllObjects).is_some());
        assert!(registry.get(&EvaluationScope::AllObjects).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn new_graphs_need_a_build() {
        let registry = GraphRegistry::new(GraphConfig::strict());
        let graph = registry.ensure(&EvaluationScope::AllObjects);
        let graph = graph.lock();
        assert!(graph.needs_relations_update(0));
        assert_eq!(graph.config(), &GraphConfig::strict());
    }

    #[test]
    fn tags_reach_every_graph_without_locking() {
        let mut store = DatablockStore::new();
        let cube = store.add_object("Cube", ObjectType::Mesh);
        let registry = GraphRegistry::default();
        let scopes = [EvaluationScope::AllObjects, EvaluationScope::Ids(vec![cube])];
        for scope in &scopes {
            let graph = registry.ensure(scope);
            pipeline::build(&mut graph.lock(), &store).unwrap();
        }

        let held = registry.ensure(&scopes[0]);
        let guard = held.lock();
        registry.tag_relations_update_all();
        assert!(guard.relations_tag().is_tagged());
        drop(guard);

        for scope in &scopes {
            let graph = registry.get(scope).unwrap();
            assert!(pipeline::relations_update(&mut graph.lock(), &store).unwrap());
        }
    }

    #[test]
    fn datablock_tags_reach_graphs_containing_it() {
        let mut store = DatablockStore::new();
        let cube = store.add_object("Cube", ObjectType::Mesh);
        let other = store.add_object("Other", ObjectType::Empty);
        let registry = GraphRegistry::default();
        for scope in [EvaluationScope::Ids(vec![cube]), EvaluationScope::Ids(vec![other])] {
            let graph = registry.ensure(&scope);
            let mut graph = graph.lock();
            pipeline::build(&mut graph, &store).unwrap();
            tag::clear_tags(&mut graph);
        }

        let reached = registry.id_tag_update_all(cube, Recalc::TRANSFORM, UpdateSource::UserEdit);
        assert_eq!(reached, 1);
        let graph = registry.get(&EvaluationScope::Ids(vec![cube])).unwrap();
        let graph = graph.lock();
        let transform = graph
            .find_component(&ComponentKey::new(cube, NodeType::Transform))
            .unwrap();
        assert!(!graph.component(transform).is_clean());
    }

    #[test]
    fn scopes_build_in_parallel() {
        let mut store = DatablockStore::new();
        let ids: Vec<DatablockId> = (0..4)
            .map(|i| store.add_object(format!("Object{i}"), ObjectType::Mesh))
            .collect();
        let registry = GraphRegistry::default();

        thread::scope(|s| {
            for &id in &ids {
                let registry = &registry;
                let store = &store;
                s.spawn(move || {
                    let graph = registry.ensure(&EvaluationScope::Ids(vec![id]));
                    let mut graph = graph.lock();
                    pipeline::relations_update(&mut graph, store).unwrap();
                });
            }
        });

        assert_eq!(registry.len(), ids.len());
        for id in ids {
            let graph = registry.get(&EvaluationScope::Ids(vec![id])).unwrap();
            assert!(graph.lock().find_id_node(id).is_some());
        }
    }
}
