//! Dependency Graph
//!
//! This module implements the graph that orders evaluation of one scope
//! (a view layer, a render, a compositor preview, ...).
//!
//! # Overview
//!
//! The graph has three layers of nodes:
//!
//! - one [`IdNode`] per datablock pulled into the scope,
//! - [`ComponentNode`]s grouping the work of one aspect of a datablock
//!   (transform, geometry, parameters, ...), optionally qualified by a
//!   sub-id such as a bone name,
//! - [`OperationNode`]s, the schedulable units.
//!
//! Edges ([`Relation`]s) always connect operations: "from must run before
//! to". Relation flags decide whether dirtiness may flow along an edge.
//!
//! # Design Decisions
//!
//! 1. Components and operations live in flat arenas indexed by
//!    [`ComponentId`] / [`OperationId`]. Nothing is removed incrementally:
//!    a relations rebuild clears the arenas and recreates every node.
//!
//! 2. Lookups by key are idempotent. Asking for the same component or
//!    operation twice returns the same node.
//!
//! 3. Declaring the same relation twice (same endpoints and description)
//!    merges the flags into the existing relation instead of adding a
//!    parallel edge.

mod key;
mod node;
mod recalc;
mod relation;
mod snapshot;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::GraphConfig;
use crate::error::{DepsgraphError, Result};
use crate::pipeline::EvaluationScope;
use crate::store::{DatablockId, IdType};

pub use key::{ComponentKey, NodeKey, NodeType, ObjectComponent, OperationCode, OperationKey, SceneComponent};
pub use node::{ComponentId, ComponentNode, IdNode, OperationId, OperationNode, OperationOutput};
pub use recalc::{CustomDataMask, EvalFlag, EvalFlags, Recalc};
pub use relation::{FlushPolicy, Relation, RelationFlag, RelationFlags, RelationId};
pub use snapshot::{GraphSnapshot, RelationRecord};

/// Shareable "relations need rebuild" flag.
///
/// Cloning yields another handle to the same flag, so a thread that does not
/// hold the graph lock can still request a rebuild. The request is only
/// consumed when the next rebuild starts.
#[derive(Debug, Clone, Default)]
pub struct RelationsTag(Arc<AtomicBool>);

impl RelationsTag {
    /// Request a relations rebuild.
    pub fn tag(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a rebuild was requested and not yet started.
    pub fn is_tagged(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Which end of a relation a component key is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    From,
    To,
}

/// The dependency graph of one evaluation scope.
#[derive(Debug)]
pub struct Depsgraph {
    pub(crate) scope: EvaluationScope,
    pub(crate) config: GraphConfig,
    pub(crate) id_nodes: IndexMap<DatablockId, IdNode>,
    pub(crate) components: Vec<ComponentNode>,
    pub(crate) operations: Vec<OperationNode>,
    pub(crate) relations: Vec<Relation>,
    relation_index: HashMap<(OperationId, OperationId, String), RelationId>,
    pub(crate) relations_tag: RelationsTag,
    pub(crate) generation: u64,
    pub(crate) built_from_topology: Option<u64>,
}

impl Depsgraph {
    /// Create an empty graph for a scope. Its relations start out dirty.
    pub fn new(scope: EvaluationScope, config: GraphConfig) -> Self {
        let relations_tag = RelationsTag::default();
        relations_tag.tag();
        Self {
            scope,
            config,
            id_nodes: IndexMap::new(),
            components: Vec::new(),
            operations: Vec::new(),
            relations: Vec::new(),
            relation_index: HashMap::new(),
            relations_tag,
            generation: 0,
            built_from_topology: None,
        }
    }

    /// The scope this graph evaluates.
    pub fn scope(&self) -> &EvaluationScope {
        &self.scope
    }

    /// Settings this graph was created with.
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Number of completed relation rebuilds.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handle to this graph's relations-dirty flag.
    pub fn relations_tag(&self) -> RelationsTag {
        self.relations_tag.clone()
    }

    /// Whether relations must be rebuilt before the next evaluation, either
    /// because they were tagged or because the store topology moved on since
    /// the last build.
    pub fn needs_relations_update(&self, topology_generation: u64) -> bool {
        self.relations_tag.is_tagged() || self.built_from_topology != Some(topology_generation)
    }

    /// Drop every node and relation. Called at the start of a rebuild.
    pub(crate) fn clear(&mut self) {
        self.id_nodes.clear();
        self.components.clear();
        self.operations.clear();
        self.relations.clear();
        self.relation_index.clear();
    }

    /// Get or create the node of a datablock.
    pub fn add_id_node(&mut self, id: DatablockId, id_type: IdType, name: &str) -> &mut IdNode {
        self.id_nodes
            .entry(id)
            .or_insert_with(|| IdNode::new(id, id_type, name))
    }

    /// The node of a datablock, if it is part of the graph.
    pub fn find_id_node(&self, id: DatablockId) -> Option<&IdNode> {
        self.id_nodes.get(&id)
    }

    pub(crate) fn find_id_node_mut(&mut self, id: DatablockId) -> Option<&mut IdNode> {
        self.id_nodes.get_mut(&id)
    }

    /// Datablock nodes in creation order.
    pub fn id_nodes(&self) -> impl Iterator<Item = &IdNode> {
        self.id_nodes.values()
    }

    /// Create-or-find a component. The owning [`IdNode`] must exist.
    pub fn add_component(&mut self, key: &ComponentKey) -> Result<ComponentId> {
        let next = ComponentId(self.components.len() as u32);
        let id_node = self
            .id_nodes
            .get_mut(&key.id)
            .ok_or(DepsgraphError::UnknownDatablock(key.id))?;
        let id = *id_node
            .components
            .entry((key.node_type, key.name.clone()))
            .or_insert(next);
        if id == next {
            self.components.push(ComponentNode::new(key.clone()));
        }
        Ok(id)
    }

    /// Create-or-find an operation, creating its component when needed.
    pub fn add_operation(&mut self, key: &OperationKey) -> Result<OperationId> {
        let component_id = self.add_component(&key.component)?;
        let next = OperationId(self.operations.len() as u32);
        let id = *self.components[component_id.index()]
            .operations
            .entry((key.opcode, key.name.clone()))
            .or_insert(next);
        if id == next {
            self.operations.push(OperationNode::new(key.clone(), component_id));
        }
        Ok(id)
    }

    pub(crate) fn set_entry_operation(&mut self, component: ComponentId, operation: OperationId) {
        self.components[component.index()].entry = Some(operation);
    }

    pub(crate) fn set_exit_operation(&mut self, component: ComponentId, operation: OperationId) {
        self.components[component.index()].exit = Some(operation);
    }

    /// Look up a component by key.
    pub fn find_component(&self, key: &ComponentKey) -> Option<ComponentId> {
        self.id_nodes
            .get(&key.id)?
            .find_component(key.node_type, &key.name)
    }

    /// Look up an operation by key.
    pub fn find_operation(&self, key: &OperationKey) -> Option<OperationId> {
        let component = self.find_component(&key.component)?;
        self.components[component.index()].find_operation(key.opcode, &key.name)
    }

    /// Resolve a key to the operation a relation should attach to.
    pub(crate) fn resolve(&self, key: &NodeKey, side: Side) -> Option<OperationId> {
        match key {
            NodeKey::Operation(key) => self.find_operation(key),
            NodeKey::Component(key) => {
                let component = &self.components[self.find_component(key)?.index()];
                match side {
                    Side::From => component.exit_operation(),
                    Side::To => component.entry_operation(),
                }
            }
        }
    }

    /// Add a relation between two located operations.
    pub fn add_relation(
        &mut self,
        from: OperationId,
        to: OperationId,
        name: &str,
        flags: RelationFlags,
    ) -> RelationId {
        let index_key = (from, to, name.to_owned());
        if let Some(&existing) = self.relation_index.get(&index_key) {
            let relation = &mut self.relations[existing.index()];
            relation.flags = relation.flags.union(flags);
            return existing;
        }

        let id = RelationId(self.relations.len() as u32);
        self.relations.push(Relation {
            from,
            to,
            name: name.to_owned(),
            flags,
        });
        self.relation_index.insert(index_key, id);
        self.operations[from.index()].outlinks.push(id);
        self.operations[to.index()].inlinks.push(id);
        id
    }

    /// The operation at `id`. Panics on an id from another graph.
    pub fn operation(&self, id: OperationId) -> &OperationNode {
        &self.operations[id.index()]
    }

    /// The component at `id`. Panics on an id from another graph.
    pub fn component(&self, id: ComponentId) -> &ComponentNode {
        &self.components[id.index()]
    }

    /// The relation at `id`. Panics on an id from another graph.
    pub fn relation(&self, id: RelationId) -> &Relation {
        &self.relations[id.index()]
    }

    /// Every operation with its id, in creation order.
    pub fn operations(&self) -> impl Iterator<Item = (OperationId, &OperationNode)> {
        self.operations
            .iter()
            .enumerate()
            .map(|(i, op)| (OperationId(i as u32), op))
    }

    /// Every component with its id, in creation order.
    pub fn components(&self) -> impl Iterator<Item = (ComponentId, &ComponentNode)> {
        self.components
            .iter()
            .enumerate()
            .map(|(i, c)| (ComponentId(i as u32), c))
    }

    /// Every relation, indexed by [`RelationId`].
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Number of operations in the graph.
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Number of relations in the graph.
    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Relations leaving any operation of `from` and entering any operation
    /// of `to`.
    pub fn relations_between(&self, from: &ComponentKey, to: &ComponentKey) -> Vec<&Relation> {
        let (Some(from), Some(to)) = (self.find_component(from), self.find_component(to)) else {
            return Vec::new();
        };
        self.relations
            .iter()
            .filter(|rel| {
                self.operations[rel.from.index()].component == from
                    && self.operations[rel.to.index()].component == to
            })
            .collect()
    }

    /// Accumulated customdata requirements of an object.
    pub fn customdata_mask(&self, id: DatablockId) -> CustomDataMask {
        self.id_nodes
            .get(&id)
            .map(IdNode::customdata_mask)
            .unwrap_or_default()
    }

    /// Special evaluation flags requested on a datablock. Empty if it is not in the graph.
    pub fn eval_flags(&self, id: DatablockId) -> EvalFlags {
        self.id_nodes
            .get(&id)
            .map(IdNode::eval_flags)
            .unwrap_or_default()
    }

    /// Human readable name of an operation for logs.
    pub fn operation_label(&self, id: OperationId) -> String {
        let op = &self.operations[id.index()];
        match self.id_nodes.get(&op.owner()) {
            Some(id_node) => format!("{}{} {}", id_node.id_type.code(), id_node.name, op.key),
            None => op.key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DatablockStore;

    fn graph_with_mesh() -> (Depsgraph, DatablockId) {
        let mut store = DatablockStore::new();
        let mesh = store.add_mesh("Mesh");
        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        graph.add_id_node(mesh, IdType::Mesh, "Mesh");
        (graph, mesh)
    }

    #[test]
    fn component_lookup_is_idempotent() {
        let (mut graph, mesh) = graph_with_mesh();
        let key = ComponentKey::new(mesh, NodeType::Geometry);

        let first = graph.add_component(&key).unwrap();
        let second = graph.add_component(&key).unwrap();
        assert_eq!(first, second);
        assert_eq!(graph.find_component(&key), Some(first));

        let bone = graph
            .add_component(&ComponentKey::named(mesh, NodeType::Bone, "Root"))
            .unwrap();
        assert_ne!(bone, first);
    }

    #[test]
    fn operation_lookup_is_idempotent() {
        let (mut graph, mesh) = graph_with_mesh();
        let key = OperationKey::new(mesh, NodeType::Geometry, OperationCode::GeometryEval);

        let first = graph.add_operation(&key).unwrap();
        let second = graph.add_operation(&key).unwrap();
        assert_eq!(first, second);
        assert_eq!(graph.operation_count(), 1);
        assert_eq!(graph.find_operation(&key), Some(first));
    }

    #[test]
    fn component_requires_id_node() {
        let (mut graph, _) = graph_with_mesh();
        let mut other = DatablockStore::new();
        other.add_mesh("a");
        let stray = other.add_mesh("b");

        let result = graph.add_component(&ComponentKey::new(stray, NodeType::Geometry));
        assert!(matches!(result, Err(DepsgraphError::UnknownDatablock(_))));
    }

    #[test]
    fn duplicate_relations_merge_flags() {
        let (mut graph, mesh) = graph_with_mesh();
        let a = graph
            .add_operation(&OperationKey::new(mesh, NodeType::Geometry, OperationCode::GeometryEvalInit))
            .unwrap();
        let b = graph
            .add_operation(&OperationKey::new(mesh, NodeType::Geometry, OperationCode::GeometryEval))
            .unwrap();

        let first = graph.add_relation(a, b, "Eval", RelationFlags::empty());
        let second = graph.add_relation(a, b, "Eval", RelationFlag::NoFlush.into());
        assert_eq!(first, second);
        assert_eq!(graph.relation_count(), 1);
        assert_eq!(graph.relation(first).flags.flush_policy(), FlushPolicy::Never);

        graph.add_relation(a, b, "Other", RelationFlags::empty());
        assert_eq!(graph.relation_count(), 2);
        assert_eq!(graph.operation(a).outlinks().len(), 2);
    }

    #[test]
    fn component_keys_resolve_to_entry_and_exit() {
        let (mut graph, mesh) = graph_with_mesh();
        let init = graph
            .add_operation(&OperationKey::new(mesh, NodeType::Geometry, OperationCode::GeometryEvalInit))
            .unwrap();
        let done = graph
            .add_operation(&OperationKey::new(mesh, NodeType::Geometry, OperationCode::GeometryEvalDone))
            .unwrap();
        let key: NodeKey = ComponentKey::new(mesh, NodeType::Geometry).into();

        assert_eq!(graph.resolve(&key, Side::To), Some(init));
        assert_eq!(graph.resolve(&key, Side::From), Some(done));
    }

    #[test]
    fn new_graph_needs_relations() {
        let graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        assert!(graph.relations_tag().is_tagged());
        assert!(graph.needs_relations_update(0));
    }
}
