//! Graph Nodes
//!
//! This module defines the three node layers of a dependency graph:
//! one [`IdNode`] per datablock, owning [`ComponentNode`]s, owning
//! [`OperationNode`]s. Components and operations live in flat arenas on the
//! graph and are addressed by index.

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::store::{DatablockId, IdType};

use super::key::{ComponentKey, NodeType, OperationCode, OperationKey};
use super::recalc::{CustomDataMask, EvalFlags, Recalc};
use super::relation::RelationId;

/// Result stored in an operation's output slot after evaluation.
pub type OperationOutput = Arc<dyn Any + Send + Sync>;

/// Index of an operation node in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub(crate) u32);

impl OperationId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Index of a component node in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u32);

impl ComponentId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// The smallest schedulable unit of work.
#[derive(Debug)]
pub struct OperationNode {
    pub(crate) key: OperationKey,
    pub(crate) component: ComponentId,
    pub(crate) inlinks: SmallVec<[RelationId; 4]>,
    pub(crate) outlinks: SmallVec<[RelationId; 4]>,
    pub(crate) needs_update: bool,
    pub(crate) output: Option<OperationOutput>,
}

impl OperationNode {
    pub(crate) fn new(key: OperationKey, component: ComponentId) -> Self {
        Self {
            key,
            component,
            inlinks: SmallVec::new(),
            outlinks: SmallVec::new(),
            // A new operation has never been evaluated.
            needs_update: true,
            output: None,
        }
    }

    /// Key the operation was created with.
    pub fn key(&self) -> &OperationKey {
        &self.key
    }

    pub fn opcode(&self) -> OperationCode {
        self.key.opcode
    }

    /// Datablock owning this operation.
    pub fn owner(&self) -> DatablockId {
        self.key.component.id
    }

    /// Component owning this operation.
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// Relations this operation depends on.
    pub fn inlinks(&self) -> &[RelationId] {
        &self.inlinks
    }

    /// Relations depending on this operation.
    pub fn outlinks(&self) -> &[RelationId] {
        &self.outlinks
    }

    /// Whether the operation must run in the next evaluation pass.
    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    /// Output of the last successful evaluation, if any.
    pub fn output(&self) -> Option<&OperationOutput> {
        self.output.as_ref()
    }
}

/// A semantic group of operations of one datablock.
#[derive(Debug)]
pub struct ComponentNode {
    pub(crate) key: ComponentKey,
    pub(crate) operations: IndexMap<(OperationCode, String), OperationId>,
    pub(crate) entry: Option<OperationId>,
    pub(crate) exit: Option<OperationId>,
    pub(crate) recalc: Recalc,
}

impl ComponentNode {
    pub(crate) fn new(key: ComponentKey) -> Self {
        Self {
            key,
            operations: IndexMap::new(),
            entry: None,
            exit: None,
            recalc: Recalc::NONE,
        }
    }

    pub fn key(&self) -> &ComponentKey {
        &self.key
    }

    pub fn node_type(&self) -> NodeType {
        self.key.node_type
    }

    /// Operations of the component in creation order.
    pub fn operations(&self) -> impl Iterator<Item = OperationId> + '_ {
        self.operations.values().copied()
    }

    /// Look up an operation of this component by opcode and name.
    pub fn find_operation(&self, opcode: OperationCode, name: &str) -> Option<OperationId> {
        self.operations.get(&(opcode, name.to_owned())).copied()
    }

    /// Operation other components' relations point into. Defaults to the
    /// first operation created.
    pub fn entry_operation(&self) -> Option<OperationId> {
        self.entry.or_else(|| self.operations.first().map(|(_, id)| *id))
    }

    /// Operation relations leave from. Defaults to the last operation created.
    pub fn exit_operation(&self) -> Option<OperationId> {
        self.exit.or_else(|| self.operations.last().map(|(_, id)| *id))
    }

    /// Accumulated recalc flags. Empty means clean.
    pub fn recalc(&self) -> Recalc {
        self.recalc
    }

    /// No recalc flags are set.
    pub fn is_clean(&self) -> bool {
        self.recalc.is_empty()
    }
}

/// Per-datablock node.
#[derive(Debug)]
pub struct IdNode {
    pub(crate) id: DatablockId,
    pub(crate) id_type: IdType,
    pub(crate) name: String,
    pub(crate) components: IndexMap<(NodeType, String), ComponentId>,
    pub(crate) customdata_mask: CustomDataMask,
    pub(crate) eval_flags: EvalFlags,
}

impl IdNode {
    pub(crate) fn new(id: DatablockId, id_type: IdType, name: impl Into<String>) -> Self {
        Self {
            id,
            id_type,
            name: name.into(),
            components: IndexMap::new(),
            customdata_mask: CustomDataMask::default(),
            eval_flags: EvalFlags::default(),
        }
    }

    pub fn id(&self) -> DatablockId {
        self.id
    }

    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a component of this datablock by type and name.
    pub fn find_component(&self, node_type: NodeType, name: &str) -> Option<ComponentId> {
        self.components.get(&(node_type, name.to_owned())).copied()
    }

    /// Components of the datablock in creation order.
    pub fn components(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components.values().copied()
    }

    /// Whether any component of type `node_type` exists, whatever its name.
    pub fn has_component(&self, node_type: NodeType) -> bool {
        self.components.keys().any(|(ty, _)| *ty == node_type)
    }

    /// Customdata layers requested on this datablock.
    pub fn customdata_mask(&self) -> CustomDataMask {
        self.customdata_mask
    }

    /// Special evaluation flags requested on this datablock.
    pub fn eval_flags(&self) -> EvalFlags {
        self.eval_flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ComponentKey;

    fn key() -> ComponentKey {
        let mut store = crate::store::DatablockStore::new();
        let id = store.add_mesh("Mesh");
        ComponentKey::new(id, NodeType::Geometry)
    }

    #[test]
    fn new_operation_needs_update() {
        let component = key();
        let op = OperationNode::new(
            OperationKey::in_component(component, OperationCode::GeometryEval),
            ComponentId(0),
        );
        assert!(op.needs_update());
        assert!(op.output().is_none());
        assert!(op.inlinks().is_empty());
    }

    #[test]
    fn entry_and_exit_default_to_first_and_last() {
        let mut component = ComponentNode::new(key());
        assert_eq!(component.entry_operation(), None);

        component
            .operations
            .insert((OperationCode::GeometryEvalInit, String::new()), OperationId(3));
        component
            .operations
            .insert((OperationCode::GeometryEvalDone, String::new()), OperationId(7));

        assert_eq!(component.entry_operation(), Some(OperationId(3)));
        assert_eq!(component.exit_operation(), Some(OperationId(7)));

        component.exit = Some(OperationId(5));
        assert_eq!(component.exit_operation(), Some(OperationId(5)));
    }

    #[test]
    fn component_starts_clean() {
        let component = ComponentNode::new(key());
        assert!(component.is_clean());
        assert_eq!(component.recalc(), Recalc::NONE);
    }
}
