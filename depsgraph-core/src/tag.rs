//! Tag & Propagation
//!
//! Turns "this changed" events into dirty components.
//!
//! A tag marks one component dirty and then walks forward along outgoing
//! relations, breadth first. Each relation's flags decide whether the walk
//! may cross it:
//!
//! - `NoFlush` relations are never crossed, they only order evaluation,
//! - `FlushUserEditOnly` relations are crossed only for
//!   [`UpdateSource::UserEdit`],
//! - everything else is crossed.
//!
//! Reaching any operation dirties its whole component; recalc flags are
//! merged into what the component already carries. A component is entered
//! at most once per walk.
//!
//! The walk does not stop at components that are already dirty with a
//! superset of the flags. Whether a relation may be crossed depends on the
//! source of the walk, not on the recalc bits: a component dirtied by a
//! time step has not yet pushed a later user edit across its
//! `FlushUserEditOnly` relations, so stopping there would leave point
//! caches stale. The per-walk visited set is what bounds the work.
//!
//! While a graph's relations are tagged for rebuild, tags are dropped: the
//! rebuild leaves the whole graph dirty anyway.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, trace};

use crate::graph::{ComponentId, ComponentKey, Depsgraph, FlushPolicy, NodeType, OperationId, Recalc};
use crate::store::DatablockId;

/// Origin of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateSource {
    /// Direct user editing. The only source that invalidates point caches.
    UserEdit,
    /// Frame change.
    Time,
    /// Relations were rebuilt.
    Relations,
    /// Visibility of objects changed.
    Visibility,
}

impl UpdateSource {
    fn crosses(&self, policy: FlushPolicy) -> bool {
        match policy {
            FlushPolicy::Always => true,
            FlushPolicy::Never => false,
            FlushPolicy::UserEditOnly => *self == UpdateSource::UserEdit,
        }
    }
}

/// Dirty one component and everything that depends on it.
///
/// Returns the components reached, in visiting order, starting with the
/// tagged one. Returns nothing when the component does not exist or the
/// relations are awaiting a rebuild.
pub fn tag_component(graph: &mut Depsgraph, key: &ComponentKey, recalc: Recalc, source: UpdateSource) -> Vec<ComponentId> {
    if graph.relations_tag.is_tagged() {
        trace!(component = %key, "relations pending rebuild, tag subsumed");
        return Vec::new();
    }
    let Some(component) = graph.find_component(key) else {
        trace!(component = %key, "tagged component not in graph");
        return Vec::new();
    };
    flush(graph, &[component], recalc, source)
}

/// Dirty the components of a datablock that correspond to `recalc`.
/// [`Recalc::NONE`] means "everything about this datablock changed".
/// [`Recalc::RELATIONS`] tags the relations for rebuild instead.
pub fn id_tag_update(graph: &mut Depsgraph, id: DatablockId, recalc: Recalc, source: UpdateSource) -> Vec<ComponentId> {
    if recalc.contains(Recalc::RELATIONS) {
        debug!(id = %id, "structural change, relations tagged");
        graph.relations_tag.tag();
    }
    if graph.relations_tag.is_tagged() {
        trace!(id = %id, "relations pending rebuild, tag subsumed");
        return Vec::new();
    }
    let Some(id_node) = graph.find_id_node(id) else {
        trace!(id = %id, "tagged datablock not in graph");
        return Vec::new();
    };

    let wanted = component_types(recalc);
    let starts: Vec<ComponentId> = id_node
        .components()
        .filter(|&c| recalc.is_empty() || wanted.contains(&graph.component(c).node_type()))
        .collect();
    if starts.is_empty() {
        trace!(id = %id, ?recalc, "no component matches the tag");
        return Vec::new();
    }
    flush(graph, &starts, recalc, source)
}

/// Component kinds affected by a recalc mask.
fn component_types(recalc: Recalc) -> Vec<NodeType> {
    let mut types = Vec::new();
    let mut add = |flag: Recalc, kinds: &[NodeType]| {
        if recalc.intersects(flag) {
            types.extend_from_slice(kinds);
        }
    };
    add(Recalc::TRANSFORM, &[NodeType::Transform]);
    add(
        Recalc::GEOMETRY,
        &[NodeType::Geometry, NodeType::NtreeOutput, NodeType::Cache, NodeType::EvalPose],
    );
    add(Recalc::ANIMATION, &[NodeType::Animation]);
    add(Recalc::PARAMETERS, &[NodeType::Parameters]);
    add(Recalc::SHADING, &[NodeType::Shading, NodeType::Parameters]);
    add(Recalc::POINT_CACHE, &[NodeType::PointCache]);
    add(Recalc::SEQUENCER, &[NodeType::Sequencer]);
    add(Recalc::BASE_FLAGS, &[NodeType::GenericDatablock]);
    add(Recalc::HIERARCHY, &[NodeType::Transform]);
    types
}

fn flush(graph: &mut Depsgraph, starts: &[ComponentId], recalc: Recalc, source: UpdateSource) -> Vec<ComponentId> {
    let mut visited = HashSet::new();
    let mut reached = Vec::new();
    let mut queue = VecDeque::new();

    for &start in starts {
        if visited.insert(start) {
            let flags = if recalc.is_empty() {
                graph.component(start).node_type().recalc()
            } else {
                recalc
            };
            dirty_component(graph, start, flags, &mut queue);
            reached.push(start);
        }
    }

    while let Some(operation) = queue.pop_front() {
        let targets: Vec<ComponentId> = graph
            .operation(operation)
            .outlinks()
            .iter()
            .map(|&relation| graph.relation(relation))
            .filter(|relation| source.crosses(relation.flags.flush_policy()))
            .map(|relation| graph.operation(relation.to).component())
            .collect();
        for target in targets {
            if !visited.insert(target) {
                continue;
            }
            let flags = graph.component(target).node_type().recalc();
            dirty_component(graph, target, flags, &mut queue);
            reached.push(target);
        }
    }

    debug!(components = reached.len(), ?source, "tag propagated");
    reached
}

/// Merge `recalc` into a component and queue all of its operations.
fn dirty_component(graph: &mut Depsgraph, component: ComponentId, recalc: Recalc, queue: &mut VecDeque<OperationId>) {
    let node = &mut graph.components[component.index()];
    node.recalc |= recalc;
    for operation in node.operations.values().copied() {
        graph.operations[operation.index()].needs_update = true;
        queue.push_back(operation);
    }
}

/// Mark every component and operation dirty. A freshly built graph has
/// never been evaluated.
pub(crate) fn tag_everything(graph: &mut Depsgraph) {
    for component in &mut graph.components {
        component.recalc = Recalc::ALL;
    }
    for operation in &mut graph.operations {
        operation.needs_update = true;
    }
}

/// Return every component and operation to clean.
pub fn clear_tags(graph: &mut Depsgraph) {
    for component in &mut graph.components {
        component.recalc = Recalc::NONE;
    }
    for operation in &mut graph.operations {
        operation.needs_update = false;
    }
}

/// Request a relations rebuild before the next evaluation of `graph`.
pub fn tag_relations_update(graph: &Depsgraph) {
    debug!(scope = ?graph.scope(), "relations tagged for rebuild");
    graph.relations_tag.tag();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::{OperationCode, OperationKey, RelationFlag, RelationFlags};
    use crate::pipeline::{self, EvaluationScope};
    use crate::store::{DatablockStore, Modifier, ModifierKind, NodeTreeType, ObjectType};

    fn built(store: &DatablockStore, roots: Vec<DatablockId>) -> Depsgraph {
        let mut graph = Depsgraph::new(EvaluationScope::Ids(roots), GraphConfig::default());
        pipeline::build(&mut graph, store).unwrap();
        clear_tags(&mut graph);
        graph
    }

    fn dirty(graph: &Depsgraph, id: DatablockId, node_type: NodeType) -> bool {
        graph
            .find_component(&ComponentKey::new(id, node_type))
            .map(|c| !graph.component(c).is_clean())
            .unwrap_or(false)
    }

    #[test]
    fn parent_transform_reaches_child() {
        let mut store = DatablockStore::new();
        let parent = store.add_object("Parent", ObjectType::Empty);
        let child = store.add_object("Child", ObjectType::Mesh);
        store.set_parent(child, Some(parent)).unwrap();
        let mut graph = built(&store, vec![child]);

        let reached = id_tag_update(&mut graph, parent, Recalc::TRANSFORM, UpdateSource::UserEdit);
        assert!(!reached.is_empty());
        assert!(dirty(&graph, child, NodeType::Transform));
        assert!(!dirty(&graph, child, NodeType::Geometry));
        assert!(!dirty(&graph, parent, NodeType::Parameters));

        let transform = graph
            .find_component(&ComponentKey::new(child, NodeType::Transform))
            .unwrap();
        assert!(graph.component(transform).recalc().contains(Recalc::TRANSFORM));
        for operation in graph.component(transform).operations() {
            assert!(graph.operation(operation).needs_update());
        }
    }

    #[test]
    fn recalc_flags_merge() {
        let mut store = DatablockStore::new();
        let cube = store.add_object("Cube", ObjectType::Mesh);
        let mut graph = built(&store, vec![cube]);
        let key = ComponentKey::new(cube, NodeType::Transform);

        tag_component(&mut graph, &key, Recalc::TRANSFORM, UpdateSource::UserEdit);
        tag_component(&mut graph, &key, Recalc::HIERARCHY, UpdateSource::UserEdit);
        let component = graph.find_component(&key).unwrap();
        assert!(graph
            .component(component)
            .recalc()
            .contains(Recalc::TRANSFORM | Recalc::HIERARCHY));
    }

    #[test]
    fn no_flush_edge_blocks_propagation() {
        let mut store = DatablockStore::new();
        let tree = store.add_node_tree("Tree", NodeTreeType::Geometry);
        let cube = store.add_object("Cube", ObjectType::Mesh);
        store
            .add_modifier(cube, Modifier::new("Nodes", ModifierKind::Nodes { node_tree: tree }))
            .unwrap();
        let mut graph = built(&store, vec![cube]);

        let preprocess = ComponentKey::new(tree, NodeType::NtreeGeometryPreprocess);
        let reached = tag_component(&mut graph, &preprocess, Recalc::GEOMETRY, UpdateSource::UserEdit);
        assert_eq!(reached.len(), 1);
        assert!(!dirty(&graph, cube, NodeType::Geometry));

        tag_component(
            &mut graph,
            &ComponentKey::new(tree, NodeType::NtreeOutput),
            Recalc::GEOMETRY,
            UpdateSource::UserEdit,
        );
        assert!(dirty(&graph, cube, NodeType::Geometry));
    }

    #[test]
    fn point_cache_only_invalidated_by_user_edits() {
        let mut store = DatablockStore::new();
        let cloth = store.add_object("Cloth", ObjectType::Mesh);
        store
            .add_modifier(cloth, Modifier::new("Cloth", ModifierKind::Cloth { colliders: Vec::new() }))
            .unwrap();
        let mut graph = built(&store, vec![cloth]);

        id_tag_update(&mut graph, cloth, Recalc::TRANSFORM, UpdateSource::Time);
        assert!(dirty(&graph, cloth, NodeType::Transform));
        assert!(!dirty(&graph, cloth, NodeType::PointCache));

        clear_tags(&mut graph);
        id_tag_update(&mut graph, cloth, Recalc::TRANSFORM, UpdateSource::UserEdit);
        assert!(dirty(&graph, cloth, NodeType::PointCache));
        assert!(dirty(&graph, cloth, NodeType::Geometry));
    }

    #[test]
    fn user_edit_crosses_components_already_dirty_from_time() {
        let mut store = DatablockStore::new();
        let cloth = store.add_object("Cloth", ObjectType::Mesh);
        store
            .add_modifier(cloth, Modifier::new("Cloth", ModifierKind::Cloth { colliders: Vec::new() }))
            .unwrap();
        let mut graph = built(&store, vec![cloth]);

        id_tag_update(&mut graph, cloth, Recalc::TRANSFORM, UpdateSource::Time);
        assert!(!dirty(&graph, cloth, NodeType::PointCache));

        // Same flags on an already dirty transform, now from the user.
        id_tag_update(&mut graph, cloth, Recalc::TRANSFORM, UpdateSource::UserEdit);
        assert!(dirty(&graph, cloth, NodeType::PointCache));
    }

    #[test]
    fn tags_subsumed_by_pending_rebuild() {
        let mut store = DatablockStore::new();
        let cube = store.add_object("Cube", ObjectType::Mesh);
        let mut graph = built(&store, vec![cube]);

        tag_relations_update(&graph);
        let reached = id_tag_update(&mut graph, cube, Recalc::GEOMETRY, UpdateSource::UserEdit);
        assert!(reached.is_empty());

        pipeline::relations_update(&mut graph, &store).unwrap();
        assert!(dirty(&graph, cube, NodeType::Geometry));
        assert!(dirty(&graph, cube, NodeType::Transform));
    }

    #[test]
    fn relations_recalc_requests_rebuild() {
        let mut store = DatablockStore::new();
        let cube = store.add_object("Cube", ObjectType::Mesh);
        let mut graph = built(&store, vec![cube]);

        let reached = id_tag_update(&mut graph, cube, Recalc::RELATIONS | Recalc::TRANSFORM, UpdateSource::UserEdit);
        assert!(reached.is_empty());
        assert!(graph.relations_tag().is_tagged());
        assert!(pipeline::relations_update(&mut graph, &store).unwrap());
    }

    #[test]
    fn empty_recalc_tags_whole_datablock() {
        let mut store = DatablockStore::new();
        let cube = store.add_object("Cube", ObjectType::Mesh);
        let mut graph = built(&store, vec![cube]);

        id_tag_update(&mut graph, cube, Recalc::NONE, UpdateSource::UserEdit);
        let id_node = graph.find_id_node(cube).unwrap();
        assert!(id_node.components().all(|c| !graph.component(c).is_clean()));
    }

    #[test]
    fn gated_edge_added_directly() {
        let mut store = DatablockStore::new();
        let cube = store.add_object("Cube", ObjectType::Mesh);
        let mut graph = built(&store, vec![cube]);
        let parameters = graph
            .find_operation(&OperationKey::new(cube, NodeType::Parameters, OperationCode::ParametersEval))
            .unwrap();
        let shading = graph
            .find_operation(&OperationKey::new(cube, NodeType::Shading, OperationCode::ShadingEval))
            .unwrap();
        graph.add_relation(
            parameters,
            shading,
            "Test",
            RelationFlags::empty().with(RelationFlag::FlushUserEditOnly),
        );

        let key = ComponentKey::new(cube, NodeType::Parameters);
        tag_component(&mut graph, &key, Recalc::PARAMETERS, UpdateSource::Visibility);
        assert!(!dirty(&graph, cube, NodeType::Shading));
        tag_component(&mut graph, &key, Recalc::PARAMETERS, UpdateSource::UserEdit);
        assert!(dirty(&graph, cube, NodeType::Shading));
    }
}
