//! Node Builder
//!
//! First pass of a rebuild. Starting from a scope's roots it pulls every
//! datablock reachable through store references into the graph and creates
//! its components and operations. The traversal is a worklist with a
//! visited set, so reference cycles (an object instancing a collection that
//! contains it, mutual node group references) terminate.

use std::collections::{HashSet, VecDeque};

use tracing::{trace, warn};

use crate::error::Result;
use crate::graph::{ComponentKey, Depsgraph, NodeType, OperationCode, OperationKey};
use crate::store::{Collection, DatablockData, DatablockId, DatablockStore, NodeTreeReference, Object, ObjectType, Scene};

use super::RelationProvider;

pub struct NodeBuilder<'a> {
    graph: &'a mut Depsgraph,
    store: &'a DatablockStore,
    /// Collections and objects not entered through collection membership.
    skipped: HashSet<DatablockId>,
    visited: HashSet<DatablockId>,
    queue: VecDeque<DatablockId>,
}

impl<'a> NodeBuilder<'a> {
    pub fn new(graph: &'a mut Depsgraph, store: &'a DatablockStore) -> Self {
        Self {
            graph,
            store,
            skipped: HashSet::new(),
            visited: HashSet::new(),
            queue: VecDeque::new(),
        }
    }

    /// Do not pull these datablocks in as members of a collection. They are
    /// still built when something else references them directly (a visible
    /// child of a hidden parent needs the parent's transform).
    pub fn skip_members(mut self, ids: impl IntoIterator<Item = DatablockId>) -> Self {
        self.skipped.extend(ids);
        self
    }

    /// Build nodes for every root and everything reachable from them.
    pub fn build(&mut self, roots: impl IntoIterator<Item = DatablockId>) -> Result<()> {
        for root in roots {
            self.pull(root);
        }
        while let Some(id) = self.queue.pop_front() {
            self.build_id(id)?;
        }
        Ok(())
    }

    fn pull(&mut self, id: DatablockId) {
        if !self.store.contains(id) {
            warn!(id = %id, "reference to missing datablock skipped");
            return;
        }
        if self.visited.insert(id) {
            self.queue.push_back(id);
        }
    }

    fn pull_member(&mut self, id: DatablockId) {
        if self.skipped.contains(&id) {
            trace!(id = %id, "collection member left out of scope");
            return;
        }
        self.pull(id);
    }

    fn operation(&mut self, id: DatablockId, node_type: NodeType, opcode: OperationCode) -> Result<()> {
        self.graph.add_operation(&OperationKey::new(id, node_type, opcode))?;
        Ok(())
    }

    fn build_id(&mut self, id: DatablockId) -> Result<()> {
        let store = self.store;
        let Some(block) = store.get(id) else {
            return Ok(());
        };
        self.graph.add_id_node(id, block.id_type(), &block.name);
        self.operation(id, NodeType::GenericDatablock, OperationCode::GenericDatablockUpdate)?;

        match &block.data {
            DatablockData::Object(object) => self.build_object(id, object)?,
            DatablockData::Mesh(_) => self.operation(id, NodeType::Geometry, OperationCode::GeometryEval)?,
            DatablockData::Camera(_) | DatablockData::Armature(_) => {
                self.operation(id, NodeType::Parameters, OperationCode::ParametersEval)?
            }
            DatablockData::Collection(collection) => self.build_collection(id, collection)?,
            DatablockData::Scene(scene) => self.build_scene(id, scene)?,
            DatablockData::NodeTree(tree) => {
                self.operation(id, NodeType::Parameters, OperationCode::ParametersEval)?;
                self.operation(id, NodeType::NtreeOutput, OperationCode::NtreeOutput)?;
                self.operation(id, NodeType::NtreeGeometryPreprocess, OperationCode::NtreeGeometryPreprocess)?;
                for reference in &tree.references {
                    match *reference {
                        NodeTreeReference::Object(target)
                        | NodeTreeReference::Collection(target)
                        | NodeTreeReference::Group(target)
                        | NodeTreeReference::Scene(target) => self.pull(target),
                    }
                }
            }
            DatablockData::CacheFile(_) => {
                self.operation(id, NodeType::Parameters, OperationCode::ParametersEval)?;
                self.operation(id, NodeType::Cache, OperationCode::FileCacheUpdate)?;
            }
        }
        Ok(())
    }

    fn build_object(&mut self, id: DatablockId, object: &'a Object) -> Result<()> {
        self.operation(id, NodeType::Parameters, OperationCode::ParametersEval)?;
        if object.animated {
            self.operation(id, NodeType::Animation, OperationCode::AnimationEval)?;
        }

        let transform = ComponentKey::new(id, NodeType::Transform);
        let mut first = None;
        let mut last = None;
        for opcode in [
            OperationCode::TransformLocal,
            OperationCode::TransformParent,
            OperationCode::TransformConstraints,
            OperationCode::TransformFinal,
        ] {
            let op = self
                .graph
                .add_operation(&OperationKey::in_component(transform.clone(), opcode))?;
            first.get_or_insert(op);
            last = Some(op);
        }
        let component = self.graph.add_component(&transform)?;
        if let (Some(first), Some(last)) = (first, last) {
            self.graph.set_entry_operation(component, first);
            self.graph.set_exit_operation(component, last);
        }

        if object.object_type.has_geometry() {
            self.operation(id, NodeType::Geometry, OperationCode::GeometryEvalInit)?;
            for modifier in &object.modifiers {
                self.graph.add_operation(&OperationKey::named(
                    id,
                    NodeType::Geometry,
                    OperationCode::Modifier,
                    modifier.name.as_str(),
                ))?;
            }
            self.operation(id, NodeType::Geometry, OperationCode::GeometryEval)?;
            self.operation(id, NodeType::Geometry, OperationCode::GeometryEvalDone)?;
            self.operation(id, NodeType::Shading, OperationCode::ShadingEval)?;
            if object.has_point_cache() {
                self.operation(id, NodeType::PointCache, OperationCode::PointCacheReset)?;
            }
        }

        if let Some(collection) = object.instances_collection() {
            self.operation(id, NodeType::Instancing, OperationCode::Instancer)?;
            self.pull(collection);
        }

        if object.object_type == ObjectType::Armature {
            self.build_pose(id, object)?;
        }

        if let Some(data) = object.data {
            self.pull(data);
        }
        if let Some(parent) = object.parent {
            self.pull(parent);
        }
        for modifier in &object.modifiers {
            for target in modifier.kind.referenced_ids() {
                self.pull(target);
            }
        }
        for constraint in &object.constraints {
            for target in constraint.kind.referenced_ids() {
                self.pull(target);
            }
        }
        Ok(())
    }

    fn build_pose(&mut self, id: DatablockId, object: &'a Object) -> Result<()> {
        self.operation(id, NodeType::EvalPose, OperationCode::PoseInit)?;
        self.operation(id, NodeType::EvalPose, OperationCode::PoseDone)?;

        let store = self.store;
        let Some(armature) = object.data.and_then(|data| store.armature(data)) else {
            warn!(id = %id, "armature object without armature data, no bones built");
            return Ok(());
        };
        for bone in &armature.bones {
            let component = ComponentKey::named(id, NodeType::Bone, bone.name.as_str());
            self.graph
                .add_operation(&OperationKey::in_component(component.clone(), OperationCode::BoneLocal))?;
            self.graph
                .add_operation(&OperationKey::in_component(component, OperationCode::BoneDone))?;
        }
        Ok(())
    }

    fn build_collection(&mut self, id: DatablockId, collection: &'a Collection) -> Result<()> {
        self.operation(id, NodeType::Geometry, OperationCode::GeometryEvalDone)?;
        for &object in &collection.objects {
            self.pull_member(object);
        }
        for &child in &collection.children {
            self.pull_member(child);
        }
        Ok(())
    }

    fn build_scene(&mut self, id: DatablockId, scene: &'a Scene) -> Result<()> {
        self.operation(id, NodeType::Parameters, OperationCode::ParametersEval)?;
        if scene.animated {
            self.operation(id, NodeType::Animation, OperationCode::AnimationEval)?;
        }
        if scene.has_sequencer {
            self.operation(id, NodeType::Sequencer, OperationCode::SequencesEval)?;
        }

        if let Some(camera) = scene.camera {
            self.pull(camera);
        }
        for marker in &scene.markers {
            if let Some(camera) = marker.camera {
                self.pull(camera);
            }
        }
        if let Some(compositor) = scene.compositor {
            self.pull(compositor);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::pipeline::EvaluationScope;
    use crate::store::{Modifier, ModifierKind, NodeTreeType};

    fn build(store: &DatablockStore, roots: &[DatablockId]) -> Depsgraph {
        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        NodeBuilder::new(&mut graph, store)
            .build(roots.iter().copied())
            .unwrap();
        graph
    }

    #[test]
    fn pulls_referenced_datablocks() {
        let mut store = DatablockStore::new();
        let parent = store.add_object("Parent", ObjectType::Empty);
        let child = store.add_object("Child", ObjectType::Mesh);
        let mesh = store.add_mesh("ChildMesh");
        store.set_parent(child, Some(parent)).unwrap();
        store.set_object_data(child, mesh).unwrap();

        let graph = build(&store, &[child]);
        assert!(graph.find_id_node(parent).is_some());
        assert!(graph.find_id_node(mesh).is_some());
        assert_eq!(graph.id_nodes().count(), 3);
    }

    #[test]
    fn object_components() {
        let mut store = DatablockStore::new();
        let cube = store.add_object("Cube", ObjectType::Mesh);
        store
            .add_modifier(cube, Modifier::new("Cloth", ModifierKind::Cloth { colliders: Vec::new() }))
            .unwrap();
        let empty = store.add_object("Empty", ObjectType::Empty);

        let graph = build(&store, &[cube, empty]);
        let cube_node = graph.find_id_node(cube).unwrap();
        for node_type in [
            NodeType::Parameters,
            NodeType::Transform,
            NodeType::Geometry,
            NodeType::Shading,
            NodeType::PointCache,
            NodeType::GenericDatablock,
        ] {
            assert!(cube_node.has_component(node_type), "{node_type:?}");
        }
        assert!(!cube_node.has_component(NodeType::Animation));

        let empty_node = graph.find_id_node(empty).unwrap();
        assert!(empty_node.has_component(NodeType::Transform));
        assert!(!empty_node.has_component(NodeType::Geometry));

        let modifier = OperationKey::named(cube, NodeType::Geometry, OperationCode::Modifier, "Cloth");
        assert!(graph.find_operation(&modifier).is_some());
    }

    #[test]
    fn transform_entry_and_exit() {
        let mut store = DatablockStore::new();
        let cube = store.add_object("Cube", ObjectType::Mesh);
        let graph = build(&store, &[cube]);

        let component = graph
            .find_component(&ComponentKey::new(cube, NodeType::Transform))
            .unwrap();
        let local = graph
            .find_operation(&OperationKey::new(cube, NodeType::Transform, OperationCode::TransformLocal))
            .unwrap();
        let last = graph
            .find_operation(&OperationKey::new(cube, NodeType::Transform, OperationCode::TransformFinal))
            .unwrap();
        assert_eq!(graph.component(component).entry_operation(), Some(local));
        assert_eq!(graph.component(component).exit_operation(), Some(last));
    }

    #[test]
    fn skipped_members_still_built_when_referenced() {
        let mut store = DatablockStore::new();
        let collection = store.add_collection("Coll");
        let hidden = store.add_object("Hidden", ObjectType::Empty);
        let visible = store.add_object("Visible", ObjectType::Mesh);
        store.link_object(collection, hidden).unwrap();
        store.link_object(collection, visible).unwrap();

        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        NodeBuilder::new(&mut graph, &store)
            .skip_members([hidden])
            .build([collection])
            .unwrap();
        assert!(graph.find_id_node(hidden).is_none());
        assert!(graph.find_id_node(visible).is_some());

        store.set_parent(visible, Some(hidden)).unwrap();
        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        NodeBuilder::new(&mut graph, &store)
            .skip_members([hidden])
            .build([collection])
            .unwrap();
        assert!(graph.find_id_node(hidden).is_some());
    }

    #[test]
    fn self_referencing_node_groups_terminate() {
        let mut store = DatablockStore::new();
        let a = store.add_node_tree("A", NodeTreeType::Geometry);
        let b = store.add_node_tree("B", NodeTreeType::Geometry);
        store.add_node_tree_reference(a, NodeTreeReference::Group(b)).unwrap();
        store.add_node_tree_reference(b, NodeTreeReference::Group(a)).unwrap();

        let graph = build(&store, &[a]);
        assert_eq!(graph.id_nodes().count(), 2);
    }

    #[test]
    fn armature_bones() {
        let mut store = DatablockStore::new();
        let rig = store.add_object("Rig", ObjectType::Armature);
        let armature = store.add_armature("Armature", &[("Root", None), ("Arm", Some("Root"))]);
        store.set_object_data(rig, armature).unwrap();

        let graph = build(&store, &[rig]);
        for bone in ["Root", "Arm"] {
            let key = ComponentKey::named(rig, NodeType::Bone, bone);
            assert!(graph.find_component(&key).is_some(), "{bone}");
        }
        assert!(graph
            .find_id_node(armature)
            .unwrap()
            .has_component(NodeType::Parameters));
    }
}
