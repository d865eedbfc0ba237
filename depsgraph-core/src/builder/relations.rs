//! Relation Builder
//!
//! Second pass of a rebuild. Runs once per datablock present in the graph
//! and declares the relations between its operations and those of the
//! datablocks it depends on. All relations funnel through
//! [`RelationBuilder::add_relation`], which resolves keys and applies the
//! missing-target policy.

use tracing::{trace, warn};

use crate::config::MissingTargetPolicy;
use crate::error::{DepsgraphError, Result};
use crate::graph::{
    ComponentKey, CustomDataMask, Depsgraph, EvalFlag, NodeKey, NodeType, ObjectComponent, OperationCode,
    OperationId, OperationKey, RelationFlag, RelationFlags, RelationId, SceneComponent, Side,
};
use crate::store::{
    Collection, DatablockData, DatablockId, DatablockStore, IdType, NodeTree, NodeTreeReference, Object, ObjectType,
    Scene,
};

use super::handle::DepsNodeHandle;
use super::RelationProvider;

pub struct RelationBuilder<'a> {
    pub(crate) graph: &'a mut Depsgraph,
    pub(crate) store: &'a DatablockStore,
    policy: MissingTargetPolicy,
    log_relations: bool,
    error: Option<DepsgraphError>,
}

impl<'a> RelationBuilder<'a> {
    pub fn new(graph: &'a mut Depsgraph, store: &'a DatablockStore) -> Self {
        let policy = graph.config.missing_target;
        let log_relations = graph.config.log_relations;
        Self {
            graph,
            store,
            policy,
            log_relations,
            error: None,
        }
    }

    pub fn graph(&self) -> &Depsgraph {
        self.graph
    }

    /// Add a relation between two keys. Returns `None` when either end
    /// cannot be located; the relation is then dropped according to the
    /// missing-target policy.
    pub fn add_relation(
        &mut self,
        from: impl Into<NodeKey>,
        to: impl Into<NodeKey>,
        description: &str,
        flags: RelationFlags,
    ) -> Option<RelationId> {
        let from = from.into();
        let to = to.into();
        let Some(from_op) = self.graph.resolve(&from, Side::From) else {
            self.missing_target(&from, description);
            return None;
        };
        let Some(to_op) = self.graph.resolve(&to, Side::To) else {
            self.missing_target(&to, description);
            return None;
        };
        Some(self.add_operation_relation(from_op, to_op, description, flags))
    }

    /// Add a relation whose target is the operation behind a handle.
    pub fn add_node_handle_relation(
        &mut self,
        from: impl Into<NodeKey>,
        operation: OperationId,
        description: &str,
        flags: RelationFlags,
    ) -> Option<RelationId> {
        let from = from.into();
        let Some(from_op) = self.graph.resolve(&from, Side::From) else {
            self.missing_target(&from, description);
            return None;
        };
        Some(self.add_operation_relation(from_op, operation, description, flags))
    }

    fn add_operation_relation(
        &mut self,
        from: OperationId,
        to: OperationId,
        description: &str,
        flags: RelationFlags,
    ) -> RelationId {
        if self.log_relations {
            trace!(
                from = %self.graph.operation_label(from),
                to = %self.graph.operation_label(to),
                ?flags,
                "{description}"
            );
        }
        self.graph.add_relation(from, to, description, flags)
    }

    pub fn add_depends_on_transform_relation(
        &mut self,
        owner: DatablockId,
        operation: OperationId,
        description: &str,
    ) -> Option<RelationId> {
        let transform = OperationKey::new(owner, NodeType::Transform, OperationCode::TransformFinal);
        self.add_node_handle_relation(transform, operation, description, RelationFlags::empty())
    }

    pub fn add_special_eval_flag(&mut self, id: DatablockId, flag: EvalFlag) {
        match self.graph.find_id_node_mut(id) {
            Some(id_node) => id_node.eval_flags.insert(flag),
            None => {
                let key = NodeKey::Component(ComponentKey::new(id, NodeType::GenericDatablock));
                self.missing_target(&key, "Special evaluation flag");
            }
        }
    }

    /// Merge customdata requirements into a mesh object's node. Other
    /// object types carry no customdata and are ignored.
    pub fn add_customdata_mask(&mut self, object: DatablockId, masks: CustomDataMask) {
        if masks.is_empty() {
            return;
        }
        match self.store.object(object) {
            Some(data) if data.object_type == ObjectType::Mesh => {}
            Some(_) => return,
            None => {
                self.malformed_reference(object, "object");
                return;
            }
        }
        match self.graph.find_id_node_mut(object) {
            Some(id_node) => id_node.customdata_mask |= masks,
            None => {
                let key = NodeKey::Component(ComponentKey::new(object, NodeType::Geometry));
                self.missing_target(&key, "Customdata mask");
            }
        }
    }

    /// Handle for an existing operation, used to let other code declare the
    /// operation's dependencies.
    pub fn node_handle<'b>(&'b mut self, operation: &OperationKey, default_name: &str) -> Option<DepsNodeHandle<'b, 'a>> {
        let Some(operation) = self.graph.find_operation(operation) else {
            self.missing_target(&NodeKey::Operation(operation.clone()), default_name);
            return None;
        };
        Some(DepsNodeHandle {
            builder: self,
            operation,
            default_name: default_name.to_owned(),
        })
    }

    pub(crate) fn malformed_reference(&mut self, id: DatablockId, expected: &'static str) {
        warn!(
            id = %id,
            name = %self.store.display_name(id),
            expected,
            "malformed datablock reference skipped"
        );
    }

    fn missing_target(&mut self, key: &NodeKey, description: &str) {
        warn!(
            target = %key,
            name = %self.store.display_name(key.component().id),
            relation = description,
            "failed to add relation, target not found"
        );
        if self.policy == MissingTargetPolicy::Fail && self.error.is_none() {
            self.error = Some(DepsgraphError::MissingTarget {
                target: key.to_string(),
                description: description.to_owned(),
            });
        }
    }

    /// Build relations for every datablock in the graph.
    pub fn build(&mut self) {
        let ids: Vec<DatablockId> = self.graph.id_nodes.keys().copied().collect();
        for id in ids {
            self.build_id(id);
        }
    }

    /// Finish the pass. Fails with the first missing target when the policy
    /// is [`MissingTargetPolicy::Fail`].
    pub fn finish(self) -> Result<()> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn build_id(&mut self, id: DatablockId) {
        let store = self.store;
        let Some(block) = store.get(id) else {
            return;
        };
        self.build_generic(id);
        match &block.data {
            DatablockData::Object(object) => self.build_object(id, object),
            DatablockData::Collection(collection) => self.build_collection(id, collection),
            DatablockData::Scene(scene) => self.build_scene(id, scene),
            DatablockData::NodeTree(tree) => self.build_node_tree(id, tree),
            DatablockData::CacheFile(_) => {
                self.add_relation(
                    ComponentKey::new(id, NodeType::Parameters),
                    ComponentKey::new(id, NodeType::Cache),
                    "Cache File Parameters",
                    RelationFlags::empty(),
                );
            }
            DatablockData::Mesh(_) | DatablockData::Camera(_) | DatablockData::Armature(_) => {}
        }
    }

    fn build_generic(&mut self, id: DatablockId) {
        let has_parameters = self
            .graph
            .find_id_node(id)
            .map(|node| node.has_component(NodeType::Parameters))
            .unwrap_or(false);
        if has_parameters {
            self.add_relation(
                ComponentKey::new(id, NodeType::Parameters),
                OperationKey::new(id, NodeType::GenericDatablock, OperationCode::GenericDatablockUpdate),
                "Parameters -> Generic Update",
                RelationFlags::empty(),
            );
        }
    }

    fn build_object(&mut self, id: DatablockId, object: &'a Object) {
        let op = |opcode| OperationKey::new(id, NodeType::Transform, opcode);
        let none = RelationFlags::empty();

        // Transform stack.
        self.add_relation(
            ComponentKey::new(id, NodeType::Parameters),
            op(OperationCode::TransformLocal),
            "Parameters -> Transform",
            none,
        );
        self.add_relation(op(OperationCode::TransformLocal), op(OperationCode::TransformParent), "Transform Parent", none);
        self.add_relation(
            op(OperationCode::TransformParent),
            op(OperationCode::TransformConstraints),
            "Transform Constraints",
            none,
        );
        self.add_relation(
            op(OperationCode::TransformConstraints),
            op(OperationCode::TransformFinal),
            "Transform Final",
            none,
        );

        if object.animated {
            self.add_relation(
                ComponentKey::new(id, NodeType::Animation),
                op(OperationCode::TransformLocal),
                "Animation -> Transform",
                none,
            );
            self.add_relation(
                ComponentKey::new(id, NodeType::Animation),
                ComponentKey::new(id, NodeType::Parameters),
                "Animation -> Parameters",
                none,
            );
        }

        if let Some(parent) = object.parent {
            match &object.parent_bone {
                Some(bone) => self.add_relation(
                    ComponentKey::named(parent, NodeType::Bone, bone.as_str()),
                    op(OperationCode::TransformParent),
                    "Bone Parent",
                    none,
                ),
                None => self.add_relation(
                    OperationKey::new(parent, NodeType::Transform, OperationCode::TransformFinal),
                    op(OperationCode::TransformParent),
                    "Object Parent",
                    none,
                ),
            };
        }

        for constraint in &object.constraints {
            if let Some(mut handle) = self.node_handle(&op(OperationCode::TransformConstraints), &constraint.name) {
                constraint.kind.update_depsgraph(&mut handle);
            }
        }

        if object.object_type.has_geometry() {
            self.build_object_geometry(id, object);
        }

        if let Some(data) = object.data {
            self.build_object_data(id, object, data);
        }

        if let Some(collection) = object.instances_collection() {
            let instancer = OperationKey::new(id, NodeType::Instancing, OperationCode::Instancer);
            self.add_relation(
                OperationKey::new(collection, NodeType::Geometry, OperationCode::GeometryEvalDone),
                instancer.clone(),
                "Instance Collection",
                none,
            );
            self.add_relation(op(OperationCode::TransformFinal), instancer, "Instancer Transform", none);
        }
    }

    fn build_object_geometry(&mut self, id: DatablockId, object: &'a Object) {
        let geom = |opcode| OperationKey::new(id, NodeType::Geometry, opcode);
        let none = RelationFlags::empty();

        let mut previous = geom(OperationCode::GeometryEvalInit);
        for modifier in &object.modifiers {
            let key = OperationKey::named(id, NodeType::Geometry, OperationCode::Modifier, modifier.name.as_str());
            self.add_relation(previous, key.clone(), "Modifier", none);
            if let Some(mut handle) = self.node_handle(&key, &modifier.name) {
                modifier.kind.update_depsgraph(&mut handle);
            }
            previous = key;
        }
        self.add_relation(previous, geom(OperationCode::GeometryEval), "Geometry Eval", none);
        self.add_relation(
            geom(OperationCode::GeometryEval),
            geom(OperationCode::GeometryEvalDone),
            "Geometry Eval Done",
            none,
        );

        self.add_relation(
            ComponentKey::new(id, NodeType::Geometry),
            ComponentKey::new(id, NodeType::Shading),
            "Geometry -> Shading",
            none,
        );

        if object.has_point_cache() {
            let point_cache = ComponentKey::new(id, NodeType::PointCache);
            self.add_relation(
                OperationKey::new(id, NodeType::Transform, OperationCode::TransformFinal),
                point_cache.clone(),
                "Transform -> Point Cache",
                RelationFlag::FlushUserEditOnly.into(),
            );
            self.add_relation(point_cache, geom(OperationCode::GeometryEvalInit), "Point Cache -> Geometry", none);
        }
    }

    fn build_object_data(&mut self, id: DatablockId, object: &'a Object, data: DatablockId) {
        let none = RelationFlags::empty();
        match (object.object_type, self.store.id_type(data)) {
            (ObjectType::Mesh | ObjectType::Curve, Some(IdType::Mesh)) => {
                self.add_relation(
                    ComponentKey::new(data, NodeType::Geometry),
                    OperationKey::new(id, NodeType::Geometry, OperationCode::GeometryEvalInit),
                    "Object Data -> Geometry",
                    none,
                );
            }
            (ObjectType::Camera, Some(IdType::Camera)) => {
                self.add_relation(
                    ComponentKey::new(data, NodeType::Parameters),
                    ComponentKey::new(id, NodeType::Parameters),
                    "Camera Parameters",
                    none,
                );
            }
            (ObjectType::Armature, Some(IdType::Armature)) => self.build_pose(id, data),
            _ => self.malformed_reference(data, "object data matching the object type"),
        }
    }

    fn build_pose(&mut self, id: DatablockId, armature: DatablockId) {
        let Some(armature_data) = self.store.armature(armature) else {
            return;
        };
        let none = RelationFlags::empty();
        let pose = |opcode| OperationKey::new(id, NodeType::EvalPose, opcode);
        let bone = |name: &str, opcode| OperationKey::in_component(ComponentKey::named(id, NodeType::Bone, name), opcode);

        self.add_relation(
            ComponentKey::new(armature, NodeType::Parameters),
            pose(OperationCode::PoseInit),
            "Armature Parameters",
            none,
        );
        self.add_relation(
            OperationKey::new(id, NodeType::Transform, OperationCode::TransformFinal),
            pose(OperationCode::PoseInit),
            "Object Transform -> Pose",
            none,
        );

        for b in &armature_data.bones {
            let local = bone(&b.name, OperationCode::BoneLocal);
            let done = bone(&b.name, OperationCode::BoneDone);
            self.add_relation(pose(OperationCode::PoseInit), local.clone(), "Pose Init -> Bone", none);
            self.add_relation(local.clone(), done.clone(), "Bone Done", none);
            self.add_relation(done, pose(OperationCode::PoseDone), "Bone -> Pose Done", none);
            if let Some(parent) = &b.parent {
                if armature_data.bone(parent).is_none() {
                    warn!(bone = %b.name, parent = %parent, "bone parent does not exist, skipped");
                    continue;
                }
                self.add_relation(bone(parent, OperationCode::BoneDone), local, "Parent Bone", none);
            }
        }
    }

    fn build_collection(&mut self, id: DatablockId, collection: &'a Collection) {
        let done = OperationKey::new(id, NodeType::Geometry, OperationCode::GeometryEvalDone);
        let none = RelationFlags::empty();

        for &object_id in &collection.objects {
            // Objects left out of the scope (hidden, excluded) are not an error.
            if self.graph.find_id_node(object_id).is_none() {
                continue;
            }
            let Some(object) = self.store.object(object_id) else {
                self.malformed_reference(object_id, "object");
                continue;
            };
            let source = if object.object_type.has_geometry() {
                OperationKey::new(object_id, NodeType::Geometry, OperationCode::GeometryEvalDone)
            } else if object.instances_collection().is_some() {
                OperationKey::new(object_id, NodeType::Instancing, OperationCode::Instancer)
            } else {
                OperationKey::new(object_id, NodeType::Transform, OperationCode::TransformFinal)
            };
            self.add_relation(source, done.clone(), "Collection Object", none);
        }

        for &child in &collection.children {
            if self.graph.find_id_node(child).is_none() {
                continue;
            }
            self.add_relation(
                OperationKey::new(child, NodeType::Geometry, OperationCode::GeometryEvalDone),
                done.clone(),
                "Child Collection",
                none,
            );
        }
    }

    fn build_scene(&mut self, id: DatablockId, scene: &'a Scene) {
        let none = RelationFlags::empty();
        let parameters = OperationKey::new(id, NodeType::Parameters, OperationCode::ParametersEval);

        if let Some(mut handle) = self.node_handle(&parameters, "Scene Camera") {
            handle.add_scene_camera_relation(id, ObjectComponent::Transform, "Scene Camera");
        }
        if scene.animated {
            self.add_relation(
                ComponentKey::new(id, NodeType::Animation),
                parameters.clone(),
                "Scene Animation",
                none,
            );
        }
        if let Some(compositor) = scene.compositor {
            self.add_relation(
                parameters.clone(),
                ComponentKey::new(compositor, NodeType::Parameters),
                "Scene -> Compositor",
                none,
            );
        }
        if scene.has_sequencer {
            self.add_relation(
                parameters,
                ComponentKey::new(id, NodeType::Sequencer),
                "Scene Parameters -> Sequencer",
                none,
            );
        }
    }

    fn build_node_tree(&mut self, id: DatablockId, tree: &'a NodeTree) {
        let none = RelationFlags::empty();
        let output = OperationKey::new(id, NodeType::NtreeOutput, OperationCode::NtreeOutput);

        self.add_relation(
            ComponentKey::new(id, NodeType::Parameters),
            output.clone(),
            "Node Tree Parameters",
            none,
        );
        self.add_relation(
            ComponentKey::new(id, NodeType::Parameters),
            ComponentKey::new(id, NodeType::NtreeGeometryPreprocess),
            "Node Tree Parameters -> Preprocess",
            none,
        );

        let Some(mut handle) = self.node_handle(&output, "Node Tree Output") else {
            return;
        };
        for reference in &tree.references {
            match *reference {
                NodeTreeReference::Object(object) => {
                    handle.add_object_relation(object, ObjectComponent::Transform, "Object Info");
                    if handle.store().object_has_geometry_component(object) {
                        handle.add_object_relation(object, ObjectComponent::Geometry, "Object Info");
                    }
                }
                NodeTreeReference::Collection(collection) => {
                    handle.add_collection_geometry_relation(collection, "Collection Info");
                }
                NodeTreeReference::Group(group) => {
                    handle.add_node_tree_output_relation(group, "Node Group");
                }
                NodeTreeReference::Scene(scene) => {
                    handle.add_scene_relation(scene, SceneComponent::Parameters, "Render Layers");
                }
            }
        }
    }
}
