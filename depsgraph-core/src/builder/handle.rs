//! Construction Handle
//!
//! A [`DepsNodeHandle`] identifies the operation currently being built and
//! borrows the relation builder that owns the graph under construction.
//! Code that defines new operation kinds (modifiers, constraints, host
//! callbacks) receives a handle and uses the typed entry points below to
//! declare what that operation depends on. Every entry point resolves its
//! logical target to a node key and then adds one relation whose target is
//! the handle's operation.
//!
//! Handles only exist during a build pass; the borrow of the builder makes
//! it impossible to keep one past the rebuild that created it.

use tracing::trace;

use crate::graph::{
    ComponentKey, CustomDataMask, Depsgraph, EvalFlag, NodeType, ObjectComponent, OperationCode, OperationId,
    OperationKey, RelationFlag, RelationFlags, RelationId, SceneComponent,
};
use crate::store::{CollectionWalker, DatablockId, DatablockStore, ObjectType};

use super::relations::RelationBuilder;

/// Typed builder context for the operation being constructed.
pub struct DepsNodeHandle<'b, 'a> {
    pub(crate) builder: &'b mut RelationBuilder<'a>,
    pub(crate) operation: OperationId,
    pub(crate) default_name: String,
}

impl<'b, 'a> DepsNodeHandle<'b, 'a> {
    /// The operation relations declared through this handle point to.
    pub fn operation(&self) -> OperationId {
        self.operation
    }

    /// The datablock owning the operation being built.
    pub fn id(&self) -> DatablockId {
        self.builder.graph.operation(self.operation).owner()
    }

    /// The graph under construction.
    pub fn graph(&self) -> &Depsgraph {
        self.builder.graph
    }

    /// The store the graph is built from.
    pub fn store(&self) -> &'a DatablockStore {
        self.builder.store
    }

    /// Name used by callers that have nothing more specific to say.
    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    fn add(&mut self, from: impl Into<crate::graph::NodeKey>, description: &str) -> Option<RelationId> {
        self.builder
            .add_node_handle_relation(from, self.operation, description, RelationFlags::empty())
    }

    /// Depend on a component of a scene.
    pub fn add_scene_relation(&mut self, scene: DatablockId, component: SceneComponent, description: &str) -> Option<RelationId> {
        self.add(ComponentKey::new(scene, component.node_type()), description)
    }

    /// Depend on a component of an object.
    pub fn add_object_relation(
        &mut self,
        object: DatablockId,
        component: ObjectComponent,
        description: &str,
    ) -> Option<RelationId> {
        self.add(ComponentKey::new(object, component.node_type()), description)
    }

    /// Depend on the scene camera and on every camera bound to a timeline
    /// marker. For camera objects the camera data's parameters are pulled
    /// in as well, so lens edits reach the dependent operation.
    pub fn add_scene_camera_relation(&mut self, scene: DatablockId, component: ObjectComponent, description: &str) {
        let store = self.store();
        let Some(scene_data) = store.scene(scene) else {
            self.builder.malformed_reference(scene, "scene");
            return;
        };

        if let Some(camera) = scene_data.camera {
            self.add_camera_relation(camera, component, description);
        }
        for marker in &scene_data.markers {
            match marker.camera {
                Some(camera) if Some(camera) != scene_data.camera => {
                    self.add_camera_relation(camera, component, description);
                }
                _ => {}
            }
        }
    }

    fn add_camera_relation(&mut self, camera: DatablockId, component: ObjectComponent, description: &str) {
        let store = self.store();
        let Some(object) = store.object(camera) else {
            self.builder.malformed_reference(camera, "camera object");
            return;
        };
        self.add_object_relation(camera, component, description);
        if object.object_type == ObjectType::Camera {
            match object.data {
                Some(data) if store.camera(data).is_some() => {
                    self.add(ComponentKey::new(data, NodeType::Parameters), description);
                }
                Some(data) => self.builder.malformed_reference(data, "camera"),
                None => {}
            }
        }
    }

    /// Depend on the combined geometry of a collection's objects.
    pub fn add_collection_geometry_relation(&mut self, collection: DatablockId, description: &str) -> Option<RelationId> {
        self.add(
            OperationKey::new(collection, NodeType::Geometry, OperationCode::GeometryEvalDone),
            description,
        )
    }

    /// Request customdata layers on every object of a collection, including
    /// objects of nested collections and of collections instanced by
    /// empties, exactly as if requested on each object directly.
    pub fn add_collection_geometry_customdata_mask(&mut self, collection: DatablockId, masks: CustomDataMask) {
        let walk = CollectionWalker::new(self.store())
            .follow_instances(true)
            .walk(collection);
        for object in walk.objects {
            self.add_customdata_mask(object, masks);
        }
    }

    /// Depend on a node tree's output. Adds a flushing relation from the
    /// output operation and an ordering-only relation from the geometry
    /// preprocess operation.
    pub fn add_node_tree_output_relation(&mut self, node_tree: DatablockId, description: &str) {
        let output = OperationKey::new(node_tree, NodeType::NtreeOutput, OperationCode::NtreeOutput);
        let preprocess = OperationKey::new(
            node_tree,
            NodeType::NtreeGeometryPreprocess,
            OperationCode::NtreeGeometryPreprocess,
        );
        self.add(output, description);
        self.builder
            .add_node_handle_relation(preprocess, self.operation, description, RelationFlag::NoFlush.into());
    }

    /// Depend on a component of a cache file.
    pub fn add_object_cache_relation(
        &mut self,
        cache_file: DatablockId,
        component: ObjectComponent,
        description: &str,
    ) -> Option<RelationId> {
        self.add(ComponentKey::new(cache_file, component.node_type()), description)
    }

    /// Depend on one bone of an armature object.
    pub fn add_bone_relation(
        &mut self,
        object: DatablockId,
        bone: &str,
        component: ObjectComponent,
        description: &str,
    ) -> Option<RelationId> {
        self.add(ComponentKey::named(object, component.node_type(), bone), description)
    }

    /// Depend on a component of another object that also invalidates this
    /// datablock's point cache. The cache relation only flushes on user
    /// edits, so re-evaluation passes never throw simulation caches away.
    pub fn add_object_pointcache_relation(&mut self, object: DatablockId, component: ObjectComponent, description: &str) {
        let source = ComponentKey::new(object, component.node_type());
        self.add(source.clone(), description);

        let point_cache = ComponentKey::new(self.id(), NodeType::PointCache);
        if self
            .builder
            .add_relation(source, point_cache, "Point Cache", RelationFlag::FlushUserEditOnly.into())
            .is_none()
        {
            trace!(from = %object, to = %self.id(), "point cache relation not added");
        }
    }

    /// Depend on any datablock through its generic update operation.
    pub fn add_generic_id_relation(&mut self, id: DatablockId, description: &str) -> Option<RelationId> {
        self.add(
            OperationKey::new(id, NodeType::GenericDatablock, OperationCode::GenericDatablockUpdate),
            description,
        )
    }

    /// Declare that the operation depends on its owner's world transform.
    pub fn add_depends_on_transform_relation(&mut self, description: &str) -> Option<RelationId> {
        self.builder
            .add_depends_on_transform_relation(self.id(), self.operation, description)
    }

    /// Request a special evaluation flag on another datablock.
    pub fn add_special_eval_flag(&mut self, id: DatablockId, flag: EvalFlag) {
        self.builder.add_special_eval_flag(id, flag);
    }

    /// Request customdata layers on the evaluated geometry of an object.
    pub fn add_customdata_mask(&mut self, object: DatablockId, masks: CustomDataMask) {
        self.builder.add_customdata_mask(object, masks);
    }
}
