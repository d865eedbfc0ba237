//! Datablock Store
//!
//! The authoritative scene description the dependency graph is built from.
//! The graph only ever reads from the store; all structural mutators live
//! here and bump the store's topology generation so that graphs built from
//! an older generation know their relations are stale.
//!
//! Datablocks are addressed by [`DatablockId`]. References between
//! datablocks (parenting, instancing, modifier targets, node tree
//! references) are stored as ids and may dangle or point at the wrong type;
//! the builders treat such references as malformed and skip them.

mod collection;
mod modifier;

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{DepsgraphError, Result};

pub use collection::{CollectionWalk, CollectionWalker};
pub use modifier::{BooleanOperand, Constraint, ConstraintKind, Modifier, ModifierKind};

/// Identity of a datablock inside a [`DatablockStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatablockId(u32);

impl DatablockId {
    /// Get the raw id value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DatablockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type tag of a datablock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    Object,
    Mesh,
    Camera,
    Armature,
    Collection,
    Scene,
    NodeTree,
    CacheFile,
}

impl IdType {
    /// Two letter code used when rendering datablock names in diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            IdType::Object => "OB",
            IdType::Mesh => "ME",
            IdType::Camera => "CA",
            IdType::Armature => "AR",
            IdType::Collection => "GR",
            IdType::Scene => "SC",
            IdType::NodeTree => "NT",
            IdType::CacheFile => "CF",
        }
    }
}

/// The kind of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Mesh,
    Curve,
    Empty,
    Camera,
    Armature,
    Light,
}

impl ObjectType {
    /// Whether objects of this type evaluate geometry.
    pub fn has_geometry(&self) -> bool {
        matches!(self, ObjectType::Mesh | ObjectType::Curve)
    }
}

#[derive(Debug, Clone)]
pub struct Object {
    pub object_type: ObjectType,
    /// Object data (mesh, camera, armature).
    pub data: Option<DatablockId>,
    pub parent: Option<DatablockId>,
    /// Bone of an armature parent this object is attached to.
    pub parent_bone: Option<String>,
    /// Collection instanced by this object. Only honored for empties.
    pub instance_collection: Option<DatablockId>,
    pub animated: bool,
    pub modifiers: Vec<Modifier>,
    pub constraints: Vec<Constraint>,
}

impl Object {
    fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            data: None,
            parent: None,
            parent_bone: None,
            instance_collection: None,
            animated: false,
            modifiers: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Whether this object is an empty that instances a collection.
    pub fn instances_collection(&self) -> Option<DatablockId> {
        match self.object_type {
            ObjectType::Empty => self.instance_collection,
            _ => None,
        }
    }

    /// Whether any modifier keeps a simulation cache for this object.
    pub fn has_point_cache(&self) -> bool {
        self.modifiers.iter().any(|m| m.kind.uses_point_cache())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mesh;

#[derive(Debug, Clone)]
pub struct Camera {
    pub lens: f32,
}

#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Armature {
    pub bones: Vec<Bone>,
}

impl Armature {
    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|b| b.name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub objects: Vec<DatablockId>,
    pub children: Vec<DatablockId>,
}

/// A timeline marker. Markers may switch the active camera at their frame.
#[derive(Debug, Clone)]
pub struct TimeMarker {
    pub frame: i32,
    pub camera: Option<DatablockId>,
}

#[derive(Debug, Clone)]
pub struct ViewLayer {
    pub name: String,
    pub use_for_render: bool,
    pub excluded_collections: HashSet<DatablockId>,
    pub hidden_objects: HashSet<DatablockId>,
}

impl ViewLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            use_for_render: true,
            excluded_collections: HashSet::new(),
            hidden_objects: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scene {
    pub camera: Option<DatablockId>,
    pub markers: Vec<TimeMarker>,
    pub master_collection: DatablockId,
    pub view_layers: Vec<ViewLayer>,
    pub compositor: Option<DatablockId>,
    pub has_sequencer: bool,
    pub animated: bool,
}

impl Scene {
    pub fn view_layer(&self, name: &str) -> Option<&ViewLayer> {
        self.view_layers.iter().find(|l| l.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeTreeType {
    Geometry,
    Shader,
    Compositor,
}

/// A datablock referenced from inside a node tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTreeReference {
    /// Object info style node.
    Object(DatablockId),
    /// Collection info style node.
    Collection(DatablockId),
    /// Nested group node.
    Group(DatablockId),
    /// Render layers node of a compositor.
    Scene(DatablockId),
}

#[derive(Debug, Clone)]
pub struct NodeTree {
    pub tree_type: NodeTreeType,
    pub references: Vec<NodeTreeReference>,
}

#[derive(Debug, Clone)]
pub struct CacheFile {
    pub filepath: String,
}

/// Typed payload of a datablock.
#[derive(Debug, Clone)]
pub enum DatablockData {
    Object(Object),
    Mesh(Mesh),
    Camera(Camera),
    Armature(Armature),
    Collection(Collection),
    Scene(Scene),
    NodeTree(NodeTree),
    CacheFile(CacheFile),
}

#[derive(Debug, Clone)]
pub struct Datablock {
    pub id: DatablockId,
    pub name: String,
    pub data: DatablockData,
}

impl Datablock {
    pub fn id_type(&self) -> IdType {
        match &self.data {
            DatablockData::Object(_) => IdType::Object,
            DatablockData::Mesh(_) => IdType::Mesh,
            DatablockData::Camera(_) => IdType::Camera,
            DatablockData::Armature(_) => IdType::Armature,
            DatablockData::Collection(_) => IdType::Collection,
            DatablockData::Scene(_) => IdType::Scene,
            DatablockData::NodeTree(_) => IdType::NodeTree,
            DatablockData::CacheFile(_) => IdType::CacheFile,
        }
    }
}

/// In-memory store of all datablocks of a session.
#[derive(Debug, Default)]
pub struct DatablockStore {
    blocks: IndexMap<DatablockId, Datablock>,
    next_id: u32,
    topology_generation: u64,
}

macro_rules! typed_access {
    ($get:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, id: DatablockId) -> Option<&$ty> {
            match self.blocks.get(&id).map(|b| &b.data) {
                Some(DatablockData::$variant(data)) => Some(data),
                _ => None,
            }
        }
    };
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty, $label:literal) => {
        typed_access!($get, $variant, $ty);

        fn $get_mut(&mut self, id: DatablockId) -> Result<&mut $ty> {
            match self.blocks.get_mut(&id).map(|b| &mut b.data) {
                Some(DatablockData::$variant(data)) => Ok(data),
                Some(_) => Err(DepsgraphError::MalformedReference(id, $label)),
                None => Err(DepsgraphError::UnknownDatablock(id)),
            }
        }
    };
}

impl DatablockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter bumped by every structural mutation.
    pub fn topology_generation(&self) -> u64 {
        self.topology_generation
    }

    /// Mark the topology as changed without going through a mutator.
    pub fn tag_topology_changed(&mut self) {
        self.topology_generation += 1;
    }

    fn insert(&mut self, name: impl Into<String>, data: DatablockData) -> DatablockId {
        let id = DatablockId(self.next_id);
        self.next_id += 1;
        self.blocks.insert(
            id,
            Datablock {
                id,
                name: name.into(),
                data,
            },
        );
        self.topology_generation += 1;
        id
    }

    pub fn add_object(&mut self, name: impl Into<String>, object_type: ObjectType) -> DatablockId {
        self.insert(name, DatablockData::Object(Object::new(object_type)))
    }

    pub fn add_mesh(&mut self, name: impl Into<String>) -> DatablockId {
        self.insert(name, DatablockData::Mesh(Mesh))
    }

    pub fn add_camera(&mut self, name: impl Into<String>) -> DatablockId {
        self.insert(name, DatablockData::Camera(Camera { lens: 50.0 }))
    }

    /// Add an armature. Bones are given as `(name, parent)` pairs.
    pub fn add_armature(&mut self, name: impl Into<String>, bones: &[(&str, Option<&str>)]) -> DatablockId {
        let bones = bones
            .iter()
            .map(|(name, parent)| Bone {
                name: (*name).to_owned(),
                parent: parent.map(str::to_owned),
            })
            .collect();
        self.insert(name, DatablockData::Armature(Armature { bones }))
    }

    pub fn add_collection(&mut self, name: impl Into<String>) -> DatablockId {
        self.insert(name, DatablockData::Collection(Collection::default()))
    }

    /// Add a scene together with its master collection and one view layer
    /// named `"ViewLayer"`.
    pub fn add_scene(&mut self, name: impl Into<String>) -> DatablockId {
        let name = name.into();
        let master_collection = self.add_collection(format!("{name} Collection"));
        self.insert(
            name,
            DatablockData::Scene(Scene {
                camera: None,
                markers: Vec::new(),
                master_collection,
                view_layers: vec![ViewLayer::new("ViewLayer")],
                compositor: None,
                has_sequencer: false,
                animated: false,
            }),
        )
    }

    pub fn add_node_tree(&mut self, name: impl Into<String>, tree_type: NodeTreeType) -> DatablockId {
        self.insert(
            name,
            DatablockData::NodeTree(NodeTree {
                tree_type,
                references: Vec::new(),
            }),
        )
    }

    pub fn add_cache_file(&mut self, name: impl Into<String>, filepath: impl Into<String>) -> DatablockId {
        self.insert(
            name,
            DatablockData::CacheFile(CacheFile {
                filepath: filepath.into(),
            }),
        )
    }

    pub fn get(&self, id: DatablockId) -> Option<&Datablock> {
        self.blocks.get(&id)
    }

    pub fn contains(&self, id: DatablockId) -> bool {
        self.blocks.contains_key(&id)
    }

    pub fn id_type(&self, id: DatablockId) -> Option<IdType> {
        self.blocks.get(&id).map(Datablock::id_type)
    }

    /// Name of a datablock prefixed with its type code, e.g. `OBCube`.
    pub fn display_name(&self, id: DatablockId) -> String {
        match self.blocks.get(&id) {
            Some(block) => format!("{}{}", block.id_type().code(), block.name),
            None => format!("<missing {id}>"),
        }
    }

    /// Iterate all datablocks in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Datablock> {
        self.blocks.values()
    }

    /// Iterate all objects in creation order.
    pub fn objects(&self) -> impl Iterator<Item = (DatablockId, &Object)> {
        self.blocks.values().filter_map(|b| match &b.data {
            DatablockData::Object(object) => Some((b.id, object)),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    typed_access!(object, object_mut, Object, Object, "object");
    typed_access!(mesh, Mesh, Mesh);
    typed_access!(camera, camera_mut, Camera, Camera, "camera");
    typed_access!(armature, armature_mut, Armature, Armature, "armature");
    typed_access!(collection, collection_mut, Collection, Collection, "collection");
    typed_access!(scene, scene_mut, Scene, Scene, "scene");
    typed_access!(node_tree, node_tree_mut, NodeTree, NodeTree, "node tree");
    typed_access!(cache_file, cache_file_mut, CacheFile, CacheFile, "cache file");

    fn expect_type(&self, id: DatablockId, id_type: IdType, label: &'static str) -> Result<()> {
        match self.id_type(id) {
            Some(found) if found == id_type => Ok(()),
            Some(_) => Err(DepsgraphError::MalformedReference(id, label)),
            None => Err(DepsgraphError::UnknownDatablock(id)),
        }
    }

    /// Whether the object evaluates geometry of its own.
    pub fn object_has_geometry_component(&self, object: DatablockId) -> bool {
        self.object(object)
            .map(|o| o.object_type.has_geometry())
            .unwrap_or(false)
    }

    // Structural mutators. Every one of them bumps the topology generation.

    pub fn set_object_data(&mut self, object: DatablockId, data: DatablockId) -> Result<()> {
        if !self.contains(data) {
            return Err(DepsgraphError::UnknownDatablock(data));
        }
        self.object_mut(object)?.data = Some(data);
        self.topology_generation += 1;
        Ok(())
    }

    pub fn set_parent(&mut self, child: DatablockId, parent: Option<DatablockId>) -> Result<()> {
        if let Some(parent) = parent {
            self.expect_type(parent, IdType::Object, "object")?;
        }
        let object = self.object_mut(child)?;
        object.parent = parent;
        object.parent_bone = None;
        self.topology_generation += 1;
        Ok(())
    }

    /// Parent `child` to a bone of the armature object `parent`.
    pub fn set_parent_bone(&mut self, child: DatablockId, parent: DatablockId, bone: impl Into<String>) -> Result<()> {
        self.expect_type(parent, IdType::Object, "object")?;
        let object = self.object_mut(child)?;
        object.parent = Some(parent);
        object.parent_bone = Some(bone.into());
        self.topology_generation += 1;
        Ok(())
    }

    pub fn set_instance_collection(&mut self, object: DatablockId, collection: Option<DatablockId>) -> Result<()> {
        if let Some(collection) = collection {
            self.expect_type(collection, IdType::Collection, "collection")?;
        }
        self.object_mut(object)?.instance_collection = collection;
        self.topology_generation += 1;
        Ok(())
    }

    pub fn set_animated(&mut self, id: DatablockId, animated: bool) -> Result<()> {
        match self.blocks.get_mut(&id).map(|b| &mut b.data) {
            Some(DatablockData::Object(object)) => object.animated = animated,
            Some(DatablockData::Scene(scene)) => scene.animated = animated,
            Some(_) => return Err(DepsgraphError::MalformedReference(id, "animatable datablock")),
            None => return Err(DepsgraphError::UnknownDatablock(id)),
        }
        self.topology_generation += 1;
        Ok(())
    }

    pub fn add_modifier(&mut self, object: DatablockId, modifier: Modifier) -> Result<()> {
        self.object_mut(object)?.modifiers.push(modifier);
        self.topology_generation += 1;
        Ok(())
    }

    pub fn add_constraint(&mut self, object: DatablockId, constraint: Constraint) -> Result<()> {
        self.object_mut(object)?.constraints.push(constraint);
        self.topology_generation += 1;
        Ok(())
    }

    pub fn link_object(&mut self, collection: DatablockId, object: DatablockId) -> Result<()> {
        self.expect_type(object, IdType::Object, "object")?;
        let collection = self.collection_mut(collection)?;
        if !collection.objects.contains(&object) {
            collection.objects.push(object);
        }
        self.topology_generation += 1;
        Ok(())
    }

    pub fn link_collection(&mut self, parent: DatablockId, child: DatablockId) -> Result<()> {
        self.expect_type(child, IdType::Collection, "collection")?;
        let parent = self.collection_mut(parent)?;
        if !parent.children.contains(&child) {
            parent.children.push(child);
        }
        self.topology_generation += 1;
        Ok(())
    }

    pub fn set_scene_camera(&mut self, scene: DatablockId, camera: Option<DatablockId>) -> Result<()> {
        if let Some(camera) = camera {
            self.expect_type(camera, IdType::Object, "object")?;
        }
        self.scene_mut(scene)?.camera = camera;
        self.topology_generation += 1;
        Ok(())
    }

    /// Add a timeline marker, optionally binding a camera to it.
    pub fn add_marker(&mut self, scene: DatablockId, frame: i32, camera: Option<DatablockId>) -> Result<()> {
        self.scene_mut(scene)?.markers.push(TimeMarker { frame, camera });
        self.topology_generation += 1;
        Ok(())
    }

    pub fn set_compositor(&mut self, scene: DatablockId, tree: Option<DatablockId>) -> Result<()> {
        if let Some(tree) = tree {
            self.expect_type(tree, IdType::NodeTree, "node tree")?;
        }
        self.scene_mut(scene)?.compositor = tree;
        self.topology_generation += 1;
        Ok(())
    }

    pub fn set_sequencer(&mut self, scene: DatablockId, enabled: bool) -> Result<()> {
        self.scene_mut(scene)?.has_sequencer = enabled;
        self.topology_generation += 1;
        Ok(())
    }

    pub fn add_view_layer(&mut self, scene: DatablockId, layer: ViewLayer) -> Result<()> {
        self.scene_mut(scene)?.view_layers.push(layer);
        self.topology_generation += 1;
        Ok(())
    }

    pub fn set_object_hidden(&mut self, scene: DatablockId, layer: &str, object: DatablockId, hidden: bool) -> Result<()> {
        let layer = self
            .scene_mut(scene)?
            .view_layers
            .iter_mut()
            .find(|l| l.name == layer)
            .ok_or(DepsgraphError::MalformedReference(scene, "scene with that view layer"))?;
        if hidden {
            layer.hidden_objects.insert(object);
        } else {
            layer.hidden_objects.remove(&object);
        }
        self.topology_generation += 1;
        Ok(())
    }

    pub fn set_collection_excluded(
        &mut self,
        scene: DatablockId,
        layer: &str,
        collection: DatablockId,
        excluded: bool,
    ) -> Result<()> {
        let layer = self
            .scene_mut(scene)?
            .view_layers
            .iter_mut()
            .find(|l| l.name == layer)
            .ok_or(DepsgraphError::MalformedReference(scene, "scene with that view layer"))?;
        if excluded {
            layer.excluded_collections.insert(collection);
        } else {
            layer.excluded_collections.remove(&collection);
        }
        self.topology_generation += 1;
        Ok(())
    }

    pub fn add_node_tree_reference(&mut self, tree: DatablockId, reference: NodeTreeReference) -> Result<()> {
        self.node_tree_mut(tree)?.references.push(reference);
        self.topology_generation += 1;
        Ok(())
    }

    /// Change a camera's lens. Not a structural edit.
    pub fn set_camera_lens(&mut self, camera: DatablockId, lens: f32) -> Result<()> {
        self.camera_mut(camera)?.lens = lens;
        Ok(())
    }

    /// Point a cache file at another path. Not a structural edit.
    pub fn set_cache_filepath(&mut self, cache_file: DatablockId, filepath: impl Into<String>) -> Result<()> {
        self.cache_file_mut(cache_file)?.filepath = filepath.into();
        Ok(())
    }

    pub fn add_bone(&mut self, armature: DatablockId, name: impl Into<String>, parent: Option<String>) -> Result<()> {
        self.armature_mut(armature)?.bones.push(Bone {
            name: name.into(),
            parent,
        });
        self.topology_generation += 1;
        Ok(())
    }

    /// Objects visible in a view layer: everything reachable from the
    /// scene's master collection through child collections, minus excluded
    /// collections and hidden objects.
    pub fn view_layer_objects(&self, scene: DatablockId, layer: &str) -> Result<Vec<DatablockId>> {
        let scene_data = self
            .scene(scene)
            .ok_or(DepsgraphError::MalformedReference(scene, "scene"))?;
        let layer = scene_data
            .view_layer(layer)
            .ok_or(DepsgraphError::MalformedReference(scene, "scene with that view layer"))?;
        let walk = CollectionWalker::new(self)
            .exclude(layer.excluded_collections.iter().copied())
            .walk(scene_data.master_collection);
        Ok(walk
            .objects
            .into_iter()
            .filter(|object| !layer.hidden_objects.contains(object))
            .collect())
    }
}
