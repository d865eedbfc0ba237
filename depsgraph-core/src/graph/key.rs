//! Node Keys
//!
//! Keys name graph nodes independently of whether they exist. Builders use
//! them to declare relations; the graph resolves them to node ids.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::DatablockId;

use super::recalc::Recalc;

/// Kind of a component node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    Parameters,
    Animation,
    Transform,
    Geometry,
    Sequencer,
    PointCache,
    GenericDatablock,
    NtreeOutput,
    NtreeGeometryPreprocess,
    Instancing,
    EvalPose,
    /// One per bone, qualified by the bone name.
    Bone,
    /// File cache of a cache file datablock.
    Cache,
    Shading,
}

impl NodeType {
    /// The aspect of a datablock that changes when this component is
    /// re-evaluated.
    pub fn recalc(&self) -> Recalc {
        match self {
            NodeType::Parameters | NodeType::GenericDatablock => Recalc::PARAMETERS,
            NodeType::Animation => Recalc::ANIMATION,
            NodeType::Transform => Recalc::TRANSFORM,
            NodeType::Geometry
            | NodeType::NtreeOutput
            | NodeType::NtreeGeometryPreprocess
            | NodeType::Instancing
            | NodeType::Cache => Recalc::GEOMETRY,
            NodeType::EvalPose | NodeType::Bone => Recalc::GEOMETRY | Recalc::TRANSFORM,
            NodeType::Sequencer => Recalc::SEQUENCER,
            NodeType::PointCache => Recalc::POINT_CACHE,
            NodeType::Shading => Recalc::SHADING,
        }
    }
}

/// Operation identifiers. An operation is addressed by its code plus an
/// optional name (modifier operations are named after their modifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationCode {
    ParametersEval,
    AnimationEval,
    TransformLocal,
    TransformParent,
    TransformConstraints,
    TransformFinal,
    GeometryEvalInit,
    Modifier,
    GeometryEval,
    GeometryEvalDone,
    PointCacheReset,
    GenericDatablockUpdate,
    NtreeOutput,
    NtreeGeometryPreprocess,
    Instancer,
    PoseInit,
    PoseDone,
    BoneLocal,
    BoneDone,
    SequencesEval,
    FileCacheUpdate,
    ShadingEval,
}

/// Component of an object that other datablocks may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectComponent {
    Parameters,
    Animation,
    Transform,
    Geometry,
    EvalPose,
    Bone,
    Shading,
    Cache,
    PointCache,
}

impl ObjectComponent {
    pub fn node_type(&self) -> NodeType {
        match self {
            ObjectComponent::Parameters => NodeType::Parameters,
            ObjectComponent::Animation => NodeType::Animation,
            ObjectComponent::Transform => NodeType::Transform,
            ObjectComponent::Geometry => NodeType::Geometry,
            ObjectComponent::EvalPose => NodeType::EvalPose,
            ObjectComponent::Bone => NodeType::Bone,
            ObjectComponent::Shading => NodeType::Shading,
            ObjectComponent::Cache => NodeType::Cache,
            ObjectComponent::PointCache => NodeType::PointCache,
        }
    }
}

/// Component of a scene that other datablocks may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneComponent {
    Parameters,
    Animation,
    Sequencer,
}

impl SceneComponent {
    pub fn node_type(&self) -> NodeType {
        match self {
            SceneComponent::Parameters => NodeType::Parameters,
            SceneComponent::Animation => NodeType::Animation,
            SceneComponent::Sequencer => NodeType::Sequencer,
        }
    }
}

/// Addresses a component: datablock, kind and optional sub-id (bone name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentKey {
    pub id: DatablockId,
    pub node_type: NodeType,
    /// Empty when the component is not qualified.
    pub name: String,
}

impl ComponentKey {
    pub fn new(id: DatablockId, node_type: NodeType) -> Self {
        Self {
            id,
            node_type,
            name: String::new(),
        }
    }

    pub fn named(id: DatablockId, node_type: NodeType, name: impl Into<String>) -> Self {
        Self {
            id,
            node_type,
            name: name.into(),
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.id, self.node_type)?;
        if !self.name.is_empty() {
            write!(f, "[{}]", self.name)?;
        }
        Ok(())
    }
}

/// Addresses one operation inside a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey {
    pub component: ComponentKey,
    pub opcode: OperationCode,
    /// Empty for the common case of one operation per code.
    pub name: String,
}

impl OperationKey {
    pub fn new(id: DatablockId, node_type: NodeType, opcode: OperationCode) -> Self {
        Self {
            component: ComponentKey::new(id, node_type),
            opcode,
            name: String::new(),
        }
    }

    /// Operation inside a qualified component, e.g. a bone.
    pub fn in_component(component: ComponentKey, opcode: OperationCode) -> Self {
        Self {
            component,
            opcode,
            name: String::new(),
        }
    }

    /// Named operation, e.g. one modifier of a geometry stack.
    pub fn named(id: DatablockId, node_type: NodeType, opcode: OperationCode, name: impl Into<String>) -> Self {
        Self {
            component: ComponentKey::new(id, node_type),
            opcode,
            name: name.into(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.component, self.opcode)?;
        if !self.name.is_empty() {
            write!(f, "({})", self.name)?;
        }
        Ok(())
    }
}

/// Either end of a relation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// A whole component. As a source it resolves to the component's exit
    /// operation, as a target to its entry operation.
    Component(ComponentKey),
    Operation(OperationKey),
}

impl NodeKey {
    pub fn component(&self) -> &ComponentKey {
        match self {
            NodeKey::Component(key) => key,
            NodeKey::Operation(key) => &key.component,
        }
    }
}

impl From<ComponentKey> for NodeKey {
    fn from(key: ComponentKey) -> Self {
        NodeKey::Component(key)
    }
}

impl From<OperationKey> for NodeKey {
    fn from(key: OperationKey) -> Self {
        NodeKey::Operation(key)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Component(key) => key.fmt(f),
            NodeKey::Operation(key) => key.fmt(f),
        }
    }
}
