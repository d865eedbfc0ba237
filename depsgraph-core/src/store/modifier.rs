//! Modifier and constraint stacks of objects.
//!
//! Only the references a modifier or constraint holds matter to the
//! dependency graph. The dependencies they imply are declared by
//! [`RelationProvider`] implementations in the builder.

use std::sync::Arc;

use crate::builder::RelationProvider;

use super::DatablockId;

/// Operand of a boolean modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOperand {
    Object(DatablockId),
    Collection(DatablockId),
}

#[derive(Debug, Clone)]
pub enum ModifierKind {
    /// Deform by the pose of an armature object.
    Armature { object: DatablockId },
    /// Deform by an object, or by one of its bones.
    Hook { object: DatablockId, bone: Option<String> },
    Boolean { operand: BooleanOperand },
    /// Geometry node tree.
    Nodes { node_tree: DatablockId },
    /// Stream geometry from a cache file.
    MeshSequenceCache { cache_file: DatablockId },
    /// Simulated cloth, collides with the listed objects.
    Cloth { colliders: Vec<DatablockId> },
    /// Deform along a curve object.
    Curve { object: DatablockId },
    /// Host defined modifier type.
    Custom(Arc<dyn RelationProvider>),
}

impl ModifierKind {
    /// Whether this modifier keeps a point cache on its owner.
    pub fn uses_point_cache(&self) -> bool {
        matches!(self, ModifierKind::Cloth { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Modifier {
    pub name: String,
    pub kind: ModifierKind,
}

impl Modifier {
    pub fn new(name: impl Into<String>, kind: ModifierKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConstraintKind {
    /// Copy the transform of an object, or of a bone when `subtarget` is set.
    CopyTransforms { target: DatablockId, subtarget: Option<String> },
    /// Follow the path of a curve object.
    FollowPath { target: DatablockId },
    /// Solve against the scene camera's motion track.
    CameraSolver { scene: DatablockId },
    /// Project onto the surface of a mesh object.
    Shrinkwrap { target: DatablockId },
    /// Host defined constraint type.
    Custom(Arc<dyn RelationProvider>),
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
}

impl Constraint {
    pub fn new(name: impl Into<String>, kind: ConstraintKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}
