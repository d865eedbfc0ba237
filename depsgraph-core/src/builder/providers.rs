//! Relations of the built-in modifier and constraint types.
//!
//! Each type declares its dependencies through the same handle API that
//! host-defined providers use.

use crate::graph::{CustomDataMask, EvalFlag, ObjectComponent};
use crate::store::{BooleanOperand, ConstraintKind, DatablockId, ModifierKind};

use super::{DepsNodeHandle, RelationProvider};

/// Layers a boolean operand must provide: UVs and custom normals on loops,
/// material indices on faces.
const BOOLEAN_OPERAND_MASK: CustomDataMask = CustomDataMask {
    vmask: 0,
    emask: 0,
    fmask: 1 << 2,
    lmask: (1 << 0) | (1 << 1),
    pmask: 0,
};

/// Vertex normals of a shrinkwrap target.
const SHRINKWRAP_TARGET_MASK: CustomDataMask = CustomDataMask {
    vmask: 1 << 3,
    emask: 0,
    fmask: 0,
    lmask: 0,
    pmask: 0,
};

impl RelationProvider for ModifierKind {
    fn update_depsgraph(&self, handle: &mut DepsNodeHandle<'_, '_>) {
        match self {
            ModifierKind::Armature { object } => {
                handle.add_object_relation(*object, ObjectComponent::EvalPose, "Armature Modifier");
                handle.add_object_relation(*object, ObjectComponent::Transform, "Armature Modifier");
                handle.add_depends_on_transform_relation("Armature Modifier");
            }
            ModifierKind::Hook { object, bone } => {
                match bone {
                    Some(bone) => handle.add_bone_relation(*object, bone, ObjectComponent::Bone, "Hook Modifier"),
                    None => handle.add_object_relation(*object, ObjectComponent::Transform, "Hook Modifier"),
                };
                handle.add_depends_on_transform_relation("Hook Modifier");
            }
            ModifierKind::Boolean { operand } => {
                match *operand {
                    BooleanOperand::Object(object) => {
                        handle.add_object_relation(object, ObjectComponent::Transform, "Boolean Modifier");
                        handle.add_object_relation(object, ObjectComponent::Geometry, "Boolean Modifier");
                        handle.add_customdata_mask(object, BOOLEAN_OPERAND_MASK);
                    }
                    BooleanOperand::Collection(collection) => {
                        handle.add_collection_geometry_relation(collection, "Boolean Modifier");
                        handle.add_collection_geometry_customdata_mask(collection, BOOLEAN_OPERAND_MASK);
                    }
                }
                handle.add_depends_on_transform_relation("Boolean Modifier");
            }
            ModifierKind::Nodes { node_tree } => {
                handle.add_node_tree_output_relation(*node_tree, "Nodes Modifier");
            }
            ModifierKind::MeshSequenceCache { cache_file } => {
                handle.add_object_cache_relation(*cache_file, ObjectComponent::Cache, "Mesh Cache File");
            }
            ModifierKind::Cloth { colliders } => {
                for &collider in colliders {
                    handle.add_object_pointcache_relation(collider, ObjectComponent::Transform, "Cloth Collision");
                    if handle.store().object_has_geometry_component(collider) {
                        handle.add_object_pointcache_relation(collider, ObjectComponent::Geometry, "Cloth Collision");
                    }
                }
            }
            ModifierKind::Curve { object } => {
                handle.add_object_relation(*object, ObjectComponent::Transform, "Curve Modifier");
                handle.add_object_relation(*object, ObjectComponent::Geometry, "Curve Modifier");
                handle.add_special_eval_flag(*object, EvalFlag::NeedCurvePath);
                handle.add_depends_on_transform_relation("Curve Modifier");
            }
            ModifierKind::Custom(provider) => provider.update_depsgraph(handle),
        }
    }

    fn referenced_ids(&self) -> Vec<DatablockId> {
        match self {
            ModifierKind::Armature { object } | ModifierKind::Hook { object, .. } | ModifierKind::Curve { object } => {
                vec![*object]
            }
            ModifierKind::Boolean { operand } => match *operand {
                BooleanOperand::Object(id) | BooleanOperand::Collection(id) => vec![id],
            },
            ModifierKind::Nodes { node_tree } => vec![*node_tree],
            ModifierKind::MeshSequenceCache { cache_file } => vec![*cache_file],
            ModifierKind::Cloth { colliders } => colliders.clone(),
            ModifierKind::Custom(provider) => provider.referenced_ids(),
        }
    }
}

impl RelationProvider for ConstraintKind {
    fn update_depsgraph(&self, handle: &mut DepsNodeHandle<'_, '_>) {
        match self {
            ConstraintKind::CopyTransforms { target, subtarget } => match subtarget {
                Some(bone) => {
                    handle.add_bone_relation(*target, bone, ObjectComponent::Bone, "Copy Transforms");
                }
                None => {
                    handle.add_object_relation(*target, ObjectComponent::Transform, "Copy Transforms");
                }
            },
            ConstraintKind::FollowPath { target } => {
                handle.add_object_relation(*target, ObjectComponent::Transform, "Follow Path");
                handle.add_object_relation(*target, ObjectComponent::Geometry, "Follow Path");
                handle.add_special_eval_flag(*target, EvalFlag::NeedCurvePath);
            }
            ConstraintKind::CameraSolver { scene } => {
                handle.add_scene_camera_relation(*scene, ObjectComponent::Parameters, "Camera Solver");
            }
            ConstraintKind::Shrinkwrap { target } => {
                handle.add_object_relation(*target, ObjectComponent::Transform, "Shrinkwrap");
                handle.add_object_relation(*target, ObjectComponent::Geometry, "Shrinkwrap");
                handle.add_customdata_mask(*target, SHRINKWRAP_TARGET_MASK);
            }
            ConstraintKind::Custom(provider) => provider.update_depsgraph(handle),
        }
    }

    fn referenced_ids(&self) -> Vec<DatablockId> {
        match self {
            ConstraintKind::CopyTransforms { target, .. }
            | ConstraintKind::FollowPath { target }
            | ConstraintKind::Shrinkwrap { target } => vec![*target],
            ConstraintKind::CameraSolver { scene } => vec![*scene],
            ConstraintKind::Custom(provider) => provider.referenced_ids(),
        }
    }
}
