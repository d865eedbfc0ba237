use crate::error::{DepsgraphError, Result};
use crate::store::{DatablockId, DatablockStore, IdType};

use super::{BuilderPipeline, EvaluationScope};

/// Interactive preview of one compositor node tree. Only the tree and what
/// it references are built.
#[derive(Debug, Clone, Copy)]
pub struct CompositorPreviewPipeline {
    scene: DatablockId,
    node_tree: DatablockId,
}

impl CompositorPreviewPipeline {
    pub fn new(scene: DatablockId, node_tree: DatablockId) -> Self {
        Self { scene, node_tree }
    }
}

impl BuilderPipeline for CompositorPreviewPipeline {
    fn name(&self) -> &'static str {
        "compositor preview"
    }

    fn scope(&self) -> EvaluationScope {
        EvaluationScope::CompositorPreview {
            scene: self.scene,
            node_tree: self.node_tree,
        }
    }

    fn roots(&self, store: &DatablockStore) -> Result<Vec<DatablockId>> {
        match store.id_type(self.node_tree) {
            Some(IdType::NodeTree) => Ok(vec![self.node_tree]),
            Some(_) => Err(DepsgraphError::MalformedReference(self.node_tree, "node tree")),
            None => Err(DepsgraphError::UnknownDatablock(self.node_tree)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::{ComponentKey, Depsgraph, NodeType};
    use crate::store::{NodeTreeReference, NodeTreeType, ObjectType};

    #[test]
    fn builds_tree_references_only() {
        let mut store = DatablockStore::new();
        let scene = store.add_scene("Scene");
        let tree = store.add_node_tree("Compositing", NodeTreeType::Compositor);
        let mask = store.add_object("Mask", ObjectType::Mesh);
        let unrelated = store.add_object("Unrelated", ObjectType::Mesh);
        store.set_compositor(scene, Some(tree)).unwrap();
        store.add_node_tree_reference(tree, NodeTreeReference::Scene(scene)).unwrap();
        store.add_node_tree_reference(tree, NodeTreeReference::Object(mask)).unwrap();

        let pipeline = CompositorPreviewPipeline::new(scene, tree);
        let mut graph = Depsgraph::new(pipeline.scope(), GraphConfig::default());
        pipeline.build(&mut graph, &store).unwrap();

        assert!(graph.find_id_node(scene).is_some());
        assert!(graph.find_id_node(mask).is_some());
        assert!(graph.find_id_node(unrelated).is_none());
        assert!(!graph
            .relations_between(
                &ComponentKey::new(mask, NodeType::Geometry),
                &ComponentKey::new(tree, NodeType::NtreeOutput)
            )
            .is_empty());
    }

    #[test]
    fn rejects_non_tree_root() {
        let mut store = DatablockStore::new();
        let scene = store.add_scene("Scene");
        let pipeline = CompositorPreviewPipeline::new(scene, scene);
        let mut graph = Depsgraph::new(pipeline.scope(), GraphConfig::default());
        assert!(matches!(
            pipeline.build(&mut graph, &store),
            Err(DepsgraphError::MalformedReference(_, "node tree"))
        ));
    }
}
