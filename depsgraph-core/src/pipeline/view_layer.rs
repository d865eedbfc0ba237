use crate::error::{DepsgraphError, Result};
use crate::store::{CollectionWalker, DatablockId, DatablockStore, Scene, ViewLayer};

use super::{BuilderPipeline, EvaluationScope};

/// Objects visible in one view layer, plus the layer's collections.
#[derive(Debug, Clone)]
pub struct ViewLayerPipeline {
    scene: DatablockId,
    view_layer: String,
}

impl ViewLayerPipeline {
    pub fn new(scene: DatablockId, view_layer: impl Into<String>) -> Self {
        Self {
            scene,
            view_layer: view_layer.into(),
        }
    }

    fn layer<'s>(&self, store: &'s DatablockStore) -> Result<(&'s Scene, &'s ViewLayer)> {
        let scene = store
            .scene(self.scene)
            .ok_or(DepsgraphError::MalformedReference(self.scene, "scene"))?;
        let layer = scene
            .view_layer(&self.view_layer)
            .ok_or(DepsgraphError::MalformedReference(self.scene, "scene with that view layer"))?;
        Ok((scene, layer))
    }
}

/// Collections and objects a view layer shows, collections first.
pub(super) fn layer_contents(store: &DatablockStore, scene: &Scene, layer: &ViewLayer) -> Vec<DatablockId> {
    let walk = CollectionWalker::new(store)
        .exclude(layer.excluded_collections.iter().copied())
        .walk(scene.master_collection);
    let objects = walk
        .objects
        .into_iter()
        .filter(|object| !layer.hidden_objects.contains(object));
    walk.collections.into_iter().chain(objects).collect()
}

impl BuilderPipeline for ViewLayerPipeline {
    fn name(&self) -> &'static str {
        "view layer"
    }

    fn scope(&self) -> EvaluationScope {
        EvaluationScope::ViewLayer {
            scene: self.scene,
            view_layer: self.view_layer.clone(),
        }
    }

    fn roots(&self, store: &DatablockStore) -> Result<Vec<DatablockId>> {
        let (scene, layer) = self.layer(store)?;
        let mut roots = vec![self.scene];
        roots.extend(layer_contents(store, scene, layer));
        Ok(roots)
    }

    fn skipped(&self, store: &DatablockStore) -> Result<Vec<DatablockId>> {
        let (_, layer) = self.layer(store)?;
        Ok(layer
            .hidden_objects
            .iter()
            .chain(&layer.excluded_collections)
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::Depsgraph;
    use crate::store::ObjectType;

    fn scene_with_layer() -> (DatablockStore, DatablockId, [DatablockId; 4]) {
        let mut store = DatablockStore::new();
        let scene = store.add_scene("Scene");
        let master = store.scene(scene).unwrap().master_collection;
        let props = store.add_collection("Props");
        let shown = store.add_object("Shown", ObjectType::Mesh);
        let hidden = store.add_object("Hidden", ObjectType::Mesh);
        let prop = store.add_object("Prop", ObjectType::Mesh);
        store.link_object(master, shown).unwrap();
        store.link_object(master, hidden).unwrap();
        store.link_collection(master, props).unwrap();
        store.link_object(props, prop).unwrap();
        (store, scene, [props, shown, hidden, prop])
    }

    #[test]
    fn builds_visible_objects() {
        let (mut store, scene, [props, shown, hidden, prop]) = scene_with_layer();
        store.set_object_hidden(scene, "ViewLayer", hidden, true).unwrap();
        store.set_collection_excluded(scene, "ViewLayer", props, true).unwrap();

        let pipeline = ViewLayerPipeline::new(scene, "ViewLayer");
        let mut graph = Depsgraph::new(pipeline.scope(), GraphConfig::default());
        pipeline.build(&mut graph, &store).unwrap();

        assert!(graph.find_id_node(scene).is_some());
        assert!(graph.find_id_node(shown).is_some());
        assert!(graph.find_id_node(hidden).is_none());
        assert!(graph.find_id_node(props).is_none());
        assert!(graph.find_id_node(prop).is_none());
    }

    #[test]
    fn unknown_layer_is_rejected() {
        let (store, scene, _) = scene_with_layer();
        let pipeline = ViewLayerPipeline::new(scene, "Nope");
        let mut graph = Depsgraph::new(pipeline.scope(), GraphConfig::default());
        assert!(pipeline.build(&mut graph, &store).is_err());
    }
}
