use crate::error::Result;
use crate::store::{DatablockId, DatablockStore};

use super::{BuilderPipeline, EvaluationScope};

/// Every object of the store, visible or not.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllObjectsPipeline;

impl BuilderPipeline for AllObjectsPipeline {
    fn name(&self) -> &'static str {
        "all objects"
    }

    fn scope(&self) -> EvaluationScope {
        EvaluationScope::AllObjects
    }

    fn roots(&self, store: &DatablockStore) -> Result<Vec<DatablockId>> {
        Ok(store.objects().map(|(id, _)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::Depsgraph;
    use crate::store::ObjectType;

    #[test]
    fn ignores_visibility() {
        let mut store = DatablockStore::new();
        let scene = store.add_scene("Scene");
        let master = store.scene(scene).unwrap().master_collection;
        let shown = store.add_object("Shown", ObjectType::Mesh);
        let hidden = store.add_object("Hidden", ObjectType::Mesh);
        let orphan = store.add_object("Orphan", ObjectType::Empty);
        store.link_object(master, shown).unwrap();
        store.link_object(master, hidden).unwrap();
        store.set_object_hidden(scene, "ViewLayer", hidden, true).unwrap();

        let mut graph = Depsgraph::new(EvaluationScope::AllObjects, GraphConfig::default());
        AllObjectsPipeline.build(&mut graph, &store).unwrap();
        for id in [shown, hidden, orphan] {
            assert!(graph.find_id_node(id).is_some());
        }
        assert!(graph.find_id_node(scene).is_none());
    }
}
