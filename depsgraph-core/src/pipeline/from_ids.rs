use crate::error::Result;
use crate::store::{DatablockId, DatablockStore};

use super::{BuilderPipeline, EvaluationScope};

/// A caller supplied set of datablocks, for narrow on-demand graphs.
#[derive(Debug, Clone)]
pub struct FromIdsPipeline {
    ids: Vec<DatablockId>,
}

impl FromIdsPipeline {
    pub fn new(ids: Vec<DatablockId>) -> Self {
        Self { ids }
    }
}

impl BuilderPipeline for FromIdsPipeline {
    fn name(&self) -> &'static str {
        "from ids"
    }

    fn scope(&self) -> EvaluationScope {
        EvaluationScope::Ids(self.ids.clone())
    }

    fn roots(&self, _store: &DatablockStore) -> Result<Vec<DatablockId>> {
        Ok(self.ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::Depsgraph;
    use crate::store::ObjectType;

    #[test]
    fn builds_ids_and_their_dependencies() {
        let mut store = DatablockStore::new();
        let parent = store.add_object("Parent", ObjectType::Empty);
        let child = store.add_object("Child", ObjectType::Mesh);
        let unrelated = store.add_object("Unrelated", ObjectType::Mesh);
        store.set_parent(child, Some(parent)).unwrap();

        let pipeline = FromIdsPipeline::new(vec![child]);
        let mut graph = Depsgraph::new(pipeline.scope(), GraphConfig::default());
        pipeline.build(&mut graph, &store).unwrap();

        assert!(graph.find_id_node(child).is_some());
        assert!(graph.find_id_node(parent).is_some());
        assert!(graph.find_id_node(unrelated).is_none());
    }
}
