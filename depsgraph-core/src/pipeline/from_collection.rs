use crate::error::Result;
use crate::store::{DatablockId, DatablockStore};

use super::{BuilderPipeline, EvaluationScope};

/// The contents of one collection, nested collections included.
#[derive(Debug, Clone, Copy)]
pub struct FromCollectionPipeline {
    collection: DatablockId,
}

impl FromCollectionPipeline {
    pub fn new(collection: DatablockId) -> Self {
        Self { collection }
    }
}

impl BuilderPipeline for FromCollectionPipeline {
    fn name(&self) -> &'static str {
        "from collection"
    }

    fn scope(&self) -> EvaluationScope {
        EvaluationScope::Collection(self.collection)
    }

    fn roots(&self, _store: &DatablockStore) -> Result<Vec<DatablockId>> {
        Ok(vec![self.collection])
    }
}
