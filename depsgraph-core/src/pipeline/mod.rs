//! Builder Pipelines
//!
//! A pipeline decides which datablocks seed a rebuild. Every variant runs
//! the same two builder passes over its roots and discards whatever the
//! graph held before; there is no incremental patching.
//!
//! | scope | roots |
//! |---|---|
//! | [`EvaluationScope::ViewLayer`] | the scene, the layer's visible objects and collections |
//! | [`EvaluationScope::AllObjects`] | every object in the store |
//! | [`EvaluationScope::Render`] | the scene and every render layer's contents |
//! | [`EvaluationScope::CompositorPreview`] | one compositor node tree |
//! | [`EvaluationScope::Ids`] | an explicit list of datablocks |
//! | [`EvaluationScope::Collection`] | one collection |
//!
//! Rebuilds are lazy. [`relations_update`] only runs the graph's pipeline
//! when its relations were tagged or the store topology changed since the
//! last build.

mod all_objects;
mod compositor;
mod from_collection;
mod from_ids;
mod render;
mod view_layer;

use tracing::debug;

use crate::builder::{NodeBuilder, RelationBuilder};
use crate::error::Result;
use crate::graph::Depsgraph;
use crate::store::{DatablockId, DatablockStore};
use crate::tag;

pub use all_objects::AllObjectsPipeline;
pub use compositor::CompositorPreviewPipeline;
pub use from_collection::FromCollectionPipeline;
pub use from_ids::FromIdsPipeline;
pub use render::RenderPipeline;
pub use view_layer::ViewLayerPipeline;

/// What a graph evaluates. Also the key of the graph in a
/// [`GraphRegistry`](crate::registry::GraphRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EvaluationScope {
    ViewLayer { scene: DatablockId, view_layer: String },
    AllObjects,
    Render { scene: DatablockId },
    CompositorPreview { scene: DatablockId, node_tree: DatablockId },
    Ids(Vec<DatablockId>),
    Collection(DatablockId),
}

impl EvaluationScope {
    /// The pipeline that builds graphs of this scope.
    pub fn pipeline(&self) -> Box<dyn BuilderPipeline> {
        match self {
            EvaluationScope::ViewLayer { scene, view_layer } => {
                Box::new(ViewLayerPipeline::new(*scene, view_layer.clone()))
            }
            EvaluationScope::AllObjects => Box::new(AllObjectsPipeline),
            EvaluationScope::Render { scene } => Box::new(RenderPipeline::new(*scene)),
            EvaluationScope::CompositorPreview { scene, node_tree } => {
                Box::new(CompositorPreviewPipeline::new(*scene, *node_tree))
            }
            EvaluationScope::Ids(ids) => Box::new(FromIdsPipeline::new(ids.clone())),
            EvaluationScope::Collection(collection) => Box::new(FromCollectionPipeline::new(*collection)),
        }
    }
}

/// Root selection strategy of a rebuild.
pub trait BuilderPipeline: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// The scope graphs built by this pipeline evaluate.
    fn scope(&self) -> EvaluationScope;

    /// Datablocks the node builder starts from.
    fn roots(&self, store: &DatablockStore) -> Result<Vec<DatablockId>>;

    /// Datablocks not to pull in through collection membership.
    fn skipped(&self, _store: &DatablockStore) -> Result<Vec<DatablockId>> {
        Ok(Vec::new())
    }

    /// Discard the graph's nodes and relations and rebuild them.
    ///
    /// On success the graph is fully dirty and its relations are clean. On
    /// failure the graph stays tagged for another rebuild.
    fn build(&self, graph: &mut Depsgraph, store: &DatablockStore) -> Result<()> {
        // Requests raised from here on must trigger another rebuild.
        graph.relations_tag.clear();
        graph.scope = self.scope();
        graph.clear();

        let result = build_nodes_and_relations(self, graph, store);
        if let Err(error) = &result {
            debug!(pipeline = self.name(), %error, "relations build failed");
            graph.built_from_topology = None;
            graph.relations_tag.tag();
            return result;
        }

        tag::tag_everything(graph);
        graph.generation += 1;
        graph.built_from_topology = Some(store.topology_generation());
        debug!(
            pipeline = self.name(),
            generation = graph.generation,
            id_nodes = graph.id_nodes.len(),
            operations = graph.operation_count(),
            relations = graph.relation_count(),
            "relations built"
        );
        Ok(())
    }
}

fn build_nodes_and_relations<P>(pipeline: &P, graph: &mut Depsgraph, store: &DatablockStore) -> Result<()>
where
    P: BuilderPipeline + ?Sized,
{
    let roots = pipeline.roots(store)?;
    let skipped = pipeline.skipped(store)?;
    debug!(pipeline = pipeline.name(), roots = roots.len(), "building relations");

    NodeBuilder::new(graph, store).skip_members(skipped).build(roots)?;

    let mut relations = RelationBuilder::new(graph, store);
    relations.build();
    relations.finish()
}

/// Rebuild the graph with its own scope's pipeline.
pub fn build(graph: &mut Depsgraph, store: &DatablockStore) -> Result<()> {
    let pipeline = graph.scope().pipeline();
    pipeline.build(graph, store)
}

/// Rebuild the graph if its relations are stale. Returns whether a rebuild
/// happened.
pub fn relations_update(graph: &mut Depsgraph, store: &DatablockStore) -> Result<bool> {
    if !graph.needs_relations_update(store.topology_generation()) {
        return Ok(false);
    }
    build(graph, store)?;
    Ok(true)
}
