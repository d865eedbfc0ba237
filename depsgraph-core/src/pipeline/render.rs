use std::collections::HashSet;

use crate::error::{DepsgraphError, Result};
use crate::store::{DatablockId, DatablockStore, Scene, ViewLayer};

use super::view_layer::layer_contents;
use super::{BuilderPipeline, EvaluationScope};

/// Everything a final render of a scene needs: the contents of every view
/// layer used for rendering and the compositor.
#[derive(Debug, Clone, Copy)]
pub struct RenderPipeline {
    scene: DatablockId,
}

impl RenderPipeline {
    pub fn new(scene: DatablockId) -> Self {
        Self { scene }
    }

    fn render_layers<'s>(&self, store: &'s DatablockStore) -> Result<(&'s Scene, Vec<&'s ViewLayer>)> {
        let scene = store
            .scene(self.scene)
            .ok_or(DepsgraphError::MalformedReference(self.scene, "scene"))?;
        let layers = scene.view_layers.iter().filter(|l| l.use_for_render).collect();
        Ok((scene, layers))
    }
}

impl BuilderPipeline for RenderPipeline {
    fn name(&self) -> &'static str {
        "render"
    }

    fn scope(&self) -> EvaluationScope {
        EvaluationScope::Render { scene: self.scene }
    }

    fn roots(&self, store: &DatablockStore) -> Result<Vec<DatablockId>> {
        let (scene, layers) = self.render_layers(store)?;
        let mut roots = vec![self.scene];
        let mut seen = HashSet::new();
        for layer in layers {
            roots.extend(
                layer_contents(store, scene, layer)
                    .into_iter()
                    .filter(|id| seen.insert(*id)),
            );
        }
        Ok(roots)
    }

    /// Only what every render layer leaves out is skipped.
    fn skipped(&self, store: &DatablockStore) -> Result<Vec<DatablockId>> {
        let (_, layers) = self.render_layers(store)?;
        let mut layers = layers.into_iter().map(|layer| {
            layer
                .hidden_objects
                .iter()
                .chain(&layer.excluded_collections)
                .copied()
                .collect::<HashSet<_>>()
        });
        let Some(first) = layers.next() else {
            return Ok(Vec::new());
        };
        let common = layers.fold(first, |acc, set| &acc & &set);
        let mut skipped: Vec<_> = common.into_iter().collect();
        skipped.sort();
        Ok(skipped)
    }
}
