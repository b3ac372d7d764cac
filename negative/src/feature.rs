use crate::pass::NegativeRenderPass;
use negative_render::MaterialStore;
use negative_render::pipeline::{CameraData, PassQueue, RendererFeature};
use tracing::debug;

pub const FEATURE_NAME: &str = "NegativeRendererFeature";

/// Owns the [`NegativeRenderPass`] and enqueues it for every camera.
#[derive(Debug, Default)]
pub struct NegativeRendererFeature {
    pass: Option<NegativeRenderPass>,
}

impl NegativeRendererFeature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pass(&self) -> Option<&NegativeRenderPass> {
        self.pass.as_ref()
    }
}

impl RendererFeature for NegativeRendererFeature {
    fn name(&self) -> &str {
        FEATURE_NAME
    }

    fn create(&mut self) {
        self.pass = Some(NegativeRenderPass::new());
    }

    fn add_render_passes<'a>(&'a mut self, queue: &mut PassQueue<'a>, _camera: &CameraData) {
        if let Some(pass) = &mut self.pass {
            queue.enqueue(pass);
        }
    }

    fn dispose(&mut self, disposing: bool, materials: &mut MaterialStore) {
        if !disposing {
            return;
        }

        if let Some(pass) = &mut self.pass {
            pass.cleanup(materials);
            debug!("Negative pass cleaned up");
        }
    }
}
