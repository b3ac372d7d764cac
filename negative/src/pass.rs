use crate::shader::{INTENSITY, SHADER_PATH};
use crate::volume::NegativeVolume;
use negative_render::graph::{
    AccessFlags, GraphError, MsaaSamples, RasterGraphContext, RenderGraph, TextureDesc,
    TextureHandle,
};
use negative_render::math::Vec2;
use negative_render::pipeline::{FrameData, RenderPassEvent, ScriptableRenderPass};
use negative_render::{Blitter, HMaterial, MaterialStore};
use tracing::{trace, warn};

pub const PASS_NAME: &str = "NegativeRenderPass";
pub const COPY_BACK_PASS_NAME: &str = "BlitNegativeTextureToCameraColor";
pub const SCRATCH_TEXTURE_NAME: &str = "NegativeTexture";

/// Immutable inputs of the raster render function, captured while recording.
#[derive(Debug, Clone)]
pub struct PassData {
    pub material: HMaterial,
    pub source: TextureHandle,
    pub intensity: f32,
}

/// Inverts the camera color through a scratch texture and copies the result back.
#[derive(Debug)]
pub struct NegativeRenderPass {
    material: Option<HMaterial>,
    event: RenderPassEvent,
}

impl Default for NegativeRenderPass {
    fn default() -> Self {
        Self::new()
    }
}

impl NegativeRenderPass {
    pub fn new() -> Self {
        Self {
            material: None,
            event: RenderPassEvent::AfterRenderingPostProcessing,
        }
    }

    pub fn has_material(&self) -> bool {
        self.material.is_some()
    }

    pub fn material(&self) -> Option<HMaterial> {
        self.material
    }

    /// Destroys the owned material, if any. Safe to call repeatedly.
    pub fn cleanup(&mut self, materials: &mut MaterialStore) {
        materials.destroy(self.material.take());
    }

    fn ensure_material(&mut self, materials: &mut MaterialStore) -> HMaterial {
        match self.material {
            Some(material) if materials.contains(material) => material,
            _ => {
                let material = materials.create_engine_material(SHADER_PATH);
                self.material = Some(material);
                material
            }
        }
    }

    fn render(data: &PassData, ctx: &mut RasterGraphContext<'_>) {
        ctx.materials.set_float(data.material, INTENSITY, data.intensity);

        let Some(material) = ctx.materials.get(data.material) else {
            warn!("Negative material {:?} is gone, skipping the draw", data.material);
            return;
        };
        Blitter::blit_texture(ctx.cmd, data.source, Vec2::ONE, material, 0);
    }
}

/// Scratch texture matching `source` in size and format, without MSAA, depth or clear.
pub fn scratch_descriptor(source: &TextureDesc) -> TextureDesc {
    TextureDesc {
        name: SCRATCH_TEXTURE_NAME.to_string(),
        clear_buffer: false,
        msaa_samples: MsaaSamples::None,
        depth_buffer_bits: 0,
        ..source.clone()
    }
}

impl ScriptableRenderPass for NegativeRenderPass {
    fn name(&self) -> &str {
        PASS_NAME
    }

    fn render_pass_event(&self) -> RenderPassEvent {
        self.event
    }

    fn record_render_graph(
        &mut self,
        graph: &mut RenderGraph,
        frame: &mut FrameData<'_>,
    ) -> Result<(), GraphError> {
        let intensity = match frame.volumes.get::<NegativeVolume>() {
            Some(volume) => volume.intensity.value(),
            None => {
                warn!("NegativeVolume is not registered, rendering with its defaults");
                NegativeVolume::default().intensity.value()
            }
        };

        let material = self.ensure_material(frame.materials);
        let source = frame.resources.active_color_texture;
        let destination = graph.create_texture(scratch_descriptor(&graph.texture_desc(source)?));

        let data = PassData {
            material,
            source,
            intensity,
        };
        graph.add_raster_render_pass(PASS_NAME, data, |builder| {
            builder.set_render_attachment(destination, 0, AccessFlags::Write)?;
            builder.use_texture(source, AccessFlags::Read)?;
            builder.set_render_func(Self::render);
            Ok(())
        })?;

        graph.add_blit_pass(destination, source, Vec2::ONE, Vec2::ZERO, COPY_BACK_PASS_NAME)?;

        trace!("Recorded negative passes at intensity {intensity}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::TextureFormat;

    #[test]
    fn scratch_keeps_extent_and_format() {
        let mut source = TextureDesc::new("Camera", 640, 360, TextureFormat::Rgba16Float);
        source.msaa_samples = MsaaSamples::X4;
        source.depth_buffer_bits = 24;

        let scratch = scratch_descriptor(&source);
        assert_eq!(scratch.name, SCRATCH_TEXTURE_NAME);
        assert_eq!((scratch.width, scratch.height), (640, 360));
        assert_eq!(scratch.format, TextureFormat::Rgba16Float);
        assert_eq!(scratch.msaa_samples, MsaaSamples::None);
        assert_eq!(scratch.depth_buffer_bits, 0);
        assert!(!scratch.clear_buffer);
    }

    #[test]
    fn cleanup_without_material_is_a_no_op() {
        let mut materials = MaterialStore::new();
        let mut pass = NegativeRenderPass::new();
        pass.cleanup(&mut materials);
        pass.cleanup(&mut materials);
        assert!(!pass.has_material());
        assert!(materials.is_empty());
    }
}
