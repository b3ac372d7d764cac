//! Full-screen color inversion for the `negative_render` pipeline.
//!
//! A [`NegativeVolume`] controls how strongly colors are inverted. The
//! [`NegativeRendererFeature`] schedules a [`NegativeRenderPass`] after post-processing
//! that renders the inverted camera color into a scratch texture and copies it back.

pub mod feature;
pub mod pass;
pub mod shader;
pub mod volume;

pub use feature::NegativeRendererFeature;
pub use pass::{NegativeRenderPass, PassData};
pub use shader::{INTENSITY, SHADER_PATH, negative_shader};
pub use volume::NegativeVolume;

use negative_render::pipeline::{FeatureId, Renderer};
use negative_render::shader::ShaderError;

/// Registers the negative shader and volume component and adds the feature to `renderer`.
pub fn install(renderer: &mut Renderer) -> Result<FeatureId, ShaderError> {
    shader::register_negative_shader(renderer.materials_mut())?;
    renderer.volumes_mut().register_component::<NegativeVolume>();
    Ok(renderer.add_feature(Box::new(NegativeRendererFeature::new())))
}
