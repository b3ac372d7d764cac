use negative_render::MaterialStore;
use negative_render::material::PropertyBlock;
use negative_render::shader::{PropertyId, Rgba, Shader, ShaderError};
use std::sync::Arc;

/// Logical path the pass creates its material from.
pub const SHADER_PATH: &str = "Hidden/Sample/Negative";

pub const INTENSITY: PropertyId = PropertyId::from_name("_Intensity");

pub const NEGATIVE_WGSL: &str = include_str!("shaders/negative.wgsl");

/// The inversion program: `rgb = mix(c, 1 - c, intensity)`, alpha untouched.
pub fn negative_shader() -> Shader {
    Shader::new(SHADER_PATH, NEGATIVE_WGSL)
        .with_pass("Negative", "fs_main", Some(invert))
        .with_float_property("_Intensity", 0.0)
}

pub fn register_negative_shader(materials: &mut MaterialStore) -> Result<Arc<Shader>, ShaderError> {
    materials.register_shader(negative_shader())
}

fn invert(color: Rgba, properties: &PropertyBlock) -> Rgba {
    let t = properties.float_or(INTENSITY, 0.0);
    let [r, g, b, a] = color;
    let mix = |c: f32| c + ((1.0 - c) - c) * t;

    [mix(r), mix(g), mix(b), a]
}
