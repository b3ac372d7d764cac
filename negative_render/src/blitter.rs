use crate::graph::{RasterCommandBuffer, TextureHandle};
use crate::material::Material;
use glamx::{Vec2, Vec4};

/// Full-screen draw helpers for raster render functions.
pub struct Blitter;

impl Blitter {
    /// Draws `source` over the whole bound attachment through `pass` of `material`.
    ///
    /// `viewport_scale` scales the sampled UV rectangle; `Vec2::ONE` samples the full source.
    pub fn blit_texture(
        cmd: &mut RasterCommandBuffer,
        source: TextureHandle,
        viewport_scale: Vec2,
        material: &Material,
        pass: usize,
    ) {
        let scale_bias = Vec4::new(viewport_scale.x, viewport_scale.y, 0.0, 0.0);
        cmd.draw_fullscreen(source, scale_bias, material, pass);
    }
}
