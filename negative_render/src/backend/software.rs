use crate::backend::{
    BackendError, BlitInfo, GraphBackend, ImportSizeMismatchErr, MissingShaderPassErr,
    MissingTextureErr, NoReferenceKernelErr, RasterPassInfo, UnknownExternalErr,
    UnsupportedFormatErr,
};
use crate::graph::{ExternalTextureId, RasterCommand, TextureDesc, TextureHandle};
use crate::shader::FragmentKernel;
use glamx::{Vec2, Vec4};
use image::{Rgba, Rgba32FImage, RgbaImage};
use snafu::{OptionExt, ensure};
use std::collections::HashMap;
use tracing::{debug, trace, warn};
use wgpu::TextureFormat;

enum Binding {
    External(ExternalTextureId),
    Transient(Rgba32FImage),
}

/// CPU reference implementation of [`GraphBackend`].
///
/// Fragment stages run through the shader pass's reference kernel with nearest,
/// clamp-to-edge sampling. Every color format is stored as 32-bit float RGBA.
#[derive(Default)]
pub struct SoftwareBackend {
    externals: HashMap<ExternalTextureId, Rgba32FImage>,
    next_external: u64,
    bindings: HashMap<TextureHandle, Binding>,
    transient_peak: usize,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import_image(&mut self, image: &RgbaImage) -> ExternalTextureId {
        let converted = Rgba32FImage::from_fn(image.width(), image.height(), |x, y| {
            let Rgba(px) = *image.get_pixel(x, y);
            Rgba(px.map(|c| c as f32 / 255.0))
        });
        self.import_image_f32(converted)
    }

    pub fn import_image_f32(&mut self, image: Rgba32FImage) -> ExternalTextureId {
        self.next_external += 1;
        let id = ExternalTextureId(self.next_external);
        self.externals.insert(id, image);
        id
    }

    pub fn image(&self, id: ExternalTextureId) -> Option<&Rgba32FImage> {
        self.externals.get(&id)
    }

    /// Reads an external texture back, quantized to 8 bits per channel.
    pub fn image_rgba8(&self, id: ExternalTextureId) -> Option<RgbaImage> {
        let image = self.externals.get(&id)?;
        Some(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
            let Rgba(px) = *image.get_pixel(x, y);
            Rgba(px.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
        }))
    }

    /// Transient textures currently holding memory.
    pub fn live_transients(&self) -> usize {
        self.bindings
            .values()
            .filter(|b| matches!(b, Binding::Transient(_)))
            .count()
    }

    /// Most transient textures alive at once since this backend was created.
    pub fn transient_peak(&self) -> usize {
        self.transient_peak
    }

    fn texture(&self, handle: TextureHandle) -> Result<&Rgba32FImage, BackendError> {
        match self.bindings.get(&handle).context(MissingTextureErr { handle })? {
            Binding::External(id) => self
                .externals
                .get(id)
                .context(UnknownExternalErr { external: *id }),
            Binding::Transient(image) => Ok(image),
        }
    }

    fn texture_mut(&mut self, handle: TextureHandle) -> Result<&mut Rgba32FImage, BackendError> {
        match self
            .bindings
            .get_mut(&handle)
            .context(MissingTextureErr { handle })?
        {
            Binding::External(id) => self
                .externals
                .get_mut(id)
                .context(UnknownExternalErr { external: *id }),
            Binding::Transient(image) => Ok(image),
        }
    }

    fn draw_fullscreen(
        &mut self,
        target: TextureHandle,
        source: TextureHandle,
        scale_bias: Vec4,
        kernel: FragmentKernel,
        properties: &crate::material::PropertyBlock,
    ) -> Result<(), BackendError> {
        let source = self.texture(source)?.clone();
        let target = self.texture_mut(target)?;
        let scale = Vec2::new(scale_bias.x, scale_bias.y);
        let bias = Vec2::new(scale_bias.z, scale_bias.w);

        shade(target, |uv| kernel(sample_nearest(&source, uv * scale + bias), properties));
        Ok(())
    }
}

fn is_supported(format: TextureFormat) -> bool {
    matches!(
        format,
        TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Rgba16Float
            | TextureFormat::Rgba32Float
    )
}

fn sample_nearest(image: &Rgba32FImage, uv: Vec2) -> [f32; 4] {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return [0.0; 4];
    }
    let x = ((uv.x * w as f32).floor().max(0.0) as u32).min(w - 1);
    let y = ((uv.y * h as f32).floor().max(0.0) as u32).min(h - 1);
    image.get_pixel(x, y).0
}

/// Runs `fragment` for every texel center of `target`.
fn shade(target: &mut Rgba32FImage, fragment: impl Fn(Vec2) -> [f32; 4]) {
    let (w, h) = target.dimensions();
    for (x, y, px) in target.enumerate_pixels_mut() {
        let uv = Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
        *px = Rgba(fragment(uv));
    }
}

impl GraphBackend for SoftwareBackend {
    fn bind_imported(
        &mut self,
        handle: TextureHandle,
        external: ExternalTextureId,
        desc: &TextureDesc,
    ) -> Result<(), BackendError> {
        ensure!(
            is_supported(desc.format),
            UnsupportedFormatErr {
                format: desc.format
            }
        );
        let image = self
            .externals
            .get(&external)
            .context(UnknownExternalErr { external })?;
        ensure!(
            image.dimensions() == (desc.width, desc.height),
            ImportSizeMismatchErr {
                name: desc.name.as_str(),
                width: desc.width,
                height: desc.height,
                actual_width: image.width(),
                actual_height: image.height(),
            }
        );

        self.bindings.insert(handle, Binding::External(external));
        Ok(())
    }

    fn allocate_transient(
        &mut self,
        handle: TextureHandle,
        desc: &TextureDesc,
    ) -> Result<(), BackendError> {
        ensure!(
            is_supported(desc.format),
            UnsupportedFormatErr {
                format: desc.format
            }
        );
        trace!("Allocating {:?} ({}x{})", desc.name, desc.width, desc.height);

        self.bindings.insert(
            handle,
            Binding::Transient(Rgba32FImage::new(desc.width, desc.height)),
        );
        self.transient_peak = self.transient_peak.max(self.live_transients());
        Ok(())
    }

    fn release_transient(&mut self, handle: TextureHandle) {
        if let Some(Binding::Transient(_)) = self.bindings.get(&handle) {
            self.bindings.remove(&handle);
        }
    }

    fn execute_raster(
        &mut self,
        pass: &RasterPassInfo<'_>,
        commands: &[RasterCommand],
    ) -> Result<(), BackendError> {
        for &(_, handle, desc) in pass.attachments {
            if desc.clear_buffer {
                let clear = Rgba(desc.clear_color);
                self.texture_mut(handle)?.pixels_mut().for_each(|px| *px = clear);
            }
        }

        let Some(&(_, target, _)) = pass.attachments.first() else {
            return Ok(());
        };

        for command in commands {
            match command {
                RasterCommand::DrawFullscreen {
                    source,
                    scale_bias,
                    shader,
                    pass: pass_index,
                    properties,
                } => {
                    let shader_pass =
                        shader
                            .pass(*pass_index)
                            .context(MissingShaderPassErr {
                                shader: shader.path(),
                                pass: *pass_index,
                            })?;
                    let kernel = shader_pass.reference.context(NoReferenceKernelErr {
                        shader: shader.path(),
                        pass: *pass_index,
                    })?;

                    self.draw_fullscreen(target, *source, *scale_bias, kernel, properties)?;
                }
            }
        }

        debug!("{:?} drew {} command(s)", pass.name, commands.len());
        Ok(())
    }

    fn blit(&mut self, blit: &BlitInfo<'_>) -> Result<(), BackendError> {
        if blit.is_identity_copy() {
            let source = self.texture(blit.source)?.clone();
            *self.texture_mut(blit.destination)? = source;
            return Ok(());
        }

        let source = self.texture(blit.source)?.clone();
        let (scale, offset) = (blit.scale, blit.offset);
        let target = self.texture_mut(blit.destination)?;
        shade(target, |uv| sample_nearest(&source, uv * scale + offset));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        let leaked = self.live_transients();
        if leaked > 0 {
            warn!("{leaked} transient texture(s) outlived their graph");
        }
        self.bindings.clear();
        Ok(())
    }

    fn abort(&mut self) {
        debug!("Dropping {} transient texture(s) of an aborted graph", self.live_transients());
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AccessFlags, GraphError, RasterGraphContext, RenderGraph};
    use crate::material::MaterialStore;
    use crate::shader::BLIT_SHADER_PATH;

    fn desc(name: &str) -> TextureDesc {
        TextureDesc::new(name, 2, 2, TextureFormat::Rgba8Unorm)
    }

    fn gradient() -> RgbaImage {
        RgbaImage::from_fn(2, 2, |x, y| Rgba([x as u8 * 200, y as u8 * 100, 50, 255]))
    }

    #[test]
    fn import_and_readback_round_trip() {
        let mut backend = SoftwareBackend::new();
        let source = gradient();
        let id = backend.import_image(&source);

        assert_eq!(backend.image_rgba8(id).unwrap(), source);
        assert!(backend.image_rgba8(ExternalTextureId(99)).is_none());
    }

    #[test]
    fn blit_through_scratch_restores_the_source() {
        let mut backend = SoftwareBackend::new();
        let id = backend.import_image(&gradient());
        let mut graph = RenderGraph::new();
        let camera = graph.import_texture(desc("Camera"), id);
        let scratch = graph.create_texture(desc("Scratch"));

        graph
            .add_blit_pass(camera, scratch, Vec2::ONE, Vec2::ZERO, "To Scratch")
            .unwrap();
        graph
            .add_blit_pass(scratch, camera, Vec2::ONE, Vec2::ZERO, "To Camera")
            .unwrap();

        graph.execute(&mut backend, &mut MaterialStore::new()).unwrap();
        assert_eq!(backend.image_rgba8(id).unwrap(), gradient());
        assert_eq!(backend.live_transients(), 0);
        assert_eq!(backend.transient_peak(), 1);
    }

    #[test]
    fn scaled_blit_samples_a_sub_rectangle() {
        let mut backend = SoftwareBackend::new();
        let src = backend.import_image(&gradient());
        let dst = backend.import_image(&RgbaImage::new(2, 2));
        let mut graph = RenderGraph::new();
        let a = graph.import_texture(desc("A"), src);
        let b = graph.import_texture(desc("B"), dst);

        // zooms into the bottom right texel
        graph
            .add_blit_pass(a, b, Vec2::splat(0.5), Vec2::splat(0.5), "Zoom")
            .unwrap();
        graph.execute(&mut backend, &mut MaterialStore::new()).unwrap();

        let out = backend.image_rgba8(dst).unwrap();
        assert!(out.pixels().all(|px| *px == Rgba([200, 100, 50, 255])));
    }

    #[test]
    fn raster_pass_runs_the_reference_kernel() {
        fn copy(source: &TextureHandle, ctx: &mut RasterGraphContext<'_>) {
            let handle = ctx.materials.create_engine_material(BLIT_SHADER_PATH);
            let material = ctx.materials.get(handle).unwrap();
            crate::blitter::Blitter::blit_texture(ctx.cmd, *source, Vec2::ONE, material, 0);
        }

        let mut backend = SoftwareBackend::new();
        let src = backend.import_image(&gradient());
        let dst = backend.import_image(&RgbaImage::new(2, 2));
        let mut graph = RenderGraph::new();
        let a = graph.import_texture(desc("A"), src);
        let b = graph.import_texture(desc("B"), dst);

        graph
            .add_raster_render_pass("Copy", a, |builder| {
                builder.set_render_attachment(b, 0, AccessFlags::Write)?;
                builder.use_texture(a, AccessFlags::Read)?;
                builder.set_render_func(copy);
                Ok(())
            })
            .unwrap();
        graph.execute(&mut backend, &mut MaterialStore::new()).unwrap();

        assert_eq!(backend.image_rgba8(dst).unwrap(), gradient());
    }

    #[test]
    fn failed_frame_drops_its_transients() {
        fn draw(source: &TextureHandle, ctx: &mut RasterGraphContext<'_>) {
            let handle = ctx.materials.create_engine_material("Test/GpuOnly");
            let material = ctx.materials.get(handle).unwrap();
            crate::blitter::Blitter::blit_texture(ctx.cmd, *source, Vec2::ONE, material, 0);
        }

        let mut materials = MaterialStore::new();
        let gpu_only = crate::shader::Shader::new(
            "Test/GpuOnly",
            include_str!("../shader/shaders/blit.wgsl"),
        )
        .with_pass("Blit", "fs_main", None);
        materials.register_shader(gpu_only).unwrap();

        let mut backend = SoftwareBackend::new();
        let id = backend.import_image(&gradient());
        let mut graph = RenderGraph::new();
        let camera = graph.import_texture(desc("Camera"), id);
        let scratch = graph.create_texture(desc("Scratch"));

        graph
            .add_raster_render_pass("Gpu Only", camera, |builder| {
                builder.set_render_attachment(scratch, 0, AccessFlags::Write)?;
                builder.use_texture(camera, AccessFlags::Read)?;
                builder.set_render_func(draw);
                Ok(())
            })
            .unwrap();
        graph
            .add_blit_pass(scratch, camera, Vec2::ONE, Vec2::ZERO, "To Camera")
            .unwrap();

        let result = graph.execute(&mut backend, &mut materials);
        assert!(matches!(
            result,
            Err(GraphError::Backend {
                source: BackendError::NoReferenceKernel { .. },
                ..
            })
        ));
        assert_eq!(backend.live_transients(), 0);
        assert_eq!(backend.image_rgba8(id).unwrap(), gradient());

        let mut graph = RenderGraph::new();
        let camera = graph.import_texture(desc("Camera"), id);
        let scratch = graph.create_texture(desc("Scratch"));
        graph
            .add_blit_pass(camera, scratch, Vec2::ONE, Vec2::ZERO, "To Scratch")
            .unwrap();
        graph
            .add_blit_pass(scratch, camera, Vec2::ONE, Vec2::ZERO, "To Camera")
            .unwrap();
        graph.execute(&mut backend, &mut materials).unwrap();
        assert_eq!(backend.live_transients(), 0);
        assert_eq!(backend.transient_peak(), 1);
    }

    #[test]
    fn mismatched_import_is_reported() {
        let mut backend = SoftwareBackend::new();
        let id = backend.import_image(&RgbaImage::new(3, 3));

        let result = backend.bind_imported(TextureHandle(0), id, &desc("Camera"));
        assert!(matches!(
            result,
            Err(BackendError::ImportSizeMismatch { .. })
        ));
    }

    #[test]
    fn depth_formats_are_rejected() {
        let mut backend = SoftwareBackend::new();
        let depth = TextureDesc::new("Depth", 2, 2, TextureFormat::Depth32Float);

        let result = backend.allocate_transient(TextureHandle(0), &depth);
        assert!(matches!(
            result,
            Err(BackendError::UnsupportedFormat { .. })
        ));
    }
}
