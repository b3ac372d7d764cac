//! Devices a compiled [`RenderGraph`](crate::graph::RenderGraph) is replayed on.

mod gpu;
mod software;

pub use gpu::{GpuContext, GpuContextError, ReadbackError, WgpuBackend, read_texture_as_rgba};
pub use software::SoftwareBackend;

use crate::graph::{ExternalTextureId, RasterCommand, TextureDesc, TextureHandle};
use glamx::Vec2;
use snafu::Snafu;
use wgpu::TextureFormat;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)), visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("Texture {handle} has no backing storage"))]
    MissingTexture { handle: TextureHandle },

    #[snafu(display("External texture {external:?} is unknown to the backend"))]
    UnknownExternal { external: ExternalTextureId },

    #[snafu(display("Texture format {format:?} is not supported by this backend"))]
    UnsupportedFormat { format: TextureFormat },

    #[snafu(display("Shader {shader:?} has no pass {pass}"))]
    MissingShaderPass { shader: String, pass: usize },

    #[snafu(display("Shader {shader:?} pass {pass} has no CPU reference kernel"))]
    NoReferenceKernel { shader: String, pass: usize },

    #[snafu(display("Imported texture {name:?} is {actual_width}x{actual_height}, graph expects {width}x{height}"))]
    ImportSizeMismatch {
        name: String,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[snafu(display("Imported texture {name:?} is {actual:?}, graph expects {expected:?}"))]
    ImportFormatMismatch {
        name: String,
        expected: TextureFormat,
        actual: TextureFormat,
    },
}

/// Color attachments of a raster pass: `(slot, handle, descriptor)`, sorted by slot.
pub struct RasterPassInfo<'a> {
    pub name: &'a str,
    pub attachments: &'a [(usize, TextureHandle, &'a TextureDesc)],
}

pub struct BlitInfo<'a> {
    pub name: &'a str,
    pub source: TextureHandle,
    pub source_desc: &'a TextureDesc,
    pub destination: TextureHandle,
    pub destination_desc: &'a TextureDesc,
    pub scale: Vec2,
    pub offset: Vec2,
}

impl BlitInfo<'_> {
    /// A blit that maps every texel 1:1 and may be executed as a plain copy.
    pub fn is_identity_copy(&self) -> bool {
        self.scale == Vec2::ONE
            && self.offset == Vec2::ZERO
            && self.source_desc.has_same_extent(self.destination_desc)
            && self.source_desc.format == self.destination_desc.format
            && self.source_desc.msaa_samples == self.destination_desc.msaa_samples
    }
}

pub trait GraphBackend {
    /// Associates an imported graph texture with storage the backend already owns.
    fn bind_imported(
        &mut self,
        handle: TextureHandle,
        external: ExternalTextureId,
        desc: &TextureDesc,
    ) -> Result<(), BackendError>;

    fn allocate_transient(
        &mut self,
        handle: TextureHandle,
        desc: &TextureDesc,
    ) -> Result<(), BackendError>;

    fn release_transient(&mut self, handle: TextureHandle);

    fn execute_raster(
        &mut self,
        pass: &RasterPassInfo<'_>,
        commands: &[RasterCommand],
    ) -> Result<(), BackendError>;

    fn blit(&mut self, blit: &BlitInfo<'_>) -> Result<(), BackendError>;

    /// Flushes all work of the current graph.
    fn finish(&mut self) -> Result<(), BackendError>;

    /// Throws away the current graph after a failed pass. Transients and work that was
    /// not submitted yet are dropped; imported textures keep whatever was written.
    fn abort(&mut self);
}
