use std::fmt::{Display, Formatter};
use wgpu::TextureFormat;

/// Frame-scoped reference into a [`RenderGraph`](super::RenderGraph)'s resource table.
///
/// Handles are only meaningful for the graph that produced them and must not be kept
/// across frames.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u32);

impl TextureHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for TextureHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies a texture that lives outside the graph, like a camera target.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExternalTextureId(pub u64);

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum MsaaSamples {
    #[default]
    None,
    X2,
    X4,
    X8,
}

impl MsaaSamples {
    pub fn sample_count(self) -> u32 {
        match self {
            MsaaSamples::None => 1,
            MsaaSamples::X2 => 2,
            MsaaSamples::X4 => 4,
            MsaaSamples::X8 => 8,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessFlags {
    Read,
    Write,
    ReadWrite,
}

impl AccessFlags {
    pub fn reads(self) -> bool {
        matches!(self, AccessFlags::Read | AccessFlags::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, AccessFlags::Write | AccessFlags::ReadWrite)
    }
}

/// Describes a texture the graph can allocate or has imported.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub msaa_samples: MsaaSamples,
    pub depth_buffer_bits: u32,
    pub clear_buffer: bool,
    pub clear_color: [f32; 4],
}

impl TextureDesc {
    pub fn new(name: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            format,
            msaa_samples: MsaaSamples::None,
            depth_buffer_bits: 0,
            clear_buffer: true,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }

    pub fn has_same_extent(&self, other: &TextureDesc) -> bool {
        self.width == other.width && self.height == other.height
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TextureOrigin {
    Imported(ExternalTextureId),
    Transient,
}

#[derive(Debug, Clone)]
pub(crate) struct TextureResource {
    pub desc: TextureDesc,
    pub origin: TextureOrigin,
}

impl TextureResource {
    pub fn is_imported(&self) -> bool {
        matches!(self.origin, TextureOrigin::Imported(_))
    }
}

/// How a pass touches a texture.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TextureUsage {
    ColorAttachment(usize),
    Sampled,
    CopySource,
    CopyDestination,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TextureAccess {
    pub handle: TextureHandle,
    pub access: AccessFlags,
    pub usage: TextureUsage,
}
