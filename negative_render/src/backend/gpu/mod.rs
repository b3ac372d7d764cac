//! wgpu implementation of [`GraphBackend`].

mod context;
mod pipeline;
mod readback;

pub use context::{GpuContext, GpuContextError};
pub use readback::{ReadbackError, read_texture_as_rgba};

use crate::backend::{
    BackendError, BlitInfo, GraphBackend, ImportFormatMismatchErr, ImportSizeMismatchErr,
    MissingShaderPassErr, MissingTextureErr, RasterPassInfo, UnknownExternalErr,
    UnsupportedFormatErr,
};
use crate::graph::{ExternalTextureId, RasterCommand, TextureDesc, TextureHandle};
use crate::material::PropertyBlock;
use crate::shader::Shader;
use glamx::Vec4;
use image::RgbaImage;
use pipeline::{DEPTH_FORMAT, PipelineCache, PipelineKey};
use snafu::{OptionExt, ensure};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    AddressMode, BindGroup, BindGroupDescriptor, BindGroupEntry, BindingResource, BufferUsages,
    Color, CommandEncoder, CommandEncoderDescriptor, Device, Extent3d, FilterMode, LoadOp,
    MipmapFilterMode, Operations, Origin3d, PollType, Queue, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDescriptor, RenderPipeline, Sampler,
    SamplerDescriptor, StoreOp, TexelCopyBufferLayout, TexelCopyTextureInfo, Texture,
    TextureAspect, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages, TextureView,
    TextureViewDescriptor,
};

const COLOR_USAGE: TextureUsages = TextureUsages::RENDER_ATTACHMENT
    .union(TextureUsages::TEXTURE_BINDING)
    .union(TextureUsages::COPY_SRC)
    .union(TextureUsages::COPY_DST);

struct GpuTexture {
    texture: Texture,
    view: TextureView,
}

impl GpuTexture {
    fn new(
        device: &Device,
        label: &str,
        desc: &TextureDesc,
        format: TextureFormat,
        sample_count: u32,
        usage: TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&TextureDescriptor {
            label: Some(label),
            size: Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count,
            dimension: TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());

        GpuTexture { texture, view }
    }
}

/// Render targets that only exist next to a graph texture: a multisampled color
/// buffer resolving into it and a depth buffer.
struct Companions {
    multisampled: Option<GpuTexture>,
    depth: Option<GpuTexture>,
}

impl Companions {
    fn new(device: &Device, desc: &TextureDesc) -> Self {
        let samples = desc.msaa_samples.sample_count();
        let multisampled = (samples > 1).then(|| {
            let label = format!("{} (MSAA)", desc.name);
            GpuTexture::new(
                device,
                &label,
                desc,
                desc.format,
                samples,
                TextureUsages::RENDER_ATTACHMENT,
            )
        });
        let depth = (desc.depth_buffer_bits > 0).then(|| {
            let label = format!("{} (Depth)", desc.name);
            GpuTexture::new(
                device,
                &label,
                desc,
                DEPTH_FORMAT,
                samples,
                TextureUsages::RENDER_ATTACHMENT,
            )
        });

        Self {
            multisampled,
            depth,
        }
    }
}

enum Storage {
    External(ExternalTextureId),
    Transient(GpuTexture),
}

struct Binding {
    storage: Storage,
    companions: Companions,
}

/// One full-screen draw, resolved to GPU objects.
struct PreparedDraw {
    pipeline: RenderPipeline,
    bind_group: BindGroup,
}

pub struct WgpuBackend {
    device: Arc<Device>,
    queue: Arc<Queue>,
    externals: HashMap<ExternalTextureId, GpuTexture>,
    next_external: u64,
    bindings: HashMap<TextureHandle, Binding>,
    pipelines: PipelineCache,
    sampler: Sampler,
    blit_shader: Arc<Shader>,
    encoder: Option<CommandEncoder>,
}

impl WgpuBackend {
    pub fn new(context: &GpuContext) -> Self {
        let device = context.device().clone();
        let queue = context.queue().clone();

        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("Fullscreen Sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: MipmapFilterMode::Nearest,
            ..SamplerDescriptor::default()
        });
        let pipelines = PipelineCache::new(&device);

        Self {
            device,
            queue,
            externals: HashMap::new(),
            next_external: 0,
            bindings: HashMap::new(),
            pipelines,
            sampler,
            blit_shader: Arc::new(Shader::blit()),
            encoder: None,
        }
    }

    /// Uploads `image` into a new `Rgba8Unorm` texture owned by the backend.
    pub fn import_image(&mut self, image: &RgbaImage) -> ExternalTextureId {
        let desc = TextureDesc::new(
            "Imported Image",
            image.width(),
            image.height(),
            TextureFormat::Rgba8Unorm,
        );
        let texture = GpuTexture::new(
            &self.device,
            &desc.name,
            &desc,
            desc.format,
            1,
            COLOR_USAGE,
        );

        self.queue.write_texture(
            TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            image.as_raw(),
            TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * image.width()),
                rows_per_image: Some(image.height()),
            },
            texture.texture.size(),
        );

        self.insert_external(texture)
    }

    /// Registers a texture created elsewhere on the same device. It needs at least
    /// `RENDER_ATTACHMENT | TEXTURE_BINDING | COPY_SRC | COPY_DST` usage.
    pub fn import_texture(&mut self, texture: Texture) -> ExternalTextureId {
        let view = texture.create_view(&TextureViewDescriptor::default());
        self.insert_external(GpuTexture { texture, view })
    }

    fn insert_external(&mut self, texture: GpuTexture) -> ExternalTextureId {
        self.next_external += 1;
        let id = ExternalTextureId(self.next_external);
        self.externals.insert(id, texture);
        id
    }

    pub fn texture(&self, id: ExternalTextureId) -> Option<&Texture> {
        self.externals.get(&id).map(|t| &t.texture)
    }

    pub fn read_rgba8(&self, id: ExternalTextureId) -> Result<RgbaImage, ReadbackError> {
        let texture = self.texture(id).context(readback::UnknownSnafu)?;
        let pixels = read_texture_as_rgba(&self.device, &self.queue, texture)?;

        RgbaImage::from_raw(texture.width(), texture.height(), pixels).context(
            readback::InvalidDimensionsSnafu {
                width: texture.width(),
                height: texture.height(),
            },
        )
    }

    /// Render pipelines created so far.
    pub fn cached_pipelines(&self) -> usize {
        self.pipelines.pipelines()
    }

    fn binding(&self, handle: TextureHandle) -> Result<&Binding, BackendError> {
        self.bindings.get(&handle).context(MissingTextureErr { handle })
    }

    fn view(&self, handle: TextureHandle) -> Result<&TextureView, BackendError> {
        match &self.binding(handle)?.storage {
            Storage::External(id) => self
                .externals
                .get(id)
                .map(|t| &t.view)
                .context(UnknownExternalErr { external: *id }),
            Storage::Transient(texture) => Ok(&texture.view),
        }
    }

    fn gpu_texture(&self, handle: TextureHandle) -> Result<&Texture, BackendError> {
        match &self.binding(handle)?.storage {
            Storage::External(id) => self
                .externals
                .get(id)
                .map(|t| &t.texture)
                .context(UnknownExternalErr { external: *id }),
            Storage::Transient(texture) => Ok(&texture.texture),
        }
    }

    fn take_encoder(&mut self) -> CommandEncoder {
        self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&CommandEncoderDescriptor {
                    label: Some("Render Graph Encoder"),
                })
        })
    }

    fn prepare_draw(
        &mut self,
        target: &TextureDesc,
        source: TextureHandle,
        scale_bias: Vec4,
        shader: &Shader,
        pass: usize,
        properties: &PropertyBlock,
    ) -> Result<PreparedDraw, BackendError> {
        let shader_pass = shader.pass(pass).context(MissingShaderPassErr {
            shader: shader.path(),
            pass,
        })?;

        let key = PipelineKey {
            shader: shader.path().to_string(),
            pass,
            format: target.format,
            sample_count: target.msaa_samples.sample_count(),
            has_depth: target.depth_buffer_bits > 0,
        };
        let pipeline =
            self.pipelines
                .get_or_create(&self.device, shader, key, &shader_pass.fragment_entry);

        // scale_bias, then the float properties, padded to a whole vec4
        let mut uniform = scale_bias.to_array().to_vec();
        uniform.extend(properties.values());
        uniform.resize(uniform.len().next_multiple_of(4), 0.0);

        let buffer = self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("Fullscreen Material Buffer"),
            contents: bytemuck::cast_slice(&uniform),
            usage: BufferUsages::UNIFORM,
        });

        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("Fullscreen Bind Group"),
            layout: self.pipelines.bind_group_layout(),
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(self.view(source)?),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: buffer.as_entire_binding(),
                },
            ],
        });

        Ok(PreparedDraw {
            pipeline,
            bind_group,
        })
    }

    /// Encodes a render pass on `target` that issues `draws` after the optional clear.
    fn encode_draws(
        &mut self,
        label: &str,
        target: TextureHandle,
        clear: Option<[f32; 4]>,
        draws: &[PreparedDraw],
    ) -> Result<(), BackendError> {
        let mut encoder = self.take_encoder();
        {
            let binding = self.binding(target)?;
            let view = self.view(target)?;
            let (color_view, resolve_target) = match &binding.companions.multisampled {
                Some(msaa) => (&msaa.view, Some(view)),
                None => (view, None),
            };

            let load = match clear {
                Some([r, g, b, a]) => LoadOp::Clear(Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                None => LoadOp::Load,
            };

            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: color_view,
                    depth_slice: None,
                    resolve_target,
                    ops: Operations {
                        load,
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: binding.companions.depth.as_ref().map(|depth| {
                    RenderPassDepthStencilAttachment {
                        view: &depth.view,
                        depth_ops: Some(Operations {
                            load: LoadOp::Clear(1.0),
                            store: StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                ..RenderPassDescriptor::default()
            });

            for draw in draws {
                pass.set_pipeline(&draw.pipeline);
                pass.set_bind_group(0, &draw.bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        self.encoder = Some(encoder);
        Ok(())
    }

    fn check_color_format(desc: &TextureDesc) -> Result<(), BackendError> {
        ensure!(
            desc.format.has_color_aspect() && !desc.format.is_compressed(),
            UnsupportedFormatErr {
                format: desc.format
            }
        );
        Ok(())
    }
}

impl GraphBackend for WgpuBackend {
    fn bind_imported(
        &mut self,
        handle: TextureHandle,
        external: ExternalTextureId,
        desc: &TextureDesc,
    ) -> Result<(), BackendError> {
        Self::check_color_format(desc)?;
        let texture = &self
            .externals
            .get(&external)
            .context(UnknownExternalErr { external })?
            .texture;

        ensure!(
            texture.width() == desc.width && texture.height() == desc.height,
            ImportSizeMismatchErr {
                name: desc.name.as_str(),
                width: desc.width,
                height: desc.height,
                actual_width: texture.width(),
                actual_height: texture.height(),
            }
        );
        ensure!(
            texture.format() == desc.format,
            ImportFormatMismatchErr {
                name: desc.name.as_str(),
                expected: desc.format,
                actual: texture.format(),
            }
        );

        let companions = Companions::new(&self.device, desc);
        self.bindings.insert(
            handle,
            Binding {
                storage: Storage::External(external),
                companions,
            },
        );
        Ok(())
    }

    fn allocate_transient(
        &mut self,
        handle: TextureHandle,
        desc: &TextureDesc,
    ) -> Result<(), BackendError> {
        Self::check_color_format(desc)?;
        trace!("Allocating {:?} ({}x{})", desc.name, desc.width, desc.height);

        let texture = GpuTexture::new(&self.device, &desc.name, desc, desc.format, 1, COLOR_USAGE);
        let companions = Companions::new(&self.device, desc);
        self.bindings.insert(
            handle,
            Binding {
                storage: Storage::Transient(texture),
                companions,
            },
        );
        Ok(())
    }

    fn release_transient(&mut self, handle: TextureHandle) {
        if let Some(Binding {
            storage: Storage::Transient(_),
            ..
        }) = self.bindings.get(&handle)
        {
            self.bindings.remove(&handle);
        }
    }

    fn execute_raster(
        &mut self,
        pass: &RasterPassInfo<'_>,
        commands: &[RasterCommand],
    ) -> Result<(), BackendError> {
        let Some((&(_, target, target_desc), others)) = pass.attachments.split_first() else {
            return Ok(());
        };

        // draws go to the first attachment, the others are only cleared
        for &(_, handle, desc) in others {
            if desc.clear_buffer {
                self.encode_draws(pass.name, handle, Some(desc.clear_color), &[])?;
            }
        }

        let mut draws = Vec::with_capacity(commands.len());
        for command in commands {
            match command {
                RasterCommand::DrawFullscreen {
                    source,
                    scale_bias,
                    shader,
                    pass: pass_index,
                    properties,
                } => draws.push(self.prepare_draw(
                    target_desc,
                    *source,
                    *scale_bias,
                    shader,
                    *pass_index,
                    properties,
                )?),
            }
        }

        let clear = target_desc.clear_buffer.then_some(target_desc.clear_color);
        self.encode_draws(pass.name, target, clear, &draws)?;

        debug!("{:?} encoded {} draw(s)", pass.name, draws.len());
        Ok(())
    }

    fn blit(&mut self, blit: &BlitInfo<'_>) -> Result<(), BackendError> {
        if blit.is_identity_copy() {
            let mut encoder = self.take_encoder();
            let source = self.gpu_texture(blit.source)?;
            let destination = self.gpu_texture(blit.destination)?;
            encoder.copy_texture_to_texture(
                source.as_image_copy(),
                destination.as_image_copy(),
                source.size(),
            );
            self.encoder = Some(encoder);
            return Ok(());
        }

        let scale_bias = Vec4::new(blit.scale.x, blit.scale.y, blit.offset.x, blit.offset.y);
        let shader = self.blit_shader.clone();
        let draw = self.prepare_draw(
            blit.destination_desc,
            blit.source,
            scale_bias,
            &shader,
            0,
            &PropertyBlock::default(),
        )?;
        self.encode_draws(blit.name, blit.destination, None, &[draw])
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
        let _ = self.device.poll(PollType::wait_indefinitely());

        let leaked = self
            .bindings
            .values()
            .filter(|b| matches!(b.storage, Storage::Transient(_)))
            .count();
        if leaked > 0 {
            warn!("{leaked} transient texture(s) outlived their graph");
        }
        self.bindings.clear();
        Ok(())
    }

    fn abort(&mut self) {
        if self.encoder.take().is_some() {
            debug!("Discarded unsubmitted commands of an aborted graph");
        }
        self.bindings.clear();
    }
}
