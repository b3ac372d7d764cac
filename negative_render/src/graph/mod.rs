//! A per-frame render graph.
//!
//! Passes declare which textures they read and write instead of synchronizing anything
//! themselves. Recording happens once per camera per frame on the calling thread; the
//! graph then derives dependencies, culls unused work, decides when transient textures
//! live and finally replays everything on a [`GraphBackend`].
//!
//! Render functions are plain `fn` pointers receiving their pass data by reference, so
//! they cannot capture anything the graph doesn't know about.

mod compiler;
mod context;
mod resources;

pub use compiler::CompiledGraph;
pub use context::{RasterCommand, RasterCommandBuffer, RasterGraphContext};
pub use resources::{
    AccessFlags, ExternalTextureId, MsaaSamples, TextureAccess, TextureDesc, TextureHandle,
    TextureOrigin, TextureUsage,
};

use crate::backend::{BackendError, BlitInfo, GraphBackend, RasterPassInfo};
use crate::material::MaterialStore;
use glamx::Vec2;
use resources::TextureResource;
use snafu::{ResultExt, Snafu, ensure};
use tracing::{instrument, trace, warn};

/// Color attachments a single raster pass may bind.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

type Result<T, E = GraphError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)))]
pub enum GraphError {
    #[snafu(display("Texture handle {handle} does not belong to this graph"))]
    InvalidTexture { handle: TextureHandle },

    #[snafu(display("Pass {pass:?} binds attachment slot {index}, only {MAX_COLOR_ATTACHMENTS} exist"))]
    AttachmentOutOfRange { pass: String, index: usize },

    #[snafu(display("Pass {pass:?} binds attachment slot {index} twice"))]
    AttachmentSlotOccupied { pass: String, index: usize },

    #[snafu(display("Raster pass {pass:?} has no render attachment"))]
    NoRenderAttachment { pass: String },

    #[snafu(display("Raster pass {pass:?} has no render function"))]
    MissingRenderFunc { pass: String },

    #[snafu(display("Pass {pass:?} samples {texture:?} while also writing it"))]
    ReadWriteConflict { pass: String, texture: String },

    #[snafu(display("Pass {pass:?} uses {texture:?} without declaring it"))]
    UndeclaredTexture { pass: String, texture: String },

    #[snafu(display("Blit pass {pass:?} copies {texture:?} onto itself"))]
    BlitOntoItself { pass: String, texture: String },

    #[snafu(display("Backend failed while executing pass {pass:?}: {source}"))]
    Backend { pass: String, source: BackendError },
}

pub(crate) trait RasterExec {
    fn execute(&self, ctx: &mut RasterGraphContext<'_>);
}

struct RasterFn<D> {
    data: D,
    func: fn(&D, &mut RasterGraphContext<'_>),
}

impl<D> RasterExec for RasterFn<D> {
    fn execute(&self, ctx: &mut RasterGraphContext<'_>) {
        (self.func)(&self.data, ctx)
    }
}

pub(crate) enum PassKind {
    Raster { exec: Box<dyn RasterExec> },
    Blit { source: TextureHandle, destination: TextureHandle, scale: Vec2, offset: Vec2 },
}

pub(crate) struct RecordedPass {
    pub name: String,
    pub kind: PassKind,
    pub accesses: Vec<TextureAccess>,
    pub allow_culling: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PassType {
    Raster,
    Blit,
}

/// Read-only view of a recorded pass.
#[derive(Debug, Clone)]
pub struct PassInfo<'a> {
    pub index: usize,
    pub name: &'a str,
    pub pass_type: PassType,
    pub accesses: &'a [TextureAccess],
}

impl PassInfo<'_> {
    pub fn writes(&self) -> impl Iterator<Item = &TextureAccess> {
        self.accesses.iter().filter(|a| a.access.writes())
    }

    pub fn reads(&self) -> impl Iterator<Item = &TextureAccess> {
        self.accesses.iter().filter(|a| a.access.reads())
    }
}

/// Declares what a raster pass touches. Handed to the setup closure of
/// [`RenderGraph::add_raster_render_pass`].
pub struct RasterPassBuilder<'g, D> {
    graph: &'g RenderGraph,
    name: String,
    accesses: Vec<TextureAccess>,
    func: Option<fn(&D, &mut RasterGraphContext<'_>)>,
    allow_culling: bool,
}

impl<D> RasterPassBuilder<'_, D> {
    pub fn set_render_attachment(
        &mut self,
        handle: TextureHandle,
        index: usize,
        access: AccessFlags,
    ) -> Result<()> {
        self.graph.check_handle(handle)?;
        ensure!(
            index < MAX_COLOR_ATTACHMENTS,
            AttachmentOutOfRangeErr {
                pass: self.name.as_str(),
                index
            }
        );
        ensure!(
            !self
                .accesses
                .iter()
                .any(|a| a.usage == TextureUsage::ColorAttachment(index)),
            AttachmentSlotOccupiedErr {
                pass: self.name.as_str(),
                index
            }
        );

        self.accesses.push(TextureAccess {
            handle,
            access,
            usage: TextureUsage::ColorAttachment(index),
        });
        Ok(())
    }

    pub fn use_texture(&mut self, handle: TextureHandle, access: AccessFlags) -> Result<()> {
        self.graph.check_handle(handle)?;
        self.accesses.push(TextureAccess {
            handle,
            access,
            usage: TextureUsage::Sampled,
        });
        Ok(())
    }

    pub fn set_render_func(&mut self, func: fn(&D, &mut RasterGraphContext<'_>)) {
        self.func = Some(func);
    }

    pub fn allow_pass_culling(&mut self, allow: bool) {
        self.allow_culling = allow;
    }
}

#[derive(Default)]
pub struct RenderGraph {
    textures: Vec<TextureResource>,
    passes: Vec<RecordedPass>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes an externally owned texture, like a camera target, usable by passes.
    pub fn import_texture(&mut self, desc: TextureDesc, external: ExternalTextureId) -> TextureHandle {
        self.push_texture(desc, TextureOrigin::Imported(external))
    }

    /// Describes a transient texture. Its memory is only provided while passes use it.
    pub fn create_texture(&mut self, desc: TextureDesc) -> TextureHandle {
        self.push_texture(desc, TextureOrigin::Transient)
    }

    fn push_texture(&mut self, desc: TextureDesc, origin: TextureOrigin) -> TextureHandle {
        let handle = TextureHandle(self.textures.len() as u32);
        trace!("Graph texture {handle} {:?} ({origin:?})", desc.name);
        self.textures.push(TextureResource { desc, origin });
        handle
    }

    pub fn texture_desc(&self, handle: TextureHandle) -> Result<TextureDesc> {
        self.resource(handle).map(|res| res.desc.clone())
    }

    pub fn texture_origin(&self, handle: TextureHandle) -> Result<TextureOrigin> {
        self.resource(handle).map(|res| res.origin)
    }

    pub(crate) fn resource(&self, handle: TextureHandle) -> Result<&TextureResource> {
        self.textures
            .get(handle.index())
            .ok_or(GraphError::InvalidTexture { handle })
    }

    fn check_handle(&self, handle: TextureHandle) -> Result<()> {
        self.resource(handle).map(|_| ())
    }

    fn texture_name(&self, handle: TextureHandle) -> String {
        self.resource(handle)
            .map(|res| res.desc.name.clone())
            .unwrap_or_else(|_| handle.to_string())
    }

    /// Records a raster pass. `setup` declares attachments, sampled textures and the
    /// render function; the pass is only added when `setup` succeeds and the declaration
    /// is complete.
    pub fn add_raster_render_pass<D, F>(&mut self, name: &str, data: D, setup: F) -> Result<()>
    where
        D: 'static,
        F: FnOnce(&mut RasterPassBuilder<'_, D>) -> Result<()>,
    {
        let mut builder = RasterPassBuilder {
            graph: self,
            name: name.to_string(),
            accesses: Vec::new(),
            func: None,
            allow_culling: true,
        };
        setup(&mut builder)?;

        let RasterPassBuilder {
            name,
            accesses,
            func,
            allow_culling,
            ..
        } = builder;

        let func = func.ok_or_else(|| GraphError::MissingRenderFunc { pass: name.clone() })?;
        ensure!(
            accesses
                .iter()
                .any(|a| matches!(a.usage, TextureUsage::ColorAttachment(_))),
            NoRenderAttachmentErr { pass: name.as_str() }
        );

        for access in &accesses {
            let sampled_and_written = access.usage == TextureUsage::Sampled
                && accesses.iter().any(|other| {
                    other.handle == access.handle
                        && matches!(other.usage, TextureUsage::ColorAttachment(_))
                        && other.access.writes()
                });
            ensure!(
                !sampled_and_written,
                ReadWriteConflictErr {
                    pass: name.as_str(),
                    texture: self.texture_name(access.handle),
                }
            );
        }

        trace!("Recorded raster pass {name:?}");
        self.passes.push(RecordedPass {
            name,
            kind: PassKind::Raster {
                exec: Box::new(RasterFn { data, func }),
            },
            accesses,
            allow_culling,
        });
        Ok(())
    }

    /// Records a copy of `source` into `destination`, sampling `source` at
    /// `uv * scale + offset` for every destination texel.
    pub fn add_blit_pass(
        &mut self,
        source: TextureHandle,
        destination: TextureHandle,
        scale: Vec2,
        offset: Vec2,
        name: &str,
    ) -> Result<()> {
        self.check_handle(source)?;
        self.check_handle(destination)?;
        ensure!(
            source != destination,
            BlitOntoItselfErr {
                pass: name,
                texture: self.texture_name(source),
            }
        );

        trace!("Recorded blit pass {name:?}");
        self.passes.push(RecordedPass {
            name: name.to_string(),
            kind: PassKind::Blit {
                source,
                destination,
                scale,
                offset,
            },
            accesses: vec![
                TextureAccess {
                    handle: source,
                    access: AccessFlags::Read,
                    usage: TextureUsage::CopySource,
                },
                TextureAccess {
                    handle: destination,
                    access: AccessFlags::Write,
                    usage: TextureUsage::CopyDestination,
                },
            ],
            allow_culling: true,
        });
        Ok(())
    }

    pub fn passes(&self) -> impl ExactSizeIterator<Item = PassInfo<'_>> {
        self.passes.iter().enumerate().map(|(index, pass)| PassInfo {
            index,
            name: &pass.name,
            pass_type: match pass.kind {
                PassKind::Raster { .. } => PassType::Raster,
                PassKind::Blit { .. } => PassType::Blit,
            },
            accesses: &pass.accesses,
        })
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn compile(&self) -> CompiledGraph {
        CompiledGraph::new(&self.textures, &self.passes)
    }

    /// Compiles the graph and replays it on `backend`.
    ///
    /// A failing pass aborts the whole frame: the backend drops its transients and any
    /// work recorded so far, nothing of the frame is submitted.
    #[instrument(skip_all)]
    #[profiling::function]
    pub fn execute(
        self,
        backend: &mut dyn GraphBackend,
        materials: &mut MaterialStore,
    ) -> Result<CompiledGraph> {
        let compiled = self.compile();

        if let Err(e) = self.replay(&compiled, backend, materials) {
            warn!("Frame aborted: {e}");
            backend.abort();
            return Err(e);
        }

        Ok(compiled)
    }

    fn replay(
        &self,
        compiled: &CompiledGraph,
        backend: &mut dyn GraphBackend,
        materials: &mut MaterialStore,
    ) -> Result<()> {
        for (index, res) in self.textures.iter().enumerate() {
            if let TextureOrigin::Imported(external) = res.origin {
                let handle = TextureHandle(index as u32);
                backend
                    .bind_imported(handle, external, &res.desc)
                    .context(BackendErr {
                        pass: "<import>",
                    })?;
            }
        }

        for (step, &pass_index) in compiled.order().iter().enumerate() {
            let pass = &self.passes[pass_index];
            profiling::scope!("graph pass");

            for &handle in compiled.allocations_at(step) {
                let res = &self.textures[handle.index()];
                backend
                    .allocate_transient(handle, &res.desc)
                    .context(BackendErr {
                        pass: pass.name.as_str(),
                    })?;
            }

            self.execute_pass(pass, backend, materials)?;

            for &handle in compiled.releases_at(step) {
                backend.release_transient(handle);
            }
        }

        backend.finish().context(BackendErr { pass: "<submit>" })
    }

    fn execute_pass(
        &self,
        pass: &RecordedPass,
        backend: &mut dyn GraphBackend,
        materials: &mut MaterialStore,
    ) -> Result<()> {
        trace!("Executing pass {:?}", pass.name);

        match &pass.kind {
            PassKind::Raster { exec } => {
                let declared = pass.accesses.iter().map(|a| a.handle).collect();
                let mut cmd = RasterCommandBuffer::new(declared);
                {
                    let mut ctx = RasterGraphContext {
                        cmd: &mut cmd,
                        materials,
                    };
                    exec.execute(&mut ctx);
                }

                let commands = cmd.finish().map_err(|handle| GraphError::UndeclaredTexture {
                    pass: pass.name.clone(),
                    texture: self.texture_name(handle),
                })?;

                let mut attachments: Vec<(usize, TextureHandle, &TextureDesc)> = pass
                    .accesses
                    .iter()
                    .filter_map(|a| match a.usage {
                        TextureUsage::ColorAttachment(slot) => {
                            Some((slot, a.handle, &self.textures[a.handle.index()].desc))
                        }
                        _ => None,
                    })
                    .collect();
                attachments.sort_by_key(|(slot, ..)| *slot);

                let info = RasterPassInfo {
                    name: &pass.name,
                    attachments: &attachments,
                };
                backend
                    .execute_raster(&info, &commands)
                    .context(BackendErr {
                        pass: pass.name.as_str(),
                    })
            }
            PassKind::Blit {
                source,
                destination,
                scale,
                offset,
            } => {
                let info = BlitInfo {
                    name: &pass.name,
                    source: *source,
                    source_desc: &self.textures[source.index()].desc,
                    destination: *destination,
                    destination_desc: &self.textures[destination.index()].desc,
                    scale: *scale,
                    offset: *offset,
                };
                backend.blit(&info).context(BackendErr {
                    pass: pass.name.as_str(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialStore;
    use wgpu::TextureFormat;

    fn noop(_: &(), _: &mut RasterGraphContext<'_>) {}

    fn color_desc(name: &str) -> TextureDesc {
        TextureDesc::new(name, 4, 4, TextureFormat::Rgba8Unorm)
    }

    #[test]
    fn handles_index_the_resource_table() {
        let mut graph = RenderGraph::new();
        let camera = graph.import_texture(color_desc("Camera"), ExternalTextureId(7));
        let scratch = graph.create_texture(color_desc("Scratch"));

        assert_eq!(graph.texture_desc(camera).unwrap().name, "Camera");
        assert_eq!(
            graph.texture_origin(camera).unwrap(),
            TextureOrigin::Imported(ExternalTextureId(7))
        );
        assert_eq!(graph.texture_origin(scratch).unwrap(), TextureOrigin::Transient);
        assert!(matches!(
            graph.texture_desc(TextureHandle(9)),
            Err(GraphError::InvalidTexture { .. })
        ));
    }

    #[test]
    fn raster_pass_requires_render_func_and_attachment() {
        let mut graph = RenderGraph::new();
        let target = graph.create_texture(color_desc("Target"));

        let missing_func = graph.add_raster_render_pass("NoFunc", (), |builder| {
            builder.set_render_attachment(target, 0, AccessFlags::Write)
        });
        assert!(matches!(missing_func, Err(GraphError::MissingRenderFunc { .. })));

        let missing_attachment = graph.add_raster_render_pass("NoTarget", (), |builder| {
            builder.set_render_func(noop);
            Ok(())
        });
        assert!(matches!(
            missing_attachment,
            Err(GraphError::NoRenderAttachment { .. })
        ));
        assert_eq!(graph.pass_count(), 0);
    }

    #[test]
    fn attachment_slots_are_validated() {
        let mut graph = RenderGraph::new();
        let a = graph.create_texture(color_desc("A"));
        let b = graph.create_texture(color_desc("B"));

        let out_of_range = graph.add_raster_render_pass("Range", (), |builder| {
            builder.set_render_attachment(a, MAX_COLOR_ATTACHMENTS, AccessFlags::Write)
        });
        assert!(matches!(
            out_of_range,
            Err(GraphError::AttachmentOutOfRange { .. })
        ));

        let occupied = graph.add_raster_render_pass("Occupied", (), |builder| {
            builder.set_render_attachment(a, 0, AccessFlags::Write)?;
            builder.set_render_attachment(b, 0, AccessFlags::Write)
        });
        assert!(matches!(
            occupied,
            Err(GraphError::AttachmentSlotOccupied { .. })
        ));
    }

    #[test]
    fn sampling_a_written_attachment_is_rejected() {
        let mut graph = RenderGraph::new();
        let a = graph.create_texture(color_desc("A"));

        let result = graph.add_raster_render_pass("Feedback", (), |builder| {
            builder.set_render_attachment(a, 0, AccessFlags::Write)?;
            builder.use_texture(a, AccessFlags::Read)?;
            builder.set_render_func(noop);
            Ok(())
        });
        assert!(matches!(result, Err(GraphError::ReadWriteConflict { .. })));
    }

    #[test]
    fn blit_onto_itself_is_rejected() {
        let mut graph = RenderGraph::new();
        let a = graph.create_texture(color_desc("A"));

        let result = graph.add_blit_pass(a, a, Vec2::ONE, Vec2::ZERO, "Self");
        assert!(matches!(result, Err(GraphError::BlitOntoItself { .. })));
    }

    #[test]
    fn undeclared_source_fails_execution() {
        fn sample_undeclared(data: &TextureHandle, ctx: &mut RasterGraphContext<'_>) {
            let material = ctx.materials.create_engine_material(crate::shader::BLIT_SHADER_PATH);
            let material = ctx.materials.get(material).unwrap();
            crate::blitter::Blitter::blit_texture(ctx.cmd, *data, Vec2::ONE, material, 0);
        }

        let mut backend = crate::backend::SoftwareBackend::new();
        let external = backend.import_image(&image::RgbaImage::new(4, 4));

        let mut graph = RenderGraph::new();
        let camera = graph.import_texture(color_desc("Camera"), external);
        let target = graph.create_texture(color_desc("Target"));
        graph
            .add_raster_render_pass("Sneaky", camera, |builder| {
                builder.set_render_attachment(target, 0, AccessFlags::Write)?;
                builder.allow_pass_culling(false);
                builder.set_render_func(sample_undeclared);
                Ok(())
            })
            .unwrap();

        let mut materials = MaterialStore::new();
        let result = graph.execute(&mut backend, &mut materials);
        assert!(matches!(result, Err(GraphError::UndeclaredTexture { .. })));
    }
}
