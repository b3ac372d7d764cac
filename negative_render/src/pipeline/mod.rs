//! Per-camera pass scheduling.
//!
//! [`RendererFeature`]s own [`ScriptableRenderPass`]es and enqueue them every frame.
//! The [`Renderer`] orders the queue by [`RenderPassEvent`] and lets each pass record
//! into the camera's [`RenderGraph`].

mod renderer;

pub use renderer::{FeatureId, RenderError, Renderer};

use crate::graph::{ExternalTextureId, GraphError, RenderGraph, TextureDesc, TextureHandle};
use crate::material::MaterialStore;
use crate::volume::VolumeStack;
use glamx::Vec3;

/// Where in the frame a pass is injected. Numbered like the slots of URP so that
/// passes may be placed in between by value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum RenderPassEvent {
    BeforeRendering = 0,
    BeforeRenderingShadows = 50,
    AfterRenderingShadows = 100,
    BeforeRenderingPrePasses = 150,
    AfterRenderingPrePasses = 200,
    BeforeRenderingGbuffer = 210,
    AfterRenderingGbuffer = 220,
    BeforeRenderingDeferredLights = 230,
    AfterRenderingDeferredLights = 240,
    BeforeRenderingOpaques = 250,
    AfterRenderingOpaques = 300,
    BeforeRenderingSkybox = 350,
    AfterRenderingSkybox = 400,
    BeforeRenderingTransparents = 450,
    AfterRenderingTransparents = 500,
    BeforeRenderingPostProcessing = 550,
    AfterRenderingPostProcessing = 600,
    AfterRendering = 1000,
}

impl RenderPassEvent {
    pub fn value(self) -> i32 {
        self as i32
    }
}

/// The camera a frame is rendered for.
#[derive(Debug, Clone)]
pub struct CameraData {
    pub name: String,
    /// Backend texture the camera renders into.
    pub target: ExternalTextureId,
    pub color_desc: TextureDesc,
    pub position: Vec3,
}

impl CameraData {
    pub fn new(name: impl Into<String>, target: ExternalTextureId, color_desc: TextureDesc) -> Self {
        Self {
            name: name.into(),
            target,
            color_desc,
            position: Vec3::ZERO,
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }
}

/// Graph textures shared between passes of one camera.
#[derive(Debug, Copy, Clone)]
pub struct ResourceData {
    /// Color texture the camera currently renders to.
    pub active_color_texture: TextureHandle,
}

/// Everything a pass may read while recording.
pub struct FrameData<'a> {
    pub resources: &'a ResourceData,
    pub volumes: &'a VolumeStack,
    pub materials: &'a mut MaterialStore,
    pub camera: &'a CameraData,
}

pub trait ScriptableRenderPass {
    fn name(&self) -> &str;

    fn render_pass_event(&self) -> RenderPassEvent;

    /// Declares this frame's work on `graph`. Runs once per camera per frame.
    fn record_render_graph(
        &mut self,
        graph: &mut RenderGraph,
        frame: &mut FrameData<'_>,
    ) -> Result<(), GraphError>;
}

pub trait RendererFeature {
    fn name(&self) -> &str;

    /// Called once when the feature is added to a renderer.
    fn create(&mut self);

    fn is_active(&self) -> bool {
        true
    }

    /// Enqueues this frame's passes for `camera`.
    fn add_render_passes<'a>(&'a mut self, queue: &mut PassQueue<'a>, camera: &CameraData);

    /// Releases owned resources. `disposing` is false when the renderer is dropped
    /// without being disposed.
    fn dispose(&mut self, disposing: bool, materials: &mut MaterialStore);
}

/// Passes enqueued for one camera, borrowed from their features.
#[derive(Default)]
pub struct PassQueue<'a> {
    passes: Vec<&'a mut dyn ScriptableRenderPass>,
}

impl<'a> PassQueue<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, pass: &'a mut dyn ScriptableRenderPass) {
        self.passes.push(pass);
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Passes ordered by event; passes of the same event keep their enqueue order.
    pub fn into_sorted(mut self) -> Vec<&'a mut dyn ScriptableRenderPass> {
        self.passes.sort_by_key(|pass| pass.render_pass_event());
        self.passes
    }
}
