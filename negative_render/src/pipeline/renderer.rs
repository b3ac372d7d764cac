use crate::backend::GraphBackend;
use crate::graph::{CompiledGraph, GraphError, RenderGraph};
use crate::material::MaterialStore;
use crate::pipeline::{CameraData, FrameData, PassQueue, RendererFeature, ResourceData};
use crate::volume::{VolumeManager, VolumeStack};
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, instrument, trace};

type Result<T, E = RenderError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)))]
pub enum RenderError {
    #[snafu(display("The renderer was already disposed"))]
    Disposed,

    #[snafu(display("Pass {pass:?} failed to record: {source}"))]
    Record { pass: String, source: GraphError },

    #[snafu(display("Failed to execute the frame graph: {source}"))]
    Execute { source: GraphError },
}

/// Index of a feature inside its [`Renderer`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FeatureId(usize);

struct FeatureSlot {
    feature: Box<dyn RendererFeature>,
    active: bool,
}

/// Drives features, volumes and materials for every rendered camera.
pub struct Renderer {
    features: Vec<FeatureSlot>,
    materials: MaterialStore,
    volumes: VolumeManager,
    stack: VolumeStack,
    frame_index: u64,
    disposed: bool,
}

impl Renderer {
    pub fn new(materials: MaterialStore, volumes: VolumeManager) -> Self {
        let stack = volumes.create_stack();
        Self {
            features: Vec::new(),
            materials,
            volumes,
            stack,
            frame_index: 0,
            disposed: false,
        }
    }

    /// Takes ownership of `feature` and runs its `create` step.
    pub fn add_feature(&mut self, mut feature: Box<dyn RendererFeature>) -> FeatureId {
        feature.create();
        debug!("Added renderer feature {:?}", feature.name());

        self.features.push(FeatureSlot {
            feature,
            active: true,
        });
        FeatureId(self.features.len() - 1)
    }

    pub fn set_feature_active(&mut self, id: FeatureId, active: bool) {
        if let Some(slot) = self.features.get_mut(id.0) {
            slot.active = active;
        }
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn materials(&self) -> &MaterialStore {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut MaterialStore {
        &mut self.materials
    }

    pub fn volumes(&self) -> &VolumeManager {
        &self.volumes
    }

    pub fn volumes_mut(&mut self) -> &mut VolumeManager {
        &mut self.volumes
    }

    /// The stack as blended for the most recently rendered camera.
    pub fn volume_stack(&self) -> &VolumeStack {
        &self.stack
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Renders one frame for `camera`: blends volumes at the camera position, lets every
    /// active feature enqueue its passes, records them in event order and runs the
    /// resulting graph on `backend`.
    #[instrument(skip_all, fields(camera = %camera.name))]
    #[profiling::function]
    pub fn render_camera(
        &mut self,
        camera: &CameraData,
        backend: &mut dyn GraphBackend,
    ) -> Result<CompiledGraph> {
        ensure!(!self.disposed, DisposedErr);

        self.volumes.update(&mut self.stack, camera.position);

        let mut graph = RenderGraph::new();
        let color = graph.import_texture(camera.color_desc.clone(), camera.target);
        let resources = ResourceData {
            active_color_texture: color,
        };

        let mut queue = PassQueue::new();
        for slot in &mut self.features {
            if slot.active && slot.feature.is_active() {
                slot.feature.add_render_passes(&mut queue, camera);
            }
        }
        trace!("{} pass(es) enqueued", queue.len());

        for pass in queue.into_sorted() {
            let mut frame = FrameData {
                resources: &resources,
                volumes: &self.stack,
                materials: &mut self.materials,
                camera,
            };
            pass.record_render_graph(&mut graph, &mut frame)
                .context(RecordErr { pass: pass.name() })?;
        }

        let compiled = graph
            .execute(backend, &mut self.materials)
            .context(ExecuteErr)?;

        self.frame_index += 1;
        Ok(compiled)
    }

    /// Disposes every feature once. Rendering afterwards fails with
    /// [`RenderError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }

        for slot in &mut self.features {
            slot.feature.dispose(true, &mut self.materials);
        }
        self.disposed = true;
        debug!("Renderer disposed, {} material(s) left", self.materials.len());
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }

        debug!("Renderer dropped without being disposed");
        for slot in &mut self.features {
            slot.feature.dispose(false, &mut self.materials);
        }
    }
}
