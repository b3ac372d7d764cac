//! Headless GPU device setup.

use futures::executor::block_on;
use negative_utils::EffectArgs;
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use wgpu::{
    Adapter, Backends, Device, DeviceDescriptor, ExperimentalFeatures, Features, Instance,
    InstanceDescriptor, Limits, MemoryHints, PowerPreference, Queue, RequestAdapterError,
    RequestAdapterOptions, RequestDeviceError,
};

const DEFAULT_BACKENDS: &[Backends] = &[
    Backends::DX12,
    Backends::METAL,
    Backends::VULKAN,
    Backends::GL,
];

type Result<T, E = GpuContextError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)))]
pub enum GpuContextError {
    #[snafu(display("No graphics adapter is available: {source}"))]
    RequestAdapter { source: RequestAdapterError },

    #[snafu(display("Unable to get device: {source}"))]
    RequestDevice { source: RequestDeviceError },
}

fn backend_name(backends: Backends) -> &'static str {
    match backends.iter().next() {
        Some(Backends::METAL) => "metal",
        Some(Backends::DX12) => "dx12",
        Some(Backends::GL) => "opengl",
        Some(Backends::VULKAN) => "vulkan",
        _ => "",
    }
}

/// A device and queue without any surface attached.
pub struct GpuContext {
    adapter: Adapter,
    device: Arc<Device>,
    queue: Arc<Queue>,
}

impl GpuContext {
    /// Opens a device on the first backend of `--force-backend` (or the platform default
    /// order) that exposes an adapter.
    pub fn new_headless() -> Result<Self> {
        let backends = EffectArgs::get()
            .force_backend
            .as_ref()
            .and_then(|o| o.as_deref())
            .unwrap_or(DEFAULT_BACKENDS);

        Self::with_backends(backends)
    }

    // will respect the order of backends passed instead of a plain `Backends`
    pub fn with_backends(backends: &[Backends]) -> Result<Self> {
        trace!("Starting with backends: {:?}", backends);

        for backend in backends {
            let mut desc = InstanceDescriptor::from_env_or_default();
            desc.backends = *backend;

            let instance = Instance::new(&desc);
            match block_on(Self::setup_adapter(&instance)) {
                Ok(adapter) => {
                    info!("Selected backend: {}", backend_name(*backend));
                    return Self::from_adapter(adapter);
                }
                Err(e) => debug!("Failed to start on backend {}: {e}", backend_name(*backend)),
            }
        }

        warn!(
            "Couldn't start on any selected graphics backend. Retrying with all available backends"
        );

        let instance = Instance::new(&InstanceDescriptor::from_env_or_default());
        let adapter = block_on(Self::setup_adapter(&instance)).context(RequestAdapterErr)?;
        Self::from_adapter(adapter)
    }

    async fn setup_adapter(instance: &Instance) -> Result<Adapter, RequestAdapterError> {
        instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                ..RequestAdapterOptions::default()
            })
            .await
    }

    fn from_adapter(adapter: Adapter) -> Result<Self> {
        let (device, queue) = block_on(adapter.request_device(&DeviceDescriptor {
            label: Some("Negative Headless Device"),
            required_features: Features::empty(),
            required_limits: Limits::downlevel_defaults().using_resolution(adapter.limits()),
            experimental_features: ExperimentalFeatures::disabled(),
            memory_hints: MemoryHints::default(),
            trace: wgpu::Trace::Off,
        }))
        .context(RequestDeviceErr)?;

        debug!("Using adapter {:?}", adapter.get_info().name);

        Ok(Self {
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }
}
