//! Renders the negative effect over an image without a window.
//!
//! ```text
//! cargo run -p negative --example headless -- --input in.png --output out.png --intensity 0.8
//! cargo run -p negative --example headless -- --backend gpu --force-backend vulkan
//! ```

use image::{ImageError, Rgba, RgbaImage};
use negative::{NegativeVolume, install};
use negative_render::MaterialStore;
use negative_render::backend::{
    GpuContext, GpuContextError, GraphBackend, ReadbackError, SoftwareBackend, WgpuBackend,
};
use negative_render::graph::{ExternalTextureId, TextureDesc};
use negative_render::pipeline::{CameraData, RenderError, Renderer};
use negative_render::shader::ShaderError;
use negative_render::volume::{Volume, VolumeManager, VolumeProfile};
use negative_utils::{EffectArgs, ExecutionBackend};
use snafu::{OptionExt, ResultExt, Snafu};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use wgpu::TextureFormat;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Err)))]
enum DemoError {
    #[snafu(display("Failed to load {}: {source}", path.display()))]
    Load { path: PathBuf, source: ImageError },

    #[snafu(display("Failed to write {}: {source}", path.display()))]
    Save { path: PathBuf, source: ImageError },

    #[snafu(display("Failed to install the negative effect: {source}"))]
    Install { source: ShaderError },

    #[snafu(display("No usable GPU: {source}"))]
    Gpu { source: GpuContextError },

    #[snafu(display("Frame {frame} failed: {source}"))]
    Render { frame: u32, source: RenderError },

    #[snafu(display("Failed to read the camera target back: {source}"))]
    Readback { source: ReadbackError },

    #[snafu(display("The camera target is no longer known to the backend"))]
    MissingTarget,
}

enum Device {
    Software(SoftwareBackend),
    Gpu(WgpuBackend),
}

impl Device {
    fn new(backend: ExecutionBackend) -> Result<Self, DemoError> {
        Ok(match backend {
            ExecutionBackend::Software => Device::Software(SoftwareBackend::new()),
            ExecutionBackend::Gpu => {
                let context = GpuContext::new_headless().context(GpuErr)?;
                Device::Gpu(WgpuBackend::new(&context))
            }
        })
    }

    fn import(&mut self, image: &RgbaImage) -> ExternalTextureId {
        match self {
            Device::Software(backend) => backend.import_image(image),
            Device::Gpu(backend) => backend.import_image(image),
        }
    }

    fn backend(&mut self) -> &mut dyn GraphBackend {
        match self {
            Device::Software(backend) => backend,
            Device::Gpu(backend) => backend,
        }
    }

    fn read(&self, target: ExternalTextureId) -> Result<RgbaImage, DemoError> {
        match self {
            Device::Software(backend) => backend.image_rgba8(target).context(MissingTargetErr),
            Device::Gpu(backend) => backend.read_rgba8(target).context(ReadbackErr),
        }
    }
}

fn gradient() -> RgbaImage {
    RgbaImage::from_fn(256, 128, |x, y| Rgba([x as u8, (y * 2) as u8, 160, 255]))
}

fn run(args: &EffectArgs) -> Result<(), DemoError> {
    let input = match &args.input {
        Some(path) => image::open(path).context(LoadErr { path })?.to_rgba8(),
        None => gradient(),
    };
    let output = args.output.clone().unwrap_or_else(|| PathBuf::from("negative.png"));

    let mut renderer = Renderer::new(MaterialStore::new(), VolumeManager::new());
    let feature = install(&mut renderer).context(InstallErr)?;
    renderer.set_feature_active(feature, !args.no_effect);

    let profile = VolumeProfile::new().with(NegativeVolume::with_intensity(
        args.intensity.unwrap_or(1.0),
    ));
    renderer.volumes_mut().add_volume(Volume::global(profile));

    let mut device = Device::new(args.execution_backend())?;
    let target = device.import(&input);
    let camera = CameraData::new(
        "Headless",
        target,
        TextureDesc::new("Camera Color", input.width(), input.height(), TextureFormat::Rgba8Unorm),
    );

    for frame in 0..args.frame_count() {
        let compiled = renderer
            .render_camera(&camera, device.backend())
            .context(RenderErr { frame })?;
        info!("Frame {frame}: {} pass(es) executed", compiled.order().len());
    }

    let result = device.read(target)?;
    result.save(&output).context(SaveErr { path: &output })?;
    info!("Wrote {}", output.display());

    renderer.dispose();
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env()))
        .init();

    if let Err(e) = run(EffectArgs::get()) {
        error!("{e}");
    }
}
