use image::{Rgba, RgbaImage};
use negative::{NegativeVolume, install};
use negative_render::MaterialStore;
use negative_render::backend::{GpuContext, WgpuBackend};
use negative_render::graph::TextureDesc;
use negative_render::pipeline::{CameraData, Renderer};
use negative_render::volume::{Volume, VolumeManager, VolumeProfile};
use wgpu::TextureFormat;

#[test]
#[ignore]
fn inverts_on_the_gpu() {
    let context = GpuContext::new_headless().expect("no adapter available");
    let mut backend = WgpuBackend::new(&context);

    let input = RgbaImage::from_fn(16, 16, |x, _| {
        if x < 8 {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([255, 255, 255, 64])
        }
    });
    let target = backend.import_image(&input);
    let camera = CameraData::new(
        "Main",
        target,
        TextureDesc::new("Camera Color", 16, 16, TextureFormat::Rgba8Unorm),
    );

    let mut renderer = Renderer::new(MaterialStore::new(), VolumeManager::new());
    install(&mut renderer).unwrap();
    let profile = VolumeProfile::new().with(NegativeVolume::with_intensity(1.0));
    renderer.volumes_mut().add_volume(Volume::global(profile));

    renderer.render_camera(&camera, &mut backend).unwrap();
    renderer.render_camera(&camera, &mut backend).unwrap();
    renderer.render_camera(&camera, &mut backend).unwrap();
    assert_eq!(backend.cached_pipelines(), 1);

    let output = backend.read_rgba8(target).unwrap();
    assert_eq!(*output.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
    assert_eq!(*output.get_pixel(15, 15), Rgba([0, 0, 0, 64]));
}
