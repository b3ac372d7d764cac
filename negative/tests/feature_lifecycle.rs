use image::RgbaImage;
use negative::shader::register_negative_shader;
use negative::{NegativeRendererFeature, NegativeVolume, install};
use negative_render::MaterialStore;
use negative_render::backend::SoftwareBackend;
use negative_render::graph::{RenderGraph, TextureDesc};
use negative_render::pipeline::{
    CameraData, FrameData, PassQueue, RenderError, Renderer, RendererFeature, ResourceData,
    ScriptableRenderPass,
};
use negative_render::volume::VolumeManager;
use wgpu::TextureFormat;

fn camera(backend: &mut SoftwareBackend) -> CameraData {
    let target = backend.import_image(&RgbaImage::new(8, 8));
    CameraData::new(
        "Main",
        target,
        TextureDesc::new("Camera Color", 8, 8, TextureFormat::Rgba8Unorm),
    )
}

#[test]
fn create_builds_the_pass_without_a_material() {
    let mut feature = NegativeRendererFeature::new();
    assert!(feature.pass().is_none());

    feature.create();
    let pass = feature.pass().unwrap();
    assert!(!pass.has_material());
}

#[test]
fn enqueues_exactly_one_pass_per_frame() {
    let mut backend = SoftwareBackend::new();
    let camera = camera(&mut backend);
    let mut feature = NegativeRendererFeature::new();
    feature.create();

    let mut queue = PassQueue::new();
    feature.add_render_passes(&mut queue, &camera);
    assert_eq!(queue.len(), 1);

    let passes = queue.into_sorted();
    assert_eq!(passes[0].name(), "NegativeRenderPass");
}

#[test]
fn dispose_releases_the_material_once() {
    let mut backend = SoftwareBackend::new();
    let camera = camera(&mut backend);

    let mut renderer = Renderer::new(MaterialStore::new(), VolumeManager::new());
    install(&mut renderer).unwrap();
    renderer.render_camera(&camera, &mut backend).unwrap();
    assert_eq!(renderer.materials().len(), 1);

    renderer.dispose();
    assert!(renderer.materials().is_empty());
    renderer.dispose();

    let result = renderer.render_camera(&camera, &mut backend);
    assert!(matches!(result, Err(RenderError::Disposed)));
}

#[test]
fn only_a_disposing_dispose_releases_the_material() {
    let mut backend = SoftwareBackend::new();
    let camera = camera(&mut backend);
    let mut materials = MaterialStore::new();
    register_negative_shader(&mut materials).unwrap();
    let mut volumes = VolumeManager::new();
    volumes.register_component::<NegativeVolume>();
    let stack = volumes.create_stack();

    let mut feature = NegativeRendererFeature::new();
    feature.create();

    let mut graph = RenderGraph::new();
    let resources = ResourceData {
        active_color_texture: graph.import_texture(camera.color_desc.clone(), camera.target),
    };
    let mut queue = PassQueue::new();
    feature.add_render_passes(&mut queue, &camera);
    for pass in queue.into_sorted() {
        let mut frame = FrameData {
            resources: &resources,
            volumes: &stack,
            materials: &mut materials,
            camera: &camera,
        };
        pass.record_render_graph(&mut graph, &mut frame).unwrap();
    }

    let material = feature.pass().unwrap().material().unwrap();
    assert!(materials.contains(material));

    feature.dispose(false, &mut materials);
    assert!(materials.contains(material));
    assert!(feature.pass().unwrap().has_material());

    feature.dispose(true, &mut materials);
    assert!(!materials.contains(material));
    assert!(materials.is_empty());
    assert!(!feature.pass().unwrap().has_material());
}

#[test]
fn inactive_feature_records_nothing() {
    let mut backend = SoftwareBackend::new();
    let camera = camera(&mut backend);

    let mut renderer = Renderer::new(MaterialStore::new(), VolumeManager::new());
    let id = install(&mut renderer).unwrap();
    renderer.set_feature_active(id, false);

    let compiled = renderer.render_camera(&camera, &mut backend).unwrap();
    assert!(compiled.order().is_empty());
    assert!(renderer.materials().is_empty());
    assert_eq!(backend.transient_peak(), 0);
}

#[test]
fn installing_twice_rejects_the_shader() {
    let mut renderer = Renderer::new(MaterialStore::new(), VolumeManager::new());
    install(&mut renderer).unwrap();
    assert!(install(&mut renderer).is_err());
    assert_eq!(renderer.feature_count(), 1);
}
