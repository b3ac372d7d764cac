use crate::shader::Shader;
use std::collections::HashMap;
use tracing::debug;
use wgpu::{
    BindGroupLayout, BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingType,
    BufferBindingType, ColorTargetState, ColorWrites, CompareFunction, DepthStencilState, Device,
    FragmentState, MultisampleState, PipelineCompilationOptions, PipelineLayout,
    PipelineLayoutDescriptor, PrimitiveState, RenderPipeline, RenderPipelineDescriptor,
    SamplerBindingType, ShaderModule, ShaderModuleDescriptor, ShaderSource, ShaderStages,
    StencilFaceState, StencilState, TextureFormat, TextureSampleType, TextureViewDimension,
    VertexState,
};

pub(super) const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

// full-screen draws never test or write depth, the attachment only has to be compatible
const FULLSCREEN_DEPTH_STENCIL: DepthStencilState = DepthStencilState {
    format: DEPTH_FORMAT,
    depth_write_enabled: false,
    depth_compare: CompareFunction::Always,
    stencil: StencilState {
        front: StencilFaceState::IGNORE,
        back: StencilFaceState::IGNORE,
        read_mask: 0,
        write_mask: 0,
    },
    bias: wgpu::DepthBiasState {
        constant: 0,
        slope_scale: 0.0,
        clamp: 0.0,
    },
};

const FULLSCREEN_ENTRIES: [BindGroupLayoutEntry; 3] = [
    BindGroupLayoutEntry {
        binding: 0,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: false },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    },
    BindGroupLayoutEntry {
        binding: 1,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Sampler(SamplerBindingType::NonFiltering),
        count: None,
    },
    BindGroupLayoutEntry {
        binding: 2,
        visibility: ShaderStages::VERTEX_FRAGMENT,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct PipelineKey {
    pub shader: String,
    pub pass: usize,
    pub format: TextureFormat,
    pub sample_count: u32,
    pub has_depth: bool,
}

/// Shader modules and render pipelines, created on first use and kept for the
/// backend's lifetime.
pub(super) struct PipelineCache {
    bind_group_layout: BindGroupLayout,
    layout: PipelineLayout,
    modules: HashMap<String, ShaderModule>,
    pipelines: HashMap<PipelineKey, RenderPipeline>,
}

impl PipelineCache {
    pub fn new(device: &Device) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Fullscreen Bind Group Layout"),
            entries: &FULLSCREEN_ENTRIES,
        });
        let layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Fullscreen Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        Self {
            bind_group_layout,
            layout,
            modules: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    pub fn bind_group_layout(&self) -> &BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn pipelines(&self) -> usize {
        self.pipelines.len()
    }

    /// Returns the pipeline for `key`. The pass index must exist on `shader`.
    pub fn get_or_create(
        &mut self,
        device: &Device,
        shader: &Shader,
        key: PipelineKey,
        fragment_entry: &str,
    ) -> RenderPipeline {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return pipeline.clone();
        }

        let module = &*self
            .modules
            .entry(shader.path().to_string())
            .or_insert_with(|| {
                debug!("Compiling shader module {:?}", shader.path());
                device.create_shader_module(ShaderModuleDescriptor {
                    label: Some(shader.path()),
                    source: ShaderSource::Wgsl(shader.code().to_string().into()),
                })
            });

        let label = format!("{} Pass {} Pipeline", shader.path(), key.pass);
        let targets = [Some(ColorTargetState {
            format: key.format,
            blend: None,
            write_mask: ColorWrites::all(),
        })];

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(&label),
            layout: Some(&self.layout),
            vertex: VertexState {
                module,
                entry_point: Some("vs_main"),
                compilation_options: PipelineCompilationOptions::default(),
                buffers: &[],
            },
            primitive: PrimitiveState::default(),
            depth_stencil: key.has_depth.then_some(FULLSCREEN_DEPTH_STENCIL),
            multisample: MultisampleState {
                count: key.sample_count,
                ..MultisampleState::default()
            },
            fragment: Some(FragmentState {
                module,
                entry_point: Some(fragment_entry),
                compilation_options: PipelineCompilationOptions::default(),
                targets: &targets,
            }),
            multiview_mask: None,
            cache: None,
        });

        self.pipelines.insert(key, pipeline.clone());
        pipeline
    }
}
