//! wgpu backend implementation (headless).
//!
//! wgpu has no mutable fixed-function state: pipelines are immutable
//! objects. The [`StateEmitter`] calls therefore fold into a current-state
//! key, and draws resolve that key against a pipeline cache, creating the
//! `wgpu::RenderPipeline` on first use. Framebuffers are sets of texture
//! views replayed as render-pass attachments.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::state::{BlendStateDesc, PipelineStateDesc, StencilStateDesc};

/// How a texture binds in a shader, derived from its format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TexBindKind {
    Filterable,
    Unfilterable,
    Depth,
}

impl TexBindKind {
    fn of(format: TextureFormat) -> Self {
        if format.is_depth() {
            TexBindKind::Depth
        } else if matches!(
            format,
            TextureFormat::R32Float | TextureFormat::Rg32Float | TextureFormat::Rgba32Float
        ) {
            TexBindKind::Unfilterable
        } else {
            TexBindKind::Filterable
        }
    }
}

/// Cache key resolving the folded state to one immutable pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader: u64,
    layout: InputLayout,
    colors: Vec<TextureFormat>,
    depth: Option<TextureFormat>,
    blend: BlendStateDesc,
    cull: CullMode,
    depth_test: bool,
    depth_write: bool,
    depth_compare: CompareFunction,
    bias_constant_bits: u32,
    bias_slope_bits: u32,
    stencil: StencilStateDesc,
    textures: Vec<TexBindKind>,
}

struct ShaderEntry {
    module: wgpu::ShaderModule,
    vs_entry: String,
    fs_entry: Option<String>,
}

/// Headless wgpu backend.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: DeviceCaps,

    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, (wgpu::Texture, TextureDescriptor)>,
    views: HashMap<u64, (wgpu::TextureView, u64)>,
    shaders: HashMap<u64, ShaderEntry>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    next_id: u64,

    current_state: PipelineStateDesc,
    bound_framebuffer: Option<u64>,

    pipeline_cache: Mutex<HashMap<PipelineKey, Arc<wgpu::RenderPipeline>>>,
    layout_cache: Mutex<HashMap<Vec<TexBindKind>, Arc<wgpu::BindGroupLayout>>>,
    uniform_layout: wgpu::BindGroupLayout,
    filtering_sampler: wgpu::Sampler,
    non_filtering_sampler: wgpu::Sampler,
    comparison_sampler: wgpu::Sampler,
}

impl WgpuBackend {
    /// Acquire a headless device on the best available adapter.
    pub fn new() -> BackendResult<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| BackendError::InitializationFailed("no suitable adapter".into()))?;

        let mut required_features = wgpu::Features::empty();
        let has_bc = adapter
            .features()
            .contains(wgpu::Features::TEXTURE_COMPRESSION_BC);
        if has_bc {
            required_features |= wgpu::Features::TEXTURE_COMPRESSION_BC;
        }

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("deferred-engine device"),
                required_features,
                required_limits: wgpu::Limits::default(),
            },
            None,
        ))
        .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let mut formats = vec![
            TextureFormat::R8Unorm,
            TextureFormat::Rg8Unorm,
            TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float,
            TextureFormat::R16Float,
            TextureFormat::R32Float,
            TextureFormat::Rg16Float,
            TextureFormat::Rg32Float,
            TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8,
        ];
        if has_bc {
            formats.extend([
                TextureFormat::Bc1RgbaUnorm,
                TextureFormat::Bc3RgbaUnorm,
                TextureFormat::Bc5RgUnorm,
            ]);
        }
        let max_texture_size = device.limits().max_texture_dimension_2d;
        let caps = DeviceCaps::new(formats, max_texture_size);

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let filtering_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("filtering"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let non_filtering_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("non-filtering"),
            ..Default::default()
        });
        let comparison_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("comparison"),
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        Ok(Self {
            device,
            queue,
            caps,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            shaders: HashMap::new(),
            framebuffers: HashMap::new(),
            next_id: 1,
            current_state: PipelineStateDesc::default(),
            bound_framebuffer: None,
            pipeline_cache: Mutex::new(HashMap::new()),
            layout_cache: Mutex::new(HashMap::new()),
            uniform_layout,
            filtering_sampler,
            non_filtering_sampler,
            comparison_sampler,
        })
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn convert_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
            TextureFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
            TextureFormat::Bc1RgbaUnorm => wgpu::TextureFormat::Bc1RgbaUnorm,
            TextureFormat::Bc3RgbaUnorm => wgpu::TextureFormat::Bc3RgbaUnorm,
            TextureFormat::Bc5RgUnorm => wgpu::TextureFormat::Bc5RgUnorm,
        }
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::COPY_DST;
        if usage.contains(BufferUsage::MAP_READ) {
            result |= wgpu::BufferUsages::MAP_READ;
        }
        if usage.contains(BufferUsage::MAP_WRITE) {
            result |= wgpu::BufferUsages::MAP_WRITE;
        }
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        if usage.contains(BufferUsage::STORAGE) {
            result |= wgpu::BufferUsages::STORAGE;
        }
        result
    }

    fn convert_compare(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::Src => wgpu::BlendFactor::Src,
            BlendFactor::OneMinusSrc => wgpu::BlendFactor::OneMinusSrc,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::Dst => wgpu::BlendFactor::Dst,
            BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
            BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
            BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        }
    }

    fn convert_blend_op(op: BlendOperation) -> wgpu::BlendOperation {
        match op {
            BlendOperation::Add => wgpu::BlendOperation::Add,
            BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
            BlendOperation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
            BlendOperation::Min => wgpu::BlendOperation::Min,
            BlendOperation::Max => wgpu::BlendOperation::Max,
        }
    }

    fn convert_stencil_op(op: StencilOperation) -> wgpu::StencilOperation {
        match op {
            StencilOperation::Keep => wgpu::StencilOperation::Keep,
            StencilOperation::Zero => wgpu::StencilOperation::Zero,
            StencilOperation::Replace => wgpu::StencilOperation::Replace,
            StencilOperation::Invert => wgpu::StencilOperation::Invert,
            StencilOperation::IncrementClamp => wgpu::StencilOperation::IncrementClamp,
            StencilOperation::DecrementClamp => wgpu::StencilOperation::DecrementClamp,
            StencilOperation::IncrementWrap => wgpu::StencilOperation::IncrementWrap,
            StencilOperation::DecrementWrap => wgpu::StencilOperation::DecrementWrap,
        }
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32 => wgpu::VertexFormat::Float32,
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
            VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
        }
    }

    fn convert_stencil_face(face: &StencilFaceDesc) -> wgpu::StencilFaceState {
        wgpu::StencilFaceState {
            compare: Self::convert_compare(face.compare),
            fail_op: Self::convert_stencil_op(face.fail_op),
            depth_fail_op: Self::convert_stencil_op(face.depth_fail_op),
            pass_op: Self::convert_stencil_op(face.pass_op),
        }
    }

    fn texture_binding_layout(&self, kinds: &[TexBindKind]) -> Arc<wgpu::BindGroupLayout> {
        let mut cache = self.layout_cache.lock();
        if let Some(layout) = cache.get(kinds) {
            return Arc::clone(layout);
        }
        let mut entries = Vec::with_capacity(kinds.len() * 2);
        for (index, kind) in kinds.iter().enumerate() {
            let (sample_type, sampler_type) = match kind {
                TexBindKind::Filterable => (
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::SamplerBindingType::Filtering,
                ),
                TexBindKind::Unfilterable => (
                    wgpu::TextureSampleType::Float { filterable: false },
                    wgpu::SamplerBindingType::NonFiltering,
                ),
                TexBindKind::Depth => (
                    wgpu::TextureSampleType::Depth,
                    wgpu::SamplerBindingType::Comparison,
                ),
            };
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: (index * 2) as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: (index * 2 + 1) as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(sampler_type),
                count: None,
            });
        }
        let layout = Arc::new(self.device.create_bind_group_layout(
            &wgpu::BindGroupLayoutDescriptor {
                label: Some("texture layout"),
                entries: &entries,
            },
        ));
        cache.insert(kinds.to_vec(), Arc::clone(&layout));
        layout
    }

    fn framebuffer_attachments(
        &self,
        id: u64,
    ) -> Option<(Vec<(&wgpu::TextureView, TextureFormat)>, Option<(&wgpu::TextureView, TextureFormat)>)>
    {
        let desc = self.framebuffers.get(&id)?;
        let mut colors = Vec::with_capacity(desc.color_views.len());
        for view in &desc.color_views {
            let (wgpu_view, texture) = self.views.get(&view.0)?;
            let format = self.textures.get(texture)?.1.format;
            colors.push((wgpu_view, format));
        }
        let depth = match &desc.depth_view {
            Some(view) => {
                let (wgpu_view, texture) = self.views.get(&view.0)?;
                let format = self.textures.get(texture)?.1.format;
                Some((wgpu_view, format))
            }
            None => None,
        };
        Some((colors, depth))
    }

    fn resolve_pipeline(&self, key: &PipelineKey) -> BackendResult<Arc<wgpu::RenderPipeline>> {
        {
            let cache = self.pipeline_cache.lock();
            if let Some(pipeline) = cache.get(key) {
                return Ok(Arc::clone(pipeline));
            }
        }

        let shader = self
            .shaders
            .get(&key.shader)
            .ok_or(BackendError::UnknownHandle)?;

        let texture_layout = self.texture_binding_layout(&key.textures);
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("pipeline layout"),
                bind_group_layouts: &[&self.uniform_layout, texture_layout.as_ref()],
                push_constant_ranges: &[],
            });

        let attributes: Vec<wgpu::VertexAttribute> = key
            .layout
            .attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                shader_location: a.location,
                format: Self::convert_vertex_format(a.format),
                offset: a.offset,
            })
            .collect();
        let vertex_buffers = if key.layout.stride > 0 {
            vec![wgpu::VertexBufferLayout {
                array_stride: key.layout.stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }]
        } else {
            Vec::new()
        };

        let blend = key.blend.enabled.then(|| wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: Self::convert_blend_factor(key.blend.color.src_factor),
                dst_factor: Self::convert_blend_factor(key.blend.color.dst_factor),
                operation: Self::convert_blend_op(key.blend.color.operation),
            },
            alpha: wgpu::BlendComponent {
                src_factor: Self::convert_blend_factor(key.blend.alpha.src_factor),
                dst_factor: Self::convert_blend_factor(key.blend.alpha.dst_factor),
                operation: Self::convert_blend_op(key.blend.alpha.operation),
            },
        });
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .colors
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: Self::convert_format(*format),
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let depth_stencil = key.depth.map(|format| wgpu::DepthStencilState {
            format: Self::convert_format(format),
            depth_write_enabled: key.depth_write,
            depth_compare: if key.depth_test {
                Self::convert_compare(key.depth_compare)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: if key.stencil.enabled {
                wgpu::StencilState {
                    front: Self::convert_stencil_face(&key.stencil.front),
                    back: Self::convert_stencil_face(&key.stencil.back),
                    read_mask: key.stencil.front.read_mask,
                    write_mask: key.stencil.front.write_mask,
                }
            } else {
                wgpu::StencilState::default()
            },
            bias: wgpu::DepthBiasState {
                constant: f32::from_bits(key.bias_constant_bits) as i32,
                slope_scale: f32::from_bits(key.bias_slope_bits),
                clamp: 0.0,
            },
        });

        let cull_mode = match key.cull {
            CullMode::None => None,
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::Back => Some(wgpu::Face::Back),
        };

        let fragment = shader.fs_entry.as_deref().map(|entry| wgpu::FragmentState {
            module: &shader.module,
            entry_point: entry,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &targets,
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("cached pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader.module,
                    entry_point: &shader.vs_entry,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &vertex_buffers,
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                fragment,
                multiview: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::DrawFailed(format!(
                "pipeline creation failed: {err}"
            )));
        }

        let pipeline = Arc::new(pipeline);
        self.pipeline_cache
            .lock()
            .insert(key.clone(), Arc::clone(&pipeline));
        Ok(pipeline)
    }

    fn sampler_for(&self, kind: TexBindKind) -> &wgpu::Sampler {
        match kind {
            TexBindKind::Filterable => &self.filtering_sampler,
            TexBindKind::Unfilterable => &self.non_filtering_sampler,
            TexBindKind::Depth => &self.comparison_sampler,
        }
    }
}

impl StateEmitter for WgpuBackend {
    // State calls fold into the current descriptor; the pipeline cache key
    // picks them up at draw time.

    fn set_blend_enabled(&mut self, enabled: bool) {
        self.current_state.blend.enabled = enabled;
    }

    fn set_blend_func(
        &mut self,
        color_src: BlendFactor,
        color_dst: BlendFactor,
        alpha_src: BlendFactor,
        alpha_dst: BlendFactor,
    ) {
        self.current_state.blend.color.src_factor = color_src;
        self.current_state.blend.color.dst_factor = color_dst;
        self.current_state.blend.alpha.src_factor = alpha_src;
        self.current_state.blend.alpha.dst_factor = alpha_dst;
    }

    fn set_blend_op(&mut self, color_op: BlendOperation, alpha_op: BlendOperation) {
        self.current_state.blend.color.operation = color_op;
        self.current_state.blend.alpha.operation = alpha_op;
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.current_state.raster.cull_mode = mode;
    }

    fn set_fill_mode(&mut self, mode: FillMode) {
        // Wireframe needs NON_FILL_POLYGON_MODE; solid is always available.
        if mode == FillMode::Wireframe {
            log::warn!("wireframe fill requested; not supported on this device");
        }
        self.current_state.raster.fill_mode = FillMode::Solid;
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        self.current_state.raster.scissor = rect;
    }

    fn set_srgb_write(&mut self, enabled: bool) {
        self.current_state.raster.srgb_write = enabled;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.current_state.depth.test_enabled = enabled;
    }

    fn set_depth_func(&mut self, func: CompareFunction) {
        self.current_state.depth.compare = func;
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.current_state.depth.write_enabled = enabled;
    }

    fn set_depth_bias(&mut self, constant: f32, slope_scale: f32) {
        self.current_state.depth.bias_constant = constant;
        self.current_state.depth.bias_slope_scale = slope_scale;
    }

    fn set_stencil_enabled(&mut self, enabled: bool) {
        self.current_state.stencil.enabled = enabled;
    }

    fn set_stencil(&mut self, face: &StencilFaceDesc) {
        self.current_state.stencil.front = *face;
        self.current_state.stencil.back = *face;
    }

    fn set_stencil_separate(&mut self, front: &StencilFaceDesc, back: &StencilFaceDesc) {
        self.current_state.stencil.front = *front;
        self.current_state.stencil.back = *back;
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu Backend"
    }

    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if !self.caps.supports_format(desc.format) {
            return Err(BackendError::UnsupportedFormat(desc.format));
        }
        if desc.width == 0
            || desc.height == 0
            || desc.width > self.caps.max_texture_size
            || desc.height > self.caps.max_texture_size
        {
            return Err(BackendError::TextureCreationFailed(format!(
                "invalid dimensions {}x{}",
                desc.width, desc.height
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.depth.max(1),
            },
            mip_level_count: desc.mip_levels.max(1),
            sample_count: desc.sample_count.max(1),
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::TextureCreationFailed(err.to_string()));
        }

        let id = self.alloc_id();
        self.textures.insert(id, (texture, desc.clone()));
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        let (wgpu_texture, _) = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownHandle)?;
        let view = wgpu_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.alloc_id();
        self.views.insert(id, (view, texture.0));
        Ok(TextureViewHandle(id))
    }

    fn write_texture_mip(&mut self, texture: TextureHandle, mip: u32, data: &[u8]) {
        let Some((wgpu_texture, desc)) = self.textures.get(&texture.0) else {
            log::warn!("write to unknown texture {:?}", texture);
            return;
        };
        let width = (desc.width >> mip).max(1);
        let height = (desc.height >> mip).max(1);
        let (bytes_per_row, rows) = match desc.format.block_size() {
            Some(block) => (width.div_ceil(4) * block, height.div_ceil(4)),
            None => (width * desc.format.bytes_per_pixel(), height),
        };
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: wgpu_texture,
                mip_level: mip,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(rows),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.views.retain(|_, (_, owner)| *owner != texture.0);
        self.textures.remove(&texture.0);
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed("zero size".into()));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });
        let id = self.alloc_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(wgpu_buffer) = self.buffers.get(&buffer.0) else {
            log::warn!("write to unknown buffer {:?}", buffer);
            return;
        };
        self.queue.write_buffer(wgpu_buffer, offset, data);
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor) -> BackendResult<ShaderHandle> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ShaderCreationFailed(err.to_string()));
        }
        let id = self.alloc_id();
        self.shaders.insert(
            id,
            ShaderEntry {
                module,
                vs_entry: desc.vs_entry.clone(),
                fs_entry: desc.fs_entry.clone(),
            },
        );
        Ok(ShaderHandle(id))
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader.0);
        self.pipeline_cache
            .lock()
            .retain(|key, _| key.shader != shader.0);
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> BackendResult<FramebufferHandle> {
        for view in desc.color_views.iter().chain(desc.depth_view.as_ref()) {
            let Some((_, texture)) = self.views.get(&view.0) else {
                return Err(BackendError::FramebufferCreationFailed(
                    "attachment view references no live texture".into(),
                ));
            };
            if !self.textures.contains_key(texture) {
                return Err(BackendError::FramebufferCreationFailed(
                    "attachment texture destroyed".into(),
                ));
            }
        }
        let id = self.alloc_id();
        self.framebuffers.insert(id, desc.clone());
        Ok(FramebufferHandle(id))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.bound_framebuffer == Some(framebuffer.0) {
            self.bound_framebuffer = None;
        }
        self.framebuffers.remove(&framebuffer.0);
    }

    fn set_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.bound_framebuffer = framebuffer.map(|fb| fb.0);
    }

    fn clear(&mut self, values: &ClearValues) {
        let Some(id) = self.bound_framebuffer else {
            return;
        };
        let Some((colors, depth)) = self.framebuffer_attachments(id) else {
            log::warn!("clear with stale framebuffer");
            return;
        };

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
            .iter()
            .map(|&(view, _)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match values.color {
                            Some(color) => wgpu::LoadOp::Clear(wgpu::Color {
                                r: color[0] as f64,
                                g: color[1] as f64,
                                b: color[2] as f64,
                                a: color[3] as f64,
                            }),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment = depth.map(|(view, format)| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: match values.depth {
                    Some(depth) => wgpu::LoadOp::Clear(depth),
                    None => wgpu::LoadOp::Load,
                },
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: format.has_stencil().then(|| wgpu::Operations {
                load: match values.stencil {
                    Some(stencil) => wgpu::LoadOp::Clear(stencil),
                    None => wgpu::LoadOp::Load,
                },
                store: wgpu::StoreOp::Store,
            }),
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn draw(&mut self, cmd: &DrawCommand<'_>) -> BackendResult<()> {
        let Some(fb_id) = self.bound_framebuffer else {
            // Headless device has no default target; nothing to draw into.
            log::trace!("draw with no framebuffer bound, skipped");
            return Ok(());
        };
        let Some((colors, depth)) = self.framebuffer_attachments(fb_id) else {
            return Err(BackendError::DrawFailed("stale framebuffer".into()));
        };

        // Binding kinds derive from the bound textures' formats.
        let mut kinds = Vec::with_capacity(cmd.textures.len());
        for view in cmd.textures {
            let Some((_, texture)) = self.views.get(&view.0) else {
                return Err(BackendError::DrawFailed("stale texture binding".into()));
            };
            let Some((_, desc)) = self.textures.get(texture) else {
                return Err(BackendError::DrawFailed("stale texture binding".into()));
            };
            kinds.push(TexBindKind::of(desc.format));
        }

        let key = PipelineKey {
            shader: cmd.shader.0,
            layout: cmd.input_layout.clone(),
            colors: colors.iter().map(|(_, format)| *format).collect(),
            depth: depth.as_ref().map(|(_, format)| *format),
            blend: self.current_state.blend,
            cull: self.current_state.raster.cull_mode,
            depth_test: self.current_state.depth.test_enabled,
            depth_write: self.current_state.depth.write_enabled,
            depth_compare: self.current_state.depth.compare,
            bias_constant_bits: self.current_state.depth.bias_constant.to_bits(),
            bias_slope_bits: self.current_state.depth.bias_slope_scale.to_bits(),
            stencil: self.current_state.stencil,
            textures: kinds.clone(),
        };
        let pipeline = self.resolve_pipeline(&key)?;

        // Group 0: uniform block (a minimal dummy when the pass has none).
        let uniform_bytes: &[u8] = if cmd.uniforms.is_empty() {
            &[0u8; 16]
        } else {
            cmd.uniforms
        };
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("draw uniforms"),
                contents: uniform_bytes,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let uniform_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform group"),
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        // Group 1: texture + sampler pairs.
        let texture_layout = self.texture_binding_layout(&kinds);
        let mut texture_entries = Vec::with_capacity(kinds.len() * 2);
        for (index, view) in cmd.textures.iter().enumerate() {
            let (wgpu_view, _) = self
                .views
                .get(&view.0)
                .ok_or_else(|| BackendError::DrawFailed("stale texture binding".into()))?;
            texture_entries.push(wgpu::BindGroupEntry {
                binding: (index * 2) as u32,
                resource: wgpu::BindingResource::TextureView(wgpu_view),
            });
            texture_entries.push(wgpu::BindGroupEntry {
                binding: (index * 2 + 1) as u32,
                resource: wgpu::BindingResource::Sampler(self.sampler_for(kinds[index])),
            });
        }
        let texture_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture group"),
            layout: texture_layout.as_ref(),
            entries: &texture_entries,
        });

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
            .iter()
            .map(|&(view, _)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment =
            depth.map(|(view, format)| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: format.has_stencil().then(|| wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
            });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("draw encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("draw pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &uniform_group, &[]);
            pass.set_bind_group(1, &texture_group, &[]);
            if let Some(rect) = self.current_state.raster.scissor {
                pass.set_scissor_rect(rect.x, rect.y, rect.width, rect.height);
            }
            if self.current_state.stencil.enabled {
                pass.set_stencil_reference(self.current_state.stencil.front.reference);
            }
            if let Some(vertex_buffer) = cmd.vertex_buffer {
                let Some(buffer) = self.buffers.get(&vertex_buffer.0) else {
                    return Err(BackendError::DrawFailed("stale vertex buffer".into()));
                };
                pass.set_vertex_buffer(0, buffer.slice(..));
            }
            match cmd.index_buffer {
                Some(index_buffer) => {
                    let Some(buffer) = self.buffers.get(&index_buffer.0) else {
                        return Err(BackendError::DrawFailed("stale index buffer".into()));
                    };
                    let format = match cmd.index_format {
                        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                    };
                    pass.set_index_buffer(buffer.slice(..), format);
                    pass.draw_indexed(0..cmd.element_count, 0, 0..cmd.instance_count);
                }
                None => {
                    pass.draw(0..cmd.element_count, 0..cmd.instance_count);
                }
            }
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}
