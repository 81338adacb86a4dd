//! Core backend abstraction traits
//!
//! [`StateEmitter`] is the command-emitter capability the pipeline state
//! diff engine is parameterized over: one method per fixed-function state
//! group. [`GraphicsBackend`] extends it with resource management and draw
//! submission. Backends are tagged implementations of these traits; callers
//! never see a native API type.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(TextureFormat),
    #[error("Unknown resource handle")]
    UnknownHandle,
    #[error("Draw submission failed: {0}")]
    DrawFailed(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewHandle(pub(crate) u64);

/// Handle to a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a compiled shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

/// One-sided stencil configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceDesc {
    pub compare: CompareFunction,
    pub fail_op: StencilOperation,
    pub depth_fail_op: StencilOperation,
    pub pass_op: StencilOperation,
    pub read_mask: u32,
    pub write_mask: u32,
    pub reference: u32,
}

impl Default for StencilFaceDesc {
    fn default() -> Self {
        Self {
            compare: CompareFunction::Always,
            fail_op: StencilOperation::Keep,
            depth_fail_op: StencilOperation::Keep,
            pass_op: StencilOperation::Keep,
            read_mask: 0xFF,
            write_mask: 0xFF,
            reference: 0,
        }
    }
}

/// Device capabilities reported by a backend.
///
/// Format selection for render targets is a pure function of this value, so
/// two setups against the same caps always pick the same format table.
#[derive(Debug, Clone)]
pub struct DeviceCaps {
    supported_formats: Vec<TextureFormat>,
    pub max_texture_size: u32,
}

impl DeviceCaps {
    pub fn new(supported_formats: Vec<TextureFormat>, max_texture_size: u32) -> Self {
        Self {
            supported_formats,
            max_texture_size,
        }
    }

    /// Caps covering every format this crate defines.
    pub fn full() -> Self {
        Self::new(
            vec![
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
                TextureFormat::Bc1RgbaUnorm,
                TextureFormat::Bc3RgbaUnorm,
                TextureFormat::Bc5RgUnorm,
            ],
            16384,
        )
    }

    pub fn supports_format(&self, format: TextureFormat) -> bool {
        self.supported_formats.contains(&format)
    }

    /// Remove a format from the supported set (test/device-simulation hook).
    pub fn without_format(mut self, format: TextureFormat) -> Self {
        self.supported_formats.retain(|f| *f != format);
        self
    }

    /// First supported format among the candidates, in preference order.
    pub fn first_supported(&self, candidates: &[TextureFormat]) -> Option<TextureFormat> {
        candidates
            .iter()
            .copied()
            .find(|f| self.supports_format(*f))
    }
}

/// Shader program descriptor (source is backend-dialect text, e.g. WGSL)
#[derive(Debug, Clone)]
pub struct ShaderDescriptor {
    pub label: Option<String>,
    pub source: String,
    pub vs_entry: String,
    pub fs_entry: Option<String>,
}

/// Framebuffer descriptor: wraps live texture views into one render target
#[derive(Debug, Clone)]
pub struct FramebufferDescriptor {
    pub label: Option<String>,
    pub color_views: Vec<TextureViewHandle>,
    pub depth_view: Option<TextureViewHandle>,
    pub width: u32,
    pub height: u32,
}

/// One draw submission: geometry + program + packed uniform block + textures
#[derive(Debug, Clone)]
pub struct DrawCommand<'a> {
    pub shader: ShaderHandle,
    pub input_layout: &'a InputLayout,
    pub vertex_buffer: Option<BufferHandle>,
    pub index_buffer: Option<BufferHandle>,
    pub index_format: IndexFormat,
    /// Index count when an index buffer is present, vertex count otherwise.
    pub element_count: u32,
    pub instance_count: u32,
    pub uniforms: &'a [u8],
    pub textures: &'a [TextureViewHandle],
}

/// Fixed-function state emission, one method per state group.
///
/// The diff engine issues exactly one of these calls per *changed* group;
/// how a backend realizes the call (immediate API call, pipeline-cache key
/// update, ...) is its own concern. Single- and two-sided stencil are
/// distinct methods because the underlying calls differ.
pub trait StateEmitter {
    fn set_blend_enabled(&mut self, enabled: bool);
    fn set_blend_func(
        &mut self,
        color_src: BlendFactor,
        color_dst: BlendFactor,
        alpha_src: BlendFactor,
        alpha_dst: BlendFactor,
    );
    fn set_blend_op(&mut self, color_op: BlendOperation, alpha_op: BlendOperation);
    fn set_cull_mode(&mut self, mode: CullMode);
    fn set_fill_mode(&mut self, mode: FillMode);
    fn set_scissor(&mut self, rect: Option<ScissorRect>);
    fn set_srgb_write(&mut self, enabled: bool);
    fn set_depth_test(&mut self, enabled: bool);
    fn set_depth_func(&mut self, func: CompareFunction);
    fn set_depth_write(&mut self, enabled: bool);
    fn set_depth_bias(&mut self, constant: f32, slope_scale: f32);
    fn set_stencil_enabled(&mut self, enabled: bool);
    fn set_stencil(&mut self, face: &StencilFaceDesc);
    fn set_stencil_separate(&mut self, front: &StencilFaceDesc, back: &StencilFaceDesc);
}

/// Main graphics backend trait.
///
/// Object safe; the facade owns one backend and serializes all access on the
/// render thread. Resource creation returns typed handles; destruction is
/// unconditional and tolerates already-destroyed handles.
pub trait GraphicsBackend: StateEmitter {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Device capabilities.
    fn caps(&self) -> &DeviceCaps;

    // Resources

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;
    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle>;
    /// Upload one mip level. `data` length must match
    /// [`TextureFormat::mip_byte_size`] for the mip's dimensions.
    fn write_texture_mip(&mut self, texture: TextureHandle, mip: u32, data: &[u8]);
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_shader(&mut self, desc: &ShaderDescriptor) -> BackendResult<ShaderHandle>;
    fn destroy_shader(&mut self, shader: ShaderHandle);

    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor)
        -> BackendResult<FramebufferHandle>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    // Submission

    /// Bind a framebuffer as the current render target; `None` unbinds.
    fn set_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    /// Clear the currently bound framebuffer.
    fn clear(&mut self, values: &ClearValues);

    /// Submit one draw against the currently bound framebuffer and state.
    fn draw(&mut self, cmd: &DrawCommand<'_>) -> BackendResult<()>;
}
