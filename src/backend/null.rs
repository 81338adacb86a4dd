//! Null backend for testing and headless development.
//!
//! Performs no GPU work but tracks every live handle and records a trace of
//! state, bind, clear, upload, and draw events. Tests inspect the trace to
//! verify call ordering and resource lifecycles without GPU hardware.

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;

/// One recorded backend event.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    State(&'static str),
    CreateTexture { label: Option<String>, format: TextureFormat },
    DestroyTexture(u64),
    CreateBuffer { label: Option<String>, size: u64 },
    DestroyBuffer(u64),
    CreateShader { label: Option<String> },
    CreateFramebuffer { label: Option<String> },
    DestroyFramebuffer(u64),
    WriteTextureMip { mip: u32, bytes: usize },
    WriteBuffer { offset: u64, bytes: usize },
    SetFramebuffer { label: Option<String> },
    Clear,
    Draw { framebuffer: Option<String>, uniform_bytes: Vec<u8> },
}

#[derive(Debug, Clone)]
struct NullTexture {
    label: Option<String>,
    desc: TextureDescriptor,
}

/// Null GPU backend.
#[derive(Debug)]
pub struct NullBackend {
    caps: DeviceCaps,
    textures: HashMap<u64, NullTexture>,
    views: HashMap<u64, u64>,
    buffers: HashMap<u64, BufferDescriptor>,
    shaders: HashMap<u64, Option<String>>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    bound_framebuffer: Option<u64>,
    next_id: u64,
    trace: Vec<TraceEvent>,
}

impl NullBackend {
    /// Create a backend advertising the full format set.
    pub fn new() -> Self {
        Self::with_caps(DeviceCaps::full())
    }

    /// Create a backend with the given capabilities (device simulation).
    pub fn with_caps(caps: DeviceCaps) -> Self {
        Self {
            caps,
            textures: HashMap::new(),
            views: HashMap::new(),
            buffers: HashMap::new(),
            shaders: HashMap::new(),
            framebuffers: HashMap::new(),
            bound_framebuffer: None,
            next_id: 1,
            trace: Vec::new(),
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push(&mut self, event: TraceEvent) {
        self.trace.push(event);
    }

    /// The recorded event trace since creation or the last [`Self::take_trace`].
    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    /// Drain and return the recorded trace.
    pub fn take_trace(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.trace)
    }

    /// Number of state-group calls recorded so far.
    pub fn state_call_count(&self) -> usize {
        self.trace
            .iter()
            .filter(|e| matches!(e, TraceEvent::State(_)))
            .count()
    }

    /// Number of currently live textures.
    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Number of currently live textures whose label starts with `prefix`.
    pub fn live_textures_with_label(&self, prefix: &str) -> usize {
        self.textures
            .values()
            .filter(|t| t.label.as_deref().is_some_and(|l| l.starts_with(prefix)))
            .count()
    }

    /// Number of currently live framebuffers.
    pub fn live_framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Number of currently live buffers.
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn framebuffer_label(&self, id: Option<u64>) -> Option<String> {
        id.and_then(|id| self.framebuffers.get(&id))
            .and_then(|fb| fb.label.clone())
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StateEmitter for NullBackend {
    fn set_blend_enabled(&mut self, _enabled: bool) {
        self.push(TraceEvent::State("blend_enabled"));
    }

    fn set_blend_func(
        &mut self,
        _color_src: BlendFactor,
        _color_dst: BlendFactor,
        _alpha_src: BlendFactor,
        _alpha_dst: BlendFactor,
    ) {
        self.push(TraceEvent::State("blend_func"));
    }

    fn set_blend_op(&mut self, _color_op: BlendOperation, _alpha_op: BlendOperation) {
        self.push(TraceEvent::State("blend_op"));
    }

    fn set_cull_mode(&mut self, _mode: CullMode) {
        self.push(TraceEvent::State("cull_mode"));
    }

    fn set_fill_mode(&mut self, _mode: FillMode) {
        self.push(TraceEvent::State("fill_mode"));
    }

    fn set_scissor(&mut self, _rect: Option<ScissorRect>) {
        self.push(TraceEvent::State("scissor"));
    }

    fn set_srgb_write(&mut self, _enabled: bool) {
        self.push(TraceEvent::State("srgb_write"));
    }

    fn set_depth_test(&mut self, _enabled: bool) {
        self.push(TraceEvent::State("depth_test"));
    }

    fn set_depth_func(&mut self, _func: CompareFunction) {
        self.push(TraceEvent::State("depth_func"));
    }

    fn set_depth_write(&mut self, _enabled: bool) {
        self.push(TraceEvent::State("depth_write"));
    }

    fn set_depth_bias(&mut self, _constant: f32, _slope_scale: f32) {
        self.push(TraceEvent::State("depth_bias"));
    }

    fn set_stencil_enabled(&mut self, _enabled: bool) {
        self.push(TraceEvent::State("stencil_enabled"));
    }

    fn set_stencil(&mut self, _face: &StencilFaceDesc) {
        self.push(TraceEvent::State("stencil"));
    }

    fn set_stencil_separate(&mut self, _front: &StencilFaceDesc, _back: &StencilFaceDesc) {
        self.push(TraceEvent::State("stencil_separate"));
    }
}

impl GraphicsBackend for NullBackend {
    fn name(&self) -> &'static str {
        "Null Backend"
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
        log::trace!(
            "NullBackend: creating texture {:?} ({}x{}, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        let id = self.alloc_id();
        self.textures.insert(
            id,
            NullTexture {
                label: desc.label.clone(),
                desc: desc.clone(),
            },
        );
        self.push(TraceEvent::CreateTexture {
            label: desc.label.clone(),
            format: desc.format,
        });
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::UnknownHandle);
        }
        let id = self.alloc_id();
        self.views.insert(id, texture.0);
        Ok(TextureViewHandle(id))
    }

    fn write_texture_mip(&mut self, texture: TextureHandle, mip: u32, data: &[u8]) {
        if !self.textures.contains_key(&texture.0) {
            log::warn!("NullBackend: write to unknown texture {:?}", texture);
            return;
        }
        self.push(TraceEvent::WriteTextureMip {
            mip,
            bytes: data.len(),
        });
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_some() {
            self.views.retain(|_, tex| *tex != texture.0);
            self.push(TraceEvent::DestroyTexture(texture.0));
        }
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed("zero size".into()));
        }
        log::trace!(
            "NullBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let id = self.alloc_id();
        self.buffers.insert(id, desc.clone());
        self.push(TraceEvent::CreateBuffer {
            label: desc.label.clone(),
            size: desc.size,
        });
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if !self.buffers.contains_key(&buffer.0) {
            log::warn!("NullBackend: write to unknown buffer {:?}", buffer);
            return;
        }
        self.push(TraceEvent::WriteBuffer {
            offset,
            bytes: data.len(),
        });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer.0).is_some() {
            self.push(TraceEvent::DestroyBuffer(buffer.0));
        }
    }

    fn create_shader(&mut self, desc: &ShaderDescriptor) -> BackendResult<ShaderHandle> {
        if desc.source.is_empty() {
            return Err(BackendError::ShaderCreationFailed("empty source".into()));
        }
        let id = self.alloc_id();
        self.shaders.insert(id, desc.label.clone());
        self.push(TraceEvent::CreateShader {
            label: desc.label.clone(),
        });
        Ok(ShaderHandle(id))
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader.0);
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> BackendResult<FramebufferHandle> {
        // Every attachment must reference a live texture.
        for view in desc
            .color_views
            .iter()
            .chain(desc.depth_view.as_ref())
        {
            let Some(tex) = self.views.get(&view.0) else {
                return Err(BackendError::FramebufferCreationFailed(
                    "attachment view references no live texture".into(),
                ));
            };
            if !self.textures.contains_key(tex) {
                return Err(BackendError::FramebufferCreationFailed(
                    "attachment texture destroyed".into(),
                ));
            }
        }
        let id = self.alloc_id();
        self.framebuffers.insert(id, desc.clone());
        self.push(TraceEvent::CreateFramebuffer {
            label: desc.label.clone(),
        });
        Ok(FramebufferHandle(id))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.framebuffers.remove(&framebuffer.0).is_some() {
            if self.bound_framebuffer == Some(framebuffer.0) {
                self.bound_framebuffer = None;
            }
            self.push(TraceEvent::DestroyFramebuffer(framebuffer.0));
        }
    }

    fn set_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.bound_framebuffer = framebuffer.map(|fb| fb.0);
        let label = self.framebuffer_label(self.bound_framebuffer);
        self.push(TraceEvent::SetFramebuffer { label });
    }

    fn clear(&mut self, _values: &ClearValues) {
        self.push(TraceEvent::Clear);
    }

    fn draw(&mut self, cmd: &DrawCommand<'_>) -> BackendResult<()> {
        if !self.shaders.contains_key(&cmd.shader.0) {
            return Err(BackendError::DrawFailed("unknown shader".into()));
        }
        let framebuffer = self.framebuffer_label(self.bound_framebuffer);
        self.push(TraceEvent::Draw {
            framebuffer,
            uniform_bytes: cmd.uniforms.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_lifecycle_tracked() {
        let mut backend = NullBackend::new();
        let tex = backend
            .create_texture(&TextureDescriptor::render_target(
                "t",
                64,
                64,
                TextureFormat::Rgba8Unorm,
            ))
            .unwrap();
        assert_eq!(backend.live_texture_count(), 1);
        backend.destroy_texture(tex);
        assert_eq!(backend.live_texture_count(), 0);
        // Double destroy is a no-op
        backend.destroy_texture(tex);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let caps = DeviceCaps::full().without_format(TextureFormat::Rgba16Float);
        let mut backend = NullBackend::with_caps(caps);
        let result = backend.create_texture(&TextureDescriptor::render_target(
            "t",
            64,
            64,
            TextureFormat::Rgba16Float,
        ));
        assert!(matches!(result, Err(BackendError::UnsupportedFormat(_))));
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_framebuffer_requires_live_attachments() {
        let mut backend = NullBackend::new();
        let tex = backend
            .create_texture(&TextureDescriptor::render_target(
                "t",
                32,
                32,
                TextureFormat::Rgba8Unorm,
            ))
            .unwrap();
        let view = backend.create_texture_view(tex).unwrap();
        backend.destroy_texture(tex);
        let result = backend.create_framebuffer(&FramebufferDescriptor {
            label: None,
            color_views: vec![view],
            depth_view: None,
            width: 32,
            height: 32,
        });
        assert!(result.is_err());
    }
}
