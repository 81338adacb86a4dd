//! Framebuffer layout and framebuffer resource objects.

use crate::backend::traits::*;
use crate::backend::types::*;

/// Immutable attachment-format table for a framebuffer.
///
/// A layout describes what a framebuffer looks like (color formats, depth
/// format, sample count); the framebuffer itself wraps concrete texture
/// views matching that layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferLayout {
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub sample_count: u32,
}

impl FramebufferLayout {
    pub fn new(color_formats: Vec<TextureFormat>, depth_format: Option<TextureFormat>) -> Self {
        Self {
            color_formats,
            depth_format,
            sample_count: 1,
        }
    }

    pub fn color_only(format: TextureFormat) -> Self {
        Self::new(vec![format], None)
    }

    pub fn depth_only(format: TextureFormat) -> Self {
        Self::new(Vec::new(), Some(format))
    }
}

/// A framebuffer owning exactly one native handle.
///
/// Wraps live texture views into a bindable render target. The views must
/// outlive the framebuffer; the render-target set guarantees this by
/// recreating the whole set together.
#[derive(Debug, Default)]
pub struct Framebuffer {
    handle: Option<FramebufferHandle>,
    layout: Option<FramebufferLayout>,
    width: u32,
    height: u32,
}

impl Framebuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the given views into a native framebuffer matching `layout`.
    /// Returns `false` with nothing allocated on mismatch or failure.
    pub fn setup(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        label: &str,
        layout: &FramebufferLayout,
        color_views: Vec<TextureViewHandle>,
        depth_view: Option<TextureViewHandle>,
        width: u32,
        height: u32,
    ) -> bool {
        debug_assert!(self.handle.is_none(), "setup() on an open framebuffer");

        if color_views.len() != layout.color_formats.len()
            || depth_view.is_some() != layout.depth_format.is_some()
        {
            log::warn!("framebuffer {label}: attachments do not match layout");
            return false;
        }

        match backend.create_framebuffer(&FramebufferDescriptor {
            label: Some(label.to_string()),
            color_views,
            depth_view,
            width,
            height,
        }) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.layout = Some(layout.clone());
                self.width = width;
                self.height = height;
                true
            }
            Err(err) => {
                log::warn!("framebuffer {label} setup failed: {err}");
                false
            }
        }
    }

    /// Release the native handle. Idempotent.
    pub fn close(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(handle) = self.handle.take() {
            backend.destroy_framebuffer(handle);
        }
        self.layout = None;
        self.width = 0;
        self.height = 0;
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<FramebufferHandle> {
        self.handle
    }

    pub fn layout(&self) -> Option<&FramebufferLayout> {
        self.layout.as_ref()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::resources::Texture;

    #[test]
    fn test_setup_and_close() {
        let mut backend = NullBackend::new();
        let mut color = Texture::new();
        assert!(color.setup(
            &mut backend,
            &TextureDescriptor::render_target("c", 64, 64, TextureFormat::Rgba8Unorm),
            None,
        ));

        let layout = FramebufferLayout::color_only(TextureFormat::Rgba8Unorm);
        let mut fb = Framebuffer::new();
        assert!(fb.setup(
            &mut backend,
            "test_fb",
            &layout,
            vec![color.view().unwrap()],
            None,
            64,
            64,
        ));
        assert!(fb.is_open());
        assert_eq!(fb.size(), (64, 64));

        fb.close(&mut backend);
        fb.close(&mut backend);
        assert!(!fb.is_open());
        color.close(&mut backend);
    }

    #[test]
    fn test_attachment_layout_mismatch_rejected() {
        let mut backend = NullBackend::new();
        let layout = FramebufferLayout::new(
            vec![TextureFormat::Rgba8Unorm, TextureFormat::Rgba16Float],
            None,
        );
        let mut fb = Framebuffer::new();
        // One view against a two-color layout
        let mut color = Texture::new();
        color.setup(
            &mut backend,
            &TextureDescriptor::render_target("c", 8, 8, TextureFormat::Rgba8Unorm),
            None,
        );
        assert!(!fb.setup(
            &mut backend,
            "bad",
            &layout,
            vec![color.view().unwrap()],
            None,
            8,
            8,
        ));
        assert!(!fb.is_open());
        color.close(&mut backend);
    }
}
