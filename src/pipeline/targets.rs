//! Deferred render-target set.
//!
//! Owns the fixed topology of G-buffer, lighting, and shading targets for
//! one resolution. The whole set is recreated, never partially patched, on
//! resolution change; getters return `None` unless the set is fully ready.

use crate::backend::traits::{DeviceCaps, GraphicsBackend, TextureViewHandle};
use crate::backend::types::{TextureDescriptor, TextureFormat};
use crate::pipeline::facade::RenderPipeline;
use crate::resources::{Framebuffer, FramebufferLayout, Texture};

/// Number of G-buffer color targets (albedo, normal, material, emissive).
pub const GBUFFER_TARGET_COUNT: usize = 4;

/// Per-target pixel formats chosen for the active device.
///
/// Selection is a pure function of [`DeviceCaps`]: the same caps always
/// yield the same table, independent of allocation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFormats {
    pub depth: TextureFormat,
    pub linear_depth: TextureFormat,
    pub gbuffer: [TextureFormat; GBUFFER_TARGET_COUNT],
    pub lighting: TextureFormat,
    pub shading: TextureFormat,
}

impl TargetFormats {
    /// Choose formats the device supports, preferring float precision and
    /// falling back to supported alternates. `None` when some slot has no
    /// supported candidate at all.
    pub fn select(caps: &DeviceCaps) -> Option<Self> {
        let depth = caps.first_supported(&[
            TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8,
        ])?;
        let linear_depth = caps.first_supported(&[
            TextureFormat::R32Float,
            TextureFormat::R16Float,
            TextureFormat::Rg16Float,
        ])?;
        let albedo = caps.first_supported(&[
            TextureFormat::Rgba8Unorm,
            TextureFormat::Bgra8Unorm,
        ])?;
        let normal = caps.first_supported(&[
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba8Unorm,
        ])?;
        let hdr = caps.first_supported(&[
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float,
            TextureFormat::Rgba8Unorm,
        ])?;
        Some(Self {
            depth,
            linear_depth,
            gbuffer: [albedo, normal, albedo, hdr],
            lighting: hdr,
            shading: hdr,
        })
    }
}

/// The deferred pipeline's render-target set for one resolution.
#[derive(Default)]
pub struct DeferredTargets {
    formats: Option<TargetFormats>,
    width: u32,
    height: u32,

    depth: Texture,
    linear_depth: Texture,
    gbuffer: [Texture; GBUFFER_TARGET_COUNT],
    lighting: Texture,
    opaque_shading: Texture,
    transparent_shading: Texture,
    final_shading: Texture,
    swap: Texture,

    depth_fb: Framebuffer,
    gbuffer_fb: Framebuffer,
    lighting_fb: Framebuffer,
    opaque_fb: Framebuffer,
    transparent_fb: Framebuffer,
    final_fb: Framebuffer,
    swap_fb: Framebuffer,
}

impl DeferredTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.formats.is_some()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn formats(&self) -> Option<&TargetFormats> {
        self.formats.as_ref()
    }

    /// Allocate every target at `width` x `height`.
    ///
    /// A ready set is torn down first, so old and new native handles are
    /// never alive together past the transition. Any sub-step failure
    /// leaves nothing reachable through getters and returns `false`.
    pub fn setup<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
        width: u32,
        height: u32,
    ) -> bool {
        if self.is_ready() || self.any_open() {
            self.close(pipe);
        }

        let Some(formats) = TargetFormats::select(pipe.caps()) else {
            log::error!("deferred targets: no supported format table");
            return false;
        };

        if !self.allocate(pipe, &formats, width, height) {
            self.close(pipe);
            return false;
        }

        self.formats = Some(formats);
        self.width = width;
        self.height = height;
        log::info!("deferred targets ready at {width}x{height}");
        true
    }

    fn allocate<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
        formats: &TargetFormats,
        width: u32,
        height: u32,
    ) -> bool {
        let backend = pipe.backend_mut();

        let mut ok = self.depth.setup(
            backend,
            &TextureDescriptor::render_target("deferred_depth", width, height, formats.depth),
            None,
        );
        ok = ok
            && self.linear_depth.setup(
                backend,
                &TextureDescriptor::render_target(
                    "deferred_linear_depth",
                    width,
                    height,
                    formats.linear_depth,
                ),
                None,
            );
        for (index, target) in self.gbuffer.iter_mut().enumerate() {
            ok = ok
                && target.setup(
                    backend,
                    &TextureDescriptor::render_target(
                        &format!("deferred_gbuffer_{index}"),
                        width,
                        height,
                        formats.gbuffer[index],
                    ),
                    None,
                );
        }
        ok = ok
            && self.lighting.setup(
                backend,
                &TextureDescriptor::render_target(
                    "deferred_lighting",
                    width,
                    height,
                    formats.lighting,
                ),
                None,
            );
        for (texture, label) in [
            (&mut self.opaque_shading, "deferred_opaque_shading"),
            (&mut self.transparent_shading, "deferred_transparent_shading"),
            (&mut self.final_shading, "deferred_final_shading"),
            (&mut self.swap, "deferred_swap"),
        ] {
            ok = ok
                && texture.setup(
                    backend,
                    &TextureDescriptor::render_target(label, width, height, formats.shading),
                    None,
                );
        }
        if !ok {
            return false;
        }

        let (Some(linear_depth_view), Some(depth_view)) =
            (self.linear_depth.view(), self.depth.view())
        else {
            return false;
        };

        // Wrap each texture group in a framebuffer with a matching layout.
        let depth_layout =
            FramebufferLayout::new(vec![formats.linear_depth], Some(formats.depth));
        ok = self.depth_fb.setup(
            backend,
            "deferred_depth_fb",
            &depth_layout,
            vec![linear_depth_view],
            Some(depth_view),
            width,
            height,
        );

        let gbuffer_layout =
            FramebufferLayout::new(formats.gbuffer.to_vec(), Some(formats.depth));
        let gbuffer_views: Vec<_> = self
            .gbuffer
            .iter()
            .filter_map(|t| t.view())
            .collect();
        ok = ok
            && self.gbuffer_fb.setup(
                backend,
                "deferred_gbuffer_fb",
                &gbuffer_layout,
                gbuffer_views,
                Some(depth_view),
                width,
                height,
            );

        let lighting_layout = FramebufferLayout::color_only(formats.lighting);
        ok = ok
            && self.lighting_fb.setup(
                backend,
                "deferred_lighting_fb",
                &lighting_layout,
                self.lighting.view().into_iter().collect(),
                None,
                width,
                height,
            );

        let shading_layout = FramebufferLayout::color_only(formats.shading);
        for (fb, texture, label) in [
            (&mut self.opaque_fb, &self.opaque_shading, "deferred_opaque_fb"),
            (
                &mut self.transparent_fb,
                &self.transparent_shading,
                "deferred_transparent_fb",
            ),
            (&mut self.final_fb, &self.final_shading, "deferred_final_fb"),
            (&mut self.swap_fb, &self.swap, "deferred_swap_fb"),
        ] {
            ok = ok
                && fb.setup(
                    backend,
                    label,
                    &shading_layout,
                    texture.view().into_iter().collect(),
                    None,
                    width,
                    height,
                );
        }
        ok
    }

    /// Release every target and framebuffer deterministically. Idempotent.
    pub fn close<B: GraphicsBackend>(&mut self, pipe: &mut RenderPipeline<B>) {
        let backend = pipe.backend_mut();
        for fb in [
            &mut self.depth_fb,
            &mut self.gbuffer_fb,
            &mut self.lighting_fb,
            &mut self.opaque_fb,
            &mut self.transparent_fb,
            &mut self.final_fb,
            &mut self.swap_fb,
        ] {
            fb.close(backend);
        }
        for texture in self.all_textures_mut() {
            texture.close(backend);
        }
        self.formats = None;
        self.width = 0;
        self.height = 0;
    }

    fn all_textures_mut(&mut self) -> [&mut Texture; 7 + GBUFFER_TARGET_COUNT] {
        let [g0, g1, g2, g3] = &mut self.gbuffer;
        [
            &mut self.depth,
            &mut self.linear_depth,
            g0,
            g1,
            g2,
            g3,
            &mut self.lighting,
            &mut self.opaque_shading,
            &mut self.transparent_shading,
            &mut self.final_shading,
            &mut self.swap,
        ]
    }

    fn any_open(&self) -> bool {
        self.depth.is_open() || self.gbuffer.iter().any(|t| t.is_open())
    }

    // Target accessors; `None` unless the whole set is ready.

    pub fn depth_map(&self) -> Option<&Texture> {
        self.formats.as_ref().map(|_| &self.depth)
    }

    pub fn linear_depth_map(&self) -> Option<&Texture> {
        self.formats.as_ref().map(|_| &self.linear_depth)
    }

    pub fn gbuffer_map(&self, index: usize) -> Option<&Texture> {
        if self.formats.is_some() {
            self.gbuffer.get(index)
        } else {
            None
        }
    }

    pub fn lighting_map(&self) -> Option<&Texture> {
        self.formats.as_ref().map(|_| &self.lighting)
    }

    pub fn opaque_shading_map(&self) -> Option<&Texture> {
        self.formats.as_ref().map(|_| &self.opaque_shading)
    }

    pub fn transparent_shading_map(&self) -> Option<&Texture> {
        self.formats.as_ref().map(|_| &self.transparent_shading)
    }

    pub fn final_shading_map(&self) -> Option<&Texture> {
        self.formats.as_ref().map(|_| &self.final_shading)
    }

    pub fn swap_map(&self) -> Option<&Texture> {
        self.formats.as_ref().map(|_| &self.swap)
    }

    pub fn gbuffer_view(&self, index: usize) -> Option<TextureViewHandle> {
        self.gbuffer_map(index).and_then(|t| t.view())
    }

    pub fn linear_depth_view(&self) -> Option<TextureViewHandle> {
        self.linear_depth_map().and_then(|t| t.view())
    }

    pub fn lighting_view(&self) -> Option<TextureViewHandle> {
        self.lighting_map().and_then(|t| t.view())
    }

    // Framebuffer accessors for the controller's pass sequence.

    pub fn depth_framebuffer(&self) -> Option<&Framebuffer> {
        self.formats.as_ref().map(|_| &self.depth_fb)
    }

    pub fn gbuffer_framebuffer(&self) -> Option<&Framebuffer> {
        self.formats.as_ref().map(|_| &self.gbuffer_fb)
    }

    pub fn lighting_framebuffer(&self) -> Option<&Framebuffer> {
        self.formats.as_ref().map(|_| &self.lighting_fb)
    }

    pub fn opaque_framebuffer(&self) -> Option<&Framebuffer> {
        self.formats.as_ref().map(|_| &self.opaque_fb)
    }

    pub fn transparent_framebuffer(&self) -> Option<&Framebuffer> {
        self.formats.as_ref().map(|_| &self.transparent_fb)
    }

    pub fn final_framebuffer(&self) -> Option<&Framebuffer> {
        self.formats.as_ref().map(|_| &self.final_fb)
    }

    pub fn swap_framebuffer(&self) -> Option<&Framebuffer> {
        self.formats.as_ref().map(|_| &self.swap_fb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    fn pipeline() -> RenderPipeline<NullBackend> {
        RenderPipeline::new(NullBackend::new())
    }

    #[test]
    fn test_setup_close_setup_same_format_table() {
        let mut pipe = pipeline();
        let mut targets = DeferredTargets::new();

        assert!(targets.setup(&mut pipe, 1920, 1080));
        let first = *targets.formats().unwrap();
        targets.close(&mut pipe);
        assert!(!targets.is_ready());
        assert!(targets.setup(&mut pipe, 1920, 1080));
        assert_eq!(*targets.formats().unwrap(), first);
        targets.close(&mut pipe);
    }

    #[test]
    fn test_close_releases_everything() {
        let mut pipe = pipeline();
        let mut targets = DeferredTargets::new();
        assert!(targets.setup(&mut pipe, 640, 480));
        assert!(pipe.backend().live_texture_count() > 0);

        targets.close(&mut pipe);
        assert_eq!(pipe.backend().live_texture_count(), 0);
        assert_eq!(pipe.backend().live_framebuffer_count(), 0);
        assert!(targets.depth_map().is_none());
        assert!(targets.gbuffer_framebuffer().is_none());
    }

    #[test]
    fn test_resize_never_duplicates_logical_targets() {
        let mut pipe = pipeline();
        let mut targets = DeferredTargets::new();
        assert!(targets.setup(&mut pipe, 800, 600));
        let count = pipe.backend().live_texture_count();

        // Setup on a ready set destroys before reallocating
        assert!(targets.setup(&mut pipe, 1024, 768));
        assert_eq!(pipe.backend().live_texture_count(), count);
        assert_eq!(pipe.backend().live_textures_with_label("deferred_depth"), 1);
        assert_eq!(targets.size(), (1024, 768));
        targets.close(&mut pipe);
    }

    #[test]
    fn test_float_fallback_on_limited_device() {
        let caps = crate::backend::traits::DeviceCaps::full()
            .without_format(TextureFormat::Rgba16Float);
        let mut pipe = RenderPipeline::new(NullBackend::with_caps(caps));
        let mut targets = DeferredTargets::new();

        assert!(targets.setup(&mut pipe, 320, 240));
        let formats = targets.formats().unwrap();
        // Lighting fell back to a supported alternate
        assert_eq!(formats.lighting, TextureFormat::Rgba32Float);
        targets.close(&mut pipe);
    }

    #[test]
    fn test_no_depth_support_fails_with_null_getters() {
        let caps = crate::backend::traits::DeviceCaps::full()
            .without_format(TextureFormat::Depth32Float)
            .without_format(TextureFormat::Depth24PlusStencil8);
        let mut pipe = RenderPipeline::new(NullBackend::with_caps(caps));
        let mut targets = DeferredTargets::new();

        assert!(!targets.setup(&mut pipe, 320, 240));
        assert!(targets.depth_map().is_none());
        assert!(targets.lighting_map().is_none());
        assert!(targets.final_framebuffer().is_none());
        assert_eq!(pipe.backend().live_texture_count(), 0);
    }
}
