//! Texture resource object.

use crate::backend::traits::*;
use crate::backend::types::*;

/// A texture owning exactly one native handle.
///
/// `setup` allocates and optionally uploads initial data; `close` releases
/// unconditionally and is idempotent. Descriptors are fixed for the
/// resource's lifetime: a different size or format means destroy and
/// recreate.
#[derive(Debug, Default)]
pub struct Texture {
    handle: Option<TextureHandle>,
    view: Option<TextureViewHandle>,
    desc: Option<TextureDescriptor>,
}

impl Texture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the native texture and upload `initial_data` if given.
    ///
    /// Initial data covers the full mip chain, tightly packed mip 0 first.
    /// Compressed formats upload mip by mip using the per-format block
    /// size; uncompressed formats upload one sub-image call per mip.
    /// Returns `false` with nothing allocated when the format or dimensions
    /// are unsupported.
    pub fn setup(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        desc: &TextureDescriptor,
        initial_data: Option<&[u8]>,
    ) -> bool {
        debug_assert!(self.handle.is_none(), "setup() on an open texture");

        let handle = match backend.create_texture(desc) {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!("texture setup failed: {err}");
                return false;
            }
        };
        let view = match backend.create_texture_view(handle) {
            Ok(view) => view,
            Err(err) => {
                log::warn!("texture view creation failed: {err}");
                backend.destroy_texture(handle);
                return false;
            }
        };

        if let Some(data) = initial_data {
            if !upload_mip_chain(backend, handle, desc, data) {
                backend.destroy_texture(handle);
                return false;
            }
        }

        self.handle = Some(handle);
        self.view = Some(view);
        self.desc = Some(desc.clone());
        true
    }

    /// Release the native handle. Safe to call repeatedly.
    pub fn close(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(handle) = self.handle.take() {
            backend.destroy_texture(handle);
        }
        self.view = None;
        self.desc = None;
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        self.handle
    }

    pub fn view(&self) -> Option<TextureViewHandle> {
        self.view
    }

    pub fn desc(&self) -> Option<&TextureDescriptor> {
        self.desc.as_ref()
    }

    pub fn format(&self) -> Option<TextureFormat> {
        self.desc.as_ref().map(|d| d.format)
    }
}

/// Upload a packed mip chain, one backend call per mip level.
fn upload_mip_chain(
    backend: &mut dyn GraphicsBackend,
    handle: TextureHandle,
    desc: &TextureDescriptor,
    data: &[u8],
) -> bool {
    let mut offset = 0usize;
    let mut width = desc.width;
    let mut height = desc.height;

    for mip in 0..desc.mip_levels {
        let size = desc.format.mip_byte_size(width, height) as usize;
        let Some(slice) = data.get(offset..offset + size) else {
            log::warn!(
                "texture {:?}: initial data too short for mip {} ({} bytes needed)",
                desc.label,
                mip,
                size
            );
            return false;
        };
        backend.write_texture_mip(handle, mip, slice);
        offset += size;
        width = (width / 2).max(1);
        height = (height / 2).max(1);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::{NullBackend, TraceEvent};

    #[test]
    fn test_setup_close_idempotent() {
        let mut backend = NullBackend::new();
        let mut texture = Texture::new();
        assert!(texture.setup(
            &mut backend,
            &TextureDescriptor::render_target("t", 32, 32, TextureFormat::Rgba8Unorm),
            None,
        ));
        assert!(texture.is_open());
        assert_eq!(backend.live_texture_count(), 1);

        texture.close(&mut backend);
        texture.close(&mut backend);
        assert!(!texture.is_open());
        assert!(texture.view().is_none());
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_unsupported_format_leaves_nothing() {
        let caps = DeviceCaps::full().without_format(TextureFormat::Rgba32Float);
        let mut backend = NullBackend::with_caps(caps);
        let mut texture = Texture::new();
        assert!(!texture.setup(
            &mut backend,
            &TextureDescriptor::render_target("t", 32, 32, TextureFormat::Rgba32Float),
            None,
        ));
        assert!(!texture.is_open());
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_uncompressed_mip_chain_upload() {
        let mut backend = NullBackend::new();
        let mut texture = Texture::new();
        let desc = TextureDescriptor {
            label: Some("mipped".into()),
            width: 8,
            height: 8,
            mip_levels: 4,
            format: TextureFormat::Rgba8Unorm,
            ..Default::default()
        };
        // 8x8 + 4x4 + 2x2 + 1x1, 4 bytes per pixel
        let total = (64 + 16 + 4 + 1) * 4;
        let data = vec![0u8; total];
        assert!(texture.setup(&mut backend, &desc, Some(&data)));

        let uploads: Vec<usize> = backend
            .trace()
            .iter()
            .filter_map(|e| match e {
                TraceEvent::WriteTextureMip { bytes, .. } => Some(*bytes),
                _ => None,
            })
            .collect();
        assert_eq!(uploads, vec![256, 64, 16, 4]);
        texture.close(&mut backend);
    }

    #[test]
    fn test_compressed_mip_chain_uses_block_sizes() {
        let mut backend = NullBackend::new();
        let mut texture = Texture::new();
        let desc = TextureDescriptor {
            label: Some("bc1".into()),
            width: 8,
            height: 8,
            mip_levels: 3,
            format: TextureFormat::Bc1RgbaUnorm,
            ..Default::default()
        };
        // 2x2 blocks + 1 block + 1 block, 8 bytes per block
        let data = vec![0u8; (4 + 1 + 1) * 8];
        assert!(texture.setup(&mut backend, &desc, Some(&data)));

        let uploads: Vec<usize> = backend
            .trace()
            .iter()
            .filter_map(|e| match e {
                TraceEvent::WriteTextureMip { bytes, .. } => Some(*bytes),
                _ => None,
            })
            .collect();
        assert_eq!(uploads, vec![32, 8, 8]);
        texture.close(&mut backend);
    }

    #[test]
    fn test_short_initial_data_fails_cleanly() {
        let mut backend = NullBackend::new();
        let mut texture = Texture::new();
        let desc = TextureDescriptor {
            width: 8,
            height: 8,
            format: TextureFormat::Rgba8Unorm,
            ..Default::default()
        };
        assert!(!texture.setup(&mut backend, &desc, Some(&[0u8; 16])));
        assert!(!texture.is_open());
        assert_eq!(backend.live_texture_count(), 0);
    }
}
