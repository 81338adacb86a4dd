//! Buffer resource object with mapped-access windows.

use crate::backend::traits::*;
use crate::backend::types::*;

struct MappedRange {
    offset: u64,
    access: MapAccess,
    staging: Vec<u8>,
}

/// A GPU buffer owning exactly one native handle.
///
/// `map`/`unmap` establish an exclusive CPU-side access window that is
/// flushed through the backend on unmap. A persistently mapped buffer stays
/// mapped until `close` and flushes via [`Buffer::flush`].
#[derive(Default)]
pub struct Buffer {
    handle: Option<BufferHandle>,
    desc: Option<BufferDescriptor>,
    mapped: Option<MappedRange>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the native buffer. Returns `false` with nothing allocated
    /// on failure.
    pub fn setup(&mut self, backend: &mut dyn GraphicsBackend, desc: &BufferDescriptor) -> bool {
        debug_assert!(self.handle.is_none(), "setup() on an open buffer");

        match backend.create_buffer(desc) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.desc = Some(desc.clone());
                true
            }
            Err(err) => {
                log::warn!("buffer setup failed: {err}");
                false
            }
        }
    }

    /// Release the native handle, dropping any active mapping. Idempotent.
    pub fn close(&mut self, backend: &mut dyn GraphicsBackend) {
        self.mapped = None;
        if let Some(handle) = self.handle.take() {
            backend.destroy_buffer(handle);
        }
        self.desc = None;
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    pub fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.desc.as_ref().map_or(0, |d| d.size)
    }

    /// Establish an exclusive access window of `len` bytes at `offset`.
    ///
    /// Returns the window for CPU writes, or `None` when the range is out
    /// of bounds or the buffer is closed. Mapping while already mapped is a
    /// contract violation.
    pub fn map(&mut self, offset: u64, len: u64, access: MapAccess) -> Option<&mut [u8]> {
        debug_assert!(self.mapped.is_none(), "map() on a mapped buffer");

        let size = self.size();
        if self.handle.is_none() || offset + len > size || len == 0 {
            return None;
        }
        self.mapped = Some(MappedRange {
            offset,
            access,
            staging: vec![0; len as usize],
        });
        self.mapped.as_mut().map(|m| m.staging.as_mut_slice())
    }

    /// The active window, for writes after `map`.
    pub fn mapped_range(&mut self) -> Option<&mut [u8]> {
        self.mapped.as_mut().map(|m| m.staging.as_mut_slice())
    }

    /// Flush the window through the backend and end the mapping.
    ///
    /// Persistent mappings flush but stay mapped; use [`Buffer::close`] to
    /// end them. Unmapping an unmapped buffer is a contract violation.
    pub fn unmap(&mut self, backend: &mut dyn GraphicsBackend) {
        debug_assert!(self.mapped.is_some(), "unmap() on an unmapped buffer");

        let Some(mapped) = self.mapped.as_ref() else {
            return;
        };
        let persistent = mapped.access == MapAccess::Persistent;
        self.flush(backend);
        if !persistent {
            self.mapped = None;
        }
    }

    /// Write the current window contents through the backend without ending
    /// the mapping. Required for persistent mappings before draws consume
    /// the buffer.
    pub fn flush(&mut self, backend: &mut dyn GraphicsBackend) {
        let (Some(handle), Some(mapped)) = (self.handle, self.mapped.as_ref()) else {
            return;
        };
        if mapped.access != MapAccess::Read {
            backend.write_buffer(handle, mapped.offset, &mapped.staging);
        }
    }
}
