//! GPU resource objects with a uniform setup/close contract.
//!
//! Each resource owns exactly one native handle. `setup` returns `false`
//! with no partially visible allocation on failure; `close` releases
//! unconditionally and is idempotent.

mod buffer;
mod framebuffer;
mod texture;

pub use buffer::Buffer;
pub use framebuffer::{Framebuffer, FramebufferLayout};
pub use texture::Texture;
