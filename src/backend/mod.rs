//! Graphics backend abstraction

pub mod null;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_impl;

pub use null::NullBackend;
pub use traits::*;
pub use types::*;

#[cfg(feature = "wgpu-backend")]
pub use wgpu_impl::WgpuBackend;
