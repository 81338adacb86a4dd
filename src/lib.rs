//! Deferred Engine - a cross-backend deferred shading core
//!
//! The crate provides one uniform resource/state contract over multiple
//! graphics backends plus the controller that sequences a deferred-shading
//! frame:
//! - **State diffing**: fixed-function state is described by immutable
//!   descriptors and applied through a field-group diff that emits exactly
//!   one backend call per changed group
//! - **Resource objects**: textures, buffers, and framebuffers own one
//!   native handle each behind a uniform setup/close contract
//! - **Render-target set**: the G-buffer/lighting/shading topology for one
//!   resolution, recreated as a whole on resize
//! - **Frame orchestration**: shadow maps, depth pre-pass, G-buffer fill,
//!   per-light-type lighting accumulation, opaque/transparent shading, and
//!   the final copy, in a fixed order
//!
//! Backends are tagged implementations of one trait: a handle-tracking
//! null backend for tests and headless runs, and a headless wgpu device
//! behind the `wgpu-backend` feature.

pub mod backend;
pub mod materials;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod state;

pub use backend::{BackendError, BackendResult, DeviceCaps, GraphicsBackend, NullBackend, StateEmitter};
#[cfg(feature = "wgpu-backend")]
pub use backend::WgpuBackend;
pub use materials::{Material, MaterialPass, ParameterTable, Semantic, Technique};
pub use pipeline::{
    DeferredController, DeferredTargets, PipelineConfig, RenderPipeline, RenderQueue,
};
pub use resources::{Buffer, Framebuffer, FramebufferLayout, Texture};
pub use scene::{Camera, Light, LightKind, Renderable, Scene};
pub use state::{PipelineState, PipelineStateDesc};

/// Backend selection for the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Handle-tracking backend without GPU work (tests, headless tools)
    #[default]
    Null,
    /// Headless wgpu device
    #[cfg(feature = "wgpu-backend")]
    Wgpu,
}
