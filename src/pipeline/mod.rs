//! Deferred rendering pipeline
//!
//! This module implements the deferred shading frame:
//! 1. Shadow maps for every shadow-casting light
//! 2. Depth pre-pass filling depth and linear depth
//! 3. G-buffer fill over the opaque queue
//! 4. Per-light-type lighting accumulation
//! 5. Opaque shading resolve
//! 6. Transparent branch composited through the swap target
//! 7. Final copy into the output target

pub mod controller;
pub mod facade;
pub mod targets;

pub use controller::DeferredController;
pub use facade::{MaterialId, MeshHandle, RenderPipeline};
pub use targets::{DeferredTargets, TargetFormats};

/// Ordered render queue buckets.
///
/// Bucket order, not an explicit sort, determines traversal within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderQueue {
    Shadow,
    OpaqueDepth,
    Opaque,
    OpaqueShading,
    Lighting,
    TransparentDepth,
    Transparent,
    TransparentShading,
    Postprocess,
}

impl RenderQueue {
    pub const ALL: [RenderQueue; 9] = [
        RenderQueue::Shadow,
        RenderQueue::OpaqueDepth,
        RenderQueue::Opaque,
        RenderQueue::OpaqueShading,
        RenderQueue::Lighting,
        RenderQueue::TransparentDepth,
        RenderQueue::Transparent,
        RenderQueue::TransparentShading,
        RenderQueue::Postprocess,
    ];

    /// The fixed technique-name table. Unrecognized names map to `None`
    /// and are dropped silently at registration.
    pub fn from_technique(name: &str) -> Option<RenderQueue> {
        match name {
            "Shadow" => Some(RenderQueue::Shadow),
            "OpaqueDepth" => Some(RenderQueue::OpaqueDepth),
            "Opaque" => Some(RenderQueue::Opaque),
            "OpaqueShading" => Some(RenderQueue::OpaqueShading),
            "Lighting" => Some(RenderQueue::Lighting),
            "TransparentDepth" => Some(RenderQueue::TransparentDepth),
            "Transparent" => Some(RenderQueue::Transparent),
            "TransparentShading" => Some(RenderQueue::TransparentShading),
            "Postprocess" => Some(RenderQueue::Postprocess),
            _ => None,
        }
    }

    /// The technique name this queue draws with.
    pub fn technique_name(&self) -> &'static str {
        match self {
            RenderQueue::Shadow => "Shadow",
            RenderQueue::OpaqueDepth => "OpaqueDepth",
            RenderQueue::Opaque => "Opaque",
            RenderQueue::OpaqueShading => "OpaqueShading",
            RenderQueue::Lighting => "Lighting",
            RenderQueue::TransparentDepth => "TransparentDepth",
            RenderQueue::Transparent => "Transparent",
            RenderQueue::TransparentShading => "TransparentShading",
            RenderQueue::Postprocess => "Postprocess",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Configuration for the deferred pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Initial render width
    pub width: u32,
    /// Initial render height
    pub height: u32,
    /// Shadow map resolution per light
    pub shadow_map_size: u32,
    /// Maximum number of visible lights per frame
    pub max_lights: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            shadow_map_size: 1024,
            max_lights: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_technique_table_round_trips() {
        for queue in RenderQueue::ALL {
            assert_eq!(RenderQueue::from_technique(queue.technique_name()), Some(queue));
        }
    }

    #[test]
    fn test_unknown_technique_dropped() {
        assert_eq!(RenderQueue::from_technique("Wireframe"), None);
        assert_eq!(RenderQueue::from_technique(""), None);
    }

    #[test]
    fn test_queue_bucket_order() {
        assert!(RenderQueue::Shadow < RenderQueue::OpaqueDepth);
        assert!(RenderQueue::Opaque < RenderQueue::Lighting);
        assert!(RenderQueue::Lighting < RenderQueue::TransparentDepth);
        assert!(RenderQueue::TransparentShading < RenderQueue::Postprocess);
    }
}
