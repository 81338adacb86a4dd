//! Fixed-function pipeline state and the state diff engine.
//!
//! [`PipelineStateDesc`] is an immutable value describing blend, raster,
//! depth, and stencil configuration. [`PipelineState::apply`] compares the
//! stored descriptor against the previously applied one, field group by
//! field group, and issues exactly one [`StateEmitter`] call per changed
//! group. Unchanged groups never reach the backend.

use crate::backend::traits::{StateEmitter, StencilFaceDesc};
use crate::backend::types::*;

/// Blend component: factors and operation for one channel set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

/// Blend group: enable plus separate color/alpha components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlendStateDesc {
    pub enabled: bool,
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendStateDesc {
    /// Standard src-over-dst alpha blending.
    pub fn alpha_blending() -> Self {
        Self {
            enabled: true,
            color: BlendComponent {
                src_factor: BlendFactor::SrcAlpha,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
                operation: BlendOperation::Add,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
                operation: BlendOperation::Add,
            },
        }
    }

    /// Additive accumulation (used by the lighting passes).
    pub fn additive() -> Self {
        let component = BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::One,
            operation: BlendOperation::Add,
        };
        Self {
            enabled: true,
            color: component,
            alpha: component,
        }
    }
}

/// Raster group: cull, fill, scissor, sRGB write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RasterStateDesc {
    pub cull_mode: CullMode,
    pub fill_mode: FillMode,
    pub scissor: Option<ScissorRect>,
    pub srgb_write: bool,
}

/// Depth group: test, write, compare, bias
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthStateDesc {
    pub test_enabled: bool,
    pub write_enabled: bool,
    pub compare: CompareFunction,
    pub bias_constant: f32,
    pub bias_slope_scale: f32,
}

impl Default for DepthStateDesc {
    fn default() -> Self {
        Self {
            test_enabled: true,
            write_enabled: true,
            compare: CompareFunction::Less,
            bias_constant: 0.0,
            bias_slope_scale: 0.0,
        }
    }
}

/// Stencil group: enable plus front/back face configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StencilStateDesc {
    pub enabled: bool,
    pub front: StencilFaceDesc,
    pub back: StencilFaceDesc,
}

impl StencilStateDesc {
    /// Whether the front and back faces need separate backend calls.
    pub fn is_two_sided(&self) -> bool {
        self.front != self.back
    }
}

/// Complete fixed-function state descriptor
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PipelineStateDesc {
    pub blend: BlendStateDesc,
    pub raster: RasterStateDesc,
    pub depth: DepthStateDesc,
    pub stencil: StencilStateDesc,
}

impl PipelineStateDesc {
    /// Opaque geometry: no blend, back-face cull, depth test + write.
    pub fn opaque() -> Self {
        Self::default()
    }

    /// Depth-only rendering (shadow maps, pre-pass).
    pub fn depth_only() -> Self {
        Self::default()
    }

    /// Depth-only with polygon offset, for shadow rendering.
    pub fn shadow(bias_constant: f32, bias_slope_scale: f32) -> Self {
        Self {
            depth: DepthStateDesc {
                bias_constant,
                bias_slope_scale,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Additive accumulation over an equal-depth test, no depth write.
    pub fn additive_lighting() -> Self {
        Self {
            blend: BlendStateDesc::additive(),
            raster: RasterStateDesc {
                cull_mode: CullMode::None,
                ..Default::default()
            },
            depth: DepthStateDesc {
                test_enabled: false,
                write_enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Screen-space resolve: no blend, no cull, no depth.
    pub fn screen_quad() -> Self {
        Self {
            raster: RasterStateDesc {
                cull_mode: CullMode::None,
                ..Default::default()
            },
            depth: DepthStateDesc {
                test_enabled: false,
                write_enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Transparent geometry: alpha blend, depth test without write.
    pub fn transparent() -> Self {
        Self {
            blend: BlendStateDesc::alpha_blending(),
            depth: DepthStateDesc {
                write_enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Desired fixed-function state plus the diffing application logic.
///
/// Mutates backend-global pipeline state through the emitter; not reentrant
/// without external synchronization. `apply` itself never fails; backend
/// error surfacing is a device-owned check elsewhere.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    desc: PipelineStateDesc,
}

impl PipelineState {
    pub fn new(desc: PipelineStateDesc) -> Self {
        Self { desc }
    }

    /// Store the desired descriptor. Accepts any in-range values;
    /// backend-specific rejection is a device-level concern.
    pub fn setup(&mut self, desc: PipelineStateDesc) {
        self.desc = desc;
    }

    pub fn desc(&self) -> &PipelineStateDesc {
        &self.desc
    }

    /// Diff against the previously applied descriptor and emit one backend
    /// call per changed group. Returns the number of calls issued; zero for
    /// identical descriptors.
    pub fn apply(&self, last: &PipelineStateDesc, emitter: &mut dyn StateEmitter) -> u32 {
        let desc = &self.desc;
        let mut calls = 0;

        if desc.blend.enabled != last.blend.enabled {
            emitter.set_blend_enabled(desc.blend.enabled);
            calls += 1;
        }
        let func = |b: &BlendStateDesc| {
            (
                b.color.src_factor,
                b.color.dst_factor,
                b.alpha.src_factor,
                b.alpha.dst_factor,
            )
        };
        if func(&desc.blend) != func(&last.blend) {
            emitter.set_blend_func(
                desc.blend.color.src_factor,
                desc.blend.color.dst_factor,
                desc.blend.alpha.src_factor,
                desc.blend.alpha.dst_factor,
            );
            calls += 1;
        }
        if (desc.blend.color.operation, desc.blend.alpha.operation)
            != (last.blend.color.operation, last.blend.alpha.operation)
        {
            emitter.set_blend_op(desc.blend.color.operation, desc.blend.alpha.operation);
            calls += 1;
        }

        if desc.raster.cull_mode != last.raster.cull_mode {
            emitter.set_cull_mode(desc.raster.cull_mode);
            calls += 1;
        }
        if desc.raster.fill_mode != last.raster.fill_mode {
            emitter.set_fill_mode(desc.raster.fill_mode);
            calls += 1;
        }
        if desc.raster.scissor != last.raster.scissor {
            emitter.set_scissor(desc.raster.scissor);
            calls += 1;
        }
        if desc.raster.srgb_write != last.raster.srgb_write {
            emitter.set_srgb_write(desc.raster.srgb_write);
            calls += 1;
        }

        if desc.depth.test_enabled != last.depth.test_enabled {
            emitter.set_depth_test(desc.depth.test_enabled);
            calls += 1;
        }
        if desc.depth.compare != last.depth.compare {
            emitter.set_depth_func(desc.depth.compare);
            calls += 1;
        }
        if desc.depth.write_enabled != last.depth.write_enabled {
            emitter.set_depth_write(desc.depth.write_enabled);
            calls += 1;
        }
        if (desc.depth.bias_constant, desc.depth.bias_slope_scale)
            != (last.depth.bias_constant, last.depth.bias_slope_scale)
        {
            emitter.set_depth_bias(desc.depth.bias_constant, desc.depth.bias_slope_scale);
            calls += 1;
        }

        if desc.stencil.enabled != last.stencil.enabled {
            emitter.set_stencil_enabled(desc.stencil.enabled);
            calls += 1;
        }
        if (desc.stencil.front, desc.stencil.back) != (last.stencil.front, last.stencil.back) {
            // Single- and two-sided stencil are distinct backend paths.
            if desc.stencil.is_two_sided() {
                emitter.set_stencil_separate(&desc.stencil.front, &desc.stencil.back);
            } else {
                emitter.set_stencil(&desc.stencil.front);
            }
            calls += 1;
        }

        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emitter that records which state groups were touched.
    #[derive(Default)]
    struct RecordingEmitter {
        calls: Vec<&'static str>,
    }

    impl StateEmitter for RecordingEmitter {
        fn set_blend_enabled(&mut self, _: bool) {
            self.calls.push("blend_enabled");
        }
        fn set_blend_func(
            &mut self,
            _: BlendFactor,
            _: BlendFactor,
            _: BlendFactor,
            _: BlendFactor,
        ) {
            self.calls.push("blend_func");
        }
        fn set_blend_op(&mut self, _: BlendOperation, _: BlendOperation) {
            self.calls.push("blend_op");
        }
        fn set_cull_mode(&mut self, _: CullMode) {
            self.calls.push("cull_mode");
        }
        fn set_fill_mode(&mut self, _: FillMode) {
            self.calls.push("fill_mode");
        }
        fn set_scissor(&mut self, _: Option<ScissorRect>) {
            self.calls.push("scissor");
        }
        fn set_srgb_write(&mut self, _: bool) {
            self.calls.push("srgb_write");
        }
        fn set_depth_test(&mut self, _: bool) {
            self.calls.push("depth_test");
        }
        fn set_depth_func(&mut self, _: CompareFunction) {
            self.calls.push("depth_func");
        }
        fn set_depth_write(&mut self, _: bool) {
            self.calls.push("depth_write");
        }
        fn set_depth_bias(&mut self, _: f32, _: f32) {
            self.calls.push("depth_bias");
        }
        fn set_stencil_enabled(&mut self, _: bool) {
            self.calls.push("stencil_enabled");
        }
        fn set_stencil(&mut self, _: &StencilFaceDesc) {
            self.calls.push("stencil");
        }
        fn set_stencil_separate(&mut self, _: &StencilFaceDesc, _: &StencilFaceDesc) {
            self.calls.push("stencil_separate");
        }
    }

    #[test]
    fn test_identical_descriptors_emit_nothing() {
        let desc = PipelineStateDesc::transparent();
        let state = PipelineState::new(desc);
        let mut emitter = RecordingEmitter::default();
        assert_eq!(state.apply(&desc, &mut emitter), 0);
        assert!(emitter.calls.is_empty());
    }

    #[test]
    fn test_single_group_change_emits_one_call() {
        let last = PipelineStateDesc::opaque();
        let mut desc = last;
        desc.raster.cull_mode = CullMode::Front;
        let state = PipelineState::new(desc);
        let mut emitter = RecordingEmitter::default();
        assert_eq!(state.apply(&last, &mut emitter), 1);
        assert_eq!(emitter.calls, vec!["cull_mode"]);
    }

    #[test]
    fn test_blend_groups_are_independent() {
        let last = PipelineStateDesc::opaque();
        let state = PipelineState::new(PipelineStateDesc {
            blend: BlendStateDesc::additive(),
            ..last
        });
        let mut emitter = RecordingEmitter::default();
        // Enable changed, factors changed, ops unchanged (Add == default Add)
        state.apply(&last, &mut emitter);
        assert!(emitter.calls.contains(&"blend_enabled"));
        assert!(emitter.calls.contains(&"blend_func"));
        assert!(!emitter.calls.contains(&"blend_op"));
    }

    #[test]
    fn test_stencil_single_sided_path() {
        let last = PipelineStateDesc::opaque();
        let mut desc = last;
        desc.stencil.enabled = true;
        desc.stencil.front.compare = CompareFunction::Equal;
        desc.stencil.back.compare = CompareFunction::Equal;
        let state = PipelineState::new(desc);
        let mut emitter = RecordingEmitter::default();
        state.apply(&last, &mut emitter);
        assert!(emitter.calls.contains(&"stencil"));
        assert!(!emitter.calls.contains(&"stencil_separate"));
    }

    #[test]
    fn test_stencil_two_sided_path() {
        let last = PipelineStateDesc::opaque();
        let mut desc = last;
        desc.stencil.enabled = true;
        desc.stencil.front.pass_op = StencilOperation::IncrementWrap;
        desc.stencil.back.pass_op = StencilOperation::DecrementWrap;
        let state = PipelineState::new(desc);
        let mut emitter = RecordingEmitter::default();
        state.apply(&last, &mut emitter);
        assert!(emitter.calls.contains(&"stencil_separate"));
        assert!(!emitter.calls.contains(&"stencil"));
    }

    #[test]
    fn test_depth_bias_is_its_own_group() {
        let last = PipelineStateDesc::opaque();
        let state = PipelineState::new(PipelineStateDesc::shadow(2.0, 4.0));
        let mut emitter = RecordingEmitter::default();
        assert_eq!(state.apply(&last, &mut emitter), 1);
        assert_eq!(emitter.calls, vec!["depth_bias"]);
    }

    #[test]
    fn test_setup_replaces_descriptor() {
        let mut state = PipelineState::default();
        state.setup(PipelineStateDesc::additive_lighting());
        assert!(state.desc().blend.enabled);
    }
}
