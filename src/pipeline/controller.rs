//! Deferred pipeline controller.
//!
//! Top-level per-frame orchestrator. Owns the controller-side material set
//! (per-light-type lighting passes, resolve, copy), the shared parameter
//! table, the render-target set, and one shadow target per shadow-casting
//! light. Sequences the frame strictly: shadows, depth pre-pass, G-buffer
//! fill, lighting accumulation, opaque shading, transparent branch, final
//! copy. Not safe for concurrent frames.

use std::collections::HashMap;

use glam::{Mat4, Vec2, Vec4};

use crate::backend::traits::{GraphicsBackend, ShaderDescriptor, ShaderHandle};
use crate::backend::types::{ClearValues, InputLayout, TextureDescriptor, TextureFormat};
use crate::materials::{CollectedParams, MaterialPass, ParamId, ParamValue, ParameterTable, Semantic};
use crate::pipeline::facade::RenderPipeline;
use crate::pipeline::targets::{DeferredTargets, GBUFFER_TARGET_COUNT};
use crate::pipeline::{PipelineConfig, RenderQueue};
use crate::resources::{Framebuffer, FramebufferLayout, Texture};
use crate::scene::{Camera, Light, LightHandle, LightKind, Projection, Scene};
use crate::state::PipelineStateDesc;

/// Shadow map and framebuffer owned per shadow-casting light.
struct ShadowTarget {
    texture: Texture,
    framebuffer: Framebuffer,
}

/// The deferred pipeline controller.
pub struct DeferredController {
    config: PipelineConfig,
    active: bool,
    time: f32,
    targets: DeferredTargets,
    params: ParameterTable,
    light_view_proj: Option<ParamId>,

    lighting_passes: HashMap<LightKind, MaterialPass>,
    resolve_pass: Option<MaterialPass>,
    copy_pass: Option<MaterialPass>,
    owned_shaders: Vec<ShaderHandle>,

    shadow_targets: HashMap<LightHandle, ShadowTarget>,
    /// 1x1 depth texture bound for lights without a shadow map, so the
    /// lighting pass binding layout stays fixed.
    fallback_shadow: Texture,
}

impl DeferredController {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            active: false,
            time: 0.0,
            targets: DeferredTargets::new(),
            params: ParameterTable::new(),
            light_view_proj: None,
            lighting_passes: HashMap::new(),
            resolve_pass: None,
            copy_pass: None,
            owned_shaders: Vec::new(),
            shadow_targets: HashMap::new(),
            fallback_shadow: Texture::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn parameters(&self) -> &ParameterTable {
        &self.params
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterTable {
        &mut self.params
    }

    /// The render-target set, for debug overlays sampling intermediates.
    pub fn targets(&self) -> &DeferredTargets {
        &self.targets
    }

    /// Allocate materials, semantics, and all render targets.
    ///
    /// Returns `false` and tears everything back down when any allocation
    /// fails; a failed activation blocks all frame presentation.
    pub fn on_activate<B: GraphicsBackend>(&mut self, pipe: &mut RenderPipeline<B>) -> bool {
        if self.active {
            return true;
        }

        self.light_view_proj = Some(
            self.params
                .register("LightViewProjMatrix", ParamValue::Mat4(Mat4::IDENTITY)),
        );

        if !self.create_materials(pipe) {
            log::error!("deferred controller: material creation failed");
            self.on_deactivate(pipe);
            return false;
        }

        if !self.create_fallback_shadow(pipe) {
            log::error!("deferred controller: fallback shadow allocation failed");
            self.on_deactivate(pipe);
            return false;
        }

        if !self
            .targets
            .setup(pipe, self.config.width, self.config.height)
        {
            log::error!("deferred controller: target allocation failed");
            self.on_deactivate(pipe);
            return false;
        }

        self.active = true;
        log::info!(
            "deferred controller active ({}x{}, backend: {})",
            self.config.width,
            self.config.height,
            pipe.backend().name()
        );
        true
    }

    /// Release everything the controller owns.
    pub fn on_deactivate<B: GraphicsBackend>(&mut self, pipe: &mut RenderPipeline<B>) {
        self.targets.close(pipe);
        for (_, mut target) in self.shadow_targets.drain() {
            target.framebuffer.close(pipe.backend_mut());
            target.texture.close(pipe.backend_mut());
        }
        self.fallback_shadow.close(pipe.backend_mut());
        self.lighting_passes.clear();
        self.resolve_pass = None;
        self.copy_pass = None;
        for shader in self.owned_shaders.drain(..) {
            pipe.backend_mut().destroy_shader(shader);
        }
        self.active = false;
    }

    /// Destroy resolution-dependent targets ahead of a resize.
    pub fn on_resolution_change_before<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
    ) {
        self.targets.close(pipe);
    }

    /// Rebuild targets at the new resolution.
    pub fn on_resolution_change_after<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
        width: u32,
        height: u32,
    ) -> bool {
        self.config.width = width;
        self.config.height = height;
        if !self.active {
            return true;
        }
        self.targets.setup(pipe, width, height)
    }

    /// Refresh engine semantics. Setters are dirty-checked: an unchanged
    /// camera leaves the table generation alone, so the next frame uploads
    /// byte-identical parameters.
    pub fn on_render_pre<B: GraphicsBackend>(
        &mut self,
        pipe: &RenderPipeline<B>,
        delta_seconds: f32,
    ) {
        if delta_seconds > 0.0 {
            self.time += delta_seconds;
            self.params
                .set_semantic(Semantic::Time, ParamValue::Float(self.time));
        }
        let camera = pipe.camera().uniform_data();
        self.params
            .set_semantic(Semantic::ViewMatrix, ParamValue::Mat4(camera.view));
        self.params
            .set_semantic(Semantic::ProjMatrix, ParamValue::Mat4(camera.proj));
        self.params
            .set_semantic(Semantic::ViewProjMatrix, ParamValue::Mat4(camera.view_proj));
        self.params
            .set_semantic(Semantic::InvViewMatrix, ParamValue::Mat4(camera.inv_view));
        self.params
            .set_semantic(Semantic::InvProjMatrix, ParamValue::Mat4(camera.inv_proj));
        self.params.set_semantic(
            Semantic::CameraPosition,
            ParamValue::Vec4(camera.position),
        );
        self.params.set_semantic(
            Semantic::ScreenSize,
            ParamValue::Vec2(Vec2::new(
                self.config.width as f32,
                self.config.height as f32,
            )),
        );
    }

    /// Run the frame's pass sequence into `output` (`None` = backend
    /// default target).
    ///
    /// Stage order is not reorderable: each stage samples outputs written
    /// by an earlier one. Queues with no registered pass are skipped
    /// without error; per-frame draw issues are logged and swallowed
    /// inside the facade.
    pub fn on_render_pipeline<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
        scene: &Scene,
        output: Option<&Framebuffer>,
    ) {
        if !self.active || !self.targets.is_ready() {
            return;
        }

        self.render_shadow_maps(pipe, scene);
        self.render_depth_prepass(pipe, scene);
        self.render_gbuffer(pipe, scene);
        self.render_lighting(pipe, scene);
        self.render_opaque_shading(pipe);
        let final_source_is_transparent = self.render_transparent(pipe, scene);
        self.render_final_resolve(pipe, final_source_is_transparent);
        self.render_postprocess(pipe, scene);
        self.render_output_copy(pipe, output);
    }

    /// End-of-frame bookkeeping.
    pub fn on_render_post(&mut self) {
        log::trace!("deferred frame complete (time {:.3})", self.time);
    }

    // Pass sequence

    fn render_shadow_maps<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
        scene: &Scene,
    ) {
        if scene.queues().is_empty(RenderQueue::Shadow) {
            return;
        }
        let Some(param) = self.light_view_proj else {
            return;
        };

        // Drop targets whose light no longer casts shadows.
        let mut stale: Vec<LightHandle> = Vec::new();
        for handle in self.shadow_targets.keys() {
            let alive = scene
                .light(*handle)
                .is_some_and(|l| l.visible && l.casts_shadows && l.supports_shadows());
            if !alive {
                stale.push(*handle);
            }
        }
        for handle in stale {
            if let Some(mut target) = self.shadow_targets.remove(&handle) {
                target.framebuffer.close(pipe.backend_mut());
                target.texture.close(pipe.backend_mut());
            }
        }

        for (handle, light) in scene.shadow_lights() {
            if !self.ensure_shadow_target(pipe, handle) {
                continue;
            }
            let camera = shadow_camera(light);
            self.params.set(
                param,
                ParamValue::Mat4(camera.view_projection_matrix()),
            );

            let Some(target) = self.shadow_targets.get(&handle) else {
                continue;
            };
            pipe.set_framebuffer(Some(&target.framebuffer));
            pipe.clear_framebuffer(&ClearValues::depth_only(1.0));
            pipe.draw_bucket(scene, RenderQueue::Shadow, &self.params);
        }
    }

    fn render_depth_prepass<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
        scene: &Scene,
    ) {
        let Some(framebuffer) = self.targets.depth_framebuffer() else {
            return;
        };
        pipe.set_framebuffer(Some(framebuffer));
        pipe.clear_framebuffer(&ClearValues::color_depth([1.0, 1.0, 1.0, 1.0], 1.0));
        if !scene.queues().is_empty(RenderQueue::OpaqueDepth) {
            pipe.draw_bucket(scene, RenderQueue::OpaqueDepth, &self.params);
        }
    }

    fn render_gbuffer<B: GraphicsBackend>(&mut self, pipe: &mut RenderPipeline<B>, scene: &Scene) {
        let Some(framebuffer) = self.targets.gbuffer_framebuffer() else {
            return;
        };
        pipe.set_framebuffer(Some(framebuffer));
        // Depth was filled by the pre-pass; clear color targets only.
        pipe.clear_framebuffer(&ClearValues::color_only([0.0, 0.0, 0.0, 0.0]));
        if !scene.queues().is_empty(RenderQueue::Opaque) {
            pipe.draw_bucket(scene, RenderQueue::Opaque, &self.params);
        }
    }

    fn render_lighting<B: GraphicsBackend>(&mut self, pipe: &mut RenderPipeline<B>, scene: &Scene) {
        let Some(framebuffer) = self.targets.lighting_framebuffer() else {
            return;
        };
        pipe.set_framebuffer(Some(framebuffer));
        pipe.clear_framebuffer(&ClearValues::color_only([0.0, 0.0, 0.0, 1.0]));

        let gbuffer_views: Vec<_> = (0..GBUFFER_TARGET_COUNT)
            .filter_map(|i| self.targets.gbuffer_view(i))
            .collect();
        let linear_depth_view = self.targets.linear_depth_view();
        let fallback_shadow_view = self.fallback_shadow.view();

        for (handle, light) in scene.visible_lights() {
            // Runtime dispatch by light type; a kind with no registered
            // pass is skipped silently.
            let Some(pass) = self.lighting_passes.get_mut(&light.kind) else {
                continue;
            };

            let shadow_view = self
                .shadow_targets
                .get(&handle)
                .and_then(|t| t.texture.view());
            let has_shadow = shadow_view.is_some();

            let mut extra = CollectedParams::default();
            extra
                .uniforms
                .extend_from_slice(bytemuck::bytes_of(&light.to_gpu_data()));
            let shadow_matrix = if has_shadow {
                shadow_camera(light).view_projection_matrix()
            } else {
                Mat4::IDENTITY
            };
            extra
                .uniforms
                .extend_from_slice(bytemuck::bytes_of(&shadow_matrix));
            extra.uniforms.extend_from_slice(bytemuck::bytes_of(&Vec4::new(
                if has_shadow { 1.0 } else { 0.0 },
                0.0,
                0.0,
                0.0,
            )));

            extra.textures.extend_from_slice(&gbuffer_views);
            extra.textures.extend(linear_depth_view);
            // The binding layout is fixed: lights without a shadow map
            // bind the fallback and mask it out with the flag above.
            extra.textures.extend(shadow_view.or(fallback_shadow_view));

            pipe.draw_screen_quad(pass, &self.params, &extra);
        }
    }

    fn render_opaque_shading<B: GraphicsBackend>(&mut self, pipe: &mut RenderPipeline<B>) {
        let Some(framebuffer) = self.targets.opaque_framebuffer() else {
            return;
        };
        let Some(pass) = self.resolve_pass.as_mut() else {
            return;
        };
        pipe.set_framebuffer(Some(framebuffer));
        pipe.clear_framebuffer(&ClearValues::color_only([0.0, 0.0, 0.0, 1.0]));

        let mut extra = CollectedParams::default();
        for i in 0..GBUFFER_TARGET_COUNT {
            extra.textures.extend(self.targets.gbuffer_view(i));
        }
        extra.textures.extend(self.targets.lighting_view());
        pipe.draw_screen_quad(pass, &self.params, &extra);
    }

    /// Transparent branch. Returns true when the transparent shading
    /// target holds the frame (transparents were drawn), false when the
    /// opaque shading target is still the latest.
    fn render_transparent<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
        scene: &Scene,
    ) -> bool {
        let queues = scene.queues();
        let has_transparents = !queues.is_empty(RenderQueue::Transparent)
            || !queues.is_empty(RenderQueue::TransparentShading);
        if !has_transparents {
            return false;
        }

        // Transparent depth over the opaque depth buffer, no clear.
        if !queues.is_empty(RenderQueue::TransparentDepth) {
            if let Some(framebuffer) = self.targets.depth_framebuffer() {
                pipe.set_framebuffer(Some(framebuffer));
                pipe.draw_bucket(scene, RenderQueue::TransparentDepth, &self.params);
            }
        }

        // Ping-pong: the opaque result moves to the swap target so the
        // transparent pass never reads the target it writes.
        let opaque_view = self.targets.opaque_shading_map().and_then(|t| t.view());
        let swap_view = self.targets.swap_map().and_then(|t| t.view());
        let (Some(opaque_view), Some(swap_view)) = (opaque_view, swap_view) else {
            return false;
        };
        let Some(copy) = self.copy_pass.as_mut() else {
            return false;
        };

        if let Some(framebuffer) = self.targets.swap_framebuffer() {
            pipe.set_framebuffer(Some(framebuffer));
            let extra = CollectedParams {
                uniforms: Vec::new(),
                textures: vec![opaque_view],
            };
            pipe.draw_screen_quad(copy, &self.params, &extra);
        }

        if let Some(framebuffer) = self.targets.transparent_framebuffer() {
            pipe.set_framebuffer(Some(framebuffer));
            // Background first, then blended transparents over it.
            let extra = CollectedParams {
                uniforms: Vec::new(),
                textures: vec![swap_view],
            };
            pipe.draw_screen_quad(copy, &self.params, &extra);
            pipe.draw_bucket(scene, RenderQueue::Transparent, &self.params);
            if !queues.is_empty(RenderQueue::TransparentShading) {
                pipe.draw_bucket(scene, RenderQueue::TransparentShading, &self.params);
            }
        }
        true
    }

    /// Move the latest shading result into the final shading target.
    fn render_final_resolve<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
        from_transparent: bool,
    ) {
        let source = if from_transparent {
            self.targets.transparent_shading_map()
        } else {
            self.targets.opaque_shading_map()
        };
        let source_view = source.and_then(|t| t.view());
        let (Some(source_view), Some(framebuffer)) =
            (source_view, self.targets.final_framebuffer())
        else {
            return;
        };
        let Some(copy) = self.copy_pass.as_mut() else {
            return;
        };

        pipe.set_framebuffer(Some(framebuffer));
        let extra = CollectedParams {
            uniforms: Vec::new(),
            textures: vec![source_view],
        };
        pipe.draw_screen_quad(copy, &self.params, &extra);
    }

    /// Screen-space postprocess passes, each ping-ponged through the swap
    /// target so no pass samples the target it writes.
    fn render_postprocess<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
        scene: &Scene,
    ) {
        if scene.queues().is_empty(RenderQueue::Postprocess) {
            return;
        }
        let final_view = self.targets.final_shading_map().and_then(|t| t.view());
        let swap_view = self.targets.swap_map().and_then(|t| t.view());
        let (Some(final_view), Some(swap_view)) = (final_view, swap_view) else {
            return;
        };
        let Some(copy) = self.copy_pass.as_mut() else {
            return;
        };

        // Previous result moves to swap; the pass writes final reading swap.
        if let Some(framebuffer) = self.targets.swap_framebuffer() {
            pipe.set_framebuffer(Some(framebuffer));
            let extra = CollectedParams {
                uniforms: Vec::new(),
                textures: vec![final_view],
            };
            pipe.draw_screen_quad(copy, &self.params, &extra);
        }
        if let Some(framebuffer) = self.targets.final_framebuffer() {
            pipe.set_framebuffer(Some(framebuffer));
            let extra = CollectedParams {
                uniforms: Vec::new(),
                textures: vec![swap_view],
            };
            pipe.draw_screen_quad(copy, &self.params, &extra);
            pipe.draw_bucket(scene, RenderQueue::Postprocess, &self.params);
        }
    }

    /// Blit the final shading target into the frame's output target.
    fn render_output_copy<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
        output: Option<&Framebuffer>,
    ) {
        let Some(final_view) = self.targets.final_shading_map().and_then(|t| t.view()) else {
            return;
        };
        let Some(copy) = self.copy_pass.as_mut() else {
            return;
        };
        pipe.set_framebuffer(output);
        let extra = CollectedParams {
            uniforms: Vec::new(),
            textures: vec![final_view],
        };
        pipe.draw_screen_quad(copy, &self.params, &extra);
    }

    // Setup helpers

    fn create_materials<B: GraphicsBackend>(&mut self, pipe: &mut RenderPipeline<B>) -> bool {
        let Some(lighting_shader) = pipe.create_shader(&ShaderDescriptor {
            label: Some("deferred_lighting".into()),
            source: LIGHTING_SHADER.into(),
            vs_entry: "vs_main".into(),
            fs_entry: Some("fs_main".into()),
        }) else {
            return false;
        };
        self.owned_shaders.push(lighting_shader);

        let Some(resolve_shader) = pipe.create_shader(&ShaderDescriptor {
            label: Some("deferred_resolve".into()),
            source: RESOLVE_SHADER.into(),
            vs_entry: "vs_main".into(),
            fs_entry: Some("fs_main".into()),
        }) else {
            return false;
        };
        self.owned_shaders.push(resolve_shader);

        let Some(copy_shader) = pipe.create_shader(&ShaderDescriptor {
            label: Some("deferred_copy".into()),
            source: COPY_SHADER.into(),
            vs_entry: "vs_main".into(),
            fs_entry: Some("fs_main".into()),
        }) else {
            return false;
        };
        self.owned_shaders.push(copy_shader);

        for kind in LightKind::ALL {
            let pass = MaterialPass::new(
                "Lighting",
                lighting_shader,
                PipelineStateDesc::additive_lighting(),
                InputLayout::screen_quad(),
            )
            .with_param("InvViewMatrix")
            .with_param("InvProjMatrix")
            .with_param("CameraPosition")
            .with_param("ScreenSize");
            self.lighting_passes.insert(kind, pass);
        }

        self.resolve_pass = Some(
            MaterialPass::new(
                "OpaqueShading",
                resolve_shader,
                PipelineStateDesc::screen_quad(),
                InputLayout::screen_quad(),
            )
            .with_param("CameraPosition"),
        );

        self.copy_pass = Some(MaterialPass::new(
            "Copy",
            copy_shader,
            PipelineStateDesc::screen_quad(),
            InputLayout::screen_quad(),
        ));

        for pass in self.lighting_passes.values_mut() {
            pass.resolve_bindings(&self.params);
        }
        if let Some(pass) = self.resolve_pass.as_mut() {
            pass.resolve_bindings(&self.params);
        }
        true
    }

    fn create_fallback_shadow<B: GraphicsBackend>(&mut self, pipe: &mut RenderPipeline<B>) -> bool {
        let Some(format) = pipe.caps().first_supported(&[
            TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8,
        ]) else {
            return false;
        };
        self.fallback_shadow.setup(
            pipe.backend_mut(),
            &TextureDescriptor::render_target("shadow_fallback", 1, 1, format),
            None,
        )
    }

    fn ensure_shadow_target<B: GraphicsBackend>(
        &mut self,
        pipe: &mut RenderPipeline<B>,
        handle: LightHandle,
    ) -> bool {
        if self.shadow_targets.contains_key(&handle) {
            return true;
        }
        let Some(format) = pipe.caps().first_supported(&[
            TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8,
        ]) else {
            return false;
        };
        let size = self.config.shadow_map_size;

        let mut texture = Texture::new();
        if !texture.setup(
            pipe.backend_mut(),
            &TextureDescriptor::render_target("shadow_map", size, size, format),
            None,
        ) {
            return false;
        }
        let mut framebuffer = Framebuffer::new();
        let layout = FramebufferLayout::depth_only(format);
        if !framebuffer.setup(
            pipe.backend_mut(),
            "shadow_fb",
            &layout,
            Vec::new(),
            texture.view(),
            size,
            size,
        ) {
            texture.close(pipe.backend_mut());
            return false;
        }

        self.shadow_targets.insert(
            handle,
            ShadowTarget {
                texture,
                framebuffer,
            },
        );
        true
    }

    /// Shadow map view for a light, when one exists.
    pub fn shadow_map(&self, handle: LightHandle) -> Option<&Texture> {
        self.shadow_targets.get(&handle).map(|t| &t.texture)
    }
}

/// Build the camera a light renders its shadow map with.
fn shadow_camera(light: &Light) -> Camera {
    match light.kind {
        LightKind::Directional => {
            Camera::shadow_ortho(glam::Vec3::ZERO, light.direction, 50.0, 200.0)
        }
        _ => Camera {
            position: light.position,
            target: light.position + light.direction,
            up: if light.direction.cross(glam::Vec3::Y).length_squared() < 1e-6 {
                glam::Vec3::Z
            } else {
                glam::Vec3::Y
            },
            projection: Projection::Perspective {
                fov_y: match light.kind {
                    LightKind::Spot => (light.outer_angle * 2.0).min(std::f32::consts::PI - 0.01),
                    _ => std::f32::consts::FRAC_PI_2,
                },
                aspect: 1.0,
                near: 0.1,
                far: light.range.max(0.2),
            },
        },
    }
}

// Shader sources for the controller-owned passes. Fullscreen passes
// generate a single triangle from the vertex index, so no vertex buffers
// are bound.

/// Per-light accumulation over the G-buffer.
pub const LIGHTING_SHADER: &str = r#"
struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VsOut {
    var out: VsOut;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    out.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, 1.0 - y);
    return out;
}

struct LightingUniforms {
    inv_view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    camera_position: vec4<f32>,
    screen_size: vec4<f32>,
    light_position_range: vec4<f32>,
    light_color_intensity: vec4<f32>,
    light_direction_kind: vec4<f32>,
    light_params: vec4<f32>,
    shadow_matrix: mat4x4<f32>,
    shadow_flags: vec4<f32>,
}

@group(0) @binding(0) var<uniform> u: LightingUniforms;
@group(1) @binding(0) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(1) var gbuffer_sampler: sampler;
@group(1) @binding(2) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(3) var normal_sampler: sampler;
@group(1) @binding(4) var gbuffer_material: texture_2d<f32>;
@group(1) @binding(5) var material_sampler: sampler;
@group(1) @binding(6) var gbuffer_emissive: texture_2d<f32>;
@group(1) @binding(7) var emissive_sampler: sampler;
@group(1) @binding(8) var linear_depth: texture_2d<f32>;
@group(1) @binding(9) var depth_sampler: sampler;
@group(1) @binding(10) var shadow_map: texture_depth_2d;
@group(1) @binding(11) var shadow_sampler: sampler_comparison;

fn reconstruct_view_ray(uv: vec2<f32>) -> vec3<f32> {
    let ndc = vec4<f32>(uv * 2.0 - 1.0, 1.0, 1.0);
    let view = u.inv_proj * ndc;
    return normalize((u.inv_view * vec4<f32>(view.xyz / view.w, 0.0)).xyz);
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let albedo = textureSample(gbuffer_albedo, gbuffer_sampler, in.uv);
    let normal_sample = textureSample(gbuffer_normal, normal_sampler, in.uv);
    let material = textureSample(gbuffer_material, material_sampler, in.uv);

    // Linear depth is an unfilterable float target; load the texel directly.
    let depth_dims = textureDimensions(linear_depth);
    let depth_coord = vec2<i32>(in.uv * vec2<f32>(depth_dims));
    let depth = textureLoad(linear_depth, depth_coord, 0).r;

    let normal = normalize(normal_sample.xyz * 2.0 - 1.0);
    let ray = reconstruct_view_ray(in.uv);
    let world_pos = u.camera_position.xyz + ray * depth;

    let shadow_pos = u.shadow_matrix * vec4<f32>(world_pos, 1.0);
    let shadow_ndc = shadow_pos.xyz / shadow_pos.w;
    let shadow_uv = shadow_ndc.xy * vec2<f32>(0.5, -0.5) + 0.5;
    let shadow_sample = textureSampleCompareLevel(
        shadow_map, shadow_sampler, shadow_uv, shadow_ndc.z - 0.002);
    let shadow = mix(1.0, shadow_sample, u.shadow_flags.x);

    let kind = u32(u.light_direction_kind.w);
    var light_dir = -normalize(u.light_direction_kind.xyz);
    var attenuation = 1.0;

    if (kind == 1u || kind == 2u) {
        let to_light = u.light_position_range.xyz - world_pos;
        let distance = length(to_light);
        light_dir = normalize(to_light);
        let range = max(u.light_position_range.w, 0.001);
        let falloff = clamp(1.0 - distance / range, 0.0, 1.0);
        attenuation = falloff * falloff;
        if (kind == 2u) {
            let cos_angle = dot(-light_dir, normalize(u.light_direction_kind.xyz));
            let spot = clamp(
                (cos_angle - u.light_params.y) / max(u.light_params.x - u.light_params.y, 0.001),
                0.0,
                1.0,
            );
            attenuation = attenuation * spot;
        }
    }

    var radiance = vec3<f32>(0.0);
    if (kind == 3u) {
        radiance = albedo.rgb * u.light_color_intensity.rgb * u.light_color_intensity.w;
    } else if (kind == 4u) {
        let blend = normal.y * 0.5 + 0.5;
        let sky = u.light_color_intensity.rgb;
        let ground = u.light_params.rgb;
        radiance = albedo.rgb * mix(ground, sky, blend) * u.light_color_intensity.w;
    } else {
        let ndotl = max(dot(normal, light_dir), 0.0);
        let metallic = material.r;
        let diffuse = albedo.rgb * (1.0 - metallic);
        radiance = diffuse * ndotl * u.light_color_intensity.rgb
            * u.light_color_intensity.w * attenuation * shadow;
    }

    return vec4<f32>(radiance, 1.0);
}
"#;

/// Resolve G-buffer + lighting accumulation into the shading target.
pub const RESOLVE_SHADER: &str = r#"
struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VsOut {
    var out: VsOut;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    out.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, 1.0 - y);
    return out;
}

struct ResolveUniforms {
    camera_position: vec4<f32>,
}

@group(0) @binding(0) var<uniform> u: ResolveUniforms;
@group(1) @binding(0) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(1) var albedo_sampler: sampler;
@group(1) @binding(2) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(3) var normal_sampler: sampler;
@group(1) @binding(4) var gbuffer_material: texture_2d<f32>;
@group(1) @binding(5) var material_sampler: sampler;
@group(1) @binding(6) var gbuffer_emissive: texture_2d<f32>;
@group(1) @binding(7) var emissive_sampler: sampler;
@group(1) @binding(8) var lighting: texture_2d<f32>;
@group(1) @binding(9) var lighting_sampler: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let light = textureSample(lighting, lighting_sampler, in.uv).rgb;
    let emissive = textureSample(gbuffer_emissive, emissive_sampler, in.uv).rgb;
    return vec4<f32>(light + emissive, 1.0);
}
"#;

/// Plain copy of one texture, used for swap/final/output moves.
pub const COPY_SHADER: &str = r#"
struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VsOut {
    var out: VsOut;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    out.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, 1.0 - y);
    return out;
}

@group(1) @binding(0) var source: texture_2d<f32>;
@group(1) @binding(1) var source_sampler: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(source, source_sampler, in.uv);
}
"#;
