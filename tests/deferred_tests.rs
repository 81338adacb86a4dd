//! Integration tests for the deferred pipeline.
//!
//! All tests run against the null backend, which records a trace of every
//! backend event. The trace is what the assertions inspect: pass ordering,
//! resource lifecycles, and upload determinism are all visible in it
//! without GPU hardware.

use rstest::rstest;

use deferred_engine::backend::null::{NullBackend, TraceEvent};
use deferred_engine::backend::traits::{DeviceCaps, ShaderDescriptor, ShaderHandle};
use deferred_engine::backend::types::{InputLayout, IndexFormat, TextureFormat};
use deferred_engine::materials::{Material, MaterialPass, Technique};
use deferred_engine::pipeline::{
    DeferredController, MaterialId, MeshHandle, PipelineConfig, RenderPipeline,
};
use deferred_engine::scene::{Light, Renderable, Scene};
use deferred_engine::state::PipelineStateDesc;
use glam::Vec3;

// ============================================================================
// Test helpers
// ============================================================================

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn pipeline() -> RenderPipeline<NullBackend> {
    init_logging();
    RenderPipeline::new(NullBackend::new())
}

fn pipeline_with_caps(caps: DeviceCaps) -> RenderPipeline<NullBackend> {
    init_logging();
    RenderPipeline::new(NullBackend::with_caps(caps))
}

fn test_shader(pipe: &mut RenderPipeline<NullBackend>, label: &str) -> ShaderHandle {
    pipe.create_shader(&ShaderDescriptor {
        label: Some(label.to_string()),
        source: "@vertex fn vs_main() {}".into(),
        vs_entry: "vs_main".into(),
        fs_entry: Some("fs_main".into()),
    })
    .expect("null backend accepts any non-empty shader")
}

/// A material exposing the standard opaque technique set.
fn opaque_material(pipe: &mut RenderPipeline<NullBackend>) -> MaterialId {
    let shader = test_shader(pipe, "surface");
    let pass = |name: &str, state: PipelineStateDesc| {
        MaterialPass::new(name, shader, state, InputLayout::standard())
            .with_param("ViewProjMatrix")
    };
    pipe.create_material(
        Material::new("surface")
            .with_technique(
                "Shadow",
                Technique::new().with_pass(
                    MaterialPass::new(
                        "main",
                        shader,
                        PipelineStateDesc::shadow(2.0, 4.0),
                        InputLayout::standard(),
                    )
                    .with_param("LightViewProjMatrix"),
                ),
            )
            .with_technique(
                "OpaqueDepth",
                Technique::new().with_pass(pass("main", PipelineStateDesc::depth_only())),
            )
            .with_technique(
                "Opaque",
                Technique::new().with_pass(pass("main", PipelineStateDesc::opaque())),
            ),
    )
}

fn transparent_material(pipe: &mut RenderPipeline<NullBackend>) -> MaterialId {
    let shader = test_shader(pipe, "glass");
    pipe.create_material(Material::new("glass").with_technique(
        "Transparent",
        Technique::new().with_pass(
            MaterialPass::new(
                "main",
                shader,
                PipelineStateDesc::transparent(),
                InputLayout::standard(),
            )
            .with_param("ViewProjMatrix"),
        ),
    ))
}

fn cube_mesh(pipe: &mut RenderPipeline<NullBackend>) -> MeshHandle {
    pipe.create_render_mesh(
        "cube",
        &vec![0u8; 24 * 48],
        &vec![0u8; 36 * 4],
        IndexFormat::Uint32,
        InputLayout::standard(),
    )
    .expect("mesh creation on null backend")
}

fn add_opaque_object(pipe: &mut RenderPipeline<NullBackend>, scene: &mut Scene) {
    let mesh = cube_mesh(pipe);
    let material = opaque_material(pipe);
    let renderable = Renderable::new(mesh, material);
    let mat_ref = pipe.material(material).expect("material just created");
    scene.add_renderable(renderable, mat_ref);
}

fn add_transparent_object(pipe: &mut RenderPipeline<NullBackend>, scene: &mut Scene) {
    let mesh = cube_mesh(pipe);
    let material = transparent_material(pipe);
    let renderable = Renderable::new(mesh, material);
    let mat_ref = pipe.material(material).expect("material just created");
    scene.add_renderable(renderable, mat_ref);
}

/// Index of the first draw submitted against the named framebuffer.
fn first_draw_on(trace: &[TraceEvent], framebuffer: &str) -> Option<usize> {
    trace.iter().position(|e| {
        matches!(e, TraceEvent::Draw { framebuffer: Some(label), .. } if label == framebuffer)
    })
}

fn draws_on(trace: &[TraceEvent], framebuffer: &str) -> usize {
    trace
        .iter()
        .filter(|e| {
            matches!(e, TraceEvent::Draw { framebuffer: Some(label), .. } if label == framebuffer)
        })
        .count()
}

// ============================================================================
// Activation lifecycle
// ============================================================================

#[test]
fn test_activation_allocates_and_deactivation_releases() {
    let mut pipe = pipeline();
    let mut controller = DeferredController::new(PipelineConfig::default());

    assert!(controller.on_activate(&mut pipe));
    assert!(controller.is_active());
    assert!(pipe.backend().live_texture_count() > 0);
    assert!(controller.targets().is_ready());

    controller.on_deactivate(&mut pipe);
    assert!(!controller.is_active());
    assert_eq!(pipe.backend().live_texture_count(), 0);
    assert_eq!(pipe.backend().live_framebuffer_count(), 0);
}

#[test]
fn test_activation_fails_without_depth_support() {
    let caps = DeviceCaps::full()
        .without_format(TextureFormat::Depth32Float)
        .without_format(TextureFormat::Depth24PlusStencil8);
    let mut pipe = pipeline_with_caps(caps);
    let mut controller = DeferredController::new(PipelineConfig::default());

    assert!(!controller.on_activate(&mut pipe));
    assert!(!controller.is_active());
    // Nothing partially allocated survives the failed activation
    assert_eq!(pipe.backend().live_texture_count(), 0);
    assert!(controller.targets().depth_map().is_none());
    assert!(controller.targets().lighting_map().is_none());
}

#[rstest]
#[case(1280, 720)]
#[case(1920, 1080)]
#[case(640, 480)]
fn test_resolution_change_keeps_single_handles(#[case] width: u32, #[case] height: u32) {
    let mut pipe = pipeline();
    let mut controller = DeferredController::new(PipelineConfig::default());
    assert!(controller.on_activate(&mut pipe));
    let baseline = pipe.backend().live_texture_count();

    controller.on_resolution_change_before(&mut pipe);
    assert!(controller.on_resolution_change_after(&mut pipe, width, height));

    assert_eq!(pipe.backend().live_texture_count(), baseline);
    assert_eq!(
        pipe.backend().live_textures_with_label("deferred_lighting"),
        1
    );
    assert_eq!(controller.targets().size(), (width, height));
    controller.on_deactivate(&mut pipe);
}

#[test]
fn test_format_table_is_pure_across_reactivation() {
    let mut pipe = pipeline();
    let mut controller = DeferredController::new(PipelineConfig::default());

    assert!(controller.on_activate(&mut pipe));
    let first = *controller.targets().formats().expect("ready after activate");
    controller.on_deactivate(&mut pipe);

    assert!(controller.on_activate(&mut pipe));
    let second = *controller.targets().formats().expect("ready after activate");
    assert_eq!(first, second);
    controller.on_deactivate(&mut pipe);
}

// ============================================================================
// Frame pass ordering
// ============================================================================

#[test]
fn test_frame_stage_order() {
    let mut pipe = pipeline();
    let mut scene = Scene::new();
    add_opaque_object(&mut pipe, &mut scene);
    add_transparent_object(&mut pipe, &mut scene);
    scene.add_light(Light::directional(-Vec3::Y, Vec3::ONE, 1.0).with_shadows());
    scene.add_light(Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 10.0));

    let mut controller = DeferredController::new(PipelineConfig::default());
    assert!(controller.on_activate(&mut pipe));
    pipe.backend_mut().take_trace();

    controller.on_render_pre(&pipe, 0.016);
    controller.on_render_pipeline(&mut pipe, &scene, None);
    controller.on_render_post();

    let trace = pipe.backend_mut().take_trace();
    let shadow = first_draw_on(&trace, "shadow_fb").expect("shadow draw");
    let depth = first_draw_on(&trace, "deferred_depth_fb").expect("depth pre-pass draw");
    let gbuffer = first_draw_on(&trace, "deferred_gbuffer_fb").expect("gbuffer draw");
    let lighting = first_draw_on(&trace, "deferred_lighting_fb").expect("lighting draw");
    let opaque = first_draw_on(&trace, "deferred_opaque_fb").expect("opaque resolve draw");
    let transparent =
        first_draw_on(&trace, "deferred_transparent_fb").expect("transparent draw");
    let final_copy = first_draw_on(&trace, "deferred_final_fb").expect("final copy draw");

    // G-buffer writes precede lighting reads; lighting precedes shading;
    // the transparent branch follows the opaque one.
    assert!(shadow < depth);
    assert!(depth < gbuffer);
    assert!(gbuffer < lighting);
    assert!(lighting < opaque);
    assert!(opaque < transparent);
    assert!(transparent < final_copy);

    controller.on_deactivate(&mut pipe);
}

#[test]
fn test_lighting_draws_one_accumulation_per_visible_light() {
    let mut pipe = pipeline();
    let mut scene = Scene::new();
    add_opaque_object(&mut pipe, &mut scene);
    scene.add_light(Light::directional(-Vec3::Y, Vec3::ONE, 1.0));
    scene.add_light(Light::point(Vec3::X, Vec3::ONE, 2.0, 5.0));
    scene.add_light(Light::ambient(Vec3::ONE, 0.1));
    scene.add_light(Light::hemisphere(Vec3::ONE, Vec3::ZERO, 0.5));
    let hidden = scene.add_light(Light::spot(
        Vec3::Y,
        -Vec3::Y,
        Vec3::ONE,
        1.0,
        8.0,
        0.3,
        0.5,
    ));
    scene.light_mut(hidden).expect("light exists").visible = false;

    let mut controller = DeferredController::new(PipelineConfig::default());
    assert!(controller.on_activate(&mut pipe));
    pipe.backend_mut().take_trace();

    controller.on_render_pre(&pipe, 0.016);
    controller.on_render_pipeline(&mut pipe, &scene, None);

    let trace = pipe.backend_mut().take_trace();
    assert_eq!(draws_on(&trace, "deferred_lighting_fb"), 4);
    controller.on_deactivate(&mut pipe);
}

#[test]
fn test_empty_queues_are_skipped_without_error() {
    let mut pipe = pipeline();
    let scene = Scene::new();

    let mut controller = DeferredController::new(PipelineConfig::default());
    assert!(controller.on_activate(&mut pipe));
    pipe.backend_mut().take_trace();

    controller.on_render_pre(&pipe, 0.016);
    controller.on_render_pipeline(&mut pipe, &scene, None);

    let trace = pipe.backend_mut().take_trace();
    // No geometry: no shadow or gbuffer draws, but the frame still resolves
    assert_eq!(draws_on(&trace, "shadow_fb"), 0);
    assert_eq!(draws_on(&trace, "deferred_gbuffer_fb"), 0);
    assert_eq!(draws_on(&trace, "deferred_opaque_fb"), 1);
    controller.on_deactivate(&mut pipe);
}

#[test]
fn test_transparent_branch_runs_only_with_transparents() {
    let mut pipe = pipeline();
    let mut scene = Scene::new();
    add_opaque_object(&mut pipe, &mut scene);

    let mut controller = DeferredController::new(PipelineConfig::default());
    assert!(controller.on_activate(&mut pipe));
    pipe.backend_mut().take_trace();

    controller.on_render_pre(&pipe, 0.016);
    controller.on_render_pipeline(&mut pipe, &scene, None);

    let trace = pipe.backend_mut().take_trace();
    assert_eq!(draws_on(&trace, "deferred_swap_fb"), 0);
    assert_eq!(draws_on(&trace, "deferred_transparent_fb"), 0);
    // The final target still receives the opaque result
    assert_eq!(draws_on(&trace, "deferred_final_fb"), 1);
    controller.on_deactivate(&mut pipe);
}

#[test]
fn test_swap_target_breaks_read_write_aliasing() {
    let mut pipe = pipeline();
    let mut scene = Scene::new();
    add_opaque_object(&mut pipe, &mut scene);
    add_transparent_object(&mut pipe, &mut scene);

    let mut controller = DeferredController::new(PipelineConfig::default());
    assert!(controller.on_activate(&mut pipe));
    pipe.backend_mut().take_trace();

    controller.on_render_pre(&pipe, 0.016);
    controller.on_render_pipeline(&mut pipe, &scene, None);

    let trace = pipe.backend_mut().take_trace();
    let swap = first_draw_on(&trace, "deferred_swap_fb").expect("swap copy");
    let transparent = first_draw_on(&trace, "deferred_transparent_fb").expect("transparent");
    // The opaque result moves to the swap target before the transparent
    // pass reads it back while writing its own target.
    assert!(swap < transparent);
    controller.on_deactivate(&mut pipe);
}

// ============================================================================
// Upload determinism
// ============================================================================

fn frame_uniform_uploads(trace: &[TraceEvent]) -> Vec<&Vec<u8>> {
    trace
        .iter()
        .filter_map(|e| match e {
            TraceEvent::Draw { uniform_bytes, .. } => Some(uniform_bytes),
            _ => None,
        })
        .collect()
}

#[test]
fn test_unchanged_frames_upload_identical_parameters() {
    let mut pipe = pipeline();
    let mut scene = Scene::new();
    add_opaque_object(&mut pipe, &mut scene);
    scene.add_light(Light::directional(-Vec3::Y, Vec3::ONE, 1.0).with_shadows());
    scene.add_light(Light::point(Vec3::X, Vec3::ONE, 1.0, 5.0));

    let mut controller = DeferredController::new(PipelineConfig::default());
    assert!(controller.on_activate(&mut pipe));
    pipe.backend_mut().take_trace();

    // Two frames with unchanged camera and lights; zero delta keeps the
    // time semantic fixed as well.
    controller.on_render_pre(&pipe, 0.0);
    controller.on_render_pipeline(&mut pipe, &scene, None);
    let first_trace = pipe.backend_mut().take_trace();

    controller.on_render_pre(&pipe, 0.0);
    controller.on_render_pipeline(&mut pipe, &scene, None);
    let second_trace = pipe.backend_mut().take_trace();

    assert_eq!(
        frame_uniform_uploads(&first_trace),
        frame_uniform_uploads(&second_trace)
    );
    controller.on_deactivate(&mut pipe);
}

#[test]
fn test_camera_move_changes_uploads() {
    let mut pipe = pipeline();
    let mut scene = Scene::new();
    add_opaque_object(&mut pipe, &mut scene);

    let mut controller = DeferredController::new(PipelineConfig::default());
    assert!(controller.on_activate(&mut pipe));
    pipe.backend_mut().take_trace();

    controller.on_render_pre(&pipe, 0.0);
    controller.on_render_pipeline(&mut pipe, &scene, None);
    let first_trace = pipe.backend_mut().take_trace();

    pipe.camera_mut().position = Vec3::new(10.0, 5.0, 3.0);
    controller.on_render_pre(&pipe, 0.0);
    controller.on_render_pipeline(&mut pipe, &scene, None);
    let second_trace = pipe.backend_mut().take_trace();

    assert_ne!(
        frame_uniform_uploads(&first_trace),
        frame_uniform_uploads(&second_trace)
    );
    controller.on_deactivate(&mut pipe);
}

// ============================================================================
// Shadow targets
// ============================================================================

#[test]
fn test_shadow_target_created_per_casting_light() {
    let mut pipe = pipeline();
    let mut scene = Scene::new();
    add_opaque_object(&mut pipe, &mut scene);
    let caster = scene.add_light(Light::directional(-Vec3::Y, Vec3::ONE, 1.0).with_shadows());
    scene.add_light(Light::point(Vec3::X, Vec3::ONE, 1.0, 5.0));

    let mut controller = DeferredController::new(PipelineConfig::default());
    assert!(controller.on_activate(&mut pipe));

    controller.on_render_pre(&pipe, 0.016);
    controller.on_render_pipeline(&mut pipe, &scene, None);

    assert!(controller.shadow_map(caster).is_some());
    assert_eq!(pipe.backend().live_textures_with_label("shadow_map"), 1);

    // The light stops casting: its target is reclaimed on the next frame
    scene.light_mut(caster).expect("light exists").casts_shadows = false;
    controller.on_render_pipeline(&mut pipe, &scene, None);
    assert!(controller.shadow_map(caster).is_none());
    assert_eq!(pipe.backend().live_textures_with_label("shadow_map"), 0);

    controller.on_deactivate(&mut pipe);
}
