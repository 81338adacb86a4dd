//! Mid-level draw/resource facade consumed by the pipeline controller.
//!
//! [`RenderPipeline`] owns the backend, the camera, and arenas of render
//! meshes and materials. It tracks the last-applied pipeline state so that
//! material passes diff against it, and wraps every per-frame backend call
//! in the error-check boundary: draw failures are logged, never propagated.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::materials::{CollectedParams, Material, MaterialPass, ParameterTable};
use crate::pipeline::RenderQueue;
use crate::resources::{Framebuffer, FramebufferLayout, Texture};
use crate::scene::{Camera, Scene};
use crate::state::{PipelineState, PipelineStateDesc};

/// Handle to a render mesh in the facade arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub(crate) u32);

/// Handle to a material in the facade arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub(crate) u32);

/// GPU-resident mesh: vertex/index buffers plus draw metadata
struct RenderMesh {
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    index_count: u32,
    index_format: IndexFormat,
    layout: InputLayout,
}

/// The render pipeline facade.
pub struct RenderPipeline<B: GraphicsBackend> {
    backend: B,
    camera: Camera,
    meshes: Vec<Option<RenderMesh>>,
    materials: Vec<Option<Material>>,
    last_state: PipelineStateDesc,
    screen_quad_layout: InputLayout,
}

impl<B: GraphicsBackend> RenderPipeline<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            camera: Camera::default(),
            meshes: Vec::new(),
            materials: Vec::new(),
            last_state: PipelineStateDesc::default(),
            screen_quad_layout: InputLayout::screen_quad(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn caps(&self) -> &DeviceCaps {
        self.backend.caps()
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    // Resource factories

    /// Create and set up a texture; `None` on unsupported format or failure.
    pub fn create_texture(
        &mut self,
        desc: &TextureDescriptor,
        initial_data: Option<&[u8]>,
    ) -> Option<Texture> {
        let mut texture = Texture::new();
        if texture.setup(&mut self.backend, desc, initial_data) {
            Some(texture)
        } else {
            None
        }
    }

    pub fn destroy_texture(&mut self, texture: &mut Texture) {
        texture.close(&mut self.backend);
    }

    /// Describe a framebuffer attachment-format table.
    pub fn create_framebuffer_layout(
        &mut self,
        color_formats: Vec<TextureFormat>,
        depth_format: Option<TextureFormat>,
    ) -> FramebufferLayout {
        FramebufferLayout::new(color_formats, depth_format)
    }

    /// Wrap live texture views into a framebuffer; `None` on failure.
    #[allow(clippy::too_many_arguments)]
    pub fn create_framebuffer(
        &mut self,
        label: &str,
        layout: &FramebufferLayout,
        color_views: Vec<TextureViewHandle>,
        depth_view: Option<TextureViewHandle>,
        width: u32,
        height: u32,
    ) -> Option<Framebuffer> {
        let mut framebuffer = Framebuffer::new();
        if framebuffer.setup(
            &mut self.backend,
            label,
            layout,
            color_views,
            depth_view,
            width,
            height,
        ) {
            Some(framebuffer)
        } else {
            None
        }
    }

    pub fn destroy_framebuffer(&mut self, framebuffer: &mut Framebuffer) {
        framebuffer.close(&mut self.backend);
    }

    /// Compile a shader program; `None` on failure.
    pub fn create_shader(&mut self, desc: &ShaderDescriptor) -> Option<ShaderHandle> {
        match self.backend.create_shader(desc) {
            Ok(shader) => Some(shader),
            Err(err) => {
                log::warn!("shader creation failed: {err}");
                None
            }
        }
    }

    /// Store a material and return its id.
    pub fn create_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(Some(material));
        id
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0 as usize)?.as_ref()
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id.0 as usize)?.as_mut()
    }

    /// Upload a mesh from CPU-side vertex and index bytes.
    pub fn create_render_mesh(
        &mut self,
        label: &str,
        vertices: &[u8],
        indices: &[u8],
        index_format: IndexFormat,
        layout: InputLayout,
    ) -> Option<MeshHandle> {
        let vertex_buffer = self
            .backend
            .create_buffer(&BufferDescriptor {
                label: Some(format!("{label}_vertices")),
                size: vertices.len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            })
            .ok()?;
        self.backend.write_buffer(vertex_buffer, 0, vertices);

        let index_buffer = match self.backend.create_buffer(&BufferDescriptor {
            label: Some(format!("{label}_indices")),
            size: indices.len() as u64,
            usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
        }) {
            Ok(buffer) => buffer,
            Err(err) => {
                log::warn!("mesh {label}: index buffer failed: {err}");
                self.backend.destroy_buffer(vertex_buffer);
                return None;
            }
        };
        self.backend.write_buffer(index_buffer, 0, indices);

        let index_size = match index_format {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        };
        let handle = MeshHandle(self.meshes.len() as u32);
        self.meshes.push(Some(RenderMesh {
            vertex_buffer,
            index_buffer,
            index_count: (indices.len() / index_size) as u32,
            index_format,
            layout,
        }));
        Some(handle)
    }

    pub fn destroy_render_mesh(&mut self, handle: MeshHandle) {
        if let Some(mesh) = self
            .meshes
            .get_mut(handle.0 as usize)
            .and_then(Option::take)
        {
            self.backend.destroy_buffer(mesh.vertex_buffer);
            self.backend.destroy_buffer(mesh.index_buffer);
        }
    }

    // Submission

    /// Bind a framebuffer; `None` binds the backend's default target.
    pub fn set_framebuffer(&mut self, framebuffer: Option<&Framebuffer>) {
        self.backend
            .set_framebuffer(framebuffer.and_then(|fb| fb.handle()));
    }

    /// Clear the bound framebuffer.
    pub fn clear_framebuffer(&mut self, values: &ClearValues) {
        self.backend.clear(values);
    }

    /// Apply a pass's pipeline state, diffing against the last-applied
    /// descriptor. Returns the number of state calls emitted.
    pub fn apply_state(&mut self, state: &PipelineState) -> u32 {
        let calls = state.apply(&self.last_state, &mut self.backend);
        self.last_state = *state.desc();
        calls
    }

    /// Draw every renderable of a queue bucket with its material's matching
    /// technique pass. A renderable whose material lacks the technique is
    /// skipped silently. Returns the number of draws submitted.
    pub fn draw_bucket(&mut self, scene: &Scene, queue: RenderQueue, table: &ParameterTable) -> u32 {
        let technique = queue.technique_name();
        let mut draws = 0;

        for handle in scene.queues().bucket(queue) {
            let Some(renderable) = scene.renderable(*handle) else {
                continue;
            };
            if !renderable.visible {
                continue;
            }
            let Some(mesh) = self
                .meshes
                .get(renderable.mesh.0 as usize)
                .and_then(Option::as_ref)
            else {
                continue;
            };
            let Some(pass) = self
                .materials
                .get_mut(renderable.material.0 as usize)
                .and_then(Option::as_mut)
                .and_then(|m| m.technique_mut(technique))
                .and_then(|t| t.passes_mut().first_mut())
            else {
                continue;
            };

            // State diff against the previously applied descriptor
            pass.state().apply(&self.last_state, &mut self.backend);
            self.last_state = *pass.state().desc();

            let collected = pass.collect_cached(table).clone();
            let mut uniforms = Vec::with_capacity(64 + collected.uniforms.len());
            uniforms.extend_from_slice(bytemuck::bytes_of(&renderable.transform));
            uniforms.extend_from_slice(&collected.uniforms);

            let cmd = DrawCommand {
                shader: pass.shader(),
                input_layout: &mesh.layout,
                vertex_buffer: Some(mesh.vertex_buffer),
                index_buffer: Some(mesh.index_buffer),
                index_format: mesh.index_format,
                element_count: mesh.index_count,
                instance_count: 1,
                uniforms: &uniforms,
                textures: &collected.textures,
            };
            if let Err(err) = self.backend.draw(&cmd) {
                log::warn!("draw failed in {technique}: {err}");
                continue;
            }
            draws += 1;
        }
        draws
    }

    /// Draw a fullscreen pass (vertices generated in the shader, no
    /// buffers). `extra` is appended after the pass's table parameters.
    pub fn draw_screen_quad(
        &mut self,
        pass: &mut MaterialPass,
        table: &ParameterTable,
        extra: &CollectedParams,
    ) {
        pass.state().apply(&self.last_state, &mut self.backend);
        self.last_state = *pass.state().desc();

        let collected = pass.collect_cached(table);
        let mut uniforms =
            Vec::with_capacity(collected.uniforms.len() + extra.uniforms.len());
        uniforms.extend_from_slice(&collected.uniforms);
        uniforms.extend_from_slice(&extra.uniforms);
        let mut textures = collected.textures.clone();
        textures.extend_from_slice(&extra.textures);

        let cmd = DrawCommand {
            shader: pass.shader(),
            input_layout: &self.screen_quad_layout,
            vertex_buffer: None,
            index_buffer: None,
            index_format: IndexFormat::Uint16,
            element_count: 3,
            instance_count: 1,
            uniforms: &uniforms,
            textures: &textures,
        };
        if let Err(err) = self.backend.draw(&cmd) {
            log::warn!("screen quad draw failed ({}): {err}", pass.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::{NullBackend, TraceEvent};
    use crate::materials::{MaterialPass, Technique};
    use crate::scene::Renderable;

    fn pipeline() -> RenderPipeline<NullBackend> {
        RenderPipeline::new(NullBackend::new())
    }

    fn quad_mesh(pipe: &mut RenderPipeline<NullBackend>) -> MeshHandle {
        pipe.create_render_mesh(
            "quad",
            &[0u8; 4 * 48],
            &[0u8; 6 * 4],
            IndexFormat::Uint32,
            InputLayout::standard(),
        )
        .unwrap()
    }

    fn opaque_material(pipe: &mut RenderPipeline<NullBackend>) -> MaterialId {
        let shader = pipe
            .create_shader(&ShaderDescriptor {
                label: Some("test".into()),
                source: "@vertex fn vs_main() {}".into(),
                vs_entry: "vs_main".into(),
                fs_entry: None,
            })
            .unwrap();
        pipe.create_material(Material::new("m").with_technique(
            "Opaque",
            Technique::new().with_pass(MaterialPass::new(
                "main",
                shader,
                PipelineStateDesc::opaque(),
                InputLayout::standard(),
            )),
        ))
    }

    #[test]
    fn test_draw_bucket_skips_missing_technique() {
        let mut pipe = pipeline();
        let mesh = quad_mesh(&mut pipe);
        let material = opaque_material(&mut pipe);

        let mut scene = Scene::new();
        {
            let mat = pipe.material(material).unwrap();
            scene.add_renderable(Renderable::new(mesh, material), mat);
        }
        let table = ParameterTable::new();

        // The material exposes no Shadow technique: nothing drawn, no error
        assert_eq!(pipe.draw_bucket(&scene, RenderQueue::Shadow, &table), 0);
        assert_eq!(pipe.draw_bucket(&scene, RenderQueue::Opaque, &table), 1);
    }

    #[test]
    fn test_repeated_state_application_diffs_to_zero() {
        let mut pipe = pipeline();
        let state = PipelineState::new(PipelineStateDesc::transparent());
        let first = pipe.apply_state(&state);
        assert!(first > 0);
        assert_eq!(pipe.apply_state(&state), 0);
    }

    #[test]
    fn test_mesh_destroy_releases_buffers() {
        let mut pipe = pipeline();
        let mesh = quad_mesh(&mut pipe);
        assert_eq!(pipe.backend().live_buffer_count(), 2);
        pipe.destroy_render_mesh(mesh);
        assert_eq!(pipe.backend().live_buffer_count(), 0);
        // Destroying again is a no-op
        pipe.destroy_render_mesh(mesh);
    }

    #[test]
    fn test_draw_records_uniform_bytes() {
        let mut pipe = pipeline();
        let mesh = quad_mesh(&mut pipe);
        let material = opaque_material(&mut pipe);
        let mut scene = Scene::new();
        {
            let mat = pipe.material(material).unwrap();
            scene.add_renderable(Renderable::new(mesh, material), mat);
        }
        let table = ParameterTable::new();
        pipe.draw_bucket(&scene, RenderQueue::Opaque, &table);

        let draws: Vec<&TraceEvent> = pipe
            .backend()
            .trace()
            .iter()
            .filter(|e| matches!(e, TraceEvent::Draw { .. }))
            .collect();
        assert_eq!(draws.len(), 1);
        if let TraceEvent::Draw { uniform_bytes, .. } = draws[0] {
            // Model transform always leads the block
            assert!(uniform_bytes.len() >= 64);
        }
    }
}
