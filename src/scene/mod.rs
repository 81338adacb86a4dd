//! Scene content: renderables, lights, camera.
//!
//! Entities live in handle-addressed arenas; ownership and back-references
//! are handle fields, never pointers. Renderable registration sorts each
//! entity into every render queue its material exposes a recognized
//! technique for.

mod camera;
mod light;

pub use camera::{Camera, CameraUniformData, Projection};
pub use light::{GpuLightData, Light, LightKind};

use glam::Mat4;

use crate::materials::Material;
use crate::pipeline::{MaterialId, MeshHandle, RenderQueue};

/// Handle to a renderable in the scene arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderableHandle(u32);

/// Handle to a light in the scene arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightHandle(u32);

/// A renderable object: mesh + material + transform
#[derive(Debug, Clone)]
pub struct Renderable {
    pub mesh: MeshHandle,
    pub material: MaterialId,
    pub transform: Mat4,
    pub visible: bool,
}

impl Renderable {
    pub fn new(mesh: MeshHandle, material: MaterialId) -> Self {
        Self {
            mesh,
            material,
            transform: Mat4::IDENTITY,
            visible: true,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }
}

/// Ordered buckets of renderables, one per [`RenderQueue`].
#[derive(Debug, Default)]
pub struct RenderQueues {
    buckets: [Vec<RenderableHandle>; RenderQueue::ALL.len()],
}

impl RenderQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a renderable into every bucket its material exposes a
    /// recognized technique for. Unrecognized technique names are dropped
    /// without error.
    pub fn register(&mut self, handle: RenderableHandle, material: &Material) {
        for name in material.technique_names() {
            if let Some(queue) = RenderQueue::from_technique(name) {
                self.buckets[queue.index()].push(handle);
            }
        }
    }

    /// Remove a renderable from every bucket.
    pub fn unregister(&mut self, handle: RenderableHandle) {
        for bucket in &mut self.buckets {
            bucket.retain(|h| *h != handle);
        }
    }

    pub fn bucket(&self, queue: RenderQueue) -> &[RenderableHandle] {
        &self.buckets[queue.index()]
    }

    pub fn is_empty(&self, queue: RenderQueue) -> bool {
        self.buckets[queue.index()].is_empty()
    }
}

/// The scene containing all renderable content.
pub struct Scene {
    renderables: Vec<Option<Renderable>>,
    lights: Vec<Option<Light>>,
    queues: RenderQueues,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            renderables: Vec::new(),
            lights: Vec::new(),
            queues: RenderQueues::new(),
        }
    }

    /// Add a renderable, sorting it into queues per its material's
    /// techniques.
    pub fn add_renderable(&mut self, renderable: Renderable, material: &Material) -> RenderableHandle {
        let handle = RenderableHandle(self.renderables.len() as u32);
        self.renderables.push(Some(renderable));
        self.queues.register(handle, material);
        handle
    }

    pub fn remove_renderable(&mut self, handle: RenderableHandle) {
        if let Some(slot) = self.renderables.get_mut(handle.0 as usize) {
            *slot = None;
            self.queues.unregister(handle);
        }
    }

    pub fn renderable(&self, handle: RenderableHandle) -> Option<&Renderable> {
        self.renderables.get(handle.0 as usize)?.as_ref()
    }

    pub fn renderable_mut(&mut self, handle: RenderableHandle) -> Option<&mut Renderable> {
        self.renderables.get_mut(handle.0 as usize)?.as_mut()
    }

    pub fn add_light(&mut self, light: Light) -> LightHandle {
        let handle = LightHandle(self.lights.len() as u32);
        self.lights.push(Some(light));
        handle
    }

    pub fn remove_light(&mut self, handle: LightHandle) {
        if let Some(slot) = self.lights.get_mut(handle.0 as usize) {
            *slot = None;
        }
    }

    pub fn light(&self, handle: LightHandle) -> Option<&Light> {
        self.lights.get(handle.0 as usize)?.as_ref()
    }

    pub fn light_mut(&mut self, handle: LightHandle) -> Option<&mut Light> {
        self.lights.get_mut(handle.0 as usize)?.as_mut()
    }

    /// Visible lights with their handles.
    pub fn visible_lights(&self) -> impl Iterator<Item = (LightHandle, &Light)> {
        self.lights
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|l| (LightHandle(i as u32), l)))
            .filter(|(_, l)| l.visible)
    }

    /// Visible shadow-casting lights of kinds that support shadows.
    pub fn shadow_lights(&self) -> impl Iterator<Item = (LightHandle, &Light)> {
        self.visible_lights()
            .filter(|(_, l)| l.casts_shadows && l.supports_shadows())
    }

    pub fn queues(&self) -> &RenderQueues {
        &self.queues
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::ShaderHandle;
    use crate::backend::types::InputLayout;
    use crate::materials::{MaterialPass, Technique};
    use crate::state::PipelineStateDesc;
    use glam::Vec3;

    fn material_with(techniques: &[&str]) -> Material {
        let mut material = Material::new("test");
        for name in techniques {
            material = material.with_technique(
                name,
                Technique::new().with_pass(MaterialPass::new(
                    "main",
                    ShaderHandle(1),
                    PipelineStateDesc::opaque(),
                    InputLayout::standard(),
                )),
            );
        }
        material
    }

    #[test]
    fn test_registration_per_exposed_technique() {
        let mut scene = Scene::new();
        let material = material_with(&["Opaque", "OpaqueDepth", "Shadow"]);
        let handle = scene.add_renderable(Renderable::new(MeshHandle(0), MaterialId(0)), &material);

        assert_eq!(scene.queues().bucket(RenderQueue::Opaque), &[handle]);
        assert_eq!(scene.queues().bucket(RenderQueue::OpaqueDepth), &[handle]);
        assert_eq!(scene.queues().bucket(RenderQueue::Shadow), &[handle]);
        assert!(scene.queues().is_empty(RenderQueue::Lighting));
    }

    #[test]
    fn test_unrecognized_technique_dropped_silently() {
        let mut scene = Scene::new();
        let material = material_with(&["Opaque", "SomeCustomTechnique"]);
        let handle = scene.add_renderable(Renderable::new(MeshHandle(0), MaterialId(0)), &material);

        assert_eq!(scene.queues().bucket(RenderQueue::Opaque), &[handle]);
        for queue in RenderQueue::ALL {
            let bucket = scene.queues().bucket(queue);
            if queue != RenderQueue::Opaque {
                assert!(bucket.is_empty());
            }
        }
    }

    #[test]
    fn test_remove_unregisters_from_queues() {
        let mut scene = Scene::new();
        let material = material_with(&["Opaque"]);
        let handle = scene.add_renderable(Renderable::new(MeshHandle(0), MaterialId(0)), &material);
        scene.remove_renderable(handle);

        assert!(scene.queues().is_empty(RenderQueue::Opaque));
        assert!(scene.renderable(handle).is_none());
    }

    #[test]
    fn test_shadow_lights_filters_kind_support() {
        let mut scene = Scene::new();
        scene.add_light(Light::directional(-Vec3::Y, Vec3::ONE, 1.0).with_shadows());
        scene.add_light(Light::ambient(Vec3::ONE, 0.1).with_shadows());
        scene.add_light(Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 5.0));

        assert_eq!(scene.shadow_lights().count(), 1);
        assert_eq!(scene.visible_lights().count(), 3);
    }
}
