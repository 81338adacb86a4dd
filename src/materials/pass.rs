//! Material passes, techniques, and materials.
//!
//! A [`MaterialPass`] pairs a pipeline state, a shader program, an input
//! layout, and an ordered set of parameter bindings. A [`Technique`] groups
//! passes under a name; a [`Material`] maps technique names (the fixed
//! queue-name table) to techniques.

use std::collections::HashMap;

use crate::backend::traits::{ShaderHandle, TextureViewHandle};
use crate::backend::types::InputLayout;
use crate::materials::params::{ParamId, ParamValue, ParameterTable};
use crate::state::{PipelineState, PipelineStateDesc};

/// One parameter binding of a pass, resolved against the parameter table.
#[derive(Debug, Clone)]
struct ParamBinding {
    name: String,
    id: Option<ParamId>,
}

/// Uniform bytes and texture views collected for one draw.
#[derive(Debug, Clone, Default)]
pub struct CollectedParams {
    pub uniforms: Vec<u8>,
    pub textures: Vec<TextureViewHandle>,
}

/// One shader-program + fixed-function-state configuration rendering one
/// technique's contribution to one queue.
#[derive(Debug)]
pub struct MaterialPass {
    name: String,
    state: PipelineState,
    shader: ShaderHandle,
    input_layout: InputLayout,
    bindings: Vec<ParamBinding>,
    last_uploaded_generation: Option<u64>,
    cached: CollectedParams,
}

impl MaterialPass {
    pub fn new(
        name: &str,
        shader: ShaderHandle,
        state_desc: PipelineStateDesc,
        input_layout: InputLayout,
    ) -> Self {
        Self {
            name: name.to_string(),
            state: PipelineState::new(state_desc),
            shader,
            input_layout,
            bindings: Vec::new(),
            last_uploaded_generation: None,
            cached: CollectedParams::default(),
        }
    }

    /// Bind a named parameter (semantic or custom) in declaration order.
    pub fn with_param(mut self, name: &str) -> Self {
        self.bindings.push(ParamBinding {
            name: name.to_string(),
            id: None,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shader(&self) -> ShaderHandle {
        self.shader
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn input_layout(&self) -> &InputLayout {
        &self.input_layout
    }

    /// Resolve binding names to table slots. Unknown names stay unresolved
    /// and contribute nothing; they resolve on a later call once registered.
    pub fn resolve_bindings(&mut self, table: &ParameterTable) {
        for binding in &mut self.bindings {
            if binding.id.is_none() {
                binding.id = table.lookup(&binding.name);
            }
        }
    }

    /// Whether the table changed since this pass last uploaded.
    pub fn needs_upload(&self, table: &ParameterTable) -> bool {
        self.last_uploaded_generation != Some(table.generation())
    }

    /// Record that an upload at the table's current generation happened.
    pub fn mark_uploaded(&mut self, table: &ParameterTable) {
        self.last_uploaded_generation = Some(table.generation());
    }

    /// Collect the pass's bindings into a packed uniform block plus the
    /// texture views to bind, in declaration order.
    pub fn collect(&self, table: &ParameterTable) -> CollectedParams {
        let mut collected = CollectedParams::default();
        for binding in &self.bindings {
            let Some(id) = binding.id else {
                continue;
            };
            let value = table.resolve(id);
            if let ParamValue::Texture(view) = value {
                collected.textures.push(*view);
            } else {
                value.pack_into(&mut collected.uniforms);
            }
        }
        collected
    }

    /// Cached variant of [`MaterialPass::collect`]: recollects only when the
    /// table changed since the last upload, per the dirty-flag contract.
    pub fn collect_cached(&mut self, table: &ParameterTable) -> &CollectedParams {
        if self.needs_upload(table) {
            self.resolve_bindings(table);
            self.cached = self.collect(table);
            self.mark_uploaded(table);
        }
        &self.cached
    }
}

/// A named group of passes within a material.
#[derive(Debug, Default)]
pub struct Technique {
    passes: Vec<MaterialPass>,
}

impl Technique {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pass(mut self, pass: MaterialPass) -> Self {
        self.passes.push(pass);
        self
    }

    pub fn pass(&self, name: &str) -> Option<&MaterialPass> {
        self.passes.iter().find(|p| p.name() == name)
    }

    pub fn pass_mut(&mut self, name: &str) -> Option<&mut MaterialPass> {
        self.passes.iter_mut().find(|p| p.name() == name)
    }

    pub fn passes(&self) -> &[MaterialPass] {
        &self.passes
    }

    pub fn passes_mut(&mut self) -> &mut [MaterialPass] {
        &mut self.passes
    }
}

/// A material: named techniques over shared parameters.
#[derive(Debug, Default)]
pub struct Material {
    name: String,
    techniques: HashMap<String, Technique>,
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            techniques: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_technique(mut self, name: &str, technique: Technique) -> Self {
        self.techniques.insert(name.to_string(), technique);
        self
    }

    pub fn technique(&self, name: &str) -> Option<&Technique> {
        self.techniques.get(name)
    }

    pub fn technique_mut(&mut self, name: &str) -> Option<&mut Technique> {
        self.techniques.get_mut(name)
    }

    /// Names of all techniques this material exposes.
    pub fn technique_names(&self) -> impl Iterator<Item = &str> {
        self.techniques.keys().map(|s| s.as_str())
    }

    /// Resolve parameter bindings of every pass against the table.
    pub fn resolve_bindings(&mut self, table: &ParameterTable) {
        for technique in self.techniques.values_mut() {
            for pass in technique.passes_mut() {
                pass.resolve_bindings(table);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::params::Semantic;
    use glam::Mat4;

    fn test_pass() -> MaterialPass {
        MaterialPass::new(
            "main",
            ShaderHandle(1),
            PipelineStateDesc::opaque(),
            InputLayout::standard(),
        )
        .with_param("ViewProjMatrix")
        .with_param("Tint")
    }

    #[test]
    fn test_collect_packs_resolved_bindings() {
        let mut table = ParameterTable::new();
        table.register("Tint", ParamValue::Vec4(glam::Vec4::ONE));
        let mut pass = test_pass();
        pass.resolve_bindings(&table);

        let collected = pass.collect(&table);
        // Mat4 (64) + Vec4 (16)
        assert_eq!(collected.uniforms.len(), 80);
        assert!(collected.textures.is_empty());
    }

    #[test]
    fn test_unresolved_binding_contributes_nothing() {
        let table = ParameterTable::new();
        let mut pass = test_pass();
        pass.resolve_bindings(&table);

        // "Tint" is not registered; only the semantic packs
        let collected = pass.collect(&table);
        assert_eq!(collected.uniforms.len(), 64);
    }

    #[test]
    fn test_needs_upload_follows_generation() {
        let mut table = ParameterTable::new();
        let mut pass = test_pass();
        pass.resolve_bindings(&table);

        assert!(pass.needs_upload(&table));
        pass.mark_uploaded(&table);
        assert!(!pass.needs_upload(&table));

        table.set_semantic(Semantic::ViewProjMatrix, ParamValue::Mat4(Mat4::ZERO));
        assert!(pass.needs_upload(&table));
    }

    #[test]
    fn test_material_technique_lookup() {
        let material = Material::new("surface")
            .with_technique("Opaque", Technique::new().with_pass(test_pass()));

        assert!(material.technique("Opaque").is_some());
        assert!(material.technique("Opaque").unwrap().pass("main").is_some());
        assert!(material.technique("Lighting").is_none());
    }
}
