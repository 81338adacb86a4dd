//! Shared parameter table with semantic bindings and dirty tracking.
//!
//! Engine semantics (camera matrices, time, screen size) are pre-registered
//! slots; materials add custom parameters on demand. Every setter returns a
//! dirty bool and bumps the table generation, which passes compare against
//! their last-uploaded generation to decide whether to re-upload. A slot
//! may redirect to at most one other slot; chains are rejected.

use std::collections::HashMap;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::backend::traits::TextureViewHandle;

/// Handle to a parameter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(u32);

/// Value stored in a parameter slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    Texture(TextureViewHandle),
}

impl ParamValue {
    /// Append this value to a packed uniform block with vec4 alignment.
    /// Textures contribute no uniform bytes; they bind as views.
    pub fn pack_into(&self, out: &mut Vec<u8>) {
        match self {
            ParamValue::Float(v) => {
                out.extend_from_slice(bytemuck::bytes_of(&Vec4::new(*v, 0.0, 0.0, 0.0)));
            }
            ParamValue::Vec2(v) => {
                out.extend_from_slice(bytemuck::bytes_of(&v.extend(0.0).extend(0.0)));
            }
            ParamValue::Vec3(v) => {
                out.extend_from_slice(bytemuck::bytes_of(&v.extend(0.0)));
            }
            ParamValue::Vec4(v) => {
                out.extend_from_slice(bytemuck::bytes_of(v));
            }
            ParamValue::Mat4(m) => {
                out.extend_from_slice(bytemuck::bytes_of(m));
            }
            ParamValue::Texture(_) => {}
        }
    }
}

/// Fixed engine-level semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantic {
    ViewMatrix,
    ProjMatrix,
    ViewProjMatrix,
    InvViewMatrix,
    InvProjMatrix,
    CameraPosition,
    Time,
    ScreenSize,
}

impl Semantic {
    pub const ALL: [Semantic; 8] = [
        Semantic::ViewMatrix,
        Semantic::ProjMatrix,
        Semantic::ViewProjMatrix,
        Semantic::InvViewMatrix,
        Semantic::InvProjMatrix,
        Semantic::CameraPosition,
        Semantic::Time,
        Semantic::ScreenSize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Semantic::ViewMatrix => "ViewMatrix",
            Semantic::ProjMatrix => "ProjMatrix",
            Semantic::ViewProjMatrix => "ViewProjMatrix",
            Semantic::InvViewMatrix => "InvViewMatrix",
            Semantic::InvProjMatrix => "InvProjMatrix",
            Semantic::CameraPosition => "CameraPosition",
            Semantic::Time => "Time",
            Semantic::ScreenSize => "ScreenSize",
        }
    }

    fn default_value(&self) -> ParamValue {
        match self {
            Semantic::ViewMatrix
            | Semantic::ProjMatrix
            | Semantic::ViewProjMatrix
            | Semantic::InvViewMatrix
            | Semantic::InvProjMatrix => ParamValue::Mat4(Mat4::IDENTITY),
            Semantic::CameraPosition => ParamValue::Vec4(Vec4::ZERO),
            Semantic::Time => ParamValue::Float(0.0),
            Semantic::ScreenSize => ParamValue::Vec2(Vec2::ONE),
        }
    }
}

#[derive(Debug, Clone)]
struct ParamSlot {
    value: ParamValue,
    redirect: Option<ParamId>,
}

/// The parameter table shared by all material passes of one controller.
#[derive(Debug)]
pub struct ParameterTable {
    slots: Vec<ParamSlot>,
    names: HashMap<String, ParamId>,
    generation: u64,
}

impl ParameterTable {
    /// Create a table with all engine semantics pre-registered.
    pub fn new() -> Self {
        let mut table = Self {
            slots: Vec::new(),
            names: HashMap::new(),
            generation: 0,
        };
        for semantic in Semantic::ALL {
            table.register(semantic.name(), semantic.default_value());
        }
        table
    }

    /// Register a named slot, returning the existing id if already present.
    pub fn register(&mut self, name: &str, value: ParamValue) -> ParamId {
        if let Some(id) = self.names.get(name) {
            return *id;
        }
        let id = ParamId(self.slots.len() as u32);
        self.slots.push(ParamSlot {
            value,
            redirect: None,
        });
        self.names.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<ParamId> {
        self.names.get(name).copied()
    }

    pub fn semantic(&self, semantic: Semantic) -> ParamId {
        // Semantics are registered in the constructor, so lookup cannot fail.
        self.names[semantic.name()]
    }

    /// Monotonic counter bumped by every effective change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Store a value; returns true (and bumps the generation) only when the
    /// value actually changed.
    pub fn set(&mut self, id: ParamId, value: ParamValue) -> bool {
        let slot = &mut self.slots[id.0 as usize];
        if slot.value == value {
            return false;
        }
        slot.value = value;
        self.generation += 1;
        true
    }

    pub fn set_semantic(&mut self, semantic: Semantic, value: ParamValue) -> bool {
        let id = self.semantic(semantic);
        self.set(id, value)
    }

    /// Redirect `id` to read `target`'s value (single-level indirection).
    ///
    /// Redirecting to a slot that itself redirects would form a chain and
    /// is rejected. Returns true when the redirection changed, dirtying all
    /// bound passes through the generation bump.
    pub fn set_redirect(&mut self, id: ParamId, target: Option<ParamId>) -> bool {
        if let Some(target) = target {
            if self.slots[target.0 as usize].redirect.is_some() {
                log::warn!("parameter redirect rejected: target already redirects");
                return false;
            }
            if target == id {
                log::warn!("parameter redirect rejected: self-reference");
                return false;
            }
        }
        let slot = &mut self.slots[id.0 as usize];
        if slot.redirect == target {
            return false;
        }
        slot.redirect = target;
        self.generation += 1;
        true
    }

    /// The slot's effective value, following at most one redirect.
    pub fn resolve(&self, id: ParamId) -> &ParamValue {
        let slot = &self.slots[id.0 as usize];
        match slot.redirect {
            Some(target) => &self.slots[target.0 as usize].value,
            None => &slot.value,
        }
    }
}

impl Default for ParameterTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantics_preregistered() {
        let table = ParameterTable::new();
        for semantic in Semantic::ALL {
            assert!(table.lookup(semantic.name()).is_some());
        }
    }

    #[test]
    fn test_set_returns_dirty_only_on_change() {
        let mut table = ParameterTable::new();
        let id = table.register("Roughness", ParamValue::Float(0.5));
        let gen0 = table.generation();

        assert!(table.set(id, ParamValue::Float(0.7)));
        assert_eq!(table.generation(), gen0 + 1);

        // Same value again: clean, no generation bump
        assert!(!table.set(id, ParamValue::Float(0.7)));
        assert_eq!(table.generation(), gen0 + 1);
    }

    #[test]
    fn test_redirect_resolves_single_level() {
        let mut table = ParameterTable::new();
        let base = table.register("BaseColor", ParamValue::Vec4(Vec4::ONE));
        let alias = table.register("TintColor", ParamValue::Vec4(Vec4::ZERO));

        assert!(table.set_redirect(alias, Some(base)));
        assert_eq!(*table.resolve(alias), ParamValue::Vec4(Vec4::ONE));
    }

    #[test]
    fn test_redirect_chain_rejected() {
        let mut table = ParameterTable::new();
        let a = table.register("A", ParamValue::Float(1.0));
        let b = table.register("B", ParamValue::Float(2.0));
        let c = table.register("C", ParamValue::Float(3.0));

        assert!(table.set_redirect(b, Some(a)));
        // c -> b would form a chain c -> b -> a
        assert!(!table.set_redirect(c, Some(b)));
        assert_eq!(*table.resolve(c), ParamValue::Float(3.0));
    }

    #[test]
    fn test_redirect_change_bumps_generation() {
        let mut table = ParameterTable::new();
        let a = table.register("A", ParamValue::Float(1.0));
        let b = table.register("B", ParamValue::Float(2.0));
        let gen0 = table.generation();

        assert!(table.set_redirect(b, Some(a)));
        assert!(table.generation() > gen0);

        // Unchanged redirection is clean
        assert!(!table.set_redirect(b, Some(a)));
    }
}
