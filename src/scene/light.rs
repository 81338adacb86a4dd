//! Light types for the scene.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Light type, dispatched at runtime by the lighting accumulation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    /// Sun-style infinite light.
    Directional,
    Point,
    Spot,
    /// Constant ambient term.
    Ambient,
    /// Sky/ground two-color ambient.
    Hemisphere,
    Area,
}

impl LightKind {
    pub const ALL: [LightKind; 6] = [
        LightKind::Directional,
        LightKind::Point,
        LightKind::Spot,
        LightKind::Ambient,
        LightKind::Hemisphere,
        LightKind::Area,
    ];

    /// Index packed into the GPU light block.
    pub fn gpu_index(&self) -> f32 {
        match self {
            LightKind::Directional => 0.0,
            LightKind::Point => 1.0,
            LightKind::Spot => 2.0,
            LightKind::Ambient => 3.0,
            LightKind::Hemisphere => 4.0,
            LightKind::Area => 5.0,
        }
    }
}

/// A light in the scene.
///
/// One struct covers all kinds; unused fields stay at their defaults. The
/// shadow map a shadow-casting light renders into is owned by the pipeline
/// controller and addressed by the light's arena handle, never by a back
/// pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub position: Vec3,
    pub direction: Vec3,
    pub range: f32,
    pub inner_angle: f32,
    pub outer_angle: f32,
    /// Hemisphere lights: color from below the horizon.
    pub ground_color: Vec3,
    /// Area lights: half extents of the emitting rectangle.
    pub extent: Vec2,
    pub casts_shadows: bool,
    pub visible: bool,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Point,
            color: Vec3::ONE,
            intensity: 1.0,
            position: Vec3::ZERO,
            direction: -Vec3::Y,
            range: 10.0,
            inner_angle: 0.3,
            outer_angle: 0.5,
            ground_color: Vec3::ZERO,
            extent: Vec2::ONE,
            casts_shadows: false,
            visible: true,
        }
    }
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            direction: direction.normalize(),
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn point(position: Vec3, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            kind: LightKind::Point,
            position,
            color,
            intensity,
            range,
            ..Default::default()
        }
    }

    pub fn spot(
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        range: f32,
        inner_angle: f32,
        outer_angle: f32,
    ) -> Self {
        Self {
            kind: LightKind::Spot,
            position,
            direction: direction.normalize(),
            color,
            intensity,
            range,
            inner_angle,
            outer_angle,
            ..Default::default()
        }
    }

    pub fn ambient(color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Ambient,
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn hemisphere(sky_color: Vec3, ground_color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Hemisphere,
            color: sky_color,
            ground_color,
            intensity,
            direction: Vec3::Y,
            ..Default::default()
        }
    }

    pub fn area(position: Vec3, direction: Vec3, color: Vec3, intensity: f32, extent: Vec2) -> Self {
        Self {
            kind: LightKind::Area,
            position,
            direction: direction.normalize(),
            color,
            intensity,
            extent,
            ..Default::default()
        }
    }

    pub fn with_shadows(mut self) -> Self {
        self.casts_shadows = true;
        self
    }

    /// Whether this kind can render a shadow map at all.
    pub fn supports_shadows(&self) -> bool {
        matches!(
            self.kind,
            LightKind::Directional | LightKind::Point | LightKind::Spot
        )
    }

    /// Pack into the GPU light block.
    pub fn to_gpu_data(&self) -> GpuLightData {
        GpuLightData {
            position_range: self.position.extend(self.range),
            color_intensity: self.color.extend(self.intensity),
            direction_kind: self.direction.extend(self.kind.gpu_index()),
            params: match self.kind {
                LightKind::Spot => Vec4::new(
                    self.inner_angle.cos(),
                    self.outer_angle.cos(),
                    0.0,
                    0.0,
                ),
                LightKind::Hemisphere => self.ground_color.extend(0.0),
                LightKind::Area => Vec4::new(self.extent.x, self.extent.y, 0.0, 0.0),
                _ => Vec4::ZERO,
            },
        }
    }
}

/// GPU-friendly light data block
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuLightData {
    /// xyz = position, w = range
    pub position_range: Vec4,
    /// xyz = color, w = intensity
    pub color_intensity: Vec4,
    /// xyz = direction, w = light kind index
    pub direction_kind: Vec4,
    /// Kind-specific: spot cosines, hemisphere ground color, area extents
    pub params: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_packs_cone_cosines() {
        let light = Light::spot(
            Vec3::ZERO,
            -Vec3::Y,
            Vec3::ONE,
            2.0,
            15.0,
            0.4,
            0.6,
        );
        let gpu = light.to_gpu_data();
        assert_eq!(gpu.direction_kind.w, LightKind::Spot.gpu_index());
        assert!((gpu.params.x - 0.4f32.cos()).abs() < 1e-6);
        assert!((gpu.params.y - 0.6f32.cos()).abs() < 1e-6);
    }

    #[test]
    fn test_hemisphere_packs_ground_color() {
        let light = Light::hemisphere(Vec3::ONE, Vec3::new(0.2, 0.1, 0.0), 1.0);
        let gpu = light.to_gpu_data();
        assert_eq!(gpu.params.x, 0.2);
        assert_eq!(gpu.direction_kind.w, LightKind::Hemisphere.gpu_index());
    }

    #[test]
    fn test_ambient_cannot_cast_shadows() {
        let light = Light::ambient(Vec3::ONE, 0.1).with_shadows();
        assert!(light.casts_shadows);
        assert!(!light.supports_shadows());
    }
}
