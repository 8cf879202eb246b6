//! Physical parameter sets written to the host solver.
//!
//! Every parameter has a documented range. Values outside it are clamped before
//! they are written and the clamp is logged; an out-of-range value never aborts
//! a command.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ValidationError;

/// Inclusive numeric range for a named parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit {
    /// Parameter name used in logs.
    pub field: &'static str,
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl Limit {
    /// Creates a limit.
    #[must_use]
    pub const fn new(field: &'static str, min: f64, max: f64) -> Self {
        Self { field, min, max }
    }

    /// Checks a value without clamping.
    pub fn check(&self, value: f64) -> Result<(), ValidationError> {
        if value.is_finite() && value >= self.min && value <= self.max {
            Ok(())
        } else {
            Err(ValidationError::OutOfRange {
                field: self.field,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }

    /// Clamps a value into range, logging when it had to move.
    ///
    /// Non-finite input collapses to the lower bound.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        if let Err(err) = self.check(value) {
            let clamped = if value.is_nan() {
                self.min
            } else {
                value.clamp(self.min, self.max)
            };
            warn!(%err, clamped, "parameter clamped");
            return clamped;
        }
        value
    }

    /// `f32` convenience wrapper over [`Limit::clamp`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn clamp_f32(&self, value: f32) -> f32 {
        self.clamp(f64::from(value)) as f32
    }

    /// Integer convenience wrapper over [`Limit::clamp`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn clamp_i32(&self, value: i32) -> i32 {
        self.clamp(f64::from(value)) as i32
    }

    /// Unsigned convenience wrapper over [`Limit::clamp`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn clamp_u32(&self, value: u32) -> u32 {
        self.clamp(f64::from(value)) as u32
    }
}

pub mod limits {
    //! Documented parameter ranges.
    #![allow(missing_docs)]

    use super::Limit;

    pub const MARGIN: Limit = Limit::new("margin", 0.001, 1.0);
    pub const FRICTION: Limit = Limit::new("friction", 0.0, 100.0);
    pub const RESTITUTION: Limit = Limit::new("restitution", 0.0, 1.0);
    pub const MASS: Limit = Limit::new("mass", 0.001, 1000.0);
    pub const LINEAR_DAMPING: Limit = Limit::new("linear_damping", 0.0, 10.0);
    pub const ANGULAR_DAMPING: Limit = Limit::new("angular_damping", 0.0, 1.0);

    pub const SUBSTEPS: Limit = Limit::new("substeps", 1.0, 100.0);
    pub const SOLVER_ITERATIONS: Limit = Limit::new("solver_iterations", 1.0, 100.0);
    pub const FRAME: Limit = Limit::new("frame", 1.0, 1_048_574.0);

    pub const VOXEL_SIZE: Limit = Limit::new("voxel_size", 0.001, 1.0);
    pub const DECIMATE_RATIO: Limit = Limit::new("decimate_ratio", 0.01, 1.0);

    pub const FORCE_STRENGTH: Limit = Limit::new("force_strength", -1000.0, 1000.0);
    pub const FORCE_DISTANCE: Limit = Limit::new("force_distance", 0.0, 100.0);
    pub const FORCE_FLOW: Limit = Limit::new("force_flow", 0.0, 10.0);

    pub const SHAKE_STRENGTH: Limit = Limit::new("shake_strength", 0.0, 100.0);

    pub const COLLISION_DAMPING: Limit = Limit::new("collision_damping", 0.0, 1.0);
    pub const COLLISION_THICKNESS: Limit = Limit::new("collision_thickness", 0.001, 1.0);
    pub const CLOTH_FRICTION: Limit = Limit::new("cloth_friction", 0.0, 100.0);
}

/// Collision shape used by the rigid-body solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionShape {
    ConvexHull,
    Mesh,
    Box,
    Sphere,
    Capsule,
    Cylinder,
    Cone,
    Compound,
}

/// Role of a rigid body in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyType {
    /// Driven by the solver.
    Active,
    /// Static or animated collider.
    Passive,
}

/// Material-like rigid-body parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidBodyProps {
    /// Collision shape used by the solver.
    pub shape: CollisionShape,
    /// Surface friction.
    pub friction: f32,
    /// Bounciness.
    pub restitution: f32,
    /// Collision margin around the shape.
    pub margin: f32,
    /// Mass in kilograms.
    pub mass: f32,
    /// Translation damping.
    pub linear_damping: f32,
    /// Rotation damping.
    pub angular_damping: f32,
    /// Passive bodies follow their animation curves (needed for shake).
    pub kinematic: bool,
}

impl Default for RigidBodyProps {
    fn default() -> Self {
        Self::active()
    }
}

impl RigidBodyProps {
    /// Defaults for dropped (active) objects.
    #[must_use]
    pub const fn active() -> Self {
        Self {
            shape: CollisionShape::ConvexHull,
            friction: 0.5,
            restitution: 0.0,
            margin: 0.04,
            mass: 1.0,
            linear_damping: 0.04,
            angular_damping: 0.1,
            kinematic: false,
        }
    }

    /// Defaults for the generated collider.
    #[must_use]
    pub const fn passive() -> Self {
        Self {
            shape: CollisionShape::Mesh,
            friction: 0.5,
            restitution: 0.0,
            margin: 0.04,
            mass: 1.0,
            linear_damping: 0.04,
            angular_damping: 0.1,
            kinematic: true,
        }
    }

    /// Returns a copy with every field clamped into its documented range.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            shape: self.shape,
            friction: limits::FRICTION.clamp_f32(self.friction),
            restitution: limits::RESTITUTION.clamp_f32(self.restitution),
            margin: limits::MARGIN.clamp_f32(self.margin),
            mass: limits::MASS.clamp_f32(self.mass),
            linear_damping: limits::LINEAR_DAMPING.clamp_f32(self.linear_damping),
            angular_damping: limits::ANGULAR_DAMPING.clamp_f32(self.angular_damping),
            kinematic: self.kinematic,
        }
    }
}

/// Parameters of the collision modifier added to cloth colliders and cloth objects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionSettings {
    /// Impact energy absorbed, in [0, 1].
    pub damping: f32,
    /// Outer collision shell thickness.
    pub thickness_outer: f32,
    /// Inner collision shell thickness.
    pub thickness_inner: f32,
    /// Friction against cloth.
    pub friction: f32,
}

impl Default for CollisionSettings {
    fn default() -> Self {
        Self {
            damping: 0.1,
            thickness_outer: 0.02,
            thickness_inner: 0.2,
            friction: 80.0,
        }
    }
}

impl CollisionSettings {
    /// Returns a copy with every field clamped into its documented range.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            damping: limits::COLLISION_DAMPING.clamp_f32(self.damping),
            thickness_outer: limits::COLLISION_THICKNESS.clamp_f32(self.thickness_outer),
            thickness_inner: limits::COLLISION_THICKNESS.clamp_f32(self.thickness_inner),
            friction: limits::CLOTH_FRICTION.clamp_f32(self.friction),
        }
    }
}

/// The fixed cloth parameter schema.
///
/// Field names match the host's cloth solver parameters one to one.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClothSettings {
    pub quality_steps: u32,
    pub mass: f32,
    pub air_viscosity: f32,

    pub stiff_tension: f32,
    pub stiff_compression: f32,
    pub stiff_shear: f32,
    pub stiff_bending: f32,

    pub damp_tension: f32,
    pub damp_compression: f32,
    pub damp_shear: f32,
    pub damp_bending: f32,

    pub internal_springs: bool,
    pub internal_spring_max_length: f32,
    pub internal_spring_max_diversion: f32,
    pub internal_spring_tension: f32,
    pub internal_spring_compression: f32,
    pub internal_spring_max_tension: f32,
    pub internal_spring_max_compression: f32,

    pub use_pressure: bool,
    pub pressure: f32,
    pub pressure_scale: f32,
    pub pressure_fluid_density: f32,

    pub collision_quality: u32,
    pub minimum_distance: f32,
    pub impulse_clamping: f32,

    pub self_collision: bool,
    pub self_collision_friction: f32,
    pub self_collision_distance: f32,
    pub self_collision_impulse_clamping: f32,
}

impl Default for ClothSettings {
    fn default() -> Self {
        ClothPreset::Cotton.settings()
    }
}

impl ClothSettings {
    /// Returns a copy with the parameters clamped into the host's accepted ranges.
    #[must_use]
    pub fn clamped(&self) -> Self {
        const QUALITY: Limit = Limit::new("quality_steps", 1.0, 80.0);
        const MASS: Limit = Limit::new("cloth_mass", 0.001, 10.0);
        const AIR: Limit = Limit::new("air_viscosity", 0.0, 10.0);
        const STIFF: Limit = Limit::new("stiffness", 0.0, 10_000.0);
        const DAMP: Limit = Limit::new("damping", 0.0, 50.0);
        const SPRING_LEN: Limit = Limit::new("internal_spring_max_length", 0.0, 1000.0);
        const SPRING_ANGLE: Limit = Limit::new("internal_spring_max_diversion", 0.0, 180.0);
        const PRESSURE: Limit = Limit::new("pressure", -1000.0, 1000.0);
        const PRESSURE_SCALE: Limit = Limit::new("pressure_scale", 0.0, 100.0);
        const DENSITY: Limit = Limit::new("pressure_fluid_density", 0.0, 10.0);
        const COLLISION_QUALITY: Limit = Limit::new("collision_quality", 1.0, 20.0);
        const DISTANCE: Limit = Limit::new("collision_distance", 0.001, 1.0);
        const IMPULSE: Limit = Limit::new("impulse_clamping", 0.0, 100.0);
        const SELF_FRICTION: Limit = Limit::new("self_collision_friction", 0.0, 100.0);

        Self {
            quality_steps: QUALITY.clamp_u32(self.quality_steps),
            mass: MASS.clamp_f32(self.mass),
            air_viscosity: AIR.clamp_f32(self.air_viscosity),
            stiff_tension: STIFF.clamp_f32(self.stiff_tension),
            stiff_compression: STIFF.clamp_f32(self.stiff_compression),
            stiff_shear: STIFF.clamp_f32(self.stiff_shear),
            stiff_bending: STIFF.clamp_f32(self.stiff_bending),
            damp_tension: DAMP.clamp_f32(self.damp_tension),
            damp_compression: DAMP.clamp_f32(self.damp_compression),
            damp_shear: DAMP.clamp_f32(self.damp_shear),
            damp_bending: DAMP.clamp_f32(self.damp_bending),
            internal_springs: self.internal_springs,
            internal_spring_max_length: SPRING_LEN.clamp_f32(self.internal_spring_max_length),
            internal_spring_max_diversion: SPRING_ANGLE
                .clamp_f32(self.internal_spring_max_diversion),
            internal_spring_tension: STIFF.clamp_f32(self.internal_spring_tension),
            internal_spring_compression: STIFF.clamp_f32(self.internal_spring_compression),
            internal_spring_max_tension: STIFF.clamp_f32(self.internal_spring_max_tension),
            internal_spring_max_compression: STIFF
                .clamp_f32(self.internal_spring_max_compression),
            use_pressure: self.use_pressure,
            pressure: PRESSURE.clamp_f32(self.pressure),
            pressure_scale: PRESSURE_SCALE.clamp_f32(self.pressure_scale),
            pressure_fluid_density: DENSITY.clamp_f32(self.pressure_fluid_density),
            collision_quality: COLLISION_QUALITY.clamp_u32(self.collision_quality),
            minimum_distance: DISTANCE.clamp_f32(self.minimum_distance),
            impulse_clamping: IMPULSE.clamp_f32(self.impulse_clamping),
            self_collision: self.self_collision,
            self_collision_friction: SELF_FRICTION.clamp_f32(self.self_collision_friction),
            self_collision_distance: DISTANCE.clamp_f32(self.self_collision_distance),
            self_collision_impulse_clamping: IMPULSE
                .clamp_f32(self.self_collision_impulse_clamping),
        }
    }
}

/// Named cloth material presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClothPreset {
    Cotton,
    Denim,
    Leather,
    Rubber,
    Silk,
}

impl ClothPreset {
    /// All presets in display order.
    pub const ALL: [Self; 5] = [
        Self::Cotton,
        Self::Denim,
        Self::Leather,
        Self::Rubber,
        Self::Silk,
    ];

    /// Looks a preset up by case-insensitive name.
    pub fn from_name(name: &str) -> Result<Self, ValidationError> {
        let key = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(&key))
            .ok_or_else(|| ValidationError::UnknownPreset {
                name: name.to_string(),
            })
    }

    /// Display name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cotton => "Cotton",
            Self::Denim => "Denim",
            Self::Leather => "Leather",
            Self::Rubber => "Rubber",
            Self::Silk => "Silk",
        }
    }

    /// Full parameter set for this preset.
    #[must_use]
    pub const fn settings(&self) -> ClothSettings {
        // quality, mass, stiffness (tension, compression, shear, bending),
        // damping (tension, compression, shear) differ per material.
        let (quality_steps, mass, stiff, stiff_bending, damp) = match self {
            Self::Cotton => (5, 0.30, 15.0, 0.5, 5.0),
            Self::Denim => (12, 1.0, 40.0, 10.0, 25.0),
            Self::Leather => (15, 0.40, 80.0, 150.0, 25.0),
            Self::Rubber => (7, 3.0, 15.0, 25.0, 25.0),
            Self::Silk => (5, 0.15, 5.0, 0.05, 0.0),
        };
        ClothSettings {
            quality_steps,
            mass,
            air_viscosity: 1.0,
            stiff_tension: stiff,
            stiff_compression: stiff,
            stiff_shear: stiff,
            stiff_bending,
            damp_tension: damp,
            damp_compression: damp,
            damp_shear: damp,
            damp_bending: 0.5,
            internal_springs: false,
            internal_spring_max_length: 0.0,
            internal_spring_max_diversion: 45.0,
            internal_spring_tension: 15.0,
            internal_spring_compression: 15.0,
            internal_spring_max_tension: 15.0,
            internal_spring_max_compression: 15.0,
            use_pressure: false,
            pressure: 0.0,
            pressure_scale: 1.0,
            pressure_fluid_density: 0.0,
            collision_quality: 2,
            minimum_distance: 0.015,
            impulse_clamping: 0.0,
            self_collision: true,
            self_collision_friction: 5.0,
            self_collision_distance: 0.015,
            self_collision_impulse_clamping: 0.0,
        }
    }
}

/// Force-field effector parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceFieldSettings {
    /// Signed field strength.
    pub strength: f32,
    /// Falloff cutoff distance.
    pub distance: f32,
    /// How strongly the field drags bodies along with the surrounding flow.
    pub flow: f32,
}

impl Default for ForceFieldSettings {
    fn default() -> Self {
        Self {
            strength: -1000.0,
            distance: 1.0,
            flow: 0.0,
        }
    }
}

impl ForceFieldSettings {
    /// Returns a copy with every field clamped into its documented range.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            strength: limits::FORCE_STRENGTH.clamp_f32(self.strength),
            distance: limits::FORCE_DISTANCE.clamp_f32(self.distance),
            flow: limits::FORCE_FLOW.clamp_f32(self.flow),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamps_and_reports() {
        assert!(limits::FRICTION.check(50.0).is_ok());
        assert!(limits::FRICTION.check(150.0).is_err());
        assert!((limits::FRICTION.clamp(150.0) - 100.0).abs() < f64::EPSILON);
        assert!((limits::MASS.clamp(0.0) - 0.001).abs() < f64::EPSILON);
        assert!((limits::MARGIN.clamp(f64::NAN) - 0.001).abs() < f64::EPSILON);
        assert_eq!(limits::SUBSTEPS.clamp_u32(500), 100);
        assert_eq!(limits::FRAME.clamp_i32(-3), 1);
    }

    #[test]
    fn rigid_props_clamp_every_field() {
        let wild = RigidBodyProps {
            shape: CollisionShape::Box,
            friction: -1.0,
            restitution: 4.0,
            margin: 0.0,
            mass: 5000.0,
            linear_damping: 99.0,
            angular_damping: 2.0,
            kinematic: false,
        };
        let c = wild.clamped();
        assert_eq!(c.shape, CollisionShape::Box);
        assert_eq!(c.friction, 0.0);
        assert_eq!(c.restitution, 1.0);
        assert!((c.margin - 0.001).abs() < 1e-6);
        assert_eq!(c.mass, 1000.0);
        assert_eq!(c.linear_damping, 10.0);
        assert_eq!(c.angular_damping, 1.0);
    }

    #[test]
    fn defaults_are_already_in_range() {
        assert_eq!(RigidBodyProps::active().clamped(), RigidBodyProps::active());
        assert_eq!(RigidBodyProps::passive().clamped(), RigidBodyProps::passive());
        assert_eq!(CollisionSettings::default().clamped(), CollisionSettings::default());
        assert_eq!(ForceFieldSettings::default().clamped(), ForceFieldSettings::default());
        for preset in ClothPreset::ALL {
            assert_eq!(preset.settings().clamped(), preset.settings(), "{}", preset.name());
        }
    }

    #[test]
    fn preset_lookup_is_case_insensitive() {
        assert_eq!(ClothPreset::from_name("denim").unwrap(), ClothPreset::Denim);
        assert_eq!(ClothPreset::from_name(" SILK ").unwrap(), ClothPreset::Silk);
        assert!(matches!(
            ClothPreset::from_name("wool"),
            Err(ValidationError::UnknownPreset { .. })
        ));
        assert_eq!(ClothPreset::Leather.settings().stiff_bending, 150.0);
    }
}
