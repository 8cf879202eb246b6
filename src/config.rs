//! Session configuration.
//!
//! Every user-tunable value of a physics session lives in [`SessionSettings`].
//! Settings are plain serde data; missing fields fall back to their defaults so
//! a partial JSON document is a valid configuration. Range violations are not
//! errors here: the components clamp on write and log a warning.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DropResult, ValidationError};
use crate::physics::{ClothPreset, ClothSettings, CollisionSettings, ForceFieldSettings, RigidBodyProps};

/// Default collider object name.
pub const DEFAULT_COLLIDER_NAME: &str = "COLLIDER";

/// Default suffix of low-detail proxy objects.
pub const DEFAULT_PROXY_SUFFIX: &str = "_PhysProxy";

/// Requested global simulation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// First cached frame; also the frame sessions rewind to.
    pub frame_start: i32,
    /// Last cached frame. Must be greater than `frame_start`.
    pub frame_end: i32,
    /// Solver substeps per frame, in [1, 100].
    pub substeps: u32,
    /// Constraint solver iterations, in [1, 100].
    pub solver_iterations: u32,
    /// Split penetration recovery from velocity for more stable stacking.
    pub split_impulse: bool,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            frame_start: 1,
            frame_end: 250,
            substeps: 10,
            solver_iterations: 10,
            split_impulse: false,
        }
    }
}

/// High/low-detail proxy and collider reduction options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationSettings {
    /// Simulate low-detail stand-ins of the active objects.
    pub enabled: bool,
    /// Remesh voxel size for proxies; `0` skips the remesh step.
    pub voxel_size: f32,
    /// Collapse ratio kept by the proxy decimation.
    pub decimate_ratio: f32,
    /// Reduce the merged collider.
    pub passive_enabled: bool,
    /// Remesh voxel size for the collider; `0` skips the remesh step.
    pub passive_voxel_size: f32,
    /// Collapse ratio kept by the collider decimation.
    pub passive_decimate_ratio: f32,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            voxel_size: 0.05,
            decimate_ratio: 0.3,
            passive_enabled: false,
            passive_voxel_size: 0.0,
            passive_decimate_ratio: 0.5,
        }
    }
}

/// Secondary "shake" effect parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShakeSettings {
    /// User strength in [0, 100].
    pub strength: f32,
    /// Per-axis enable flags, X then Y then Z.
    pub axes: [bool; 3],
}

impl Default for ShakeSettings {
    fn default() -> Self {
        Self {
            strength: 0.0,
            axes: [true, true, false],
        }
    }
}

/// Bounded retry policy for host-side eventual consistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Milliseconds slept between attempts.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 10,
        }
    }
}

impl RetryPolicy {
    /// Sleep between attempts.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Complete session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Cache range and solver quality.
    pub world: WorldSettings,
    /// Body parameters of the simulated objects.
    pub active: RigidBodyProps,
    /// Body parameters of the merged collider.
    pub passive: RigidBodyProps,
    /// Proxy and collider reduction.
    pub optimization: OptimizationSettings,
    /// Cloth modifier parameters.
    pub cloth: ClothSettings,
    /// Collision modifier parameters for cloth mode.
    pub collision: CollisionSettings,
    /// Parameters of the next or current force field.
    pub force: ForceFieldSettings,
    /// Secondary noise effect.
    pub shake: ShakeSettings,
    /// Retry policy for lazily materialized host data.
    pub retry: RetryPolicy,
    /// Name given to the merged collider.
    pub collider_name: String,
    /// Suffix appended to proxy names.
    pub proxy_suffix: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            world: WorldSettings::default(),
            active: RigidBodyProps::active(),
            passive: RigidBodyProps::passive(),
            optimization: OptimizationSettings::default(),
            cloth: ClothSettings::default(),
            collision: CollisionSettings::default(),
            force: ForceFieldSettings::default(),
            shake: ShakeSettings::default(),
            retry: RetryPolicy::default(),
            collider_name: DEFAULT_COLLIDER_NAME.to_string(),
            proxy_suffix: DEFAULT_PROXY_SUFFIX.to_string(),
        }
    }
}

impl SessionSettings {
    /// Parses settings from JSON and validates them.
    pub fn from_json_str(json: &str) -> DropResult<Self> {
        let settings: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidSettings {
            reason: format!("malformed settings JSON: {e}"),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads settings from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> DropResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidSettings {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&json)
    }

    /// Rejects settings no clamp can repair.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.retry.max_attempts == 0 {
            return Err(ValidationError::InvalidSettings {
                reason: "retry.max_attempts must be at least 1".to_string(),
            });
        }
        if self.collider_name.trim().is_empty() {
            return Err(ValidationError::InvalidSettings {
                reason: "collider_name must not be empty".to_string(),
            });
        }
        if self.proxy_suffix.is_empty() {
            return Err(ValidationError::InvalidSettings {
                reason: "proxy_suffix must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Replaces the cloth parameters with a named preset.
    pub fn apply_preset(&mut self, name: &str) -> Result<ClothPreset, ValidationError> {
        let preset = ClothPreset::from_name(name)?;
        self.cloth = preset.settings();
        Ok(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = SessionSettings::from_json_str(r#"{"world": {"frame_end": 120}, "shake": {"strength": 40}}"#)
            .unwrap();
        assert_eq!(settings.world.frame_end, 120);
        assert_eq!(settings.world.frame_start, 1);
        assert_eq!(settings.world.substeps, 10);
        assert!((settings.shake.strength - 40.0).abs() < f32::EPSILON);
        assert_eq!(settings.collider_name, "COLLIDER");
        assert_eq!(settings.retry, RetryPolicy::default());
    }

    #[test]
    fn zero_retry_attempts_rejected() {
        let err = SessionSettings::from_json_str(r#"{"retry": {"max_attempts": 0}}"#).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn malformed_json_is_validation_failure() {
        let err = SessionSettings::from_json_str("{not json").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationFailure);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"optimization": {{"enabled": true, "decimate_ratio": 0.2}}}}"#).unwrap();

        let settings = SessionSettings::from_path(&path).unwrap();
        assert!(settings.optimization.enabled);
        assert!((settings.optimization.decimate_ratio - 0.2).abs() < f32::EPSILON);

        assert!(SessionSettings::from_path(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn preset_replaces_cloth_settings() {
        let mut settings = SessionSettings::default();
        assert_eq!(settings.apply_preset("denim").unwrap(), ClothPreset::Denim);
        assert_eq!(settings.cloth, ClothPreset::Denim.settings());
        assert!(settings.apply_preset("velvet").is_err());
    }
}
