//! Global simulation parameters: capture, apply, restore.
//!
//! A session captures the host's world parameters once when it starts and writes
//! them back exactly once when it ends. The snapshot lives in the general
//! partition of the [`StateStore`] so a second restore finds nothing and does
//! nothing.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::WorldSettings;
use crate::error::{DropError, DropResult, ValidationError};
use crate::host::{HostResult, WorldOps};
use crate::physics::limits;
use crate::store::{keys, Partition, StateStore};

/// Immutable record of the host's world parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Cache start frame.
    pub frame_start: i32,
    /// Cache end frame.
    pub frame_end: i32,
    /// Solver substeps per frame.
    pub substeps: u32,
    /// Constraint solver iterations.
    pub solver_iterations: u32,
    /// Whether the rigid-body world was simulating.
    pub enabled: bool,
    /// Split impulse flag.
    pub split_impulse: bool,
    /// Scene playback end frame, distinct from the cache range.
    pub scene_frame_end: i32,
    /// Gravity weight of the world's effector settings.
    pub gravity_weight: f32,
}

impl Default for WorldSnapshot {
    fn default() -> Self {
        let world = WorldSettings::default();
        Self {
            frame_start: world.frame_start,
            frame_end: world.frame_end,
            substeps: world.substeps,
            solver_iterations: world.solver_iterations,
            enabled: true,
            split_impulse: world.split_impulse,
            scene_frame_end: world.frame_end,
            gravity_weight: 1.0,
        }
    }
}

/// What `restore` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// A snapshot was written back; `failed_fields` writes were rejected.
    Restored { failed_fields: usize },
    /// No snapshot was pending.
    NothingCaptured,
}

fn soft_read<T: Copy + std::fmt::Debug>(field: &'static str, result: HostResult<T>, fallback: T) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(field, %err, ?fallback, "world parameter unreadable; using default");
            fallback
        }
    }
}

fn soft_write(field: &'static str, result: HostResult<()>) -> usize {
    match result {
        Ok(()) => 0,
        Err(err) => {
            warn!(field, %err, "failed to restore world parameter");
            1
        }
    }
}

/// Reads and writes the host's global simulation parameters.
pub struct WorldSettingsManager<'a, H: ?Sized> {
    host: &'a H,
}

impl<'a, H: WorldOps + ?Sized> WorldSettingsManager<'a, H> {
    /// Wraps a host.
    #[must_use]
    pub const fn new(host: &'a H) -> Self {
        Self { host }
    }

    /// Reads the current parameters.
    ///
    /// Never fails: an unreadable field takes its default value.
    pub fn capture(&self) -> WorldSnapshot {
        let defaults = WorldSnapshot::default();
        WorldSnapshot {
            frame_start: soft_read("frame_start", self.host.cache_frame_start(), defaults.frame_start),
            frame_end: soft_read("frame_end", self.host.cache_frame_end(), defaults.frame_end),
            substeps: soft_read("substeps", self.host.substeps(), defaults.substeps),
            solver_iterations: soft_read(
                "solver_iterations",
                self.host.solver_iterations(),
                defaults.solver_iterations,
            ),
            enabled: soft_read("enabled", self.host.world_enabled(), defaults.enabled),
            split_impulse: soft_read("split_impulse", self.host.split_impulse(), defaults.split_impulse),
            scene_frame_end: soft_read("scene_frame_end", self.host.scene_frame_end(), defaults.scene_frame_end),
            gravity_weight: soft_read("gravity_weight", self.host.gravity_weight(), defaults.gravity_weight),
        }
    }

    /// Validates and writes requested parameters; returns what was written.
    ///
    /// An inverted frame range falls back to the default range. Substeps and
    /// iterations are clamped. Host write failures are hard.
    pub fn apply(&self, requested: &WorldSettings) -> DropResult<WorldSettings> {
        let mut effective = *requested;
        effective.frame_start = limits::FRAME.clamp_i32(effective.frame_start);
        effective.frame_end = limits::FRAME.clamp_i32(effective.frame_end);
        if effective.frame_start >= effective.frame_end {
            let err = ValidationError::InvalidFrameRange {
                start: effective.frame_start,
                end: effective.frame_end,
            };
            let defaults = WorldSettings::default();
            warn!(%err, start = defaults.frame_start, end = defaults.frame_end, "using default frame range");
            effective.frame_start = defaults.frame_start;
            effective.frame_end = defaults.frame_end;
        }
        effective.substeps = limits::SUBSTEPS.clamp_u32(effective.substeps);
        effective.solver_iterations = limits::SOLVER_ITERATIONS.clamp_u32(effective.solver_iterations);

        self.host
            .set_cache_frame_range(effective.frame_start, effective.frame_end)
            .map_err(|e| DropError::host("set_cache_frame_range", e))?;
        self.host
            .set_scene_frame_end(effective.frame_end)
            .map_err(|e| DropError::host("set_scene_frame_end", e))?;
        self.host
            .set_substeps(effective.substeps)
            .map_err(|e| DropError::host("set_substeps", e))?;
        self.host
            .set_solver_iterations(effective.solver_iterations)
            .map_err(|e| DropError::host("set_solver_iterations", e))?;
        self.host
            .set_split_impulse(effective.split_impulse)
            .map_err(|e| DropError::host("set_split_impulse", e))?;
        self.host
            .set_world_enabled(true)
            .map_err(|e| DropError::host("set_world_enabled", e))?;

        debug!(
            start = effective.frame_start,
            end = effective.frame_end,
            substeps = effective.substeps,
            iterations = effective.solver_iterations,
            "world parameters applied"
        );
        Ok(effective)
    }

    /// Writes every field of `snapshot` back; returns the number of rejected writes.
    pub fn restore(&self, snapshot: &WorldSnapshot) -> usize {
        let mut failed = 0;
        failed += soft_write(
            "frame_range",
            self.host.set_cache_frame_range(snapshot.frame_start, snapshot.frame_end),
        );
        failed += soft_write("substeps", self.host.set_substeps(snapshot.substeps));
        failed += soft_write("solver_iterations", self.host.set_solver_iterations(snapshot.solver_iterations));
        failed += soft_write("enabled", self.host.set_world_enabled(snapshot.enabled));
        failed += soft_write("split_impulse", self.host.set_split_impulse(snapshot.split_impulse));
        failed += soft_write("scene_frame_end", self.host.set_scene_frame_end(snapshot.scene_frame_end));
        failed += soft_write("gravity_weight", self.host.set_gravity_weight(snapshot.gravity_weight));
        failed
    }

    /// Captures the current parameters into the store.
    ///
    /// A snapshot still pending from the same session is an inconsistency.
    pub fn checkpoint(&self, store: &StateStore) -> DropResult<WorldSnapshot> {
        if store.has_snapshot(Partition::General, keys::WORLD_SNAPSHOT)? {
            return Err(DropError::inconsistent("world snapshot captured twice in one session"));
        }
        let snapshot = self.capture();
        store.put_snapshot(Partition::General, keys::WORLD_SNAPSHOT, snapshot)?;
        Ok(snapshot)
    }

    /// Consumes the stored snapshot and writes it back.
    pub fn rollback(&self, store: &StateStore) -> DropResult<RestoreOutcome> {
        match store.take_snapshot(Partition::General, keys::WORLD_SNAPSHOT)? {
            Some(snapshot) => {
                let failed_fields = self.restore(&snapshot);
                debug!(failed_fields, "world parameters restored");
                Ok(RestoreOutcome::Restored { failed_fields })
            }
            None => Ok(RestoreOutcome::NothingCaptured),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryScene;

    #[test]
    fn capture_then_restore_returns_every_field() {
        let scene = InMemoryScene::new();
        scene.set_substeps(7).unwrap();
        scene.set_gravity_weight(0.5).unwrap();
        let store = StateStore::new();
        let manager = WorldSettingsManager::new(&scene);

        let before = manager.checkpoint(&store).unwrap();
        manager
            .apply(&WorldSettings {
                frame_start: 10,
                frame_end: 90,
                substeps: 500,
                solver_iterations: 0,
                split_impulse: true,
            })
            .unwrap();
        assert_eq!(scene.substeps().unwrap(), 100);
        assert_eq!(scene.solver_iterations().unwrap(), 1);
        scene.set_gravity_weight(2.0).unwrap();

        assert_eq!(
            manager.rollback(&store).unwrap(),
            RestoreOutcome::Restored { failed_fields: 0 }
        );
        assert_eq!(manager.capture(), before);

        // Second restore is a no-op.
        scene.set_substeps(42).unwrap();
        assert_eq!(manager.rollback(&store).unwrap(), RestoreOutcome::NothingCaptured);
        assert_eq!(scene.substeps().unwrap(), 42);
    }

    #[test]
    fn inverted_frame_range_falls_back_to_defaults() {
        let scene = InMemoryScene::new();
        let manager = WorldSettingsManager::new(&scene);
        let applied = manager
            .apply(&WorldSettings {
                frame_start: 200,
                frame_end: 20,
                ..WorldSettings::default()
            })
            .unwrap();
        assert_eq!((applied.frame_start, applied.frame_end), (1, 250));
        assert_eq!(scene.cache_frame_start().unwrap(), 1);
        assert_eq!(scene.scene_frame_end().unwrap(), 250);
    }

    #[test]
    fn unreadable_field_captures_default() {
        let scene = InMemoryScene::new();
        scene.set_substeps(30).unwrap();
        scene.set_solver_iterations(30).unwrap();
        scene.inject_failure("substeps", "driver gone");
        let snapshot = WorldSettingsManager::new(&scene).capture();
        assert_eq!(snapshot.substeps, 10);
        assert_eq!(snapshot.solver_iterations, 30);
    }

    #[test]
    fn restore_without_capture_is_noop() {
        let scene = InMemoryScene::new();
        let store = StateStore::new();
        let manager = WorldSettingsManager::new(&scene);
        assert_eq!(manager.rollback(&store).unwrap(), RestoreOutcome::NothingCaptured);
    }

    #[test]
    fn second_checkpoint_is_inconsistent() {
        let scene = InMemoryScene::new();
        let store = StateStore::new();
        let manager = WorldSettingsManager::new(&scene);
        manager.checkpoint(&store).unwrap();
        assert!(manager.checkpoint(&store).unwrap_err().requires_reset());
    }
}
