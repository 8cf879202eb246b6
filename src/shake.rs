//! Secondary "shake" effect.
//!
//! The collider is shaken by procedural noise modifiers on its location curves,
//! one per axis. These modifiers are tracked in the shake partition of the
//! [`StateStore`] independently of the session phase.

use std::thread;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{DropError, DropResult};
use crate::handle::Handle;
use crate::host::curves::{self, CurveStrategy};
use crate::host::{AnimationOps, Axis, HostError, NoiseParams, SceneOps};
use crate::physics::limits;
use crate::store::{keys, Partition, StateStore};
use crate::validator::{HostValidator, ReferenceValidator};

/// Frames of the two anchor keyframes that force the curves into existence.
pub const ANCHOR_FRAMES: [f32; 2] = [1.0, 250.0];

/// Divisor from user strength to modifier strength.
pub const STRENGTH_DIVISOR: f32 = 200.0;

/// Maps a user strength onto modifier strength: clamp to [0, 100], then halve.
#[must_use]
pub fn scaled_strength(strength: f32) -> f32 {
    limits::SHAKE_STRENGTH.clamp_f32(strength) / STRENGTH_DIVISOR
}

/// Creates, tracks and drives the per-axis noise modifiers.
pub struct SecondaryEffectController<'a, H: ?Sized> {
    host: &'a H,
    store: &'a StateStore,
    retry: RetryPolicy,
}

impl<'a, H: SceneOps + AnimationOps + ?Sized> SecondaryEffectController<'a, H> {
    /// Creates a controller.
    #[must_use]
    pub const fn new(host: &'a H, store: &'a StateStore, retry: RetryPolicy) -> Self {
        Self { host, store, retry }
    }

    /// Forgets every tracked modifier. Host modifiers are left alone; they go
    /// away with their owning entity.
    pub fn reset(&self) -> DropResult<()> {
        self.store.reset(Partition::Shake)
    }

    /// Currently tracked modifiers, by axis.
    pub fn modifiers(&self) -> DropResult<[Option<Handle>; 3]> {
        self.store.axis_handles(Partition::Shake, keys::SHAKE_MODIFIERS)
    }

    fn wait_for_animation(&self, target: Handle) -> DropResult<()> {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            if self
                .host
                .has_animation(target)
                .map_err(|e| DropError::host("has_animation", e))?
            {
                return Ok(());
            }
            if attempt < attempts {
                debug!(%target, attempt, "animation data not materialized yet; retrying");
                thread::sleep(self.retry.backoff());
            }
        }
        Err(DropError::host(
            "has_animation",
            HostError::NotMaterialized(format!("animation of {target} after {attempts} attempts")),
        ))
    }

    /// Attaches a zero-strength noise modifier to one location curve of `target`.
    pub fn attach(&self, target: Handle, axis: Axis) -> DropResult<Handle> {
        if !HostValidator::new(self.host).is_valid(target) {
            return Err(DropError::InvalidReference {
                handle: target,
                context: "shake target",
            });
        }

        for frame in ANCHOR_FRAMES {
            self.host
                .insert_keyframe(target, axis, frame)
                .map_err(|e| DropError::host("insert_keyframe", e))?;
        }
        self.wait_for_animation(target)?;

        let curve = curves::find_location_curve(self.host, target, axis, &CurveStrategy::ORDER).ok_or_else(|| {
            DropError::host(
                "curves",
                HostError::NotMaterialized(format!("{axis:?} location curve of {target}")),
            )
        })?;

        let params = NoiseParams {
            strength: 0.0,
            ..NoiseParams::default()
        };
        let modifier = self
            .host
            .add_noise(curve, &params)
            .map_err(|e| DropError::host("add_noise", e))?;

        self.store
            .set_axis_handle(Partition::Shake, keys::SHAKE_MODIFIERS, axis, Some(modifier))?;
        self.store
            .set_handle(Partition::Shake, keys::SHAKE_TARGET, Some(target))?;
        debug!(%target, ?axis, %modifier, "shake modifier attached");
        Ok(modifier)
    }

    /// Attaches on every axis; a failing axis does not stop the others.
    ///
    /// Returns the number of axes attached.
    pub fn attach_all(&self, target: Handle) -> usize {
        Axis::ALL
            .into_iter()
            .filter(|axis| match self.attach(target, *axis) {
                Ok(_) => true,
                Err(err) => {
                    warn!(%target, ?axis, %err, "shake axis unavailable");
                    false
                }
            })
            .count()
    }

    /// Sets the strength of every tracked modifier.
    ///
    /// Enabled axes get the scaled strength and a fresh random phase; disabled
    /// axes get zero. Dead modifiers are skipped. Returns the number of axes
    /// updated and fails only when none could be.
    pub fn update(&self, strength: f32, axes: [bool; 3]) -> DropResult<usize> {
        let scaled = scaled_strength(strength);
        let modifiers = self.modifiers()?;
        if modifiers.iter().all(Option::is_none) {
            return Err(DropError::context("no shake modifiers are tracked"));
        }

        let validator = HostValidator::new(self.host);
        let mut rng = rand::thread_rng();
        let mut updated = 0;
        for axis in Axis::ALL {
            let Some(modifier) = modifiers[axis.index()] else {
                continue;
            };
            if !validator.is_valid(modifier) {
                warn!(?axis, %modifier, "shake modifier is gone; skipping");
                continue;
            }
            let result = if axes[axis.index()] {
                self.host.set_noise(modifier, scaled, rng.gen_range(1.0..10.0))
            } else {
                let phase = self.host.noise(modifier).map_or(0.0, |n| n.phase);
                self.host.set_noise(modifier, 0.0, phase)
            };
            match result {
                Ok(()) => updated += 1,
                Err(err) => warn!(?axis, %modifier, %err, "failed to update shake modifier"),
            }
        }

        if updated == 0 {
            return Err(DropError::context("no shake modifier could be updated"));
        }
        debug!(strength, scaled, updated, "shake updated");
        Ok(updated)
    }
}
