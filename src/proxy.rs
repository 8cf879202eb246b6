//! High/low-detail proxy management.
//!
//! Expensive meshes are simulated through reduced stand-ins. The original stays
//! in the scene, hidden and parented to its proxy so it follows the simulated
//! motion; restoring re-links the original and deletes the proxy.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::OptimizationSettings;
use crate::handle::Handle;
use crate::host::{HostResult, MeshOps, SceneOps};
use crate::physics::limits;
use crate::store::ProxyPair;
use crate::validator::{HostValidator, ReferenceValidator};

/// Result of restoring a batch of proxy pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProxyRestoreReport {
    /// Pairs whose original is visible and unparented again.
    pub restored: usize,
    /// Pairs processed.
    pub attempted: usize,
}

/// Mesh reduction applied to a proxy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reduction {
    /// Remesh voxel size; `None` skips remeshing.
    pub voxel_size: Option<f32>,
    /// Collapse ratio kept by decimation.
    pub decimate_ratio: f32,
}

impl Reduction {
    /// Reduction for active proxies.
    #[must_use]
    pub fn for_proxies(settings: &OptimizationSettings) -> Self {
        Self::new(settings.voxel_size, settings.decimate_ratio)
    }

    /// Reduction for the merged collider.
    #[must_use]
    pub fn for_collider(settings: &OptimizationSettings) -> Self {
        Self::new(settings.passive_voxel_size, settings.passive_decimate_ratio)
    }

    fn new(voxel_size: f32, decimate_ratio: f32) -> Self {
        Self {
            voxel_size: (voxel_size > 0.0).then(|| limits::VOXEL_SIZE.clamp_f32(voxel_size)),
            decimate_ratio: limits::DECIMATE_RATIO.clamp_f32(decimate_ratio),
        }
    }

    /// Runs remesh, decimate and convert on `object`.
    pub fn apply<H: MeshOps + ?Sized>(&self, host: &H, object: Handle) -> HostResult<()> {
        if let Some(voxel) = self.voxel_size {
            host.remesh(object, voxel)?;
        }
        host.decimate(object, self.decimate_ratio)?;
        host.convert_to_mesh(object)
    }
}

/// Creates and dissolves proxy pairs.
pub struct ProxyOptimizer<'a, H: ?Sized> {
    host: &'a H,
    suffix: &'a str,
    reduction: Reduction,
}

impl<'a, H: SceneOps + MeshOps + ?Sized> ProxyOptimizer<'a, H> {
    /// Creates an optimizer naming proxies `<original><suffix>`.
    #[must_use]
    pub const fn new(host: &'a H, suffix: &'a str, reduction: Reduction) -> Self {
        Self { host, suffix, reduction }
    }

    fn build_pair(&self, high: Handle) -> HostResult<ProxyPair> {
        let low = self.host.duplicate(high)?;
        let linked = self.link(high, low);
        if let Err(err) = linked {
            if let Err(undo) = self.host.set_parent(high, None, true) {
                warn!(%high, err = %undo, "could not unlink original after failed proxy");
            }
            if let Err(undo) = self.host.set_hidden(high, false) {
                warn!(%high, err = %undo, "could not reveal original after failed proxy");
            }
            if let Err(undo) = self.host.delete(low) {
                warn!(%low, err = %undo, "could not delete failed proxy");
            }
            return Err(err);
        }
        Ok(ProxyPair::new(high, low))
    }

    fn link(&self, high: Handle, low: Handle) -> HostResult<()> {
        let name = self.host.name(high)?;
        self.host.set_name(low, &format!("{name}{}", self.suffix))?;
        self.host.set_hidden(high, true)?;
        self.host.set_parent(high, Some(low), true)?;
        self.reduction.apply(self.host, low)
    }

    /// Builds one proxy per live handle; failed pairs are skipped.
    pub fn create_proxies(&self, active: &[Handle]) -> Vec<ProxyPair> {
        let validator = HostValidator::new(self.host);
        let mut pairs = Vec::with_capacity(active.len());
        for &high in active {
            if !validator.is_valid(high) {
                warn!(%high, "skipping proxy for dead handle");
                continue;
            }
            match self.build_pair(high) {
                Ok(pair) => pairs.push(pair),
                Err(err) => warn!(%high, %err, "proxy creation failed; simulating original"),
            }
        }
        debug!(created = pairs.len(), requested = active.len(), "proxies created");
        pairs
    }

    /// Unhides and unparents originals, deletes proxies.
    ///
    /// A dead proxy counts as already cleaned up. Never fails.
    pub fn restore(&self, pairs: &[ProxyPair]) -> ProxyRestoreReport {
        let validator = HostValidator::new(self.host);
        let mut report = ProxyRestoreReport::default();
        for pair in pairs {
            report.attempted += 1;
            let mut ok = true;

            match validator.live(pair.high) {
                Some(high) => {
                    if let Err(err) = self
                        .host
                        .set_parent(high, None, true)
                        .and_then(|()| self.host.set_hidden(high, false))
                    {
                        warn!(%high, %err, "failed to re-link original");
                        ok = false;
                    }
                }
                None => {
                    warn!(?pair, "original of proxy pair is gone");
                    ok = false;
                }
            }

            if let Some(low) = validator.live(pair.low) {
                if let Err(err) = self.host.delete(low) {
                    warn!(%low, %err, "failed to delete proxy");
                    ok = false;
                }
            }

            if ok {
                report.restored += 1;
            }
        }
        debug!(restored = report.restored, attempted = report.attempted, "proxies restored");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MeshOp;
    use crate::host::InMemoryScene;

    fn reduction() -> Reduction {
        Reduction::for_proxies(&OptimizationSettings::default())
    }

    #[test]
    fn creates_and_restores_pairs() {
        let scene = InMemoryScene::new();
        let a = scene.add_mesh("Rock", [0.0; 3]).unwrap();
        let b = scene.add_mesh("Pebble", [1.0, 0.0, 0.0]).unwrap();
        let optimizer = ProxyOptimizer::new(&scene, "_PhysProxy", reduction());

        let pairs = optimizer.create_proxies(&[a, b]);
        assert_eq!(pairs.len(), 2);
        let low = pairs[0].low.unwrap();
        assert_eq!(scene.name(low).unwrap(), "Rock_PhysProxy");
        assert!(scene.is_hidden(a).unwrap());
        assert_eq!(scene.parent(a).unwrap(), Some(low));
        assert_eq!(
            scene.mesh_ops(low),
            vec![MeshOp::Remesh(0.05), MeshOp::Decimate(0.3), MeshOp::ConvertToMesh]
        );
        assert_eq!(scene.object_count(), 4);

        let report = optimizer.restore(&pairs);
        assert_eq!(report, ProxyRestoreReport { restored: 2, attempted: 2 });
        assert!(!scene.is_hidden(a).unwrap());
        assert_eq!(scene.parent(a).unwrap(), None);
        assert_eq!(scene.object_count(), 2);
    }

    #[test]
    fn failing_step_skips_only_that_pair() {
        let scene = InMemoryScene::new();
        let a = scene.add_mesh("A", [0.0; 3]).unwrap();
        let optimizer = ProxyOptimizer::new(&scene, "_P", reduction());

        scene.inject_failure("decimate", "non-manifold");
        assert!(optimizer.create_proxies(&[a]).is_empty());
        assert!(!scene.is_hidden(a).unwrap());
        assert_eq!(scene.parent(a).unwrap(), None);
        assert_eq!(scene.object_count(), 1);
    }

    #[test]
    fn rollback_continues_past_failed_cleanup() {
        let scene = InMemoryScene::new();
        let a = scene.add_mesh("A", [0.0; 3]).unwrap();
        let optimizer = ProxyOptimizer::new(&scene, "_P", reduction());

        scene.inject_failure("decimate", "non-manifold");
        scene.inject_failure("delete", "locked");
        assert!(optimizer.create_proxies(&[a]).is_empty());
        // The stray proxy survives, but the original is back in view.
        assert!(!scene.is_hidden(a).unwrap());
        assert_eq!(scene.parent(a).unwrap(), None);
        assert_eq!(scene.find_by_name("A_P").len(), 1);
    }

    #[test]
    fn dead_proxy_counts_as_cleaned() {
        let scene = InMemoryScene::new();
        let a = scene.add_mesh("A", [0.0; 3]).unwrap();
        let optimizer = ProxyOptimizer::new(&scene, "_P", reduction());
        let pairs = optimizer.create_proxies(&[a]);
        scene.delete_externally(&[pairs[0].low.unwrap()]);

        let report = optimizer.restore(&pairs);
        assert_eq!(report.restored, 1);
        assert!(!scene.is_hidden(a).unwrap());
    }

    #[test]
    fn zero_voxel_skips_remesh() {
        let settings = OptimizationSettings {
            voxel_size: 0.0,
            ..OptimizationSettings::default()
        };
        assert_eq!(Reduction::for_proxies(&settings).voxel_size, None);
    }
}
