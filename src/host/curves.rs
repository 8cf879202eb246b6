//! Animation-curve lookup with ordered strategy fallback.
//!
//! Host versions disagree on how an object's location curves are reached. The
//! lookup tries each strategy in order and stops at the first one the host
//! supports; an unsupported strategy answers `Ok(None)` and an erroring strategy
//! is logged and skipped.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::handle::Handle;

use super::traits::{AnimationOps, Axis, CurveRef};

/// Property path of location curves.
pub const LOCATION_PATH: &str = "location";

/// One way of enumerating an object's animation curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveStrategy {
    /// Direct access to the action's curve list.
    Legacy,
    /// Layered actions: slot, then channel bag.
    SlotChannelBag,
    /// Manual walk over layers and strips.
    StructuralTraversal,
}

impl CurveStrategy {
    /// Default lookup order.
    pub const ORDER: [Self; 3] = [Self::Legacy, Self::SlotChannelBag, Self::StructuralTraversal];
}

/// Enumerates the curves of `object`, trying `order` front to back.
///
/// Returns `None` when no strategy produced a curve list.
pub fn enumerate<A: AnimationOps + ?Sized>(
    host: &A,
    object: Handle,
    order: &[CurveStrategy],
) -> Option<(CurveStrategy, Vec<CurveRef>)> {
    for &strategy in order {
        match host.curves(object, strategy) {
            Ok(Some(curves)) => {
                debug!(%object, ?strategy, count = curves.len(), "curve lookup succeeded");
                return Some((strategy, curves));
            }
            Ok(None) => debug!(%object, ?strategy, "curve strategy unsupported"),
            Err(err) => warn!(%object, ?strategy, %err, "curve strategy failed"),
        }
    }
    None
}

/// Finds the location curve of one axis.
pub fn find_location_curve<A: AnimationOps + ?Sized>(
    host: &A,
    object: Handle,
    axis: Axis,
    order: &[CurveStrategy],
) -> Option<Handle> {
    let (_, curves) = enumerate(host, object, order)?;
    curves
        .into_iter()
        .find(|c| c.data_path == LOCATION_PATH && c.array_index == axis.index())
        .map(|c| c.handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleKind;
    use crate::host::traits::{HostError, HostResult, NoiseParams};

    struct OnlyTraversal;

    impl AnimationOps for OnlyTraversal {
        fn insert_keyframe(&self, _: Handle, _: Axis, _: f32) -> HostResult<()> {
            Ok(())
        }
        fn has_animation(&self, _: Handle) -> HostResult<bool> {
            Ok(true)
        }
        fn curves(&self, _: Handle, strategy: CurveStrategy) -> HostResult<Option<Vec<CurveRef>>> {
            match strategy {
                CurveStrategy::Legacy => Ok(None),
                CurveStrategy::SlotChannelBag => Err(HostError::Backend("no slot".to_string())),
                CurveStrategy::StructuralTraversal => Ok(Some(
                    (0..3)
                        .map(|i| CurveRef {
                            handle: Handle::new(HandleKind::Curve, i, 0),
                            data_path: LOCATION_PATH.to_string(),
                            array_index: i as usize,
                        })
                        .collect(),
                )),
            }
        }
        fn add_noise(&self, _: Handle, _: &NoiseParams) -> HostResult<Handle> {
            unreachable!()
        }
        fn set_noise(&self, _: Handle, _: f32, _: f32) -> HostResult<()> {
            unreachable!()
        }
        fn noise(&self, _: Handle) -> HostResult<NoiseParams> {
            unreachable!()
        }
    }

    #[test]
    fn falls_through_to_first_supported_strategy() {
        let object = Handle::new(HandleKind::Object, 0, 0);
        let (strategy, curves) = enumerate(&OnlyTraversal, object, &CurveStrategy::ORDER).unwrap();
        assert_eq!(strategy, CurveStrategy::StructuralTraversal);
        assert_eq!(curves.len(), 3);

        let z = find_location_curve(&OnlyTraversal, object, Axis::Z, &CurveStrategy::ORDER).unwrap();
        assert_eq!(z.index(), 2);
    }

    #[test]
    fn no_supported_strategy_yields_none() {
        let object = Handle::new(HandleKind::Object, 0, 0);
        assert!(enumerate(&OnlyTraversal, object, &[CurveStrategy::Legacy]).is_none());
    }
}
