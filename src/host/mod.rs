//! Host application boundary.
//!
//! The orchestrator never touches scene data directly; it goes through the
//! traits in [`traits`]. [`memory::InMemoryScene`] implements all of them for
//! tests, benchmarks and the replay tool.

/// Ordered animation-curve lookup strategies.
pub mod curves;
/// In-memory reference host.
pub mod memory;
/// Boundary traits and shared types.
pub mod traits;

pub use curves::CurveStrategy;
pub use memory::{InMemoryScene, WriteHook};
pub use traits::{
    AnimationOps, Axis, ClothOps, CurveRef, DisplayType, HostError, HostEvent, HostResult, MeshOps, NoiseParams,
    NotifyOps, ObjectKind, PlaybackOps, RigidBodyOps, SceneHost, SceneOps, WorldOps,
};
