//! Abstract host-application traits.
//!
//! These traits are the whole boundary between the orchestrator and the host
//! application that owns the scene graph and the physics solvers. By keeping the
//! boundary behind traits we can run the orchestrator against:
//! - The in-memory scene for tests and replay
//! - A real host binding in production
//!
//! Every call returns `HostResult`; "the entity no longer exists" is a normal
//! `HostError::Missing` value, never a panic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handle::Handle;
use crate::physics::{BodyType, ClothSettings, CollisionSettings, ForceFieldSettings, RigidBodyProps};

use super::curves::CurveStrategy;

/// Errors reported by host boundary calls.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    /// No active scene / view layer to operate on.
    #[error("Host context unavailable: {0}")]
    ContextUnavailable(String),

    /// The referenced entity has been deleted (or the handle is stale).
    #[error("Entity no longer exists: {0}")]
    Missing(Handle),

    /// Data the host creates lazily is not available yet.
    #[error("Not materialized yet: {0}")]
    NotMaterialized(String),

    /// The host refused or failed the operation.
    #[error("Operation '{op}' rejected: {reason}")]
    Rejected {
        /// Boundary call name.
        op: &'static str,
        /// Host-provided reason.
        reason: String,
    },

    /// Backend failure (poisoned lock, binding error).
    #[error("Host backend error: {0}")]
    Backend(String),
}

/// Result alias for host calls.
pub type HostResult<T> = Result<T, HostError>;

/// Coarse classification of scene objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Concrete mesh geometry.
    Mesh,
    /// Reference to an instanced group; must be realized before simulation.
    Instance,
    /// Force-field effector.
    ForceField,
    /// Anything else (cameras, lights, empties).
    Other,
}

/// Viewport display style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayType {
    Bounds,
    Wire,
    Solid,
    Textured,
}

/// Spatial axis of a location channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes in index order.
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    /// Zero-based channel index.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }

    /// Axis for a channel index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::X),
            1 => Some(Self::Y),
            2 => Some(Self::Z),
            _ => None,
        }
    }
}

/// An animation curve as reported by a lookup strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveRef {
    /// Curve handle.
    pub handle: Handle,
    /// Animated property path (e.g. `location`).
    pub data_path: String,
    /// Channel index within the property.
    pub array_index: usize,
}

/// Parameters of a procedural noise curve modifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseParams {
    /// Displacement amplitude.
    pub strength: f32,
    /// Noise period in frames.
    pub scale: f32,
    /// Position within the noise pattern.
    pub phase: f32,
    /// Frame offset of the pattern.
    pub offset: f32,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            strength: 0.0,
            scale: 0.2,
            phase: 0.0,
            offset: 0.0,
        }
    }
}

/// Notification emitted by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// The user performed an undo (or redo); any tracked handle may be dead.
    UndoOccurred,
}

/// Entity duplication, deletion and selection primitives.
///
/// # Safety Considerations
/// - Implementations must never hand out a handle that aliases a deleted entity
/// - Implementations should handle concurrent access safely
pub trait SceneOps: Send + Sync {
    /// Returns whether the entity behind the handle is still alive.
    ///
    /// Implementations may fail (e.g. the scene itself is gone); callers go
    /// through the reference validator which maps errors to "dead".
    fn exists(&self, handle: Handle) -> HostResult<bool>;

    /// All objects in the active scene.
    fn objects(&self) -> HostResult<Vec<Handle>>;

    /// Currently selected objects.
    fn selected(&self) -> HostResult<Vec<Handle>>;

    /// Object classification.
    fn object_kind(&self, object: Handle) -> HostResult<ObjectKind>;

    /// Object name.
    fn name(&self, object: Handle) -> HostResult<String>;

    /// Renames an object.
    fn set_name(&self, object: Handle, name: &str) -> HostResult<()>;

    /// Selects or deselects one object.
    fn select(&self, object: Handle, selected: bool) -> HostResult<()>;

    /// Clears the selection.
    fn deselect_all(&self) -> HostResult<()>;

    /// Makes the object the active one.
    fn set_active(&self, object: Handle) -> HostResult<()>;

    /// Returns the active object, if any.
    fn active(&self) -> HostResult<Option<Handle>>;

    /// Duplicates an object together with its data (single user copy).
    fn duplicate(&self, object: Handle) -> HostResult<Handle>;

    /// Deletes an entity.
    fn delete(&self, object: Handle) -> HostResult<()>;

    /// Hides or unhides an object in the viewport.
    fn set_hidden(&self, object: Handle, hidden: bool) -> HostResult<()>;

    /// Returns whether the object is hidden.
    fn is_hidden(&self, object: Handle) -> HostResult<bool>;

    /// Parents `child` to `parent` (or clears the parent), optionally keeping the
    /// world transform.
    fn set_parent(&self, child: Handle, parent: Option<Handle>, keep_transform: bool) -> HostResult<()>;

    /// Current parent of an object.
    fn parent(&self, object: Handle) -> HostResult<Option<Handle>>;

    /// Sets the viewport display type.
    fn set_display(&self, object: Handle, display: DisplayType) -> HostResult<()>;

    /// World-space location.
    fn location(&self, object: Handle) -> HostResult<[f32; 3]>;

    /// Commits the evaluated (simulated) transform into the object's own transform.
    fn apply_visual_transform(&self, object: Handle) -> HostResult<()>;

    /// Expands an instance reference into concrete mesh objects.
    fn realize_instances(&self, object: Handle) -> HostResult<Vec<Handle>>;

    /// Creates a force-field effector.
    fn add_force_field(&self, location: [f32; 3], settings: &ForceFieldSettings) -> HostResult<Handle>;

    /// Rewrites the parameters of an existing force-field effector.
    fn set_force_field(&self, force: Handle, settings: &ForceFieldSettings) -> HostResult<()>;
}

/// Mesh-reduction and geometry utility primitives.
pub trait MeshOps: Send + Sync {
    /// Joins the objects into one and returns the merged object.
    ///
    /// The inputs are consumed; only the returned handle stays alive.
    fn join(&self, objects: &[Handle]) -> HostResult<Handle>;

    /// Bakes location/rotation/scale into the mesh data.
    fn apply_transform(&self, object: Handle) -> HostResult<()>;

    /// Adds a voxel remesh step.
    fn remesh(&self, object: Handle, voxel_size: f32) -> HostResult<()>;

    /// Adds a decimation step.
    fn decimate(&self, object: Handle, ratio: f32) -> HostResult<()>;

    /// Evaluates all modifiers into concrete mesh data.
    fn convert_to_mesh(&self, object: Handle) -> HostResult<()>;
}

/// Rigid-body world and body primitives.
pub trait RigidBodyOps: Send + Sync {
    /// Returns whether a rigid-body world exists.
    fn has_world(&self) -> HostResult<bool>;

    /// Creates the rigid-body world if missing.
    fn ensure_world(&self) -> HostResult<()>;

    /// Adds (or replaces) a rigid body on the object.
    fn add_body(&self, object: Handle, body: BodyType, props: &RigidBodyProps) -> HostResult<()>;

    /// Removes the rigid body from the object.
    fn remove_body(&self, object: Handle) -> HostResult<()>;

    /// Commits the transient simulation cache into a persistent bake.
    fn bake_to_cache(&self, frame_start: i32, frame_end: i32) -> HostResult<()>;

    /// Converts the cached simulation of `objects` into keyframes.
    fn bake_to_keyframes(&self, objects: &[Handle], frame_start: i32, frame_end: i32) -> HostResult<()>;

    /// Frees every solver cache.
    fn free_all_caches(&self) -> HostResult<()>;
}

/// Cloth primitives.
pub trait ClothOps: Send + Sync {
    /// Adds a cloth modifier and returns its handle.
    fn add_cloth(&self, object: Handle, settings: &ClothSettings, frame_end: i32) -> HostResult<Handle>;

    /// Adds a collision modifier and returns its handle.
    fn add_collision(&self, object: Handle, settings: &CollisionSettings) -> HostResult<Handle>;

    /// Reads the cloth parameters of a cloth modifier.
    fn cloth_settings(&self, modifier: Handle) -> HostResult<ClothSettings>;

    /// Writes the cloth parameters of a cloth modifier.
    fn set_cloth_settings(&self, modifier: Handle, settings: &ClothSettings) -> HostResult<()>;

    /// Commits the cloth caches of the given modifiers into a persistent bake.
    fn bake_cloth_cache(&self, modifiers: &[Handle]) -> HostResult<()>;
}

/// Animation-curve primitives.
pub trait AnimationOps: Send + Sync {
    /// Inserts a location keyframe on one axis.
    fn insert_keyframe(&self, object: Handle, axis: Axis, frame: f32) -> HostResult<()>;

    /// Returns whether the object's animation container exists yet.
    fn has_animation(&self, object: Handle) -> HostResult<bool>;

    /// Enumerates curves through one lookup strategy.
    ///
    /// `Ok(None)` means the strategy is not supported by this host version.
    fn curves(&self, object: Handle, strategy: CurveStrategy) -> HostResult<Option<Vec<CurveRef>>>;

    /// Attaches a noise modifier to a curve.
    fn add_noise(&self, curve: Handle, params: &NoiseParams) -> HostResult<Handle>;

    /// Updates strength and phase of a noise modifier.
    fn set_noise(&self, modifier: Handle, strength: f32, phase: f32) -> HostResult<()>;

    /// Reads a noise modifier.
    fn noise(&self, modifier: Handle) -> HostResult<NoiseParams>;
}

/// Global simulation parameters.
///
/// Each field has its own accessor so a failing read can be isolated.
pub trait WorldOps: Send + Sync {
    fn cache_frame_start(&self) -> HostResult<i32>;
    fn cache_frame_end(&self) -> HostResult<i32>;
    fn set_cache_frame_range(&self, start: i32, end: i32) -> HostResult<()>;

    fn substeps(&self) -> HostResult<u32>;
    fn set_substeps(&self, substeps: u32) -> HostResult<()>;

    fn solver_iterations(&self) -> HostResult<u32>;
    fn set_solver_iterations(&self, iterations: u32) -> HostResult<()>;

    fn world_enabled(&self) -> HostResult<bool>;
    fn set_world_enabled(&self, enabled: bool) -> HostResult<()>;

    fn split_impulse(&self) -> HostResult<bool>;
    fn set_split_impulse(&self, enabled: bool) -> HostResult<()>;

    fn scene_frame_end(&self) -> HostResult<i32>;
    fn set_scene_frame_end(&self, frame: i32) -> HostResult<()>;

    fn gravity_weight(&self) -> HostResult<f32>;
    fn set_gravity_weight(&self, weight: f32) -> HostResult<()>;

    fn current_frame(&self) -> HostResult<i32>;
    fn set_current_frame(&self, frame: i32) -> HostResult<()>;
}

/// Timeline playback control.
pub trait PlaybackOps: Send + Sync {
    /// Returns whether playback is running.
    fn is_playing(&self) -> HostResult<bool>;

    /// Toggles play/pause.
    fn toggle_playback(&self) -> HostResult<()>;
}

/// Host notification hook.
pub trait NotifyOps: Send + Sync {
    /// Registers a sink that receives host events.
    fn subscribe(&self, sink: crate::notify::EventSink) -> HostResult<()>;
}

/// Everything the orchestrator needs from the host.
pub trait SceneHost:
    SceneOps + MeshOps + RigidBodyOps + ClothOps + AnimationOps + WorldOps + PlaybackOps + NotifyOps
{
}

impl<T> SceneHost for T where
    T: SceneOps
        + MeshOps
        + RigidBodyOps
        + ClothOps
        + AnimationOps
        + WorldOps
        + PlaybackOps
        + NotifyOps
{
}
