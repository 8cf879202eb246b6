//! In-memory host backend.
//!
//! This module provides a thread-safe, in-memory implementation of every host
//! boundary trait. It is intended for tests, benchmarks and the replay tool, and
//! as a reference for what a real binding has to guarantee.
//!
//! Entities live in a slot table. Deleting an entity bumps its slot generation, so
//! every handle minted before the delete reports `HostError::Missing` afterwards,
//! even once the slot is reused.
//!
//! Host quirks that the orchestrator has to survive are reproducible here:
//! - per-operation failure injection (`inject_failure`)
//! - delayed animation-container materialization (`set_animation_delay`)
//! - host versions lacking some curve lookup strategies (`set_curve_strategies`)
//! - undo that deletes entities behind the orchestrator's back (`simulate_undo`)
//! - property-change callbacks fired from inside a write (`set_write_hook`)

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::handle::{Handle, HandleKind};
use crate::notify::EventSink;
use crate::physics::{BodyType, ClothSettings, CollisionSettings, ForceFieldSettings, RigidBodyProps};

use super::curves::{CurveStrategy, LOCATION_PATH};
use super::traits::{
    AnimationOps, Axis, ClothOps, CurveRef, DisplayType, HostError, HostEvent, HostResult, MeshOps, NoiseParams,
    NotifyOps, ObjectKind, PlaybackOps, RigidBodyOps, SceneOps, WorldOps,
};

/// Callback invoked after every parameter write, outside the scene lock.
///
/// Models the host's property-change notifications, which may re-enter the
/// orchestrator's state store while a command is mid-flight.
pub type WriteHook = Arc<dyn Fn(&'static str) + Send + Sync>;

/// Parent chains deeper than this are not followed.
const MAX_PARENT_DEPTH: usize = 16;

fn lock_err(context: &'static str) -> HostError {
    HostError::Backend(format!("poisoned lock: {context}"))
}

/// Geometry edit recorded on an object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeshOp {
    Remesh(f32),
    Decimate(f32),
    ConvertToMesh,
    ApplyTransform,
}

#[derive(Debug, Clone, Default)]
struct AnimationState {
    /// Remaining `has_animation` queries before the container shows up.
    pending: Option<u32>,
    materialized: bool,
    curves: [Option<Handle>; 3],
    keyframes: Vec<(Axis, f32)>,
}

#[derive(Debug, Clone)]
struct ObjectData {
    name: String,
    kind: ObjectKind,
    selected: bool,
    hidden: bool,
    parent: Option<Handle>,
    /// Parent's world location when the link was made.
    parent_anchor: [f32; 3],
    display: DisplayType,
    location: [f32; 3],
    body: Option<(BodyType, RigidBodyProps)>,
    /// Fall already written into `location` by `apply_visual_transform`.
    fall_applied: f32,
    modifiers: Vec<Handle>,
    animation: AnimationState,
    instance_members: u32,
    force: Option<ForceFieldSettings>,
    mesh_ops: Vec<MeshOp>,
    keyframes_baked: bool,
}

impl ObjectData {
    fn new(name: &str, kind: ObjectKind, location: [f32; 3]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            selected: false,
            hidden: false,
            parent: None,
            parent_anchor: [0.0; 3],
            display: DisplayType::Textured,
            location,
            body: None,
            fall_applied: 0.0,
            modifiers: Vec::new(),
            animation: AnimationState::default(),
            instance_members: 0,
            force: None,
            mesh_ops: Vec::new(),
            keyframes_baked: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ModifierPayload {
    Cloth(ClothSettings),
    Collision(CollisionSettings),
    Noise(NoiseParams),
}

#[derive(Debug, Clone)]
struct ModifierData {
    owner: Handle,
    payload: ModifierPayload,
}

#[derive(Debug, Clone)]
struct CurveData {
    owner: Handle,
    axis: Axis,
    modifiers: Vec<Handle>,
}

#[derive(Debug, Clone)]
enum Entity {
    Object(ObjectData),
    Modifier(ModifierData),
    Curve(CurveData),
}

impl Entity {
    const fn kind(&self) -> HandleKind {
        match self {
            Self::Object(_) => HandleKind::Object,
            Self::Modifier(_) => HandleKind::Modifier,
            Self::Curve(_) => HandleKind::Curve,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entity: Option<Entity>,
}

#[derive(Debug, Clone)]
struct WorldState {
    has_world: bool,
    cache_start: i32,
    cache_end: i32,
    substeps: u32,
    iterations: u32,
    enabled: bool,
    split_impulse: bool,
    scene_frame_end: i32,
    gravity_weight: f32,
    current_frame: i32,
    playing: bool,
    cache_baked: bool,
    cloth_baked: HashSet<Handle>,
    caches_freed: u32,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            has_world: false,
            cache_start: 1,
            cache_end: 250,
            substeps: 10,
            iterations: 10,
            enabled: true,
            split_impulse: false,
            scene_frame_end: 250,
            gravity_weight: 1.0,
            current_frame: 1,
            playing: false,
            cache_baked: false,
            cloth_baked: HashSet::new(),
            caches_freed: 0,
        }
    }
}

#[derive(Debug)]
struct SceneState {
    slots: Vec<Slot>,
    free: Vec<u32>,
    active: Option<Handle>,
    world: WorldState,
    scene_available: bool,
    failures: HashMap<&'static str, String>,
    animation_delay: u32,
    strategies: Vec<CurveStrategy>,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            active: None,
            world: WorldState::default(),
            scene_available: true,
            failures: HashMap::new(),
            animation_delay: 0,
            strategies: CurveStrategy::ORDER.to_vec(),
        }
    }
}

impl SceneState {
    fn check(&self, op: &'static str) -> HostResult<()> {
        match self.failures.get(op) {
            Some(reason) => Err(HostError::Rejected {
                op,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn require_scene(&self) -> HostResult<()> {
        if self.scene_available {
            Ok(())
        } else {
            Err(HostError::ContextUnavailable("no active scene".to_string()))
        }
    }

    fn alloc(&mut self, entity: Entity) -> Handle {
        let kind = entity.kind();
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entity = Some(entity);
            return Handle::new(kind, index, slot.generation);
        }
        #[allow(clippy::cast_possible_truncation)]
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entity: Some(entity),
        });
        Handle::new(kind, index, 0)
    }

    fn is_live(&self, handle: Handle) -> bool {
        self.slots.get(handle.index() as usize).is_some_and(|slot| {
            slot.generation == handle.generation()
                && slot.entity.as_ref().is_some_and(|e| e.kind() == handle.kind())
        })
    }

    fn entity(&self, handle: Handle) -> HostResult<&Entity> {
        if !self.is_live(handle) {
            return Err(HostError::Missing(handle));
        }
        self.slots[handle.index() as usize]
            .entity
            .as_ref()
            .ok_or(HostError::Missing(handle))
    }

    fn entity_mut(&mut self, handle: Handle) -> HostResult<&mut Entity> {
        if !self.is_live(handle) {
            return Err(HostError::Missing(handle));
        }
        self.slots[handle.index() as usize]
            .entity
            .as_mut()
            .ok_or(HostError::Missing(handle))
    }

    fn object(&self, handle: Handle) -> HostResult<&ObjectData> {
        match self.entity(handle)? {
            Entity::Object(obj) => Ok(obj),
            _ => Err(HostError::Missing(handle)),
        }
    }

    fn object_mut(&mut self, handle: Handle) -> HostResult<&mut ObjectData> {
        match self.entity_mut(handle)? {
            Entity::Object(obj) => Ok(obj),
            _ => Err(HostError::Missing(handle)),
        }
    }

    fn modifier_mut(&mut self, handle: Handle) -> HostResult<&mut ModifierData> {
        match self.entity_mut(handle)? {
            Entity::Modifier(m) => Ok(m),
            _ => Err(HostError::Missing(handle)),
        }
    }

    fn take(&mut self, handle: Handle) -> HostResult<Entity> {
        if !self.is_live(handle) {
            return Err(HostError::Missing(handle));
        }
        let slot = &mut self.slots[handle.index() as usize];
        let entity = slot.entity.take().ok_or(HostError::Missing(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index());
        Ok(entity)
    }

    /// Deletes an entity and everything it owns.
    fn remove(&mut self, handle: Handle) -> HostResult<()> {
        match self.take(handle)? {
            Entity::Object(obj) => {
                for modifier in obj.modifiers {
                    let _ = self.take(modifier);
                }
                for curve in obj.animation.curves.into_iter().flatten() {
                    if let Ok(Entity::Curve(data)) = self.take(curve) {
                        for modifier in data.modifiers {
                            let _ = self.take(modifier);
                        }
                    }
                }
                for slot in &mut self.slots {
                    if let Some(Entity::Object(child)) = slot.entity.as_mut() {
                        if child.parent == Some(handle) {
                            child.parent = None;
                        }
                    }
                }
                let baked = self.world.cloth_baked.iter().copied().filter(|m| self.is_live(*m)).collect();
                self.world.cloth_baked = baked;
                if self.active == Some(handle) {
                    self.active = None;
                }
            }
            Entity::Modifier(data) => match self.entity_mut(data.owner) {
                Ok(Entity::Object(owner)) => owner.modifiers.retain(|m| *m != handle),
                Ok(Entity::Curve(owner)) => owner.modifiers.retain(|m| *m != handle),
                _ => {}
            },
            Entity::Curve(data) => {
                for modifier in data.modifiers {
                    let _ = self.take(modifier);
                }
                if let Ok(owner) = self.object_mut(data.owner) {
                    owner.animation.curves[data.axis.index()] = None;
                }
            }
        }
        Ok(())
    }

    /// Distance an active body has fallen at the current frame.
    fn fall(&self) -> f32 {
        if !(self.world.has_world && self.world.enabled) {
            return 0.0;
        }
        let frames = (self.world.current_frame - self.world.cache_start).max(0);
        #[allow(clippy::cast_precision_loss)]
        let fall = 0.1 * frames as f32;
        fall
    }

    /// Location shown for the object itself, ignoring its parent.
    fn own_visual(&self, obj: &ObjectData) -> [f32; 3] {
        let mut location = obj.location;
        if matches!(obj.body, Some((BodyType::Active, _))) {
            location[2] -= self.fall() - obj.fall_applied;
        }
        location
    }

    /// How far the object's parent chain moved since each link was made.
    fn parent_offset(&self, obj: &ObjectData) -> [f32; 3] {
        let mut offset = [0.0; 3];
        let mut current = obj;
        for _ in 0..MAX_PARENT_DEPTH {
            let Some(parent) = current.parent.and_then(|p| self.object(p).ok()) else {
                break;
            };
            let visual = self.own_visual(parent);
            for i in 0..3 {
                offset[i] += visual[i] - current.parent_anchor[i];
            }
            current = parent;
        }
        offset
    }

    /// World-space location the solver currently shows.
    fn visual_location(&self, obj: &ObjectData) -> [f32; 3] {
        let mut location = self.own_visual(obj);
        let offset = self.parent_offset(obj);
        for i in 0..3 {
            location[i] += offset[i];
        }
        location
    }

    #[allow(clippy::cast_possible_truncation)]
    fn live_objects(&self) -> impl Iterator<Item = (Handle, &ObjectData)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot.entity.as_ref() {
            Some(Entity::Object(obj)) => Some((Handle::new(HandleKind::Object, i as u32, slot.generation), obj)),
            _ => None,
        })
    }
}

/// Thread-safe in-memory scene.
pub struct InMemoryScene {
    state: RwLock<SceneState>,
    sinks: Mutex<Vec<EventSink>>,
    hook: RwLock<Option<WriteHook>>,
}

impl fmt::Debug for InMemoryScene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryScene").finish_non_exhaustive()
    }
}

impl Default for InMemoryScene {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryScene {
    /// Creates an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SceneState::default()),
            sinks: Mutex::new(Vec::new()),
            hook: RwLock::new(None),
        }
    }

    fn read(&self, context: &'static str) -> HostResult<RwLockReadGuard<'_, SceneState>> {
        self.state.read().map_err(|_| lock_err(context))
    }

    fn write(&self, context: &'static str) -> HostResult<RwLockWriteGuard<'_, SceneState>> {
        self.state.write().map_err(|_| lock_err(context))
    }

    fn fire_hook(&self, op: &'static str) {
        let hook = match self.hook.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        if let Some(hook) = hook {
            hook(op);
        }
    }

    fn notify(&self, event: HostEvent) {
        if let Ok(sinks) = self.sinks.lock() {
            for sink in sinks.iter() {
                sink.notify(event);
            }
        }
    }

    // ---- scene construction -------------------------------------------------

    /// Adds a mesh object.
    pub fn add_mesh(&self, name: &str, location: [f32; 3]) -> HostResult<Handle> {
        let mut state = self.write("add_mesh")?;
        Ok(state.alloc(Entity::Object(ObjectData::new(name, ObjectKind::Mesh, location))))
    }

    /// Adds an instance reference that realizes into `members` meshes.
    pub fn add_instance(&self, name: &str, members: u32) -> HostResult<Handle> {
        let mut state = self.write("add_instance")?;
        let mut obj = ObjectData::new(name, ObjectKind::Instance, [0.0; 3]);
        obj.instance_members = members;
        Ok(state.alloc(Entity::Object(obj)))
    }

    /// Adds a non-mesh object (camera, light, empty).
    pub fn add_other(&self, name: &str) -> HostResult<Handle> {
        let mut state = self.write("add_other")?;
        Ok(state.alloc(Entity::Object(ObjectData::new(name, ObjectKind::Other, [0.0; 3]))))
    }

    // ---- quirk controls -----------------------------------------------------

    /// Makes every call of `op` fail with `HostError::Rejected`.
    pub fn inject_failure(&self, op: &'static str, reason: &str) {
        if let Ok(mut state) = self.state.write() {
            state.failures.insert(op, reason.to_string());
        }
    }

    /// Removes an injected failure.
    pub fn clear_failure(&self, op: &'static str) {
        if let Ok(mut state) = self.state.write() {
            state.failures.remove(op);
        }
    }

    /// Number of `has_animation` queries that answer false after the first keyframe.
    pub fn set_animation_delay(&self, queries: u32) {
        if let Ok(mut state) = self.state.write() {
            state.animation_delay = queries;
        }
    }

    /// Restricts the curve lookup strategies this host understands.
    pub fn set_curve_strategies(&self, strategies: &[CurveStrategy]) {
        if let Ok(mut state) = self.state.write() {
            state.strategies = strategies.to_vec();
        }
    }

    /// Toggles the presence of an active scene.
    pub fn set_scene_available(&self, available: bool) {
        if let Ok(mut state) = self.state.write() {
            state.scene_available = available;
        }
    }

    /// Installs the property-change callback.
    pub fn set_write_hook(&self, hook: Option<WriteHook>) {
        if let Ok(mut guard) = self.hook.write() {
            *guard = hook;
        }
    }

    /// Deletes entities without notifying anyone (manual deletion by the user).
    ///
    /// Returns how many of them were alive.
    pub fn delete_externally(&self, handles: &[Handle]) -> usize {
        let Ok(mut state) = self.state.write() else {
            return 0;
        };
        handles.iter().filter(|h| state.remove(**h).is_ok()).count()
    }

    /// Deletes entities and fires the undo notification.
    pub fn simulate_undo(&self, handles: &[Handle]) -> usize {
        let deleted = self.delete_externally(handles);
        self.notify(HostEvent::UndoOccurred);
        deleted
    }

    /// Moves the timeline.
    pub fn advance_frames(&self, frames: i32) {
        if let Ok(mut state) = self.state.write() {
            state.world.current_frame += frames;
        }
    }

    // ---- inspection ---------------------------------------------------------

    /// Number of live objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.state.read().map_or(0, |s| s.live_objects().count())
    }

    /// Live objects with the given name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Vec<Handle> {
        self.state.read().map_or_else(
            |_| Vec::new(),
            |s| s.live_objects().filter(|(_, o)| o.name == name).map(|(h, _)| h).collect(),
        )
    }

    /// Rigid body attached to an object.
    #[must_use]
    pub fn body(&self, object: Handle) -> Option<(BodyType, RigidBodyProps)> {
        self.state.read().ok()?.object(object).ok()?.body
    }

    /// Modifiers attached to an object.
    #[must_use]
    pub fn modifiers_of(&self, object: Handle) -> Vec<Handle> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.object(object).ok().map(|o| o.modifiers.clone()))
            .unwrap_or_default()
    }

    /// Geometry edits applied to an object.
    #[must_use]
    pub fn mesh_ops(&self, object: Handle) -> Vec<MeshOp> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.object(object).ok().map(|o| o.mesh_ops.clone()))
            .unwrap_or_default()
    }

    /// Location the solver currently shows for the object.
    #[must_use]
    pub fn visual_location(&self, object: Handle) -> Option<[f32; 3]> {
        let state = self.state.read().ok()?;
        let obj = state.object(object).ok()?;
        Some(state.visual_location(obj))
    }

    /// Location curve of one axis, if created.
    #[must_use]
    pub fn curve_of(&self, object: Handle, axis: Axis) -> Option<Handle> {
        self.state.read().ok()?.object(object).ok()?.animation.curves[axis.index()]
    }

    /// Whether the object's simulation was converted to keyframes.
    #[must_use]
    pub fn keyframes_baked(&self, object: Handle) -> bool {
        self.state
            .read()
            .ok()
            .and_then(|s| s.object(object).ok().map(|o| o.keyframes_baked))
            .unwrap_or(false)
    }

    /// Force-field settings of an object.
    #[must_use]
    pub fn force_settings(&self, object: Handle) -> Option<ForceFieldSettings> {
        self.state.read().ok()?.object(object).ok()?.force
    }

    /// Whether the rigid-body cache was baked.
    #[must_use]
    pub fn cache_baked(&self) -> bool {
        self.state.read().is_ok_and(|s| s.world.cache_baked)
    }

    /// Whether the cloth cache of `modifier` was baked.
    #[must_use]
    pub fn cloth_baked(&self, modifier: Handle) -> bool {
        self.state.read().is_ok_and(|s| s.world.cloth_baked.contains(&modifier))
    }

    /// How many times `free_all_caches` ran.
    #[must_use]
    pub fn caches_freed(&self) -> u32 {
        self.state.read().map_or(0, |s| s.world.caches_freed)
    }

    /// Display type of an object.
    #[must_use]
    pub fn display(&self, object: Handle) -> Option<DisplayType> {
        Some(self.state.read().ok()?.object(object).ok()?.display)
    }
}

impl SceneOps for InMemoryScene {
    fn exists(&self, handle: Handle) -> HostResult<bool> {
        let state = self.read("exists")?;
        Ok(state.is_live(handle))
    }

    fn objects(&self) -> HostResult<Vec<Handle>> {
        let state = self.read("objects")?;
        state.require_scene()?;
        Ok(state.live_objects().map(|(h, _)| h).collect())
    }

    fn selected(&self) -> HostResult<Vec<Handle>> {
        let state = self.read("selected")?;
        state.require_scene()?;
        Ok(state.live_objects().filter(|(_, o)| o.selected).map(|(h, _)| h).collect())
    }

    fn object_kind(&self, object: Handle) -> HostResult<ObjectKind> {
        let state = self.read("object_kind")?;
        Ok(state.object(object)?.kind)
    }

    fn name(&self, object: Handle) -> HostResult<String> {
        let state = self.read("name")?;
        Ok(state.object(object)?.name.clone())
    }

    fn set_name(&self, object: Handle, name: &str) -> HostResult<()> {
        let mut state = self.write("set_name")?;
        state.check("set_name")?;
        state.object_mut(object)?.name = name.to_string();
        Ok(())
    }

    fn select(&self, object: Handle, selected: bool) -> HostResult<()> {
        let mut state = self.write("select")?;
        state.object_mut(object)?.selected = selected;
        Ok(())
    }

    fn deselect_all(&self) -> HostResult<()> {
        let mut state = self.write("deselect_all")?;
        state.require_scene()?;
        for slot in &mut state.slots {
            if let Some(Entity::Object(obj)) = slot.entity.as_mut() {
                obj.selected = false;
            }
        }
        Ok(())
    }

    fn set_active(&self, object: Handle) -> HostResult<()> {
        let mut state = self.write("set_active")?;
        state.object(object)?;
        state.active = Some(object);
        Ok(())
    }

    fn active(&self) -> HostResult<Option<Handle>> {
        let state = self.read("active")?;
        Ok(state.active.filter(|h| state.is_live(*h)))
    }

    fn duplicate(&self, object: Handle) -> HostResult<Handle> {
        let mut state = self.write("duplicate")?;
        state.check("duplicate")?;
        let source = state.object(object)?;
        let mut copy = ObjectData::new(&format!("{}.001", source.name), source.kind, source.location);
        copy.instance_members = source.instance_members;
        copy.display = source.display;
        Ok(state.alloc(Entity::Object(copy)))
    }

    fn delete(&self, object: Handle) -> HostResult<()> {
        let mut state = self.write("delete")?;
        state.check("delete")?;
        state.remove(object)
    }

    fn set_hidden(&self, object: Handle, hidden: bool) -> HostResult<()> {
        let mut state = self.write("set_hidden")?;
        state.check("set_hidden")?;
        state.object_mut(object)?.hidden = hidden;
        Ok(())
    }

    fn is_hidden(&self, object: Handle) -> HostResult<bool> {
        let state = self.read("is_hidden")?;
        Ok(state.object(object)?.hidden)
    }

    fn set_parent(&self, child: Handle, parent: Option<Handle>, keep_transform: bool) -> HostResult<()> {
        let mut state = self.write("set_parent")?;
        state.check("set_parent")?;
        let anchor = match parent {
            Some(parent) => {
                if parent == child {
                    return Err(HostError::Rejected {
                        op: "set_parent",
                        reason: "object cannot parent itself".to_string(),
                    });
                }
                state.own_visual(state.object(parent)?)
            }
            None => [0.0; 3],
        };
        let current = state.object(child)?;
        let mut location = current.location;
        if keep_transform {
            let offset = state.parent_offset(current);
            for i in 0..3 {
                location[i] += offset[i];
            }
        }
        let obj = state.object_mut(child)?;
        obj.location = location;
        obj.parent = parent;
        obj.parent_anchor = anchor;
        Ok(())
    }

    fn parent(&self, object: Handle) -> HostResult<Option<Handle>> {
        let state = self.read("parent")?;
        Ok(state.object(object)?.parent.filter(|p| state.is_live(*p)))
    }

    fn set_display(&self, object: Handle, display: DisplayType) -> HostResult<()> {
        let mut state = self.write("set_display")?;
        state.object_mut(object)?.display = display;
        Ok(())
    }

    fn location(&self, object: Handle) -> HostResult<[f32; 3]> {
        let state = self.read("location")?;
        Ok(state.object(object)?.location)
    }

    fn apply_visual_transform(&self, object: Handle) -> HostResult<()> {
        let mut state = self.write("apply_visual_transform")?;
        state.check("apply_visual_transform")?;
        let fall = state.fall();
        let visual = state.own_visual(state.object(object)?);
        let obj = state.object_mut(object)?;
        obj.location = visual;
        if matches!(obj.body, Some((BodyType::Active, _))) {
            obj.fall_applied = fall;
        }
        Ok(())
    }

    fn realize_instances(&self, object: Handle) -> HostResult<Vec<Handle>> {
        let mut state = self.write("realize_instances")?;
        state.check("realize_instances")?;
        let source = state.object(object)?;
        if source.kind != ObjectKind::Instance {
            return Err(HostError::Rejected {
                op: "realize_instances",
                reason: format!("'{}' is not an instance", source.name),
            });
        }
        let name = source.name.clone();
        let members = source.instance_members;
        let location = source.location;
        let realized = (0..members)
            .map(|i| state.alloc(Entity::Object(ObjectData::new(&format!("{name}.{i:03}"), ObjectKind::Mesh, location))))
            .collect();
        state.object_mut(object)?.kind = ObjectKind::Other;
        Ok(realized)
    }

    fn add_force_field(&self, location: [f32; 3], settings: &ForceFieldSettings) -> HostResult<Handle> {
        let mut state = self.write("add_force_field")?;
        state.require_scene()?;
        state.check("add_force_field")?;
        let mut obj = ObjectData::new("Force", ObjectKind::ForceField, location);
        obj.force = Some(*settings);
        Ok(state.alloc(Entity::Object(obj)))
    }

    fn set_force_field(&self, force: Handle, settings: &ForceFieldSettings) -> HostResult<()> {
        let mut state = self.write("set_force_field")?;
        state.check("set_force_field")?;
        let obj = state.object_mut(force)?;
        if obj.kind != ObjectKind::ForceField {
            return Err(HostError::Rejected {
                op: "set_force_field",
                reason: format!("'{}' is not a force field", obj.name),
            });
        }
        obj.force = Some(*settings);
        Ok(())
    }
}

impl MeshOps for InMemoryScene {
    fn join(&self, objects: &[Handle]) -> HostResult<Handle> {
        let mut state = self.write("join")?;
        state.check("join")?;
        let Some(&first) = objects.first() else {
            return Err(HostError::Rejected {
                op: "join",
                reason: "nothing to join".to_string(),
            });
        };
        for object in objects {
            state.object(*object)?;
        }
        let base = state.object(first)?;
        let merged = ObjectData::new(&base.name, ObjectKind::Mesh, base.location);
        for object in objects {
            state.remove(*object)?;
        }
        Ok(state.alloc(Entity::Object(merged)))
    }

    fn apply_transform(&self, object: Handle) -> HostResult<()> {
        let mut state = self.write("apply_transform")?;
        state.check("apply_transform")?;
        state.object_mut(object)?.mesh_ops.push(MeshOp::ApplyTransform);
        Ok(())
    }

    fn remesh(&self, object: Handle, voxel_size: f32) -> HostResult<()> {
        let mut state = self.write("remesh")?;
        state.check("remesh")?;
        state.object_mut(object)?.mesh_ops.push(MeshOp::Remesh(voxel_size));
        Ok(())
    }

    fn decimate(&self, object: Handle, ratio: f32) -> HostResult<()> {
        let mut state = self.write("decimate")?;
        state.check("decimate")?;
        state.object_mut(object)?.mesh_ops.push(MeshOp::Decimate(ratio));
        Ok(())
    }

    fn convert_to_mesh(&self, object: Handle) -> HostResult<()> {
        let mut state = self.write("convert_to_mesh")?;
        state.check("convert_to_mesh")?;
        let obj = state.object_mut(object)?;
        obj.mesh_ops.push(MeshOp::ConvertToMesh);
        obj.kind = ObjectKind::Mesh;
        Ok(())
    }
}

impl RigidBodyOps for InMemoryScene {
    fn has_world(&self) -> HostResult<bool> {
        let state = self.read("has_world")?;
        Ok(state.world.has_world)
    }

    fn ensure_world(&self) -> HostResult<()> {
        let mut state = self.write("ensure_world")?;
        state.require_scene()?;
        state.check("ensure_world")?;
        state.world.has_world = true;
        Ok(())
    }

    fn add_body(&self, object: Handle, body: BodyType, props: &RigidBodyProps) -> HostResult<()> {
        let mut state = self.write("add_body")?;
        state.check("add_body")?;
        let obj = state.object_mut(object)?;
        if obj.kind != ObjectKind::Mesh {
            return Err(HostError::Rejected {
                op: "add_body",
                reason: format!("'{}' is not a mesh", obj.name),
            });
        }
        obj.body = Some((body, *props));
        obj.fall_applied = 0.0;
        state.world.has_world = true;
        Ok(())
    }

    fn remove_body(&self, object: Handle) -> HostResult<()> {
        let mut state = self.write("remove_body")?;
        state.check("remove_body")?;
        let obj = state.object_mut(object)?;
        obj.body = None;
        obj.fall_applied = 0.0;
        Ok(())
    }

    fn bake_to_cache(&self, _frame_start: i32, _frame_end: i32) -> HostResult<()> {
        let mut state = self.write("bake_to_cache")?;
        state.check("bake_to_cache")?;
        if !state.world.has_world {
            return Err(HostError::Rejected {
                op: "bake_to_cache",
                reason: "no rigid body world".to_string(),
            });
        }
        state.world.cache_baked = true;
        Ok(())
    }

    fn bake_to_keyframes(&self, objects: &[Handle], _frame_start: i32, _frame_end: i32) -> HostResult<()> {
        let mut state = self.write("bake_to_keyframes")?;
        state.check("bake_to_keyframes")?;
        for object in objects {
            state.object(*object)?;
        }
        for object in objects {
            let obj = state.object_mut(*object)?;
            if obj.body.take().is_some() {
                obj.keyframes_baked = true;
            }
        }
        Ok(())
    }

    fn free_all_caches(&self) -> HostResult<()> {
        let mut state = self.write("free_all_caches")?;
        state.check("free_all_caches")?;
        state.world.cache_baked = false;
        state.world.cloth_baked.clear();
        state.world.caches_freed += 1;
        Ok(())
    }
}

impl ClothOps for InMemoryScene {
    fn add_cloth(&self, object: Handle, settings: &ClothSettings, _frame_end: i32) -> HostResult<Handle> {
        let mut state = self.write("add_cloth")?;
        state.check("add_cloth")?;
        state.object(object)?;
        let modifier = state.alloc(Entity::Modifier(ModifierData {
            owner: object,
            payload: ModifierPayload::Cloth(*settings),
        }));
        state.object_mut(object)?.modifiers.push(modifier);
        Ok(modifier)
    }

    fn add_collision(&self, object: Handle, settings: &CollisionSettings) -> HostResult<Handle> {
        let mut state = self.write("add_collision")?;
        state.check("add_collision")?;
        state.object(object)?;
        let modifier = state.alloc(Entity::Modifier(ModifierData {
            owner: object,
            payload: ModifierPayload::Collision(*settings),
        }));
        state.object_mut(object)?.modifiers.push(modifier);
        Ok(modifier)
    }

    fn cloth_settings(&self, modifier: Handle) -> HostResult<ClothSettings> {
        let state = self.read("cloth_settings")?;
        match state.entity(modifier)? {
            Entity::Modifier(ModifierData {
                payload: ModifierPayload::Cloth(settings),
                ..
            }) => Ok(*settings),
            _ => Err(HostError::Rejected {
                op: "cloth_settings",
                reason: format!("{modifier} is not a cloth modifier"),
            }),
        }
    }

    fn set_cloth_settings(&self, modifier: Handle, settings: &ClothSettings) -> HostResult<()> {
        {
            let mut state = self.write("set_cloth_settings")?;
            state.check("set_cloth_settings")?;
            match &mut state.modifier_mut(modifier)?.payload {
                ModifierPayload::Cloth(current) => *current = *settings,
                _ => {
                    return Err(HostError::Rejected {
                        op: "set_cloth_settings",
                        reason: format!("{modifier} is not a cloth modifier"),
                    })
                }
            }
        }
        self.fire_hook("set_cloth_settings");
        Ok(())
    }

    fn bake_cloth_cache(&self, modifiers: &[Handle]) -> HostResult<()> {
        let mut state = self.write("bake_cloth_cache")?;
        state.check("bake_cloth_cache")?;
        for modifier in modifiers {
            state.modifier_mut(*modifier)?;
        }
        state.world.cloth_baked.extend(modifiers.iter().copied());
        Ok(())
    }
}

impl AnimationOps for InMemoryScene {
    fn insert_keyframe(&self, object: Handle, axis: Axis, frame: f32) -> HostResult<()> {
        let mut state = self.write("insert_keyframe")?;
        state.check("insert_keyframe")?;
        let delay = state.animation_delay;
        let existing = state.object(object)?.animation.curves[axis.index()];
        let curve = match existing {
            Some(curve) if state.is_live(curve) => curve,
            _ => state.alloc(Entity::Curve(CurveData {
                owner: object,
                axis,
                modifiers: Vec::new(),
            })),
        };
        let animation = &mut state.object_mut(object)?.animation;
        animation.curves[axis.index()] = Some(curve);
        animation.keyframes.push((axis, frame));
        if !animation.materialized && animation.pending.is_none() {
            animation.pending = Some(delay);
        }
        Ok(())
    }

    fn has_animation(&self, object: Handle) -> HostResult<bool> {
        let mut state = self.write("has_animation")?;
        let animation = &mut state.object_mut(object)?.animation;
        if animation.materialized {
            return Ok(true);
        }
        match animation.pending {
            Some(0) => {
                animation.materialized = true;
                animation.pending = None;
                Ok(true)
            }
            Some(n) => {
                animation.pending = Some(n - 1);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn curves(&self, object: Handle, strategy: CurveStrategy) -> HostResult<Option<Vec<CurveRef>>> {
        let state = self.read("curves")?;
        if !state.strategies.contains(&strategy) {
            return Ok(None);
        }
        let animation = &state.object(object)?.animation;
        if !animation.materialized {
            return Err(HostError::NotMaterialized(format!("animation of {object}")));
        }
        let curves = Axis::ALL
            .iter()
            .filter_map(|axis| {
                animation.curves[axis.index()]
                    .filter(|c| state.is_live(*c))
                    .map(|handle| CurveRef {
                        handle,
                        data_path: LOCATION_PATH.to_string(),
                        array_index: axis.index(),
                    })
            })
            .collect();
        Ok(Some(curves))
    }

    fn add_noise(&self, curve: Handle, params: &NoiseParams) -> HostResult<Handle> {
        let mut state = self.write("add_noise")?;
        state.check("add_noise")?;
        match state.entity(curve)? {
            Entity::Curve(_) => {}
            _ => return Err(HostError::Missing(curve)),
        }
        let modifier = state.alloc(Entity::Modifier(ModifierData {
            owner: curve,
            payload: ModifierPayload::Noise(*params),
        }));
        if let Entity::Curve(data) = state.entity_mut(curve)? {
            data.modifiers.push(modifier);
        }
        Ok(modifier)
    }

    fn set_noise(&self, modifier: Handle, strength: f32, phase: f32) -> HostResult<()> {
        {
            let mut state = self.write("set_noise")?;
            state.check("set_noise")?;
            match &mut state.modifier_mut(modifier)?.payload {
                ModifierPayload::Noise(params) => {
                    params.strength = strength;
                    params.phase = phase;
                }
                _ => {
                    return Err(HostError::Rejected {
                        op: "set_noise",
                        reason: format!("{modifier} is not a noise modifier"),
                    })
                }
            }
        }
        self.fire_hook("set_noise");
        Ok(())
    }

    fn noise(&self, modifier: Handle) -> HostResult<NoiseParams> {
        let state = self.read("noise")?;
        match state.entity(modifier)? {
            Entity::Modifier(ModifierData {
                payload: ModifierPayload::Noise(params),
                ..
            }) => Ok(*params),
            _ => Err(HostError::Rejected {
                op: "noise",
                reason: format!("{modifier} is not a noise modifier"),
            }),
        }
    }
}

macro_rules! world_field {
    ($get:ident, $set:ident, $field:ident, $ty:ty) => {
        fn $get(&self) -> HostResult<$ty> {
            let state = self.read(stringify!($get))?;
            state.check(stringify!($get))?;
            Ok(state.world.$field)
        }

        fn $set(&self, value: $ty) -> HostResult<()> {
            {
                let mut state = self.write(stringify!($set))?;
                state.check(stringify!($set))?;
                state.world.$field = value;
            }
            self.fire_hook(stringify!($set));
            Ok(())
        }
    };
}

impl WorldOps for InMemoryScene {
    fn cache_frame_start(&self) -> HostResult<i32> {
        let state = self.read("cache_frame_start")?;
        state.check("cache_frame_start")?;
        Ok(state.world.cache_start)
    }

    fn cache_frame_end(&self) -> HostResult<i32> {
        let state = self.read("cache_frame_end")?;
        state.check("cache_frame_end")?;
        Ok(state.world.cache_end)
    }

    fn set_cache_frame_range(&self, start: i32, end: i32) -> HostResult<()> {
        {
            let mut state = self.write("set_cache_frame_range")?;
            state.check("set_cache_frame_range")?;
            if start >= end {
                return Err(HostError::Rejected {
                    op: "set_cache_frame_range",
                    reason: format!("start {start} must be before end {end}"),
                });
            }
            state.world.cache_start = start;
            state.world.cache_end = end;
        }
        self.fire_hook("set_cache_frame_range");
        Ok(())
    }

    world_field!(substeps, set_substeps, substeps, u32);
    world_field!(solver_iterations, set_solver_iterations, iterations, u32);
    world_field!(world_enabled, set_world_enabled, enabled, bool);
    world_field!(split_impulse, set_split_impulse, split_impulse, bool);
    world_field!(scene_frame_end, set_scene_frame_end, scene_frame_end, i32);
    world_field!(gravity_weight, set_gravity_weight, gravity_weight, f32);
    world_field!(current_frame, set_current_frame, current_frame, i32);
}

impl PlaybackOps for InMemoryScene {
    fn is_playing(&self) -> HostResult<bool> {
        let state = self.read("is_playing")?;
        Ok(state.world.playing)
    }

    fn toggle_playback(&self) -> HostResult<()> {
        let mut state = self.write("toggle_playback")?;
        state.check("toggle_playback")?;
        state.world.playing = !state.world.playing;
        Ok(())
    }
}

impl NotifyOps for InMemoryScene {
    fn subscribe(&self, sink: EventSink) -> HostResult<()> {
        let mut sinks = self.sinks.lock().map_err(|_| lock_err("subscribe"))?;
        sinks.push(sink);
        Ok(())
    }
}
