//! Session registry.
//!
//! The `StateStore` is the single source of truth for which scene entities
//! currently take part in a session. It is split into four partitions (general,
//! rigid, cloth, shake), each a flat string-keyed map of typed [`Slot`]s.
//!
//! All access goes through one mutex. The lock is only ever held for the
//! duration of a map operation and never across a host call, so a host callback
//! that fires in the middle of a command can read the store safely.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::debug;

use crate::error::{DropError, DropResult};
use crate::handle::Handle;
use crate::host::Axis;
use crate::session::Mode;
use crate::validator::ReferenceValidator;
use crate::world::WorldSnapshot;

/// Well-known registry keys.
pub mod keys {
    /// Ordered, deduplicated active participants.
    pub const ACTIVE: &str = "active_objects";
    /// Generated collision stand-in.
    pub const PASSIVE: &str = "passive_object";
    /// High/low-detail proxy pairs.
    pub const PROXY_PAIRS: &str = "proxy_pairs";
    /// Cloth modifiers of the active participants.
    pub const CLOTH_MODIFIERS: &str = "cloth_modifiers";
    /// Collision modifier of the passive entity.
    pub const COLLISION_MODIFIER: &str = "collision_modifier";
    /// Force-field effector.
    pub const FORCE_FIELD: &str = "force_field";
    /// Captured world parameters.
    pub const WORLD_SNAPSHOT: &str = "world_snapshot";
    /// Per-axis noise modifiers.
    pub const SHAKE_MODIFIERS: &str = "modifiers";
    /// Entity carrying the noise modifiers.
    pub const SHAKE_TARGET: &str = "target";
}

/// Registry partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Partition {
    /// Mode-independent entries such as the force field.
    General,
    /// Rigid-body participants, collider, proxies and world snapshot.
    Rigid,
    /// Cloth participants, colliders and their modifiers.
    Cloth,
    /// Per-axis noise modifiers.
    Shake,
}

impl Partition {
    /// All partitions.
    pub const ALL: [Self; 4] = [Self::General, Self::Rigid, Self::Cloth, Self::Shake];

    const fn index(self) -> usize {
        match self {
            Self::General => 0,
            Self::Rigid => 1,
            Self::Cloth => 2,
            Self::Shake => 3,
        }
    }

    /// Partition holding the participants of a mode.
    #[must_use]
    pub const fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Rigid => Self::Rigid,
            Mode::Cloth => Self::Cloth,
        }
    }
}

/// A high-detail original and its low-detail stand-in.
///
/// Either side becomes `None` once the sweep finds it dead; a pair with both
/// sides gone is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProxyPair {
    /// The original, hidden while its proxy simulates.
    pub high: Option<Handle>,
    /// The reduced stand-in the original is parented to.
    pub low: Option<Handle>,
}

impl ProxyPair {
    /// Creates a pair with both sides alive.
    #[must_use]
    pub const fn new(high: Handle, low: Handle) -> Self {
        Self {
            high: Some(high),
            low: Some(low),
        }
    }

    const fn is_empty(&self) -> bool {
        self.high.is_none() && self.low.is_none()
    }
}

/// A typed registry value.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Handle(Option<Handle>),
    Handles(Vec<Handle>),
    AxisHandles([Option<Handle>; 3]),
    Pairs(Vec<ProxyPair>),
    Snapshot(Option<WorldSnapshot>),
    Flag(bool),
}

impl Slot {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Handle(_) => "handle",
            Self::Handles(_) => "handles",
            Self::AxisHandles(_) => "axis handles",
            Self::Pairs(_) => "pairs",
            Self::Snapshot(_) => "snapshot",
            Self::Flag(_) => "flag",
        }
    }

    fn handle_count(&self) -> usize {
        match self {
            Self::Handle(h) => usize::from(h.is_some()),
            Self::Handles(v) => v.len(),
            Self::AxisHandles(a) => a.iter().flatten().count(),
            Self::Pairs(p) => p
                .iter()
                .map(|pair| usize::from(pair.high.is_some()) + usize::from(pair.low.is_some()))
                .sum(),
            Self::Snapshot(_) | Self::Flag(_) => 0,
        }
    }

    fn collect_handles(&self, out: &mut Vec<Handle>) {
        match self {
            Self::Handle(h) => out.extend(h.iter().copied()),
            Self::Handles(v) => out.extend(v.iter().copied()),
            Self::AxisHandles(a) => out.extend(a.iter().flatten().copied()),
            Self::Pairs(p) => {
                for pair in p {
                    out.extend(pair.high.iter().chain(pair.low.iter()).copied());
                }
            }
            Self::Snapshot(_) | Self::Flag(_) => {}
        }
    }

    /// Drops every handle in `dead`; returns how many were dropped.
    fn prune(&mut self, dead: &[Handle]) -> usize {
        let is_dead = |h: &Handle| dead.contains(h);
        match self {
            Self::Handle(slot) => {
                if slot.as_ref().is_some_and(is_dead) {
                    *slot = None;
                    1
                } else {
                    0
                }
            }
            Self::Handles(v) => {
                let before = v.len();
                v.retain(|h| !is_dead(h));
                before - v.len()
            }
            Self::AxisHandles(a) => {
                let mut removed = 0;
                for entry in a.iter_mut() {
                    if entry.as_ref().is_some_and(is_dead) {
                        *entry = None;
                        removed += 1;
                    }
                }
                removed
            }
            Self::Pairs(pairs) => {
                let mut removed = 0;
                for pair in pairs.iter_mut() {
                    for side in [&mut pair.high, &mut pair.low] {
                        if side.as_ref().is_some_and(is_dead) {
                            *side = None;
                            removed += 1;
                        }
                    }
                }
                pairs.retain(|p| !p.is_empty());
                removed
            }
            Self::Snapshot(_) | Self::Flag(_) => 0,
        }
    }
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Slot entries checked.
    pub inspected: usize,
    /// Slot entries found dead and dropped.
    ///
    /// A handle stored under two keys counts twice.
    pub removed: usize,
}

/// Read-only view of one mode's participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    /// Mode the record was read for.
    pub mode: Mode,
    /// Simulated objects, proxies in place of their originals.
    pub active: Vec<Handle>,
    /// The merged collider, if one was built.
    pub passive: Option<Handle>,
    /// High/low pairs when optimization is on.
    pub proxy_pairs: Vec<ProxyPair>,
    /// The tracked force-field effector, shared by both modes.
    pub force_field: Option<Handle>,
}

type Partitions = [HashMap<String, Slot>; 4];

/// The session registry.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<Partitions>,
}

fn mismatch(partition: Partition, key: &str, expected: &'static str, found: &Slot) -> DropError {
    DropError::inconsistent(format!(
        "{partition:?}/{key} holds {} but {expected} was expected",
        found.type_name()
    ))
}

impl StateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> DropResult<MutexGuard<'_, Partitions>> {
        self.inner
            .lock()
            .map_err(|_| DropError::inconsistent("state store lock poisoned"))
    }

    /// Returns a copy of a slot.
    pub fn get(&self, partition: Partition, key: &str) -> DropResult<Option<Slot>> {
        let guard = self.lock()?;
        Ok(guard[partition.index()].get(key).cloned())
    }

    /// Stores a slot, replacing any previous value.
    pub fn set(&self, partition: Partition, key: &str, slot: Slot) -> DropResult<()> {
        let mut guard = self.lock()?;
        guard[partition.index()].insert(key.to_string(), slot);
        Ok(())
    }

    /// Removes a key.
    pub fn remove(&self, partition: Partition, key: &str) -> DropResult<Option<Slot>> {
        let mut guard = self.lock()?;
        Ok(guard[partition.index()].remove(key))
    }

    /// Reads a single-handle slot.
    pub fn handle(&self, partition: Partition, key: &str) -> DropResult<Option<Handle>> {
        match self.get(partition, key)? {
            None => Ok(None),
            Some(Slot::Handle(h)) => Ok(h),
            Some(other) => Err(mismatch(partition, key, "handle", &other)),
        }
    }

    /// Writes a single-handle slot.
    pub fn set_handle(&self, partition: Partition, key: &str, handle: Option<Handle>) -> DropResult<()> {
        self.set(partition, key, Slot::Handle(handle))
    }

    /// Reads an ordered handle list.
    pub fn handles(&self, partition: Partition, key: &str) -> DropResult<Vec<Handle>> {
        match self.get(partition, key)? {
            None => Ok(Vec::new()),
            Some(Slot::Handles(v)) => Ok(v),
            Some(other) => Err(mismatch(partition, key, "handles", &other)),
        }
    }

    /// Writes an ordered handle list, dropping repeated handles.
    pub fn set_handles(&self, partition: Partition, key: &str, handles: &[Handle]) -> DropResult<()> {
        let mut unique: Vec<Handle> = Vec::with_capacity(handles.len());
        for handle in handles {
            if !unique.contains(handle) {
                unique.push(*handle);
            }
        }
        self.set(partition, key, Slot::Handles(unique))
    }

    /// Reads a per-axis handle array.
    pub fn axis_handles(&self, partition: Partition, key: &str) -> DropResult<[Option<Handle>; 3]> {
        match self.get(partition, key)? {
            None => Ok([None; 3]),
            Some(Slot::AxisHandles(a)) => Ok(a),
            Some(other) => Err(mismatch(partition, key, "axis handles", &other)),
        }
    }

    /// Writes one entry of a per-axis handle array.
    pub fn set_axis_handle(&self, partition: Partition, key: &str, axis: Axis, handle: Option<Handle>) -> DropResult<()> {
        let mut guard = self.lock()?;
        let map = &mut guard[partition.index()];
        match map.entry(key.to_string()).or_insert(Slot::AxisHandles([None; 3])) {
            Slot::AxisHandles(a) => {
                a[axis.index()] = handle;
                Ok(())
            }
            other => Err(mismatch(partition, key, "axis handles", other)),
        }
    }

    /// Reads proxy pairs.
    pub fn pairs(&self, partition: Partition, key: &str) -> DropResult<Vec<ProxyPair>> {
        match self.get(partition, key)? {
            None => Ok(Vec::new()),
            Some(Slot::Pairs(p)) => Ok(p),
            Some(other) => Err(mismatch(partition, key, "pairs", &other)),
        }
    }

    /// Writes proxy pairs.
    pub fn set_pairs(&self, partition: Partition, key: &str, pairs: Vec<ProxyPair>) -> DropResult<()> {
        self.set(partition, key, Slot::Pairs(pairs))
    }

    /// Reads a flag; absent flags are false.
    pub fn flag(&self, partition: Partition, key: &str) -> DropResult<bool> {
        match self.get(partition, key)? {
            None => Ok(false),
            Some(Slot::Flag(f)) => Ok(f),
            Some(other) => Err(mismatch(partition, key, "flag", &other)),
        }
    }

    /// Writes a flag.
    pub fn set_flag(&self, partition: Partition, key: &str, value: bool) -> DropResult<()> {
        self.set(partition, key, Slot::Flag(value))
    }

    /// Stores a world snapshot.
    pub fn put_snapshot(&self, partition: Partition, key: &str, snapshot: WorldSnapshot) -> DropResult<()> {
        self.set(partition, key, Slot::Snapshot(Some(snapshot)))
    }

    /// Removes and returns a world snapshot; a second call returns `None`.
    pub fn take_snapshot(&self, partition: Partition, key: &str) -> DropResult<Option<WorldSnapshot>> {
        let mut guard = self.lock()?;
        match guard[partition.index()].get_mut(key) {
            None => Ok(None),
            Some(Slot::Snapshot(s)) => Ok(s.take()),
            Some(other) => Err(mismatch(partition, key, "snapshot", other)),
        }
    }

    /// Returns whether a snapshot is waiting to be restored.
    pub fn has_snapshot(&self, partition: Partition, key: &str) -> DropResult<bool> {
        Ok(matches!(self.get(partition, key)?, Some(Slot::Snapshot(Some(_)))))
    }

    /// Empties one partition.
    pub fn reset(&self, partition: Partition) -> DropResult<()> {
        let mut guard = self.lock()?;
        guard[partition.index()].clear();
        Ok(())
    }

    /// Replaces all four partitions with empty defaults in one step.
    ///
    /// This works even if the lock was poisoned by a panicking writer.
    pub fn reset_all(&self) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Partitions::default();
        debug!("state store reset");
    }

    /// Returns true when every partition is empty.
    pub fn is_empty(&self) -> DropResult<bool> {
        let guard = self.lock()?;
        Ok(guard.iter().all(HashMap::is_empty))
    }

    /// Number of handle entries across all partitions.
    ///
    /// Counts entries, not entities: a handle stored under two keys counts twice.
    pub fn handle_count(&self) -> DropResult<usize> {
        let guard = self.lock()?;
        Ok(guard.iter().flat_map(HashMap::values).map(Slot::handle_count).sum())
    }

    /// Every tracked handle, in no particular order.
    pub fn tracked_handles(&self) -> DropResult<Vec<Handle>> {
        let guard = self.lock()?;
        let mut out = Vec::new();
        for slot in guard.iter().flat_map(HashMap::values) {
            slot.collect_handles(&mut out);
        }
        Ok(out)
    }

    /// Drops every tracked handle that fails validation.
    ///
    /// Validation runs without the lock held, so the validator may call into the
    /// host (and the host into the store).
    pub fn sweep(&self, validator: &dyn ReferenceValidator) -> DropResult<SweepReport> {
        let tracked = self.tracked_handles()?;
        let dead: Vec<Handle> = tracked.iter().copied().filter(|h| !validator.is_valid(*h)).collect();

        let removed = if dead.is_empty() {
            0
        } else {
            let mut guard = self.lock()?;
            guard
                .iter_mut()
                .flat_map(HashMap::values_mut)
                .map(|slot| slot.prune(&dead))
                .sum::<usize>()
        };

        let report = SweepReport {
            inspected: tracked.len(),
            removed,
        };
        if removed > 0 {
            debug!(inspected = report.inspected, removed, "swept dead handles");
        }
        Ok(report)
    }

    /// Read-only view of a mode's participants.
    pub fn record(&self, mode: Mode) -> DropResult<SessionRecord> {
        let partition = Partition::for_mode(mode);
        Ok(SessionRecord {
            mode,
            active: self.handles(partition, keys::ACTIVE)?,
            passive: self.handle(partition, keys::PASSIVE)?,
            proxy_pairs: self.pairs(partition, keys::PROXY_PAIRS)?,
            force_field: self.handle(Partition::General, keys::FORCE_FIELD)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::handle::HandleKind;
    use std::collections::HashSet;

    struct DeadSet(HashSet<Handle>);

    impl ReferenceValidator for DeadSet {
        fn is_valid(&self, handle: Handle) -> bool {
            !self.0.contains(&handle)
        }
    }

    fn obj(i: u32) -> Handle {
        Handle::new(HandleKind::Object, i, 0)
    }

    #[test]
    fn handle_lists_are_deduplicated() {
        let store = StateStore::new();
        store.set_handles(Partition::Rigid, keys::ACTIVE, &[obj(1), obj(2), obj(1)]).unwrap();
        assert_eq!(store.handles(Partition::Rigid, keys::ACTIVE).unwrap(), vec![obj(1), obj(2)]);
        store.set_handle(Partition::Rigid, keys::PASSIVE, Some(obj(2))).unwrap();
        // Entries, not entities.
        assert_eq!(store.handle_count().unwrap(), 3);
    }

    #[test]
    fn type_mismatch_is_state_inconsistency() {
        let store = StateStore::new();
        store.set_flag(Partition::General, keys::ACTIVE, true).unwrap();
        let err = store.handles(Partition::General, keys::ACTIVE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateInconsistency);
    }

    #[test]
    fn sweep_removes_exactly_the_dead() {
        let store = StateStore::new();
        store.set_handles(Partition::Rigid, keys::ACTIVE, &[obj(1), obj(2), obj(3)]).unwrap();
        store.set_handle(Partition::Rigid, keys::PASSIVE, Some(obj(4))).unwrap();
        store
            .set_pairs(
                Partition::Rigid,
                keys::PROXY_PAIRS,
                vec![ProxyPair::new(obj(5), obj(6)), ProxyPair::new(obj(7), obj(8))],
            )
            .unwrap();
        store.set_axis_handle(Partition::Shake, keys::SHAKE_MODIFIERS, Axis::Y, Some(obj(9))).unwrap();

        let dead: HashSet<Handle> = [obj(2), obj(4), obj(5), obj(7), obj(8), obj(9)].into_iter().collect();
        let before = store.handle_count().unwrap();
        let report = store.sweep(&DeadSet(dead.clone())).unwrap();
        let after = store.handle_count().unwrap();

        assert_eq!(report.inspected, before);
        assert_eq!(report.removed, dead.len());
        assert_eq!(before - after, dead.len());
        assert_eq!(store.handles(Partition::Rigid, keys::ACTIVE).unwrap(), vec![obj(1), obj(3)]);
        assert_eq!(store.handle(Partition::Rigid, keys::PASSIVE).unwrap(), None);
        assert_eq!(
            store.pairs(Partition::Rigid, keys::PROXY_PAIRS).unwrap(),
            vec![ProxyPair {
                high: None,
                low: Some(obj(6)),
            }]
        );
        assert_eq!(store.axis_handles(Partition::Shake, keys::SHAKE_MODIFIERS).unwrap(), [None; 3]);
    }

    #[test]
    fn snapshot_is_taken_once() {
        let store = StateStore::new();
        store
            .put_snapshot(Partition::General, keys::WORLD_SNAPSHOT, WorldSnapshot::default())
            .unwrap();
        assert!(store.has_snapshot(Partition::General, keys::WORLD_SNAPSHOT).unwrap());
        assert!(store.take_snapshot(Partition::General, keys::WORLD_SNAPSHOT).unwrap().is_some());
        assert!(store.take_snapshot(Partition::General, keys::WORLD_SNAPSHOT).unwrap().is_none());
        assert!(!store.has_snapshot(Partition::General, keys::WORLD_SNAPSHOT).unwrap());
    }

    #[test]
    fn reset_all_empties_every_partition() {
        let store = StateStore::new();
        for partition in Partition::ALL {
            store.set_flag(partition, "touched", true).unwrap();
        }
        assert!(!store.is_empty().unwrap());
        store.reset_all();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn record_reads_mode_partition() {
        let store = StateStore::new();
        store.set_handles(Partition::Cloth, keys::ACTIVE, &[obj(1)]).unwrap();
        store.set_handle(Partition::Cloth, keys::PASSIVE, Some(obj(2))).unwrap();
        store.set_handle(Partition::General, keys::FORCE_FIELD, Some(obj(3))).unwrap();

        let record = store.record(Mode::Cloth).unwrap();
        assert_eq!(record.active, vec![obj(1)]);
        assert_eq!(record.passive, Some(obj(2)));
        assert_eq!(record.force_field, Some(obj(3)));
        assert!(store.record(Mode::Rigid).unwrap().active.is_empty());
    }
}
