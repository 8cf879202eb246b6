//! Cloth sub-orchestration.

use tracing::{debug, warn};

use crate::config::SessionSettings;
use crate::error::{DropError, DropResult};
use crate::handle::Handle;
use crate::host::SceneHost;
use crate::store::{keys, Partition, StateStore};
use crate::validator::{HostValidator, ReferenceValidator};

/// Adds the collision modifier to the collider and a cloth modifier to every
/// participant.
pub(super) fn configure<H: SceneHost + ?Sized>(
    host: &H,
    store: &StateStore,
    settings: &SessionSettings,
    actives: &[Handle],
    passive: Handle,
    frame_end: i32,
) -> DropResult<String> {
    let collision = host
        .add_collision(passive, &settings.collision.clamped())
        .map_err(|e| DropError::host("add_collision", e))?;
    store.set_handle(Partition::Cloth, keys::COLLISION_MODIFIER, Some(collision))?;

    let cloth = settings.cloth.clamped();
    let mut modifiers = Vec::with_capacity(actives.len());
    let mut last_error = None;
    for &object in actives {
        match host.add_cloth(object, &cloth, frame_end) {
            Ok(modifier) => modifiers.push(modifier),
            Err(err) => {
                warn!(%object, %err, "could not add cloth; skipping object");
                last_error = Some(err);
            }
        }
    }
    store.set_handles(Partition::Cloth, keys::CLOTH_MODIFIERS, &modifiers)?;
    if modifiers.is_empty() {
        return Err(match last_error {
            Some(err) => DropError::host("add_cloth", err),
            None => DropError::context("no active object to simulate"),
        });
    }

    debug!(configured = modifiers.len(), "cloth participants configured");
    Ok(format!("draping {} of {} objects", modifiers.len(), actives.len()))
}

/// Commits the cloth shape (when `commit`) and removes the cloth modifiers.
///
/// Returns the number of participants committed.
pub(super) fn teardown<H: SceneHost + ?Sized>(host: &H, store: &StateStore, actives: &[Handle], commit: bool) -> usize {
    let validator = HostValidator::new(host);
    let mut committed = 0;
    if commit {
        for &object in actives {
            match host.convert_to_mesh(object) {
                Ok(()) => committed += 1,
                Err(err) => warn!(%object, %err, "could not commit cloth shape"),
            }
        }
    }

    let modifiers = match store.handles(Partition::Cloth, keys::CLOTH_MODIFIERS) {
        Ok(modifiers) => modifiers,
        Err(err) => {
            warn!(%err, "cloth modifiers unreadable");
            Vec::new()
        }
    };
    for modifier in modifiers.into_iter().filter(|m| validator.is_valid(*m)) {
        if let Err(err) = host.delete(modifier) {
            warn!(%modifier, %err, "could not remove cloth modifier");
        }
    }
    committed
}

/// Rewrites the parameters of every live cloth modifier.
pub(super) fn rewrite_settings<H: SceneHost + ?Sized>(host: &H, store: &StateStore, settings: &SessionSettings) -> DropResult<usize> {
    let validator = HostValidator::new(host);
    let cloth = settings.cloth.clamped();
    let mut updated = 0;
    for modifier in store.handles(Partition::Cloth, keys::CLOTH_MODIFIERS)? {
        if !validator.is_valid(modifier) {
            continue;
        }
        match host.set_cloth_settings(modifier, &cloth) {
            Ok(()) => updated += 1,
            Err(err) => warn!(%modifier, %err, "could not update cloth modifier"),
        }
    }
    Ok(updated)
}
