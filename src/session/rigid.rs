//! Rigid-body sub-orchestration.

use tracing::{debug, warn};

use crate::config::SessionSettings;
use crate::error::{DropError, DropResult};
use crate::handle::Handle;
use crate::host::SceneHost;
use crate::physics::BodyType;
use crate::proxy::{ProxyOptimizer, ProxyRestoreReport, Reduction};
use crate::store::{keys, Partition, SessionRecord, StateStore};

/// Configures the collider and the dropped objects.
///
/// With optimization enabled the proxies are built first and take the bodies in
/// place of their originals. Returns a summary line.
pub(super) fn configure<H: SceneHost + ?Sized>(
    host: &H,
    store: &StateStore,
    settings: &SessionSettings,
    actives: &[Handle],
    passive: Handle,
) -> DropResult<String> {
    let mut passive_props = settings.passive.clamped();
    passive_props.kinematic = true;
    host.add_body(passive, BodyType::Passive, &passive_props)
        .map_err(|e| DropError::host("add_body", e))?;

    let mut simulated = actives.to_vec();
    let mut proxied = 0;
    if settings.optimization.enabled {
        let optimizer = ProxyOptimizer::new(
            host,
            &settings.proxy_suffix,
            Reduction::for_proxies(&settings.optimization),
        );
        let pairs = optimizer.create_proxies(actives);
        for (slot, original) in simulated.iter_mut().zip(actives) {
            if let Some(low) = pairs.iter().find(|p| p.high == Some(*original)).and_then(|p| p.low) {
                *slot = low;
            }
        }
        proxied = pairs.len();
        store.set_pairs(Partition::Rigid, keys::PROXY_PAIRS, pairs)?;
    }
    store.set_handles(Partition::Rigid, keys::ACTIVE, &simulated)?;

    let props = settings.active.clamped();
    let mut configured = 0;
    let mut last_error = None;
    for &object in &simulated {
        match host.add_body(object, BodyType::Active, &props) {
            Ok(()) => configured += 1,
            Err(err) => {
                warn!(%object, %err, "could not add rigid body; skipping object");
                last_error = Some(err);
            }
        }
    }
    if configured == 0 {
        return Err(match last_error {
            Some(err) => DropError::host("add_body", err),
            None => DropError::context("no active object to simulate"),
        });
    }

    debug!(configured, proxied, "rigid participants configured");
    let mut summary = format!("dropping {configured} of {} objects", simulated.len());
    if proxied > 0 {
        summary.push_str(&format!(" ({proxied} through proxies)"));
    }
    Ok(summary)
}

/// Removes rigid bodies from the participants and dissolves proxy pairs.
pub(super) fn teardown<H: SceneHost + ?Sized>(
    host: &H,
    settings: &SessionSettings,
    record: &SessionRecord,
) -> ProxyRestoreReport {
    let proxies: Vec<Handle> = record.proxy_pairs.iter().filter_map(|p| p.low).collect();
    for &object in record.active.iter().filter(|h| !proxies.contains(h)) {
        if let Err(err) = host.remove_body(object) {
            warn!(%object, %err, "could not remove rigid body");
        }
    }

    if record.proxy_pairs.is_empty() {
        return ProxyRestoreReport::default();
    }
    ProxyOptimizer::new(
        host,
        &settings.proxy_suffix,
        Reduction::for_proxies(&settings.optimization),
    )
    .restore(&record.proxy_pairs)
}
