//! Command-boundary wrapper.
//!
//! Every exposed command goes through [`run`]: it opens a tracing span, prunes
//! dead handles (processing any pending undo notifications first), runs the
//! command body, converts the result into a [`CommandOutcome`] and enforces the
//! failure policy so the phase is never left ambiguous.

use std::time::Instant;

use tracing::{debug, error, info, info_span, warn};

use crate::error::DropResult;
use crate::host::{HostEvent, SceneOps};
use crate::store::SweepReport;
use crate::validator::HostValidator;

use super::{CommandOutcome, SessionContext, SessionPhase};

/// Drains host notifications and sweeps the registry.
///
/// A poisoned registry is wiped.
pub fn process_events<H: SceneOps + ?Sized>(ctx: &mut SessionContext, host: &H) -> SweepReport {
    let pending = ctx.events().drain();
    let undos = pending.iter().filter(|e| **e == HostEvent::UndoOccurred).count();
    if undos > 0 {
        debug!(undos, "processing undo notifications");
    }
    let dropped = ctx.events().dropped();
    if dropped > 0 {
        debug!(dropped, "host notifications were dropped; sweeping anyway");
    }

    let swept = ctx.store().sweep(&HostValidator::new(host));
    match swept {
        Ok(report) => {
            if report.removed > 0 {
                info!(removed = report.removed, inspected = report.inspected, "pruned dead handles");
            }
            report
        }
        Err(err) => {
            error!(%err, "sweep failed; resetting registry");
            ctx.store().reset_all();
            ctx.end();
            SweepReport::default()
        }
    }
}

/// Runs one command body with instrumentation and the failure policy.
pub fn run<H, F>(ctx: &mut SessionContext, host: &H, name: &'static str, body: F) -> CommandOutcome
where
    H: SceneOps + ?Sized,
    F: FnOnce(&mut SessionContext) -> DropResult<String>,
{
    let span = info_span!("command", name);
    let _enter = span.enter();
    let started = Instant::now();

    process_events(ctx, host);

    let outcome = match body(ctx) {
        Ok(message) => CommandOutcome::finished(message),
        Err(err) => {
            if err.requires_reset() {
                error!(%err, "state inconsistency; resetting registry");
                ctx.store().reset_all();
                ctx.end();
            } else if ctx.phase() == SessionPhase::Configuring {
                ctx.end();
            }
            if err.is_precondition() {
                warn!(%err, "command not available");
            } else {
                error!(%err, "command failed");
            }
            let message = err.to_string();
            ctx.record_failure(Some(message.clone()));
            CommandOutcome::cancelled(err.kind(), message)
        }
    };

    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(
        elapsed_ms,
        finished = outcome.is_finished(),
        phase = ?ctx.phase(),
        "command completed"
    );
    outcome
}
