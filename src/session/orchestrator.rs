//! Session commands.
//!
//! [`SessionOrchestrator`] is the only component that drives the host's solvers.
//! Each public command runs through [`dispatch::run`]; the private `*_session`
//! bodies hold the step sequences.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{DropError, DropResult};
use crate::handle::Handle;
use crate::host::{DisplayType, ObjectKind, SceneHost};
use crate::physics::ForceFieldSettings;
use crate::proxy::Reduction;
use crate::shake::SecondaryEffectController;
use crate::store::{keys, Partition, SweepReport};
use crate::validator::{HostValidator, ReferenceValidator};
use crate::world::{RestoreOutcome, WorldSettingsManager};

use super::{cloth, dispatch, rigid, CommandOutcome, Mode, SessionContext, SessionPhase};

/// How a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Keep the simulated result.
    Apply,
    /// Rewind to the start frame, then tear down.
    Reset,
    /// Undo a Start that failed half-way.
    Abort,
}

/// Drives physics sessions on a host.
pub struct SessionOrchestrator<'a, H: ?Sized> {
    host: &'a H,
}

impl<'a, H: SceneHost + ?Sized> SessionOrchestrator<'a, H> {
    /// Creates an orchestrator for `host`.
    #[must_use]
    pub const fn new(host: &'a H) -> Self {
        Self { host }
    }

    /// Subscribes the context's notification queue to the host's undo hook.
    pub fn connect(&self, ctx: &SessionContext) -> DropResult<()> {
        self.host
            .subscribe(ctx.events().sink())
            .map_err(|e| DropError::host("subscribe", e))
    }

    // ---- commands -----------------------------------------------------------

    /// Starts a session in `mode` on the current selection.
    pub fn start(&self, ctx: &mut SessionContext, mode: Mode) -> CommandOutcome {
        dispatch::run(ctx, self.host, "start", |ctx| self.start_session(ctx, mode))
    }

    /// Keeps the simulated result and ends the session.
    pub fn apply(&self, ctx: &mut SessionContext) -> CommandOutcome {
        dispatch::run(ctx, self.host, "apply", |ctx| {
            require_active(ctx, "apply")?;
            self.teardown(ctx, Teardown::Apply)
        })
    }

    /// Abandons the session, putting participants back where they started.
    pub fn reset(&self, ctx: &mut SessionContext) -> CommandOutcome {
        dispatch::run(ctx, self.host, "reset", |ctx| {
            require_active(ctx, "reset")?;
            self.teardown(ctx, Teardown::Reset)
        })
    }

    /// Commits the transient simulation into a persistent cache.
    pub fn bake_to_cache(&self, ctx: &mut SessionContext) -> CommandOutcome {
        dispatch::run(ctx, self.host, "bake_to_cache", |ctx| self.bake_cache_session(ctx))
    }

    /// Converts the simulation of the dropped objects into keyframes.
    pub fn bake_to_keyframes(&self, ctx: &mut SessionContext) -> CommandOutcome {
        dispatch::run(ctx, self.host, "bake_to_keyframes", |ctx| self.bake_keyframes_session(ctx))
    }

    /// Switches between rigid and cloth mode.
    pub fn toggle_mode(&self, ctx: &mut SessionContext) -> CommandOutcome {
        dispatch::run(ctx, self.host, "toggle_mode", |ctx| {
            let mode = ctx.mode().toggled();
            switch_mode(ctx, mode)
        })
    }

    /// Selects a mode explicitly.
    pub fn set_mode(&self, ctx: &mut SessionContext, mode: Mode) -> CommandOutcome {
        dispatch::run(ctx, self.host, "set_mode", |ctx| switch_mode(ctx, mode))
    }

    /// Adds a force-field effector, replacing any previous one.
    pub fn add_force(&self, ctx: &mut SessionContext) -> CommandOutcome {
        dispatch::run(ctx, self.host, "add_force", |ctx| self.add_force_session(ctx))
    }

    /// Removes the tracked force-field effector.
    pub fn remove_force(&self, ctx: &mut SessionContext) -> CommandOutcome {
        dispatch::run(ctx, self.host, "remove_force", |ctx| self.remove_force_session(ctx))
    }

    /// Stores new force-field settings and pushes them to the live effector.
    pub fn update_force(&self, ctx: &mut SessionContext, settings: ForceFieldSettings) -> CommandOutcome {
        dispatch::run(ctx, self.host, "update_force", |ctx| self.update_force_session(ctx, settings))
    }

    /// Sets the shake strength and per-axis enable flags.
    pub fn update_secondary_effect(&self, ctx: &mut SessionContext, strength: f32, axes: [bool; 3]) -> CommandOutcome {
        dispatch::run(ctx, self.host, "update_secondary_effect", |ctx| {
            ctx.settings.shake.strength = strength;
            ctx.settings.shake.axes = axes;
            let store = Arc::clone(ctx.store());
            let updated = SecondaryEffectController::new(self.host, &store, ctx.settings.retry).update(strength, axes)?;
            Ok(format!("shake strength {strength} applied on {updated} axes"))
        })
    }

    /// Plays or pauses the timeline.
    pub fn toggle_playback(&self, ctx: &mut SessionContext) -> CommandOutcome {
        dispatch::run(ctx, self.host, "toggle_playback", |ctx| {
            require_active(ctx, "toggle_playback")?;
            self.host
                .toggle_playback()
                .map_err(|e| DropError::host("toggle_playback", e))?;
            let playing = self.host.is_playing().unwrap_or(false);
            Ok(if playing { "playing" } else { "paused" }.to_string())
        })
    }

    /// Loads a named cloth preset; a running cloth session picks it up at once.
    pub fn apply_cloth_preset(&self, ctx: &mut SessionContext, name: &str) -> CommandOutcome {
        dispatch::run(ctx, self.host, "apply_cloth_preset", |ctx| {
            let preset = ctx.settings.apply_preset(name)?;
            if ctx.phase().is_active() && ctx.mode() == Mode::Cloth {
                let updated = cloth::rewrite_settings(self.host, ctx.store(), &ctx.settings)?;
                return Ok(format!("preset {} applied to {updated} cloth objects", preset.name()));
            }
            Ok(format!("preset {} selected", preset.name()))
        })
    }

    /// Clears the registry for a controlled shutdown.
    pub fn shutdown(&self, ctx: &mut SessionContext) -> CommandOutcome {
        dispatch::run(ctx, self.host, "shutdown", |ctx| {
            ctx.store().reset_all();
            ctx.end();
            Ok("session registry cleared".to_string())
        })
    }

    /// Processes pending undo notifications out of band.
    pub fn on_undo(&self, ctx: &mut SessionContext) -> SweepReport {
        dispatch::process_events(ctx, self.host)
    }

    // ---- availability -------------------------------------------------------

    /// Whether `start` would do something.
    pub fn can_start(&self, ctx: &SessionContext) -> bool {
        ctx.phase() == SessionPhase::Idle && self.selectable().is_ok_and(|s| !s.is_empty())
    }

    /// Whether `apply`/`reset` are available.
    #[must_use]
    pub fn can_apply(&self, ctx: &SessionContext) -> bool {
        ctx.phase().is_active()
    }

    /// Whether `bake_to_cache` is available.
    pub fn can_bake(&self, ctx: &SessionContext) -> bool {
        ctx.phase() == SessionPhase::Running && matches!(self.host.is_playing(), Ok(false))
    }

    /// Whether `bake_to_keyframes` is available.
    pub fn can_bake_keyframes(&self, ctx: &SessionContext) -> bool {
        ctx.mode() == Mode::Rigid && self.can_bake(ctx)
    }

    /// Whether `add_force` is available.
    #[must_use]
    pub fn can_add_force(&self, ctx: &SessionContext) -> bool {
        ctx.phase().is_active()
    }

    /// Whether a live force field is tracked.
    pub fn can_remove_force(&self, ctx: &SessionContext) -> bool {
        let validator = HostValidator::new(self.host);
        ctx.phase().is_active()
            && ctx
                .store()
                .handle(Partition::General, keys::FORCE_FIELD)
                .is_ok_and(|h| validator.live(h).is_some())
    }

    // ---- start --------------------------------------------------------------

    /// Live, selected objects a session can start from.
    fn selectable(&self) -> DropResult<Vec<Handle>> {
        let selected = self.host.selected().map_err(|e| DropError::host("selected", e))?;
        Ok(selected
            .into_iter()
            .filter(|h| {
                matches!(
                    self.host.object_kind(*h),
                    Ok(ObjectKind::Mesh | ObjectKind::Instance)
                )
            })
            .collect())
    }

    fn start_session(&self, ctx: &mut SessionContext, mode: Mode) -> DropResult<String> {
        match ctx.phase() {
            SessionPhase::Idle => {}
            SessionPhase::Running if ctx.mode() == mode => {
                info!(%mode, "session already running");
                return Ok(format!("{mode} session already running"));
            }
            phase => {
                return Err(DropError::rejected(
                    "start",
                    format!("a {} session is {phase:?}", ctx.mode()),
                ))
            }
        }

        let selection = self.selectable()?;
        if selection.is_empty() {
            return Err(DropError::context("select at least one mesh object"));
        }

        ctx.begin(mode);
        ctx.store().reset_all();
        match self.configure(ctx, mode, &selection) {
            Ok((summary, start_frame)) => {
                ctx.mark_running(start_frame);
                info!(%mode, session = ?ctx.session_id(), "session running");
                Ok(summary)
            }
            Err(err) => {
                warn!(%err, "start failed; rolling back");
                if let Err(cleanup) = self.teardown(ctx, Teardown::Abort) {
                    warn!(%cleanup, "rollback incomplete");
                    ctx.store().reset_all();
                }
                ctx.end();
                Err(err)
            }
        }
    }

    fn configure(&self, ctx: &SessionContext, mode: Mode, selection: &[Handle]) -> DropResult<(String, i32)> {
        let store = Arc::clone(ctx.store());
        let settings = ctx.settings.clone();
        let partition = Partition::for_mode(mode);

        if let Err(err) = self.host.free_all_caches() {
            warn!(%err, "could not free solver caches");
        }
        if mode == Mode::Rigid {
            self.host
                .ensure_world()
                .map_err(|e| DropError::host("ensure_world", e))?;
        }
        let world = WorldSettingsManager::new(self.host);
        world.checkpoint(&store)?;
        let effective = world.apply(&settings.world)?;

        let actives = self.expand_participants(selection);
        if actives.is_empty() {
            return Err(DropError::context("no usable mesh among the selected objects"));
        }
        store.set_handles(partition, keys::ACTIVE, &actives)?;

        let passive = self.build_collider(selection, &actives, &settings.collider_name)?;
        store.set_handle(partition, keys::PASSIVE, Some(passive))?;
        if actives.contains(&passive) {
            return Err(DropError::inconsistent(format!("collider {passive} is also a dropped object")));
        }
        if settings.optimization.passive_enabled {
            if let Err(err) = Reduction::for_collider(&settings.optimization).apply(self.host, passive) {
                warn!(%passive, %err, "collider reduction failed; using full collider");
            }
        }

        let summary = match mode {
            Mode::Rigid => rigid::configure(self.host, &store, &settings, &actives, passive)?,
            Mode::Cloth => cloth::configure(self.host, &store, &settings, &actives, passive, effective.frame_end)?,
        };

        let shake = SecondaryEffectController::new(self.host, &store, settings.retry);
        shake.reset()?;
        let axes = shake.attach_all(passive);
        if axes > 0 && settings.shake.strength > 0.0 {
            if let Err(err) = shake.update(settings.shake.strength, settings.shake.axes) {
                warn!(%err, "initial shake update failed");
            }
        }

        self.host
            .set_current_frame(effective.frame_start)
            .map_err(|e| DropError::host("set_current_frame", e))?;
        match self.host.is_playing() {
            Ok(true) => {}
            Ok(false) => {
                if let Err(err) = self.host.toggle_playback() {
                    warn!(%err, "could not start playback");
                }
            }
            Err(err) => warn!(%err, "playback state unknown"),
        }

        Ok((summary, effective.frame_start))
    }

    /// Keeps meshes and expands instances into concrete meshes.
    fn expand_participants(&self, selection: &[Handle]) -> Vec<Handle> {
        let mut actives: Vec<Handle> = Vec::with_capacity(selection.len());
        let mut admit = |handle: Handle| {
            if !actives.contains(&handle) {
                actives.push(handle);
            }
        };
        for &object in selection {
            match self.host.object_kind(object) {
                Ok(ObjectKind::Mesh) => admit(object),
                Ok(ObjectKind::Instance) => match self.host.realize_instances(object) {
                    Ok(realized) => {
                        debug!(%object, count = realized.len(), "instance realized");
                        realized.into_iter().for_each(&mut admit);
                    }
                    Err(err) => warn!(%object, %err, "could not realize instance; skipping"),
                },
                Ok(_) => {}
                Err(err) => warn!(%object, %err, "selected object vanished"),
            }
        }
        actives
    }

    /// Merges duplicates of every unselected visible mesh into one collider.
    fn build_collider(&self, selection: &[Handle], actives: &[Handle], name: &str) -> DropResult<Handle> {
        let objects = self.host.objects().map_err(|e| DropError::host("objects", e))?;
        let candidates: Vec<Handle> = objects
            .into_iter()
            .filter(|h| !selection.contains(h) && !actives.contains(h))
            .filter(|h| matches!(self.host.object_kind(*h), Ok(ObjectKind::Mesh)))
            .filter(|h| matches!(self.host.is_hidden(*h), Ok(false)))
            .collect();
        if candidates.is_empty() {
            return Err(DropError::context("no unselected mesh to collide with"));
        }

        let mut duplicates = Vec::with_capacity(candidates.len());
        for &candidate in &candidates {
            match self.host.duplicate(candidate) {
                Ok(copy) => duplicates.push(copy),
                Err(err) => {
                    self.discard(&duplicates);
                    return Err(DropError::host("duplicate", err));
                }
            }
        }
        for &copy in &duplicates {
            if let Err(err) = self.host.apply_transform(copy) {
                warn!(%copy, %err, "could not apply collider transform");
            }
        }
        let passive = match self.host.join(&duplicates) {
            Ok(passive) => passive,
            Err(err) => {
                self.discard(&duplicates);
                return Err(DropError::host("join", err));
            }
        };

        if let Err(err) = self.host.set_name(passive, name) {
            warn!(%passive, %err, "could not name collider");
        }
        if let Err(err) = self.host.set_display(passive, DisplayType::Wire) {
            warn!(%passive, %err, "could not set collider display");
        }
        debug!(%passive, merged = candidates.len(), "collider created");
        Ok(passive)
    }

    fn discard(&self, objects: &[Handle]) {
        for &object in objects {
            if let Err(err) = self.host.delete(object) {
                warn!(%object, %err, "could not discard partial collider copy");
            }
        }
    }

    // ---- teardown -----------------------------------------------------------

    fn teardown(&self, ctx: &mut SessionContext, kind: Teardown) -> DropResult<String> {
        let store = Arc::clone(ctx.store());
        let mode = ctx.mode();
        let record = store.record(mode)?;
        let validator = HostValidator::new(self.host);

        if matches!(self.host.is_playing(), Ok(true)) {
            if let Err(err) = self.host.toggle_playback() {
                warn!(%err, "could not pause playback");
            }
        }
        if kind == Teardown::Reset {
            if let Err(err) = self.host.set_current_frame(ctx.start_frame()) {
                warn!(%err, "could not rewind to start frame");
            }
        }

        let commit = kind != Teardown::Abort;
        let mut committed = 0;
        match mode {
            Mode::Rigid => {
                if commit {
                    for &object in &record.active {
                        match self.host.apply_visual_transform(object) {
                            Ok(()) => committed += 1,
                            Err(err) => warn!(%object, %err, "could not commit transform"),
                        }
                    }
                }
                let proxies = rigid::teardown(self.host, &ctx.settings, &record);
                if proxies.attempted > 0 {
                    debug!(restored = proxies.restored, attempted = proxies.attempted, "proxies dissolved");
                }
            }
            Mode::Cloth => {
                committed = cloth::teardown(self.host, &store, &record.active, commit);
            }
        }

        for object in [record.passive, record.force_field].into_iter().flatten() {
            if validator.is_valid(object) {
                if let Err(err) = self.host.delete(object) {
                    warn!(%object, %err, "could not delete session object");
                }
            }
        }

        let restored = WorldSettingsManager::new(self.host).rollback(&store)?;
        if let RestoreOutcome::Restored { failed_fields } = restored {
            if failed_fields > 0 {
                warn!(failed_fields, "world parameters partially restored");
            }
        }
        store.reset_all();

        if kind != Teardown::Abort {
            if let Err(err) = self.host.set_current_frame(ctx.start_frame()) {
                warn!(%err, "could not reset current frame");
            }
        }
        ctx.end();

        Ok(match kind {
            Teardown::Apply => format!("applied {committed} of {} objects", record.active.len()),
            Teardown::Reset => format!("reset {} objects", record.active.len()),
            Teardown::Abort => "start rolled back".to_string(),
        })
    }

    // ---- bake ---------------------------------------------------------------

    fn require_bakeable(&self, ctx: &SessionContext, command: &'static str) -> DropResult<()> {
        if ctx.phase() != SessionPhase::Running {
            return Err(DropError::rejected(command, format!("session is {:?}", ctx.phase())));
        }
        if self.host.is_playing().map_err(|e| DropError::host("is_playing", e))? {
            return Err(DropError::rejected(command, "pause playback before baking"));
        }
        Ok(())
    }

    fn bake_cache_session(&self, ctx: &mut SessionContext) -> DropResult<String> {
        self.require_bakeable(ctx, "bake_to_cache")?;
        let start = ctx.start_frame();
        let end = self.host.cache_frame_end().unwrap_or(ctx.settings.world.frame_end);

        let message = match ctx.mode() {
            Mode::Rigid => {
                self.host
                    .bake_to_cache(start, end)
                    .map_err(|e| DropError::host("bake_to_cache", e))?;
                format!("rigid cache baked for frames {start}..{end}")
            }
            Mode::Cloth => {
                let validator = HostValidator::new(self.host);
                let modifiers: Vec<Handle> = ctx
                    .store()
                    .handles(Partition::Cloth, keys::CLOTH_MODIFIERS)?
                    .into_iter()
                    .filter(|m| validator.is_valid(*m))
                    .collect();
                if modifiers.is_empty() {
                    return Err(DropError::context("no cloth object left to bake"));
                }
                self.host
                    .bake_cloth_cache(&modifiers)
                    .map_err(|e| DropError::host("bake_cloth_cache", e))?;
                format!("cloth cache baked for {} objects", modifiers.len())
            }
        };

        self.finish_bake(ctx);
        Ok(message)
    }

    fn bake_keyframes_session(&self, ctx: &mut SessionContext) -> DropResult<String> {
        if ctx.mode() != Mode::Rigid {
            return Err(DropError::rejected("bake_to_keyframes", "only rigid sessions bake to keyframes"));
        }
        self.require_bakeable(ctx, "bake_to_keyframes")?;
        let start = ctx.start_frame();
        let end = self.host.cache_frame_end().unwrap_or(ctx.settings.world.frame_end);

        let actives = ctx.store().handles(Partition::Rigid, keys::ACTIVE)?;
        if actives.is_empty() {
            return Err(DropError::context("no dropped object left to bake"));
        }
        self.host
            .bake_to_keyframes(&actives, start, end)
            .map_err(|e| DropError::host("bake_to_keyframes", e))?;

        self.finish_bake(ctx);
        Ok(format!("{} objects baked to keyframes", actives.len()))
    }

    fn finish_bake(&self, ctx: &mut SessionContext) {
        if let Err(err) = self.host.set_current_frame(ctx.start_frame()) {
            warn!(%err, "could not rewind after bake");
        }
        ctx.set_phase(SessionPhase::Baked);
    }

    // ---- force field --------------------------------------------------------

    fn add_force_session(&self, ctx: &mut SessionContext) -> DropResult<String> {
        require_active(ctx, "add_force")?;
        let validator = HostValidator::new(self.host);
        let store = Arc::clone(ctx.store());

        if let Some(previous) = validator.live(store.handle(Partition::General, keys::FORCE_FIELD)?) {
            if let Err(err) = self.host.delete(previous) {
                warn!(%previous, %err, "could not remove previous force field");
            }
        }

        let location = match self.host.active() {
            Ok(Some(active)) => self.host.location(active).unwrap_or([0.0; 3]),
            _ => [0.0; 3],
        };
        let force = self
            .host
            .add_force_field(location, &ctx.settings.force.clamped())
            .map_err(|e| DropError::host("add_force_field", e))?;
        store.set_handle(Partition::General, keys::FORCE_FIELD, Some(force))?;
        Ok(format!("force field {force} added"))
    }

    fn update_force_session(&self, ctx: &mut SessionContext, settings: ForceFieldSettings) -> DropResult<String> {
        let clamped = settings.clamped();
        if clamped != settings {
            warn!(?settings, ?clamped, "force settings out of range; clamped");
        }
        ctx.settings.force = clamped;

        let validator = HostValidator::new(self.host);
        let tracked = ctx.store().handle(Partition::General, keys::FORCE_FIELD)?;
        match validator.live(tracked) {
            Some(force) => {
                self.host
                    .set_force_field(force, &clamped)
                    .map_err(|e| DropError::host("set_force_field", e))?;
                debug!(%force, strength = clamped.strength, distance = clamped.distance, flow = clamped.flow, "force field updated");
                Ok(format!("force field {force} updated"))
            }
            None => {
                debug!("no force field to update");
                Ok("no force field; settings stored for the next one".to_string())
            }
        }
    }

    fn remove_force_session(&self, ctx: &mut SessionContext) -> DropResult<String> {
        require_active(ctx, "remove_force")?;
        let validator = HostValidator::new(self.host);
        let store = Arc::clone(ctx.store());

        let tracked = store.handle(Partition::General, keys::FORCE_FIELD)?;
        store.set_handle(Partition::General, keys::FORCE_FIELD, None)?;
        match validator.live(tracked) {
            Some(force) => {
                self.host
                    .delete(force)
                    .map_err(|e| DropError::host("delete", e))?;
                Ok(format!("force field {force} removed"))
            }
            None => {
                warn!("force field already removed");
                Ok("force field was already removed".to_string())
            }
        }
    }
}

fn require_active(ctx: &SessionContext, command: &'static str) -> DropResult<()> {
    if ctx.phase().is_active() {
        Ok(())
    } else {
        Err(DropError::rejected(command, format!("no session is running ({:?})", ctx.phase())))
    }
}

fn switch_mode(ctx: &mut SessionContext, mode: Mode) -> DropResult<String> {
    if ctx.phase() != SessionPhase::Idle {
        return Err(DropError::rejected(
            "set_mode",
            format!("cannot change mode while a {} session is {:?}", ctx.mode(), ctx.phase()),
        ));
    }
    ctx.set_mode(mode);
    Ok(format!("{mode} mode"))
}
