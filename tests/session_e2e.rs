use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dropsim::host::{AnimationOps, ClothOps, PlaybackOps, RigidBodyOps, SceneOps, WorldOps};
use dropsim::store::keys;
use dropsim::{
    ErrorKind, Handle, InMemoryScene, Mode, Partition, SessionContext, SessionOrchestrator, SessionPhase,
    SessionSettings,
};

fn scene_with_drops(count: usize) -> (InMemoryScene, Handle, Vec<Handle>) {
    let scene = InMemoryScene::new();
    let ground = scene.add_mesh("Ground", [0.0; 3]).unwrap();
    let drops: Vec<Handle> = (0..count)
        .map(|i| scene.add_mesh(&format!("Drop{i}"), [0.0, 0.0, 4.0]).unwrap())
        .collect();
    for drop in &drops {
        scene.select(*drop, true).unwrap();
    }
    (scene, ground, drops)
}

fn context(settings: SessionSettings) -> SessionContext {
    let mut ctx = SessionContext::new(settings);
    ctx.settings.retry.backoff_ms = 0;
    ctx
}

#[test]
fn start_then_apply_leaves_registry_empty() {
    let (scene, ground, drops) = scene_with_drops(3);
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());
    orchestrator.connect(&ctx).unwrap();
    scene.set_current_frame(40).unwrap();

    let started = orchestrator.start(&mut ctx, Mode::Rigid);
    assert!(started.is_finished(), "{started}");
    assert_eq!(ctx.phase(), SessionPhase::Running);
    assert!(ctx.session_id().is_some());
    assert_eq!(scene.current_frame().unwrap(), 1);
    assert!(scene.is_playing().unwrap());

    let record = ctx.store().record(Mode::Rigid).unwrap();
    assert_eq!(record.active, drops);
    let passive = record.passive.unwrap();
    assert_eq!(scene.find_by_name("COLLIDER"), vec![passive]);
    assert!(!drops.contains(&passive));
    assert!(scene.exists(ground).unwrap());
    assert!(ctx.store().has_snapshot(Partition::General, keys::WORLD_SNAPSHOT).unwrap());

    let applied = orchestrator.apply(&mut ctx);
    assert!(applied.is_finished(), "{applied}");
    assert_eq!(ctx.phase(), SessionPhase::Idle);
    assert!(ctx.session_id().is_none());
    assert!(ctx.store().is_empty().unwrap());
    assert!(scene.find_by_name("COLLIDER").is_empty());
    assert!(!scene.exists(passive).unwrap());
    assert!(drops.iter().all(|d| scene.body(*d).is_none()));
    assert!(!scene.is_playing().unwrap());
}

#[test]
fn second_start_does_not_build_a_second_collider() {
    let (scene, _, _) = scene_with_drops(2);
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());

    assert!(orchestrator.start(&mut ctx, Mode::Rigid).is_finished());
    let objects = scene.object_count();
    let again = orchestrator.start(&mut ctx, Mode::Rigid);
    assert!(again.is_finished());
    assert_eq!(scene.object_count(), objects);
    assert_eq!(scene.find_by_name("COLLIDER").len(), 1);
}

#[test]
fn cloth_start_without_selection_tracks_nothing() {
    let (scene, _, _) = scene_with_drops(2);
    scene.deselect_all().unwrap();
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());
    let objects = scene.object_count();

    assert!(orchestrator.set_mode(&mut ctx, Mode::Cloth).is_finished());
    let outcome = orchestrator.start(&mut ctx, Mode::Cloth);
    assert_eq!(outcome.error, Some(ErrorKind::ContextUnavailable));
    assert_eq!(ctx.phase(), SessionPhase::Idle);
    assert_eq!(ctx.store().handle_count().unwrap(), 0);
    assert_eq!(scene.object_count(), objects);
    assert!(ctx.last_failure().is_some());
}

#[test]
fn start_without_anything_to_land_on_rolls_back() {
    let scene = InMemoryScene::new();
    let drop = scene.add_mesh("Lonely", [0.0; 3]).unwrap();
    scene.select(drop, true).unwrap();
    scene.set_substeps(7).unwrap();
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());

    let outcome = orchestrator.start(&mut ctx, Mode::Rigid);
    assert_eq!(outcome.error, Some(ErrorKind::ContextUnavailable));
    assert_eq!(ctx.phase(), SessionPhase::Idle);
    assert!(ctx.store().is_empty().unwrap());
    assert_eq!(scene.substeps().unwrap(), 7);
    assert_eq!(scene.object_count(), 1);
}

#[test]
fn apply_keeps_fallen_positions_and_reset_does_not() {
    let (scene, _, drops) = scene_with_drops(1);
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());

    orchestrator.start(&mut ctx, Mode::Rigid);
    scene.advance_frames(20);
    assert!(orchestrator.reset(&mut ctx).is_finished());
    assert_eq!(scene.location(drops[0]).unwrap(), [0.0, 0.0, 4.0]);

    orchestrator.start(&mut ctx, Mode::Rigid);
    scene.advance_frames(20);
    assert!(orchestrator.apply(&mut ctx).is_finished());
    let z = scene.location(drops[0]).unwrap()[2];
    assert!((z - 2.0).abs() < 1e-4, "z = {z}");
    assert_eq!(scene.current_frame().unwrap(), 1);
}

#[test]
fn world_parameters_are_restored_after_session() {
    let (scene, _, _) = scene_with_drops(2);
    scene.set_substeps(5).unwrap();
    scene.set_solver_iterations(3).unwrap();
    scene.set_cache_frame_range(10, 90).unwrap();
    let mut settings = SessionSettings::default();
    settings.world.substeps = 20;
    settings.world.frame_end = 120;
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(settings);

    orchestrator.start(&mut ctx, Mode::Rigid);
    assert_eq!(scene.substeps().unwrap(), 20);
    assert_eq!(scene.cache_frame_end().unwrap(), 120);
    assert_eq!(scene.scene_frame_end().unwrap(), 120);

    assert!(orchestrator.reset(&mut ctx).is_finished());
    assert_eq!(scene.substeps().unwrap(), 5);
    assert_eq!(scene.solver_iterations().unwrap(), 3);
    assert_eq!(scene.cache_frame_start().unwrap(), 10);
    assert_eq!(scene.cache_frame_end().unwrap(), 90);
    assert!(!ctx.store().has_snapshot(Partition::General, keys::WORLD_SNAPSHOT).unwrap());
}

#[test]
fn apply_through_proxies_keeps_simulated_motion() {
    let (scene, _, drops) = scene_with_drops(2);
    let before = scene.object_count();
    let mut settings = SessionSettings::default();
    settings.optimization.enabled = true;
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(settings);

    assert!(orchestrator.start(&mut ctx, Mode::Rigid).is_finished());
    scene.advance_frames(20);
    let proxy = scene.find_by_name("Drop0_PhysProxy")[0];
    assert!((scene.visual_location(drops[0]).unwrap()[2] - 2.0).abs() < 1e-4);
    assert!((scene.location(drops[0]).unwrap()[2] - 4.0).abs() < 1e-4);

    let outcome = orchestrator.apply(&mut ctx);
    assert!(outcome.is_finished(), "{outcome}");
    assert!(!scene.exists(proxy).unwrap());
    assert_eq!(scene.object_count(), before);
    for drop in &drops {
        let location = scene.location(*drop).unwrap();
        assert!((location[2] - 2.0).abs() < 1e-4, "{location:?}");
        assert!(!scene.is_hidden(*drop).unwrap());
        assert_eq!(scene.parent(*drop).unwrap(), None);
    }
}

#[test]
fn optimization_round_trip_restores_scene() {
    let (scene, _, drops) = scene_with_drops(3);
    let before = scene.object_count();
    let mut settings = SessionSettings::default();
    settings.optimization.enabled = true;
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(settings);

    let outcome = orchestrator.start(&mut ctx, Mode::Rigid);
    assert!(outcome.message.contains("3 through proxies"), "{outcome}");
    let pairs = ctx.store().pairs(Partition::Rigid, keys::PROXY_PAIRS).unwrap();
    assert_eq!(pairs.len(), 3);
    for drop in &drops {
        assert!(scene.is_hidden(*drop).unwrap());
        assert!(scene.body(*drop).is_none());
    }
    let proxy = scene.find_by_name("Drop0_PhysProxy");
    assert_eq!(proxy.len(), 1);
    assert!(scene.body(proxy[0]).is_some());
    assert_eq!(scene.parent(drops[0]).unwrap(), Some(proxy[0]));

    assert!(orchestrator.reset(&mut ctx).is_finished());
    assert_eq!(scene.object_count(), before);
    for drop in &drops {
        assert!(!scene.is_hidden(*drop).unwrap());
        assert_eq!(scene.parent(*drop).unwrap(), None);
    }
    assert!(scene.find_by_name("Drop0_PhysProxy").is_empty());
}

#[test]
fn cloth_session_commits_and_removes_modifiers() {
    let (scene, _, drops) = scene_with_drops(2);
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());

    let outcome = orchestrator.start(&mut ctx, Mode::Cloth);
    assert!(outcome.message.contains("draping 2 of 2"), "{outcome}");
    let modifiers = ctx.store().handles(Partition::Cloth, keys::CLOTH_MODIFIERS).unwrap();
    assert_eq!(modifiers.len(), 2);
    let passive = ctx.store().handle(Partition::Cloth, keys::PASSIVE).unwrap().unwrap();
    let collision = ctx.store().handle(Partition::Cloth, keys::COLLISION_MODIFIER).unwrap().unwrap();
    assert!(scene.modifiers_of(passive).contains(&collision));
    assert!(!scene.has_world().unwrap_or(false));

    orchestrator.toggle_playback(&mut ctx);
    assert!(orchestrator.bake_to_cache(&mut ctx).is_finished());
    assert!(modifiers.iter().all(|m| scene.cloth_baked(*m)));
    assert_eq!(ctx.phase(), SessionPhase::Baked);

    assert!(orchestrator.apply(&mut ctx).is_finished());
    for (drop, modifier) in drops.iter().zip(&modifiers) {
        assert!(!scene.exists(*modifier).unwrap());
        assert!(scene.mesh_ops(*drop).contains(&dropsim::host::memory::MeshOp::ConvertToMesh));
    }
    assert!(ctx.store().is_empty().unwrap());
}

#[test]
fn registry_is_readable_from_host_callbacks_during_commands() {
    let (scene, _, _) = scene_with_drops(2);
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());

    let store = Arc::clone(ctx.store());
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    scene.set_write_hook(Some(Arc::new(move |_op: &'static str| {
        if store.handle_count().is_ok() {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    })));

    assert!(orchestrator.start(&mut ctx, Mode::Rigid).is_finished());
    assert!(orchestrator.update_secondary_effect(&mut ctx, 40.0, [true, true, true]).is_finished());
    assert!(orchestrator.apply(&mut ctx).is_finished());
    assert!(calls.load(Ordering::SeqCst) > 0);
}

#[test]
fn shake_strength_is_scaled_and_axes_can_be_disabled() {
    let (scene, _, _) = scene_with_drops(1);
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());
    orchestrator.start(&mut ctx, Mode::Rigid);

    let modifiers = ctx.store().axis_handles(Partition::Shake, keys::SHAKE_MODIFIERS).unwrap();
    assert!(modifiers.iter().all(Option::is_some));
    for m in modifiers.iter().flatten() {
        assert!(scene.noise(*m).unwrap().strength.abs() < f32::EPSILON);
    }

    let outcome = orchestrator.update_secondary_effect(&mut ctx, 50.0, [true, false, true]);
    assert!(outcome.is_finished(), "{outcome}");
    let strengths: Vec<f32> = modifiers
        .iter()
        .flatten()
        .map(|m| scene.noise(*m).unwrap().strength)
        .collect();
    assert!((strengths[0] - 0.25).abs() < 1e-6);
    assert!(strengths[1].abs() < f32::EPSILON);
    assert!((strengths[2] - 0.25).abs() < 1e-6);
    assert!((ctx.settings.shake.strength - 50.0).abs() < f32::EPSILON);
}

#[test]
fn shake_update_without_session_is_cancelled() {
    let (scene, _, _) = scene_with_drops(1);
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());
    let outcome = orchestrator.update_secondary_effect(&mut ctx, 10.0, [true; 3]);
    assert!(!outcome.is_finished());
    assert_eq!(ctx.phase(), SessionPhase::Idle);
}

#[test]
fn preset_outside_session_only_changes_settings() {
    let (scene, _, _) = scene_with_drops(1);
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());

    let outcome = orchestrator.apply_cloth_preset(&mut ctx, "leather");
    assert!(outcome.is_finished(), "{outcome}");
    assert_eq!(ctx.settings.cloth, dropsim::ClothPreset::Leather.settings());

    orchestrator.start(&mut ctx, Mode::Cloth);
    let modifiers = ctx.store().handles(Partition::Cloth, keys::CLOTH_MODIFIERS).unwrap();
    assert_eq!(scene.cloth_settings(modifiers[0]).unwrap(), dropsim::ClothPreset::Leather.settings());
}

#[test]
fn shutdown_clears_registry() {
    let (scene, _, _) = scene_with_drops(2);
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());
    orchestrator.start(&mut ctx, Mode::Rigid);
    assert!(ctx.store().handle_count().unwrap() > 0);

    assert!(orchestrator.shutdown(&mut ctx).is_finished());
    assert_eq!(ctx.phase(), SessionPhase::Idle);
    assert!(ctx.store().is_empty().unwrap());
}

#[test]
fn commands_without_session_are_rejected() {
    let (scene, _, _) = scene_with_drops(1);
    let orchestrator = SessionOrchestrator::new(&scene);
    let mut ctx = context(SessionSettings::default());

    for outcome in [
        orchestrator.apply(&mut ctx),
        orchestrator.reset(&mut ctx),
        orchestrator.bake_to_cache(&mut ctx),
        orchestrator.remove_force(&mut ctx),
        orchestrator.toggle_playback(&mut ctx),
    ] {
        assert_eq!(outcome.error, Some(ErrorKind::Rejected), "{outcome}");
    }
    assert!(orchestrator.can_start(&ctx));
    assert!(!orchestrator.can_apply(&ctx));
    assert!(!orchestrator.can_add_force(&ctx));
}
