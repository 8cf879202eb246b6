use dropsim::host::SceneOps;
use dropsim::store::keys;
use dropsim::{
    ErrorKind, Handle, InMemoryScene, Mode, Partition, SessionContext, SessionOrchestrator, SessionPhase,
    SessionSettings,
};

fn running_session(drops: usize, settings: SessionSettings) -> (InMemoryScene, SessionContext, Vec<Handle>) {
    let scene = InMemoryScene::new();
    scene.add_mesh("Floor", [0.0; 3]).unwrap();
    let handles: Vec<Handle> = (0..drops)
        .map(|i| scene.add_mesh(&format!("Box{i}"), [0.0, 0.0, 3.0]).unwrap())
        .collect();
    for h in &handles {
        scene.select(*h, true).unwrap();
    }
    let mut ctx = SessionContext::new(settings);
    ctx.settings.retry.backoff_ms = 0;
    {
        let orchestrator = SessionOrchestrator::new(&scene);
        orchestrator.connect(&ctx).unwrap();
        let outcome = orchestrator.start(&mut ctx, Mode::Rigid);
        assert!(outcome.is_finished(), "{outcome}");
    }
    (scene, ctx, handles)
}

#[test]
fn undo_prunes_exactly_the_deleted_handles() {
    let (scene, mut ctx, drops) = running_session(4, SessionSettings::default());
    let tracked = ctx.store().tracked_handles().unwrap();

    assert_eq!(scene.simulate_undo(&[drops[1], drops[3]]), 2);
    let orchestrator = SessionOrchestrator::new(&scene);
    let report = orchestrator.on_undo(&mut ctx);
    assert_eq!(report.removed, 2);
    assert_eq!(report.inspected, tracked.len());

    let active = ctx.store().handles(Partition::Rigid, keys::ACTIVE).unwrap();
    assert_eq!(active, vec![drops[0], drops[2]]);
    let after = ctx.store().tracked_handles().unwrap();
    assert_eq!(after.len(), tracked.len() - 2);
    assert!(after.iter().all(|h| scene.exists(*h).unwrap()));
    assert_eq!(ctx.phase(), SessionPhase::Running);
}

#[test]
fn commands_sweep_before_running() {
    let (scene, mut ctx, drops) = running_session(2, SessionSettings::default());
    // No notification: the command boundary must still notice the dead handle.
    scene.delete_externally(&[drops[0]]);

    let orchestrator = SessionOrchestrator::new(&scene);
    let outcome = orchestrator.apply(&mut ctx);
    assert!(outcome.is_finished(), "{outcome}");
    assert!(outcome.message.contains("applied 1 of 1"), "{outcome}");
    assert!(ctx.store().is_empty().unwrap());
}

#[test]
fn deleted_collider_does_not_block_teardown() {
    let (scene, mut ctx, drops) = running_session(2, SessionSettings::default());
    let passive = ctx.store().handle(Partition::Rigid, keys::PASSIVE).unwrap().unwrap();
    scene.simulate_undo(&[passive]);

    let orchestrator = SessionOrchestrator::new(&scene);
    let outcome = orchestrator.reset(&mut ctx);
    assert!(outcome.is_finished(), "{outcome}");
    assert_eq!(ctx.phase(), SessionPhase::Idle);
    assert!(drops.iter().all(|d| scene.exists(*d).unwrap()));
    assert!(ctx.store().is_empty().unwrap());
}

#[test]
fn undo_of_every_participant_leaves_nothing_to_bake() {
    let (scene, mut ctx, drops) = running_session(2, SessionSettings::default());
    scene.simulate_undo(&drops);

    let orchestrator = SessionOrchestrator::new(&scene);
    orchestrator.toggle_playback(&mut ctx);
    let outcome = orchestrator.bake_to_keyframes(&mut ctx);
    assert_eq!(outcome.error, Some(ErrorKind::ContextUnavailable));
    assert_eq!(ctx.phase(), SessionPhase::Running);
    assert!(orchestrator.apply(&mut ctx).is_finished());
}

#[test]
fn undone_proxy_counts_as_cleaned() {
    let mut settings = SessionSettings::default();
    settings.optimization.enabled = true;
    let (scene, mut ctx, drops) = running_session(2, settings);
    let pairs = ctx.store().pairs(Partition::Rigid, keys::PROXY_PAIRS).unwrap();
    let low = pairs[0].low.unwrap();
    scene.simulate_undo(&[low]);

    let orchestrator = SessionOrchestrator::new(&scene);
    let report = orchestrator.on_undo(&mut ctx);
    // The proxy is tracked twice: once as a participant and once in its pair.
    assert_eq!(report.removed, 2);
    assert!(!ctx.store().handles(Partition::Rigid, keys::ACTIVE).unwrap().contains(&low));
    let pairs = ctx.store().pairs(Partition::Rigid, keys::PROXY_PAIRS).unwrap();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].low, None);

    assert!(orchestrator.reset(&mut ctx).is_finished());
    for drop in &drops {
        assert!(!scene.is_hidden(*drop).unwrap());
    }
}
