use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use dropsim::host::SceneOps;
use dropsim::store::keys;
use dropsim::validator::HostValidator;
use dropsim::{Handle, InMemoryScene, Mode, Partition, SessionContext, SessionOrchestrator, StateStore};

fn seeded(count: u32) -> (InMemoryScene, Vec<Handle>) {
    let scene = InMemoryScene::new();
    let handles = (0..count)
        .map(|i| scene.add_mesh(&format!("Item{i}"), [0.0; 3]).unwrap())
        .collect();
    (scene, handles)
}

fn bench_sweep_all_live(c: &mut Criterion) {
    let (scene, handles) = seeded(1024);
    let store = StateStore::new();
    store.set_handles(Partition::Rigid, keys::ACTIVE, &handles).unwrap();

    let mut group = c.benchmark_group("sweep");
    group.throughput(Throughput::Elements(handles.len() as u64));
    group.bench_function("all_live_1024", |b| {
        b.iter(|| store.sweep(&HostValidator::new(&scene)).unwrap());
    });
    group.finish();
}

fn bench_sweep_after_undo(c: &mut Criterion) {
    c.bench_function("sweep/quarter_dead_1024", |b| {
        b.iter_batched(
            || {
                let (scene, handles) = seeded(1024);
                let store = StateStore::new();
                store.set_handles(Partition::Rigid, keys::ACTIVE, &handles).unwrap();
                // Every fourth handle dies behind the registry's back.
                let dead: Vec<Handle> = handles.iter().copied().step_by(4).collect();
                scene.delete_externally(&dead);
                (scene, store)
            },
            |(scene, store)| store.sweep(&HostValidator::new(&scene)).unwrap(),
            BatchSize::SmallInput,
        );
    });
}

fn bench_start_apply(c: &mut Criterion) {
    c.bench_function("session/start_apply_16", |b| {
        b.iter_batched(
            || {
                let (scene, handles) = seeded(16);
                scene.add_mesh("Ground", [0.0; 3]).unwrap();
                for h in &handles {
                    scene.select(*h, true).unwrap();
                }
                let mut ctx = SessionContext::default();
                ctx.settings.retry.backoff_ms = 0;
                (scene, ctx)
            },
            |(scene, mut ctx)| {
                let orchestrator = SessionOrchestrator::new(&scene);
                orchestrator.start(&mut ctx, Mode::Rigid);
                orchestrator.apply(&mut ctx)
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(sweep, bench_sweep_all_live, bench_sweep_after_undo, bench_start_apply);
criterion_main!(sweep);
