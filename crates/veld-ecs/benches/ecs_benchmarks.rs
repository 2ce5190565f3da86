//! Spawn, iteration, and structural-churn benchmarks.
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use veld_ecs::prelude::*;

#[repr(C)]
#[derive(Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
}

fn setup_registry() -> (Registry, ComponentId, ComponentId) {
    let mut registry = Registry::new();
    let position = registry.register_component(ComponentInfo::of::<Position>("Position"));
    let velocity = registry.register_component(ComponentInfo::of::<Velocity>("Velocity"));
    (registry, position, velocity)
}

fn bench_spawn(c: &mut Criterion) {
    let (registry, position, velocity) = setup_registry();
    c.bench_function("spawn_1k_two_components", |b| {
        b.iter(|| {
            let mut world = World::new(&registry);
            for _ in 0..1_000 {
                let entity = world.spawn_entity(EntityInfo::default());
                world.add_component(&registry, entity, position);
                world.add_component(&registry, entity, velocity);
            }
            world.flush_events();
            black_box(world.entity_count())
        });
    });
}

fn bench_iterate(c: &mut Criterion) {
    let (registry, position, velocity) = setup_registry();
    let mut world = World::new(&registry);
    for i in 0..10_000 {
        let entity = world.spawn_entity(EntityInfo::default());
        let p = world.add_component(&registry, entity, position) as *mut Position;
        unsafe {
            *p = Position {
                x: i as f32,
                y: 0.0,
            };
        }
        let v = world.add_component(&registry, entity, velocity) as *mut Velocity;
        unsafe {
            *v = Velocity { x: 1.0, y: -1.0 };
        }
    }
    world.flush_events();

    let it = world.acquire_iterator();
    world.iter_component(it, position, 0);
    world.iter_component(it, velocity, 1);
    world.iter_finalize(it);

    c.bench_function("iterate_10k_rows", |b| {
        b.iter(|| {
            world.iter_begin(it);
            let mut rows = 0usize;
            while world.iter_advance(it) {
                let p = world.iter_argument(it, 0) as *mut Position;
                let v = world.iter_argument(it, 1) as *const Velocity;
                unsafe {
                    (*p).x += (*v).x;
                    (*p).y += (*v).y;
                }
                rows += 1;
            }
            black_box(rows)
        });
    });
}

fn bench_structural_churn(c: &mut Criterion) {
    let (registry, position, velocity) = setup_registry();
    let mut world = World::new(&registry);
    let entities: Vec<EntityId> = (0..1_000)
        .map(|_| {
            let entity = world.spawn_entity(EntityInfo::default());
            world.add_component(&registry, entity, position);
            entity
        })
        .collect();
    world.flush_events();

    c.bench_function("churn_1k_add_remove", |b| {
        b.iter(|| {
            for &entity in &entities {
                world.add_component(&registry, entity, velocity);
            }
            for &entity in &entities {
                world.remove_component(&registry, entity, velocity);
            }
            world.flush_events();
        });
    });
}

criterion_group!(benches, bench_spawn, bench_iterate, bench_structural_churn);
criterion_main!(benches);
