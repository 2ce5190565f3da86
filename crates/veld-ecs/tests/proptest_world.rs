//! Property tests for world operations.
//!
//! Random sequences of spawn/add/remove/destroy/flush are replayed against a
//! plain model of the world, checking the structural invariants after every
//! step: the live-entity count matches, every live handle resolves, each
//! entity's component set equals the model's, and query counts agree with
//! the model once the queue is flushed.

use proptest::prelude::*;
use veld_ecs::prelude::*;

#[derive(Debug, Clone)]
enum WorldOp {
    Spawn,
    AddComponent(usize, u8),
    RemoveComponent(usize, u8),
    Destroy(usize),
    Flush,
}

fn op_strategy() -> impl Strategy<Value = WorldOp> {
    prop_oneof![
        2 => Just(WorldOp::Spawn),
        3 => (0..100usize, 0..3u8).prop_map(|(pick, c)| WorldOp::AddComponent(pick, c)),
        2 => (0..100usize, 0..3u8).prop_map(|(pick, c)| WorldOp::RemoveComponent(pick, c)),
        1 => (0..100usize).prop_map(WorldOp::Destroy),
        1 => Just(WorldOp::Flush),
    ]
}

/// Model entry: the handle, a component bitmask, and whether the entity is
/// parked in `Destroying` awaiting a flush.
type ModelEntry = (EntityId, u8, bool);

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn random_ops_preserve_invariants(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut registry = Registry::new();
        let components = [
            registry.register_component(ComponentInfo::of::<u32>("A")),
            registry.register_component(ComponentInfo::of::<u64>("B")),
            registry.register_component(ComponentInfo::of::<u16>("C")),
        ];
        let mut world = World::new(&registry);
        let mut model: Vec<ModelEntry> = Vec::new();

        for op in ops {
            match op {
                WorldOp::Spawn => {
                    let entity = world.spawn_entity(EntityInfo::default());
                    model.push((entity, 0, false));
                }
                WorldOp::AddComponent(pick, c) => {
                    if !model.is_empty() {
                        let i = pick % model.len();
                        let c = (c % 3) as usize;
                        if !model[i].2 {
                            world.add_component(&registry, model[i].0, components[c]);
                            model[i].1 |= 1 << c;
                        }
                    }
                }
                WorldOp::RemoveComponent(pick, c) => {
                    if !model.is_empty() {
                        let i = pick % model.len();
                        let c = (c % 3) as usize;
                        if !model[i].2 {
                            world.remove_component(&registry, model[i].0, components[c]);
                            model[i].1 &= !(1 << c);
                        }
                    }
                }
                WorldOp::Destroy(pick) => {
                    if !model.is_empty() {
                        let i = pick % model.len();
                        world.destroy_entity(model[i].0);
                        model[i].2 = true;
                    }
                }
                WorldOp::Flush => {
                    world.flush_events();
                    model.retain(|(_, _, destroying)| !destroying);
                }
            }

            // Slots stay occupied (and visible) until the destroy flushes.
            prop_assert_eq!(world.entity_count(), model.len());
            for (entity, mask, _) in &model {
                prop_assert!(world.is_alive(*entity));
                for (c, component) in components.iter().enumerate() {
                    prop_assert_eq!(
                        world.entity_has_component(*entity, *component),
                        mask & (1 << c) != 0
                    );
                }
                prop_assert_eq!(
                    world.entity_component_count(*entity),
                    mask.count_ones() as usize
                );
            }
        }

        // Settle and cross-check query counts against the model.
        world.flush_events();
        model.retain(|(_, _, destroying)| !destroying);
        for (c, component) in components.iter().enumerate() {
            let it = world.acquire_iterator();
            world.iter_component(it, *component, 0);
            world.iter_finalize(it);
            let expected = model.iter().filter(|(_, mask, _)| mask & (1 << c) != 0).count();
            prop_assert_eq!(world.iter_count(it), expected);
            world.release_iterator(it);
        }
    }

    #[test]
    fn destroyed_handles_go_stale_after_flush(spawns in 1..20usize, destroy_pick in 0..20usize) {
        let registry = Registry::new();
        let mut world = World::new(&registry);
        let entities: Vec<EntityId> = (0..spawns)
            .map(|_| world.spawn_entity(EntityInfo::default()))
            .collect();
        world.flush_events();

        let doomed = entities[destroy_pick % entities.len()];
        world.destroy_entity(doomed);
        prop_assert!(world.is_alive(doomed), "row survives until the flush");
        world.flush_events();
        prop_assert!(!world.is_alive(doomed));

        // The recycled slot hands out a different generation.
        let recycled = world.spawn_entity(EntityInfo::default());
        if recycled.index() == doomed.index() {
            prop_assert_ne!(recycled.generation(), doomed.generation());
        }
        prop_assert!(!world.is_alive(doomed));
    }
}
