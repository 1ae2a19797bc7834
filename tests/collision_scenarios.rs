//! End-to-end collision/trigger scenarios driven through the public crate
//! API rather than the collision engine's own internal unit tests.

use parking_lot::RwLock;

use sim_core::collision::{CollisionConfig, CollisionEngine};
use sim_core::entity_store::{BodyType, EntityStore};

fn fresh() -> (CollisionEngine, RwLock<EntityStore>) {
    (CollisionEngine::new(CollisionConfig::default()), RwLock::new(EntityStore::new()))
}

fn activate_all(store: &RwLock<EntityStore>) {
    store.write().update_simulation_tiers([0.0, 0.0], f32::MAX, f32::MAX);
}

#[test]
fn overlapping_pair_on_shared_layer_reports_one_collision_with_separating_normal() {
    let (mut engine, store) = fresh();
    let a = engine.create_npc(&store, [0.0, 0.0], [10.0, 10.0], BodyType::Dynamic, 1, 1);
    let b = engine.create_npc(&store, [5.0, 0.0], [10.0, 10.0], BodyType::Dynamic, 1, 1);
    activate_all(&store);

    let metrics = engine.step(&store, 1.0 / 60.0, [0.0, 0.0]);
    assert_eq!(metrics.collisions, 1);

    // The pair should have moved apart along x on resolution.
    let guard = store.read();
    let idx_a = guard.get_index(a).unwrap();
    let idx_b = guard.get_index(b).unwrap();
    let dist = (guard.hot(idx_b).position[0] - guard.hot(idx_a).position[0]).abs();
    assert!(dist > 5.0, "expected separation, got dist={dist}");
}

#[test]
fn layer_mask_mismatch_produces_no_collision_and_no_callback() {
    let (mut engine, store) = fresh();
    engine.create_npc(&store, [0.0, 0.0], [10.0, 10.0], BodyType::Dynamic, 1, 1);
    engine.create_npc(&store, [5.0, 0.0], [10.0, 10.0], BodyType::Dynamic, 2, 0);
    activate_all(&store);

    let called = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = called.clone();
    engine.register_callback(Box::new(move |_info| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }));

    let metrics = engine.step(&store, 1.0 / 60.0, [0.0, 0.0]);
    assert_eq!(metrics.collisions, 0);
    assert_eq!(called.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn moving_into_and_out_of_a_water_trigger_emits_enter_then_exit() {
    let (mut engine, store) = fresh();
    let trigger = engine.create_static_body(&store, [100.0, 100.0], [50.0, 50.0], 1, u32::MAX, true, 1);
    let player = engine.create_npc(&store, [0.0, 0.0], [5.0, 5.0], BodyType::Dynamic, 1, u32::MAX);
    engine.set_player_handle(Some(player));
    activate_all(&store);
    let _ = trigger;

    {
        let mut guard = store.write();
        let idx = guard.get_index(player).unwrap();
        guard.hot_mut(idx).position = [100.0, 100.0];
        guard.hot_mut(idx).aabb_dirty = true;
    }
    engine.step(&store, 1.0 / 60.0, [0.0, 0.0]);
    let events = engine.drain_trigger_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].trigger_tag, 1);

    {
        let mut guard = store.write();
        let idx = guard.get_index(player).unwrap();
        guard.hot_mut(idx).position = [1_000.0, 1_000.0];
        guard.hot_mut(idx).aabb_dirty = true;
    }
    engine.step(&store, 1.0 / 60.0, [0.0, 0.0]);
    let events = engine.drain_trigger_events();
    assert_eq!(events.len(), 1);
}
