//! Background Simulator (spec §4.8): periodic re-tiering plus a reduced-rate,
//! collision-free position update for Background-tier entities.
//!
//! Shares the arbitrator-driven batch-split path with [`crate::ai`] rather
//! than inventing a second threading scheme — confirmed as the original's
//! own design by `original_source/include/managers/BackgroundSimulationManager.hpp`.
//! Updates never go through the collision engine: Background entities carry
//! no body in the active spatial hash, so this module writes straight into
//! the entity store under its own single write-lock acquisition.

use std::sync::{Arc, Mutex};

use parking_lot::RwLock;

use crate::arbitrator::{SystemKind, WorkerBudgetArbitrator};
use crate::entity_store::{EntityStore, Tier, TierChangeCounts};
use crate::handle::EntityHandle;
use crate::worker_pool::{Priority, WorkerPool};

/// Position/velocity snapshot for one Background-tier entity, captured
/// before integration and written back after.
#[derive(Debug, Clone, Copy)]
struct BackgroundItem {
    handle: EntityHandle,
    position: [f32; 2],
    velocity: [f32; 2],
}

/// Drives tier reclassification and the reduced-cadence Background update.
pub struct BackgroundSimulator {
    tier_update_interval: u32,
    min_entities_for_threading: usize,
    frame: u32,
}

impl BackgroundSimulator {
    pub fn new(tier_update_interval: u32, min_entities_for_threading: usize) -> Self {
        Self {
            tier_update_interval: tier_update_interval.max(1),
            min_entities_for_threading,
            frame: 0,
        }
    }

    /// Runs one tick: reclassifies tiers on cadence, then integrates every
    /// Background-tier entity's position (spec §4.8 steps 1-5).
    pub fn update(
        &mut self,
        store: &RwLock<EntityStore>,
        pool: &WorkerPool,
        arbitrator: &WorkerBudgetArbitrator,
        ref_point: [f32; 2],
        active_radius: f32,
        background_radius: f32,
        dt: f32,
    ) -> Option<TierChangeCounts> {
        self.frame = self.frame.wrapping_add(1);

        let tier_changes = if self.frame % self.tier_update_interval == 0 {
            Some(store.write().update_simulation_tiers(ref_point, active_radius, background_radius))
        } else {
            None
        };

        let items: Vec<BackgroundItem> = {
            let guard = store.read();
            guard
                .all_indices()
                .filter(|&i| guard.tier(i) == Tier::Background)
                .map(|i| BackgroundItem {
                    handle: guard.handle_at(i),
                    position: guard.hot(i).position,
                    velocity: guard.hot(i).velocity,
                })
                .collect()
        };

        let workload = items.len();
        if workload == 0 {
            return tier_changes;
        }

        let started = std::time::Instant::now();
        let updated = if workload < self.min_entities_for_threading {
            integrate(items, dt)
        } else {
            let workers = arbitrator.allocated_workers(SystemKind::Background);
            let (_batch_count, batch_size) = arbitrator.batch_strategy(SystemKind::Background, workload, workers);

            let slots: Vec<Arc<Mutex<Option<Vec<BackgroundItem>>>>> = items
                .chunks(batch_size.max(1))
                .map(|_| Arc::new(Mutex::new(None)))
                .collect();

            let mut handles = Vec::with_capacity(slots.len());
            for (chunk, slot) in items.chunks(batch_size.max(1)).zip(slots.iter().cloned()) {
                let chunk = chunk.to_vec();
                handles.push(pool.submit(Priority::Low, move || {
                    *slot.lock().unwrap() = Some(integrate(chunk, dt));
                }));
            }
            for handle in handles {
                let _ = handle.wait();
            }

            let mut merged = Vec::with_capacity(workload);
            for slot in slots {
                if let Some(mut chunk) = slot.lock().unwrap().take() {
                    merged.append(&mut chunk);
                }
            }
            merged
        };

        let mut guard = store.write();
        for item in updated {
            if let Some(index) = guard.get_index(item.handle) {
                let hot = guard.hot_mut(index);
                hot.position = item.position;
                hot.velocity = item.velocity;
            }
        }
        drop(guard);

        let observed_ms = started.elapsed().as_secs_f64() * 1000.0;
        arbitrator.report_observation(SystemKind::Background, workload, observed_ms);
        if workload >= self.min_entities_for_threading {
            arbitrator.report_batch_observation(SystemKind::Background, observed_ms);
        }

        tier_changes
    }
}

/// No collision, no behavior logic: pure kinematic integration.
fn integrate(mut items: Vec<BackgroundItem>, dt: f32) -> Vec<BackgroundItem> {
    for item in &mut items {
        item.position[0] += item.velocity[0] * dt;
        item.position[1] += item.velocity[1] * dt;
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{CollisionConfig, CollisionEngine};
    use crate::entity_store::{BodyType, HotData};

    fn fresh() -> (BackgroundSimulator, RwLock<EntityStore>, CollisionEngine, WorkerPool, WorkerBudgetArbitrator) {
        (
            BackgroundSimulator::new(1, 500),
            RwLock::new(EntityStore::new()),
            CollisionEngine::new(CollisionConfig::default()),
            WorkerPool::new(2).unwrap(),
            WorkerBudgetArbitrator::new(2),
        )
    }

    fn spawn_at(store: &RwLock<EntityStore>, pos: [f32; 2], velocity: [f32; 2]) -> EntityHandle {
        let handle = store.write().reserve_handle();
        store
            .write()
            .apply_command(crate::entity_store::StoreCommand::Create {
                handle,
                hot: HotData {
                    position: pos,
                    velocity,
                    body_type: BodyType::Kinematic,
                    ..Default::default()
                },
                cold: Default::default(),
            });
        handle
    }

    #[test]
    fn background_tier_entity_integrates_position_without_collision() {
        let (mut bg, store, _collision, pool, arb) = fresh();
        let handle = spawn_at(&store, [20_000.0, 0.0], [10.0, 0.0]);
        store.write().update_simulation_tiers([0.0, 0.0], 1500.0, 30_000.0);
        assert_eq!(
            store.read().tier(store.read().get_index(handle).unwrap()),
            Tier::Background
        );

        bg.update(&store, &pool, &arb, [0.0, 0.0], 1500.0, 30_000.0, 1.0);
        let pos = store.read().hot(store.read().get_index(handle).unwrap()).position;
        assert_eq!(pos, [20_010.0, 0.0]);
        pool.shutdown();
    }

    #[test]
    fn active_tier_entity_is_not_touched_by_background_update() {
        let (mut bg, store, _collision, pool, arb) = fresh();
        let handle = spawn_at(&store, [0.0, 0.0], [10.0, 0.0]);
        store.write().update_simulation_tiers([0.0, 0.0], 1500.0, 30_000.0);
        assert_eq!(store.read().tier(store.read().get_index(handle).unwrap()), Tier::Active);

        bg.update(&store, &pool, &arb, [0.0, 0.0], 1500.0, 30_000.0, 1.0);
        let pos = store.read().hot(store.read().get_index(handle).unwrap()).position;
        assert_eq!(pos, [0.0, 0.0]);
        pool.shutdown();
    }

    #[test]
    fn tier_reclassification_only_runs_on_its_configured_cadence() {
        let (mut bg, store, _collision, pool, arb) = fresh();
        bg.tier_update_interval = 5;
        let handle = spawn_at(&store, [0.0, 0.0], [0.0, 0.0]);

        for frame in 1..5 {
            let changes = bg.update(&store, &pool, &arb, [0.0, 0.0], 1500.0, 30_000.0, 1.0 / 60.0);
            assert!(changes.is_none(), "frame {frame} should not reclassify");
        }
        let changes = bg.update(&store, &pool, &arb, [0.0, 0.0], 1500.0, 30_000.0, 1.0 / 60.0);
        assert!(changes.is_some());
        assert!(store.read().get_index(handle).is_some());
        pool.shutdown();
    }

    #[test]
    fn many_background_entities_thread_and_still_integrate_correctly() {
        let (mut bg, store, _collision, pool, arb) = fresh();
        bg.min_entities_for_threading = 10;
        let handles: Vec<_> = (0..50).map(|i| spawn_at(&store, [20_000.0 + i as f32, 0.0], [1.0, 0.0])).collect();
        store.write().update_simulation_tiers([0.0, 0.0], 1500.0, 30_000.0);

        bg.update(&store, &pool, &arb, [0.0, 0.0], 1500.0, 30_000.0, 2.0);
        for (i, handle) in handles.into_iter().enumerate() {
            let pos = store.read().hot(store.read().get_index(handle).unwrap()).position;
            assert_eq!(pos, [20_000.0 + i as f32 + 2.0, 0.0]);
        }
        pool.shutdown();
    }
}
