//! Behavior scheduling across Active-tier entities (spec §4.6).
//!
//! Assignment/removal/messages queue and flush at the next frame boundary so
//! a mid-tick assignment can't race a batch already in flight. Each batch
//! takes full ownership of its entities' `Box<dyn Behavior>` for the
//! duration of the tick (removed from `assigned`, returned afterward) —
//! there is no aliasing to reason about because nothing else can reach a
//! behavior while its batch holds it, which is what lets batches cross the
//! worker pool's `'static` boundary without `unsafe`.

pub mod behavior;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use parking_lot::RwLock;
use rand::SeedableRng;

use crate::arbitrator::{SystemKind, WorkerBudgetArbitrator};
use crate::collision::{CollisionEngine, KinematicUpdate};
use crate::entity_store::{EntityStore, Tier};
use crate::handle::EntityHandle;
use crate::worker_pool::{Priority, WorkerPool};

use behavior::{Behavior, BehaviorContext, Transform};

struct AssignedEntity {
    handle: EntityHandle,
    behavior: Box<dyn Behavior>,
}

enum PendingCommand {
    Assign { handle: EntityHandle, behavior_name: String },
    Unassign(EntityHandle),
    Message { handle: EntityHandle, message: String },
    Broadcast { message: String },
}

struct BatchItem {
    handle: EntityHandle,
    behavior: Box<dyn Behavior>,
    transform: Transform,
}

/// Per-tick entry point for driving every Active-tier entity's assigned
/// behavior, threading through the shared worker pool when the arbitrator
/// says it's worth it.
pub struct AiScheduler {
    prototypes: HashMap<String, Box<dyn Behavior>>,
    assigned: HashMap<EntityHandle, AssignedEntity>,
    pending: Vec<PendingCommand>,
    player_handle: Option<EntityHandle>,
    rng_seed: u64,
    tick: u64,
}

impl AiScheduler {
    pub fn new(rng_seed: u64) -> Self {
        Self {
            prototypes: HashMap::new(),
            assigned: HashMap::new(),
            pending: Vec::new(),
            player_handle: None,
            rng_seed,
            tick: 0,
        }
    }

    pub fn register_behavior(&mut self, name: &str, prototype: Box<dyn Behavior>) {
        self.prototypes.insert(name.to_string(), prototype);
    }

    pub fn register_entity(&mut self, handle: EntityHandle, behavior_name: &str) {
        self.pending.push(PendingCommand::Assign {
            handle,
            behavior_name: behavior_name.to_string(),
        });
    }

    pub fn unregister_entity(&mut self, handle: EntityHandle) {
        self.pending.push(PendingCommand::Unassign(handle));
    }

    pub fn send_message_to_entity(&mut self, handle: EntityHandle, message: &str, immediate: bool) {
        if immediate {
            if let Some(entry) = self.assigned.get_mut(&handle) {
                entry.behavior.on_message(handle, message);
            }
        } else {
            self.pending.push(PendingCommand::Message {
                handle,
                message: message.to_string(),
            });
        }
    }

    pub fn broadcast_message(&mut self, message: &str, immediate: bool) {
        if immediate {
            for entry in self.assigned.values_mut() {
                entry.behavior.on_message(entry.handle, message);
            }
        } else {
            self.pending.push(PendingCommand::Broadcast {
                message: message.to_string(),
            });
        }
    }

    pub fn set_player_handle(&mut self, handle: Option<EntityHandle>) {
        self.player_handle = handle;
    }

    pub fn assigned_count(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_assigned(&self, handle: EntityHandle) -> bool {
        self.assigned.contains_key(&handle)
    }

    /// Every entity currently holding an assigned behavior. Used by the root
    /// engine to cancel a departing entity's in-flight path requests, since
    /// this scheduler has no reference to the pathfinder itself.
    pub fn assigned_handles(&self) -> Vec<EntityHandle> {
        self.assigned.keys().copied().collect()
    }

    /// Cooperative cancellation entry point. Clears local assignment state;
    /// cancelling this scheduler's in-flight path requests is the root
    /// engine's job (it owns both this scheduler and the pathfinder).
    pub fn prepare_for_state_transition(&mut self) {
        self.pending.clear();
        for entry in self.assigned.values_mut() {
            entry.behavior.clean(entry.handle);
        }
        self.assigned.clear();
    }

    fn process_pending(&mut self) {
        for command in std::mem::take(&mut self.pending) {
            match command {
                PendingCommand::Assign { handle, behavior_name } => {
                    match self.prototypes.get(&behavior_name) {
                        Some(prototype) => {
                            let mut behavior = prototype.clone_box();
                            behavior.init(handle);
                            self.assigned.insert(handle, AssignedEntity { handle, behavior });
                        }
                        None => {
                            tracing::warn!(behavior = %behavior_name, "unknown behavior name, entity not assigned");
                        }
                    }
                }
                PendingCommand::Unassign(handle) => {
                    if let Some(mut entry) = self.assigned.remove(&handle) {
                        entry.behavior.clean(handle);
                    }
                }
                PendingCommand::Message { handle, message } => {
                    if let Some(entry) = self.assigned.get_mut(&handle) {
                        entry.behavior.on_message(handle, &message);
                    }
                }
                PendingCommand::Broadcast { message } => {
                    for entry in self.assigned.values_mut() {
                        entry.behavior.on_message(entry.handle, &message);
                    }
                }
            }
        }
    }

    fn frame_seed(&self) -> u64 {
        self.rng_seed ^ self.tick.wrapping_mul(0x9E3779B97F4A7C15)
    }

    fn take_batch_items(&mut self, store: &RwLock<EntityStore>, handles: &[EntityHandle]) -> Vec<BatchItem> {
        let guard = store.read();
        let mut items = Vec::with_capacity(handles.len());
        for &handle in handles {
            if let Some(entry) = self.assigned.remove(&handle) {
                let transform = match guard.get_index(handle) {
                    Some(index) => Transform {
                        position: guard.hot(index).position,
                        velocity: guard.hot(index).velocity,
                    },
                    None => Transform {
                        position: [0.0, 0.0],
                        velocity: [0.0, 0.0],
                    },
                };
                items.push(BatchItem {
                    handle,
                    behavior: entry.behavior,
                    transform,
                });
            }
        }
        items
    }

    fn return_batch_items(&mut self, items: Vec<BatchItem>) {
        for item in items {
            self.assigned.insert(
                item.handle,
                AssignedEntity {
                    handle: item.handle,
                    behavior: item.behavior,
                },
            );
        }
    }

    /// Drains pending commands, runs behaviors for every Active-tier
    /// assigned entity, and merges the result into the collision engine
    /// through a single shared-lock acquisition (spec §4.6 steps 1-7).
    pub fn update(
        &mut self,
        store: &RwLock<EntityStore>,
        collision: &CollisionEngine,
        pool: &WorkerPool,
        arbitrator: &WorkerBudgetArbitrator,
        dt: f32,
    ) {
        self.process_pending();
        self.tick += 1;

        let active_handles: Vec<EntityHandle> = {
            let guard = store.read();
            self.assigned
                .keys()
                .copied()
                .filter(|&h| {
                    guard
                        .get_index(h)
                        .map(|index| guard.tier(index) == Tier::Active)
                        .unwrap_or(false)
                })
                .collect()
        };
        let workload = active_handles.len();
        if workload == 0 {
            return;
        }

        let player_position = {
            let guard = store.read();
            self.player_handle
                .and_then(|h| guard.get_index(h))
                .map(|index| guard.hot(index).position)
        };

        let decision = arbitrator.should_use_threading(SystemKind::Ai, workload);
        let started = std::time::Instant::now();
        let seed = self.frame_seed();

        let updates = if !decision.should_thread {
            let items = self.take_batch_items(store, &active_handles);
            let (items, updates) = process_batch(items, dt, player_position, seed);
            self.return_batch_items(items);
            updates
        } else {
            let workers = arbitrator.allocated_workers(SystemKind::Ai);
            let (_batch_count, batch_size) = arbitrator.batch_strategy(SystemKind::Ai, workload, workers);
            let chunks: Vec<Vec<EntityHandle>> = active_handles
                .chunks(batch_size.max(1))
                .map(|chunk| chunk.to_vec())
                .collect();

            let slots: Vec<Arc<Mutex<Option<(Vec<BatchItem>, Vec<KinematicUpdate>)>>>> =
                (0..chunks.len()).map(|_| Arc::new(Mutex::new(None))).collect();

            let mut handles = Vec::with_capacity(chunks.len());
            for (batch_index, chunk) in chunks.into_iter().enumerate() {
                let items = self.take_batch_items(store, &chunk);
                let batch_seed = seed ^ (batch_index as u64).wrapping_mul(0x9E3779B97F4A7C15);
                let slot = slots[batch_index].clone();
                handles.push(pool.submit(Priority::Normal, move || {
                    let result = process_batch(items, dt, player_position, batch_seed);
                    *slot.lock().unwrap() = Some(result);
                }));
            }
            for handle in handles {
                let _ = handle.wait();
            }

            let mut merged = Vec::new();
            for slot in slots {
                if let Some((items, mut updates)) = slot.lock().unwrap().take() {
                    self.return_batch_items(items);
                    merged.append(&mut updates);
                }
            }
            merged
        };

        collision.apply_batched_kinematic_updates(store, &updates);

        let observed_ms = started.elapsed().as_secs_f64() * 1000.0;
        arbitrator.report_observation(SystemKind::Ai, workload, observed_ms);
        if decision.should_thread {
            arbitrator.report_batch_observation(SystemKind::Ai, observed_ms);
        }
    }
}

fn process_batch(
    mut items: Vec<BatchItem>,
    dt: f32,
    player_position: Option<[f32; 2]>,
    seed: u64,
) -> (Vec<BatchItem>, Vec<KinematicUpdate>) {
    for item in &mut items {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed ^ item.handle.to_bits());
        let mut ctx = BehaviorContext {
            handle: item.handle,
            transform: &mut item.transform,
            dt,
            player_position,
            rng: &mut rng,
        };
        item.behavior.execute_logic(&mut ctx);
        item.transform.position = [
            item.transform.position[0] + item.transform.velocity[0] * dt,
            item.transform.position[1] + item.transform.velocity[1] * dt,
        ];
    }

    let updates = items
        .iter()
        .map(|item| KinematicUpdate {
            handle: item.handle,
            position: item.transform.position,
            velocity: item.transform.velocity,
            active: true,
        })
        .collect();

    (items, updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::CollisionConfig;
    use crate::entity_store::BodyType;

    fn fresh_engine() -> (AiScheduler, RwLock<EntityStore>, CollisionEngine, WorkerPool, WorkerBudgetArbitrator) {
        (
            AiScheduler::new(42),
            RwLock::new(EntityStore::new()),
            CollisionEngine::new(CollisionConfig::default()),
            WorkerPool::new(2).unwrap(),
            WorkerBudgetArbitrator::new(2),
        )
    }

    #[test]
    fn unknown_behavior_name_leaves_entity_unassigned() {
        let (mut ai, store, mut collision, pool, arb) = fresh_engine();
        let handle = collision.create_npc(&store, [0.0, 0.0], [5.0, 5.0], BodyType::Kinematic, 1, u32::MAX);
        collision.step(&store, 1.0 / 60.0, [0.0, 0.0]);
        store.write().update_simulation_tiers([0.0, 0.0], f32::MAX, f32::MAX);

        ai.register_entity(handle, "does_not_exist");
        ai.update(&store, &collision, &pool, &arb, 1.0 / 60.0);
        assert!(!ai.is_assigned(handle));
        pool.shutdown();
    }

    #[test]
    fn single_threaded_batch_moves_idle_sway_entity() {
        let (mut ai, store, mut collision, pool, arb) = fresh_engine();
        let handle = collision.create_npc(&store, [0.0, 0.0], [5.0, 5.0], BodyType::Kinematic, 1, u32::MAX);
        collision.step(&store, 1.0 / 60.0, [0.0, 0.0]);
        store.write().update_simulation_tiers([0.0, 0.0], f32::MAX, f32::MAX);

        ai.register_behavior("idle_sway", Box::new(behavior::StandardBehavior::new(behavior::StandardKind::Idle { sway: true })));
        ai.register_entity(handle, "idle_sway");
        ai.update(&store, &collision, &pool, &arb, 1.0 / 60.0);
        assert!(ai.is_assigned(handle));
        pool.shutdown();
    }

    #[test]
    fn prepare_for_state_transition_clears_assignments() {
        let (mut ai, store, mut collision, pool, _arb) = fresh_engine();
        let handle = collision.create_npc(&store, [0.0, 0.0], [5.0, 5.0], BodyType::Kinematic, 1, u32::MAX);
        collision.step(&store, 1.0 / 60.0, [0.0, 0.0]);

        ai.register_behavior("idle", Box::new(behavior::StandardBehavior::new(behavior::StandardKind::Idle { sway: false })));
        ai.register_entity(handle, "idle");
        ai.process_pending();
        assert!(ai.is_assigned(handle));

        ai.prepare_for_state_transition();
        assert!(!ai.is_assigned(handle));
        pool.shutdown();
    }
}
