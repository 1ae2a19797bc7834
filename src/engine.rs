//! Root orchestrator (added): wires the worker pool, arbitrator, entity
//! store, collision engine, AI scheduler, pathfinder and background
//! simulator into the single per-frame driver spec §2's data-flow list
//! describes. One consumer-facing facade over the whole collection of
//! systems, so a host constructs and drives exactly one type per tick.
//!
//! `CollisionEngine::step` already bundles command-draining together with
//! broad/narrowphase resolution into one call, so the literal 8-step
//! data-flow order (drain commands, then AI, then resolve) is reshaped here
//! to (AI reads/merges, then collision drains-and-resolves) without
//! splitting that engine's public API — see DESIGN.md.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::ai::behavior::Behavior;
use crate::ai::AiScheduler;
use crate::arbitrator::WorkerBudgetArbitrator;
use crate::background::BackgroundSimulator;
use crate::collision::{CollisionConfig, CollisionEngine, FrameMetrics};
use crate::config::EngineConfig;
use crate::entity_store::{BodyType, EntityStore, TierChangeCounts};
use crate::error::{EngineError, EngineResult};
use crate::events::{CollisionCallback, TriggerEvent};
use crate::handle::EntityHandle;
use crate::pathfinding::{PathfinderConfig, PathfinderService, RequestOutcome};
use crate::snapshot::{self, Snapshot};
use crate::worker_pool::{Priority, WorkerPool};

/// Classification of a world tile for the static-body/pathfinder rebuild
/// (spec §6's world-load signal: "buildings form merged rectangles; water
/// tiles become triggers; other impassables contribute to path cost only").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Open,
    Building,
    Water,
    SoftImpassable,
}

/// Extra per-cell traversal cost applied for [`TileKind::SoftImpassable`]
/// tiles (walkable, but avoided by A* when a route around exists).
const SOFT_IMPASSABLE_WEIGHT: f32 = 8.0;
const WATER_TRIGGER_TAG: u8 = 1;

struct WorldTiles {
    origin: [f32; 2],
    width: u32,
    height: u32,
    cell_size: f32,
    kinds: Vec<TileKind>,
    /// One static body per non-open cell, keyed by cell coordinates. A flat
    /// per-cell body is a deliberate simplification of the original's
    /// merged-rectangle optimization — see DESIGN.md.
    bodies: HashMap<(u32, u32), EntityHandle>,
}

impl WorldTiles {
    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }

    fn cell_center(&self, x: u32, y: u32) -> [f32; 2] {
        [
            self.origin[0] + (x as f32 + 0.5) * self.cell_size,
            self.origin[1] + (y as f32 + 0.5) * self.cell_size,
        ]
    }
}

/// Ties every subsystem together behind one `step`/`snapshot` pair, plus the
/// command-style methods spec §6 names as the core's external interface.
pub struct Engine {
    config: EngineConfig,
    store: RwLock<EntityStore>,
    pool: WorkerPool,
    arbitrator: WorkerBudgetArbitrator,
    collision: CollisionEngine,
    ai: AiScheduler,
    pathfinder: PathfinderService,
    background: BackgroundSimulator,
    player_handle: Option<EntityHandle>,
    reference_point: [f32; 2],
    tick: u64,
    time: f32,
    tiles: Option<WorldTiles>,
}

impl Engine {
    /// Builds every subsystem from `config`. The only hard-fatal failure
    /// mode in the core (spec §7): the worker pool failing to spawn its
    /// threads.
    pub fn new(config: EngineConfig, rng_seed: u64) -> EngineResult<Self> {
        config.validate()?;

        let pool = WorkerPool::new(config.thread_count).map_err(EngineError::WorkerPoolInit)?;
        let arbitrator = WorkerBudgetArbitrator::new(config.thread_count);

        let collision = CollisionEngine::new(CollisionConfig {
            culling_buffer: config.culling_buffer,
            cache_eviction_interval: config.cache_eviction_interval,
            trigger_cooldown_sec: config.trigger_cooldown_sec,
            ..CollisionConfig::default()
        });

        let pathfinder = PathfinderService::new(PathfinderConfig {
            max_paths_per_frame: config.max_paths_per_frame,
            path_cache_ttl_sec: config.path_cache_ttl_sec,
            allow_diagonal: config.allow_diagonal,
            max_iterations: config.max_path_iterations,
            ..PathfinderConfig::default()
        });

        let background = BackgroundSimulator::new(config.tier_update_interval, config.min_entities_for_background_threading);

        Ok(Self {
            store: RwLock::new(EntityStore::new()),
            pool,
            arbitrator,
            collision,
            ai: AiScheduler::new(rng_seed),
            pathfinder,
            background,
            player_handle: None,
            reference_point: [0.0, 0.0],
            tick: 0,
            time: 0.0,
            tiles: None,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn current_time(&self) -> f32 {
        self.time
    }

    /// Player handle: drives pathfinder spatial priority and collision
    /// culling (spec §6). Also becomes the Background Simulator's and
    /// collision culling's reference point when set.
    pub fn set_player_handle(&mut self, handle: Option<EntityHandle>) {
        self.player_handle = handle;
        self.collision.set_player_handle(handle);
        self.ai.set_player_handle(handle);
    }

    /// Explicit camera/reference point, used when there is no single player
    /// entity (e.g. a free camera) or as a fallback before one is set.
    pub fn set_reference_point(&mut self, point: [f32; 2]) {
        self.reference_point = point;
    }

    fn effective_reference_point(&self) -> [f32; 2] {
        let guard = self.store.read();
        self.player_handle
            .and_then(|h| guard.get_index(h))
            .map(|index| guard.hot(index).position)
            .unwrap_or(self.reference_point)
    }

    // ---- Entity lifecycle (delegates to the collision engine's deferred
    // command queue, per spec §4.3/§4.5) ----

    pub fn create_npc(&self, pos: [f32; 2], half_size: [f32; 2], layer_mask: u32, collides_with: u32) -> EntityHandle {
        self.collision
            .create_npc(&self.store, pos, half_size, BodyType::Kinematic, layer_mask, collides_with)
    }

    pub fn create_static_body(
        &self,
        pos: [f32; 2],
        half_size: [f32; 2],
        layer_mask: u32,
        collides_with: u32,
        is_trigger: bool,
        trigger_tag: u8,
    ) -> EntityHandle {
        self.collision
            .create_static_body(&self.store, pos, half_size, layer_mask, collides_with, is_trigger, trigger_tag)
    }

    pub fn destroy(&mut self, handle: EntityHandle) {
        self.collision.destroy(handle);
        self.ai.unregister_entity(handle);
        self.pathfinder.cancel_for_entity(handle);
    }

    pub fn register_collision_callback(&mut self, callback: CollisionCallback) {
        self.collision.register_callback(callback);
    }

    pub fn drain_trigger_events(&mut self) -> Vec<TriggerEvent> {
        self.collision.drain_trigger_events()
    }

    // ---- AI (spec §4.6) ----

    pub fn register_behavior(&mut self, name: &str, prototype: Box<dyn Behavior>) {
        self.ai.register_behavior(name, prototype);
    }

    pub fn assign_behavior(&mut self, handle: EntityHandle, behavior_name: &str) {
        self.ai.register_entity(handle, behavior_name);
    }

    pub fn unassign_behavior(&mut self, handle: EntityHandle) {
        self.ai.unregister_entity(handle);
    }

    pub fn send_message_to_entity(&mut self, handle: EntityHandle, message: &str, immediate: bool) {
        self.ai.send_message_to_entity(handle, message, immediate);
    }

    pub fn broadcast_message(&mut self, message: &str, immediate: bool) {
        self.ai.broadcast_message(message, immediate);
    }

    /// State-transition boundary (e.g. level load, pause-menu entry):
    /// cancels every AI-assigned entity's in-flight path requests, then
    /// clears AI assignment state. The AI scheduler can't do this itself —
    /// it has no reference to the pathfinder, by design.
    pub fn prepare_for_state_transition(&mut self) {
        for handle in self.ai.assigned_handles() {
            self.pathfinder.cancel_for_entity(handle);
        }
        self.ai.prepare_for_state_transition();
    }

    // ---- Pathfinding (spec §4.7) ----

    pub fn request_path(
        &mut self,
        requester: EntityHandle,
        start: [f32; 2],
        goal: [f32; 2],
        priority: Priority,
        callback: impl FnOnce(crate::pathfinding::PathResult) + Send + 'static,
    ) -> RequestOutcome {
        self.pathfinder.request_path(requester, start, goal, priority, callback)
    }

    pub fn cancel_path_request(&mut self, id: u64) {
        self.pathfinder.cancel_request(id);
    }

    pub fn cancel_paths_for_entity(&mut self, handle: EntityHandle) {
        self.pathfinder.cancel_for_entity(handle);
    }

    /// World load signal (spec §6): rebuilds the pathfinder grid and every
    /// static collision body from the tile grid. Previously tracked static
    /// bodies (from an earlier `load_world`) are destroyed first.
    pub fn load_world(&mut self, origin: [f32; 2], width: u32, height: u32, cell_size: f32, kinds: Vec<TileKind>) {
        debug_assert_eq!(kinds.len(), (width * height) as usize);

        if let Some(old) = self.tiles.take() {
            for handle in old.bodies.into_values() {
                self.collision.destroy(handle);
            }
        }

        self.pathfinder
            .rebuild_grid(origin, width, height, |x, y| kinds[(y * width + x) as usize] == TileKind::Building);

        let mut tiles = WorldTiles {
            origin,
            width,
            height,
            cell_size,
            kinds,
            bodies: HashMap::new(),
        };

        for y in 0..height {
            for x in 0..width {
                self.instantiate_tile(&mut tiles, x, y);
            }
        }

        self.tiles = Some(tiles);
    }

    /// Tile change signal (spec §6): patches exactly the affected cell's
    /// static body and pathfinder state, without a full grid rebuild.
    pub fn on_tile_changed(&mut self, x: u32, y: u32, new_kind: TileKind) {
        let Some(mut tiles) = self.tiles.take() else {
            tracing::warn!("tile change received before any world was loaded, ignoring");
            return;
        };

        let idx = tiles.index(x, y);
        tiles.kinds[idx] = new_kind;

        if let Some(handle) = tiles.bodies.remove(&(x, y)) {
            self.collision.destroy(handle);
        }

        self.pathfinder.mark_tile_changed(x, y, new_kind == TileKind::Building);
        self.instantiate_tile(&mut tiles, x, y);

        self.tiles = Some(tiles);
    }

    fn instantiate_tile(&mut self, tiles: &mut WorldTiles, x: u32, y: u32) {
        let kind = tiles.kinds[tiles.index(x, y)];
        let center = tiles.cell_center(x, y);
        let half_size = [tiles.cell_size / 2.0, tiles.cell_size / 2.0];

        match kind {
            TileKind::Open => {}
            TileKind::Building => {
                let handle = self
                    .collision
                    .create_static_body(&self.store, center, half_size, 1, u32::MAX, false, 0);
                tiles.bodies.insert((x, y), handle);
            }
            TileKind::Water => {
                let handle = self
                    .collision
                    .create_static_body(&self.store, center, half_size, 1, u32::MAX, true, WATER_TRIGGER_TAG);
                tiles.bodies.insert((x, y), handle);
            }
            TileKind::SoftImpassable => {
                self.pathfinder.set_cell_weight(center, SOFT_IMPASSABLE_WEIGHT);
            }
        }
    }

    // ---- Per-frame driver (spec §2/§5) ----

    /// Runs one full tick: AI reads/executes/merges, collision
    /// drains-and-resolves, background sim advances, pathfinder drains a
    /// bounded batch of requests.
    pub fn step(&mut self, dt: f32) -> FrameMetrics {
        self.store.write().capture_last_positions();

        let cull_center = self.effective_reference_point();

        self.ai.update(&self.store, &self.collision, &self.pool, &self.arbitrator, dt);
        let metrics = self.collision.step(&self.store, dt, cull_center);
        self.background.update(
            &self.store,
            &self.pool,
            &self.arbitrator,
            cull_center,
            self.config.active_radius,
            self.config.background_radius,
            dt,
        );
        self.pathfinder.process_frame(&self.pool, dt);

        self.tick += 1;
        self.time += dt;
        metrics
    }

    /// Last tier-change counts observed, if the tick cadence landed on a
    /// reclassification this step. Kept separate from [`Engine::step`]'s
    /// return value so callers that don't care about it aren't forced to
    /// destructure a bigger tuple.
    pub fn force_tier_update(&mut self) -> TierChangeCounts {
        let point = self.effective_reference_point();
        self.store
            .write()
            .update_simulation_tiers(point, self.config.active_radius, self.config.background_radius)
    }

    pub fn snapshot(&self, alpha: f32) -> Snapshot {
        snapshot::build(&self.store.read(), self.tick, self.time, alpha)
    }

    /// Graceful shutdown: joins every worker thread. Dropping an `Engine`
    /// without calling this leaks nothing, but any in-flight batch is
    /// abandoned rather than awaited.
    pub fn shutdown(self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::behavior::{StandardBehavior, StandardKind};

    fn engine() -> Engine {
        Engine::new(crate::config::ConfigBuilder::new().thread_count(2).build(), 7).unwrap()
    }

    #[test]
    fn npc_created_then_stepped_becomes_visible_and_active() {
        let mut engine = engine();
        let handle = engine.create_npc([0.0, 0.0], [5.0, 5.0], 1, u32::MAX);
        engine.step(1.0 / 60.0);
        engine.force_tier_update();
        let snapshot = engine.snapshot(1.0);
        assert!(snapshot.entities.iter().any(|e| e.handle == handle));
        engine.shutdown();
    }

    #[test]
    fn load_world_walls_off_a_building_tile_from_pathing() {
        let mut engine = engine();
        let width = 5;
        // A wall along x==1 and y==1 encloses (4,4) away from (0,0), except
        // the single gap the wall test in pathfinding::mod.rs also leaves open.
        let kinds: Vec<TileKind> = (0..width * width)
            .map(|i| {
                let x = i % width;
                let y = i / width;
                if !(x == 4 && y == 4) && (x == 1 || y == 1) {
                    TileKind::Building
                } else {
                    TileKind::Open
                }
            })
            .collect();
        engine.load_world([0.0, 0.0], width as u32, width as u32, 32.0, kinds);

        let delivered = std::sync::Arc::new(std::sync::Mutex::new(None));
        let d = delivered.clone();
        engine.request_path(
            EntityHandle::new(0, 0),
            [2.5, 2.5],
            [2.5 + 32.0 * 2.0, 2.5],
            Priority::Normal,
            move |result| *d.lock().unwrap() = Some(result),
        );
        engine.step(1.0 / 60.0);
        let result = delivered.lock().unwrap().take().unwrap();
        assert!(result.path.is_empty(), "wall should block this route entirely");
        engine.shutdown();
    }

    #[test]
    fn destroy_cancels_pending_ai_and_path_state() {
        let mut engine = engine();
        let handle = engine.create_npc([0.0, 0.0], [5.0, 5.0], 1, u32::MAX);
        engine.register_behavior("idle", Box::new(StandardBehavior::new(StandardKind::Idle { sway: false })));
        engine.assign_behavior(handle, "idle");
        engine.step(1.0 / 60.0);
        assert!(engine.ai.is_assigned(handle));

        engine.destroy(handle);
        assert!(!engine.ai.is_assigned(handle));
        engine.shutdown();
    }

    #[test]
    fn prepare_for_state_transition_clears_ai_assignments() {
        let mut engine = engine();
        let handle = engine.create_npc([0.0, 0.0], [5.0, 5.0], 1, u32::MAX);
        engine.register_behavior("idle", Box::new(StandardBehavior::new(StandardKind::Idle { sway: false })));
        engine.assign_behavior(handle, "idle");
        engine.step(1.0 / 60.0);
        assert!(engine.ai.is_assigned(handle));

        engine.prepare_for_state_transition();
        assert!(!engine.ai.is_assigned(handle));
        engine.shutdown();
    }
}
