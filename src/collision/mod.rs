//! Collision detection/resolution engine (spec §4.4-4.5).
//!
//! Owns the MPSC command queue entities are created/destroyed through, the
//! static/dynamic spatial hashes, the coarse-cell static-region cache, and
//! the per-frame broad+narrow+resolve pipeline. `step` is the single entry
//! point the root engine drives once per tick; `apply_batched_kinematic_updates`
//! is the AI scheduler's merge hook, called separately under its own lock
//! acquisition.

pub mod simd;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;

use parking_lot::RwLock;

use crate::entity_store::{BodyType, ColdData, EntityStore, HotData, StoreCommand};
use crate::events::{CollisionCallback, CollisionInfo, EventBus, TriggerEvent, TriggerPhase};
use crate::handle::EntityHandle;
use crate::spatial_hash::{coarse_cell_bounds, coarse_coord_of, Aabb, SpatialHash};

/// Deep-penetration threshold (px) above which a fast-moving pair's normal
/// is derived from relative velocity instead of AABB centers.
const DEEP_PENETRATION_PX: f32 = 10.0;
/// Speed (px/s) above which the velocity-direction normal kicks in.
const FAST_VELOCITY_PX_S: f32 = 250.0;
/// Overlap amounts within this of each other prefer the Y axis, avoiding
/// corner ambiguity on near-diagonal penetrations.
const AXIS_PREFERENCE_EPSILON: f32 = 0.01;
/// Broadphase query bounds are expanded by this on each side so a pair
/// approaching at speed is found a frame before it actually overlaps.
const BROADPHASE_EPSILON: f32 = 0.5;
/// Deterministic tangential nudge applied to NPC-vs-NPC overlaps so stuck
/// clumps slide apart instead of locking.
const TANGENTIAL_SLIDE_IMPULSE: f32 = 2.0;

/// Tunables the collision engine needs from [`crate::config::EngineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct CollisionConfig {
    pub fine_cell: f32,
    pub coarse_cell: f32,
    pub culling_buffer: f32,
    pub cache_eviction_interval: u32,
    pub cache_stale_threshold: u32,
    pub trigger_cooldown_sec: f32,
    pub velocity_clamp: f32,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            fine_cell: crate::spatial_hash::DEFAULT_FINE_CELL,
            coarse_cell: crate::spatial_hash::DEFAULT_COARSE_CELL,
            culling_buffer: 2_000.0,
            cache_eviction_interval: 120,
            cache_stale_threshold: 3,
            trigger_cooldown_sec: 0.0,
            velocity_clamp: 300.0,
        }
    }
}

/// Counts from a single frame's cull + broadphase, handed back for metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMetrics {
    pub static_count: u32,
    pub movable_count: u32,
    pub broadphase_pairs: u32,
    pub collisions: u32,
}

/// A kinematic position/velocity write produced by an AI behavior batch.
#[derive(Debug, Clone, Copy)]
pub struct KinematicUpdate {
    pub handle: EntityHandle,
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub active: bool,
}

struct RegionCacheEntry {
    indices: Vec<u32>,
    valid: bool,
    last_access_frame: u64,
    stale_count: u32,
}

fn aabbs_overlap(a: Aabb, b: Aabb) -> bool {
    let overlap = simd::axis_overlap(a.0, a.1, b.0, b.1);
    overlap[0] >= 0.0 && overlap[1] >= 0.0
}

pub struct CollisionEngine {
    config: CollisionConfig,
    command_tx: mpsc::Sender<StoreCommand>,
    command_rx: mpsc::Receiver<StoreCommand>,

    static_hash: SpatialHash,
    static_coarse_grid: SpatialHash,
    dynamic_hash: SpatialHash,
    region_cache: HashMap<(i16, i16), RegionCacheEntry>,
    static_hash_dirty: bool,
    static_grid_dirty: bool,

    active_static: Vec<u32>,
    active_movable: Vec<u32>,

    frame: u64,
    callbacks: Vec<CollisionCallback>,
    events: EventBus,
    player_handle: Option<EntityHandle>,

    /// Currently-open trigger pairs, keyed by (player, trigger) -> trigger_tag.
    active_triggers: HashMap<(EntityHandle, EntityHandle), u8>,
    /// Seconds remaining before a just-exited pair may re-enter.
    trigger_cooldowns: HashMap<(EntityHandle, EntityHandle), f32>,
}

impl CollisionEngine {
    pub fn new(config: CollisionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel();
        Self {
            static_hash: SpatialHash::new(config.fine_cell),
            static_coarse_grid: SpatialHash::new(config.coarse_cell),
            dynamic_hash: SpatialHash::new(config.fine_cell),
            region_cache: HashMap::new(),
            static_hash_dirty: false,
            static_grid_dirty: false,
            active_static: Vec::new(),
            active_movable: Vec::new(),
            frame: 0,
            callbacks: Vec::new(),
            events: EventBus::default(),
            player_handle: None,
            active_triggers: HashMap::new(),
            trigger_cooldowns: HashMap::new(),
            config,
            command_tx,
            command_rx,
        }
    }

    pub fn set_player_handle(&mut self, handle: Option<EntityHandle>) {
        self.player_handle = handle;
    }

    pub fn register_callback(&mut self, callback: CollisionCallback) {
        self.callbacks.push(callback);
    }

    pub fn drain_trigger_events(&mut self) -> Vec<TriggerEvent> {
        self.events.drain_triggers()
    }

    pub fn active_static_count(&self) -> usize {
        self.active_static.len()
    }

    pub fn active_movable_count(&self) -> usize {
        self.active_movable.len()
    }

    /// Reserves a handle synchronously and queues a `Create` command; the
    /// entity becomes visible in the store on the next `step`.
    pub fn create_npc(
        &self,
        store: &RwLock<EntityStore>,
        pos: [f32; 2],
        half_size: [f32; 2],
        body_type: BodyType,
        layer_mask: u32,
        collides_with: u32,
    ) -> EntityHandle {
        let handle = store.write().reserve_handle();
        let hot = HotData {
            position: pos,
            half_size,
            body_type,
            layer_mask,
            collides_with,
            ..Default::default()
        };
        let _ = self.command_tx.send(StoreCommand::Create {
            handle,
            hot,
            cold: ColdData::default(),
        });
        handle
    }

    pub fn create_static_body(
        &self,
        store: &RwLock<EntityStore>,
        pos: [f32; 2],
        half_size: [f32; 2],
        layer_mask: u32,
        collides_with: u32,
        is_trigger: bool,
        trigger_tag: u8,
    ) -> EntityHandle {
        let handle = store.write().reserve_handle();
        let hot = HotData {
            position: pos,
            half_size,
            body_type: BodyType::Static,
            layer_mask,
            collides_with,
            is_trigger,
            trigger_tag,
            ..Default::default()
        };
        let _ = self.command_tx.send(StoreCommand::Create {
            handle,
            hot,
            cold: ColdData::default(),
        });
        handle
    }

    pub fn destroy(&self, handle: EntityHandle) {
        let _ = self.command_tx.send(StoreCommand::Destroy(handle));
    }

    /// AI's merge hook: acquires the store's write lock exactly once,
    /// regardless of how many batches fed `updates`, and writes into every
    /// Kinematic body's slot (spec §4.5's O(1)-lock-acquisition guarantee).
    pub fn apply_batched_kinematic_updates(&self, store: &RwLock<EntityStore>, updates: &[KinematicUpdate]) {
        let mut guard = store.write();
        for update in updates {
            if let Some(index) = guard.get_index(update.handle) {
                if guard.hot(index).body_type == BodyType::Kinematic {
                    let hot = guard.hot_mut(index);
                    hot.position = update.position;
                    hot.velocity = update.velocity;
                    hot.active = update.active;
                    hot.aabb_dirty = true;
                }
            }
        }
    }

    /// Runs the full per-frame pipeline (spec §4.5, steps 1-12).
    pub fn step(&mut self, store: &RwLock<EntityStore>, dt: f32, cull_center: [f32; 2]) -> FrameMetrics {
        self.frame += 1;

        self.process_commands(store);
        self.rebuild_static_if_dirty(store);
        let (static_count, movable_count) = self.cull(store, cull_center);
        self.sync_dynamic_hash(store);
        self.update_static_cache(store);
        if self.frame % self.config.cache_eviction_interval.max(1) as u64 == 0 {
            self.evict_stale_cache(cull_center);
        }

        let pairs = self.broadphase(store);
        let collisions = self.narrowphase(store, &pairs);
        self.resolve(store, &collisions);
        self.dispatch_callbacks(&collisions);
        self.sync_entities(store, &collisions);
        self.update_triggers(store, &collisions, dt);

        FrameMetrics {
            static_count,
            movable_count,
            broadphase_pairs: pairs.len() as u32,
            collisions: collisions.len() as u32,
        }
    }

    /// Step 1. Any destroy is treated as static-invalidating: a swap-remove
    /// can move an unrelated static body into the destroyed slot's former
    /// dense index, which would otherwise silently stale the region cache.
    fn process_commands(&mut self, store: &RwLock<EntityStore>) {
        let mut guard = store.write();
        while let Ok(command) = self.command_rx.try_recv() {
            let touches_static = match &command {
                StoreCommand::Create { hot, .. } => hot.body_type == BodyType::Static,
                StoreCommand::Destroy(_) => true,
                StoreCommand::ModifyHot { .. } => false,
            };
            guard.apply_command(command);
            if touches_static {
                self.static_hash_dirty = true;
                self.static_grid_dirty = true;
            }
        }
    }

    /// Step 2.
    fn rebuild_static_if_dirty(&mut self, store: &RwLock<EntityStore>) {
        if !self.static_hash_dirty && !self.static_grid_dirty {
            return;
        }
        let guard = store.read();
        self.static_hash.clear();
        self.static_coarse_grid.clear();
        for index in guard.all_indices() {
            let hot = guard.hot(index);
            if hot.body_type == BodyType::Static {
                self.static_hash.insert(index, (hot.aabb_min, hot.aabb_max));
                self.static_coarse_grid.insert(index, (hot.aabb_min, hot.aabb_max));
            }
        }
        self.region_cache.clear();
        self.static_hash_dirty = false;
        self.static_grid_dirty = false;
    }

    /// Step 3 (`buildActiveIndices`).
    fn cull(&mut self, store: &RwLock<EntityStore>, center: [f32; 2]) -> (u32, u32) {
        let buffer = self.config.culling_buffer;
        let area: Aabb = (
            [center[0] - buffer, center[1] - buffer],
            [center[0] + buffer, center[1] + buffer],
        );

        self.active_static.clear();
        self.active_movable.clear();

        let guard = store.read();

        let mut candidates = Vec::new();
        self.static_coarse_grid.query_region(area, &mut candidates);
        candidates.sort_unstable();
        candidates.dedup();
        for index in candidates {
            let hot = guard.hot(index);
            if aabbs_overlap((hot.aabb_min, hot.aabb_max), area) {
                self.active_static.push(index);
            }
        }

        for index in guard.all_indices() {
            let hot = guard.hot(index);
            if hot.active
                && matches!(hot.body_type, BodyType::Dynamic | BodyType::Kinematic)
                && aabbs_overlap((hot.aabb_min, hot.aabb_max), area)
            {
                self.active_movable.push(index);
            }
        }

        (self.active_static.len() as u32, self.active_movable.len() as u32)
    }

    /// Step 4.
    fn sync_dynamic_hash(&mut self, store: &RwLock<EntityStore>) {
        self.dynamic_hash.clear();
        let mut guard = store.write();
        for &index in &self.active_movable {
            if guard.hot(index).aabb_dirty {
                guard.hot_mut(index).refresh_aabb();
            }
            let hot = guard.hot(index);
            self.dynamic_hash.insert(index, (hot.aabb_min, hot.aabb_max));
        }
    }

    /// Step 5.
    fn update_static_cache(&mut self, store: &RwLock<EntityStore>) {
        let coarse_cell = self.config.coarse_cell;
        let mut guard = store.write();
        for &index in &self.active_movable {
            let hot = guard.hot(index);
            let current = coarse_coord_of((hot.aabb_min, hot.aabb_max), coarse_cell);
            let stale = self
                .region_cache
                .get(&current)
                .map(|entry| !entry.valid)
                .unwrap_or(true);

            if current != hot.coarse_cell || stale {
                let bounds = coarse_cell_bounds(current.0, current.1, coarse_cell);
                let mut indices = Vec::new();
                self.static_hash.query_region(bounds, &mut indices);
                indices.sort_unstable();
                indices.dedup();
                self.region_cache.insert(
                    current,
                    RegionCacheEntry {
                        indices,
                        valid: true,
                        last_access_frame: self.frame,
                        stale_count: 0,
                    },
                );
            } else if let Some(entry) = self.region_cache.get_mut(&current) {
                entry.last_access_frame = self.frame;
            }
            guard.hot_mut(index).coarse_cell = current;
        }
    }

    /// Step 6. A cell is a stale-count candidate if it's outside 3x the
    /// culling buffer *or* hasn't been touched by `update_static_cache` in
    /// several eviction passes (a body could sit inside the horizon forever
    /// without ever landing in this particular cell again).
    fn evict_stale_cache(&mut self, center: [f32; 2]) {
        let horizon = self.config.culling_buffer * 3.0;
        let coarse_cell = self.config.coarse_cell;
        let threshold = self.config.cache_stale_threshold;
        let frame = self.frame;
        let staleness_frames = self.config.cache_eviction_interval.max(1) as u64 * 4;
        self.region_cache.retain(|&(cx, cy), entry| {
            let bounds = coarse_cell_bounds(cx, cy, coarse_cell);
            let cell_center = [
                (bounds.0[0] + bounds.1[0]) * 0.5,
                (bounds.0[1] + bounds.1[1]) * 0.5,
            ];
            let dx = cell_center[0] - center[0];
            let dy = cell_center[1] - center[1];
            let outside_horizon = (dx * dx + dy * dy).sqrt() > horizon;
            let unused_recently = frame.saturating_sub(entry.last_access_frame) > staleness_frames;
            if outside_horizon || unused_recently {
                entry.stale_count += 1;
            } else {
                entry.stale_count = 0;
            }
            entry.stale_count <= threshold
        });
    }

    /// Step 7. Candidate lists are filtered through [`simd::layer_filter4`]
    /// four at a time, the narrow "SIMD-available" seam this crate fills
    /// with a portable scalar backend.
    fn broadphase(&self, store: &RwLock<EntityStore>) -> Vec<(u32, u32)> {
        let guard = store.read();
        let mut pairs = Vec::new();
        let mut seen = HashSet::new();
        let mut buf = Vec::new();

        for &a in &self.active_movable {
            let hot_a = guard.hot(a);
            let expand = BROADPHASE_EPSILON;
            let min = [hot_a.aabb_min[0] - expand, hot_a.aabb_min[1] - expand];
            let max = [hot_a.aabb_max[0] + expand, hot_a.aabb_max[1] + expand];

            buf.clear();
            self.dynamic_hash.query_region_bounds(min, max, &mut buf);
            collect_layer_filtered_pairs(&guard, a, hot_a, &buf, &mut pairs, Some(&mut seen));

            buf.clear();
            match self.region_cache.get(&hot_a.coarse_cell) {
                Some(entry) if entry.valid => buf.extend_from_slice(&entry.indices),
                _ => self.static_hash.query_region_bounds(min, max, &mut buf),
            }
            collect_layer_filtered_pairs(&guard, a, hot_a, &buf, &mut pairs, None);
        }

        pairs
    }

    /// Step 8.
    fn narrowphase(&self, store: &RwLock<EntityStore>, pairs: &[(u32, u32)]) -> Vec<CollisionInfo> {
        let guard = store.read();
        let mut out = Vec::with_capacity(pairs.len());

        for &(a, b) in pairs {
            let hot_a = guard.hot(a);
            let hot_b = guard.hot(b);
            let overlap = simd::axis_overlap(hot_a.aabb_min, hot_a.aabb_max, hot_b.aabb_min, hot_b.aabb_max);
            if overlap[0] < 0.0 || overlap[1] < 0.0 {
                continue;
            }

            let axis = if (overlap[0] - overlap[1]).abs() < AXIS_PREFERENCE_EPSILON || overlap[1] < overlap[0] {
                1
            } else {
                0
            };
            let penetration = overlap[axis];

            let speed_a = (hot_a.velocity[0].powi(2) + hot_a.velocity[1].powi(2)).sqrt();
            let speed_b = (hot_b.velocity[0].powi(2) + hot_b.velocity[1].powi(2)).sqrt();
            let use_velocity_normal = penetration > DEEP_PENETRATION_PX && speed_a.max(speed_b) > FAST_VELOCITY_PX_S;

            let normal = if use_velocity_normal {
                let rel = [hot_b.velocity[0] - hot_a.velocity[0], hot_b.velocity[1] - hot_a.velocity[1]];
                let mag = (rel[0].powi(2) + rel[1].powi(2)).sqrt();
                if mag > f32::EPSILON {
                    [rel[0] / mag, rel[1] / mag]
                } else {
                    center_normal(hot_a, hot_b, axis)
                }
            } else {
                center_normal(hot_a, hot_b, axis)
            };

            out.push(CollisionInfo {
                entity_a: guard.handle_at(a),
                entity_b: guard.handle_at(b),
                index_a: a,
                index_b: b,
                normal,
                penetration,
                is_trigger: hot_a.is_trigger || hot_b.is_trigger,
            });
        }

        out
    }

    /// Step 9. `normal` points from `entity_a` toward `entity_b`.
    fn resolve(&self, store: &RwLock<EntityStore>, collisions: &[CollisionInfo]) {
        let mut guard = store.write();
        for info in collisions {
            if info.is_trigger {
                continue;
            }

            let a_static = guard.hot(info.index_a).body_type == BodyType::Static;
            let b_static = guard.hot(info.index_b).body_type == BodyType::Static;
            let normal = info.normal;

            if !a_static && !b_static {
                let half = info.penetration * 0.5;
                let pa = guard.hot_mut(info.index_a).position;
                guard.hot_mut(info.index_a).position = [pa[0] + normal[0] * half, pa[1] + normal[1] * half];
                let pb = guard.hot_mut(info.index_b).position;
                guard.hot_mut(info.index_b).position = [pb[0] - normal[0] * half, pb[1] - normal[1] * half];
            } else if !a_static {
                let pa = guard.hot_mut(info.index_a).position;
                guard.hot_mut(info.index_a).position =
                    [pa[0] + normal[0] * info.penetration, pa[1] + normal[1] * info.penetration];
            } else if !b_static {
                let pb = guard.hot_mut(info.index_b).position;
                guard.hot_mut(info.index_b).position =
                    [pb[0] - normal[0] * info.penetration, pb[1] - normal[1] * info.penetration];
            }

            let restitution_a = guard.cold(info.index_a).restitution;
            let restitution_b = guard.cold(info.index_b).restitution;
            damp_velocity_into_collision(&mut guard, info.index_a, normal, 1.0, a_static, b_static, restitution_a);
            damp_velocity_into_collision(&mut guard, info.index_b, normal, -1.0, b_static, a_static, restitution_b);

            if !a_static && !b_static {
                let a_handle = guard.handle_at(info.index_a);
                let b_handle = guard.handle_at(info.index_b);
                let neither_is_player = self
                    .player_handle
                    .map_or(true, |player| player != a_handle && player != b_handle);
                if neither_is_player {
                    let tangent = [-normal[1], normal[0]];
                    let (push_a, push_b) = if a_handle < b_handle { (1.0, -1.0) } else { (-1.0, 1.0) };
                    let va = guard.hot(info.index_a).velocity;
                    guard.hot_mut(info.index_a).velocity = [
                        va[0] + tangent[0] * TANGENTIAL_SLIDE_IMPULSE * push_a,
                        va[1] + tangent[1] * TANGENTIAL_SLIDE_IMPULSE * push_a,
                    ];
                    let vb = guard.hot(info.index_b).velocity;
                    guard.hot_mut(info.index_b).velocity = [
                        vb[0] + tangent[0] * TANGENTIAL_SLIDE_IMPULSE * push_b,
                        vb[1] + tangent[1] * TANGENTIAL_SLIDE_IMPULSE * push_b,
                    ];
                }
            }

            for index in [info.index_a, info.index_b] {
                let v = guard.hot(index).velocity;
                let speed = (v[0].powi(2) + v[1].powi(2)).sqrt();
                if speed > self.config.velocity_clamp {
                    let scale = self.config.velocity_clamp / speed;
                    guard.hot_mut(index).velocity = [v[0] * scale, v[1] * scale];
                }
            }
        }
    }

    /// Step 10.
    fn dispatch_callbacks(&self, collisions: &[CollisionInfo]) {
        for info in collisions {
            for callback in &self.callbacks {
                callback(info);
            }
        }
    }

    /// Step 11.
    fn sync_entities(&self, store: &RwLock<EntityStore>, collisions: &[CollisionInfo]) {
        let guard = store.read();
        let mut touched = HashSet::new();
        for info in collisions {
            if !info.is_trigger {
                touched.insert(info.index_a);
                touched.insert(info.index_b);
            }
        }
        for index in touched {
            let hot = guard.hot(index);
            if let Some(weak) = &guard.cold(index).back_ref {
                if let Some(sink) = weak.upgrade() {
                    sink.on_resolved(hot.position, hot.velocity);
                }
            }
        }
    }

    /// Step 12.
    fn update_triggers(&mut self, store: &RwLock<EntityStore>, collisions: &[CollisionInfo], dt: f32) {
        let guard = store.read();
        let mut observed = HashSet::new();

        for info in collisions {
            if !info.is_trigger {
                continue;
            }
            let hot_a = guard.hot(info.index_a);
            let hot_b = guard.hot(info.index_b);
            let (player_index, trigger_index) = if hot_a.is_trigger {
                (info.index_b, info.index_a)
            } else {
                (info.index_a, info.index_b)
            };
            let pair = (guard.handle_at(player_index), guard.handle_at(trigger_index));
            observed.insert(pair);

            if !self.active_triggers.contains_key(&pair) {
                let cooldown = self.trigger_cooldowns.get(&pair).copied().unwrap_or(0.0);
                if cooldown <= 0.0 {
                    let trigger_tag = guard.hot(trigger_index).trigger_tag;
                    self.active_triggers.insert(pair, trigger_tag);
                    self.events.push_trigger(TriggerEvent {
                        player: pair.0,
                        trigger: pair.1,
                        trigger_tag,
                        player_pos: guard.hot(player_index).position,
                        phase: TriggerPhase::Enter,
                    });
                }
            }
        }

        let exited: Vec<_> = self
            .active_triggers
            .iter()
            .filter(|(pair, _)| !observed.contains(*pair))
            .map(|(&pair, &tag)| (pair, tag))
            .collect();
        for (pair, trigger_tag) in exited {
            self.active_triggers.remove(&pair);
            self.trigger_cooldowns.insert(pair, self.config.trigger_cooldown_sec);
            let player_pos = guard.get_index(pair.0).map(|i| guard.hot(i).position).unwrap_or([0.0, 0.0]);
            self.events.push_trigger(TriggerEvent {
                player: pair.0,
                trigger: pair.1,
                trigger_tag,
                player_pos,
                phase: TriggerPhase::Exit,
            });
        }

        self.trigger_cooldowns.retain(|_, remaining| {
            *remaining -= dt;
            *remaining > 0.0
        });
    }
}

fn center_normal(hot_a: &HotData, hot_b: &HotData, axis: usize) -> [f32; 2] {
    let center_a = [
        (hot_a.aabb_min[0] + hot_a.aabb_max[0]) * 0.5,
        (hot_a.aabb_min[1] + hot_a.aabb_max[1]) * 0.5,
    ];
    let center_b = [
        (hot_b.aabb_min[0] + hot_b.aabb_max[0]) * 0.5,
        (hot_b.aabb_min[1] + hot_b.aabb_max[1]) * 0.5,
    ];
    let mut normal = [0.0f32; 2];
    normal[axis] = if center_a[axis] <= center_b[axis] { -1.0 } else { 1.0 };
    normal
}

fn damp_velocity_into_collision(
    guard: &mut EntityStore,
    index: u32,
    normal: [f32; 2],
    sign: f32,
    self_static: bool,
    other_static: bool,
    restitution: f32,
) {
    if self_static {
        return;
    }
    let n = [normal[0] * sign, normal[1] * sign];
    let velocity = guard.hot(index).velocity;
    let vn = velocity[0] * n[0] + velocity[1] * n[1];
    if vn <= 0.0 {
        return;
    }
    let scale = if other_static { 1.0 } else { 1.0 + restitution };
    guard.hot_mut(index).velocity = [velocity[0] - n[0] * vn * scale, velocity[1] - n[1] * vn * scale];
}

/// Filters `candidates` against `hot_a`'s layer mask four at a time and
/// appends surviving pairs. `seen` canonicalizes and dedupes
/// movable-vs-movable pairs; `None` means movable-vs-static, which is
/// already directional and never needs dedup.
fn collect_layer_filtered_pairs(
    guard: &EntityStore,
    a: u32,
    hot_a: &HotData,
    candidates: &[u32],
    pairs: &mut Vec<(u32, u32)>,
    mut seen: Option<&mut HashSet<(u32, u32)>>,
) {
    let filtered: Vec<u32> = candidates.iter().copied().filter(|&b| b != a).collect();

    let mut i = 0;
    while i < filtered.len() {
        let count = (filtered.len() - i).min(4);
        let mut collides_with = [0u32; 4];
        let mut layers = [0u32; 4];
        for lane in 0..count {
            let b = filtered[i + lane];
            collides_with[lane] = hot_a.collides_with;
            layers[lane] = guard.hot(b).layer_mask;
        }
        let mask = simd::layer_filter4(collides_with, layers, count);
        for lane in 0..count {
            if mask.is_set(lane) {
                let b = filtered[i + lane];
                match seen.as_deref_mut() {
                    Some(seen) => {
                        let pair = if a < b { (a, b) } else { (b, a) };
                        if seen.insert(pair) {
                            pairs.push(pair);
                        }
                    }
                    None => pairs.push((a, b)),
                }
            }
        }
        i += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_store() -> (CollisionEngine, RwLock<EntityStore>) {
        (CollisionEngine::new(CollisionConfig::default()), RwLock::new(EntityStore::new()))
    }

    /// Entities are born Hibernated; drive the real tier sweep so `active`
    /// stays true the same way it would outside tests.
    fn make_active(store: &RwLock<EntityStore>, _handle: EntityHandle) {
        store.write().update_simulation_tiers([0.0, 0.0], f32::MAX, f32::MAX);
    }

    #[test]
    fn two_overlapping_dynamic_bodies_separate_along_smaller_axis() {
        let (mut engine, store) = engine_with_store();
        let a = engine.create_npc(&store, [0.0, 0.0], [5.0, 5.0], BodyType::Dynamic, 1, u32::MAX);
        let b = engine.create_npc(&store, [8.0, 0.0], [5.0, 5.0], BodyType::Dynamic, 1, u32::MAX);
        make_active(&store, a);
        make_active(&store, b);

        engine.step(&store, 1.0 / 60.0, [0.0, 0.0]);

        let guard = store.read();
        let idx_a = guard.get_index(a).unwrap();
        let idx_b = guard.get_index(b).unwrap();
        let dist = (guard.hot(idx_b).position[0] - guard.hot(idx_a).position[0]).abs();
        assert!(dist > 8.0, "bodies should have separated, dist={dist}");
    }

    #[test]
    fn dynamic_body_does_not_penetrate_static_wall() {
        let (mut engine, store) = engine_with_store();
        let wall = engine.create_static_body(&store, [20.0, 0.0], [5.0, 100.0], 1, u32::MAX, false, 0);
        let npc = engine.create_npc(&store, [18.0, 0.0], [5.0, 5.0], BodyType::Dynamic, 1, u32::MAX);
        make_active(&store, wall);
        make_active(&store, npc);

        engine.step(&store, 1.0 / 60.0, [0.0, 0.0]);

        let guard = store.read();
        let idx_npc = guard.get_index(npc).unwrap();
        assert!(guard.hot(idx_npc).position[0] < 15.0);
    }

    #[test]
    fn trigger_overlap_emits_enter_then_exit() {
        let (mut engine, store) = engine_with_store();
        let trigger = engine.create_static_body(&store, [0.0, 0.0], [50.0, 50.0], 1, u32::MAX, true, 7);
        let player = engine.create_npc(&store, [0.0, 0.0], [5.0, 5.0], BodyType::Dynamic, 1, u32::MAX);
        engine.set_player_handle(Some(player));
        make_active(&store, trigger);
        make_active(&store, player);

        engine.step(&store, 1.0 / 60.0, [0.0, 0.0]);
        let events = engine.drain_trigger_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, TriggerPhase::Enter);
        assert_eq!(events[0].trigger_tag, 7);

        // Move the player out, then step again.
        {
            let mut guard = store.write();
            let idx = guard.get_index(player).unwrap();
            guard.hot_mut(idx).position = [1_000.0, 1_000.0];
            guard.hot_mut(idx).aabb_dirty = true;
        }
        engine.step(&store, 1.0 / 60.0, [0.0, 0.0]);
        let events = engine.drain_trigger_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, TriggerPhase::Exit);
    }

    #[test]
    fn destroyed_entity_stops_appearing_in_active_lists() {
        let (mut engine, store) = engine_with_store();
        let a = engine.create_npc(&store, [0.0, 0.0], [5.0, 5.0], BodyType::Dynamic, 1, u32::MAX);
        make_active(&store, a);
        engine.step(&store, 1.0 / 60.0, [0.0, 0.0]);
        assert_eq!(engine.active_movable_count(), 1);

        engine.destroy(a);
        engine.step(&store, 1.0 / 60.0, [0.0, 0.0]);
        assert_eq!(engine.active_movable_count(), 0);
        assert!(store.read().get_index(a).is_none());
    }

    #[test]
    fn kinematic_merge_ignores_non_kinematic_handles() {
        let (mut engine, store) = engine_with_store();
        let kinematic = engine.create_npc(&store, [0.0, 0.0], [5.0, 5.0], BodyType::Kinematic, 1, u32::MAX);
        let dynamic = engine.create_npc(&store, [0.0, 0.0], [5.0, 5.0], BodyType::Dynamic, 1, u32::MAX);
        engine.step(&store, 1.0 / 60.0, [0.0, 0.0]); // flush both creates

        engine.apply_batched_kinematic_updates(
            &store,
            &[
                KinematicUpdate {
                    handle: kinematic,
                    position: [999.0, 999.0],
                    velocity: [0.0, 0.0],
                    active: true,
                },
                KinematicUpdate {
                    handle: dynamic,
                    position: [999.0, 999.0],
                    velocity: [0.0, 0.0],
                    active: true,
                },
            ],
        );

        let guard = store.read();
        let idx_kinematic = guard.get_index(kinematic).unwrap();
        let idx_dynamic = guard.get_index(dynamic).unwrap();
        assert_eq!(guard.hot(idx_kinematic).position, [999.0, 999.0]);
        assert_ne!(guard.hot(idx_dynamic).position, [999.0, 999.0]);
    }
}
