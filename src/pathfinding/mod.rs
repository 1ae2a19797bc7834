//! Pathfinder Service (spec §4.7): lock-free request submission, a
//! four-band priority scheduler, a TTL'd path cache, and grid A*, bound
//! together behind one per-frame `process_frame` call.
//!
//! Submission is decoupled from processing by the ring buffer so a caller
//! never blocks on the scheduler's internal state; processing itself runs
//! on the main thread once per tick (the "bounded number of requests per
//! frame" step in the data-flow list), with each resolved path's callback
//! posted to the shared worker pool — literally "post the callback to the
//! worker pool" per spec, rather than invoking it inline.

pub mod astar;
pub mod cache;
pub mod grid;
pub mod priority;
pub mod ring_buffer;

use std::collections::{HashMap, HashSet};

use crate::handle::EntityHandle;
use crate::worker_pool::{Priority, WorkerPool};

use cache::{PathCache, PathKey};
use grid::PathGrid;
use priority::{PriorityScheduler, SpatialPriorityTracker, SpatialZone, ZoneConfig};

/// One queued path request. Cheap to move through the ring buffer; the
/// associated callback lives separately (see [`PathfinderService::callbacks`]).
#[derive(Debug, Clone, Copy)]
pub struct PathRequest {
    pub id: u64,
    pub requester: EntityHandle,
    pub start: [f32; 2],
    pub goal: [f32; 2],
    pub priority: Priority,
    pub submitted_frame: u64,
}

/// Delivered to a request's callback once resolved (spec's "empty path" on
/// failure; `from_cache` is exposed for the cache-hit test scenario).
#[derive(Debug, Clone)]
pub struct PathResult {
    pub request_id: u64,
    pub path: Vec<[f32; 2]>,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Queued(u64),
    /// Ring buffer is full; caller should back off and retry next frame.
    Overflow,
}

/// Tunables the pathfinder needs from [`crate::config::EngineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct PathfinderConfig {
    pub ring_buffer_capacity: usize,
    pub max_paths_per_frame: u32,
    pub path_cache_ttl_sec: f32,
    pub allow_diagonal: bool,
    pub max_iterations: u32,
    pub fairness_quota: u32,
    pub cell_size: f32,
    pub zones: ZoneConfig,
}

impl Default for PathfinderConfig {
    fn default() -> Self {
        Self {
            ring_buffer_capacity: 256,
            max_paths_per_frame: 5,
            path_cache_ttl_sec: 5.0,
            allow_diagonal: true,
            max_iterations: 20_000,
            fairness_quota: 2,
            cell_size: 32.0,
            zones: ZoneConfig::default(),
        }
    }
}

/// Stats from a single `process_frame` call, for metrics/tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub processed: u32,
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub cancelled: u32,
}

type PathCallback = Box<dyn FnOnce(PathResult) + Send>;

pub struct PathfinderService {
    config: PathfinderConfig,
    producer: ring_buffer::Producer<PathRequest>,
    consumer: ring_buffer::Consumer<PathRequest>,
    scheduler: PriorityScheduler,
    grid: PathGrid,
    cache: PathCache,
    zone_tracker: SpatialPriorityTracker,
    callbacks: HashMap<u64, PathCallback>,
    requests_by_entity: HashMap<EntityHandle, HashSet<u64>>,
    cancelled: HashSet<u64>,
    next_request_id: u64,
    frame: u64,
    elapsed_seconds: f32,
}

impl PathfinderService {
    pub fn new(config: PathfinderConfig) -> Self {
        let (producer, consumer) = ring_buffer::channel(config.ring_buffer_capacity);
        let zone_tracker = SpatialPriorityTracker::new(config.zones);
        Self {
            scheduler: PriorityScheduler::new(config.fairness_quota),
            grid: PathGrid::new(config.cell_size),
            cache: PathCache::new(),
            zone_tracker,
            callbacks: HashMap::new(),
            requests_by_entity: HashMap::new(),
            cancelled: HashSet::new(),
            next_request_id: 0,
            frame: 0,
            elapsed_seconds: 0.0,
            config,
            producer,
            consumer,
        }
    }

    pub fn is_grid_ready(&self) -> bool {
        self.grid.is_ready()
    }

    pub fn cached_path_count(&self) -> usize {
        self.cache.len()
    }

    pub fn queued_request_count(&self) -> usize {
        self.scheduler.len()
    }

    /// World-load handler: rebuilds the walkability grid and flushes the
    /// cache. Already-queued requests are unaffected and will simply run
    /// against the new grid the next time they're drained, which satisfies
    /// "in-flight requests are requeued against the new grid" without an
    /// explicit requeue step.
    pub fn rebuild_grid(&mut self, origin: [f32; 2], width: u32, height: u32, impassable: impl FnMut(u32, u32) -> bool) {
        self.grid.rebuild(origin, width, height, impassable);
        self.cache.clear();
    }

    /// Tile-change handler. A tile turning impassable can invalidate any
    /// cached path that might have crossed it, so the whole cache is
    /// flushed conservatively; a tile turning passable only ever makes
    /// existing cached paths suboptimal, never wrong, so the cache is left
    /// alone.
    pub fn mark_tile_changed(&mut self, x: u32, y: u32, impassable: bool) {
        self.grid.set_tile(x, y, impassable);
        if impassable {
            self.cache.clear();
        }
    }

    /// Reports whether `requester` (at `distance` from the player) is due
    /// to reconsider requesting a path this frame, and at what zone-derived
    /// priority it should submit at if so.
    pub fn should_consider_request(&mut self, requester: EntityHandle, distance: f32) -> (bool, SpatialZone) {
        self.zone_tracker.should_process(requester, distance, self.frame)
    }

    /// Sets a temporary per-cell traversal weight (path-cost-only terrain,
    /// e.g. spec §6's "other impassables contribute to path cost only").
    /// Does not affect `is_walkable`.
    pub fn set_cell_weight(&mut self, world_pos: [f32; 2], weight: f32) {
        let cell = self.grid.world_to_cell(world_pos);
        self.grid.set_temporary_weight(cell, weight);
    }

    /// Non-blocking submission through the ring buffer (spec's `requestPath`).
    pub fn request_path(
        &mut self,
        requester: EntityHandle,
        start: [f32; 2],
        goal: [f32; 2],
        priority: Priority,
        callback: impl FnOnce(PathResult) + Send + 'static,
    ) -> RequestOutcome {
        let id = self.next_request_id;
        self.next_request_id += 1;

        let request = PathRequest {
            id,
            requester,
            start,
            goal,
            priority,
            submitted_frame: self.frame,
        };

        match self.producer.push(request) {
            Ok(()) => {
                self.callbacks.insert(id, Box::new(callback));
                self.requests_by_entity.entry(requester).or_default().insert(id);
                RequestOutcome::Queued(id)
            }
            Err(_) => RequestOutcome::Overflow,
        }
    }

    /// Cancels a single request by id. A delivered callback on an
    /// already-in-flight cancellation is suppressed, never invoked.
    pub fn cancel_request(&mut self, id: u64) {
        self.cancelled.insert(id);
        self.callbacks.remove(&id);
    }

    /// Cancels every outstanding request submitted by `requester`
    /// (`prepareForStateTransition`'s "cancels outstanding path requests
    /// for its entities").
    pub fn cancel_for_entity(&mut self, requester: EntityHandle) {
        if let Some(ids) = self.requests_by_entity.remove(&requester) {
            for id in ids {
                self.cancel_request(id);
            }
        }
    }

    /// Drains the ring buffer into the priority scheduler, pulls up to
    /// `max_paths_per_frame` requests, resolves each against the cache or
    /// A*, and posts a worker-pool job to deliver each surviving callback.
    pub fn process_frame(&mut self, pool: &WorkerPool, dt: f32) -> FrameStats {
        self.frame += 1;
        self.elapsed_seconds += dt;
        self.cache.evict_expired(self.elapsed_seconds);

        while let Some(request) = self.consumer.pop() {
            if self.cancelled.remove(&request.id) {
                self.forget_request(&request);
                continue;
            }
            self.scheduler.enqueue(request);
        }

        let mut stats = FrameStats::default();
        if !self.grid.is_ready() {
            return stats;
        }

        let batch = self.scheduler.drain(self.config.max_paths_per_frame as usize);
        for request in batch {
            if self.cancelled.remove(&request.id) {
                self.forget_request(&request);
                stats.cancelled += 1;
                continue;
            }

            let Some(callback) = self.callbacks.remove(&request.id) else {
                continue;
            };
            self.forget_request(&request);

            let (path, from_cache) = self.resolve(&request);
            if from_cache {
                stats.cache_hits += 1;
            } else {
                stats.cache_misses += 1;
            }
            stats.processed += 1;

            let result = PathResult {
                request_id: request.id,
                path,
                from_cache,
            };
            pool.submit(request.priority, move || callback(result));
        }

        stats
    }

    fn forget_request(&mut self, request: &PathRequest) {
        if let Some(ids) = self.requests_by_entity.get_mut(&request.requester) {
            ids.remove(&request.id);
            if ids.is_empty() {
                self.requests_by_entity.remove(&request.requester);
            }
        }
    }

    fn resolve(&mut self, request: &PathRequest) -> (Vec<[f32; 2]>, bool) {
        let start_cell = self.grid.world_to_cell(request.start);
        let goal_cell = self.grid.world_to_cell(request.goal);
        let key = PathKey::new(start_cell, goal_cell);

        if let Some(path) = self.cache.get(key, self.elapsed_seconds) {
            return (path.to_vec(), true);
        }

        let path = astar::find_path(&self.grid, start_cell, goal_cell, self.config.allow_diagonal, self.config.max_iterations)
            .map(|cells| cells.into_iter().map(|c| self.grid.cell_to_world(c)).collect())
            .unwrap_or_default();

        self.cache.insert(key, path.clone(), self.elapsed_seconds, self.config.path_cache_ttl_sec);
        (path, false)
    }
}
