//! Partitions the worker pool among competing systems and learns, per
//! system, the workload at which threading starts paying for itself.
//!
//! Static shares (spec §4.2): AI ≈44%, Particle ≈25%, Pathfinding ≈19%,
//! Event ≈12%, with a ~30% shared buffer reserved for bursts. The crate
//! drives AI, Collision, Pathfinding and Background directly; `Particle` and
//! `Event` are kept so a host can register its own work against the same
//! budget table.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

const HARD_FLOOR: usize = 100;
const LEARNING_CUTOFF_MS: f64 = 0.9;
const SMOOTHING_ALPHA: f64 = 0.25;
const HYSTERESIS_FACTOR: f64 = 0.95;
const MIN_BATCH_MULTIPLIER: f64 = 0.4;
const MAX_BATCH_MULTIPLIER: f64 = 2.0;
const MULTIPLIER_STEP: f64 = 0.1;

/// One of the named systems the arbitrator partitions workers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemKind {
    Ai,
    Collision,
    Particle,
    Event,
    Pathfinding,
    Background,
}

impl SystemKind {
    fn share(self) -> f64 {
        match self {
            SystemKind::Ai => 0.44,
            SystemKind::Particle => 0.25,
            SystemKind::Pathfinding => 0.19,
            SystemKind::Event => 0.12,
            // Collision and Background are both folded into the shared
            // buffer in the original percentage table; give each a floor
            // share so they always get at least one worker on multi-worker
            // pools.
            SystemKind::Collision => 0.20,
            SystemKind::Background => 0.10,
        }
    }
}

/// Why `should_use_threading` returned what it did — useful for logs/tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingReason {
    BelowHardFloor,
    NoLearnedThreshold,
    BelowLearnedThreshold,
    AboveLearnedThreshold,
}

pub struct ThreadingDecision {
    pub should_thread: bool,
    pub reason: ThreadingReason,
}

struct LearnedState {
    /// Exponentially smoothed single-threaded observed time, in ms.
    smoothed_ms: f64,
    /// Workload at which the threshold became active, if any.
    threshold: Option<usize>,
    /// Hill-climbed batch multiplier in [0.4, 2.0].
    batch_multiplier: f64,
    best_observed_ms: Option<f64>,
    climbing_up: bool,
}

impl Default for LearnedState {
    fn default() -> Self {
        Self {
            smoothed_ms: 0.0,
            threshold: None,
            batch_multiplier: 1.0,
            best_observed_ms: None,
            climbing_up: true,
        }
    }
}

struct PerSystem {
    allocated_workers: AtomicUsize,
    active: AtomicBool,
    generation: AtomicU32,
    state: Mutex<LearnedState>,
}

impl Default for PerSystem {
    fn default() -> Self {
        Self {
            allocated_workers: AtomicUsize::new(0),
            active: AtomicBool::new(false),
            generation: AtomicU32::new(0),
            state: Mutex::new(LearnedState::default()),
        }
    }
}

/// Partitions a bounded worker count among {AI, Collision, Particle, Event,
/// Pathfinding} and learns per-system threading thresholds from observed
/// latency.
pub struct WorkerBudgetArbitrator {
    total_workers: usize,
    ai: PerSystem,
    collision: PerSystem,
    particle: PerSystem,
    event: PerSystem,
    pathfinding: PerSystem,
    background: PerSystem,
}

impl WorkerBudgetArbitrator {
    pub fn new(total_workers: usize) -> Self {
        let arb = Self {
            total_workers: total_workers.max(1),
            ai: PerSystem::default(),
            collision: PerSystem::default(),
            particle: PerSystem::default(),
            event: PerSystem::default(),
            pathfinding: PerSystem::default(),
            background: PerSystem::default(),
        };
        for kind in [
            SystemKind::Ai,
            SystemKind::Collision,
            SystemKind::Particle,
            SystemKind::Event,
            SystemKind::Pathfinding,
            SystemKind::Background,
        ] {
            let allocated = arb.compute_allocation(kind);
            arb.system(kind).allocated_workers.store(allocated, Ordering::Relaxed);
        }
        arb
    }

    fn system(&self, kind: SystemKind) -> &PerSystem {
        match kind {
            SystemKind::Ai => &self.ai,
            SystemKind::Collision => &self.collision,
            SystemKind::Particle => &self.particle,
            SystemKind::Event => &self.event,
            SystemKind::Pathfinding => &self.pathfinding,
            SystemKind::Background => &self.background,
        }
    }

    fn compute_allocation(&self, kind: SystemKind) -> usize {
        let raw = self.total_workers as f64 * kind.share();
        (raw.round() as usize).clamp(1, self.total_workers)
    }

    pub fn allocated_workers(&self, kind: SystemKind) -> usize {
        self.system(kind).allocated_workers.load(Ordering::Relaxed)
    }

    /// Below the hard floor (100 items), always single-threaded. Otherwise
    /// consults the learned threshold for `kind`.
    pub fn should_use_threading(&self, kind: SystemKind, workload: usize) -> ThreadingDecision {
        if self.total_workers <= 1 {
            return ThreadingDecision {
                should_thread: false,
                reason: ThreadingReason::BelowHardFloor,
            };
        }
        if workload < HARD_FLOOR {
            return ThreadingDecision {
                should_thread: false,
                reason: ThreadingReason::BelowHardFloor,
            };
        }

        let sys = self.system(kind);
        let state = sys.state.lock().unwrap();
        match state.threshold {
            None => ThreadingDecision {
                should_thread: false,
                reason: ThreadingReason::NoLearnedThreshold,
            },
            Some(threshold) => {
                if (workload as f64) < (threshold as f64) * HYSTERESIS_FACTOR {
                    ThreadingDecision {
                        should_thread: false,
                        reason: ThreadingReason::BelowLearnedThreshold,
                    }
                } else {
                    ThreadingDecision {
                        should_thread: true,
                        reason: ThreadingReason::AboveLearnedThreshold,
                    }
                }
            }
        }
    }

    /// Feeds back a single-threaded observed wall-clock time (milliseconds)
    /// for the given workload, updating the smoothed average and, if it
    /// crosses the learning cutoff, activating a threshold. Workload drops
    /// below 95% of an active threshold clear it immediately (one-shot
    /// hysteresis restart per spec's resolved Open Question).
    pub fn report_observation(&self, kind: SystemKind, workload: usize, observed_ms: f64) {
        let sys = self.system(kind);
        let mut state = sys.state.lock().unwrap();

        if let Some(threshold) = state.threshold {
            if (workload as f64) < (threshold as f64) * HYSTERESIS_FACTOR {
                state.threshold = None;
                sys.active.store(false, Ordering::Relaxed);
                state.smoothed_ms = observed_ms;
                return;
            }
        }

        state.smoothed_ms = if state.smoothed_ms == 0.0 {
            observed_ms
        } else {
            SMOOTHING_ALPHA * observed_ms + (1.0 - SMOOTHING_ALPHA) * state.smoothed_ms
        };

        if state.threshold.is_none() && state.smoothed_ms > LEARNING_CUTOFF_MS {
            state.threshold = Some(workload);
            sys.active.store(true, Ordering::Relaxed);
        }

        sys.generation.fetch_add(1, Ordering::Relaxed);
    }

    pub fn learned_threshold(&self, kind: SystemKind) -> Option<usize> {
        self.system(kind).state.lock().unwrap().threshold
    }

    pub fn is_active(&self, kind: SystemKind) -> bool {
        self.system(kind).active.load(Ordering::Relaxed)
    }

    /// Hill-climbs the per-system batch multiplier to minimize observed
    /// time, returning `(batch_count, batch_size)` for `workload` split
    /// across `workers`.
    pub fn batch_strategy(&self, kind: SystemKind, workload: usize, workers: usize) -> (usize, usize) {
        const MIN_BATCH_SIZE: usize = 32;
        let workers = workers.max(1);
        let sys = self.system(kind);
        let state = sys.state.lock().unwrap();
        let max_batches_by_workload = ((workload as f64) / (MIN_BATCH_SIZE as f64)).ceil() as usize;
        let batch_count = ((workers as f64) * state.batch_multiplier)
            .round()
            .max(1.0) as usize;
        let batch_count = batch_count.min(max_batches_by_workload.max(1)).max(1);
        let batch_size = (workload + batch_count - 1) / batch_count.max(1);
        (batch_count, batch_size.max(1))
    }

    /// Feeds back the observed wall-clock time for the current batch
    /// multiplier and nudges it toward whichever direction most recently
    /// improved latency (simple hill-climb, not gradient descent).
    pub fn report_batch_observation(&self, kind: SystemKind, observed_ms: f64) {
        let sys = self.system(kind);
        let mut state = sys.state.lock().unwrap();

        let improved = state
            .best_observed_ms
            .map(|best| observed_ms < best)
            .unwrap_or(true);

        if improved {
            state.best_observed_ms = Some(observed_ms);
        } else {
            state.climbing_up = !state.climbing_up;
        }

        let step = if state.climbing_up {
            MULTIPLIER_STEP
        } else {
            -MULTIPLIER_STEP
        };
        state.batch_multiplier =
            (state.batch_multiplier + step).clamp(MIN_BATCH_MULTIPLIER, MAX_BATCH_MULTIPLIER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_worker_never_threads() {
        let arb = WorkerBudgetArbitrator::new(1);
        let decision = arb.should_use_threading(SystemKind::Ai, 100_000);
        assert!(!decision.should_thread);
        let (batches, _) = arb.batch_strategy(SystemKind::Ai, 10_000, 1);
        assert_eq!(batches, 1);
    }

    #[test]
    fn below_hard_floor_never_threads() {
        let arb = WorkerBudgetArbitrator::new(8);
        let decision = arb.should_use_threading(SystemKind::Ai, 50);
        assert!(!decision.should_thread);
        assert_eq!(decision.reason, ThreadingReason::BelowHardFloor);
    }

    #[test]
    fn learns_threshold_within_ten_ticks_and_clears_on_hysteresis() {
        let arb = WorkerBudgetArbitrator::new(8);
        for _ in 0..10 {
            arb.report_observation(SystemKind::Ai, 5_000, 1.5);
            if arb.is_active(SystemKind::Ai) {
                break;
            }
        }
        assert!(arb.is_active(SystemKind::Ai));
        assert!(arb.should_use_threading(SystemKind::Ai, 5_000).should_thread);

        // Drop below 95% of 5000 = 4750.
        arb.report_observation(SystemKind::Ai, 4_500, 1.5);
        assert!(!arb.is_active(SystemKind::Ai));
        assert!(!arb.should_use_threading(SystemKind::Ai, 4_500).should_thread);
    }

    #[test]
    fn allocations_sum_within_total_and_respect_shares() {
        let arb = WorkerBudgetArbitrator::new(20);
        assert!(arb.allocated_workers(SystemKind::Ai) >= 1);
        assert!(arb.allocated_workers(SystemKind::Pathfinding) >= 1);
        assert!(arb.allocated_workers(SystemKind::Ai) > arb.allocated_workers(SystemKind::Event));
    }
}
