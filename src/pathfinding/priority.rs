//! Four-band request scheduler and the spatial-priority zone classifier
//! (spec §4.7; zone bands and cadence confirmed by
//! `original_source/include/ai/SpatialPriority.hpp`).

use std::collections::{HashMap, VecDeque};

use crate::handle::EntityHandle;
use crate::worker_pool::Priority;

use super::PathRequest;

/// Distance-from-player classification. Each zone recomputes on a different
/// cadence so distant entities don't spend worker time every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialZone {
    Near,
    Medium,
    Far,
    Culled,
}

impl SpatialZone {
    /// Frames between recomputes, jittered per entity so zone-mates don't
    /// all land on the same frame (thundering-herd avoidance, absent from
    /// the distilled spec but present in the original's scheduler).
    fn cadence(self, jitter: u32) -> u64 {
        match self {
            SpatialZone::Near => 1,
            SpatialZone::Medium => 2 + (jitter % 2) as u64,
            SpatialZone::Far => 5 + (jitter % 6) as u64,
            SpatialZone::Culled => u64::MAX,
        }
    }

    pub fn priority(self) -> Priority {
        match self {
            SpatialZone::Near => Priority::Critical,
            SpatialZone::Medium => Priority::High,
            SpatialZone::Far => Priority::Normal,
            SpatialZone::Culled => Priority::Low,
        }
    }
}

/// Zone distance boundaries (px). Defaults to the original's 800/1600/3200
/// bands — deliberately distinct from the EDS tier radii (1500/10000), see
/// DESIGN.md.
#[derive(Debug, Clone, Copy)]
pub struct ZoneConfig {
    pub near: f32,
    pub medium: f32,
    pub far: f32,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            near: 800.0,
            medium: 1600.0,
            far: 3200.0,
        }
    }
}

impl ZoneConfig {
    pub fn classify(&self, distance: f32) -> SpatialZone {
        if distance <= self.near {
            SpatialZone::Near
        } else if distance <= self.medium {
            SpatialZone::Medium
        } else if distance <= self.far {
            SpatialZone::Far
        } else {
            SpatialZone::Culled
        }
    }
}

const EVICTION_CAP: usize = 10_000;
const AGGRESSIVE_THRESHOLD: usize = 8_000;
/// Frames an entry can go untouched before it's a staleness-eviction
/// candidate once the map crosses the aggressive threshold (~10s at 60fps).
const STALE_HORIZON_FRAMES: u64 = 600;

/// Tracks, per requesting entity, the last frame it was allowed to recompute
/// its spatial-priority zone decision, with capped memory use.
#[derive(Default)]
pub struct SpatialPriorityTracker {
    zones: ZoneConfig,
    last_processed_frame: HashMap<EntityHandle, u64>,
}

impl SpatialPriorityTracker {
    pub fn new(zones: ZoneConfig) -> Self {
        Self {
            zones,
            last_processed_frame: HashMap::new(),
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.last_processed_frame.len()
    }

    /// Classifies `handle` by `distance` from the player and reports
    /// whether it's due to recompute this `frame`. Culled entities are
    /// never due (Low priority only, per spec, handled by the caller
    /// choosing not to submit at all).
    pub fn should_process(&mut self, handle: EntityHandle, distance: f32, frame: u64) -> (bool, SpatialZone) {
        let zone = self.zones.classify(distance);
        if matches!(zone, SpatialZone::Culled) {
            return (false, zone);
        }

        let jitter = (handle.to_bits() % 16) as u32;
        let window = zone.cadence(jitter);
        let due = match self.last_processed_frame.get(&handle) {
            None => true,
            Some(&last) => frame.saturating_sub(last) >= window,
        };
        if due {
            self.last_processed_frame.insert(handle, frame);
        }
        self.evict_if_needed(frame);
        (due, zone)
    }

    fn evict_if_needed(&mut self, frame: u64) {
        if self.last_processed_frame.len() < AGGRESSIVE_THRESHOLD {
            return;
        }
        self.last_processed_frame
            .retain(|_, &mut last| frame.saturating_sub(last) < STALE_HORIZON_FRAMES);

        if self.last_processed_frame.len() >= EVICTION_CAP {
            let mut entries: Vec<_> = self.last_processed_frame.iter().map(|(&h, &f)| (h, f)).collect();
            entries.sort_unstable_by_key(|&(_, last)| last);
            let overflow = self.last_processed_frame.len().saturating_sub(AGGRESSIVE_THRESHOLD);
            for (handle, _) in entries.into_iter().take(overflow) {
                self.last_processed_frame.remove(&handle);
            }
        }
    }
}

/// Four FIFO bands drained highest-priority-first, with a per-band quota
/// each call so Low isn't starved outright (spec's "fairness quota").
#[derive(Default)]
pub struct PriorityScheduler {
    bands: [VecDeque<PathRequest>; 4],
    fairness_quota: u32,
}

const DRAIN_ORDER: [Priority; 4] = [Priority::Critical, Priority::High, Priority::Normal, Priority::Low];

impl PriorityScheduler {
    pub fn new(fairness_quota: u32) -> Self {
        Self {
            bands: Default::default(),
            fairness_quota: fairness_quota.max(1),
        }
    }

    pub fn enqueue(&mut self, request: PathRequest) {
        self.bands[request.priority as usize].push_back(request);
    }

    pub fn len(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pulls up to `budget` requests. First a fair round takes up to
    /// `fairness_quota` from each band in priority order; if budget remains
    /// (because higher bands ran dry), a second pass drains whatever's left
    /// highest-priority-first.
    pub fn drain(&mut self, budget: usize) -> Vec<PathRequest> {
        let mut out = Vec::with_capacity(budget);

        for priority in DRAIN_ORDER {
            if out.len() >= budget {
                break;
            }
            let band = &mut self.bands[priority as usize];
            let take = (self.fairness_quota as usize).min(band.len()).min(budget - out.len());
            for _ in 0..take {
                if let Some(request) = band.pop_front() {
                    out.push(request);
                }
            }
        }

        if out.len() < budget {
            for priority in DRAIN_ORDER {
                let band = &mut self.bands[priority as usize];
                while out.len() < budget {
                    match band.pop_front() {
                        Some(request) => out.push(request),
                        None => break,
                    }
                }
                if out.len() >= budget {
                    break;
                }
            }
        }

        out
    }

    /// Removes every queued request matching `predicate` (used for
    /// cancellation), returning how many were dropped.
    pub fn retain_requests(&mut self, mut predicate: impl FnMut(&PathRequest) -> bool) -> usize {
        let mut removed = 0;
        for band in &mut self.bands {
            let before = band.len();
            band.retain(|request| predicate(request));
            removed += before - band.len();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(id: u64, priority: Priority) -> PathRequest {
        PathRequest {
            id,
            requester: EntityHandle::new(id as u32, 0),
            start: [0.0, 0.0],
            goal: [1.0, 1.0],
            priority,
            submitted_frame: 0,
        }
    }

    #[test]
    fn drains_highest_priority_first_within_quota() {
        let mut scheduler = PriorityScheduler::new(2);
        scheduler.enqueue(req(1, Priority::Low));
        scheduler.enqueue(req(2, Priority::Critical));
        scheduler.enqueue(req(3, Priority::Normal));
        let drained = scheduler.drain(2);
        assert_eq!(drained[0].id, 2);
    }

    #[test]
    fn low_priority_is_not_starved_when_budget_allows() {
        let mut scheduler = PriorityScheduler::new(1);
        for i in 0..5 {
            scheduler.enqueue(req(i, Priority::Critical));
        }
        scheduler.enqueue(req(100, Priority::Low));
        let drained = scheduler.drain(2);
        assert!(drained.iter().any(|r| r.id == 100));
    }

    #[test]
    fn zone_classification_matches_default_bands() {
        let zones = ZoneConfig::default();
        assert_eq!(zones.classify(100.0), SpatialZone::Near);
        assert_eq!(zones.classify(1000.0), SpatialZone::Medium);
        assert_eq!(zones.classify(2000.0), SpatialZone::Far);
        assert_eq!(zones.classify(5000.0), SpatialZone::Culled);
    }

    #[test]
    fn near_zone_is_due_every_frame() {
        let mut tracker = SpatialPriorityTracker::new(ZoneConfig::default());
        let handle = EntityHandle::new(1, 0);
        for frame in 0..5 {
            let (due, zone) = tracker.should_process(handle, 100.0, frame);
            assert!(due);
            assert_eq!(zone, SpatialZone::Near);
        }
    }

    #[test]
    fn far_zone_skips_most_frames() {
        let mut tracker = SpatialPriorityTracker::new(ZoneConfig::default());
        let handle = EntityHandle::new(1, 0);
        let (due_frame0, _) = tracker.should_process(handle, 2000.0, 0);
        assert!(due_frame0);
        let (due_frame1, _) = tracker.should_process(handle, 2000.0, 1);
        assert!(!due_frame1);
    }

    #[test]
    fn culled_entities_are_never_due() {
        let mut tracker = SpatialPriorityTracker::new(ZoneConfig::default());
        let handle = EntityHandle::new(1, 0);
        let (due, zone) = tracker.should_process(handle, 100_000.0, 0);
        assert!(!due);
        assert_eq!(zone, SpatialZone::Culled);
    }
}
