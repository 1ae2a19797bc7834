//! Per-(quantized start, goal) path cache with a time-to-live (spec §4.7).
//!
//! Keyed in grid cells rather than world coordinates so two requests a few
//! pixels apart land on the same entry. Expiry is measured in the
//! pathfinder's own accumulated-`dt` clock, not wall time, so cache
//! behavior stays deterministic under a fixed-step test harness.

use std::collections::HashMap;

use super::grid::GridCoord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathKey {
    pub start: (i32, i32),
    pub goal: (i32, i32),
}

impl PathKey {
    pub fn new(start: GridCoord, goal: GridCoord) -> Self {
        Self {
            start: (start.x, start.y),
            goal: (goal.x, goal.y),
        }
    }
}

struct CachedPath {
    path: Vec<[f32; 2]>,
    expires_at: f32,
}

#[derive(Default)]
pub struct PathCache {
    entries: HashMap<PathKey, CachedPath>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: PathKey, now: f32) -> Option<&[[f32; 2]]> {
        self.entries
            .get(&key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.path.as_slice())
    }

    pub fn insert(&mut self, key: PathKey, path: Vec<[f32; 2]>, now: f32, ttl_sec: f32) {
        self.entries.insert(
            key,
            CachedPath {
                path,
                expires_at: now + ttl_sec,
            },
        );
    }

    pub fn evict_expired(&mut self, now: f32) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
