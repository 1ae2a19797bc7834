//! Structure-of-arrays entity data store with generational handles.
//!
//! Hot and cold fields live in parallel dense arrays (spec §3). A slot map
//! (one entry per handle slot, holding the slot's current generation and its
//! dense index if alive) resolves a [`EntityHandle`] to a dense index in
//! O(1); destroying an entity swaps the last dense element into the freed
//! slot and fixes up the moved entity's slot entry. This is the same
//! generational-index shape `hecs` uses for its own `Entity` ids — we just
//! keep the dense arrays as plain data instead of archetype columns, since
//! the collision/AI/pathfinding pipelines need direct SoA access, not
//! component queries.

use std::sync::Weak;

use crate::handle::EntityHandle;

/// What kind of physical body an entity slot is, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BodyType {
    Static,
    Kinematic,
    Dynamic,
}

/// Simulation tier (spec §3): controls how much work an entity receives
/// each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tier {
    Active,
    Background,
    #[default]
    Hibernated,
}

/// Cache-friendly hot fields touched every frame by collision/AI.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct HotData {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub half_size: [f32; 2],
    pub layer_mask: u32,
    pub collides_with: u32,
    pub body_type: BodyType,
    pub trigger_tag: u8,
    pub active: bool,
    pub is_trigger: bool,
    pub aabb_min: [f32; 2],
    pub aabb_max: [f32; 2],
    pub coarse_cell: (i16, i16),
    pub aabb_dirty: bool,
}

impl Default for HotData {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0],
            velocity: [0.0, 0.0],
            half_size: [0.5, 0.5],
            layer_mask: 1,
            collides_with: u32::MAX,
            body_type: BodyType::Dynamic,
            trigger_tag: 0,
            active: true,
            is_trigger: false,
            aabb_min: [0.0, 0.0],
            aabb_max: [0.0, 0.0],
            coarse_cell: (0, 0),
            aabb_dirty: true,
        }
    }
}

impl HotData {
    #[inline]
    pub fn refresh_aabb(&mut self) {
        self.aabb_min = [
            self.position[0] - self.half_size[0],
            self.position[1] - self.half_size[1],
        ];
        self.aabb_max = [
            self.position[0] + self.half_size[0],
            self.position[1] + self.half_size[1],
        ];
        self.aabb_dirty = false;
    }
}

/// Observer for entity-level collision-resolution callbacks. Held only
/// weakly by [`ColdData`] — promotion may fail if the owner already dropped.
pub trait EntityCallbackSink: Send + Sync {
    fn on_resolved(&self, position: [f32; 2], velocity: [f32; 2]);
}

/// Cold fields touched less often (collision resolution, interpolation).
#[derive(Default, Clone)]
pub struct ColdData {
    pub acceleration: [f32; 2],
    pub last_position: [f32; 2],
    pub full_aabb: ([f32; 2], [f32; 2]),
    pub restitution: f32,
    pub back_ref: Option<Weak<dyn EntityCallbackSink>>,
}

impl std::fmt::Debug for ColdData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColdData")
            .field("acceleration", &self.acceleration)
            .field("last_position", &self.last_position)
            .field("restitution", &self.restitution)
            .field("has_back_ref", &self.back_ref.is_some())
            .finish()
    }
}

/// A slot's lifecycle state. `Reserved` exists so `reserve_handle` can hand
/// out a stable handle immediately while the matching `Create` command is
/// still sitting in the queue (spec §4.3: `createNPC` returns a handle
/// synchronously even though dense-array visibility is deferred).
#[derive(Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Reserved,
    Alive(u32),
}

#[derive(Clone, Copy)]
struct SlotMeta {
    generation: u32,
    state: SlotState,
}

/// Deferred entity-store operations (spec §3 lifecycle, §4.5 command
/// queue). Applied only during the collision engine's command-processing
/// phase. `Create` carries a handle obtained from [`EntityStore::reserve_handle`]
/// up front, so callers can hand out a stable handle the instant they queue
/// the command instead of waiting for the next command-processing phase.
pub enum StoreCommand {
    Create {
        handle: EntityHandle,
        hot: HotData,
        cold: ColdData,
    },
    Destroy(EntityHandle),
    ModifyHot { handle: EntityHandle, hot: HotData },
}

/// Structure-of-arrays store for every simulated entity.
#[derive(Default)]
pub struct EntityStore {
    hot: Vec<HotData>,
    cold: Vec<ColdData>,
    entity_ids: Vec<EntityHandle>,
    tiers: Vec<Tier>,
    slots: Vec<SlotMeta>,
    free_slots: Vec<u32>,
}

/// Counts of entities that changed tier during a reclassification sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierChangeCounts {
    pub to_active: u32,
    pub to_background: u32,
    pub to_hibernated: u32,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hot.is_empty()
    }

    /// O(1) handle -> dense index lookup with generation check. Returns
    /// `None` for a stale or unknown handle (spec §7: "stale handle").
    pub fn get_index(&self, handle: EntityHandle) -> Option<u32> {
        if !handle.is_valid() {
            return None;
        }
        let slot = self.slots.get(handle.slot() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        match slot.state {
            SlotState::Alive(index) => Some(index),
            SlotState::Free | SlotState::Reserved => None,
        }
    }

    /// Reserves a slot and returns its handle immediately, without making
    /// the entity visible in the dense arrays yet. The caller queues a
    /// matching `StoreCommand::Create { handle, .. }` to fill the slot in
    /// during the next command-processing phase.
    pub fn reserve_handle(&mut self) -> EntityHandle {
        let slot_id = if let Some(free) = self.free_slots.pop() {
            free
        } else {
            self.slots.push(SlotMeta {
                generation: 0,
                state: SlotState::Free,
            });
            (self.slots.len() - 1) as u32
        };
        self.slots[slot_id as usize].state = SlotState::Reserved;
        let generation = self.slots[slot_id as usize].generation;
        EntityHandle::new(slot_id, generation)
    }

    pub fn handle_at(&self, index: u32) -> EntityHandle {
        self.entity_ids[index as usize]
    }

    pub fn hot(&self, index: u32) -> &HotData {
        &self.hot[index as usize]
    }

    pub fn hot_mut(&mut self, index: u32) -> &mut HotData {
        &mut self.hot[index as usize]
    }

    pub fn cold(&self, index: u32) -> &ColdData {
        &self.cold[index as usize]
    }

    pub fn cold_mut(&mut self, index: u32) -> &mut ColdData {
        &mut self.cold[index as usize]
    }

    pub fn tier(&self, index: u32) -> Tier {
        self.tiers[index as usize]
    }

    pub fn all_indices(&self) -> std::ops::Range<u32> {
        0..self.hot.len() as u32
    }

    /// Applies one queued command. `Create` fills in a slot already
    /// reserved by [`reserve_handle`]; a handle whose slot generation no
    /// longer matches (destroyed before its create was flushed) is a no-op.
    /// Destroys swap-with-last. A destroy/modify targeting a nonexistent
    /// entity is a no-op.
    pub fn apply_command(&mut self, command: StoreCommand) -> Option<EntityHandle> {
        match command {
            StoreCommand::Create { handle, mut hot, cold } => {
                let slot = self.slots.get(handle.slot() as usize)?;
                if slot.generation != handle.generation() || slot.state != SlotState::Reserved {
                    return None;
                }

                hot.refresh_aabb();
                let dense_index = self.hot.len() as u32;
                self.slots[handle.slot() as usize].state = SlotState::Alive(dense_index);

                self.hot.push(hot);
                self.cold.push(cold);
                self.entity_ids.push(handle);
                self.tiers.push(Tier::Hibernated);

                Some(handle)
            }
            StoreCommand::Destroy(handle) => {
                let slot_state = self.slots.get(handle.slot() as usize).map(|s| s.state);
                match slot_state {
                    Some(SlotState::Alive(index)) if self.slots[handle.slot() as usize].generation == handle.generation() => {
                        self.remove_dense(index);
                    }
                    Some(SlotState::Reserved) if self.slots[handle.slot() as usize].generation == handle.generation() => {
                        // Destroyed before its create was flushed: just free the slot.
                    }
                    _ => return None, // concurrent/duplicate destroy is a no-op
                }
                let slot = &mut self.slots[handle.slot() as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.state = SlotState::Free;
                self.free_slots.push(handle.slot());
                None
            }
            StoreCommand::ModifyHot { handle, hot } => {
                if let Some(index) = self.get_index(handle) {
                    self.hot[index as usize] = hot;
                }
                None
            }
        }
    }

    fn remove_dense(&mut self, index: u32) {
        let last = self.hot.len() as u32 - 1;
        self.hot.swap_remove(index as usize);
        self.cold.swap_remove(index as usize);
        self.tiers.swap_remove(index as usize);
        self.entity_ids.swap_remove(index as usize);

        if index != last {
            let moved_handle = self.entity_ids[index as usize];
            self.slots[moved_handle.slot() as usize].state = SlotState::Alive(index);
        }
    }

    /// Stamps every entity's `last_position` from its current position
    /// (added for render-snapshot interpolation): called once per fixed
    /// update, before AI/collision move anything this tick, so the render
    /// snapshot can blend between last tick's and this tick's position by
    /// the leftover accumulator fraction.
    pub fn capture_last_positions(&mut self) {
        for i in 0..self.hot.len() {
            self.cold[i].last_position = self.hot[i].position;
        }
    }

    /// Single-threaded sweep reclassifying every active-body entity by
    /// distance from `ref_point`. Active uses `<`, Background uses `<=`
    /// against the boundary — ties resolve toward the coarser tier so a
    /// bouncing distance can't flap every other frame (spec §8 boundary
    /// law).
    pub fn update_simulation_tiers(
        &mut self,
        ref_point: [f32; 2],
        active_radius: f32,
        background_radius: f32,
    ) -> TierChangeCounts {
        let mut counts = TierChangeCounts::default();
        let active_sq = active_radius * active_radius;
        let background_sq = background_radius * background_radius;

        for i in 0..self.hot.len() {
            let pos = self.hot[i].position;
            let dx = pos[0] - ref_point[0];
            let dy = pos[1] - ref_point[1];
            let dist_sq = dx * dx + dy * dy;

            let new_tier = if dist_sq < active_sq {
                Tier::Active
            } else if dist_sq <= background_sq {
                Tier::Background
            } else {
                Tier::Hibernated
            };

            if new_tier != self.tiers[i] {
                match new_tier {
                    Tier::Active => counts.to_active += 1,
                    Tier::Background => counts.to_background += 1,
                    Tier::Hibernated => counts.to_hibernated += 1,
                }
                self.tiers[i] = new_tier;
            }
        }
        counts
    }
}
