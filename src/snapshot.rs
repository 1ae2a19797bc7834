//! Read-only render snapshot (spec §6's "Render snapshot" output).
//!
//! Interpolates Active-tier positions between the start of the current
//! fixed update (`ColdData::last_position`, stamped by
//! [`crate::entity_store::EntityStore::capture_last_positions`]) and the
//! position as of the last completed tick, by the leftover fixed-timestep
//! accumulator fraction the host's own game loop tracks and passes in as
//! `alpha` — this module never owns or advances that accumulator itself.

use crate::entity_store::{BodyType, EntityStore, Tier};
use crate::handle::EntityHandle;

/// One Active-tier entity's render-facing state for a single frame.
#[derive(Debug, Clone, Copy)]
pub struct RenderEntry {
    pub handle: EntityHandle,
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub half_size: [f32; 2],
    pub layer_mask: u32,
    pub body_type: BodyType,
    pub is_trigger: bool,
    pub trigger_tag: u8,
}

/// Immutable view handed to the renderer once per frame.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tick: u64,
    pub time: f32,
    pub entities: Vec<RenderEntry>,
}

/// Builds a snapshot from every Active-tier entity in `store`, interpolating
/// position by `alpha` (`accumulator / fixed_dt`, clamped to `[0, 1]`).
/// Background and Hibernated entities are excluded per spec §6 — they are
/// not rendered.
pub fn build(store: &EntityStore, tick: u64, time: f32, alpha: f32) -> Snapshot {
    let alpha = alpha.clamp(0.0, 1.0);
    let entities = store
        .all_indices()
        .filter(|&i| store.tier(i) == Tier::Active)
        .map(|i| {
            let hot = store.hot(i);
            let last = store.cold(i).last_position;
            let position = [
                last[0] + (hot.position[0] - last[0]) * alpha,
                last[1] + (hot.position[1] - last[1]) * alpha,
            ];
            RenderEntry {
                handle: store.handle_at(i),
                position,
                velocity: hot.velocity,
                half_size: hot.half_size,
                layer_mask: hot.layer_mask,
                body_type: hot.body_type,
                is_trigger: hot.is_trigger,
                trigger_tag: hot.trigger_tag,
            }
        })
        .collect();

    Snapshot { tick, time, entities }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_store::{ColdData, HotData, StoreCommand};

    fn spawn(store: &mut EntityStore, position: [f32; 2], last_position: [f32; 2]) -> EntityHandle {
        let handle = store.reserve_handle();
        store
            .apply_command(StoreCommand::Create {
                handle,
                hot: HotData {
                    position,
                    ..Default::default()
                },
                cold: ColdData {
                    last_position,
                    ..Default::default()
                },
            })
            .unwrap();
        handle
    }

    #[test]
    fn hibernated_and_background_entities_are_excluded() {
        let mut store = EntityStore::new();
        spawn(&mut store, [0.0, 0.0], [0.0, 0.0]);
        // freshly created entities start Hibernated until a tier sweep runs
        let snapshot = build(&store, 1, 1.0 / 60.0, 1.0);
        assert!(snapshot.entities.is_empty());
    }

    #[test]
    fn active_entity_interpolates_between_last_and_current_position() {
        let mut store = EntityStore::new();
        let handle = spawn(&mut store, [10.0, 0.0], [0.0, 0.0]);
        store.update_simulation_tiers([0.0, 0.0], 1_000.0, 10_000.0);

        let snapshot = build(&store, 5, 0.1, 0.5);
        assert_eq!(snapshot.entities.len(), 1);
        assert_eq!(snapshot.entities[0].handle, handle);
        assert_eq!(snapshot.entities[0].position, [5.0, 0.0]);
    }

    #[test]
    fn alpha_is_clamped_to_the_unit_interval() {
        let mut store = EntityStore::new();
        spawn(&mut store, [10.0, 0.0], [0.0, 0.0]);
        store.update_simulation_tiers([0.0, 0.0], 1_000.0, 10_000.0);

        let snapshot = build(&store, 1, 0.0, 5.0);
        assert_eq!(snapshot.entities[0].position, [10.0, 0.0]);
    }
}
