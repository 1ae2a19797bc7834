//! Collision/trigger event payloads and the small in-process bus used to
//! hand trigger phase changes to the outside world (spec §6).
//!
//! Collision callbacks are plain values stored in the collision engine and
//! invoked in registration order — not reach-back pointers into other
//! managers (spec §9's "cyclic manager references" redesign flag).

use crate::handle::EntityHandle;

/// Immutable snapshot of a single collision or trigger overlap, handed to
/// every registered callback.
#[derive(Debug, Clone, Copy)]
pub struct CollisionInfo {
    pub entity_a: EntityHandle,
    pub entity_b: EntityHandle,
    pub index_a: u32,
    pub index_b: u32,
    pub normal: [f32; 2],
    pub penetration: f32,
    pub is_trigger: bool,
}

/// Enter/exit phase of a trigger overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPhase {
    Enter,
    Exit,
}

/// A trigger phase change, queued onto the event bus for the outside world.
#[derive(Debug, Clone, Copy)]
pub struct TriggerEvent {
    pub player: EntityHandle,
    pub trigger: EntityHandle,
    pub trigger_tag: u8,
    pub player_pos: [f32; 2],
    pub phase: TriggerPhase,
}

/// A callback invoked once per [`CollisionInfo`], in registration order.
pub type CollisionCallback = Box<dyn Fn(&CollisionInfo) + Send + Sync>;

/// FIFO event queue external collaborators drain between frames. Separate
/// from the collision-callback list because trigger events are a stream of
/// facts, not a dispatch-to-everyone notification.
#[derive(Default)]
pub struct EventBus {
    triggers: Vec<TriggerEvent>,
}

impl EventBus {
    pub fn push_trigger(&mut self, event: TriggerEvent) {
        self.triggers.push(event);
    }

    /// Drains all queued trigger events, in the order they were pushed.
    pub fn drain_triggers(&mut self) -> Vec<TriggerEvent> {
        std::mem::take(&mut self.triggers)
    }

    pub fn pending_trigger_count(&self) -> usize {
        self.triggers.len()
    }
}
