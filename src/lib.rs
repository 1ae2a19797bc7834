//! Concurrent simulation core for a real-time 2D game engine.
//!
//! A deterministic, worker-pool-backed simulation loop: a structure-of-arrays
//! entity store, spatial-hash collision/triggers, tiered AI scheduling,
//! asynchronous grid pathfinding, and a reduced-rate background simulator for
//! far-away entities, all arbitrated against one shared thread budget.

pub mod ai;
pub mod arbitrator;
pub mod background;
pub mod collision;
pub mod config;
pub mod engine;
pub mod entity_store;
pub mod error;
pub mod events;
pub mod handle;
pub mod pathfinding;
pub mod profiler;
pub mod snapshot;
pub mod spatial_hash;
pub mod worker_pool;

pub use config::{ConfigBuilder, EngineConfig};
pub use engine::{Engine, TileKind};
pub use error::{EngineError, EngineResult};
pub use handle::EntityHandle;
pub use snapshot::Snapshot;
