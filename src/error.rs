//! Crate-boundary error types.
//!
//! Per the core's error-handling philosophy, almost nothing here propagates:
//! a stale handle becomes a sentinel, a saturated path queue becomes a
//! caller-retry, a behavior panic becomes a skipped entity. The only hard
//! failure is failing to stand up the worker pool itself.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("worker pool failed to start: {0}")]
    WorkerPoolInit(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("thread count must be at least 1")]
    ZeroThreads,

    #[error("active radius ({active}) must be <= background radius ({background})")]
    RadiusOrdering { active: f32, background: f32 },
}

pub type EngineResult<T> = Result<T, EngineError>;
