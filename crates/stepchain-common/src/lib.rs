//! Shared domain types for stepchain.
//!
//! Everything here is pure data plus pure transitions: no I/O, no runtime.
//! The engine in the root crate builds persistence and execution on top.

pub mod errors;
pub mod event;
pub mod model;
pub mod outcome;

pub use errors::ChainError;
pub use event::ChainEvent;
pub use model::{
    ChainDefinition, ChainRecord, DEFAULT_RETENTION_DAYS, StepDefinition, TaskDescriptor,
    WorkerConfig, default_retention, generate_chain_id, now_millis,
};
pub use outcome::TaskOutcome;
