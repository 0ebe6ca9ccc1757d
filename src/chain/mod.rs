//! Chain state machine and resume engine.
//!
//! - [`ChainStateManager`] owns every read-modify-write of the state store
//! - [`ChainExecutor`] runs one record step by step
//! - [`ResumeCoordinator`] recovers interrupted chains at startup
//! - [`ChainSubmitter`] turns definitions into persisted, running chains

pub mod executor;
pub mod manager;
pub mod resume;
pub mod submit;

pub use executor::{ChainExecutor, ChainRunOutcome};
pub use manager::ChainStateManager;
pub use resume::{
    ChainBackend, NativeChainScheduler, ResumeCoordinator, ResumeHandle, ResumeOptions,
    ResumeReport, purge_abandoned_chains,
};
pub use submit::{ChainSubmitter, SubmittedChain};
