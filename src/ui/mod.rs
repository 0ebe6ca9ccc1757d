pub mod chain_progress;
pub mod icons;

pub use chain_progress::{ChainProgressUI, UiMode, spawn_event_loop};
