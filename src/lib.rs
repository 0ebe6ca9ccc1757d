pub mod chain;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod init;
pub mod logging;
pub mod stepchain_config;
pub mod store;
pub mod ui;
pub mod workers;
