//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                          |
//! |-----------|-------------------------------------------|
//! | `project` | `Init`                                    |
//! | `run`     | `Submit`, `Resume`                        |
//! | `chains`  | `List`, `Status`, `Cleanup`, `Clear`      |
//! | `workers` | `Workers`                                 |
//! | `config`  | `Config`                                  |

pub mod chains;
pub mod config;
pub mod project;
pub mod run;
pub mod workers;

pub use chains::{cmd_cleanup, cmd_clear, cmd_list, cmd_status};
pub use config::cmd_config;
pub use project::cmd_init;
pub use run::{cmd_resume, cmd_submit};
pub use workers::cmd_workers;
