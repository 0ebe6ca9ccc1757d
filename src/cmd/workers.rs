//! Listing available worker kinds: `stepchain workers`.

use anyhow::Result;
use stepchain::config::Config;
use stepchain::engine::registry_from_config;

pub fn cmd_workers(config: &Config) -> Result<()> {
    let registry = registry_from_config(config);

    println!();
    println!("{:<10} Description", "Kind");
    println!("{:<10} -----------", "----------");
    for worker in registry.workers() {
        println!(
            "{} {}",
            console::style(format!("{:<10}", worker.kind())).cyan(),
            worker.description()
        );
    }
    println!();
    Ok(())
}
