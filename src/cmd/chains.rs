//! Inspecting and pruning persisted chains: `list`, `status`, `cleanup`, `clear`.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use stepchain::config::Config;
use stepchain::engine::ChainEngine;
use stepchain::events::NullEventSink;
use stepchain::store::JsonFileStore;
use stepchain_common::{ChainRecord, now_millis};

/// Read-only queries skip the engine lock so they work while chains run.
fn reader(config: &Config) -> ChainEngine {
    ChainEngine::builder(Arc::new(JsonFileStore::new(&config.state_file)))
        .resume_on_start(false)
        .build()
}

/// Human label for a record's lifecycle position.
pub fn state_label(record: &ChainRecord, now: DateTime<Utc>, max_age: Duration) -> &'static str {
    if record.completed {
        "completed"
    } else if record.is_abandoned(now, max_age) {
        "abandoned"
    } else {
        "incomplete"
    }
}

pub async fn cmd_list(config: &Config, json: bool) -> Result<()> {
    let records = reader(config).list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No chains recorded in {}", config.state_file.display());
        return Ok(());
    }

    let now = now_millis();
    let max_age = config.retention();
    println!();
    println!(
        "{:<48} {:<8} {:<11} Last updated",
        "Chain", "Steps", "State"
    );
    println!(
        "{:<48} {:<8} {:<11} ------------",
        "------------------------------------------------", "-----", "-----------"
    );
    for record in &records {
        let label = state_label(record, now, max_age);
        let padded = format!("{:<11}", label);
        let styled = match label {
            "completed" => console::style(padded).green(),
            "abandoned" => console::style(padded).dim(),
            _ => console::style(padded).yellow(),
        };
        println!(
            "{:<48} {:<8} {} {}",
            record.chain_id,
            format!("{}/{}", record.current_step, record.total_steps),
            styled,
            record.last_updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    println!("{} chain(s)", records.len());
    Ok(())
}

pub async fn cmd_status(config: &Config, chain_id: &str, json: bool) -> Result<()> {
    let record = reader(config).status(chain_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let now = now_millis();
    println!();
    println!("{}", console::style(record.display_name()).bold().cyan());
    println!("─────────────────────────");
    println!("Chain:    {}", record.chain_id);
    println!(
        "State:    {}",
        state_label(&record, now, config.retention())
    );
    println!(
        "Progress: {}/{} steps ({:.0}%)",
        record.current_step,
        record.total_steps,
        record.progress_fraction() * 100.0
    );
    println!("Created:  {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!(
        "Updated:  {}",
        record.last_updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!();

    for (index, step) in record.steps.iter().enumerate() {
        let marker = if index < record.current_step {
            console::style("✓").green()
        } else if index == record.current_step && !record.completed {
            console::style("→").yellow()
        } else {
            console::style("·").dim()
        };
        println!("  {} step {}", marker, index + 1);
        for task in &step.tasks {
            println!(
                "      {} {}",
                task.task_id,
                console::style(format!("({})", task.worker_kind)).dim()
            );
        }
    }
    println!();
    Ok(())
}

pub async fn cmd_cleanup(config: &Config, abandoned: bool) -> Result<()> {
    let engine = ChainEngine::open(config, Arc::new(NullEventSink))?;
    let report = engine.cleanup(abandoned).await?;

    println!(
        "Removed {} expired completed chain(s)",
        report.expired_removed
    );
    if abandoned {
        println!(
            "Removed {} abandoned chain(s)",
            report.abandoned_removed.len()
        );
        for chain_id in &report.abandoned_removed {
            println!("  - {}", chain_id);
        }
    }
    Ok(())
}

pub async fn cmd_clear(config: &Config, force: bool) -> Result<()> {
    if !force {
        println!("This removes every recorded chain, finished or not.");
        println!("Run 'stepchain clear --force' to confirm.");
        return Ok(());
    }

    let engine = ChainEngine::open(config, Arc::new(NullEventSink))?;
    let count = engine.list().await?.len();
    engine.clear().await?;
    println!("Cleared {} chain(s)", count);
    Ok(())
}
