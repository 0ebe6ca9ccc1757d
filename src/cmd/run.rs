//! Running chains: `stepchain submit` and `stepchain resume`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use stepchain::chain::{ChainRunOutcome, ResumeReport};
use stepchain::config::Config;
use stepchain::engine::ChainEngine;
use stepchain::events::{ChannelEventSink, EventSink, FanoutEventSink, TracingEventSink};
use stepchain::ui::chain_progress::RunSummary;
use stepchain::ui::{ChainProgressUI, UiMode, spawn_event_loop};
use stepchain_common::{ChainDefinition, ChainError};
use tokio::task::JoinHandle;

/// An open engine whose events drive the terminal UI.
struct Session {
    engine: ChainEngine,
    events_loop: JoinHandle<RunSummary>,
}

impl Session {
    fn open(config: &Config, ui: &str) -> Result<Self> {
        let ui = Arc::new(ChainProgressUI::new(UiMode::parse(ui), config.verbose));
        let (channel, rx) = ChannelEventSink::new();
        let events: Arc<dyn EventSink> = Arc::new(FanoutEventSink::new(vec![
            Arc::new(TracingEventSink),
            Arc::new(channel),
        ]));

        let engine = ChainEngine::open(config, events)?;
        let events_loop = spawn_event_loop(ui, rx);
        Ok(Self {
            engine,
            events_loop,
        })
    }

    /// Drop the engine so the event channel closes, then drain the UI.
    async fn close(self) -> Result<RunSummary> {
        drop(self.engine);
        self.events_loop.await.context("UI event loop panicked")
    }
}

/// Read a chain definition. `.toml` files are TOML, everything else JSON.
pub fn load_definition(path: &Path) -> Result<ChainDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chain definition: {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let definition = if is_toml {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML chain definition: {}", path.display()))?
    } else {
        ChainDefinition::from_json_str(&content)
            .with_context(|| format!("Invalid chain definition: {}", path.display()))?
    };
    Ok(definition)
}

fn print_resume_report(report: &ResumeReport) {
    if report.is_empty() {
        return;
    }
    if report.expired_removed > 0 {
        println!("Removed {} expired chain(s)", report.expired_removed);
    }
    if !report.abandoned.is_empty() {
        println!(
            "Purged {} abandoned chain(s): {}",
            report.abandoned.len(),
            report.abandoned.join(", ")
        );
    }
    if !report.resumed.is_empty() {
        println!("Resuming {} interrupted chain(s)", report.resumed.len());
    }
}

/// Print one line per finished chain and count failures.
fn report_outcomes<'a>(
    outcomes: impl IntoIterator<Item = &'a Result<ChainRunOutcome, ChainError>>,
) -> usize {
    let mut failed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(ChainRunOutcome::Completed {
                chain_id,
                steps_run,
            }) => {
                println!(
                    "{} {} ({} step(s) run)",
                    console::style("completed").green(),
                    chain_id,
                    steps_run
                );
            }
            Ok(ChainRunOutcome::Failed {
                chain_id, message, ..
            }) => {
                failed += 1;
                println!("{} {}: {}", console::style("failed").red(), chain_id, message);
            }
            Err(e) => {
                failed += 1;
                println!("{} {}", console::style("error").red(), e);
            }
        }
    }
    failed
}

pub async fn cmd_submit(
    config: &Config,
    file: &Path,
    name: Option<&str>,
    ui: &str,
) -> Result<()> {
    let mut definition = load_definition(file)?;
    if let Some(name) = name {
        definition.name = Some(name.to_string());
    }

    let session = Session::open(config, ui)?;

    // Interrupted chains go first, so they are not overtaken by new work.
    let resumed = session.engine.start().await?;
    if let Some(handle) = &resumed {
        print_resume_report(&handle.report);
    }

    let submitted = session.engine.submit(definition).await?;
    println!("Submitted chain {}", console::style(&submitted.chain_id).yellow());

    let mut outcomes = vec![submitted.wait().await];
    if let Some(handle) = resumed {
        outcomes.extend(handle.wait().await);
    }

    session.close().await?;
    let failed = report_outcomes(&outcomes);
    if failed > 0 {
        anyhow::bail!("{} chain(s) failed", failed);
    }
    Ok(())
}

pub async fn cmd_resume(config: &Config, ui: &str) -> Result<()> {
    let session = Session::open(config, ui)?;
    let handle = session.engine.resume().await?;
    print_resume_report(&handle.report);

    if handle.pending() == 0 {
        println!("No interrupted chains to resume.");
    }
    let outcomes = handle.wait().await;

    session.close().await?;
    let failed = report_outcomes(&outcomes);
    if failed > 0 {
        anyhow::bail!("{} chain(s) failed", failed);
    }
    Ok(())
}
