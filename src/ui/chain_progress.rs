//! Terminal progress for running chains.
//!
//! Output modes:
//! - `full`: one progress bar per chain (steps) plus transient bars for tasks
//!   that report progress
//! - `minimal`: one line per step and chain outcome
//! - `json`: every [`ChainEvent`] as a JSON line on stdout

use crate::ui::icons::{ABANDONED, CHAIN, CHECK, CROSS, PROGRESS, RESUME, RUNNING};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use stepchain_common::ChainEvent;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Output mode for the chain UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Rich terminal UI with progress bars
    #[default]
    Full,
    /// Single-line status updates
    Minimal,
    /// JSON-formatted events
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// Terminal outcomes seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub abandoned: Vec<String>,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Task ids are only unique within a chain.
type TaskKey = (String, String);

#[derive(Default)]
struct UiState {
    chain_bars: HashMap<String, ProgressBar>,
    task_bars: HashMap<TaskKey, ProgressBar>,
    summary: RunSummary,
}

pub struct ChainProgressUI {
    mode: UiMode,
    multi: MultiProgress,
    state: Mutex<UiState>,
    verbose: bool,
    term: Term,
}

impl ChainProgressUI {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        let multi = match mode {
            UiMode::Full => MultiProgress::new(),
            UiMode::Minimal | UiMode::Json => {
                MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
            }
        };
        Self {
            mode,
            multi,
            state: Mutex::new(UiState::default()),
            verbose,
            term: Term::stdout(),
        }
    }

    // Rendering never panics while holding the lock, but recover anyway.
    fn state(&self) -> MutexGuard<'_, UiState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        match self.mode {
            UiMode::Full => {
                if self.multi.println(msg.as_ref()).is_err() {
                    eprintln!("{}", msg.as_ref());
                }
            }
            UiMode::Minimal | UiMode::Json => {
                let _ = writeln!(&self.term, "{}", msg.as_ref());
            }
        }
    }

    pub fn handle_event(&self, event: &ChainEvent) {
        self.record_outcome(event);
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    /// Snapshot of terminal outcomes so far.
    pub fn summary(&self) -> RunSummary {
        self.state().summary.clone()
    }

    fn record_outcome(&self, event: &ChainEvent) {
        let mut state = self.state();
        match event {
            ChainEvent::ChainCompleted { chain_id, .. } => {
                state.summary.completed.push(chain_id.clone())
            }
            ChainEvent::ChainFailed { chain_id, .. } => state.summary.failed.push(chain_id.clone()),
            ChainEvent::ChainAbandoned { chain_id, .. } => {
                state.summary.abandoned.push(chain_id.clone())
            }
            _ => {}
        }
    }

    fn handle_json(&self, event: &ChainEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_minimal(&self, event: &ChainEvent) {
        match event {
            ChainEvent::ChainStarted {
                chain_id, resumed, ..
            } => {
                let verb = if *resumed { "Resuming" } else { "Running" };
                self.print_line(format!("{} {}", verb, chain_id));
            }
            ChainEvent::StepCompleted {
                chain_id,
                step_index,
                total_steps,
                ..
            } => {
                self.print_line(format!("  {} step {}/{}", chain_id, step_index + 1, total_steps));
            }
            ChainEvent::ChainCompleted { chain_id, .. } => {
                self.print_line(format!("✓ {}", chain_id));
            }
            ChainEvent::ChainFailed {
                chain_id, message, ..
            } => {
                self.print_line(format!("✗ {} ({})", chain_id, message));
            }
            ChainEvent::ChainAbandoned { chain_id, .. } => {
                self.print_line(format!("- {} (abandoned)", chain_id));
            }
            _ => {}
        }
    }

    fn handle_full(&self, event: &ChainEvent) {
        match event {
            ChainEvent::ChainStarted {
                chain_id,
                chain_name,
                start_step,
                total_steps,
                resumed,
            } => self.on_chain_started(
                chain_id,
                chain_name.as_deref(),
                *start_step,
                *total_steps,
                *resumed,
            ),
            ChainEvent::StepStarted {
                chain_id,
                step_index,
                total_steps,
                task_count,
            } => self.on_step_started(chain_id, *step_index, *total_steps, *task_count),
            ChainEvent::TaskProgress {
                chain_id,
                task_id,
                percent,
                message,
                ..
            } => self.on_task_progress(chain_id, task_id, *percent, message.as_deref()),
            ChainEvent::TaskCompleted {
                chain_id,
                task_id,
                success,
                message,
                ..
            } => self.on_task_completed(chain_id, task_id, *success, message.as_deref()),
            ChainEvent::StepCompleted { chain_id, .. } => {
                if let Some(bar) = self.state().chain_bars.get(chain_id) {
                    bar.inc(1);
                }
            }
            ChainEvent::ChainCompleted {
                chain_id,
                total_steps,
            } => self.on_chain_completed(chain_id, *total_steps),
            ChainEvent::ChainFailed {
                chain_id,
                step_index,
                message,
                ..
            } => self.on_chain_failed(chain_id, *step_index, message),
            ChainEvent::ChainAbandoned {
                chain_id,
                current_step,
                total_steps,
            } => {
                self.print_line(format!(
                    "{}{} abandoned at step {}/{}",
                    ABANDONED,
                    style(chain_id).dim(),
                    current_step,
                    total_steps
                ));
            }
        }
    }

    fn on_chain_started(
        &self,
        chain_id: &str,
        chain_name: Option<&str>,
        start_step: usize,
        total_steps: usize,
        resumed: bool,
    ) {
        let bar_style = ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let bar = self.multi.add(ProgressBar::new(total_steps as u64));
        bar.set_style(bar_style);
        bar.set_prefix(chain_name.unwrap_or(chain_id).to_string());
        bar.set_position(start_step as u64);
        bar.set_message("starting...");
        bar.enable_steady_tick(Duration::from_millis(100));

        let icon = if resumed { RESUME } else { CHAIN };
        let verb = if resumed { "Resuming" } else { "Running" };
        let from = if start_step >= total_steps {
            "(all steps done)".to_string()
        } else {
            format!("(from step {}/{})", start_step + 1, total_steps)
        };
        self.print_line(format!(
            "{}{} {} {}",
            icon,
            verb,
            style(chain_id).yellow(),
            style(from).dim()
        ));

        self.state().chain_bars.insert(chain_id.to_string(), bar);
    }

    fn on_step_started(&self, chain_id: &str, step_index: usize, total_steps: usize, task_count: usize) {
        if let Some(bar) = self.state().chain_bars.get(chain_id) {
            bar.set_message(format!(
                "{}step {}/{} {}",
                RUNNING,
                style(step_index + 1).cyan(),
                total_steps,
                style(format!("({} task(s))", task_count)).dim()
            ));
        }
    }

    fn on_task_progress(&self, chain_id: &str, task_id: &str, percent: u8, message: Option<&str>) {
        let mut state = self.state();
        let key = (chain_id.to_string(), task_id.to_string());
        let bar = state.task_bars.entry(key).or_insert_with(|| {
            let bar_style = ProgressStyle::default_bar()
                .template("  {prefix:.dim} [{bar:20.green/white}] {pos:>3}% {msg}")
                .expect("progress bar template is a valid static string")
                .progress_chars("█▓░");
            let bar = self.multi.add(ProgressBar::new(100));
            bar.set_style(bar_style);
            bar.set_prefix(task_id.to_string());
            bar
        });
        bar.set_position(percent as u64);
        if let Some(message) = message {
            bar.set_message(message.to_string());
        }
        if self.verbose {
            let line = format!(
                "    {}{} {}%{}",
                PROGRESS,
                style(task_id).dim(),
                percent,
                message.map(|m| format!(" {}", m)).unwrap_or_default()
            );
            drop(state);
            self.print_line(line);
        }
    }

    fn on_task_completed(&self, chain_id: &str, task_id: &str, success: bool, message: Option<&str>) {
        let key = (chain_id.to_string(), task_id.to_string());
        if let Some(bar) = self.state().task_bars.remove(&key) {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        if !success {
            self.print_line(format!(
                "    {}{} {}",
                CROSS,
                style(task_id).red(),
                style(message.unwrap_or("failed")).dim()
            ));
        } else if self.verbose {
            self.print_line(format!(
                "    {}{} {}",
                CHECK,
                style(task_id).green(),
                style(message.unwrap_or("")).dim()
            ));
        }
    }

    fn on_chain_completed(&self, chain_id: &str, total_steps: usize) {
        if let Some(bar) = self.state().chain_bars.remove(chain_id) {
            bar.set_position(total_steps as u64);
            bar.finish_with_message(format!("{}done", CHECK));
        }
    }

    fn on_chain_failed(&self, chain_id: &str, step_index: usize, message: &str) {
        if let Some(bar) = self.state().chain_bars.remove(chain_id) {
            bar.abandon_with_message(format!("{}failed at step {}", CROSS, step_index + 1));
        }
        self.print_line(format!("{}{}", CROSS, style(message).red()));
    }

    /// Stop any bars still spinning.
    pub fn finish(&self) {
        let mut state = self.state();
        for (_, bar) in state.task_bars.drain() {
            bar.finish_and_clear();
        }
        for (_, bar) in state.chain_bars.drain() {
            bar.abandon();
        }
    }
}

/// Feed events from a channel into the UI until every sender is dropped.
pub fn spawn_event_loop(
    ui: Arc<ChainProgressUI>,
    mut rx: UnboundedReceiver<ChainEvent>,
) -> JoinHandle<RunSummary> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            ui.handle_event(&event);
        }
        ui.finish();
        ui.summary()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelEventSink, EventSink};

    fn completed(id: &str) -> ChainEvent {
        ChainEvent::ChainCompleted {
            chain_id: id.to_string(),
            total_steps: 2,
        }
    }

    #[test]
    fn test_ui_mode_parse() {
        assert_eq!(UiMode::parse("json"), UiMode::Json);
        assert_eq!(UiMode::parse("MINIMAL"), UiMode::Minimal);
        assert_eq!(UiMode::parse("anything_else"), UiMode::Full);
    }

    #[test]
    fn test_full_mode_tracks_bars_and_summary() {
        let ui = ChainProgressUI::new(UiMode::Full, false);
        ui.handle_event(&ChainEvent::ChainStarted {
            chain_id: "c1".to_string(),
            chain_name: None,
            start_step: 0,
            total_steps: 2,
            resumed: false,
        });
        ui.handle_event(&ChainEvent::TaskProgress {
            chain_id: "c1".to_string(),
            step_index: 0,
            task_id: "t1".to_string(),
            percent: 30,
            message: Some("copying".to_string()),
        });
        assert_eq!(ui.state().task_bars.len(), 1);

        ui.handle_event(&ChainEvent::TaskCompleted {
            chain_id: "c1".to_string(),
            step_index: 0,
            task_id: "t1".to_string(),
            success: true,
            message: None,
            data: None,
        });
        assert!(ui.state().task_bars.is_empty());

        ui.handle_event(&completed("c1"));
        assert!(ui.state().chain_bars.is_empty());
        assert_eq!(ui.summary().completed, vec!["c1".to_string()]);
        assert!(ui.summary().all_succeeded());
    }

    #[test]
    fn test_same_task_id_in_two_chains_keeps_separate_bars() {
        let ui = ChainProgressUI::new(UiMode::Full, false);
        for chain_id in ["chain_a", "chain_b"] {
            ui.handle_event(&ChainEvent::TaskProgress {
                chain_id: chain_id.to_string(),
                step_index: 0,
                task_id: "download".to_string(),
                percent: 20,
                message: None,
            });
        }
        assert_eq!(ui.state().task_bars.len(), 2);

        ui.handle_event(&ChainEvent::TaskCompleted {
            chain_id: "chain_a".to_string(),
            step_index: 0,
            task_id: "download".to_string(),
            success: true,
            message: None,
            data: None,
        });
        let state = ui.state();
        assert_eq!(state.task_bars.len(), 1);
        assert!(
            state
                .task_bars
                .contains_key(&("chain_b".to_string(), "download".to_string()))
        );
    }

    #[test]
    fn test_failures_are_summarized() {
        let ui = ChainProgressUI::new(UiMode::Minimal, false);
        ui.handle_event(&ChainEvent::ChainFailed {
            chain_id: "c2".to_string(),
            step_index: 1,
            failed_tasks: vec!["b".to_string()],
            message: "Chain step 1 failed".to_string(),
        });
        assert!(!ui.summary().all_succeeded());
        assert_eq!(ui.summary().failed, vec!["c2".to_string()]);
    }

    #[tokio::test]
    async fn test_event_loop_ends_when_senders_drop() {
        let ui = Arc::new(ChainProgressUI::new(UiMode::Json, false));
        let (sink, rx) = ChannelEventSink::new();
        let handle = spawn_event_loop(ui, rx);

        sink.emit(completed("a"));
        sink.emit(completed("b"));
        drop(sink);

        let summary = handle.await.unwrap();
        assert_eq!(summary.completed.len(), 2);
    }
}
