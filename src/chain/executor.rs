//! Runs one chain record step by step.
//!
//! Each run is a small state machine:
//!
//! ```text
//! Idle -> RunningStep(i) -> StepDone(i) -> RunningStep(i+1) ... -> Completed
//!              |
//!              +-> Failed
//! ```
//!
//! All tasks of a step are dispatched concurrently and awaited together. The
//! step advance is persisted only after every task has succeeded, so a crash
//! mid-step re-runs the whole step on resume.

use super::manager::ChainStateManager;
use crate::events::EventSink;
use crate::workers::{TaskExecutor, WorkerContext};
use futures::future::join_all;
use std::sync::Arc;
use stepchain_common::{ChainError, ChainEvent, ChainRecord, TaskOutcome};
use tracing::{debug, info, warn};

/// How a chain run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainRunOutcome {
    Completed {
        chain_id: String,
        steps_run: usize,
    },
    /// A step had failing tasks; the record has been deleted.
    Failed {
        chain_id: String,
        step_index: usize,
        failed_tasks: Vec<String>,
        message: String,
    },
}

impl ChainRunOutcome {
    pub fn chain_id(&self) -> &str {
        match self {
            Self::Completed { chain_id, .. } | Self::Failed { chain_id, .. } => chain_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Convert a failed run into [`ChainError::StepTaskFailure`].
    pub fn into_result(self) -> Result<usize, ChainError> {
        match self {
            Self::Completed { steps_run, .. } => Ok(steps_run),
            Self::Failed {
                chain_id,
                step_index,
                message,
                ..
            } => Err(ChainError::StepTaskFailure {
                chain_id,
                step_index,
                message,
            }),
        }
    }
}

enum RunState {
    Idle(ChainRecord),
    RunningStep(ChainRecord),
    StepDone(ChainRecord),
    Completed(ChainRecord),
    Failed {
        chain_id: String,
        step_index: usize,
        failed_tasks: Vec<String>,
        message: String,
    },
}

enum StepResult {
    Succeeded,
    Failed {
        failed_tasks: Vec<String>,
        message: String,
    },
}

/// Drives chain records to completion or failure.
///
/// The executor is the sole writer for a chain while it runs it. Persistence
/// errors abort the run and are returned to the caller; task failures never
/// are, they end the run with [`ChainRunOutcome::Failed`].
#[derive(Clone)]
pub struct ChainExecutor {
    manager: Arc<ChainStateManager>,
    tasks: Arc<dyn TaskExecutor>,
    events: Arc<dyn EventSink>,
}

impl ChainExecutor {
    pub fn new(
        manager: Arc<ChainStateManager>,
        tasks: Arc<dyn TaskExecutor>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            manager,
            tasks,
            events,
        }
    }

    pub fn manager(&self) -> &Arc<ChainStateManager> {
        &self.manager
    }

    /// Run a freshly submitted chain.
    pub async fn run(&self, record: ChainRecord) -> Result<ChainRunOutcome, ChainError> {
        self.drive(record, false).await
    }

    /// Continue a persisted chain from its `current_step`.
    pub async fn resume(&self, record: ChainRecord) -> Result<ChainRunOutcome, ChainError> {
        self.drive(record, true).await
    }

    async fn drive(
        &self,
        record: ChainRecord,
        resumed: bool,
    ) -> Result<ChainRunOutcome, ChainError> {
        let chain_id = record.chain_id.clone();
        let mut steps_run = 0;
        let mut state = RunState::Idle(record);

        loop {
            state = match state {
                RunState::Idle(record) => {
                    info!(
                        chain_id = %record.chain_id,
                        step = record.current_step,
                        total_steps = record.total_steps,
                        resumed,
                        "Starting chain"
                    );
                    self.events.emit(ChainEvent::ChainStarted {
                        chain_id: record.chain_id.clone(),
                        chain_name: record.chain_name.clone(),
                        start_step: record.current_step,
                        total_steps: record.total_steps,
                        resumed,
                    });
                    if record.can_resume() {
                        RunState::RunningStep(record)
                    } else {
                        RunState::Completed(record)
                    }
                }

                RunState::RunningStep(record) => match self.run_step(&record).await? {
                    StepResult::Succeeded => RunState::StepDone(record),
                    StepResult::Failed {
                        failed_tasks,
                        message,
                    } => RunState::Failed {
                        chain_id: record.chain_id,
                        step_index: record.current_step,
                        failed_tasks,
                        message,
                    },
                },

                RunState::StepDone(record) => {
                    let step_index = record.current_step;
                    let advanced = self.manager.advance_step(&record.chain_id).await?;
                    steps_run += 1;
                    self.events.emit(ChainEvent::StepCompleted {
                        chain_id: advanced.chain_id.clone(),
                        step_index,
                        total_steps: advanced.total_steps,
                        progress: advanced.progress_fraction(),
                    });
                    if advanced.can_resume() {
                        RunState::RunningStep(advanced)
                    } else {
                        RunState::Completed(advanced)
                    }
                }

                RunState::Completed(record) => {
                    self.manager.mark_completed(&record.chain_id).await?;
                    info!(chain_id = %record.chain_id, steps_run, "Chain completed");
                    self.events.emit(ChainEvent::ChainCompleted {
                        chain_id: record.chain_id.clone(),
                        total_steps: record.total_steps,
                    });
                    return Ok(ChainRunOutcome::Completed {
                        chain_id,
                        steps_run,
                    });
                }

                RunState::Failed {
                    chain_id,
                    step_index,
                    failed_tasks,
                    message,
                } => {
                    self.manager.mark_failed(&chain_id).await?;
                    warn!(%chain_id, step_index, ?failed_tasks, "Chain failed");
                    self.events.emit(ChainEvent::ChainFailed {
                        chain_id: chain_id.clone(),
                        step_index,
                        failed_tasks: failed_tasks.clone(),
                        message: message.clone(),
                    });
                    return Ok(ChainRunOutcome::Failed {
                        chain_id,
                        step_index,
                        failed_tasks,
                        message,
                    });
                }
            };
        }
    }

    /// Dispatch every task of the current step and collect the verdict.
    async fn run_step(&self, record: &ChainRecord) -> Result<StepResult, ChainError> {
        let step_index = record.current_step;
        let step = record
            .steps
            .get(step_index)
            .ok_or_else(|| ChainError::Aborted {
                chain_id: record.chain_id.clone(),
                reason: format!("step {} is missing from the record", step_index),
            })?;

        self.events.emit(ChainEvent::StepStarted {
            chain_id: record.chain_id.clone(),
            step_index,
            total_steps: record.total_steps,
            task_count: step.len(),
        });

        if step.is_empty() {
            debug!(chain_id = %record.chain_id, step = step_index, "Empty step, nothing to dispatch");
            return Ok(StepResult::Succeeded);
        }

        // Each task gets its own tokio task so a panicking worker only fails
        // that task.
        let handles: Vec<_> = step
            .tasks
            .iter()
            .map(|task| {
                let tasks = Arc::clone(&self.tasks);
                let ctx = WorkerContext::new(
                    &record.chain_id,
                    step_index,
                    &task.task_id,
                    Arc::clone(&self.events),
                );
                let task = task.clone();
                tokio::spawn(async move { tasks.execute(&ctx, &task).await })
            })
            .collect();

        let results = join_all(handles).await;

        let mut failed_tasks = Vec::new();
        let mut first_failure = None;
        for (task, result) in step.tasks.iter().zip(results) {
            let outcome = result.unwrap_or_else(|e| {
                if e.is_panic() {
                    TaskOutcome::failure(format!("Task '{}' panicked", task.task_id))
                } else {
                    TaskOutcome::failure(format!("Task '{}' was cancelled", task.task_id))
                }
            });

            debug!(
                chain_id = %record.chain_id,
                step = step_index,
                task_id = %task.task_id,
                success = outcome.success,
                "Task finished"
            );

            if !outcome.success {
                failed_tasks.push(task.task_id.clone());
                if first_failure.is_none() {
                    first_failure = outcome.message.clone();
                }
            }

            self.events.emit(ChainEvent::TaskCompleted {
                chain_id: record.chain_id.clone(),
                step_index,
                task_id: task.task_id.clone(),
                success: outcome.success,
                message: outcome.message,
                data: outcome.data,
            });
        }

        if failed_tasks.is_empty() {
            return Ok(StepResult::Succeeded);
        }

        let mut message = format!(
            "Chain step {} failed: task(s) {} did not succeed",
            step_index,
            failed_tasks.join(", ")
        );
        if let Some(reason) = first_failure {
            message.push_str(&format!(" ({})", reason));
        }
        Ok(StepResult::Failed {
            failed_tasks,
            message,
        })
    }
}
