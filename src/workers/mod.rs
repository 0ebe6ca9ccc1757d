//! Task execution: the seam between the chain executor and actual work.
//!
//! The executor only knows [`TaskExecutor`]. The shipped implementation is
//! [`WorkerRegistry`], which looks up a [`Worker`] by the task's
//! `worker_kind` and runs it with the task's opaque config.
//!
//! | Kind      | Worker                 | Config keys                                  |
//! |-----------|------------------------|----------------------------------------------|
//! | `noop`    | [`NoopWorker`]         | anything; echoed back as data                |
//! | `sleep`   | [`SleepWorker`]        | `duration_ms`                                |
//! | `fail`    | [`FailWorker`]         | `message`                                    |
//! | `command` | [`CommandWorker`]      | `program`/`command`, `args`, `env`, `working_dir`, `timeout_secs` |

mod builtin;
mod command;

pub use builtin::{FailWorker, NoopWorker, SleepWorker};
pub use command::{CommandWorker, DEFAULT_COMMAND_TIMEOUT_SECS, parse_progress_line};

use crate::errors::WorkerError;
use crate::events::EventSink;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use stepchain_common::{ChainEvent, TaskDescriptor, TaskOutcome, WorkerConfig};

/// Where a task runs and how it reports progress.
#[derive(Clone)]
pub struct WorkerContext {
    pub chain_id: String,
    pub step_index: usize,
    pub task_id: String,
    events: Arc<dyn EventSink>,
}

impl WorkerContext {
    pub fn new(
        chain_id: &str,
        step_index: usize,
        task_id: &str,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            step_index,
            task_id: task_id.to_string(),
            events,
        }
    }

    /// Emit a [`ChainEvent::TaskProgress`] for this task. Values above 100 are clamped.
    pub fn report_progress(&self, percent: u8, message: Option<String>) {
        self.events.emit(ChainEvent::TaskProgress {
            chain_id: self.chain_id.clone(),
            step_index: self.step_index,
            task_id: self.task_id.clone(),
            percent: percent.min(100),
            message,
        });
    }
}

/// Runs one task to an outcome.
///
/// Implementations must not panic on bad input; every problem should come
/// back as a failed [`TaskOutcome`]. The executor still isolates panics.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, ctx: &WorkerContext, task: &TaskDescriptor) -> TaskOutcome;
}

/// One kind of work, addressed by [`Worker::kind`].
#[async_trait]
pub trait Worker: Send + Sync {
    fn kind(&self) -> &str;

    /// One-line summary shown by `stepchain workers`.
    fn description(&self) -> &str;

    async fn run(
        &self,
        ctx: &WorkerContext,
        config: &WorkerConfig,
    ) -> Result<TaskOutcome, WorkerError>;
}

/// Maps worker kinds to implementations.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in worker, the command worker included.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NoopWorker));
        registry.register(Arc::new(SleepWorker));
        registry.register(Arc::new(FailWorker));
        registry.register(Arc::new(CommandWorker::default()));
        registry
    }

    /// Add a worker, replacing any existing worker of the same kind.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.kind().to_string(), worker);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Worker>> {
        self.workers.get(kind)
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<&str> {
        self.workers.keys().map(String::as_str).collect()
    }

    pub fn workers(&self) -> impl Iterator<Item = &Arc<dyn Worker>> {
        self.workers.values()
    }
}

#[async_trait]
impl TaskExecutor for WorkerRegistry {
    async fn execute(&self, ctx: &WorkerContext, task: &TaskDescriptor) -> TaskOutcome {
        let result = match self.get(&task.worker_kind) {
            Some(worker) => worker.run(ctx, &task.worker_config).await,
            None => Err(WorkerError::UnknownKind(task.worker_kind.clone())),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(
                    chain_id = %ctx.chain_id,
                    task_id = %task.task_id,
                    worker_kind = %task.worker_kind,
                    error = %e,
                    "Worker returned an error"
                );
                TaskOutcome::failure(e.to_string())
            }
        }
    }
}

// Config accessors shared by the built-in workers.

pub(crate) fn config_str<'a>(config: &'a WorkerConfig, key: &str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}

pub(crate) fn config_u64(config: &WorkerConfig, key: &str) -> Result<Option<u64>, WorkerError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| WorkerError::InvalidConfig(format!("'{}' must be a non-negative integer", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use serde_json::json;

    fn ctx(events: Arc<RecordingEventSink>) -> WorkerContext {
        WorkerContext::new("c1", 0, "t1", events)
    }

    #[test]
    fn test_with_builtins_kinds() {
        let registry = WorkerRegistry::with_builtins();
        assert_eq!(registry.kinds(), vec!["command", "fail", "noop", "sleep"]);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_failed_outcome() {
        let registry = WorkerRegistry::with_builtins();
        let task = TaskDescriptor::new("t1", "teleport", WorkerConfig::new());
        let outcome = registry
            .execute(&ctx(Arc::new(RecordingEventSink::new())), &task)
            .await;
        assert!(!outcome.success);
        assert!(outcome.message.unwrap().contains("teleport"));
    }

    #[tokio::test]
    async fn test_worker_error_becomes_failed_outcome() {
        let registry = WorkerRegistry::with_builtins();
        let mut config = WorkerConfig::new();
        config.insert("duration_ms".to_string(), json!("soon"));
        let task = TaskDescriptor::new("t1", "sleep", config);
        let outcome = registry
            .execute(&ctx(Arc::new(RecordingEventSink::new())), &task)
            .await;
        assert!(!outcome.success);
        assert!(outcome.message.unwrap().contains("duration_ms"));
    }

    #[test]
    fn test_register_replaces_same_kind() {
        let mut registry = WorkerRegistry::with_builtins();
        registry.register(Arc::new(CommandWorker::disabled()));
        assert_eq!(registry.kinds().len(), 4);
    }

    #[test]
    fn test_report_progress_clamps() {
        let events = Arc::new(RecordingEventSink::new());
        ctx(events.clone()).report_progress(250, None);
        match &events.events()[0] {
            ChainEvent::TaskProgress { task_id, percent, .. } => {
                assert_eq!(task_id, "t1");
                assert_eq!(*percent, 100);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_progress_names_owning_chain() {
        let events = Arc::new(RecordingEventSink::new());
        WorkerContext::new("chain_a", 0, "download", events.clone()).report_progress(10, None);
        WorkerContext::new("chain_b", 2, "download", events.clone()).report_progress(90, None);

        let owners: Vec<(Option<String>, usize)> = events
            .events()
            .iter()
            .map(|e| match e {
                ChainEvent::TaskProgress { step_index, .. } => {
                    (e.chain_id().map(str::to_string), *step_index)
                }
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(
            owners,
            vec![
                (Some("chain_a".to_string()), 0),
                (Some("chain_b".to_string()), 2)
            ]
        );
    }

    #[test]
    fn test_config_u64_rejects_wrong_type() {
        let mut config = WorkerConfig::new();
        config.insert("n".to_string(), json!(-1));
        assert!(config_u64(&config, "n").is_err());
        assert_eq!(config_u64(&config, "missing").unwrap(), None);
    }
}
