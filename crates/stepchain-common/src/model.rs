//! Chain records and their pure state transitions.
//!
//! A [`ChainRecord`] is the durable unit of chain progress. Every transition
//! here returns a new record and never touches storage; persisting the result
//! is the state manager's job.

use crate::errors::ChainError;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Opaque worker configuration. The engine carries it verbatim and never
/// looks inside; only the worker that receives it interprets it.
pub type WorkerConfig = serde_json::Map<String, serde_json::Value>;

/// How long records are kept around before cleanup considers them stale.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

pub fn default_retention() -> Duration {
    Duration::days(DEFAULT_RETENTION_DAYS)
}

/// Current wall-clock time at the millisecond precision records persist with.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Build a globally unique chain id from an optional caller-supplied name.
pub fn generate_chain_id(name: Option<&str>) -> String {
    let prefix = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("chain");
    format!("{}_{}", prefix, Uuid::new_v4())
}

/// A single unit of dispatched work inside a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique within the owning chain
    #[serde(default, alias = "id")]
    pub task_id: String,
    /// Which worker implementation runs this task
    #[serde(default, alias = "workerClassName")]
    pub worker_kind: String,
    #[serde(default, alias = "workerConfig")]
    pub worker_config: WorkerConfig,
    /// Diagnostic only: set once the owning step has been advanced past.
    /// Transition logic never reads it.
    #[serde(default)]
    pub completed: bool,
}

impl TaskDescriptor {
    pub fn new(task_id: &str, worker_kind: &str, worker_config: WorkerConfig) -> Self {
        Self {
            task_id: task_id.to_string(),
            worker_kind: worker_kind.to_string(),
            worker_config,
            completed: false,
        }
    }

    fn validate(&self, step_index: usize) -> Result<(), ChainError> {
        if self.task_id.trim().is_empty() {
            return Err(ChainError::InvalidChainDefinition(format!(
                "step {} has a task without a task_id",
                step_index
            )));
        }
        if self.worker_kind.trim().is_empty() {
            return Err(ChainError::InvalidChainDefinition(format!(
                "task '{}' in step {} has no worker_kind",
                self.task_id, step_index
            )));
        }
        Ok(())
    }
}

/// An ordered group of tasks that run concurrently.
///
/// Persisted as a bare array of task descriptors. Definitions may also spell
/// it as a table with a `tasks` key, which reads better in TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StepRepr", into = "Vec<TaskDescriptor>")]
pub struct StepDefinition {
    pub tasks: Vec<TaskDescriptor>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StepRepr {
    Bare(Vec<TaskDescriptor>),
    Table { tasks: Vec<TaskDescriptor> },
}

impl From<StepRepr> for StepDefinition {
    fn from(repr: StepRepr) -> Self {
        match repr {
            StepRepr::Bare(tasks) | StepRepr::Table { tasks } => Self { tasks },
        }
    }
}

impl From<StepDefinition> for Vec<TaskDescriptor> {
    fn from(step: StepDefinition) -> Self {
        step.tasks
    }
}

impl StepDefinition {
    pub fn new(tasks: Vec<TaskDescriptor>) -> Self {
        Self { tasks }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// What a caller submits: an optional name and the ordered steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl ChainDefinition {
    pub fn new(name: Option<&str>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.map(str::to_string),
            steps,
        }
    }

    /// Parse a definition from JSON.
    pub fn from_json_str(content: &str) -> Result<Self, ChainError> {
        serde_json::from_str(content).map_err(|e| {
            ChainError::InvalidChainDefinition(format!("failed to parse chain definition: {}", e))
        })
    }

    pub fn task_count(&self) -> usize {
        self.steps.iter().map(StepDefinition::len).sum()
    }
}

/// Durable progress of one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub chain_id: String,
    #[serde(default)]
    pub chain_name: Option<String>,
    pub total_steps: usize,
    /// Zero-based index of the next step to execute
    pub current_step: usize,
    pub completed: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated_at: DateTime<Utc>,
    pub steps: Vec<StepDefinition>,
}

impl ChainRecord {
    /// Build the initial record for a freshly submitted chain.
    pub fn create_initial(
        chain_id: &str,
        chain_name: Option<&str>,
        steps: Vec<StepDefinition>,
    ) -> Result<Self, ChainError> {
        Self::create_initial_at(chain_id, chain_name, steps, now_millis())
    }

    pub fn create_initial_at(
        chain_id: &str,
        chain_name: Option<&str>,
        mut steps: Vec<StepDefinition>,
        now: DateTime<Utc>,
    ) -> Result<Self, ChainError> {
        if chain_id.trim().is_empty() {
            return Err(ChainError::InvalidChainDefinition(
                "chain_id must not be empty".to_string(),
            ));
        }
        if steps.is_empty() {
            return Err(ChainError::InvalidChainDefinition(
                "a chain needs at least one step".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (index, step) in steps.iter().enumerate() {
            for task in &step.tasks {
                task.validate(index)?;
                if !seen.insert(task.task_id.as_str()) {
                    return Err(ChainError::InvalidChainDefinition(format!(
                        "task_id '{}' appears more than once",
                        task.task_id
                    )));
                }
            }
        }

        for task in steps.iter_mut().flat_map(|s| s.tasks.iter_mut()) {
            task.completed = false;
        }

        Ok(Self {
            chain_id: chain_id.to_string(),
            chain_name: chain_name.map(str::to_string),
            total_steps: steps.len(),
            current_step: 0,
            completed: false,
            created_at: now,
            last_updated_at: now,
            steps,
        })
    }

    /// Move past the current step.
    ///
    /// Fails with [`ChainError::AlreadyCompleted`] on a completed record;
    /// callers check `completed` first.
    pub fn advance(&self) -> Result<Self, ChainError> {
        self.advance_at(now_millis())
    }

    pub fn advance_at(&self, now: DateTime<Utc>) -> Result<Self, ChainError> {
        if self.completed || self.current_step >= self.total_steps {
            return Err(ChainError::AlreadyCompleted {
                chain_id: self.chain_id.clone(),
            });
        }

        let mut next = self.clone();
        if let Some(step) = next.steps.get_mut(next.current_step) {
            for task in &mut step.tasks {
                task.completed = true;
            }
        }
        next.current_step += 1;
        next.completed = next.current_step == next.total_steps;
        next.last_updated_at = now;
        Ok(next)
    }

    /// Force the terminal state. Applying it twice yields the same record
    /// apart from the refreshed timestamp.
    pub fn completed_at(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        for task in next.steps.iter_mut().flat_map(|s| s.tasks.iter_mut()) {
            task.completed = true;
        }
        next.current_step = next.total_steps;
        next.completed = true;
        next.last_updated_at = now;
        next
    }

    pub fn progress_fraction(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.current_step as f64 / self.total_steps as f64
    }

    /// Incomplete with steps left, regardless of age.
    pub fn can_resume(&self) -> bool {
        !self.completed && self.current_step < self.total_steps
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_updated_at
    }

    pub fn is_resumable(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.can_resume() && self.age(now) <= max_age
    }

    /// Completed and outside the retention window.
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.completed && self.age(now) > max_age
    }

    /// Never finished and untouched for longer than the retention window.
    pub fn is_abandoned(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        !self.completed && self.age(now) > max_age
    }

    pub fn display_name(&self) -> &str {
        self.chain_name.as_deref().unwrap_or(&self.chain_id)
    }

    /// Structural checks applied to records read back from storage.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.total_steps != self.steps.len() {
            return Err(format!(
                "chain {} declares {} steps but stores {}",
                self.chain_id,
                self.total_steps,
                self.steps.len()
            ));
        }
        if self.current_step > self.total_steps {
            return Err(format!(
                "chain {} is at step {} of {}",
                self.chain_id, self.current_step, self.total_steps
            ));
        }
        if self.completed && self.current_step != self.total_steps {
            return Err(format!(
                "chain {} is marked completed at step {} of {}",
                self.chain_id, self.current_step, self.total_steps
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str) -> TaskDescriptor {
        TaskDescriptor::new(id, "noop", WorkerConfig::new())
    }

    fn two_step_record() -> ChainRecord {
        ChainRecord::create_initial(
            "chain_1",
            Some("upload"),
            vec![
                StepDefinition::new(vec![task("a")]),
                StepDefinition::new(vec![task("b"), task("c")]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_create_initial_starts_at_zero() {
        let record = two_step_record();
        assert_eq!(record.current_step, 0);
        assert_eq!(record.total_steps, 2);
        assert!(!record.completed);
        assert_eq!(record.created_at, record.last_updated_at);
        assert!(record.can_resume());
    }

    #[test]
    fn test_create_initial_rejects_empty_steps() {
        let err = ChainRecord::create_initial("c", None, vec![]).unwrap_err();
        assert!(matches!(err, ChainError::InvalidChainDefinition(_)));
    }

    #[test]
    fn test_create_initial_rejects_missing_fields() {
        let missing_id = vec![StepDefinition::new(vec![TaskDescriptor::new(
            "",
            "noop",
            WorkerConfig::new(),
        )])];
        assert!(matches!(
            ChainRecord::create_initial("c", None, missing_id),
            Err(ChainError::InvalidChainDefinition(_))
        ));

        let missing_kind = vec![StepDefinition::new(vec![TaskDescriptor::new(
            "a",
            "  ",
            WorkerConfig::new(),
        )])];
        let err = ChainRecord::create_initial("c", None, missing_kind).unwrap_err();
        assert!(err.to_string().contains("worker_kind"));
    }

    #[test]
    fn test_create_initial_rejects_duplicate_task_ids() {
        let steps = vec![
            StepDefinition::new(vec![task("a")]),
            StepDefinition::new(vec![task("a")]),
        ];
        let err = ChainRecord::create_initial("c", None, steps).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_empty_step_is_valid() {
        let steps = vec![StepDefinition::default(), StepDefinition::new(vec![task("a")])];
        let record = ChainRecord::create_initial("c", None, steps).unwrap();
        assert!(record.steps[0].is_empty());
    }

    #[test]
    fn test_advance_until_completed() {
        let record = two_step_record();
        let one = record.advance().unwrap();
        assert_eq!(one.current_step, 1);
        assert!(!one.completed);
        assert!(one.steps[0].tasks[0].completed);
        assert!(!one.steps[1].tasks[0].completed);

        let two = one.advance().unwrap();
        assert_eq!(two.current_step, 2);
        assert!(two.completed);

        let err = two.advance().unwrap_err();
        assert!(matches!(err, ChainError::AlreadyCompleted { .. }));
    }

    #[test]
    fn test_advance_refreshes_timestamp() {
        let record = two_step_record();
        let later = record.last_updated_at + Duration::minutes(5);
        let next = record.advance_at(later).unwrap();
        assert_eq!(next.last_updated_at, later);
        assert_eq!(next.created_at, record.created_at);
    }

    #[test]
    fn test_completed_at_is_idempotent() {
        let record = two_step_record();
        let now = record.last_updated_at;
        let once = record.completed_at(now);
        let twice = once.completed_at(now);
        assert_eq!(once, twice);
        assert_eq!(once.current_step, once.total_steps);
        assert!(once.check_invariants().is_ok());
    }

    #[test]
    fn test_progress_fraction() {
        let record = two_step_record();
        assert_eq!(record.progress_fraction(), 0.0);
        assert_eq!(record.advance().unwrap().progress_fraction(), 0.5);

        let mut empty = record.clone();
        empty.total_steps = 0;
        assert_eq!(empty.progress_fraction(), 0.0);
    }

    #[test]
    fn test_resumable_respects_age_and_completion() {
        let record = two_step_record();
        let now = record.last_updated_at;
        assert!(record.is_resumable(now + Duration::hours(1), default_retention()));
        assert!(record.is_resumable(now + default_retention(), default_retention()));
        assert!(!record.is_resumable(now + Duration::days(8), default_retention()));
        assert!(record.is_abandoned(now + Duration::days(8), default_retention()));

        let done = record.completed_at(now);
        assert!(!done.is_resumable(now, default_retention()));
        assert!(!done.is_expired(now + Duration::days(6), default_retention()));
        assert!(done.is_expired(now + Duration::days(10), default_retention()));
    }

    #[test]
    fn test_check_invariants_flags_inconsistent_records() {
        let mut record = two_step_record();
        record.completed = true;
        assert!(record.check_invariants().is_err());

        let mut record = two_step_record();
        record.total_steps = 5;
        assert!(record.check_invariants().is_err());
    }

    #[test]
    fn test_generate_chain_id_uses_name_prefix() {
        let id = generate_chain_id(Some("upload"));
        assert!(id.starts_with("upload_"));
        assert_ne!(id, generate_chain_id(Some("upload")));
        assert!(generate_chain_id(None).starts_with("chain_"));
        assert!(generate_chain_id(Some("  ")).starts_with("chain_"));
    }

    #[test]
    fn test_persisted_layout_field_names() {
        let record = two_step_record();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["chain_id"], "chain_1");
        assert_eq!(value["chain_name"], "upload");
        assert_eq!(value["total_steps"], 2);
        assert!(value["created_at"].is_i64());
        assert!(value["steps"][1].is_array());
        assert_eq!(value["steps"][1][0]["task_id"], "b");
        assert_eq!(value["steps"][1][0]["completed"], false);
    }

    #[test]
    fn test_definition_accepts_legacy_field_names() {
        let json = r#"{
            "name": "sync",
            "steps": [
                [{"id": "a", "workerClassName": "HttpRequest", "workerConfig": {"url": "https://example.com", "retries": 3}}],
                {"tasks": [{"task_id": "b", "worker_kind": "noop"}]}
            ]
        }"#;
        let def = ChainDefinition::from_json_str(json).unwrap();
        assert_eq!(def.name.as_deref(), Some("sync"));
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].tasks[0].worker_kind, "HttpRequest");
        assert_eq!(def.steps[0].tasks[0].worker_config["retries"], json!(3));
        assert_eq!(def.steps[1].tasks[0].task_id, "b");
        assert_eq!(def.task_count(), 2);
    }

    #[test]
    fn test_definition_from_toml_tables() {
        let content = r#"
            name = "nightly"

            [[steps]]
            [[steps.tasks]]
            task_id = "fetch"
            worker_kind = "command"
            worker_config = { program = "true" }

            [[steps]]
            tasks = []
        "#;
        let def: ChainDefinition = toml::from_str(content).unwrap();
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].tasks[0].task_id, "fetch");
        assert!(def.steps[1].is_empty());
    }

    #[test]
    fn test_missing_task_fields_surface_as_invalid_definition() {
        let def = ChainDefinition::from_json_str(r#"{"steps": [[{"worker_kind": "noop"}]]}"#)
            .unwrap();
        let err = ChainRecord::create_initial("c", None, def.steps).unwrap_err();
        assert!(matches!(err, ChainError::InvalidChainDefinition(_)));
    }
}
