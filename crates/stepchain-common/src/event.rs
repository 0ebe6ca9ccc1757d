//! Events emitted while chains run.

use serde::{Deserialize, Serialize};

/// Progress and lifecycle notifications for a chain run.
///
/// Every variant can be read through the uniform `{id, success, message, data}`
/// view ([`ChainEvent::subject_id`], [`ChainEvent::success`],
/// [`ChainEvent::message`], [`ChainEvent::data`]) for sinks that forward
/// events to an outside transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    /// A chain run began (fresh submission or resume).
    ChainStarted {
        chain_id: String,
        chain_name: Option<String>,
        start_step: usize,
        total_steps: usize,
        resumed: bool,
    },
    /// All tasks of a step were dispatched.
    StepStarted {
        chain_id: String,
        step_index: usize,
        total_steps: usize,
        task_count: usize,
    },
    /// A worker reported intermediate progress.
    TaskProgress {
        chain_id: String,
        step_index: usize,
        task_id: String,
        percent: u8,
        message: Option<String>,
    },
    /// A single task finished.
    TaskCompleted {
        chain_id: String,
        step_index: usize,
        task_id: String,
        success: bool,
        message: Option<String>,
        data: Option<serde_json::Value>,
    },
    /// A step succeeded and its advance was persisted.
    StepCompleted {
        chain_id: String,
        step_index: usize,
        total_steps: usize,
        progress: f64,
    },
    ChainCompleted {
        chain_id: String,
        total_steps: usize,
    },
    /// A step failed; the chain record has been deleted.
    ChainFailed {
        chain_id: String,
        step_index: usize,
        failed_tasks: Vec<String>,
        message: String,
    },
    /// An incomplete chain sat untouched past the retention window and was purged.
    ChainAbandoned {
        chain_id: String,
        current_step: usize,
        total_steps: usize,
    },
}

impl ChainEvent {
    /// The chain id, or the task id for task-scoped events.
    pub fn subject_id(&self) -> &str {
        match self {
            Self::TaskProgress { task_id, .. } | Self::TaskCompleted { task_id, .. } => task_id,
            Self::ChainStarted { chain_id, .. }
            | Self::StepStarted { chain_id, .. }
            | Self::StepCompleted { chain_id, .. }
            | Self::ChainCompleted { chain_id, .. }
            | Self::ChainFailed { chain_id, .. }
            | Self::ChainAbandoned { chain_id, .. } => chain_id,
        }
    }

    /// The owning chain, when the event carries one.
    pub fn chain_id(&self) -> Option<&str> {
        match self {
            Self::TaskProgress { chain_id, .. }
            | Self::ChainStarted { chain_id, .. }
            | Self::StepStarted { chain_id, .. }
            | Self::TaskCompleted { chain_id, .. }
            | Self::StepCompleted { chain_id, .. }
            | Self::ChainCompleted { chain_id, .. }
            | Self::ChainFailed { chain_id, .. }
            | Self::ChainAbandoned { chain_id, .. } => Some(chain_id),
        }
    }

    pub fn success(&self) -> bool {
        match self {
            Self::TaskCompleted { success, .. } => *success,
            Self::ChainFailed { .. } | Self::ChainAbandoned { .. } => false,
            _ => true,
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            Self::ChainStarted {
                start_step,
                total_steps,
                resumed,
                ..
            } => {
                let verb = if *resumed { "Resumed" } else { "Started" };
                if start_step >= total_steps {
                    Some(format!("{} with all {} step(s) done", verb, total_steps))
                } else {
                    Some(format!("{} at step {}/{}", verb, start_step + 1, total_steps))
                }
            }
            Self::StepStarted {
                step_index,
                total_steps,
                task_count,
                ..
            } => Some(format!(
                "Step {}/{} started with {} task(s)",
                step_index + 1,
                total_steps,
                task_count
            )),
            Self::TaskProgress { message, .. } | Self::TaskCompleted { message, .. } => {
                message.clone()
            }
            Self::StepCompleted {
                step_index,
                total_steps,
                ..
            } => Some(format!("Step {}/{} completed", step_index + 1, total_steps)),
            Self::ChainCompleted { .. } => Some("Chain completed".to_string()),
            Self::ChainFailed { message, .. } => Some(message.clone()),
            Self::ChainAbandoned {
                current_step,
                total_steps,
                ..
            } => Some(format!(
                "Abandoned at step {}/{}",
                current_step + 1,
                total_steps
            )),
        }
    }

    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            Self::TaskCompleted { data, .. } => data.clone(),
            Self::TaskProgress { percent, .. } => Some(serde_json::json!({ "progress": percent })),
            Self::StepCompleted { progress, .. } => {
                Some(serde_json::json!({ "progress": progress }))
            }
            Self::ChainFailed {
                step_index,
                failed_tasks,
                ..
            } => Some(serde_json::json!({
                "step_index": step_index,
                "failed_tasks": failed_tasks,
            })),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ChainCompleted { .. } | Self::ChainFailed { .. } | Self::ChainAbandoned { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ChainEvent::StepStarted {
            chain_id: "c1".to_string(),
            step_index: 0,
            total_steps: 2,
            task_count: 3,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"step_started""#));
        assert!(json.contains("c1"));
    }

    #[test]
    fn test_task_events_use_task_id_as_subject() {
        let event = ChainEvent::TaskCompleted {
            chain_id: "c1".to_string(),
            step_index: 1,
            task_id: "upload".to_string(),
            success: false,
            message: Some("timeout".to_string()),
            data: None,
        };
        assert_eq!(event.subject_id(), "upload");
        assert_eq!(event.chain_id(), Some("c1"));
        assert!(!event.success());
        assert_eq!(event.message().as_deref(), Some("timeout"));
    }

    #[test]
    fn test_chain_failed_names_step() {
        let event = ChainEvent::ChainFailed {
            chain_id: "c1".to_string(),
            step_index: 1,
            failed_tasks: vec!["b".to_string()],
            message: "Chain step 2 failed".to_string(),
        };
        assert!(!event.success());
        assert!(event.is_terminal());
        let data = event.data().unwrap();
        assert_eq!(data["step_index"], 1);
        assert_eq!(data["failed_tasks"][0], "b");
    }

    #[test]
    fn test_task_progress_belongs_to_its_chain() {
        let event = ChainEvent::TaskProgress {
            chain_id: "c9".to_string(),
            step_index: 1,
            task_id: "download".to_string(),
            percent: 40,
            message: None,
        };
        assert_eq!(event.chain_id(), Some("c9"));
        assert_eq!(event.subject_id(), "download");
    }

    #[test]
    fn test_started_message_for_finished_record() {
        let event = ChainEvent::ChainStarted {
            chain_id: "c1".to_string(),
            chain_name: None,
            start_step: 3,
            total_steps: 3,
            resumed: true,
        };
        assert_eq!(
            event.message().as_deref(),
            Some("Resumed with all 3 step(s) done")
        );

        let fresh = ChainEvent::ChainStarted {
            chain_id: "c1".to_string(),
            chain_name: None,
            start_step: 0,
            total_steps: 3,
            resumed: false,
        };
        assert_eq!(fresh.message().as_deref(), Some("Started at step 1/3"));
    }
}
