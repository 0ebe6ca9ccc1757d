//! Integration tests for the stepchain CLI
//!
//! These tests drive the real binary against temporary projects.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use stepchain::store::encode_records;
use stepchain_common::{ChainRecord, StepDefinition, TaskDescriptor, WorkerConfig};
use tempfile::TempDir;

/// Helper to create a stepchain Command
fn stepchain() -> Command {
    let mut cmd = cargo_bin_cmd!("stepchain");
    cmd.env_remove("STEPCHAIN_STATE_FILE")
        .env_remove("STEPCHAIN_RETENTION_DAYS")
        .env_remove("STEPCHAIN_LOG");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Helper to initialize a stepchain project in a temp directory
fn init_stepchain_project(dir: &TempDir) {
    stepchain()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

fn write_definition(dir: &TempDir, file: &str, content: &str) {
    fs::write(dir.path().join(file), content).unwrap();
}

fn list_json(dir: &TempDir) -> Vec<serde_json::Value> {
    let output = stepchain()
        .current_dir(dir.path())
        .args(["list", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

fn noop_steps(ids: &[&[&str]]) -> Vec<StepDefinition> {
    ids.iter()
        .map(|step| {
            StepDefinition::new(
                step.iter()
                    .map(|id| TaskDescriptor::new(id, "noop", WorkerConfig::new()))
                    .collect(),
            )
        })
        .collect()
}

fn write_state(path: &Path, records: &[ChainRecord]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, encode_records(records).unwrap()).unwrap();
}

const TWO_STEP_CHAIN: &str = r#"{
  "name": "demo",
  "steps": [
    [
      {"task_id": "a", "worker_kind": "noop"},
      {"task_id": "b", "worker_kind": "sleep", "worker_config": {"duration_ms": 20}}
    ],
    [
      {"task_id": "c", "worker_kind": "noop"}
    ]
  ]
}"#;

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_stepchain_help() {
        stepchain()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("submit"));
    }

    #[test]
    fn test_stepchain_version() {
        stepchain().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        stepchain()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized stepchain project"));

        assert!(dir.path().join(".stepchain").is_dir());
        assert!(dir.path().join(".stepchain/logs").is_dir());
        assert!(dir.path().join(".stepchain/stepchain.toml").is_file());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);

        stepchain()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_workers_lists_builtins() {
        let dir = create_temp_project();

        stepchain()
            .current_dir(dir.path())
            .arg("workers")
            .assert()
            .success()
            .stdout(predicate::str::contains("noop"))
            .stdout(predicate::str::contains("sleep"))
            .stdout(predicate::str::contains("fail"))
            .stdout(predicate::str::contains("command"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config_commands {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        stepchain()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No stepchain.toml found"))
            .stdout(predicate::str::contains("retention_days = 7"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        fs::write(
            dir.path().join(".stepchain/stepchain.toml"),
            "[state]\nretention_days = 0\n\n[resume]\nmax_concurrent = 0\n",
        )
        .unwrap();

        stepchain()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("retention_days"))
            .stdout(predicate::str::contains("max_concurrent"));
    }

    #[test]
    fn test_config_init_keeps_existing_file() {
        let dir = create_temp_project();

        stepchain()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created stepchain.toml"));

        stepchain()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        fs::write(
            dir.path().join(".stepchain/stepchain.toml"),
            "[state\nbroken",
        )
        .unwrap();

        stepchain()
            .current_dir(dir.path())
            .arg("list")
            .assert()
            .failure()
            .stderr(predicate::str::contains("stepchain.toml"));
    }
}

// =============================================================================
// Submitting chains
// =============================================================================

mod submit {
    use super::*;

    #[test]
    fn test_submit_runs_chain_to_completion() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        write_definition(&dir, "chain.json", TWO_STEP_CHAIN);

        stepchain()
            .current_dir(dir.path())
            .args(["submit", "chain.json", "--ui", "minimal"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Submitted chain demo_"))
            .stdout(predicate::str::contains("completed"));

        let chains = list_json(&dir);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0]["completed"], true);
        assert_eq!(chains[0]["current_step"], 2);
        assert_eq!(chains[0]["chain_name"], "demo");
        assert!(dir.path().join(".stepchain/chains.json").is_file());
    }

    #[test]
    fn test_submit_toml_with_name_override() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        write_definition(
            &dir,
            "chain.toml",
            r#"
name = "from-file"

[[steps]]
tasks = [{ task_id = "only", worker_kind = "noop" }]
"#,
        );

        stepchain()
            .current_dir(dir.path())
            .args(["submit", "chain.toml", "--name", "override", "--ui", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("chain_completed"));

        let chains = list_json(&dir);
        assert_eq!(chains[0]["chain_name"], "override");
    }

    #[test]
    fn test_failed_chain_is_removed_and_exit_is_nonzero() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        write_definition(
            &dir,
            "bad.json",
            r#"{"steps": [[{"task_id": "ok", "worker_kind": "noop"},
                           {"task_id": "broken", "worker_kind": "fail", "worker_config": {"message": "disk full"}}],
                          [{"task_id": "never", "worker_kind": "noop"}]]}"#,
        );

        stepchain()
            .current_dir(dir.path())
            .args(["submit", "bad.json", "--ui", "minimal"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Chain step 0 failed"))
            .stdout(predicate::str::contains("broken"))
            .stderr(predicate::str::contains("1 chain(s) failed"));

        assert!(list_json(&dir).is_empty());
    }

    #[test]
    fn test_unknown_worker_kind_fails_chain() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        write_definition(
            &dir,
            "unknown.json",
            r#"{"steps": [[{"task_id": "x", "worker_kind": "teleport"}]]}"#,
        );

        stepchain()
            .current_dir(dir.path())
            .args(["submit", "unknown.json", "--ui", "minimal"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("teleport"));
    }

    #[test]
    fn test_invalid_definition_is_rejected_before_saving() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        write_definition(&dir, "empty.json", r#"{"name": "empty", "steps": []}"#);

        stepchain()
            .current_dir(dir.path())
            .args(["submit", "empty.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid chain definition"));

        assert!(list_json(&dir).is_empty());
    }

    #[test]
    fn test_duplicate_task_ids_are_rejected() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        write_definition(
            &dir,
            "dup.json",
            r#"{"steps": [[{"task_id": "a", "worker_kind": "noop"}], [{"task_id": "a", "worker_kind": "noop"}]]}"#,
        );

        stepchain()
            .current_dir(dir.path())
            .args(["submit", "dup.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("more than once"));
    }

    #[test]
    fn test_missing_definition_file() {
        let dir = create_temp_project();

        stepchain()
            .current_dir(dir.path())
            .args(["submit", "nope.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read chain definition"));
    }

    #[test]
    fn test_state_file_flag_overrides_location() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        write_definition(&dir, "chain.json", TWO_STEP_CHAIN);
        let custom = dir.path().join("elsewhere/state.json");

        stepchain()
            .current_dir(dir.path())
            .arg("--state-file")
            .arg(&custom)
            .args(["submit", "chain.json", "--ui", "minimal"])
            .assert()
            .success();

        assert!(custom.is_file());
        assert!(!dir.path().join(".stepchain/chains.json").exists());
    }

    #[test]
    fn test_state_file_from_environment() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        write_definition(&dir, "chain.json", TWO_STEP_CHAIN);
        let from_env = dir.path().join("env-state.json");

        stepchain()
            .current_dir(dir.path())
            .env("STEPCHAIN_STATE_FILE", &from_env)
            .args(["submit", "chain.json", "--ui", "minimal"])
            .assert()
            .success();

        assert!(from_env.is_file());
    }
}

// =============================================================================
// Command worker
// =============================================================================

#[cfg(unix)]
mod command_worker {
    use super::*;

    #[test]
    fn test_command_task_runs_shell() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        write_definition(
            &dir,
            "cmd.json",
            r#"{"steps": [[{"task_id": "touch", "worker_kind": "command",
                            "worker_config": {"command": "echo '<progress>50%</progress>' && touch made-it"}}]]}"#,
        );

        stepchain()
            .current_dir(dir.path())
            .args(["submit", "cmd.json", "--ui", "minimal"])
            .assert()
            .success();

        assert!(dir.path().join("made-it").exists());
    }

    #[test]
    fn test_command_worker_can_be_disabled() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        fs::write(
            dir.path().join(".stepchain/stepchain.toml"),
            "[workers]\ncommand_enabled = false\n",
        )
        .unwrap();
        write_definition(
            &dir,
            "cmd.json",
            r#"{"steps": [[{"task_id": "touch", "worker_kind": "command",
                            "worker_config": {"command": "touch made-it"}}]]}"#,
        );

        stepchain()
            .current_dir(dir.path())
            .args(["submit", "cmd.json", "--ui", "minimal"])
            .assert()
            .failure();

        assert!(!dir.path().join("made-it").exists());
    }
}

// =============================================================================
// Resume after restart
// =============================================================================

mod resume {
    use super::*;

    #[test]
    fn test_resume_finishes_interrupted_chain() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        let record = ChainRecord::create_initial(
            "interrupted_1",
            Some("interrupted"),
            noop_steps(&[&["a"], &["b"], &["c"]]),
        )
        .unwrap()
        .advance()
        .unwrap();
        write_state(&dir.path().join(".stepchain/chains.json"), &[record]);

        stepchain()
            .current_dir(dir.path())
            .args(["resume", "--ui", "minimal"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Resuming 1 interrupted chain(s)"))
            .stdout(predicate::str::contains("completed interrupted_1 (2 step(s) run)"));

        let chains = list_json(&dir);
        assert_eq!(chains[0]["completed"], true);
        assert_eq!(chains[0]["current_step"], 3);
    }

    #[test]
    fn test_resume_with_nothing_to_do() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);

        stepchain()
            .current_dir(dir.path())
            .args(["resume", "--ui", "minimal"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No interrupted chains"));
    }

    #[test]
    fn test_submit_resumes_interrupted_chains_first() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        let record = ChainRecord::create_initial(
            "left_over",
            None,
            noop_steps(&[&["x"], &["y"]]),
        )
        .unwrap();
        write_state(&dir.path().join(".stepchain/chains.json"), &[record]);
        write_definition(&dir, "chain.json", TWO_STEP_CHAIN);

        stepchain()
            .current_dir(dir.path())
            .args(["submit", "chain.json", "--ui", "minimal"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Resuming 1 interrupted chain(s)"));

        let chains = list_json(&dir);
        assert_eq!(chains.len(), 2);
        assert!(chains.iter().all(|c| c["completed"] == true));
    }

    #[test]
    fn test_corrupt_state_file_starts_empty() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        fs::write(dir.path().join(".stepchain/chains.json"), "{{{ not json").unwrap();

        stepchain()
            .current_dir(dir.path())
            .args(["resume", "--ui", "minimal"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No interrupted chains"));

        assert!(list_json(&dir).is_empty());
    }
}

// =============================================================================
// Inspection and cleanup
// =============================================================================

mod chains {
    use super::*;

    #[test]
    fn test_list_empty_project() {
        let dir = create_temp_project();

        stepchain()
            .current_dir(dir.path())
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("No chains recorded"));
    }

    #[test]
    fn test_status_shows_progress() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        let record = ChainRecord::create_initial(
            "halfway",
            Some("Halfway"),
            noop_steps(&[&["a"], &["b"]]),
        )
        .unwrap()
        .advance()
        .unwrap();
        write_state(&dir.path().join(".stepchain/chains.json"), &[record]);

        stepchain()
            .current_dir(dir.path())
            .args(["status", "halfway"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Halfway"))
            .stdout(predicate::str::contains("1/2 steps (50%)"))
            .stdout(predicate::str::contains("incomplete"));
    }

    #[test]
    fn test_status_unknown_chain() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);

        stepchain()
            .current_dir(dir.path())
            .args(["status", "ghost"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Chain ghost not found"));
    }

    #[test]
    fn test_clear_requires_force() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        let record =
            ChainRecord::create_initial("keep_me", None, noop_steps(&[&["a"]])).unwrap();
        write_state(&dir.path().join(".stepchain/chains.json"), &[record]);

        stepchain()
            .current_dir(dir.path())
            .arg("clear")
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));
        assert_eq!(list_json(&dir).len(), 1);

        stepchain()
            .current_dir(dir.path())
            .args(["clear", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cleared 1 chain(s)"));
        assert!(list_json(&dir).is_empty());
    }

    #[test]
    fn test_cleanup_keeps_incomplete_unless_abandoned() {
        let dir = create_temp_project();
        init_stepchain_project(&dir);
        let old = chrono::Utc::now() - chrono::Duration::days(30);

        let mut stale = ChainRecord::create_initial("stale", None, noop_steps(&[&["a"]])).unwrap();
        stale.last_updated_at = old;
        let mut done = ChainRecord::create_initial("done", None, noop_steps(&[&["b"]]))
            .unwrap()
            .completed_at(old);
        done.last_updated_at = old;
        write_state(&dir.path().join(".stepchain/chains.json"), &[stale, done]);

        stepchain()
            .current_dir(dir.path())
            .arg("cleanup")
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 1 expired completed chain(s)"));
        assert_eq!(list_json(&dir).len(), 1);

        stepchain()
            .current_dir(dir.path())
            .args(["cleanup", "--abandoned"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 1 abandoned chain(s)"))
            .stdout(predicate::str::contains("stale"));
        assert!(list_json(&dir).is_empty());
    }
}
