//! Worker that runs an external process.
//!
//! - `program` + `args` spawn the program directly
//! - `command` runs a shell line through `sh -c`
//!
//! Exit code 0 is success. Stdout lines of the form
//! `<progress>NN% optional text</progress>` are turned into progress events;
//! the last other non-empty stdout line becomes the outcome message.

use super::{Worker, WorkerContext, config_str, config_u64};
use crate::errors::WorkerError;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use stepchain_common::{TaskOutcome, WorkerConfig};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Stdout lines kept for the outcome data.
const STDOUT_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct CommandWorker {
    enabled: bool,
    default_timeout: Duration,
    base_dir: Option<PathBuf>,
}

impl Default for CommandWorker {
    fn default() -> Self {
        Self {
            enabled: true,
            default_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            base_dir: None,
        }
    }
}

impl CommandWorker {
    pub fn new(default_timeout: Duration, base_dir: Option<PathBuf>) -> Self {
        Self {
            enabled: true,
            default_timeout,
            base_dir,
        }
    }

    /// A command worker that refuses every task.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    fn build_command(&self, config: &WorkerConfig) -> Result<(Command, String), WorkerError> {
        let (mut cmd, label) = match (config_str(config, "program"), config_str(config, "command")) {
            (Some(program), _) => {
                let mut cmd = Command::new(program);
                cmd.args(string_list(config, "args")?);
                (cmd, program.to_string())
            }
            (None, Some(line)) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                (cmd, line.to_string())
            }
            (None, None) => {
                return Err(WorkerError::InvalidConfig(
                    "either 'program' or 'command' is required".to_string(),
                ));
            }
        };

        if let Some(env) = config.get("env") {
            let env = env
                .as_object()
                .ok_or_else(|| WorkerError::InvalidConfig("'env' must be a table".to_string()))?;
            for (key, value) in env {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                cmd.env(key, value);
            }
        }

        let working_dir = config_str(config, "working_dir").map(PathBuf::from);
        let working_dir = match (working_dir, &self.base_dir) {
            (Some(dir), Some(base)) if dir.is_relative() => Some(base.join(dir)),
            (Some(dir), _) => Some(dir),
            (None, base) => base.clone(),
        };
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok((cmd, label))
    }
}

#[async_trait]
impl Worker for CommandWorker {
    fn kind(&self) -> &str {
        "command"
    }

    fn description(&self) -> &str {
        if self.enabled {
            "Run an external program; exit code 0 is success"
        } else {
            "Run an external program (disabled in config)"
        }
    }

    async fn run(
        &self,
        ctx: &WorkerContext,
        config: &WorkerConfig,
    ) -> Result<TaskOutcome, WorkerError> {
        if !self.enabled {
            return Err(WorkerError::CommandDisabled);
        }

        let secs = config_u64(config, "timeout_secs")?.unwrap_or(self.default_timeout.as_secs());
        let (mut cmd, program) = self.build_command(config)?;

        tracing::debug!(task_id = %ctx.task_id, %program, timeout_secs = secs, "Spawning command");
        let mut child = cmd.spawn().map_err(|source| WorkerError::SpawnFailed {
            program: program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Dropping this future on timeout drops the child, which kills it.
        let run = async move {
            let (tail, stderr) = tokio::join!(read_stdout(stdout, ctx), read_all(stderr));
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, tail?, stderr?))
        };

        let (status, tail, stderr) = match timeout(Duration::from_secs(secs), run).await {
            Ok(result) => result?,
            Err(_) => return Err(WorkerError::Timeout { program, secs }),
        };

        let exit_code = status.code().unwrap_or(-1);
        let last_line = tail.back().cloned();
        let data = json!({
            "exit_code": exit_code,
            "stdout_tail": Vec::from(tail).join("\n"),
        });

        if status.success() {
            let mut outcome = TaskOutcome::success().with_data(data);
            if let Some(line) = last_line {
                outcome = outcome.with_message(line);
            }
            return Ok(outcome);
        }

        let reason = stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .or(last_line)
            .unwrap_or_else(|| format!("'{}' exited with code {}", program, exit_code));
        Ok(TaskOutcome::failure(reason).with_data(data))
    }
}

/// Parse a `<progress>NN% text</progress>` signal line.
///
/// The closing tag is optional. Returns the clamped percentage and any text
/// following it.
pub fn parse_progress_line(line: &str) -> Option<(u8, Option<String>)> {
    const OPEN: &str = "<progress>";
    const CLOSE: &str = "</progress>";

    let start = line.find(OPEN)? + OPEN.len();
    let content = match line[start..].find(CLOSE) {
        Some(end) => &line[start..start + end],
        None => &line[start..],
    };
    let content = content.trim();

    let digits = content.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let percent = content[..digits].parse::<u32>().ok()?.min(100) as u8;
    let rest = content[digits..].trim_start_matches('%').trim();
    let message = (!rest.is_empty()).then(|| rest.to_string());
    Some((percent, message))
}

async fn read_stdout(
    stdout: Option<impl AsyncRead + Unpin>,
    ctx: &WorkerContext,
) -> std::io::Result<VecDeque<String>> {
    let mut tail = VecDeque::with_capacity(STDOUT_TAIL_LINES);
    let Some(stdout) = stdout else {
        return Ok(tail);
    };

    // Lines are split on raw bytes so non-UTF-8 output never fails the read.
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some((percent, message)) = parse_progress_line(&line) {
            ctx.report_progress(percent, message);
            continue;
        }
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if tail.len() == STDOUT_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.to_string());
    }
    Ok(tail)
}

async fn read_all(stream: Option<impl AsyncRead + Unpin>) -> std::io::Result<String> {
    let mut text = String::new();
    if let Some(mut stream) = stream {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).await?;
        text = String::from_utf8_lossy(&bytes).into_owned();
    }
    Ok(text)
}

fn string_list(config: &WorkerConfig, key: &str) -> Result<Vec<String>, WorkerError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                _ => Err(WorkerError::InvalidConfig(format!(
                    "'{}' must contain only strings",
                    key
                ))),
            })
            .collect(),
        Some(_) => Err(WorkerError::InvalidConfig(format!("'{}' must be a list", key))),
    }
}
