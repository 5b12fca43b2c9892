//! Replay a recorded trajectory against a fresh environment and re-score it.

use crate::action::{normalise_action, replay_command, ReplayCommand};
use crate::desktop_env::{save_screenshot, DesktopEnv, TaskConfig};
use crate::manual_run::{write_score, SCORE_FILE};
use crate::notebook::write_json_pretty;
use crate::{Result, ToolingError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SUMMARY_FILE: &str = "verification_summary.json";

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub sleep_after_execution: Duration,
    pub max_steps: usize,
    /// Reset attempts when the VM reports it is not powered on
    pub env_start_retries: u32,
    pub retry_delay: Duration,
    /// Abort on the first VM-reported execution error
    pub stop_on_error: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            sleep_after_execution: Duration::from_millis(200),
            max_steps: 1000,
            env_start_retries: 3,
            retry_delay: Duration::from_secs(10),
            stop_on_error: false,
        }
    }
}

/// Read JSON Lines where every non-blank line must be an object
pub fn load_jsonl_strict(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let content = std::fs::read_to_string(path).map_err(|e| ToolingError::io(path, e))?;

    let mut entries = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(line).map_err(|e| ToolingError::InvalidTrajectory {
                line: index + 1,
                message: format!("failed to decode JSON: {e}"),
            })?;
        match value {
            Value::Object(map) => entries.push(map),
            other => {
                return Err(ToolingError::InvalidTrajectory {
                    line: index + 1,
                    message: format!("not an object: {other}"),
                })
            }
        }
    }
    Ok(entries)
}

/// Outcome of replaying a step list
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReplayOutcome {
    pub executed_steps: usize,
    /// A `DONE` or `FAIL` control action was reached
    pub done: bool,
    /// Control action that ended the replay, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_action: Option<String>,
    /// Last `/execute` response or control marker
    pub info: Value,
}

async fn snapshot(env: &dyn DesktopEnv, path: &Path) {
    match env.screenshot().await {
        Ok(Some(bytes)) => {
            save_screenshot(&bytes, path);
        }
        Ok(None) => debug!("No screenshot for {}", path.display()),
        Err(e) => warn!("Screenshot failed for {}: {}", path.display(), e),
    }
}

/// Execute every recorded action in order, saving a screenshot after each
pub async fn replay_trajectory(
    env: &dyn DesktopEnv,
    steps: &[Map<String, Value>],
    config: &ReplayConfig,
    result_dir: &Path,
) -> Result<ReplayOutcome> {
    snapshot(env, &result_dir.join("step_initial.png")).await;

    let mut outcome = ReplayOutcome {
        info: Value::Object(Map::new()),
        ..Default::default()
    };

    for (index, step) in steps.iter().enumerate() {
        if index >= config.max_steps {
            warn!("Reached max_steps limit ({}); stopping replay", config.max_steps);
            break;
        }

        let action = normalise_action(step.get("action"));
        if action.is_empty() {
            debug!("Skipping empty action at index {}", index);
            continue;
        }

        info!("Replaying step {}: {}", index, action);
        match replay_command(&action) {
            ReplayCommand::Control(control) => {
                debug!("Executing control action {}", control);
                if control == "WAIT" {
                    tokio::time::sleep(config.sleep_after_execution).await;
                } else {
                    outcome.done = true;
                    outcome.terminal_action = Some(control.clone());
                }
                outcome.info = serde_json::json!({ "action": control });
            }
            ReplayCommand::Python(command) => {
                debug!("Executing python command:\n{}", command);
                let result = env.execute_python(&command).await?;
                if let Some(vm_error) = result.error() {
                    let message = format!("VM error while executing command: {vm_error}");
                    if config.stop_on_error {
                        return Err(ToolingError::Vm(message));
                    }
                    warn!("{}", message);
                }
                outcome.info = serde_json::to_value(&result)?;
                tokio::time::sleep(config.sleep_after_execution).await;
            }
        }
        outcome.executed_steps += 1;

        snapshot(env, &result_dir.join(format!("step_{index:04}_after.png"))).await;

        if outcome.done {
            info!("Replay reached {} after step {}", action, index);
            break;
        }
    }

    Ok(outcome)
}

/// `trajectory_verifications/<stem>_<YYYYmmdd_HHMMSS>`
pub fn default_result_dir(trajectory_path: &Path) -> PathBuf {
    let stem = trajectory_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trajectory".to_string());
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from("trajectory_verifications").join(format!("{stem}_{timestamp}"))
}

/// Contents of `verification_summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct VerificationSummary {
    pub trajectory_file: PathBuf,
    pub task_config: PathBuf,
    pub executed_steps: usize,
    pub reported_steps: usize,
    pub done: bool,
    pub info: Value,
    pub evaluation_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn reset_with_retries(
    env: &mut dyn DesktopEnv,
    task: &TaskConfig,
    config: &ReplayConfig,
) -> Result<()> {
    let attempts = config.env_start_retries.max(1);
    let mut errors = Vec::new();

    for attempt in 1..=attempts {
        match env.reset(task).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                let message = e.to_string();
                let retryable = message.to_lowercase().contains("not powered on");
                errors.push(message);
                if !retryable {
                    return Err(e);
                }
                if attempt < attempts {
                    warn!(
                        "VM reported 'not powered on'. Waiting {}s and retrying ({}/{})",
                        config.retry_delay.as_secs(),
                        attempt,
                        attempts
                    );
                    tokio::time::sleep(config.retry_delay).await;
                }
            }
        }
    }

    Err(ToolingError::Vm(format!(
        "Environment reset failed after retries. Last errors: {}",
        errors.join(" | ")
    )))
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Reset, replay, evaluate, and record a summary in `result_dir`.
///
/// The env is closed and the summary written even when a stage fails; the
/// first failure is then returned.
pub async fn verify_trajectory(
    env: &mut dyn DesktopEnv,
    trajectory_path: &Path,
    task_config_path: &Path,
    result_dir: &Path,
    config: &ReplayConfig,
) -> Result<VerificationSummary> {
    std::fs::create_dir_all(result_dir).map_err(|e| ToolingError::io(result_dir, e))?;

    info!("Loading task config from {}", task_config_path.display());
    let task = TaskConfig::load(task_config_path)?;

    info!("Loading trajectory from {}", trajectory_path.display());
    let steps = load_jsonl_strict(trajectory_path)?;
    info!("Loaded {} steps", steps.len());

    let mut summary = VerificationSummary {
        trajectory_file: absolute(trajectory_path),
        task_config: absolute(task_config_path),
        executed_steps: 0,
        reported_steps: steps.len(),
        done: false,
        info: Value::Object(Map::new()),
        evaluation_score: None,
        error: None,
    };

    let result = run_verification(env, &task, &steps, config, result_dir, &mut summary).await;
    if let Err(e) = &result {
        summary.error = Some(e.to_string());
    }

    info!("Closing environment");
    if let Err(e) = env.close().await {
        warn!("Failed to close environment: {}", e);
    }

    let summary_path = result_dir.join(SUMMARY_FILE);
    write_json_pretty(&summary_path, &summary)?;
    info!("Saved summary to {}", summary_path.display());

    result.map(|()| summary)
}

async fn run_verification(
    env: &mut dyn DesktopEnv,
    task: &TaskConfig,
    steps: &[Map<String, Value>],
    config: &ReplayConfig,
    result_dir: &Path,
    summary: &mut VerificationSummary,
) -> Result<()> {
    info!("Resetting environment for task");
    reset_with_retries(env, task, config).await?;

    info!("Replaying trajectory");
    let outcome = replay_trajectory(&*env, steps, config, result_dir).await?;
    summary.executed_steps = outcome.executed_steps;
    summary.done = outcome.done;
    summary.info = outcome.info;

    if !outcome.done {
        warn!("Trajectory replay finished without DONE/FAIL signal");
    }

    info!("Running evaluator");
    let score = env.evaluate(task, result_dir).await?;
    summary.evaluation_score = Some(score);
    info!("Evaluation score: {}", score);

    write_score(&result_dir.join(SCORE_FILE), score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_strict_jsonl_rejects_non_objects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");

        std::fs::write(&path, "{\"action\": \"pg.click()\"}\n\n{\"action\": null}\n").unwrap();
        assert_eq!(load_jsonl_strict(&path).unwrap().len(), 2);

        std::fs::write(&path, "{\"action\": 1}\n[1, 2]\n").unwrap();
        match load_jsonl_strict(&path) {
            Err(ToolingError::InvalidTrajectory { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected InvalidTrajectory, got {other:?}"),
        }

        std::fs::write(&path, "{oops\n").unwrap();
        assert!(matches!(
            load_jsonl_strict(&path),
            Err(ToolingError::InvalidTrajectory { line: 1, .. })
        ));
    }

    #[test]
    fn test_default_result_dir_uses_stem() {
        let dir = default_result_dir(Path::new("/runs/abc/trajectory.jsonl"));
        assert!(dir.starts_with("trajectory_verifications"));
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("trajectory_"));
        assert_eq!(name.len(), "trajectory_".len() + "YYYYmmdd_HHMMSS".len());
    }
}
