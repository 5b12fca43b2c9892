//! Per-step trajectory logs (`trajectory.jsonl`) and their notebook export.

use crate::action::expand_pg;
use crate::notebook::{action_cell, post_cell, pre_cell, user_cell, Notebook};
use crate::{Result, ToolingError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TRAJECTORY_FILE: &str = "trajectory.jsonl";
pub const DEFAULT_INSTRUCTION: &str = "Complete the given task";

/// Screenshot file names captured around a step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_after: Option<String>,
}

/// One line of `trajectory.jsonl`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepLog {
    pub step: usize,
    #[serde(default)]
    pub observation: StepObservation,
    #[serde(default)]
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepLog {
    pub fn new(step: usize, instruction: &str) -> Self {
        Self {
            step,
            instruction: instruction.to_string(),
            ..Default::default()
        }
    }
}

fn is_terminal_action(action: &str) -> bool {
    action.eq_ignore_ascii_case("done") || action.eq_ignore_ascii_case("exit")
}

/// Build a step-based notebook from a trajectory
pub fn generate_notebook(instruction: &str, steps: &[StepLog]) -> Notebook {
    let mut notebook = Notebook::new();
    notebook.push(user_cell(instruction));

    let mut counter: u32 = 1;
    for step in steps {
        let Some(action) = step.action.as_deref() else {
            continue;
        };
        if is_terminal_action(action) {
            continue;
        }

        if let Some(before) = &step.observation.screenshot_before {
            notebook.push(pre_cell(counter, before));
        }

        notebook.push(action_cell(&expand_pg(action)));

        if let Some(after) = &step.observation.screenshot_after {
            notebook.push(post_cell(counter, after));
        }

        counter += 1;
    }

    notebook
}

/// Default id for a freshly recorded manual task
pub fn manual_task_id() -> String {
    format!("osw.manual_task.{}", chrono::Utc::now().timestamp())
}

/// Write `<dir>/<task_id>.ipynb` and return its path
pub fn write_notebook(notebook: &Notebook, dir: &Path, task_id: &str) -> Result<PathBuf> {
    let path = dir.join(format!("{task_id}.ipynb"));
    notebook.write_to(&path)?;
    Ok(path)
}

pub fn save_trajectory(path: &Path, steps: &[StepLog]) -> Result<()> {
    let mut file = std::fs::File::create(path).map_err(|e| ToolingError::io(path, e))?;
    for step in steps {
        let line = serde_json::to_string(step)?;
        writeln!(file, "{line}").map_err(|e| ToolingError::io(path, e))?;
    }
    Ok(())
}

/// Read a JSON Lines trajectory, skipping blank lines
pub fn load_trajectory(path: &Path) -> Result<Vec<StepLog>> {
    let content = std::fs::read_to_string(path).map_err(|e| ToolingError::io(path, e))?;
    let mut steps = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let step = serde_json::from_str(line).map_err(|e| ToolingError::InvalidTrajectory {
            line: index + 1,
            message: e.to_string(),
        })?;
        steps.push(step);
    }
    debug!("Loaded {} steps from {}", steps.len(), path.display());
    Ok(steps)
}

/// Export an existing `trajectory.jsonl` as `osw.manual.<stem>.ipynb`
pub fn notebook_from_trajectory_file(
    trajectory_path: &Path,
    instruction: &str,
    output_dir: Option<&Path>,
) -> Result<PathBuf> {
    let steps = load_trajectory(trajectory_path)?;

    let stem = trajectory_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("trajectory");
    let task_id = format!("osw.manual.{stem}");

    let dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => trajectory_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };

    write_notebook(&generate_notebook(instruction, &steps), &dir, &task_id)
}
