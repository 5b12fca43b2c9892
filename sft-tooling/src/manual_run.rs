//! Interactive manual recording sessions.
//!
//! An operator types actions one at a time; each one is executed in the VM
//! with before/after screenshots. At the end the session leaves a
//! `trajectory.jsonl`, a step notebook, the screen recording and an
//! evaluation score in the task's result directory.

use crate::action::{manual_command, ManualInput};
use crate::desktop_env::{save_screenshot, wait_for_observation, DesktopEnv, TaskConfig};
use crate::notebook::read_json;
use crate::trajectory::{
    generate_notebook, manual_task_id, save_trajectory, write_notebook, StepLog, TRAJECTORY_FILE,
};
use crate::{Result, ToolingError};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, error, info, warn};

pub const RECORDING_FILE: &str = "recording.mp4";
pub const SCORE_FILE: &str = "evaluation_score.txt";

/// Where manual actions come from
#[async_trait]
pub trait ActionSource: Send {
    /// Next raw input line, `None` on end of input or interrupt
    async fn next_action(&mut self, prompt: &str) -> Result<Option<String>>;
}

/// Reads actions from the terminal; Ctrl-C ends the session
pub struct StdinActionSource {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinActionSource {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinActionSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionSource for StdinActionSource {
    async fn next_action(&mut self, prompt: &str) -> Result<Option<String>> {
        print!("{prompt}");
        let _ = std::io::stdout().flush();

        tokio::select! {
            line = self.lines.next_line() => {
                line.map_err(|e| ToolingError::io("<stdin>", e))
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting manual run.");
                Ok(None)
            }
        }
    }
}

/// Replays a fixed list of actions, e.g. from a script file
#[derive(Debug, Clone, Default)]
pub struct ScriptedActionSource {
    actions: VecDeque<String>,
}

impl ScriptedActionSource {
    pub fn new<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
        }
    }

    /// One action per line; lines starting with `#` are comments
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ToolingError::io(path, e))?;
        Ok(Self::new(
            content
                .lines()
                .filter(|line| !line.trim_start().starts_with('#'))
                .map(str::to_string),
        ))
    }
}

#[async_trait]
impl ActionSource for ScriptedActionSource {
    async fn next_action(&mut self, prompt: &str) -> Result<Option<String>> {
        let next = self.actions.pop_front();
        debug!("{} -> {:?}", prompt.trim(), next);
        Ok(next)
    }
}

/// Timing and limits for a manual session
#[derive(Debug, Clone)]
pub struct ManualRunConfig {
    pub max_steps: usize,
    pub sleep_after_execution: Duration,
    pub observation_timeout: Duration,
    pub poll_interval: Duration,
    /// Pause after reset so guest services can settle
    pub warmup: Duration,
    pub screen_width: u32,
    pub screen_height: u32,
    pub show_progress: bool,
}

impl Default for ManualRunConfig {
    fn default() -> Self {
        Self {
            max_steps: 150,
            sleep_after_execution: Duration::from_secs(1),
            observation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            warmup: Duration::from_secs(10),
            screen_width: 1920,
            screen_height: 1080,
            show_progress: true,
        }
    }
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Done,
    Exited,
    Interrupted,
    MaxSteps,
}

#[derive(Debug, Clone)]
pub struct ManualRunOutcome {
    pub end: SessionEnd,
    pub steps: Vec<StepLog>,
    pub recording: Option<PathBuf>,
    pub notebook_path: Option<PathBuf>,
    pub score: Option<f64>,
}

async fn capture(env: &dyn DesktopEnv, path: &Path, config: &ManualRunConfig) -> Option<String> {
    let bytes = wait_for_observation(env, config.observation_timeout, config.poll_interval).await?;
    save_screenshot(&bytes, path).then(|| file_name(path))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Run one task interactively and write its artifacts into `result_dir`
pub async fn run_single_example_manual(
    env: &mut dyn DesktopEnv,
    source: &mut dyn ActionSource,
    task: &TaskConfig,
    config: &ManualRunConfig,
    result_dir: &Path,
) -> Result<ManualRunOutcome> {
    std::fs::create_dir_all(result_dir).map_err(|e| ToolingError::io(result_dir, e))?;
    let instruction = task.instruction.as_str();

    env.reset(task).await?;
    let initial = wait_for_observation(&*env, config.observation_timeout, config.poll_interval).await;

    if let Err(e) = env.start_recording().await {
        warn!("Screen recording unavailable: {}", e);
    }

    println!("Initializing VM and services...");
    tokio::time::sleep(config.warmup).await;

    if let Some(bytes) = initial {
        save_screenshot(&bytes, &result_dir.join("step_0.png"));
    }

    let rule = "=".repeat(50);
    println!("\n{rule}");
    println!("Instruction: {instruction}");
    println!("{rule}");
    println!("Enter actions one by one. Type 'done' to finish the task, or 'exit' to quit.");
    println!(
        "Mouse coordinates are based on a {}x{} screen resolution.",
        config.screen_width, config.screen_height
    );

    let mut trajectory = Vec::new();
    let mut end = SessionEnd::MaxSteps;

    for step in 0..config.max_steps {
        let prompt = format!(
            "\nStep {}/{} | Enter action (e.g., pg.click(100, 200)): ",
            step + 1,
            config.max_steps
        );
        let Some(line) = source.next_action(&prompt).await? else {
            end = SessionEnd::Interrupted;
            break;
        };

        let action = match ManualInput::parse(&line) {
            ManualInput::Exit => {
                println!("Exiting current task.");
                end = SessionEnd::Exited;
                break;
            }
            ManualInput::Done => {
                println!("Task marked as done.");
                end = SessionEnd::Done;
                break;
            }
            ManualInput::Action(action) => action,
        };

        let mut log = StepLog::new(step, instruction);
        let pre = result_dir.join(format!("step_{}_pre.png", step + 1));
        log.observation.screenshot_before = capture(&*env, &pre, config).await;

        let command = manual_command(&action);
        match env.execute_python(&command).await {
            Ok(result) => {
                if let Some(vm_error) = result.error() {
                    println!("  -> Error from VM: {vm_error}");
                }

                match env.screenshot().await {
                    Ok(Some(bytes)) => {
                        let post = result_dir.join(format!("step_{}_post.png", step + 1));
                        if save_screenshot(&bytes, &post) {
                            log.observation.screenshot_after = Some(file_name(&post));
                        }
                    }
                    Ok(None) => warn!("No screenshot available after step {}", step + 1),
                    Err(e) => error!("Failed to capture screenshot: {}", e),
                }

                println!("  -> Executed: {action}");
                log.info = Some(serde_json::to_value(&result)?);
                log.action = Some(action);
            }
            Err(e) => {
                println!("  -> An error occurred during execution: {e}");
                log.error = Some(e.to_string());
                log.action = Some(action);
            }
        }

        trajectory.push(log);

        if !config.sleep_after_execution.is_zero() {
            tokio::time::sleep(config.sleep_after_execution).await;
        }
    }

    let recording = match env.end_recording(&result_dir.join(RECORDING_FILE)).await {
        Ok(Some(path)) => {
            println!("Video saved to {}", path.display());
            Some(path)
        }
        Ok(None) => None,
        Err(e) => {
            error!("Failed to save recording: {}", e);
            None
        }
    };

    let trajectory_path = result_dir.join(TRAJECTORY_FILE);
    save_trajectory(&trajectory_path, &trajectory)?;
    println!("Trajectory saved to {}", trajectory_path.display());

    let notebook = generate_notebook(instruction, &trajectory);
    let notebook_path = match write_notebook(&notebook, result_dir, &manual_task_id()) {
        Ok(path) => {
            println!("SFT Notebook saved to {}", path.display());
            Some(path)
        }
        Err(e) => {
            error!("Failed to generate SFT notebook: {}", e);
            None
        }
    };

    let score = match env.evaluate(task, result_dir).await {
        Ok(score) => {
            println!("Evaluation score: {score}");
            if let Err(e) = write_score(&result_dir.join(SCORE_FILE), score) {
                error!("Failed to write evaluation score: {}", e);
            }
            Some(score)
        }
        Err(e) => {
            error!("Failed to evaluate task: {}", e);
            None
        }
    };

    println!("{rule}\n");

    Ok(ManualRunOutcome {
        end,
        steps: trajectory,
        recording,
        notebook_path,
        score,
    })
}

pub fn write_score(path: &Path, score: f64) -> Result<()> {
    std::fs::write(path, score.to_string()).map_err(|e| ToolingError::io(path, e))
}

/// Domains in file order, each with its example ids
pub type TaskMeta = Vec<(String, Vec<String>)>;

fn parse_meta(value: Value, path: &Path) -> Result<TaskMeta> {
    let Value::Object(map) = value else {
        return Err(ToolingError::InvalidArgument(format!(
            "{} must map domains to task id lists",
            path.display()
        )));
    };

    let mut meta = Vec::with_capacity(map.len());
    for (domain, ids) in map {
        let ids = match ids {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(id) => Some(id),
                    other => {
                        warn!("Ignoring non-string task id {} in domain {}", other, domain);
                        None
                    }
                })
                .collect(),
            Value::String(id) => vec![id],
            other => {
                warn!("Ignoring domain {} with unexpected value {}", domain, other);
                continue;
            }
        };
        meta.push((domain, ids));
    }
    Ok(meta)
}

/// Load the meta index, keeping only `domain` unless it is `all`
pub fn load_task_meta(path: &Path, domain: &str) -> Result<TaskMeta> {
    let meta = parse_meta(read_json(path)?, path)?;
    if domain == "all" {
        return Ok(meta);
    }
    let ids = meta
        .into_iter()
        .find(|(name, _)| name == domain)
        .map(|(_, ids)| ids)
        .unwrap_or_default();
    Ok(vec![(domain.to_string(), ids)])
}

/// Load a hand-picked task file; ids may carry a `.json` suffix
pub fn load_task_file(path: &Path) -> Result<TaskMeta> {
    let meta = parse_meta(read_json(path)?, path)?;
    Ok(meta
        .into_iter()
        .map(|(domain, ids)| {
            let ids = ids.into_iter().map(|id| id.replace(".json", "")).collect();
            (domain, ids)
        })
        .collect())
}

/// Locate `<base>/examples/<domain>/<id>.json`, falling back to the
/// underscore spelling of both domain and id.
pub fn resolve_config_path(base: &Path, domain: &str, example_id: &str) -> Result<PathBuf> {
    let examples = base.join("examples");
    let primary = examples.join(domain).join(format!("{example_id}.json"));
    if primary.is_file() {
        return Ok(primary);
    }

    let fallback = examples
        .join(domain.replace('-', "_"))
        .join(format!("{}.json", example_id.replace('-', "_")));
    if fallback.is_file() {
        debug!(
            "Resolved path mismatch: using {} instead of {}",
            fallback.display(),
            primary.display()
        );
        return Ok(fallback);
    }

    Err(ToolingError::ConfigNotFound {
        domain: domain.to_string(),
        example: example_id.to_string(),
        primary,
        fallback,
    })
}

/// Per-task results of a batch
#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<(String, String, ManualRunOutcome)>,
    pub failed: Vec<(String, String, String)>,
}

fn domain_bar(len: usize, domain: &str, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg} {wide_bar:.cyan/blue} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(format!("Domain {domain}"));
    bar
}

async fn run_task(
    env: &mut dyn DesktopEnv,
    source: &mut dyn ActionSource,
    config_base_dir: &Path,
    domain: &str,
    example_id: &str,
    example_dir: &Path,
    config: &ManualRunConfig,
) -> Result<ManualRunOutcome> {
    let config_path = resolve_config_path(config_base_dir, domain, example_id)?;
    let task = TaskConfig::load(&config_path)?;

    info!("Starting task: {} - {}", example_id, task.instruction);
    run_single_example_manual(env, source, &task, config, example_dir).await
}

/// Run every task in `tasks`, one result directory per `<domain>/<id>`.
/// A task that fails is logged and the batch moves on. The env is closed at the end.
pub async fn run_manual_batch(
    env: &mut dyn DesktopEnv,
    source: &mut dyn ActionSource,
    tasks: &TaskMeta,
    config_base_dir: &Path,
    result_dir: &Path,
    config: &ManualRunConfig,
) -> Result<BatchReport> {
    let mut report = BatchReport::default();

    for (domain, examples) in tasks {
        let bar = domain_bar(examples.len(), domain, config.show_progress);

        for example_id in examples {
            let outcome = run_task(
                &mut *env,
                &mut *source,
                config_base_dir,
                domain,
                example_id,
                &result_dir.join(domain).join(example_id),
                config,
            )
            .await;

            match outcome {
                Ok(outcome) => {
                    report
                        .completed
                        .push((domain.clone(), example_id.clone(), outcome));
                }
                Err(e) => {
                    error!("Task {}/{} failed: {}", domain, example_id, e);
                    report
                        .failed
                        .push((domain.clone(), example_id.clone(), e.to_string()));
                }
            }
            bar.inc(1);
        }
        bar.finish();
    }

    info!("All tasks completed. Closing environment.");
    env.close().await?;
    Ok(report)
}
