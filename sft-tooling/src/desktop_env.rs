//! The desktop environment seam.
//!
//! Everything that touches the VM goes through [`DesktopEnv`]. The shipped
//! implementation, [`HttpDesktopEnv`], talks to the control server running
//! inside the guest. Provider lifecycle (snapshot revert) and evaluation are
//! delegated to operator-supplied shell commands.

use crate::notebook::read_json;
use crate::{Result, ToolingError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One entry of a task's `config` setup list
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SetupStep {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Task configuration as stored under `evaluation_examples/examples/<domain>/<id>.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub id: String,
    pub instruction: String,
    #[serde(default)]
    pub config: Vec<SetupStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// File the config was loaded from, if any
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl TaskConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let value = read_json(path)?;
        let mut config: TaskConfig =
            serde_json::from_value(value).map_err(|e| ToolingError::json(path, e))?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }
}

/// Response of the in-guest `/execute` endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub returncode: Option<i32>,
}

impl CommandResult {
    /// The VM-reported error, if non-empty
    pub fn error(&self) -> Option<&str> {
        let trimmed = self.error.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

#[async_trait]
pub trait DesktopEnv: Send + Sync {
    /// Bring the environment to the task's initial state
    async fn reset(&mut self, task: &TaskConfig) -> Result<()>;

    /// Current screen as encoded image bytes, `None` when not yet available
    async fn screenshot(&self) -> Result<Option<Vec<u8>>>;

    async fn execute_python(&self, command: &str) -> Result<CommandResult>;

    async fn start_recording(&self) -> Result<()>;

    /// Stop recording and store the video at `dest`
    async fn end_recording(&self, dest: &Path) -> Result<Option<PathBuf>>;

    /// Score the final state of `task`
    async fn evaluate(&self, task: &TaskConfig, result_dir: &Path) -> Result<f64>;

    async fn close(&mut self) -> Result<()>;
}

/// Connection settings for [`HttpDesktopEnv`]
#[derive(Debug, Clone)]
pub struct HttpDesktopEnvConfig {
    pub host: String,
    pub port: u16,
    /// Interpreter used inside the guest for `/execute`
    pub python: String,
    pub request_timeout: Duration,
    /// Shell command run before setup steps, e.g. a snapshot revert
    pub vm_reset_command: Option<String>,
    /// Shell command printing a score on its last stdout line.
    /// `{task}` and `{result_dir}` are substituted.
    pub evaluator_command: Option<String>,
}

impl Default for HttpDesktopEnvConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
            python: "python3".to_string(),
            request_timeout: Duration::from_secs(60),
            vm_reset_command: None,
            evaluator_command: None,
        }
    }
}

/// HTTP client for the control server running inside the VM
pub struct HttpDesktopEnv {
    config: HttpDesktopEnvConfig,
    client: reqwest::Client,
    base_url: String,
}

impl HttpDesktopEnv {
    pub fn new(config: HttpDesktopEnvConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let base_url = format!("http://{}:{}", config.host, config.port);
        Ok(Self {
            config,
            client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_setup(&self, path: &str, payload: Value) -> Result<()> {
        let response = self.client.post(self.url(path)).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ToolingError::Vm(format!("{path} returned {status}: {body}")));
        }
        Ok(())
    }

    async fn run_setup_step(&self, step: &SetupStep) -> Result<()> {
        let params = &step.parameters;
        let shell = params.get("shell").and_then(Value::as_bool).unwrap_or(false);

        match step.kind.as_str() {
            "launch" => {
                let payload = json!({ "command": params.get("command"), "shell": shell });
                self.post_setup("/setup/launch", payload).await
            }
            "execute" | "command" => {
                let payload = json!({ "command": params.get("command"), "shell": shell });
                self.post_setup("/setup/execute", payload).await
            }
            "open" => {
                let payload = json!({ "path": params.get("path") });
                self.post_setup("/setup/open_file", payload).await
            }
            "sleep" => {
                let seconds = params.get("seconds").and_then(Value::as_f64).unwrap_or(1.0);
                tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
                Ok(())
            }
            other => {
                warn!(
                    "Setup step type '{}' is not handled by the HTTP controller, skipping",
                    other
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DesktopEnv for HttpDesktopEnv {
    async fn reset(&mut self, task: &TaskConfig) -> Result<()> {
        if let Some(command) = &self.config.vm_reset_command {
            info!("Resetting VM: {}", command);
            let output = run_shell(command).await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(ToolingError::Vm(format!("VM reset failed: {}", stderr.trim())));
            }
        }

        for (index, step) in task.config.iter().enumerate() {
            debug!("Setup step {}: {}", index + 1, step.kind);
            self.run_setup_step(step).await?;
        }
        Ok(())
    }

    async fn screenshot(&self) -> Result<Option<Vec<u8>>> {
        let response = self.client.get(self.url("/screenshot")).send().await?;
        if !response.status().is_success() {
            debug!("Screenshot not available: {}", response.status());
            return Ok(None);
        }
        let bytes = response.bytes().await?;
        Ok((!bytes.is_empty()).then(|| bytes.to_vec()))
    }

    async fn execute_python(&self, command: &str) -> Result<CommandResult> {
        let payload = json!({
            "command": [self.config.python, "-c", command],
            "shell": false,
        });
        let response = self
            .client
            .post(self.url("/execute"))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ToolingError::Vm(format!("/execute returned {status}: {body}")));
        }
        Ok(response.json().await?)
    }

    async fn start_recording(&self) -> Result<()> {
        let response = self.client.post(self.url("/start_recording")).send().await?;
        if !response.status().is_success() {
            return Err(ToolingError::Vm(format!(
                "Failed to start recording: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn end_recording(&self, dest: &Path) -> Result<Option<PathBuf>> {
        let response = self.client.post(self.url("/end_recording")).send().await?;
        if !response.status().is_success() {
            warn!("Failed to end recording: {}", response.status());
            return Ok(None);
        }
        let bytes = response.bytes().await?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ToolingError::io(parent, e))?;
        }
        std::fs::write(dest, &bytes).map_err(|e| ToolingError::io(dest, e))?;
        Ok(Some(dest.to_path_buf()))
    }

    async fn evaluate(&self, task: &TaskConfig, result_dir: &Path) -> Result<f64> {
        let template = self
            .config
            .evaluator_command
            .as_deref()
            .ok_or(ToolingError::EvaluatorUnavailable)?;

        let task_path = match &task.source_path {
            Some(path) => path.clone(),
            None => {
                let path = result_dir.join("task_config.json");
                crate::notebook::write_json_pretty(&path, task)?;
                path
            }
        };

        let command = template
            .replace("{task}", &task_path.display().to_string())
            .replace("{result_dir}", &result_dir.display().to_string());
        debug!("Running evaluator: {}", command);

        let output = run_shell(&command).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolingError::Evaluator(stderr.trim().to_string()));
        }
        parse_score(&String::from_utf8_lossy(&output.stdout))
    }

    async fn close(&mut self) -> Result<()> {
        debug!("Closing connection to {}", self.base_url);
        Ok(())
    }
}

/// Score printed on the last non-empty line of evaluator output
pub fn parse_score(stdout: &str) -> Result<f64> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| ToolingError::Evaluator("evaluator printed nothing".to_string()))?;
    line.parse::<f64>()
        .map_err(|_| ToolingError::Evaluator(format!("'{line}' is not a score")))
}

async fn run_shell(command: &str) -> Result<std::process::Output> {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    };
    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };

    cmd.output()
        .await
        .map_err(|e| ToolingError::io(PathBuf::from(command), e))
}

/// Poll until a screenshot is available or `timeout` elapses
pub async fn wait_for_observation(
    env: &dyn DesktopEnv,
    timeout: Duration,
    poll_interval: Duration,
) -> Option<Vec<u8>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match env.screenshot().await {
            Ok(Some(bytes)) => return Some(bytes),
            Ok(None) => {}
            Err(e) => debug!("Observation not ready: {}", e),
        }
        if tokio::time::Instant::now() + poll_interval > deadline {
            return None;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Decode and store a screenshot. Failures are logged, not propagated.
pub fn save_screenshot(bytes: &[u8], path: &Path) -> bool {
    let result = image::load_from_memory(bytes).and_then(|img| img.save(path));
    match result {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to save screenshot to {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_score_uses_last_line() {
        assert_eq!(parse_score("loading...\n0.5\n\n").unwrap(), 0.5);
        assert_eq!(parse_score("1").unwrap(), 1.0);
        assert!(parse_score("").is_err());
        assert!(parse_score("done\n").is_err());
    }

    #[test]
    fn test_task_config_keeps_unknown_fields() {
        let task: TaskConfig = serde_json::from_value(json!({
            "id": "abc",
            "instruction": "Do the thing",
            "snapshot": "chrome",
            "config": [{ "type": "sleep", "parameters": { "seconds": 0.5 } }]
        }))
        .unwrap();
        assert_eq!(task.config[0].kind, "sleep");
        assert_eq!(task.extra.get("snapshot"), Some(&json!("chrome")));
        assert!(task.evaluator.is_none());
    }

    #[test]
    fn test_command_result_error() {
        let ok = CommandResult {
            error: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(ok.error(), None);

        let failed = CommandResult {
            error: "NameError: x\n".to_string(),
            ..Default::default()
        };
        assert_eq!(failed.error(), Some("NameError: x"));
    }

    #[test]
    fn test_save_screenshot_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(!save_screenshot(b"not an image", &dir.path().join("x.png")));
    }
}
