#![allow(dead_code)]

use async_trait::async_trait;
use sft_tooling::{CommandResult, DesktopEnv, Result, TaskConfig, ToolingError};
use std::collections::VecDeque;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub fn tiny_png() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(4, 4));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// In-memory desktop that records what it was asked to do
pub struct MockDesktopEnv {
    pub png: Vec<u8>,
    pub executed: Mutex<Vec<String>>,
    /// Error text reported by every `/execute`
    pub vm_error: Option<String>,
    /// Errors returned by successive resets before one succeeds
    pub reset_failures: VecDeque<String>,
    pub resets: usize,
    pub score: Option<f64>,
    pub recording_started: Mutex<bool>,
    pub closed: bool,
}

impl MockDesktopEnv {
    pub fn new() -> Self {
        Self {
            png: tiny_png(),
            executed: Mutex::new(Vec::new()),
            vm_error: None,
            reset_failures: VecDeque::new(),
            resets: 0,
            score: Some(1.0),
            recording_started: Mutex::new(false),
            closed: false,
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DesktopEnv for MockDesktopEnv {
    async fn reset(&mut self, _task: &TaskConfig) -> Result<()> {
        self.resets += 1;
        match self.reset_failures.pop_front() {
            Some(message) => Err(ToolingError::Vm(message)),
            None => Ok(()),
        }
    }

    async fn screenshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(Some(self.png.clone()))
    }

    async fn execute_python(&self, command: &str) -> Result<CommandResult> {
        self.executed.lock().unwrap().push(command.to_string());
        Ok(CommandResult {
            status: Some("success".to_string()),
            output: String::new(),
            error: self.vm_error.clone().unwrap_or_default(),
            returncode: Some(0),
        })
    }

    async fn start_recording(&self) -> Result<()> {
        *self.recording_started.lock().unwrap() = true;
        Ok(())
    }

    async fn end_recording(&self, dest: &Path) -> Result<Option<PathBuf>> {
        std::fs::write(dest, b"mp4").unwrap();
        Ok(Some(dest.to_path_buf()))
    }

    async fn evaluate(&self, _task: &TaskConfig, _result_dir: &Path) -> Result<f64> {
        self.score.ok_or(ToolingError::EvaluatorUnavailable)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

pub fn task(instruction: &str) -> TaskConfig {
    TaskConfig {
        id: "task-1".to_string(),
        instruction: instruction.to_string(),
        ..Default::default()
    }
}
