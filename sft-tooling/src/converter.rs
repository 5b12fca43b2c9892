//! Conversion of legacy `tool_call`/`tool_output` notebooks into the
//! step-based `pre`/`action`/`post` layout.

use crate::notebook::{
    action_cell, post_cell, pre_cell, raw_cell_text, read_json, write_json_pretty, Cell, CellRole,
    Notebook,
};
use crate::{Result, ToolingError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const NOTEBOOK_EXTENSION: &str = "ipynb";
const COLAB_DIR: &str = "Colab";
const VM_SCHEME: &str = "vm://";

/// Which layout a notebook document is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotebookFormat {
    /// Step-based layout, copied through unchanged
    New,
    /// `tool_call`/`tool_output` layout that needs conversion
    Legacy,
}

/// Which notebooks a batch run picks up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileSelection {
    /// Every `*.ipynb` below the input directory
    #[default]
    Recursive,
    /// Only `*.ipynb` files sitting directly in a `Colab` directory
    Colab,
}

impl FileSelection {
    fn accepts(&self, path: &Path) -> bool {
        if path.extension().and_then(|e| e.to_str()) != Some(NOTEBOOK_EXTENSION) {
            return false;
        }
        match self {
            FileSelection::Recursive => true,
            FileSelection::Colab => path
                .parent()
                .and_then(|p| p.file_name())
                .is_some_and(|name| name == COLAB_DIR),
        }
    }
}

/// Counts and failures from a batch run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionSummary {
    pub found: usize,
    pub converted: usize,
    /// Already in the new layout
    pub copied_new: usize,
    /// Legacy-looking, but nothing in it could be converted
    pub copied_unconverted: usize,
    pub failures: Vec<(PathBuf, String)>,
}

fn cells_of(doc: &Value) -> &[Value] {
    doc.get("cells")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn raw_role(cell: &Value) -> Option<CellRole> {
    CellRole::parse(&raw_cell_text(cell))
}

/// Classify a notebook document
pub fn detect_format(doc: &Value) -> NotebookFormat {
    if !doc.is_object() {
        return NotebookFormat::Legacy;
    }

    let has_tool_cells = cells_of(doc)
        .iter()
        .any(|c| matches!(raw_role(c), Some(CellRole::ToolCall | CellRole::ToolOutput)));
    if has_tool_cells {
        return NotebookFormat::Legacy;
    }

    let has_language_info = doc
        .get("metadata")
        .and_then(|m| m.get("language_info"))
        .is_some();
    if !has_language_info {
        return NotebookFormat::Legacy;
    }

    NotebookFormat::New
}

/// First ```` ```json ```` fenced block of a cell, trimmed
fn first_json_fence(text: &str) -> Option<&str> {
    let after = text.split("```json").nth(1)?;
    after.split("```").next().map(str::trim)
}

fn parse_fence(text: &str, what: &str) -> std::result::Result<Value, String> {
    let block = first_json_fence(text).ok_or_else(|| format!("{what} has no json block"))?;
    serde_json::from_str(block).map_err(|e| format!("{what} json is invalid: {e}"))
}

/// Command text from a tool_call cell, without its import preamble line
fn extract_command(tool_call: &str) -> std::result::Result<String, String> {
    let call = parse_fence(tool_call, "tool_call")?;
    let arguments = match call.get("arguments") {
        None => "",
        Some(Value::String(s)) => s.as_str(),
        Some(other) => return Err(format!("tool_call arguments is not a string: {other}")),
    };

    let lines: Vec<&str> = arguments.lines().collect();
    if lines.len() > 1 {
        Ok(lines[1..].join("\n"))
    } else {
        Ok(arguments.to_string())
    }
}

/// (before, after) screenshot paths from a tool_output cell
fn extract_screenshots(tool_output: &str) -> std::result::Result<(String, String), String> {
    let attachments = parse_fence(tool_output, "tool_output")?;
    let src = |index: usize| -> std::result::Result<String, String> {
        attachments
            .get(index)
            .and_then(|a| a.get("src"))
            .and_then(Value::as_str)
            .map(|s| s.replace(VM_SCHEME, ""))
            .ok_or_else(|| format!("attachment {index} has no src"))
    };
    Ok((src(0)?, src(1)?))
}

/// Convert a legacy document. Returns `None` when no step could be converted.
pub fn convert_legacy(doc: &Value) -> Option<Notebook> {
    let cells = cells_of(doc);
    let mut notebook = Notebook::new();

    if let Some(user) = cells.iter().find(|c| raw_role(c) == Some(CellRole::User)) {
        match serde_json::from_value::<Cell>(user.clone()) {
            Ok(cell) => notebook.push(cell),
            Err(e) => warn!("User cell is malformed, leaving it out: {}", e),
        }
    }

    let mut step: u32 = 1;
    let mut index = 0;
    while index < cells.len() {
        if raw_role(&cells[index]) != Some(CellRole::ToolCall) {
            index += 1;
            continue;
        }

        let Some(output) = cells
            .get(index + 1)
            .filter(|c| raw_role(c) == Some(CellRole::ToolOutput))
        else {
            debug!("tool_call at cell {} has no tool_output, skipping", index);
            index += 1;
            continue;
        };

        let converted = extract_command(&raw_cell_text(&cells[index])).and_then(|command| {
            extract_screenshots(&raw_cell_text(output)).map(|shots| (command, shots))
        });

        match converted {
            Ok((command, (before, after))) => {
                notebook.push(pre_cell(step, &before));
                notebook.push(action_cell(&command));
                notebook.push(post_cell(step, &after));
                step += 1;
            }
            Err(reason) => debug!("Skipping cell pair at {}: {}", index, reason),
        }
        index += 2;
    }

    (step > 1).then_some(notebook)
}

/// Notebook files under `input` picked by `selection`, in walk order
pub fn select_notebooks(input: &Path, selection: FileSelection) -> Vec<PathBuf> {
    WalkDir::new(input)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to read directory entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| selection.accepts(path))
        .collect()
}

enum FileOutcome {
    Converted,
    CopiedNew,
    CopiedUnconverted,
}

fn process_one(path: &Path, output_path: &Path) -> Result<FileOutcome> {
    let doc = read_json(path)?;

    let outcome = match detect_format(&doc) {
        NotebookFormat::New => {
            info!("  - Already in new format. Copying as is.");
            write_json_pretty(output_path, &doc)?;
            FileOutcome::CopiedNew
        }
        NotebookFormat::Legacy => {
            info!("  - Old format detected. Converting...");
            match convert_legacy(&doc) {
                Some(notebook) => {
                    info!(
                        "  - Conversion successful ({} steps).",
                        notebook.action_count()
                    );
                    notebook.write_to(output_path)?;
                    FileOutcome::Converted
                }
                None => {
                    warn!("  - Conversion failed or not applicable. Copying original.");
                    write_json_pretty(output_path, &doc)?;
                    FileOutcome::CopiedUnconverted
                }
            }
        }
    };

    info!("  - Saved to {}", output_path.display());
    Ok(outcome)
}

/// Convert every selected notebook under `input`, mirroring the tree into
/// `output` (or rewriting in place when `output` is `None`).
pub fn process_notebooks(
    input: &Path,
    output: Option<&Path>,
    selection: FileSelection,
) -> Result<ConversionSummary> {
    if !input.is_dir() {
        return Err(ToolingError::InvalidArgument(format!(
            "Input directory '{}' not found",
            input.display()
        )));
    }
    let output = output.unwrap_or(input);

    let paths = select_notebooks(input, selection);
    let mut summary = ConversionSummary {
        found: paths.len(),
        ..Default::default()
    };

    if paths.is_empty() {
        info!("No .ipynb files found in '{}'.", input.display());
        return Ok(summary);
    }
    info!("Found {} notebooks to process.", paths.len());

    for path in paths {
        info!("Processing {}...", path.display());
        let relative = path.strip_prefix(input).unwrap_or(&path);
        let output_path = output.join(relative);

        match process_one(&path, &output_path) {
            Ok(FileOutcome::Converted) => summary.converted += 1,
            Ok(FileOutcome::CopiedNew) => summary.copied_new += 1,
            Ok(FileOutcome::CopiedUnconverted) => summary.copied_unconverted += 1,
            Err(e) => {
                error!("  - Error: {}", e);
                summary.failures.push((path, e.to_string()));
            }
        }
    }

    Ok(summary)
}
