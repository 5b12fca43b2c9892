//! Notebook model shared by the converter and the trajectory exporter.
//!
//! A notebook is a Jupyter-shaped JSON document whose markdown cells each
//! start with a bold role tag such as `**[user]**` or `**[Step 3 pre]**`.

use crate::{Result, ToolingError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;

pub const NBFORMAT: u32 = 4;
pub const NBFORMAT_MINOR: u32 = 4;

/// Role tag carried in the first line of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRole {
    User,
    Assistant,
    Metadata,
    ToolCall,
    ToolOutput,
    Action,
    StepPre(u32),
    StepPost(u32),
}

impl CellRole {
    /// Parse the leading `**[tag]**` of a cell's text
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim_start().strip_prefix("**[")?;
        let end = rest.find("]**")?;
        let tag = &rest[..end];

        match tag {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "metadata" => Some(Self::Metadata),
            "tool_call" => Some(Self::ToolCall),
            "tool_output" => Some(Self::ToolOutput),
            "action" => Some(Self::Action),
            _ => {
                let mut parts = tag.split_whitespace();
                if parts.next() != Some("Step") {
                    return None;
                }
                let step = parts.next()?.parse().ok()?;
                let role = match parts.next()? {
                    "pre" => Self::StepPre(step),
                    "post" => Self::StepPost(step),
                    _ => return None,
                };
                parts.next().is_none().then_some(role)
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceRepr {
    Lines(Vec<String>),
    Text(String),
}

// nbformat allows `source` to be either a string or a list of strings
fn source_lines<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match SourceRepr::deserialize(deserializer)? {
        SourceRepr::Lines(lines) => lines,
        SourceRepr::Text(text) => vec![text],
    })
}

/// A single notebook cell
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cell {
    pub cell_type: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, deserialize_with = "source_lines")]
    pub source: Vec<String>,
    /// Fields such as `outputs` or `id` that are carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cell {
    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            cell_type: "markdown".to_string(),
            metadata: Map::new(),
            source: vec![text.into()],
            extra: Map::new(),
        }
    }

    /// Joined source text
    pub fn text(&self) -> String {
        self.source.concat()
    }

    pub fn role(&self) -> Option<CellRole> {
        CellRole::parse(&self.text())
    }
}

pub fn user_cell(instruction: &str) -> Cell {
    Cell::markdown(format!("**[user]**\n\n{instruction}"))
}

pub fn pre_cell(step: u32, screenshot: &str) -> Cell {
    Cell::markdown(format!(
        "**[Step {step} pre]**\n\n![step_{step}_pre](./{screenshot})"
    ))
}

pub fn action_cell(command: &str) -> Cell {
    Cell::markdown(format!("**[action]**\n\n```json\n{command}\n```"))
}

pub fn post_cell(step: u32, screenshot: &str) -> Cell {
    Cell::markdown(format!(
        "**[Step {step} post]**\n\n![step_{step}_post](./{screenshot})"
    ))
}

/// Notebook in the step-based layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    pub metadata: Value,
    pub nbformat: u32,
    pub nbformat_minor: u32,
}

impl Default for Notebook {
    fn default() -> Self {
        Self {
            cells: Vec::new(),
            metadata: json!({ "language_info": { "name": "python" } }),
            nbformat: NBFORMAT,
            nbformat_minor: NBFORMAT_MINOR,
        }
    }
}

impl Notebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    /// Number of `**[action]**` cells
    pub fn action_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| c.role() == Some(CellRole::Action))
            .count()
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        write_json_pretty(path, self)
    }
}

/// Joined source text of a raw JSON cell, tolerant of either source shape
pub fn raw_cell_text(cell: &Value) -> String {
    match cell.get("source") {
        Some(Value::Array(lines)) => lines.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(text)) => text.clone(),
        _ => String::new(),
    }
}

pub fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ToolingError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| ToolingError::json(path, e))
}

/// Write `value` as 2-space indented JSON, creating parent directories
pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ToolingError::io(parent, e))?;
    }
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).map_err(|e| ToolingError::io(path, e))
}
