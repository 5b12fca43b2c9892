//! Fan per-task results out into the delivery folder layout.
//!
//! The project root holds `SFT/<tool>/<id>`, `run_*` and `annotator_*`
//! directories plus `evaluation_examples/`. For every task listed in
//! `evaluation_examples/manual_task.json` a `<taskid>/` tree is built next to
//! the root (or under an explicit output directory).

use crate::notebook::read_json;
use crate::{Result, ToolingError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

pub const DEFAULT_MODEL_NAME: &str = "claude-4-sonnet-20250514";
pub const COLAB_DIR: &str = "Colab";
pub const TRAJECTORY_DIR: &str = "Trajectory and Screenshot";
pub const ANNOTATOR_ROOT: &str = "Annotator Trajectory";
pub const EVALUATION_SCORE: &str = "evaluation_score.txt";

const TRAJECTORY_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "json", "txt", "log", "xml"];

#[derive(Debug, Clone)]
pub struct StructureConfig {
    /// Folder name for model runs in the delivery tree
    pub model_name: String,
    pub annotators: u32,
    pub runs: u32,
    /// Where `<taskid>/` folders go; defaults to the root's parent
    pub output_dir: Option<PathBuf>,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            annotators: 3,
            runs: 16,
            output_dir: None,
        }
    }
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| ToolingError::io(path, e))
}

fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    std::fs::copy(src, dest)
        .map(|_| ())
        .map_err(|e| ToolingError::io(src, e))
}

fn is_trajectory_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| TRAJECTORY_EXTENSIONS.contains(&ext))
}

/// Copy notebooks into `colab` and trajectory artifacts into `trajectory`,
/// flattening everything under `src`. Returns the number of files copied.
pub fn collect_files(src: &Path, colab: Option<&Path>, trajectory: Option<&Path>) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| ToolingError::InvalidArgument(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name == "evaluator.diff" {
            continue;
        }

        let dest = if name.ends_with(".ipynb") {
            colab
        } else if is_trajectory_file(&name) {
            trajectory
        } else {
            None
        };

        if let Some(dest) = dest {
            copy_file(entry.path(), &dest.join(&*name))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Rebuild an SFT folder with only its `Colab/` and trajectory content
pub fn copy_sft(src: &Path, dest: &Path) -> Result<usize> {
    let colab = dest.join(COLAB_DIR);
    let trajectory = dest.join(TRAJECTORY_DIR);
    create_dir(&colab)?;
    create_dir(&trajectory)?;
    collect_files(src, Some(&colab), Some(&trajectory))
}

/// First directory under `root` whose trailing path components equal `tail`
pub fn find_subdir_ending_with(root: &Path, tail: &[&str]) -> Option<PathBuf> {
    if tail.is_empty() {
        return None;
    }
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .find(|candidate| {
            let components: Vec<_> = candidate.components().map(|c| c.as_os_str()).collect();
            components.len() >= tail.len()
                && components[components.len() - tail.len()..]
                    .iter()
                    .zip(tail)
                    .all(|(have, want)| **have == **want)
        })
}

/// Copy the first `evaluation_score.txt` under `src` to `dest`, or create it empty
pub fn copy_evaluation_score(src: &Path, dest: &Path) -> Result<()> {
    let found = WalkDir::new(src)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == EVALUATION_SCORE);

    match found {
        Some(entry) => copy_file(entry.path(), dest),
        None => {
            debug!("No {} under {}, writing placeholder", EVALUATION_SCORE, src.display());
            std::fs::write(dest, "").map_err(|e| ToolingError::io(dest, e))
        }
    }
}

/// Build `annotator_N/` from the annotator's `tool/taskid` subtree when present
pub fn process_annotator(src: &Path, dest: &Path, tool: &str, task_id: &str) -> Result<()> {
    let specific = src.join(tool).join(task_id);
    let chosen = if specific.is_dir() {
        specific
    } else {
        find_subdir_ending_with(src, &[tool, task_id]).unwrap_or_else(|| src.to_path_buf())
    };

    let colab = dest.join(COLAB_DIR);
    let trajectory = dest.join(TRAJECTORY_DIR);
    create_dir(&colab)?;
    create_dir(&trajectory)?;

    copy_evaluation_score(src, &dest.join(EVALUATION_SCORE))?;
    collect_files(&chosen, Some(&colab), Some(&trajectory))?;
    Ok(())
}

/// Build `run_NN/`, preferring `model/tool/taskid`, then `tool/taskid`, then the whole run
pub fn process_run(
    src: &Path,
    dest: &Path,
    tool: &str,
    task_id: &str,
    model_name: &str,
) -> Result<()> {
    let trajectory = dest.join(TRAJECTORY_DIR);
    create_dir(&trajectory)?;

    let chosen = find_subdir_ending_with(src, &[model_name, tool, task_id])
        .or_else(|| find_subdir_ending_with(src, &[tool, task_id]))
        .unwrap_or_else(|| src.to_path_buf());

    collect_files(&chosen, None, Some(&trajectory))?;
    Ok(())
}

/// `run_<i>` or `run_<0i>`
pub fn find_run_folder(base: &Path, index: u32) -> Option<PathBuf> {
    [format!("run_{index}"), format!("run_{index:02}")]
        .into_iter()
        .map(|name| base.join(name))
        .find(|path| path.is_dir())
}

/// Locate `tool/taskid` inside `base`, directly or anywhere below it
pub fn find_tool_taskid(base: &Path, tool: &str, task_id: &str) -> Option<PathBuf> {
    if !base.is_dir() {
        return None;
    }
    let direct = base.join(tool).join(task_id);
    if direct.is_dir() {
        return Some(direct);
    }

    WalkDir::new(base)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name() == task_id)
        .map(|e| e.into_path())
        .find(|path| {
            path.parent()
                .and_then(Path::file_name)
                .is_some_and(|parent| parent == tool)
        })
}

/// `(tool, task_id)` pairs from `manual_task.json`; values may be a list or a single id
pub fn load_tasks_from_manual(path: &Path) -> Result<Vec<(String, String)>> {
    let Value::Object(map) = read_json(path)? else {
        return Err(ToolingError::InvalidArgument(format!(
            "{} must map tools to task ids",
            path.display()
        )));
    };

    let mut tasks = Vec::new();
    for (tool, ids) in map {
        match ids {
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::String(id) => tasks.push((tool.clone(), id)),
                        other => warn!("Ignoring non-string task id {} for {}", other, tool),
                    }
                }
            }
            Value::String(id) => tasks.push((tool, id)),
            other => warn!("Ignoring entry {} for {}", other, tool),
        }
    }
    Ok(tasks)
}

/// What was produced for one task
#[derive(Debug, Clone)]
pub struct TaskLayout {
    pub tool: String,
    pub task_id: String,
    pub dest: PathBuf,
    pub sft: bool,
    pub annotators: Vec<u32>,
    pub runs: Vec<u32>,
    pub example_json: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StructureReport {
    pub generated: Vec<TaskLayout>,
    /// `(tool, task_id)` with no content anywhere
    pub skipped: Vec<(String, String)>,
    /// `(tool, task_id, error)` for tasks whose folder could not be built
    pub failed: Vec<(String, String, String)>,
}

fn destination_base(root: &Path, config: &StructureConfig) -> PathBuf {
    if let Some(output) = &config.output_dir {
        return output.clone();
    }
    let absolute = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
    absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or(absolute)
}

/// Generate the delivery tree for every task in `manual_task.json`
pub fn generate_structure(root: &Path, config: &StructureConfig) -> Result<StructureReport> {
    if !root.is_dir() {
        return Err(ToolingError::InvalidArgument(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let manual_path = root.join("evaluation_examples").join("manual_task.json");
    let tasks = load_tasks_from_manual(&manual_path)?;
    if tasks.is_empty() {
        return Err(ToolingError::InvalidArgument(format!(
            "No tasks found in {}",
            manual_path.display()
        )));
    }

    let dest_base = destination_base(root, config);
    let mut report = StructureReport::default();

    for (tool, task_id) in tasks {
        info!("Processing task: tool={}, id={}", tool, task_id);
        match build_task(root, &dest_base, &tool, &task_id, config) {
            Ok(Some(layout)) => {
                info!("Output generated at: {}", layout.dest.display());
                report.generated.push(layout);
            }
            Ok(None) => {
                warn!("No content found for {}/{} in any directory. Skipping.", tool, task_id);
                report.skipped.push((tool, task_id));
            }
            Err(e) => {
                error!("Failed to build {}/{}: {}", tool, task_id, e);
                report.failed.push((tool, task_id, e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Build one task folder; `None` when the task has no content anywhere
fn build_task(
    root: &Path,
    dest_base: &Path,
    tool: &str,
    task_id: &str,
    config: &StructureConfig,
) -> Result<Option<TaskLayout>> {
    let sft_src = root.join("SFT").join(tool).join(task_id);
    let sft = sft_src.is_dir();

    let annotators: Vec<u32> = (1..=config.annotators)
        .filter(|i| find_tool_taskid(&root.join(format!("annotator_{i}")), tool, task_id).is_some())
        .collect();

    let runs: Vec<u32> = (1..=config.runs)
        .filter(|i| {
            find_run_folder(root, *i)
                .is_some_and(|run| find_tool_taskid(&run, tool, task_id).is_some())
        })
        .collect();

    if !sft && annotators.is_empty() && runs.is_empty() {
        return Ok(None);
    }
    info!(
        "Found content in: SFT={}, Annotators={:?}, Runs={:?}",
        sft, annotators, runs
    );

    let dest = dest_base.join(task_id);
    create_dir(&dest)?;

    let example_json = root
        .join("evaluation_examples")
        .join("examples")
        .join(tool)
        .join(format!("{task_id}.json"));
    let has_example = example_json.is_file();
    if has_example {
        copy_file(&example_json, &dest.join(format!("{task_id}.json")))?;
        debug!("Copied example JSON");
    } else {
        warn!("Example JSON not found at {}", example_json.display());
    }

    if sft {
        copy_sft(&sft_src, &dest.join("SFT"))?;
        info!("Copied SFT content");
    }

    for i in &runs {
        if let Some(run_src) = find_run_folder(root, *i) {
            let run_dest = dest.join(&config.model_name).join(format!("run_{i:02}"));
            process_run(&run_src, &run_dest, tool, task_id, &config.model_name)?;
            info!("Processed {} -> run_{:02}", run_src.display(), i);
        }
    }

    for i in &annotators {
        let ann_src = root.join(format!("annotator_{i}"));
        let ann_dest = dest.join(ANNOTATOR_ROOT).join(format!("annotator_{i}"));
        process_annotator(&ann_src, &ann_dest, tool, task_id)?;
        info!("Processed annotator_{}", i);
    }

    Ok(Some(TaskLayout {
        tool: tool.to_string(),
        task_id: task_id.to_string(),
        dest,
        sft,
        annotators,
        runs,
        example_json: has_example,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "x").unwrap();
    }

    #[test]
    fn test_collect_files_routes_by_extension() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        touch(&src.join("a/nb.ipynb"));
        touch(&src.join("a/b/shot.PNG.png"));
        touch(&src.join("evaluator.diff"));
        touch(&src.join("notes.md"));
        touch(&src.join("trajectory.jsonl"));

        let colab = dir.path().join("colab");
        let traj = dir.path().join("traj");
        std::fs::create_dir_all(&colab).unwrap();
        std::fs::create_dir_all(&traj).unwrap();

        let copied = collect_files(&src, Some(&colab), Some(&traj)).unwrap();
        assert_eq!(copied, 2);
        assert!(colab.join("nb.ipynb").is_file());
        assert!(traj.join("shot.PNG.png").is_file());
        assert!(!traj.join("trajectory.jsonl").exists());
        assert!(!traj.join("evaluator.diff").exists());
    }

    #[test]
    fn test_notebooks_ignored_without_colab_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        touch(&src.join("nb.ipynb"));
        touch(&src.join("result.txt"));
        let traj = dir.path().join("traj");
        std::fs::create_dir_all(&traj).unwrap();

        assert_eq!(collect_files(&src, None, Some(&traj)).unwrap(), 1);
        assert!(!traj.join("nb.ipynb").exists());
    }

    #[test]
    fn test_find_subdir_matches_whole_components() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("x/mychrome/abc")).unwrap();
        std::fs::create_dir_all(dir.path().join("y/chrome/abc")).unwrap();

        let found = find_subdir_ending_with(dir.path(), &["chrome", "abc"]).unwrap();
        assert_eq!(found, dir.path().join("y/chrome/abc"));
        assert!(find_subdir_ending_with(dir.path(), &["gimp", "abc"]).is_none());
    }

    #[test]
    fn test_find_run_folder_accepts_padding() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("run_1")).unwrap();
        std::fs::create_dir_all(dir.path().join("run_02")).unwrap();

        assert_eq!(find_run_folder(dir.path(), 1), Some(dir.path().join("run_1")));
        assert_eq!(find_run_folder(dir.path(), 2), Some(dir.path().join("run_02")));
        assert_eq!(find_run_folder(dir.path(), 3), None);
    }

    #[test]
    fn test_find_tool_taskid_nested() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("deep/model/chrome/t1")).unwrap();
        assert_eq!(
            find_tool_taskid(dir.path(), "chrome", "t1"),
            Some(dir.path().join("deep/model/chrome/t1"))
        );
        assert_eq!(find_tool_taskid(dir.path(), "os", "t1"), None);
        assert_eq!(find_tool_taskid(&dir.path().join("missing"), "chrome", "t1"), None);
    }

    #[test]
    fn test_missing_score_creates_placeholder() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("score.txt");
        copy_evaluation_score(dir.path(), &dest).unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "");
    }

    #[test]
    fn test_manual_tasks_accept_list_or_single() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manual_task.json");
        std::fs::write(&path, r#"{"chrome": ["a", "b"], "os": "c"}"#).unwrap();
        let tasks = load_tasks_from_manual(&path).unwrap();
        assert_eq!(
            tasks,
            vec![
                ("chrome".to_string(), "a".to_string()),
                ("chrome".to_string(), "b".to_string()),
                ("os".to_string(), "c".to_string()),
            ]
        );
    }
}
