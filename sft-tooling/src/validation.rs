//! Acceptance checks for a generated delivery folder.

use crate::notebook::read_json;
use crate::structure::{
    ANNOTATOR_ROOT, COLAB_DIR, DEFAULT_MODEL_NAME, EVALUATION_SCORE, TRAJECTORY_DIR,
};
use crate::{Result, ToolingError};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use walkdir::WalkDir;

/// Evaluator functions shipped with the benchmark; anything else must come
/// with an `evaluator.diff`.
pub const KNOWN_EVALUATOR_FUNCS: &[&str] = &[
    "exact_match",
    "is_expected_tabs",
    "is_expected_active_tab",
    "is_expected_active_tab_approximate",
    "is_added_to_steam_cart",
    "check_direct_json_object",
    "is_expected_bookmarks",
    "is_shortcut_on_desktop",
    "is_expected_url_pattern_match",
    "infeasible",
    "check_history_deleted",
    "check_enabled_experiments",
    "is_in_list",
    "is_cookie_deleted",
    "check_font_size",
    "match_in_list",
    "compare_pdfs",
    "check_palette_and_structure_sim",
    "check_structure_sim",
    "check_saturation_increase_and_structure_sim",
    "check_image_mirror",
    "check_green_background",
    "check_config_status",
    "check_file_exists_and_structure_sim",
    "check_brightness_decrease_and_structure_sim",
    "check_include_exclude",
    "check_image_size",
    "check_structure_sim_resized",
    "check_textbox_on_leftside",
    "check_triangle_position",
    "check_contrast_increase_and_structure_sim",
    "compare_table",
    "compare_csv",
    "check_pdf_pages",
    "compare_pptx_files",
    "check_presenter_console_disable",
    "check_transition",
    "check_auto_saving_time",
    "evaluate_presentation_fill_to_rgb_distance",
    "compare_images",
    "check_image_stretch_and_center",
    "check_page_number_colors",
    "compare_audios",
    "check_slide_orientation_Portrait",
    "check_left_panel",
    "compare_line_spacing",
    "check_tabstops",
    "compare_docx_files",
    "compare_subscript_contains",
    "has_page_numbers_in_footers",
    "compare_font_names",
    "is_first_line_centered",
    "compare_docx_tables",
    "check_highlighted_words",
    "compare_docx_images",
    "compare_unique_train_records",
    "evaluate_strike_through_last_paragraph",
    "evaluate_colored_words_in_tables",
    "check_italic_font_size_14",
    "contains_page_break",
    "find_default_font",
    "compare_numbered_lists",
    "compare_image_text",
    "compare_archive",
    "compare_text_file",
    "file_contains",
    "check_line_number",
    "check_python_file_by_test_suite",
    "compare_references",
    "check_image_file_size",
    "check_mp3_meta",
    "check_list",
    "compare_epub",
    "is_extension_installed",
    "compare_image_list",
    "compare_config",
    "literal_match",
    "compare_docx_files_and_ignore_new_lines",
    "compare_conference_city_in_order",
    "is_in_vm_clickboard",
    "check_json",
    "diff_text_file",
    "check_thunderbird_folder",
    "compare_result_files",
    "fuzzy_place_math",
    "is_expected_installed_extensions",
    "compare_zip_files",
    "compare_pdf_images",
    "compare_python_pure_text",
    "compare_htmls",
    "check_accessibility_tree",
    "is_expected_search_query",
    "check_moved_jpgs",
    "is_utc_0",
    "check_gnome_favorite_apps",
    "check_thunderbird_prefs",
    "check_csv",
    "check_thunderbird_filter",
    "run_sqlite3",
    "check_qt_bgcone",
    "check_global_key_play_pause",
    "is_vlc_playing",
    "is_vlc_recordings_folder",
    "is_vlc_fullscreen",
    "check_qt_max_volume",
    "check_qt_minimal_view",
    "compare_videos",
    "check_qt_slider_colours",
    "check_one_instance_when_started_from_file",
    "check_json_settings",
    "check_json_keybindings",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    Json,
    EvaluatorDiff,
    PassK,
    Structure,
    SftScore,
    AnnotatorScores,
    NoArgs,
}

impl Check {
    pub const ALL: [Check; 7] = [
        Check::Json,
        Check::EvaluatorDiff,
        Check::PassK,
        Check::Structure,
        Check::SftScore,
        Check::AnnotatorScores,
        Check::NoArgs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Check::Json => "json",
            Check::EvaluatorDiff => "evaluator_diff",
            Check::PassK => "passk",
            Check::Structure => "structure",
            Check::SftScore => "sft_score",
            Check::AnnotatorScores => "annotator_scores",
            Check::NoArgs => "no_args",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Check {
    type Err = ToolingError;

    fn from_str(s: &str) -> Result<Self> {
        Check::ALL
            .into_iter()
            .find(|check| check.name() == s)
            .ok_or_else(|| {
                let available: Vec<_> = Check::ALL.iter().map(|c| c.name()).collect();
                ToolingError::InvalidArgument(format!(
                    "Invalid check '{s}'. Available checks: {}",
                    available.join(", ")
                ))
            })
    }
}

/// `all`, or a comma-separated list of check names
pub fn parse_checks(selection: &str) -> Result<Vec<Check>> {
    let selection = selection.trim();
    if selection == "all" {
        return Ok(Check::ALL.to_vec());
    }
    let mut checks = Vec::new();
    for name in selection.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let check = name.parse()?;
        if !checks.contains(&check) {
            checks.push(check);
        }
    }
    Ok(checks)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub check: Check,
    pub passed: bool,
    pub messages: Vec<String>,
}

impl CheckResult {
    fn pass(check: Check, message: impl Into<String>) -> Self {
        Self {
            check,
            passed: true,
            messages: vec![message.into()],
        }
    }

    fn fail(check: Check, message: impl Into<String>) -> Self {
        Self {
            check,
            passed: false,
            messages: vec![message.into()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub task_folder: PathBuf,
    pub results: Vec<CheckResult>,
}

impl ValidationReport {
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Defaults to `<delivery>/../osworld_updated_schema.json`
    pub schema_path: Option<PathBuf>,
    pub model_name: String,
    pub runs: u32,
    pub annotators: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            schema_path: None,
            model_name: DEFAULT_MODEL_NAME.to_string(),
            runs: 16,
            annotators: 3,
        }
    }
}

fn read_score(path: &Path) -> std::result::Result<f64, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| format!("{} not found", path.display()))?;
    let trimmed = content.trim();
    trimmed
        .parse::<f64>()
        .map_err(|_| format!("Invalid score '{trimmed}' in {}", path.display()))
}

fn annotator_dir(task_folder: &Path, index: u32) -> PathBuf {
    task_folder
        .join(ANNOTATOR_ROOT)
        .join(format!("annotator_{index}"))
}

pub fn check_json(task: &Value, schema_path: &Path) -> CheckResult {
    let schema = match read_json(schema_path) {
        Ok(schema) => schema,
        Err(e) => return CheckResult::fail(Check::Json, format!("Schema not loaded: {e}")),
    };
    let validator = match jsonschema::validator_for(&schema) {
        Ok(validator) => validator,
        Err(e) => return CheckResult::fail(Check::Json, format!("Invalid schema: {e}")),
    };

    let errors: Vec<String> = validator
        .iter_errors(task)
        .map(|e| format!("{e} at '{}'", e.instance_path))
        .collect();
    if errors.is_empty() {
        CheckResult::pass(Check::Json, "JSON structure validation passed")
    } else {
        CheckResult {
            check: Check::Json,
            passed: false,
            messages: errors,
        }
    }
}

fn evaluator_funcs(task: &Value) -> Vec<String> {
    match task.get("evaluator").and_then(|e| e.get("func")) {
        Some(Value::String(func)) => vec![func.clone()],
        Some(Value::Array(funcs)) => funcs
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

pub fn check_evaluator_diff(task: &Value, task_folder: &Path) -> CheckResult {
    let new_funcs: Vec<String> = evaluator_funcs(task)
        .into_iter()
        .filter(|f| !KNOWN_EVALUATOR_FUNCS.contains(&f.as_str()))
        .collect();
    if new_funcs.is_empty() {
        return CheckResult::pass(Check::EvaluatorDiff, "No new evaluator functions");
    }

    let diff_path = task_folder.join("SFT").join("evaluator.diff");
    let Ok(diff) = std::fs::read_to_string(&diff_path) else {
        return CheckResult::fail(
            Check::EvaluatorDiff,
            format!(
                "New evaluator functions {new_funcs:?} found, but {} not present",
                diff_path.display()
            ),
        );
    };

    match new_funcs.iter().find(|f| !diff.contains(f.as_str())) {
        Some(missing) => CheckResult::fail(
            Check::EvaluatorDiff,
            format!("Function {missing} not defined in evaluator.diff"),
        ),
        None => CheckResult::pass(
            Check::EvaluatorDiff,
            format!("New functions {new_funcs:?} defined in evaluator.diff"),
        ),
    }
}

pub fn check_pass_k(task_folder: &Path, config: &ValidationConfig) -> CheckResult {
    let model_dir = task_folder.join(&config.model_name);
    if !model_dir.is_dir() {
        return CheckResult::fail(
            Check::PassK,
            format!("Model folder {} not found", model_dir.display()),
        );
    }

    let mut results = Vec::with_capacity(config.runs as usize);
    for i in 1..=config.runs {
        let result_file = model_dir
            .join(format!("run_{i:02}"))
            .join(TRAJECTORY_DIR)
            .join("result.txt");
        let value = match read_score(&result_file) {
            Ok(value) => value,
            Err(message) => return CheckResult::fail(Check::PassK, message),
        };
        if value != 0.0 && value != 1.0 {
            return CheckResult::fail(
                Check::PassK,
                format!("Invalid value in {}: {value}", result_file.display()),
            );
        }
        results.push(value);
    }

    if results.is_empty() {
        return CheckResult::fail(Check::PassK, "No runs configured");
    }
    let average = results.iter().sum::<f64>() / results.len() as f64;
    if average == 0.0 || average == 1.0 {
        return CheckResult::fail(
            Check::PassK,
            format!("Average is {average}, which is invalid (must be between 0 and 1)"),
        );
    }
    CheckResult::pass(
        Check::PassK,
        format!("Found {} runs with average {average}", results.len()),
    )
}

pub fn check_structure(task_folder: &Path, task_id: &str, config: &ValidationConfig) -> CheckResult {
    let sft = task_folder.join("SFT");
    let mut required = vec![
        task_folder.join(format!("{task_id}.json")),
        sft.join(COLAB_DIR),
        sft.join(TRAJECTORY_DIR).join(EVALUATION_SCORE),
    ];
    for i in 1..=config.annotators {
        let dir = annotator_dir(task_folder, i);
        required.push(dir.join(TRAJECTORY_DIR));
        required.push(dir.join(EVALUATION_SCORE));
    }

    let missing: Vec<String> = required
        .iter()
        .filter(|path| !path.exists())
        .map(|path| format!("Required file/folder missing: {}", path.display()))
        .collect();
    if missing.is_empty() {
        CheckResult::pass(Check::Structure, "File structure complete")
    } else {
        CheckResult {
            check: Check::Structure,
            passed: false,
            messages: missing,
        }
    }
}

pub fn check_sft_score(task_folder: &Path) -> CheckResult {
    let path = task_folder
        .join("SFT")
        .join(TRAJECTORY_DIR)
        .join(EVALUATION_SCORE);
    match read_score(&path) {
        Ok(score) if score == 1.0 => CheckResult::pass(Check::SftScore, "SFT score is 1"),
        Ok(score) => CheckResult::fail(Check::SftScore, format!("Score is {score}, not 1")),
        Err(message) => CheckResult::fail(Check::SftScore, message),
    }
}

pub fn check_annotator_scores(task_folder: &Path, config: &ValidationConfig) -> CheckResult {
    let mut passed = 0;
    let mut failed = 0;
    for i in 1..=config.annotators {
        let path = annotator_dir(task_folder, i).join(EVALUATION_SCORE);
        match read_score(&path) {
            Ok(score) if score == 1.0 => passed += 1,
            Ok(score) if score == 0.0 => failed += 1,
            Ok(score) => debug!("Annotator {} scored {}", i, score),
            Err(message) => {
                return CheckResult::fail(
                    Check::AnnotatorScores,
                    format!("Annotator {i}: {message}"),
                )
            }
        }
    }

    let tally = format!("{passed} passed (1), {failed} failed (0)");
    if passed == 0 || failed == 0 {
        CheckResult::fail(
            Check::AnnotatorScores,
            format!("Scores do not include both 1 and 0: {tally}"),
        )
    } else {
        CheckResult::pass(Check::AnnotatorScores, tally)
    }
}

pub fn check_no_args(task_folder: &Path) -> CheckResult {
    let found = WalkDir::new(task_folder)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == "args.json");
    match found {
        Some(entry) => CheckResult::fail(
            Check::NoArgs,
            format!("args.json found in {}", entry.path().display()),
        ),
        None => CheckResult::pass(Check::NoArgs, "No args.json present"),
    }
}

/// Run `checks` against `<delivery>/<task_id>`
pub fn validate_delivery(
    delivery: &Path,
    task_id: &str,
    checks: &[Check],
    config: &ValidationConfig,
) -> Result<ValidationReport> {
    let task_folder = delivery.join(task_id);
    if !task_folder.is_dir() {
        return Err(ToolingError::InvalidArgument(format!(
            "Task folder {} not found",
            task_folder.display()
        )));
    }
    let task_json = task_folder.join(format!("{task_id}.json"));
    let task = read_json(&task_json)?;

    let schema_path = config
        .schema_path
        .clone()
        .unwrap_or_else(|| delivery.join("..").join("osworld_updated_schema.json"));

    let results = checks
        .iter()
        .map(|check| match check {
            Check::Json => check_json(&task, &schema_path),
            Check::EvaluatorDiff => check_evaluator_diff(&task, &task_folder),
            Check::PassK => check_pass_k(&task_folder, config),
            Check::Structure => check_structure(&task_folder, task_id, config),
            Check::SftScore => check_sft_score(&task_folder),
            Check::AnnotatorScores => check_annotator_scores(&task_folder, config),
            Check::NoArgs => check_no_args(&task_folder),
        })
        .collect();

    Ok(ValidationReport {
        task_folder,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_checks() {
        assert_eq!(parse_checks("all").unwrap().len(), 7);
        assert_eq!(
            parse_checks("passk, no_args,passk").unwrap(),
            vec![Check::PassK, Check::NoArgs]
        );
        assert!(matches!(
            parse_checks("json,bogus"),
            Err(ToolingError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_evaluator_diff_requires_definitions() {
        let dir = TempDir::new().unwrap();
        let known = json!({ "evaluator": { "func": "exact_match" } });
        assert!(check_evaluator_diff(&known, dir.path()).passed);

        let custom = json!({ "evaluator": { "func": ["exact_match", "check_custom_widget"] } });
        assert!(!check_evaluator_diff(&custom, dir.path()).passed);

        std::fs::create_dir_all(dir.path().join("SFT")).unwrap();
        std::fs::write(
            dir.path().join("SFT/evaluator.diff"),
            "+def check_custom_widget(result):\n",
        )
        .unwrap();
        assert!(check_evaluator_diff(&custom, dir.path()).passed);
    }

    #[test]
    fn test_json_schema_check() {
        let dir = TempDir::new().unwrap();
        let schema_path = dir.path().join("schema.json");
        std::fs::write(
            &schema_path,
            json!({
                "type": "object",
                "required": ["id", "instruction"],
                "properties": { "id": { "type": "string" } }
            })
            .to_string(),
        )
        .unwrap();

        assert!(check_json(&json!({"id": "a", "instruction": "b"}), &schema_path).passed);
        let result = check_json(&json!({"id": 3}), &schema_path);
        assert!(!result.passed);
        assert!(!result.messages.is_empty());
        assert!(!check_json(&json!({}), &dir.path().join("missing.json")).passed);
    }

    #[test]
    fn test_no_args_detects_nested_file() {
        let dir = TempDir::new().unwrap();
        assert!(check_no_args(dir.path()).passed);
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/args.json"), "{}").unwrap();
        assert!(!check_no_args(dir.path()).passed);
    }
}
