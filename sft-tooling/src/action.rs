//! Translation of operator-entered actions into Python for the guest.

use serde_json::Value;

/// Control actions understood by the replay loop
pub const CONTROL_ACTIONS: [&str; 3] = ["DONE", "FAIL", "WAIT"];

const PYTHON_PREFIXES: [&str; 6] = ["pyautogui.", "time.", "actions.", "import ", "#", "from "];

const IMPORTS: [(&str, &str); 3] = [
    ("pyautogui", "import pyautogui"),
    ("time", "import time"),
    ("actions", "import desktop_env.actions as actions"),
];

/// What the operator typed at the manual prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualInput {
    /// Abandon the current task (`exit` or an empty line)
    Exit,
    /// Task finished (`done`)
    Done,
    Action(String),
}

impl ManualInput {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
        if line.is_empty() || line.eq_ignore_ascii_case("exit") {
            ManualInput::Exit
        } else if line.eq_ignore_ascii_case("done") {
            ManualInput::Done
        } else {
            ManualInput::Action(line.to_string())
        }
    }
}

/// `pyautogui.typewrite(<text>)` followed by Enter, with `text` escaped as a literal
fn type_literal(text: &str, separator: &str) -> String {
    let literal = Value::String(text.to_string()).to_string();
    format!("pyautogui.typewrite({literal}){separator}pyautogui.press(\"enter\")")
}

/// Expand every `pg.` to `pyautogui.` when the action is written with the shorthand
pub fn expand_pg(action: &str) -> String {
    if action.starts_with("pg.") {
        action.replace("pg.", "pyautogui.")
    } else {
        action.to_string()
    }
}

/// Command for an action typed at the manual prompt.
///
/// `pg.` is shorthand for `pyautogui.`; `time.` and `actions.` calls pass
/// through; anything else is typed into the focused window.
pub fn manual_command(action: &str) -> String {
    if action.starts_with("pg.") {
        expand_pg(action)
    } else if action.starts_with("time.") || action.starts_with("actions.") {
        action.to_string()
    } else {
        type_literal(action, "; ")
    }
}

fn requires_import(command: &str, module: &str) -> bool {
    match module {
        "pyautogui" => command.contains("pyautogui.") && !command.contains("import pyautogui"),
        "time" => command.contains("time.") && !command.contains("import time"),
        "actions" => command.contains("actions.") && !command.contains("desktop_env.actions"),
        _ => false,
    }
}

/// A replayable command, either a control action or Python source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayCommand {
    Control(String),
    Python(String),
}

/// Build the command for a recorded action, prepending any missing imports
pub fn replay_command(action: &str) -> ReplayCommand {
    let trimmed = action.trim();
    let upper = trimmed.to_ascii_uppercase();
    if CONTROL_ACTIONS.contains(&upper.as_str()) {
        return ReplayCommand::Control(upper);
    }

    let mut command = expand_pg(trimmed);
    let is_python =
        PYTHON_PREFIXES.iter().any(|p| command.starts_with(p)) || command.contains('\n');
    if !is_python {
        command = type_literal(&command, "\n");
    }

    let imports: Vec<&str> = IMPORTS
        .iter()
        .filter(|(module, _)| requires_import(&command, module))
        .map(|(_, statement)| *statement)
        .collect();

    if imports.is_empty() {
        ReplayCommand::Python(command)
    } else {
        ReplayCommand::Python(format!("{}\n{}", imports.join("\n"), command))
    }
}

/// Flatten the many shapes an `action` field takes in recorded logs
pub fn normalise_action(raw: Option<&Value>) -> String {
    match raw {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Object(map)) => {
            for key in ["command", "action"] {
                if let Some(inner) = map.get(key) {
                    return match inner {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                }
            }
            Value::Object(map.clone()).to_string()
        }
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manual_input_classification() {
        assert_eq!(ManualInput::parse(""), ManualInput::Exit);
        assert_eq!(ManualInput::parse("EXIT"), ManualInput::Exit);
        assert_eq!(ManualInput::parse("Done\n"), ManualInput::Done);
        assert_eq!(
            ManualInput::parse("pg.click(1, 2)"),
            ManualInput::Action("pg.click(1, 2)".to_string())
        );
    }

    #[test]
    fn test_manual_command_translation() {
        assert_eq!(manual_command("pg.click(100, 200)"), "pyautogui.click(100, 200)");
        assert_eq!(manual_command("time.sleep(2)"), "time.sleep(2)");
        assert_eq!(manual_command("actions.wait()"), "actions.wait()");
        assert_eq!(
            manual_command("hello \"world\""),
            "pyautogui.typewrite(\"hello \\\"world\\\"\"); pyautogui.press(\"enter\")"
        );
    }

    #[test]
    fn test_chained_shorthand_is_fully_expanded() {
        assert_eq!(
            manual_command("pg.hotkey('ctrl', 'c'); pg.hotkey('ctrl', 'v')"),
            "pyautogui.hotkey('ctrl', 'c'); pyautogui.hotkey('ctrl', 'v')"
        );
        assert_eq!(
            replay_command("pg.click(1, 2)\npg.press('enter')"),
            ReplayCommand::Python(
                "import pyautogui\npyautogui.click(1, 2)\npyautogui.press('enter')".to_string()
            )
        );
        assert_eq!(expand_pg("time.sleep(1); pg.click()"), "time.sleep(1); pg.click()");
    }

    #[test]
    fn test_replay_control_actions() {
        assert_eq!(replay_command(" done "), ReplayCommand::Control("DONE".to_string()));
        assert_eq!(replay_command("WAIT"), ReplayCommand::Control("WAIT".to_string()));
    }

    #[test]
    fn test_replay_adds_missing_imports() {
        assert_eq!(
            replay_command("pg.click(1, 2)"),
            ReplayCommand::Python("import pyautogui\npyautogui.click(1, 2)".to_string())
        );
        assert_eq!(
            replay_command("import pyautogui\npyautogui.press('a')\ntime.sleep(1)"),
            ReplayCommand::Python(
                "import time\nimport pyautogui\npyautogui.press('a')\ntime.sleep(1)".to_string()
            )
        );
    }

    #[test]
    fn test_replay_types_plain_text() {
        assert_eq!(
            replay_command("hello"),
            ReplayCommand::Python(
                "import pyautogui\npyautogui.typewrite(\"hello\")\npyautogui.press(\"enter\")"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_normalise_action_shapes() {
        assert_eq!(normalise_action(None), "");
        assert_eq!(normalise_action(Some(&json!(null))), "");
        assert_eq!(normalise_action(Some(&json!(3))), "3");
        assert_eq!(normalise_action(Some(&json!({"command": "pg.click()"}))), "pg.click()");
        assert_eq!(normalise_action(Some(&json!({"action": "DONE"}))), "DONE");
        assert_eq!(normalise_action(Some(&json!({"x": 1}))), "{\"x\":1}");
    }
}
