mod common;

use common::MockDesktopEnv;
use serde_json::{json, Value};
use sft_tooling::replay::{replay_trajectory, verify_trajectory, ReplayConfig, SUMMARY_FILE};
use sft_tooling::ToolingError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn fast_config() -> ReplayConfig {
    ReplayConfig {
        sleep_after_execution: Duration::ZERO,
        retry_delay: Duration::ZERO,
        ..Default::default()
    }
}

fn write_inputs(dir: &Path, lines: &[Value]) -> (PathBuf, PathBuf) {
    let trajectory = dir.join("trajectory.jsonl");
    let body: Vec<String> = lines.iter().map(Value::to_string).collect();
    std::fs::write(&trajectory, body.join("\n")).unwrap();

    let task = dir.join("task.json");
    std::fs::write(
        &task,
        json!({ "id": "t1", "instruction": "Replay me", "config": [] }).to_string(),
    )
    .unwrap();
    (trajectory, task)
}

fn read_summary(dir: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(dir.join(SUMMARY_FILE)).unwrap()).unwrap()
}

#[tokio::test]
async fn test_verify_replays_until_done() {
    let dir = TempDir::new().unwrap();
    let (trajectory, task) = write_inputs(
        dir.path(),
        &[
            json!({ "step": 0, "action": "pg.click(1, 2)" }),
            json!({ "step": 1, "action": null }),
            json!({ "step": 2, "action": { "command": "WAIT" } }),
            json!({ "step": 3, "action": "DONE" }),
            json!({ "step": 4, "action": "pg.click(9, 9)" }),
        ],
    );
    let result_dir = dir.path().join("out");
    let mut env = MockDesktopEnv::new();

    let summary = verify_trajectory(&mut env, &trajectory, &task, &result_dir, &fast_config())
        .await
        .unwrap();

    assert_eq!(summary.executed_steps, 3);
    assert_eq!(summary.reported_steps, 5);
    assert!(summary.done);
    assert_eq!(summary.evaluation_score, Some(1.0));
    assert_eq!(
        env.executed(),
        vec!["import pyautogui\npyautogui.click(1, 2)".to_string()]
    );
    assert!(env.closed);

    for name in [
        "step_initial.png",
        "step_0000_after.png",
        "step_0002_after.png",
        "step_0003_after.png",
    ] {
        assert!(result_dir.join(name).is_file(), "{name} missing");
    }
    assert!(!result_dir.join("step_0001_after.png").exists());
    assert!(!result_dir.join("step_0004_after.png").exists());
    assert_eq!(
        std::fs::read_to_string(result_dir.join("evaluation_score.txt")).unwrap(),
        "1"
    );

    let saved = read_summary(&result_dir);
    assert_eq!(saved["executed_steps"], 3);
    assert_eq!(saved["done"], true);
    assert_eq!(saved["evaluation_score"], 1.0);
}

#[tokio::test]
async fn test_reset_retries_only_when_not_powered_on() {
    let dir = TempDir::new().unwrap();
    let (trajectory, task) = write_inputs(dir.path(), &[json!({ "action": "DONE" })]);

    let mut env = MockDesktopEnv::new();
    env.reset_failures = ["The VM is not powered on", "VM is NOT POWERED ON yet"]
        .into_iter()
        .map(String::from)
        .collect();
    verify_trajectory(&mut env, &trajectory, &task, &dir.path().join("a"), &fast_config())
        .await
        .unwrap();
    assert_eq!(env.resets, 3);

    let mut env = MockDesktopEnv::new();
    env.reset_failures = ["disk image missing".to_string()].into_iter().collect();
    let result_dir = dir.path().join("b");
    let err = verify_trajectory(&mut env, &trajectory, &task, &result_dir, &fast_config())
        .await
        .unwrap_err();
    assert!(matches!(err, ToolingError::Vm(_)));
    assert_eq!(env.resets, 1);
    assert!(env.closed);

    let saved = read_summary(&result_dir);
    assert_eq!(saved["executed_steps"], 0);
    assert!(saved["evaluation_score"].is_null());
    assert!(saved["error"].as_str().unwrap().contains("disk image missing"));
}

#[tokio::test]
async fn test_stop_on_error_aborts_replay() {
    let dir = TempDir::new().unwrap();
    let steps = vec![
        json!({ "action": "pg.click(1, 1)" }).as_object().unwrap().clone(),
        json!({ "action": "pg.click(2, 2)" }).as_object().unwrap().clone(),
    ];
    let mut env = MockDesktopEnv::new();
    env.vm_error = Some("Traceback: boom".to_string());

    let lenient = replay_trajectory(&env, &steps, &fast_config(), dir.path())
        .await
        .unwrap();
    assert_eq!(lenient.executed_steps, 2);
    assert!(!lenient.done);

    let strict = ReplayConfig {
        stop_on_error: true,
        ..fast_config()
    };
    let err = replay_trajectory(&env, &steps, &strict, dir.path())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn test_max_steps_limits_replay() {
    let dir = TempDir::new().unwrap();
    let steps: Vec<_> = (0..5)
        .map(|i| {
            json!({ "action": format!("pg.press('{i}')") })
                .as_object()
                .unwrap()
                .clone()
        })
        .collect();
    let env = MockDesktopEnv::new();
    let config = ReplayConfig {
        max_steps: 2,
        ..fast_config()
    };

    let outcome = replay_trajectory(&env, &steps, &config, dir.path())
        .await
        .unwrap();
    assert_eq!(outcome.executed_steps, 2);
    assert_eq!(env.executed().len(), 2);
}
