mod common;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sft_tooling::desktop_env::wait_for_observation;
use sft_tooling::{DesktopEnv, HttpDesktopEnv, HttpDesktopEnvConfig, SetupStep, TaskConfig, ToolingError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Default)]
struct StubState {
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl StubState {
    fn record(&self, path: &str, body: Value) {
        self.requests.lock().unwrap().push((path.to_string(), body));
    }

    fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }
}

async fn screenshot() -> Vec<u8> {
    common::tiny_png()
}

async fn execute(State(state): State<StubState>, Json(body): Json<Value>) -> Json<Value> {
    state.record("/execute", body.clone());
    let script = body["command"][2].as_str().unwrap_or_default();
    let error = if script.contains("raise") { "Traceback: boom" } else { "" };
    Json(json!({ "status": "success", "output": "ok\n", "error": error, "returncode": 0 }))
}

async fn launch(State(state): State<StubState>, Json(body): Json<Value>) -> StatusCode {
    state.record("/setup/launch", body);
    StatusCode::OK
}

async fn open_file(State(state): State<StubState>, Json(body): Json<Value>) -> StatusCode {
    state.record("/setup/open_file", body);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn start_recording(State(state): State<StubState>) -> StatusCode {
    state.record("/start_recording", Value::Null);
    StatusCode::OK
}

async fn end_recording() -> Vec<u8> {
    b"fake-mp4".to_vec()
}

async fn spawn_stub() -> (StubState, HttpDesktopEnvConfig) {
    let state = StubState::default();
    let app = Router::new()
        .route("/screenshot", get(screenshot))
        .route("/execute", post(execute))
        .route("/setup/launch", post(launch))
        .route("/setup/open_file", post(open_file))
        .route("/start_recording", post(start_recording))
        .route("/end_recording", post(end_recording))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = HttpDesktopEnvConfig {
        host: "127.0.0.1".to_string(),
        port,
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    (state, config)
}

#[tokio::test]
async fn test_execute_and_screenshot_round_trip() {
    let (state, config) = spawn_stub().await;
    let env = HttpDesktopEnv::new(config).unwrap();

    let bytes = wait_for_observation(&env, Duration::from_secs(1), Duration::from_millis(50))
        .await
        .unwrap();
    assert!(image::load_from_memory(&bytes).is_ok());

    let result = env.execute_python("import pyautogui\npyautogui.click(1, 2)").await.unwrap();
    assert_eq!(result.output, "ok\n");
    assert_eq!(result.error(), None);

    let failed = env.execute_python("raise SystemExit").await.unwrap();
    assert_eq!(failed.error(), Some("Traceback: boom"));

    let requests = state.requests();
    assert_eq!(
        requests[0].1,
        json!({
            "command": ["python3", "-c", "import pyautogui\npyautogui.click(1, 2)"],
            "shell": false
        })
    );
}

#[tokio::test]
async fn test_reset_runs_setup_steps_in_order() {
    let (state, config) = spawn_stub().await;
    let mut env = HttpDesktopEnv::new(config).unwrap();

    let mut task = TaskConfig {
        instruction: "Open gedit".to_string(),
        config: vec![
            SetupStep {
                kind: "launch".to_string(),
                parameters: json!({ "command": ["gedit"] }),
            },
            SetupStep {
                kind: "sleep".to_string(),
                parameters: json!({ "seconds": 0.01 }),
            },
            SetupStep {
                kind: "download".to_string(),
                parameters: json!({ "files": [] }),
            },
        ],
        ..Default::default()
    };
    env.reset(&task).await.unwrap();
    assert_eq!(
        state.requests(),
        vec![(
            "/setup/launch".to_string(),
            json!({ "command": ["gedit"], "shell": false })
        )]
    );

    task.config.push(SetupStep {
        kind: "open".to_string(),
        parameters: json!({ "path": "/home/user/a.txt" }),
    });
    let err = env.reset(&task).await.unwrap_err();
    assert!(matches!(err, ToolingError::Vm(_)));
}

#[tokio::test]
async fn test_recording_is_saved_to_destination() {
    let (state, config) = spawn_stub().await;
    let env = HttpDesktopEnv::new(config).unwrap();
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("nested").join("recording.mp4");

    env.start_recording().await.unwrap();
    let saved = env.end_recording(&dest).await.unwrap();

    assert_eq!(saved, Some(dest.clone()));
    assert_eq!(std::fs::read(&dest).unwrap(), b"fake-mp4");
    assert_eq!(state.requests()[0].0, "/start_recording");
}

#[tokio::test]
async fn test_evaluator_requires_command() {
    let (_state, config) = spawn_stub().await;
    let env = HttpDesktopEnv::new(config).unwrap();
    let dir = TempDir::new().unwrap();

    let err = env
        .evaluate(&TaskConfig::default(), dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, ToolingError::EvaluatorUnavailable));
}

#[cfg(unix)]
#[tokio::test]
async fn test_evaluator_command_score_from_last_line() {
    let (_state, mut config) = spawn_stub().await;
    config.evaluator_command = Some("echo evaluating {task}; echo 0.5".to_string());
    let env = HttpDesktopEnv::new(config).unwrap();
    let dir = TempDir::new().unwrap();

    let score = env
        .evaluate(&common::task("x"), dir.path())
        .await
        .unwrap();
    assert_eq!(score, 0.5);
    assert!(dir.path().join("task_config.json").is_file());
}
