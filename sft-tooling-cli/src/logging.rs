use std::env;
use std::path::{Path, PathBuf};
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const VERIFICATION_LOG: &str = "verification.log";

/// `<result_dir>/logs/manual-<YYYYmmdd@HHMMSS>.log`
pub fn manual_log_file(result_dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d@%H%M%S");
    result_dir.join("logs").join(format!("manual-{stamp}.log"))
}

fn log_dir() -> PathBuf {
    if let Ok(custom_dir) = env::var("SFT_TOOLING_LOG_DIR") {
        PathBuf::from(custom_dir)
    } else {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sft-tooling")
            .join("logs")
    }
}

/// Stderr plus a daily rolling file, and optionally a per-session file
pub fn init_logging(default_level: &str, session_file: Option<&Path>) {
    let log_dir = log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = rolling::daily(&log_dir, "sft-tool.log");

    let session_layer = session_file.and_then(|path| {
        let dir = path.parent()?;
        let name = path.file_name()?;
        std::fs::create_dir_all(dir).ok()?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(rolling::never(dir, name))
                .with_ansi(false),
        )
    });

    let _ = tracing_subscriber::registry()
        .with(
            // RUST_LOG wins over --log-level
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(session_layer)
        .try_init();
}
