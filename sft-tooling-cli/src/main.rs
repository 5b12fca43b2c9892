//! sft-tool
//!
//! Command-line front end for the SFT data-preparation tooling.
//!
//! Usage:
//!   sft-tool convert <input_dir> [output_dir]          # Legacy notebooks -> step notebooks
//!   sft-tool convert-colab <input_dir> [output_dir]    # Same, only notebooks under Colab/
//!   sft-tool trajectory-to-notebook <trajectory.jsonl> # Export a recorded run as a notebook
//!   sft-tool run-manual --domain os                    # Record tasks by hand against the VM
//!   sft-tool verify <trajectory.jsonl> --task-config t.json
//!   sft-tool generate-structure <project_root>         # Build delivery folders
//!   sft-tool validate <delivery_dir> <task_id>         # Check a delivery folder

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sft_tooling::replay::default_result_dir;
use std::path::PathBuf;

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "sft-tool")]
#[command(about = "Data-preparation tooling for desktop-automation SFT datasets")]
#[command(
    long_about = "Converts trajectory notebooks, records manual sessions against a VM-backed desktop, replays recorded trajectories and assembles delivery folders."
)]
struct Cli {
    /// Log level used when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "SFT_TOOLING_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Directory searched recursively for notebooks
    input_dir: PathBuf,

    /// Where converted notebooks go, mirroring the input tree (defaults to in-place)
    output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TrajectoryArgs {
    /// Path to a trajectory.jsonl file
    trajectory_path: PathBuf,

    /// Task config whose instruction is used when --instruction is not given
    #[arg(long)]
    task_config: Option<PathBuf>,

    /// Task instruction for the user cell
    #[arg(long)]
    instruction: Option<String>,

    /// Output directory (defaults to the trajectory's directory)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

/// Connection to the in-guest control server and the external hooks
#[derive(Args, Debug, Clone)]
pub struct VmArgs {
    /// Host of the control server inside the VM
    #[arg(long, env = "SFT_VM_HOST", default_value = "localhost")]
    vm_host: String,

    /// Port of the control server inside the VM
    #[arg(long, env = "SFT_VM_PORT", default_value_t = 5000)]
    vm_port: u16,

    /// Python interpreter used inside the guest
    #[arg(long, env = "SFT_VM_PYTHON", default_value = "python3")]
    vm_python: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 60)]
    request_timeout: u64,

    /// Shell command that brings the VM to a clean snapshot before setup
    #[arg(long, env = "SFT_VM_RESET_COMMAND")]
    vm_reset_command: Option<String>,

    /// Shell command printing the score on its last line; {task} and {result_dir} are substituted
    #[arg(long, env = "SFT_EVALUATOR_COMMAND")]
    evaluator_command: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunManualArgs {
    #[command(flatten)]
    vm: VmArgs,

    /// Base directory holding examples/<domain>/<id>.json
    #[arg(long, default_value = "evaluation_examples")]
    test_config_base_dir: PathBuf,

    /// A {domain: [ids]} file selecting specific tasks
    #[arg(long)]
    task_file: Option<PathBuf>,

    /// Domain to run from the meta file, or "all"
    #[arg(long, default_value = "all")]
    domain: String,

    /// Meta file listing all tasks
    #[arg(long, default_value = "evaluation_examples/test_all.json")]
    test_all_meta_path: PathBuf,

    /// Directory to save recorded sessions
    #[arg(long, default_value = "./sft_results")]
    result_dir: PathBuf,

    /// Read actions from this file instead of the terminal
    #[arg(long)]
    actions_file: Option<PathBuf>,

    /// Maximum number of steps per task
    #[arg(long, default_value_t = 150)]
    max_steps: usize,

    /// Seconds to sleep after each action
    #[arg(long, default_value_t = 1.0)]
    sleep_after_execution: f64,

    #[arg(long, default_value_t = 1920)]
    screen_width: u32,

    #[arg(long, default_value_t = 1080)]
    screen_height: u32,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    vm: VmArgs,

    /// Path to the trajectory.jsonl file to replay
    trajectory_file: PathBuf,

    /// Task configuration JSON used for the run
    #[arg(long)]
    task_config: PathBuf,

    /// Directory for replay artifacts (defaults to a timestamped folder)
    #[arg(long)]
    result_dir: Option<PathBuf>,

    /// Seconds to pause after each executed action
    #[arg(long, default_value_t = 0.2)]
    sleep_after_execution: f64,

    /// Maximum number of steps to replay
    #[arg(long, default_value_t = 1000)]
    max_steps: usize,

    /// Reset attempts while the VM reports it is not powered on
    #[arg(long, default_value_t = 3)]
    env_start_retries: u32,

    /// Stop at the first command the VM reports an error for
    #[arg(long)]
    stop_on_error: bool,
}

#[derive(Args, Debug)]
pub struct StructureArgs {
    /// Project root containing SFT/, run_*, annotator_* and evaluation_examples/
    project_root: PathBuf,

    /// Where task folders are written (defaults to the project root's parent)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Folder name used for model runs
    #[arg(long, default_value = sft_tooling::structure::DEFAULT_MODEL_NAME)]
    model_name: String,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the delivery folder
    delivery_folder: PathBuf,

    /// The task id
    task_id: String,

    /// Comma-separated checks to run, or "all"
    #[arg(long, default_value = "all")]
    checks: String,

    /// JSON schema for the task file (defaults to <delivery>/../osworld_updated_schema.json)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Folder name used for model runs
    #[arg(long, default_value = sft_tooling::structure::DEFAULT_MODEL_NAME)]
    model_name: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert legacy tool_call/tool_output notebooks to the step layout
    Convert(ConvertArgs),
    /// Convert only notebooks that sit in a Colab/ directory
    ConvertColab(ConvertArgs),
    /// Turn a trajectory.jsonl into a step notebook
    TrajectoryToNotebook(TrajectoryArgs),
    /// Record tasks manually, one typed action at a time
    RunManual(RunManualArgs),
    /// Replay a recorded trajectory and re-run the evaluator
    Verify(VerifyArgs),
    /// Reorganize per-task results into the delivery layout
    GenerateStructure(StructureArgs),
    /// Validate a delivery folder
    Validate(ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Shared by the session log and the replay artifacts
    let verify_dir = match &cli.command {
        Commands::Verify(args) => Some(
            args.result_dir
                .clone()
                .unwrap_or_else(|| default_result_dir(&args.trajectory_file)),
        ),
        _ => None,
    };

    let session_log = match &cli.command {
        Commands::RunManual(args) => Some(logging::manual_log_file(&args.result_dir)),
        _ => verify_dir
            .as_ref()
            .map(|dir| dir.join(logging::VERIFICATION_LOG)),
    };
    logging::init_logging(&cli.log_level, session_log.as_deref());

    match cli.command {
        Commands::Convert(args) => {
            commands::convert::convert(args, sft_tooling::FileSelection::Recursive)
        }
        Commands::ConvertColab(args) => {
            commands::convert::convert(args, sft_tooling::FileSelection::Colab)
        }
        Commands::TrajectoryToNotebook(args) => commands::convert::trajectory_to_notebook(args),
        Commands::RunManual(args) => commands::session::run_manual(args).await,
        Commands::Verify(args) => {
            let result_dir = verify_dir.context("verify result directory not resolved")?;
            commands::session::verify(args, result_dir).await
        }
        Commands::GenerateStructure(args) => commands::delivery::generate_structure(args),
        Commands::Validate(args) => commands::delivery::validate(args),
    }
}
