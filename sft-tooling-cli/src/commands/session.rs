use crate::{RunManualArgs, VerifyArgs, VmArgs};
use anyhow::{Context, Result};
use colored::*;
use sft_tooling::manual_run::{load_task_file, load_task_meta};
use sft_tooling::{
    run_manual_batch, verify_trajectory, ActionSource, HttpDesktopEnv, HttpDesktopEnvConfig,
    ManualRunConfig, ReplayConfig, ScriptedActionSource, StdinActionSource,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

fn connect(vm: VmArgs) -> Result<HttpDesktopEnv> {
    let config = HttpDesktopEnvConfig {
        host: vm.vm_host,
        port: vm.vm_port,
        python: vm.vm_python,
        request_timeout: Duration::from_secs(vm.request_timeout),
        vm_reset_command: vm.vm_reset_command,
        evaluator_command: vm.evaluator_command,
    };
    let env = HttpDesktopEnv::new(config).context("Failed to create VM control client")?;
    info!("Using VM control server at {}", env.base_url());
    Ok(env)
}

fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

pub async fn run_manual(args: RunManualArgs) -> Result<()> {
    let tasks = match &args.task_file {
        Some(path) => load_task_file(path)
            .with_context(|| format!("Failed to load task file {}", path.display()))?,
        None => load_task_meta(&args.test_all_meta_path, &args.domain).with_context(|| {
            format!(
                "Failed to load task meta {}",
                args.test_all_meta_path.display()
            )
        })?,
    };
    let total: usize = tasks.iter().map(|(_, ids)| ids.len()).sum();
    info!("Loaded {} tasks across {} domains", total, tasks.len());

    let mut source: Box<dyn ActionSource> = match &args.actions_file {
        Some(path) => Box::new(
            ScriptedActionSource::from_file(path)
                .with_context(|| format!("Failed to read actions from {}", path.display()))?,
        ),
        None => Box::new(StdinActionSource::new()),
    };

    let config = ManualRunConfig {
        max_steps: args.max_steps,
        sleep_after_execution: seconds(args.sleep_after_execution),
        screen_width: args.screen_width,
        screen_height: args.screen_height,
        ..Default::default()
    };

    let mut env = connect(args.vm)?;
    let report = run_manual_batch(
        &mut env,
        source.as_mut(),
        &tasks,
        &args.test_config_base_dir,
        &args.result_dir,
        &config,
    )
    .await?;

    println!();
    println!("{}", "═".repeat(60));
    println!(
        "{} {} task(s) recorded into {}",
        "✅ DONE:".green().bold(),
        report.completed.len(),
        args.result_dir.display()
    );
    for (domain, id, outcome) in &report.completed {
        let score = outcome
            .score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "   • {domain}/{id}: {} steps, {:?}, score {score}",
            outcome.steps.len(),
            outcome.end
        );
    }
    for (domain, id, error) in &report.failed {
        println!("   {} {domain}/{id}: {error}", "❌".red());
    }
    Ok(())
}

pub async fn verify(args: VerifyArgs, result_dir: PathBuf) -> Result<()> {
    let config = ReplayConfig {
        sleep_after_execution: seconds(args.sleep_after_execution),
        max_steps: args.max_steps,
        env_start_retries: args.env_start_retries,
        stop_on_error: args.stop_on_error,
        ..Default::default()
    };

    let mut env = connect(args.vm)?;
    let summary = verify_trajectory(
        &mut env,
        &args.trajectory_file,
        &args.task_config,
        &result_dir,
        &config,
    )
    .await
    .with_context(|| format!("Verification failed; see {}", result_dir.display()))?;

    println!();
    println!("{}", "═".repeat(60));
    let headline = if summary.done {
        "✅ REPLAYED:".green().bold()
    } else {
        "⚠️  REPLAYED WITHOUT DONE/FAIL:".yellow().bold()
    };
    println!(
        "{} {}/{} steps executed",
        headline, summary.executed_steps, summary.reported_steps
    );
    if let Some(score) = summary.evaluation_score {
        println!("   • Evaluation score: {score}");
    }
    println!("   • Artifacts: {}", result_dir.display());
    Ok(())
}
