use crate::{ConvertArgs, TrajectoryArgs};
use anyhow::{bail, Context, Result};
use colored::*;
use sft_tooling::trajectory::{notebook_from_trajectory_file, DEFAULT_INSTRUCTION};
use sft_tooling::{process_notebooks, FileSelection, TaskConfig};

pub fn convert(args: ConvertArgs, selection: FileSelection) -> Result<()> {
    if !args.input_dir.is_dir() {
        bail!("Input directory '{}' not found.", args.input_dir.display());
    }

    let summary = process_notebooks(&args.input_dir, args.output_dir.as_deref(), selection)
        .with_context(|| format!("Failed to convert notebooks in {}", args.input_dir.display()))?;

    println!();
    println!("{}", "═".repeat(60));
    if summary.found == 0 {
        println!("{} No .ipynb files found.", "⏭️  SKIPPED:".yellow().bold());
        return Ok(());
    }

    let headline = if summary.failures.is_empty() {
        "✅ DONE:".green().bold()
    } else {
        "⚠️  DONE WITH ERRORS:".yellow().bold()
    };
    println!("{} {} notebooks processed", headline, summary.found);
    println!("   • Converted: {}", summary.converted);
    println!("   • Already in new format: {}", summary.copied_new);
    println!("   • Copied without conversion: {}", summary.copied_unconverted);
    if !summary.failures.is_empty() {
        println!("{}", "─".repeat(60));
        for (path, error) in &summary.failures {
            println!("   {} {}: {}", "❌".red(), path.display(), error);
        }
    }
    Ok(())
}

pub fn trajectory_to_notebook(args: TrajectoryArgs) -> Result<()> {
    if !args.trajectory_path.is_file() {
        bail!("Trajectory file {} not found", args.trajectory_path.display());
    }

    let instruction = match (args.instruction, &args.task_config) {
        (Some(instruction), _) => instruction,
        (None, Some(path)) if path.is_file() => TaskConfig::load(path)
            .with_context(|| format!("Failed to load task config {}", path.display()))?
            .instruction,
        _ => DEFAULT_INSTRUCTION.to_string(),
    };

    let path = notebook_from_trajectory_file(
        &args.trajectory_path,
        &instruction,
        args.output_dir.as_deref(),
    )
    .context("Error creating notebook")?;

    println!(
        "{} Successfully created notebook: {}",
        "✅".green(),
        path.display()
    );
    Ok(())
}
