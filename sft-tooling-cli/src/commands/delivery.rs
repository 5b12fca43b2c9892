use crate::{StructureArgs, ValidateArgs};
use anyhow::{Context, Result};
use colored::*;
use sft_tooling::validation::parse_checks;
use sft_tooling::{validate_delivery, StructureConfig, ValidationConfig};

pub fn generate_structure(args: StructureArgs) -> Result<()> {
    let config = StructureConfig {
        model_name: args.model_name,
        output_dir: args.output,
        ..Default::default()
    };
    let report = sft_tooling::generate_structure(&args.project_root, &config).with_context(|| {
        format!(
            "Failed to generate structure for {}",
            args.project_root.display()
        )
    })?;

    for layout in &report.generated {
        println!();
        println!(
            "{} {}/{}",
            "📁 Processed task:".bold(),
            layout.tool,
            layout.task_id
        );
        println!(
            "   • SFT={}, Annotators={:?}, Runs={:?}",
            layout.sft, layout.annotators, layout.runs
        );
        if !layout.example_json {
            println!("   {} Example JSON missing", "⚠️".yellow());
        }
        println!("   {} Output generated at: {}", "✅".green(), layout.dest.display());
    }
    for (tool, task_id) in &report.skipped {
        println!(
            "{} No content found for {tool}/{task_id} in any directory. Skipping.",
            "⚠️ ".yellow()
        );
    }

    for (tool, task_id, error) in &report.failed {
        println!("{} {tool}/{task_id}: {error}", "❌ FAILED".red().bold());
    }

    println!();
    if report.failed.is_empty() {
        println!("All tasks completed.");
    } else {
        println!(
            "{}",
            format!("⚠️  {} task(s) failed.", report.failed.len()).yellow().bold()
        );
    }
    Ok(())
}

pub fn validate(args: ValidateArgs) -> Result<()> {
    let checks = parse_checks(&args.checks)?;
    let config = ValidationConfig {
        schema_path: args.schema,
        model_name: args.model_name,
        ..Default::default()
    };

    let report = validate_delivery(&args.delivery_folder, &args.task_id, &checks, &config)
        .context("Validation could not run")?;

    for result in &report.results {
        let status = if result.passed {
            "✅ PASSED".green().bold()
        } else {
            "❌ FAILED".red().bold()
        };
        println!("{status} {}", result.check);
        for message in &result.messages {
            println!("   • {message}");
        }
    }

    println!("{}", "─".repeat(60));
    if report.all_passed() {
        println!("{}", "🎉 All selected validations PASSED!".green().bold());
    } else {
        println!("{}", "⚠️  Some selected validations FAILED.".yellow().bold());
    }
    println!(
        "📈 Validation Summary: {}/{} checks passed.",
        report.passed_count(),
        report.total()
    );

    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
