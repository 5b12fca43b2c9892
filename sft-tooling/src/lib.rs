//! Data-preparation tooling for desktop-automation SFT datasets.
//!
//! Converts agent trajectory notebooks between cell formats, records manual
//! sessions against a VM-backed desktop, replays recorded trajectories, and
//! assembles per-task results into the delivery folder layout.

pub mod action;
pub mod converter;
pub mod desktop_env;
pub mod error;
pub mod manual_run;
pub mod notebook;
pub mod replay;
pub mod structure;
pub mod trajectory;
pub mod validation;

pub use converter::{process_notebooks, ConversionSummary, FileSelection, NotebookFormat};
pub use desktop_env::{
    CommandResult, DesktopEnv, HttpDesktopEnv, HttpDesktopEnvConfig, SetupStep, TaskConfig,
};
pub use error::*;
pub use manual_run::{
    run_manual_batch, run_single_example_manual, ActionSource, ManualRunConfig, ManualRunOutcome,
    ScriptedActionSource, SessionEnd, StdinActionSource,
};
pub use notebook::{Cell, CellRole, Notebook};
pub use replay::{verify_trajectory, ReplayConfig, ReplayOutcome, VerificationSummary};
pub use structure::{generate_structure, StructureConfig, StructureReport, TaskLayout};
pub use trajectory::{StepLog, StepObservation};
pub use validation::{validate_delivery, Check, CheckResult, ValidationConfig, ValidationReport};
