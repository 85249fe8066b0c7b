//! Quill CLI - command-line interface for the Quill coding assistant.

pub mod console_renderer;
pub mod context_files;

mod cli_args;
mod interactive;
mod task_execution;
mod utils;

use anyhow::Result;
use clap::Parser;
use quill_config::Config;
use quill_core::{Driver, ExecContext, File};
use std::path::Path;
use tracing::info;

pub use cli_args::Cli;
pub use interactive::{Command, History};

use context_files::gather_context;
use interactive::run_interactive;
use task_execution::{build_task, execute_task, handle_execution_error};
use utils::{build_provider_registry, initialize_logging, load_config_with_cli_overrides, resolve_workspace};

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    initialize_logging(cli.verbose);

    let workspace_dir = resolve_workspace(&cli)?;
    let config = load_config_with_cli_overrides(&cli)?;
    let driver = build_driver(&config, &workspace_dir)?;
    let context = gather_context(&workspace_dir, &cli.files, &config.context)?;
    info!(
        "Workspace {} with {} context file(s)",
        workspace_dir.display(),
        context.len()
    );

    match cli.task {
        Some(task) => run_single_shot(&driver, &task, &context, cli.show_prompt).await,
        None => run_interactive(&driver, &context, cli.show_prompt).await,
    }
}

fn build_driver(config: &Config, workspace_dir: &Path) -> Result<Driver> {
    let providers = build_provider_registry(config)?;
    Ok(Driver::from_config(
        providers,
        config,
        ExecContext::new(workspace_dir),
    ))
}

/// One task, run until the model stops calling tools, then exit. A fatal error makes the process exit non-zero.
async fn run_single_shot(driver: &Driver, input: &str, context: &[File], show_prompt: bool) -> Result<()> {
    let mut task = build_task(input, context)?;
    match execute_task(driver, &mut task, &[], show_prompt).await {
        Ok(_) => Ok(()),
        Err(e) => {
            handle_execution_error(&e, input);
            Err(e.into())
        }
    }
}
