//! Utility functions for the Quill CLI.

use anyhow::{Context, Result};
use quill_config::{Config, OpenAIConfig, ProviderKind, API_KEY_ENV};
use quill_providers::{OpenAIProvider, ProviderRegistry};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::cli_args::Cli;

/// Load configuration with CLI argument overrides applied.
pub fn load_config_with_cli_overrides(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_with_overrides(
        cli.config.as_deref(),
        cli.provider.clone(),
        cli.model.clone(),
    )?;

    if let Some(limit) = cli.max_concurrent_tools {
        config.agent.max_concurrent_tools = limit;
    }

    Ok(config)
}

/// Register every configured provider under its `<type>.<name>` reference
/// and make the configured default the registry default.
///
/// `openai` entries need a key (from the config or `OPENAI_API_KEY`);
/// `openai_compatible` entries may run without one.
pub fn build_provider_registry(config: &Config) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    for (name, settings) in &config.providers.openai {
        let reference = format!("{}.{}", ProviderKind::OpenAI.prefix(), name);
        match settings.resolved_api_key() {
            Some(key) => registry.register(openai_provider(&reference, key, settings)),
            None if reference == config.providers.default_provider => anyhow::bail!(
                "No API key for '{}': set api_key in the config or the {} environment variable",
                reference,
                API_KEY_ENV
            ),
            None => warn!("Skipping provider '{}': no API key", reference),
        }
    }

    for (name, settings) in &config.providers.openai_compatible {
        let reference = format!("{}.{}", ProviderKind::OpenAICompatible.prefix(), name);
        let key = settings.resolved_api_key().unwrap_or_default();
        registry.register(openai_provider(&reference, key, settings));
    }

    registry
        .set_default(&config.providers.default_provider)
        .with_context(|| {
            format!(
                "Default provider '{}' is not configured",
                config.providers.default_provider
            )
        })?;
    debug!("Registered providers: {:?}", registry.list_providers());

    Ok(registry)
}

fn openai_provider(reference: &str, api_key: String, settings: &OpenAIConfig) -> OpenAIProvider {
    let provider = OpenAIProvider::new(reference, api_key)
        .with_model(settings.model.as_str())
        .with_max_tokens(settings.max_tokens)
        .with_temperature(settings.temperature);
    match settings.base_url.as_deref() {
        Some(url) => provider.with_base_url(url),
        None => provider,
    }
}

/// The workspace from `--workspace`, or the current directory.
pub fn resolve_workspace(cli: &Cli) -> Result<PathBuf> {
    match &cli.workspace {
        Some(dir) => std::fs::canonicalize(dir)
            .with_context(|| format!("Workspace {} does not exist", dir.display())),
        None => Ok(std::env::current_dir()?),
    }
}

/// Initialize logging based on CLI verbosity settings.
///
/// Logs go to stderr so streamed model output on stdout stays clean.
/// `RUST_LOG` wins unless `--verbose` is given.
pub fn initialize_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new(crate_directives("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(crate_directives("info")))
    };

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn crate_directives(level: &str) -> String {
    ["quill", "quill_cli", "quill_core", "quill_providers", "quill_config"]
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}
