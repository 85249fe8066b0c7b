//! CLI argument parsing for Quill.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Clone, Debug)]
#[command(
    name = "quill",
    version,
    about = "A coding assistant that streams model output and runs the tools it asks for"
)]
pub struct Cli {
    /// Debug-level logs on stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the system text before each turn
    #[arg(long)]
    pub show_prompt: bool,

    /// Read settings from this TOML file instead of the default locations
    #[arg(short, long)]
    pub config: Option<String>,

    /// Directory tools run in and context patterns are relative to [default: .]
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Context files as glob patterns relative to the workspace (repeatable)
    #[arg(short = 'f', long = "file", value_name = "PATTERN")]
    pub files: Vec<String>,

    /// Provider reference to use instead of `default_provider`, e.g. openai_compatible.local
    #[arg(long, value_name = "PROVIDER")]
    pub provider: Option<String>,

    /// Model name for the chosen provider
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Run at most N tool invocations at once (0 = no limit)
    #[arg(long, value_name = "N")]
    pub max_concurrent_tools: Option<usize>,

    /// Run this one task and exit; without it Quill starts a prompt
    pub task: Option<String>,
}
