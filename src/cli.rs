use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::{FixMode, Language};

pub(crate) const DEFAULT_OUTPUT_DIR: &str = "./testmend_output";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Parser)]
#[command(
    name = "testmend",
    about = "testmend asks a language model to repair failing unit tests inside a docker container.",
    long_about = "testmend runs the project's tests inside a container, asks a language model which lines are broken, splices in the model's replacement code, and re-measures coverage. Rounds repeat until the tests run clean, no fix lands, or the iteration cap is reached.\n\nWith --fix-mode typed the model may instead answer with shell commands, which run in the container, or declare an error unfixable.\n\nThe model API key is read from the variable named by llm.api_key_env (default OPENAI_API_KEY).",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    /// Load configuration from PATH.
    #[arg(short = 'c', long = "config", global = true, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,

    /// Name of the container holding the project.
    #[arg(long = "container", global = true, value_name = "NAME")]
    pub(crate) container: Option<String>,

    /// Image used to create the container when it does not exist yet.
    #[arg(long = "image", global = true, value_name = "IMAGE")]
    pub(crate) image: Option<String>,

    #[arg(long = "language", global = true, value_enum, default_value_t = Language::Python)]
    pub(crate) language: Language,

    /// Directory for coverage.json and summary.json.
    #[arg(long = "output-dir", value_name = "DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub(crate) output_dir: PathBuf,

    /// Model name sent to the chat-completions endpoint.
    #[arg(long = "model", value_name = "MODEL")]
    pub(crate) model: Option<String>,

    /// Maximum number of repair rounds.
    #[arg(long = "max-iterations", value_name = "N")]
    pub(crate) max_iterations: Option<u32>,

    /// How fixes are requested: a fenced replacement block, or a typed JSON
    /// answer that may also run shell commands in the container.
    #[arg(long = "fix-mode", value_enum, value_name = "MODE")]
    pub(crate) fix_mode: Option<FixMode>,

    #[command(subcommand)]
    pub(crate) command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Check that docker, the container, the test command, and the model key are usable.
    #[command(about = "Check that docker, the container, the test command, and the model key are usable.")]
    Doctor,
}
