use clap::Parser;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use crate::cli::{Cli, CliCommand, DEFAULT_MODEL};
use crate::config::{
    load_config, Config, DEFAULT_API_KEY_ENV, DEFAULT_COVERAGE_COMMAND,
    DEFAULT_COVERAGE_REPORT_PATH, DEFAULT_DOCKER_BIN, DEFAULT_ENV_PREFIX, DEFAULT_LLM_ENDPOINT,
    DEFAULT_LLM_MAX_RETRIES, DEFAULT_LLM_TIMEOUT_SECS, DEFAULT_TESTBED_PATH,
};
use crate::coverage::EvalScriptCollector;
use crate::doctor::run_doctor_mode;
use crate::environment::{ContainerEnvironment, ContainerSettings};
use crate::llm::{ChatCompletionsClient, LlmClient, LlmSettings};
use crate::logger::Logger;
use crate::report::{print_summary, write_summary};
use crate::run_loop::{quit, ErrorFixer, FixerConfig, Quit};
use crate::types::{Language, MaxIterations};

const LLM_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Everything a run needs, after command-line flags have been laid over the config file.
#[derive(Debug, Clone)]
pub(crate) struct RunSettings {
    pub(crate) container: ContainerSettings,
    pub(crate) fixer: FixerConfig,
    pub(crate) coverage_command: String,
    pub(crate) coverage_report_path: String,
    pub(crate) llm: LlmSettings,
    pub(crate) output_dir: PathBuf,
}

fn default_env_prefix(language: Language) -> Option<String> {
    match language {
        Language::Python => Some(DEFAULT_ENV_PREFIX.to_string()),
        Language::Java => None,
    }
}

pub(crate) fn resolve_settings(cli: &Cli, config: &Config) -> Result<RunSettings, String> {
    let container = cli
        .container
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| "--container is required.".to_string())?;
    let language = cli.language;

    let max_fix_iterations = match cli.max_iterations {
        Some(value) => {
            MaxIterations::new(value).map_err(|err| format!("Invalid --max-iterations: {err}"))?
        }
        None => config.max_fix_iterations.unwrap_or_default(),
    };

    let env_prefix = match &config.env_prefix {
        Some(prefix) => Some(prefix.clone()),
        None => default_env_prefix(language),
    };

    Ok(RunSettings {
        container: ContainerSettings {
            docker_bin: config
                .docker_bin
                .clone()
                .unwrap_or_else(|| DEFAULT_DOCKER_BIN.to_string()),
            container: container.to_string(),
            image: cli.image.clone(),
            testbed_path: config
                .testbed_path
                .clone()
                .unwrap_or_else(|| DEFAULT_TESTBED_PATH.to_string()),
            env_prefix,
        },
        fixer: FixerConfig {
            language,
            test_command: config
                .test_command
                .clone()
                .unwrap_or_else(|| language.default_test_command().to_string()),
            max_fix_iterations,
            fix_mode: cli.fix_mode.or(config.fix_mode).unwrap_or_default(),
        },
        coverage_command: config
            .coverage
            .command
            .clone()
            .unwrap_or_else(|| DEFAULT_COVERAGE_COMMAND.to_string()),
        coverage_report_path: config
            .coverage
            .report_path
            .clone()
            .unwrap_or_else(|| DEFAULT_COVERAGE_REPORT_PATH.to_string()),
        llm: LlmSettings {
            endpoint: config
                .llm
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_LLM_ENDPOINT.to_string()),
            model: cli
                .model
                .clone()
                .or_else(|| config.llm.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key_env: config
                .llm
                .api_key_env
                .clone()
                .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string()),
            timeout: Duration::from_secs(
                config.llm.timeout_secs.unwrap_or(DEFAULT_LLM_TIMEOUT_SECS),
            ),
            max_retries: config.llm.max_retries.unwrap_or(DEFAULT_LLM_MAX_RETRIES),
            backoff: LLM_RETRY_BACKOFF,
        },
        output_dir: cli.output_dir.clone(),
    })
}

fn load_optional_config(cli: &Cli) -> Result<Config, Quit> {
    let Some(path) = cli.config.as_deref() else {
        return Ok(Config::default());
    };
    if !path.is_file() {
        let message = format!("Missing config file: {}", path.display());
        eprintln!("{}", message);
        return Err(Quit {
            code: 1,
            reason: format!("missing_config:{}", path.display()),
        });
    }
    load_config(path).map(|loaded| loaded.config).map_err(|message| {
        eprintln!("{}", message);
        Quit {
            code: 1,
            reason: message,
        }
    })
}

pub(crate) fn run_with_cli(cli: Cli) -> Result<(), Quit> {
    let config = load_optional_config(&cli)?;
    let logger = Logger::new(config.log_path.clone());

    let settings = match resolve_settings(&cli, &config) {
        Ok(settings) => settings,
        Err(message) => {
            eprintln!("{}", message);
            return Err(quit(&logger, &message, 1));
        }
    };
    logger.event(
        "run start",
        &[
            ("container", &settings.container.container),
            ("language", settings.fixer.language.as_str()),
            ("max_iterations", &settings.fixer.max_fix_iterations.to_string()),
            ("fix_mode", settings.fixer.fix_mode.as_str()),
        ],
    );

    let env = ContainerEnvironment::new(settings.container.clone(), &logger);
    if matches!(cli.command, Some(CliCommand::Doctor)) {
        return run_doctor_mode(&settings, &env, &logger);
    }

    if let Err(message) = env.ensure_running() {
        eprintln!("{}", message);
        return Err(quit(&logger, &message, 1));
    }

    let client = ChatCompletionsClient::from_env(settings.llm.clone(), &logger).map_err(|message| {
        eprintln!("{}", message);
        quit(&logger, &message, 1)
    })?;
    if client.is_none() {
        eprintln!(
            "Warning: {} is not set; errors will not be analysed.",
            settings.llm.api_key_env
        );
    }
    let llm: Option<&dyn LlmClient> = client.as_ref().map(|client| client as &dyn LlmClient);

    let collector = EvalScriptCollector::new(
        &env,
        settings.fixer.language,
        settings.coverage_command.clone(),
        settings.coverage_report_path.clone(),
        settings.output_dir.clone(),
        &logger,
    );
    let fixer = ErrorFixer::new(settings.fixer.clone(), &env, &collector, llm, &logger);
    let outcome = fixer.run();

    print_summary(&outcome);
    let summary_path = write_summary(
        &settings.output_dir,
        settings.fixer.language,
        &settings.container.container,
        &outcome,
    )
    .map_err(|message| {
        eprintln!("{}", message);
        quit(&logger, &message, 1)
    })?;
    println!("Summary written to {}", summary_path.display());
    logger.event(
        "run end",
        &[
            ("fixes", &outcome.fix_results.len().to_string()),
            ("successful", &outcome.successful_fixes().to_string()),
            (
                "coverage",
                &format!("{:.2}", outcome.final_coverage.coverage_percentage),
            ),
        ],
    );
    Ok(())
}

pub(crate) fn run_with_args(args: Vec<OsString>) -> Result<(), Quit> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            // Rendered by hand so the message goes through the captured stderr.
            eprintln!("{err}");
            return Err(Quit {
                code: err.exit_code(),
                reason: "cli_parse".to_string(),
            });
        }
    };
    run_with_cli(cli)
}

pub(crate) fn main_with_args(args: Vec<OsString>) -> ExitCode {
    match run_with_args(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(quit) => quit.exit_code(),
    }
}

pub(crate) fn main() -> ExitCode {
    main_with_args(env::args_os().collect())
}
