use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{FixMode, MaxIterations};

pub(crate) const DEFAULT_DOCKER_BIN: &str = "docker";
pub(crate) const DEFAULT_TESTBED_PATH: &str = "/testbed";
pub(crate) const DEFAULT_ENV_PREFIX: &str = ". /opt/activate_python.sh";
pub(crate) const DEFAULT_COVERAGE_COMMAND: &str = "export AGENT_DIR=/agent TESTBED_DIR=/testbed OUTPUT_DIR=/output METADATA_PATH=/metadata.json EVAL_SCRIPT_PATH=/eval.sh && python3 /eval/all_test_coverage_eval.py";
pub(crate) const DEFAULT_COVERAGE_REPORT_PATH: &str = "/output/eval.json";
pub(crate) const DEFAULT_LLM_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub(crate) const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub(crate) const DEFAULT_LLM_TIMEOUT_SECS: u64 = 300;
pub(crate) const DEFAULT_LLM_MAX_RETRIES: u32 = 3;

/// Optional settings file. Every key may be omitted; command-line flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) log_path: Option<PathBuf>,
    pub(crate) docker_bin: Option<String>,
    pub(crate) testbed_path: Option<String>,
    pub(crate) env_prefix: Option<String>,
    pub(crate) test_command: Option<String>,
    pub(crate) max_fix_iterations: Option<MaxIterations>,
    pub(crate) fix_mode: Option<FixMode>,
    pub(crate) coverage: CoverageConfig,
    pub(crate) llm: LlmConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CoverageConfig {
    pub(crate) command: Option<String>,
    pub(crate) report_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct LlmConfig {
    pub(crate) endpoint: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) api_key_env: Option<String>,
    pub(crate) timeout_secs: Option<u64>,
    pub(crate) max_retries: Option<u32>,
}

#[derive(Debug)]
pub(crate) struct LoadedConfig {
    pub(crate) config: Config,
    pub(crate) warnings: Vec<String>,
}

const TOP_LEVEL_KEYS: &[&str] = &[
    "log_path",
    "docker_bin",
    "testbed_path",
    "env_prefix",
    "test_command",
    "max_fix_iterations",
    "fix_mode",
    "coverage",
    "llm",
];
const COVERAGE_KEYS: &[&str] = &["command", "report_path"];
const LLM_KEYS: &[&str] = &["endpoint", "model", "api_key_env", "timeout_secs", "max_retries"];

pub(crate) fn load_config(path: &Path) -> Result<LoadedConfig, String> {
    let content = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config {}: {}", path.display(), err))?;
    load_config_from_str(&content, &path.display().to_string())
}

pub(crate) fn load_config_from_str(content: &str, label: &str) -> Result<LoadedConfig, String> {
    let value: Value = serde_yaml::from_str(content)
        .map_err(|err| format!("Failed to parse config {}: {}", label, err))?;
    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => Mapping::new(),
        _ => return Err(format!("Config {} must be a YAML mapping", label)),
    };

    let mut warnings = unknown_keys(&mapping, TOP_LEVEL_KEYS, "");
    if let Some(coverage) = optional_mapping(&mapping, "coverage", "coverage")? {
        warnings.extend(unknown_keys(coverage, COVERAGE_KEYS, "coverage."));
        optional_non_empty_string(coverage, "command", "coverage.command")?;
        optional_non_empty_string(coverage, "report_path", "coverage.report_path")?;
    }
    if let Some(llm) = optional_mapping(&mapping, "llm", "llm")? {
        warnings.extend(unknown_keys(llm, LLM_KEYS, "llm."));
        optional_non_empty_string(llm, "endpoint", "llm.endpoint")?;
        optional_non_empty_string(llm, "model", "llm.model")?;
        optional_non_empty_string(llm, "api_key_env", "llm.api_key_env")?;
    }
    for key in ["log_path", "docker_bin", "testbed_path", "test_command"] {
        optional_non_empty_string(&mapping, key, key)?;
    }
    emit_unknown_key_warnings(&warnings);

    let config: Config = serde_path_to_error::deserialize(Value::Mapping(mapping))
        .map_err(|err| format!("Invalid config {} at {}: {}", label, err.path(), err.inner()))?;

    Ok(LoadedConfig { config, warnings })
}

fn emit_unknown_key_warnings(keys: &[String]) {
    for key in keys {
        eprintln!("Warning: unknown config key: {}", key);
    }
}

fn unknown_keys(mapping: &Mapping, allowed: &[&str], prefix: &str) -> Vec<String> {
    mapping
        .keys()
        .filter_map(|key| key.as_str())
        .filter(|key| !allowed.contains(key))
        .map(|key| format!("{prefix}{key}"))
        .collect()
}

fn optional_mapping<'a>(
    mapping: &'a Mapping,
    key_name: &str,
    label: &str,
) -> Result<Option<&'a Mapping>, String> {
    let key = Value::String(key_name.to_string());
    match mapping.get(&key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Mapping(value)) => Ok(Some(value)),
        Some(_) => Err(format!("{} must be a mapping", label)),
    }
}

fn optional_non_empty_string(mapping: &Mapping, key_name: &str, label: &str) -> Result<(), String> {
    let key = Value::String(key_name.to_string());
    match mapping.get(&key) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(value)) => {
            if value.trim().is_empty() {
                Err(format!("{} must not be empty", label))
            } else {
                Ok(())
            }
        }
        Some(_) => Err(format!("{} must be a string", label)),
    }
}
