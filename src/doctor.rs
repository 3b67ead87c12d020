use std::env;
use std::path::Path;

use crate::app::RunSettings;
use crate::environment::Environment;
use crate::logger::Logger;
use crate::run_loop::{quit, Quit};
use crate::shell::command_exists;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "FAIL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DoctorCheck {
    pub(crate) name: &'static str,
    pub(crate) status: CheckStatus,
    pub(crate) detail: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

fn docker_available(docker_bin: &str) -> bool {
    if docker_bin.contains('/') {
        Path::new(docker_bin).is_file()
    } else {
        command_exists(docker_bin)
    }
}

fn check_container(env: &dyn Environment, container: &str) -> DoctorCheck {
    match env.run_command("true") {
        Ok(result) if result.success() => {
            DoctorCheck::new("container", CheckStatus::Ok, container.to_string())
        }
        Ok(result) => DoctorCheck::new(
            "container",
            CheckStatus::Fail,
            format!(
                "{} exited with {}: {}",
                container,
                result.exit_code,
                result.stderr.trim()
            ),
        ),
        Err(err) => DoctorCheck::new("container", CheckStatus::Fail, err),
    }
}

/// Runs every check in order. The container is only probed once docker itself is found.
pub(crate) fn doctor_checks(settings: &RunSettings, env: &dyn Environment) -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    let docker_bin = settings.container.docker_bin.as_str();
    let docker_found = docker_available(docker_bin);
    checks.push(if docker_found {
        DoctorCheck::new("docker", CheckStatus::Ok, docker_bin.to_string())
    } else {
        DoctorCheck::new(
            "docker",
            CheckStatus::Fail,
            format!("{} not found on PATH", docker_bin),
        )
    });

    checks.push(if docker_found {
        check_container(env, &settings.container.container)
    } else {
        DoctorCheck::new("container", CheckStatus::Fail, "skipped: docker unavailable")
    });

    let test_command = settings.fixer.test_command.trim();
    checks.push(if test_command.is_empty() {
        DoctorCheck::new("test command", CheckStatus::Fail, "empty")
    } else {
        DoctorCheck::new("test command", CheckStatus::Ok, test_command.to_string())
    });

    let key_env = settings.llm.api_key_env.as_str();
    let key_set = env::var(key_env)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    checks.push(if key_set {
        DoctorCheck::new("api key", CheckStatus::Ok, key_env.to_string())
    } else {
        DoctorCheck::new(
            "api key",
            CheckStatus::Warn,
            format!("{} is not set; errors will not be analysed", key_env),
        )
    });

    checks
}

pub(crate) fn run_doctor_mode(
    settings: &RunSettings,
    env: &dyn Environment,
    logger: &Logger,
) -> Result<(), Quit> {
    let checks = doctor_checks(settings, env);
    for check in &checks {
        println!("{}: {} ({})", check.status.label(), check.name, check.detail);
        logger.event(
            "doctor check",
            &[
                ("name", check.name),
                ("status", check.status.label()),
                ("detail", &check.detail),
            ],
        );
    }

    let failed: Vec<&str> = checks
        .iter()
        .filter(|check| check.status == CheckStatus::Fail)
        .map(|check| check.name)
        .collect();
    if failed.is_empty() {
        println!("doctor: all required checks passed");
        return Ok(());
    }
    let message = format!("doctor failed: {}", failed.join(", "));
    eprintln!("{}", message);
    Err(quit(logger, &message, 1))
}
