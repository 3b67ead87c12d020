use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::logger::Logger;
use crate::shell::{quote, run_capture, CommandResult};

/// The execution environment holding the project under repair.
pub(crate) trait Environment {
    /// Runs a shell command from the project root.
    fn run_command(&self, command: &str) -> Result<CommandResult, String>;

    /// Full text of `path`. Relative paths are resolved against the project root.
    fn read_file(&self, path: &str) -> Result<String, String>;

    /// Replaces the full text of `path`.
    fn write_file(&self, path: &str, content: &str) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub(crate) struct ContainerSettings {
    pub(crate) docker_bin: String,
    pub(crate) container: String,
    pub(crate) image: Option<String>,
    pub(crate) testbed_path: String,
    pub(crate) env_prefix: Option<String>,
}

/// Runs everything through `docker exec` against a long-lived container.
pub(crate) struct ContainerEnvironment<'a> {
    settings: ContainerSettings,
    logger: &'a Logger,
}

impl<'a> ContainerEnvironment<'a> {
    pub(crate) fn new(settings: ContainerSettings, logger: &'a Logger) -> Self {
        Self { settings, logger }
    }

    pub(crate) fn resolve_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.settings.testbed_path.trim_end_matches('/'),
                path.trim_start_matches("./")
            )
        }
    }

    fn wrap_script(&self, command: &str) -> String {
        let cd = format!("cd {} && {}", quote(&self.settings.testbed_path), command);
        match self.settings.env_prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix} && {cd}"),
            _ => cd,
        }
    }

    fn exec(&self, script: &str, input: Option<&str>, label: &str) -> Result<CommandResult, String> {
        let mut args = vec!["exec".to_string()];
        if input.is_some() {
            args.push("-i".to_string());
        }
        args.push(self.settings.container.clone());
        args.push("bash".to_string());
        args.push("-c".to_string());
        args.push(script.to_string());
        run_capture(&self.settings.docker_bin, &args, input, label, self.logger)
    }

    fn docker(&self, args: &[&str], label: &str) -> Result<CommandResult, String> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        run_capture(&self.settings.docker_bin, &args, None, label, self.logger)
    }

    fn container_filter(&self) -> String {
        format!("name=^{}$", self.settings.container)
    }

    pub(crate) fn is_running(&self) -> Result<bool, String> {
        let filter = self.container_filter();
        let result = self.docker(&["ps", "-q", "-f", &filter], "docker-ps")?;
        Ok(result.success() && !result.stdout.trim().is_empty())
    }

    fn exists(&self) -> Result<bool, String> {
        let filter = self.container_filter();
        let result = self.docker(&["ps", "-aq", "-f", &filter], "docker-ps")?;
        Ok(result.success() && !result.stdout.trim().is_empty())
    }

    /// Makes sure the container is up: reuse a running one, start a stopped one,
    /// or create a keep-alive container from the configured image.
    pub(crate) fn ensure_running(&self) -> Result<(), String> {
        if self.is_running()? {
            return Ok(());
        }
        let container = self.settings.container.as_str();
        if self.exists()? {
            let result = self.docker(&["start", container], "docker-start")?;
            if !result.success() {
                return Err(format!(
                    "Failed to start container {}: {}",
                    container,
                    result.stderr.trim()
                ));
            }
            return Ok(());
        }
        let Some(image) = self.settings.image.as_deref() else {
            return Err(format!(
                "Container {} is not running and no --image was given to create it.",
                container
            ));
        };
        let result = self.docker(
            &[
                "run", "-d", "--name", container, image, "tail", "-f", "/dev/null",
            ],
            "docker-run",
        )?;
        if !result.success() {
            return Err(format!(
                "Failed to create container {} from {}: {}",
                container,
                image,
                result.stderr.trim()
            ));
        }
        Ok(())
    }
}

impl Environment for ContainerEnvironment<'_> {
    fn run_command(&self, command: &str) -> Result<CommandResult, String> {
        self.exec(&self.wrap_script(command), None, "run")
    }

    fn read_file(&self, path: &str) -> Result<String, String> {
        let target = self.resolve_path(path);
        let result = self.exec(&format!("cat {}", quote(&target)), None, "read-file")?;
        if !result.success() {
            return Err(format!(
                "Failed to read {}: {}",
                target,
                result.stderr.trim()
            ));
        }
        Ok(result.stdout)
    }

    fn write_file(&self, path: &str, content: &str) -> Result<(), String> {
        let target = self.resolve_path(path);
        let encoded = BASE64.encode(content.as_bytes());
        let script = format!("base64 -d > {}", quote(&target));
        let result = self.exec(&script, Some(&encoded), "write-file")?;
        if !result.success() {
            return Err(format!(
                "Failed to write {}: {}",
                target,
                result.stderr.trim()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(env_prefix: Option<&str>) -> ContainerSettings {
        ContainerSettings {
            docker_bin: "docker".to_string(),
            container: "proj-1".to_string(),
            image: None,
            testbed_path: "/testbed".to_string(),
            env_prefix: env_prefix.map(|value| value.to_string()),
        }
    }

    #[test]
    fn relative_paths_resolve_under_testbed() {
        let logger = Logger::disabled();
        let env = ContainerEnvironment::new(settings(None), &logger);
        assert_eq!(env.resolve_path("src/app.py"), "/testbed/src/app.py");
        assert_eq!(env.resolve_path("./tests/t.py"), "/testbed/tests/t.py");
        assert_eq!(env.resolve_path("/opt/x.py"), "/opt/x.py");
    }

    #[test]
    fn scripts_run_from_project_root_after_prefix() {
        let logger = Logger::disabled();
        let env = ContainerEnvironment::new(settings(Some(". /opt/activate.sh")), &logger);
        assert_eq!(
            env.wrap_script("pytest -q"),
            ". /opt/activate.sh && cd /testbed && pytest -q"
        );

        let env = ContainerEnvironment::new(settings(Some("  ")), &logger);
        assert_eq!(env.wrap_script("pytest -q"), "cd /testbed && pytest -q");
    }
}
