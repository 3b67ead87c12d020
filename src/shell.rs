use shell_escape::unix::escape;
use std::env;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;

use crate::logger::{preview, Logger};

/// Quotes a single value for inclusion in a `bash -c` script.
pub(crate) fn quote(value: &str) -> String {
    escape(value.into()).into_owned()
}

pub(crate) fn render_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommandResult {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) exit_code: i32,
}

impl CommandResult {
    pub(crate) fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The error stream, or the primary stream when nothing was written to stderr.
    pub(crate) fn error_output(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Runs `program args...` without a shell and captures both output streams.
/// `input`, when given, is written to the child's stdin.
pub(crate) fn run_capture(
    program: &str,
    args: &[String],
    input: Option<&str>,
    log_label: &str,
    logger: &Logger,
) -> Result<CommandResult, String> {
    logger.event(
        "cmd start",
        &[
            ("label", log_label),
            ("program", program),
            ("args", &preview(&render_args(args), 400)),
        ],
    );

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
    let mut child = cmd
        .spawn()
        .map_err(|err| format!("Failed to run command '{}': {}", program, err))?;
    let stdin = child.stdin.take();
    // stdin is fed from its own thread while both output pipes drain here.
    let (output, written) = thread::scope(|scope| {
        let writer = match (input, stdin) {
            (Some(input), Some(mut stdin)) => {
                Some(scope.spawn(move || stdin.write_all(input.as_bytes())))
            }
            _ => None,
        };
        let output = child.wait_with_output();
        let written = match writer {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdin writer panicked"))),
            None => Ok(()),
        };
        (output, written)
    });
    let output =
        output.map_err(|err| format!("Failed to wait for command '{}': {}", program, err))?;
    written.map_err(|err| format!("Failed to write stdin of '{}': {}", program, err))?;

    let exit_code = output.status.code().unwrap_or(-1);
    logger.event(
        "cmd exit",
        &[("label", log_label), ("exit", &exit_code.to_string())],
    );

    Ok(CommandResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code,
    })
}

pub(crate) fn command_exists(name: &str) -> bool {
    let Some(paths) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&paths).any(|path| {
        let full = path.join(name);
        full.is_file() || full.is_symlink()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_output_prefers_stderr() {
        let result = CommandResult {
            stdout: "collected 3 items".to_string(),
            stderr: "ImportError: boom".to_string(),
            exit_code: 1,
        };
        assert_eq!(result.error_output(), "ImportError: boom");

        let result = CommandResult {
            stdout: "FAILED test_a.py::test_x".to_string(),
            stderr: String::new(),
            exit_code: 1,
        };
        assert_eq!(result.error_output(), "FAILED test_a.py::test_x");
    }

    #[test]
    fn render_args_quotes_shell_metacharacters() {
        let args = vec!["exec".to_string(), "a b".to_string(), "$HOME".to_string()];
        assert_eq!(render_args(&args), "exec 'a b' '$HOME'");
    }

    #[cfg(unix)]
    #[test]
    fn run_capture_collects_both_streams() {
        let logger = Logger::disabled();
        let args = vec![
            "-c".to_string(),
            "printf out; printf err >&2; exit 3".to_string(),
        ];
        let result = run_capture("sh", &args, None, "test", &logger).expect("run sh");
        assert_eq!(result.stdout, "out");
        assert_eq!(result.stderr, "err");
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }

    #[cfg(unix)]
    #[test]
    fn run_capture_forwards_stdin() {
        let logger = Logger::disabled();
        let args = vec!["-c".to_string(), "tr a-z A-Z".to_string()];
        let result =
            run_capture("sh", &args, Some("hello"), "test", &logger).expect("run sh");
        assert_eq!(result.stdout, "HELLO");
        assert!(result.success());
    }

    #[cfg(unix)]
    #[test]
    fn run_capture_survives_child_that_fills_stderr_before_reading_stdin() {
        let logger = Logger::disabled();
        let size = 300_000;
        let args = vec![
            "-c".to_string(),
            format!("head -c {size} /dev/zero | tr '\\0' e >&2; cat"),
        ];
        let input = "x".repeat(size);
        let result = run_capture("sh", &args, Some(&input), "test", &logger).expect("run sh");
        assert!(result.success());
        assert_eq!(result.stderr.len(), size);
        assert_eq!(result.stdout.len(), size);
        assert!(result.stdout.chars().all(|c| c == 'x'));
    }
}
