use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::diagnosis::{strip_json_fence, ErrorDescriptor};
use crate::environment::Environment;
use crate::llm::LlmClient;
use crate::logger::Logger;
use crate::prompts::{fix_messages, typed_fix_messages};
use crate::types::{Language, LineRange};

pub(crate) const REASON_UNREADABLE: &str = "Could not read file";
pub(crate) const REASON_EMPTY_FIX: &str = "LLM returned empty fix";
pub(crate) const REASON_NO_CLIENT: &str = "No LLM client available";
pub(crate) const REASON_NO_COMMANDS: &str = "No commands provided";
pub(crate) const REASON_UNFIXABLE: &str = "Error cannot be fixed";

/// How a fix was (or would have been) applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum FixType {
    Code,
    Command,
    Unfixable,
}

impl FixType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Command => "command",
            Self::Unfixable => "unfixable",
        }
    }
}

impl fmt::Display for FixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one patch attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct FixResult {
    pub(crate) file_path: String,
    pub(crate) fix_type: FixType,
    pub(crate) original_content: String,
    pub(crate) proposed_content: String,
    pub(crate) success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) commands: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) description: Option<String>,
}

impl FixResult {
    fn failed(file_path: &str, original: &str, proposed: &str, reason: impl Into<String>) -> Self {
        Self {
            file_path: file_path.to_string(),
            fix_type: FixType::Unfixable,
            original_content: original.to_string(),
            proposed_content: proposed.to_string(),
            success: false,
            failure_reason: Some(reason.into()),
            commands: Vec::new(),
            description: None,
        }
    }
}

/// 1-based inclusive line span, always inside `[1, line_count]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContextWindow {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl ContextWindow {
    pub(crate) fn len(self) -> usize {
        self.end - self.start + 1
    }
}

/// The reported range padded by one line on each side and clamped to the file.
pub(crate) fn context_window(range: LineRange, line_count: usize) -> ContextWindow {
    let last = line_count.max(1) as i64;
    let start = range.start.clamp(1, last);
    let end = range.end.clamp(start, last);
    ContextWindow {
        start: (start - 1).max(1) as usize,
        end: (end + 1).min(last) as usize,
    }
}

/// `NNNN: text` per line, numbering from `first_line`.
pub(crate) fn number_lines(lines: &[&str], first_line: usize) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(offset, line)| format!("{:04}: {}", first_line + offset, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn code_block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Tag is optional and may be any word (python, java, javascript, typescript, ...).
        Regex::new(r"(?s)```[\w+#.-]*[ \t]*\r?\n(.*?)```").expect("code block regex")
    })
}

/// Drops leading blank lines, trailing whitespace and carriage returns.
/// Indentation of the first code line is kept.
fn normalize_replacement(body: &str) -> String {
    let mut lines: Vec<&str> = body.trim_end().split('\n').collect();
    while lines.first().is_some_and(|line| line.trim().is_empty()) {
        lines.remove(0);
    }
    lines
        .iter()
        .map(|line| line.trim_end_matches('\r'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Body of the first fenced code block, or an empty string if there is none.
pub(crate) fn extract_code_block(response: &str) -> String {
    match code_block_pattern().captures(response) {
        Some(caps) => normalize_replacement(&caps[1]),
        None => String::new(),
    }
}

/// Replaces lines `window.start..=window.end` with `replacement`, line for range.
pub(crate) fn splice_window(lines: &[&str], window: ContextWindow, replacement: &str) -> String {
    let replacement_lines: Vec<&str> = replacement.split('\n').collect();
    let mut out: Vec<&str> =
        Vec::with_capacity(lines.len() - window.len() + replacement_lines.len());
    out.extend_from_slice(&lines[..window.start - 1]);
    out.extend_from_slice(&replacement_lines);
    out.extend_from_slice(&lines[window.end..]);
    out.join("\n")
}

/// The file under repair plus the numbered views sent to the model.
struct SourceView {
    original: String,
    window: ContextWindow,
    full_code: String,
    error_block: String,
}

impl SourceView {
    fn read(env: &dyn Environment, error: &ErrorDescriptor, logger: &Logger) -> Option<Self> {
        let original = match env.read_file(&error.file_path) {
            Ok(content) if !content.is_empty() => content,
            Ok(_) => return None,
            Err(err) => {
                logger.event("read failed", &[("file", &error.file_path), ("error", &err)]);
                return None;
            }
        };
        let lines: Vec<&str> = original.split('\n').collect();
        let window = context_window(error.line_range, lines.len());
        let full_code = number_lines(&lines, 1);
        let error_block = number_lines(&lines[window.start - 1..window.end], window.start);
        Some(Self {
            original,
            window,
            full_code,
            error_block,
        })
    }

    /// Splices `replacement` over the window and writes the file back.
    fn apply(self, env: &dyn Environment, file_path: &str, replacement: String) -> FixResult {
        let lines: Vec<&str> = self.original.split('\n').collect();
        let patched = splice_window(&lines, self.window, &replacement);
        let outcome = env.write_file(file_path, &patched);
        FixResult {
            file_path: file_path.to_string(),
            fix_type: FixType::Code,
            success: outcome.is_ok(),
            failure_reason: outcome
                .err()
                .map(|err| format!("Failed to apply fix to file: {}", err)),
            original_content: self.original,
            proposed_content: replacement,
            commands: Vec::new(),
            description: None,
        }
    }
}

fn log_fix(logger: &Logger, error: &ErrorDescriptor, result: &FixResult) {
    logger.event(
        "fix",
        &[
            ("file", &error.file_path),
            ("range", &error.line_range.to_string()),
            ("type", result.fix_type.as_str()),
            ("success", if result.success { "true" } else { "false" }),
            ("reason", result.failure_reason.as_deref().unwrap_or("")),
        ],
    );
}

/// Asks the model for a replacement of the region around `error` and writes it
/// back. Never fails: every problem becomes an unsuccessful [`FixResult`].
pub(crate) fn fix_single_error(
    env: &dyn Environment,
    client: Option<&dyn LlmClient>,
    language: Language,
    error: &ErrorDescriptor,
    logger: &Logger,
) -> FixResult {
    let result = attempt_fix(env, client, language, error, logger).unwrap_or_else(|err| {
        FixResult::failed(&error.file_path, "", "", err)
    });
    log_fix(logger, error, &result);
    result
}

fn attempt_fix(
    env: &dyn Environment,
    client: Option<&dyn LlmClient>,
    language: Language,
    error: &ErrorDescriptor,
    logger: &Logger,
) -> Result<FixResult, String> {
    let Some(view) = SourceView::read(env, error, logger) else {
        return Ok(FixResult::failed(&error.file_path, "", "", REASON_UNREADABLE));
    };

    let replacement = match client {
        Some(client) => {
            let messages = fix_messages(language, &view.full_code, &view.error_block, &error.message);
            extract_code_block(&client.query(&messages)?)
        }
        None => String::new(),
    };

    if replacement.trim().is_empty() {
        return Ok(FixResult::failed(
            &error.file_path,
            &view.original,
            &replacement,
            REASON_EMPTY_FIX,
        ));
    }
    Ok(view.apply(env, &error.file_path, replacement))
}

/// A JSON fix answer: replace the error block, run commands, or give up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "fix_type", rename_all = "lowercase")]
pub(crate) enum TypedFix {
    Code {
        #[serde(default)]
        fixed_code: Option<String>,
    },
    Command {
        #[serde(default)]
        commands: Option<Vec<String>>,
        #[serde(default)]
        description: Option<String>,
    },
    Unfixable {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Parses a typed fix answer, tolerating a ```` ```json ```` fence.
pub(crate) fn parse_typed_fix(response: &str) -> Result<TypedFix, String> {
    let mut deserializer = serde_json::Deserializer::from_str(strip_json_fence(response));
    serde_path_to_error::deserialize(&mut deserializer)
        .map_err(|err| format!("invalid fix answer at {}: {}", err.path(), err.inner()))
}

/// Like [`fix_single_error`], but the model chooses between a code patch, shell
/// commands run in the environment, or declaring the error unfixable.
pub(crate) fn fix_single_error_typed(
    env: &dyn Environment,
    client: Option<&dyn LlmClient>,
    language: Language,
    error: &ErrorDescriptor,
    logger: &Logger,
) -> FixResult {
    let result = attempt_typed_fix(env, client, language, error, logger)
        .unwrap_or_else(|err| FixResult::failed(&error.file_path, "", "", err));
    log_fix(logger, error, &result);
    result
}

fn attempt_typed_fix(
    env: &dyn Environment,
    client: Option<&dyn LlmClient>,
    language: Language,
    error: &ErrorDescriptor,
    logger: &Logger,
) -> Result<FixResult, String> {
    let Some(view) = SourceView::read(env, error, logger) else {
        return Ok(FixResult::failed(&error.file_path, "", "", REASON_UNREADABLE));
    };
    let Some(client) = client else {
        return Ok(FixResult::failed(&error.file_path, &view.original, "", REASON_NO_CLIENT));
    };

    let messages =
        typed_fix_messages(language, &view.full_code, &view.error_block, &error.message);
    let answer = match parse_typed_fix(&client.query(&messages)?) {
        Ok(answer) => answer,
        Err(err) => return Ok(FixResult::failed(&error.file_path, &view.original, "", err)),
    };

    match answer {
        TypedFix::Code { fixed_code } => {
            let replacement = normalize_replacement(fixed_code.as_deref().unwrap_or(""));
            if replacement.trim().is_empty() {
                return Ok(FixResult::failed(
                    &error.file_path,
                    &view.original,
                    "",
                    REASON_EMPTY_FIX,
                ));
            }
            Ok(view.apply(env, &error.file_path, replacement))
        }
        TypedFix::Command {
            commands,
            description,
        } => {
            let commands: Vec<String> = commands
                .unwrap_or_default()
                .into_iter()
                .filter(|command| !command.trim().is_empty())
                .collect();
            if commands.is_empty() {
                return Ok(FixResult::failed(
                    &error.file_path,
                    &view.original,
                    "",
                    REASON_NO_COMMANDS,
                ));
            }
            let outcome = run_fix_commands(env, &commands, logger);
            Ok(FixResult {
                file_path: error.file_path.clone(),
                fix_type: FixType::Command,
                original_content: view.original,
                proposed_content: String::new(),
                success: outcome.is_ok(),
                failure_reason: outcome
                    .err()
                    .map(|err| format!("Failed to execute commands: {}", err)),
                commands,
                description: description.filter(|text| !text.trim().is_empty()),
            })
        }
        TypedFix::Unfixable { reason } => {
            let reason = reason
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| REASON_UNFIXABLE.to_string());
            Ok(FixResult::failed(&error.file_path, &view.original, "", reason))
        }
    }
}

/// Runs commands in order and stops at the first one that fails.
fn run_fix_commands(
    env: &dyn Environment,
    commands: &[String],
    logger: &Logger,
) -> Result<(), String> {
    for command in commands {
        let result = env.run_command(command).map_err(|err| {
            logger.event("fix command", &[("command", command), ("error", &err)]);
            format!("{}: {}", command, err)
        })?;
        logger.event(
            "fix command",
            &[
                ("command", command),
                ("exit", &result.exit_code.to_string()),
            ],
        );
        if !result.success() {
            let detail = result.error_output().trim();
            return Err(if detail.is_empty() {
                format!("{} exited with {}", command, result.exit_code)
            } else {
                format!("{} exited with {}: {}", command, result.exit_code, detail)
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_pads_one_line_each_side() {
        let window = context_window(LineRange::new(4, 4), 10);
        assert_eq!(window, ContextWindow { start: 3, end: 5 });
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn window_clamps_to_file_bounds() {
        assert_eq!(
            context_window(LineRange::new(1, 1), 10),
            ContextWindow { start: 1, end: 2 }
        );
        assert_eq!(
            context_window(LineRange::new(10, 10), 10),
            ContextWindow { start: 9, end: 10 }
        );
        assert_eq!(
            context_window(LineRange::new(-3, 40), 10),
            ContextWindow { start: 1, end: 10 }
        );
        assert_eq!(
            context_window(LineRange::new(5, 2), 10),
            ContextWindow { start: 4, end: 6 }
        );
        assert_eq!(
            context_window(LineRange::new(3, 3), 1),
            ContextWindow { start: 1, end: 1 }
        );
    }

    #[test]
    fn window_always_contains_reported_range() {
        for line_count in 1..=12usize {
            for start in 1..=line_count as i64 {
                for end in start..=line_count as i64 {
                    let window = context_window(LineRange::new(start, end), line_count);
                    assert!(window.start >= 1);
                    assert!(window.end <= line_count);
                    assert!(window.start as i64 <= start);
                    assert!(window.end as i64 >= end);
                }
            }
        }
    }

    #[test]
    fn numbering_is_zero_padded_from_offset() {
        assert_eq!(
            number_lines(&["a", "", "c"], 9),
            "0009: a\n0010: \n0011: c"
        );
    }

    #[test]
    fn extracts_block_with_known_unknown_or_missing_tag() {
        let response = "Here is the fix:\n```python\nx = 1\nprint(x)\n```\nDone.";
        assert_eq!(extract_code_block(response), "x = 1\nprint(x)");

        let response = "```kotlin\nval x = 1\n```";
        assert_eq!(extract_code_block(response), "val x = 1");

        let response = "```\n    return y\n```";
        assert_eq!(extract_code_block(response), "    return y");

        assert_eq!(extract_code_block("no code here"), "");
        assert_eq!(extract_code_block("```python\n\n```"), "");
    }

    #[test]
    fn first_block_wins() {
        let response = "```java\nint a = 1;\n```\nor\n```java\nint a = 2;\n```";
        assert_eq!(extract_code_block(response), "int a = 1;");
    }

    #[test]
    fn splice_replaces_window_only() {
        let lines = vec!["1", "2", "3", "4", "5"];
        let window = ContextWindow { start: 2, end: 4 };
        assert_eq!(splice_window(&lines, window, "x"), "1\nx\n5");
        assert_eq!(splice_window(&lines, window, "x\ny\nz\nw"), "1\nx\ny\nz\nw\n5");
        let window = ContextWindow { start: 1, end: 5 };
        assert_eq!(splice_window(&lines, window, "only"), "only");
    }

    #[test]
    fn typed_answers_parse_by_fix_type() {
        assert_eq!(
            parse_typed_fix("```json\n{\"fix_type\": \"code\", \"fixed_code\": \"x = 1\", \"language\": \"python\"}\n```"),
            Ok(TypedFix::Code {
                fixed_code: Some("x = 1".to_string())
            })
        );
        assert_eq!(
            parse_typed_fix(r#"{"fix_type": "command", "commands": ["pip install requests"]}"#),
            Ok(TypedFix::Command {
                commands: Some(vec!["pip install requests".to_string()]),
                description: None,
            })
        );
        assert_eq!(
            parse_typed_fix(r#"{"fix_type": "unfixable"}"#),
            Ok(TypedFix::Unfixable { reason: None })
        );
    }

    #[test]
    fn typed_answer_without_known_fix_type_is_rejected() {
        assert!(parse_typed_fix(r#"{"fix_type": "reboot"}"#).is_err());
        assert!(parse_typed_fix(r#"{"fixed_code": "x = 1"}"#).is_err());
        assert!(parse_typed_fix("I would change line 3.").is_err());
    }

    #[test]
    fn replacement_normalization_matches_block_extraction() {
        assert_eq!(normalize_replacement("\n\n    return y\r\n  \n"), "    return y");
    }
}
