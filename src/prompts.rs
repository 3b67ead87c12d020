use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::llm::ChatMessage;
use crate::types::Language;

const DIAGNOSE_SYSTEM: &str = include_str!("../prompts/diagnose_system.md");
const DIAGNOSE_USER: &str = include_str!("../prompts/diagnose_user.md");
const FIX_SYSTEM: &str = include_str!("../prompts/fix_system.md");
const FIX_USER: &str = include_str!("../prompts/fix_user.md");
const FIX_TYPED_SYSTEM: &str = include_str!("../prompts/fix_typed_system.md");
const FIX_TYPED_USER: &str = include_str!("../prompts/fix_typed_user.md");

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([A-Z_]+)\}").expect("placeholder regex"))
}

/// Single-pass substitution of `{NAME}` placeholders. Values are inserted
/// verbatim, so braces inside them (code, logs) are never re-expanded.
pub(crate) fn render(template: &str, values: &[(&str, &str)]) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub(crate) fn diagnosis_messages(error_log: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(DIAGNOSE_SYSTEM.trim()),
        ChatMessage::user(render(DIAGNOSE_USER, &[("ERROR_LOG", error_log)])),
    ]
}

fn fix_prompt(
    system: &str,
    user: &str,
    language: Language,
    full_code: &str,
    error_block: &str,
    error_message: &str,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system.trim()),
        ChatMessage::user(render(
            user,
            &[
                ("LANGUAGE", language.as_str()),
                ("FULL_CODE", full_code),
                ("ERROR_BLOCK", error_block),
                ("ERROR_MESSAGE", error_message),
            ],
        )),
    ]
}

pub(crate) fn fix_messages(
    language: Language,
    full_code: &str,
    error_block: &str,
    error_message: &str,
) -> Vec<ChatMessage> {
    fix_prompt(FIX_SYSTEM, FIX_USER, language, full_code, error_block, error_message)
}

/// Same context as [`fix_messages`], asking for a JSON code, command or unfixable answer.
pub(crate) fn typed_fix_messages(
    language: Language,
    full_code: &str,
    error_block: &str,
    error_message: &str,
) -> Vec<ChatMessage> {
    fix_prompt(
        FIX_TYPED_SYSTEM,
        FIX_TYPED_USER,
        language,
        full_code,
        error_block,
        error_message,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_does_not_expand_placeholders_inside_values() {
        let out = render(
            "a={A} b={B} c={C}",
            &[("A", "{B}"), ("B", "x")],
        );
        assert_eq!(out, "a={B} b=x c={C}");
    }

    #[test]
    fn fix_prompt_carries_language_code_and_message() {
        let messages = fix_messages(
            Language::Java,
            "0001: class A {}",
            "0001: class A {}",
            "cannot find symbol",
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert!(messages[1].content.contains("```java\n0001: class A {}"));
        assert!(messages[1].content.contains("cannot find symbol"));
        assert!(!messages[1].content.contains("{FULL_CODE}"));
    }

    #[test]
    fn typed_fix_prompt_asks_for_fix_type() {
        let messages = typed_fix_messages(
            Language::Python,
            "0001: import requests",
            "0001: import requests",
            "ModuleNotFoundError: No module named 'requests'",
        );
        assert!(messages[0].content.contains("\"fix_type\": \"command\""));
        assert!(messages[1].content.contains("```python\n0001: import requests"));
        assert!(messages[1].content.contains("No module named 'requests'"));
    }

    #[test]
    fn diagnosis_prompt_embeds_log() {
        let messages = diagnosis_messages("E   NameError: name 'x' is not defined");
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("\"errors\""));
        assert!(messages[1]
            .content
            .contains("E   NameError: name 'x' is not defined"));
    }
}
