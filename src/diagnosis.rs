use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::llm::LlmClient;
use crate::logger::{preview, Logger};
use crate::prompts::diagnosis_messages;
use crate::types::LineRange;

/// One diagnosed problem, as reported by the model. Consumed once by the patch step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ErrorDescriptor {
    #[serde(default, deserialize_with = "string_or_default")]
    pub(crate) file_path: String,
    #[serde(rename = "range", default, deserialize_with = "range_or_default")]
    pub(crate) line_range: LineRange,
    #[serde(default, deserialize_with = "string_or_default")]
    pub(crate) message: String,
}

fn string_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn range_or_default<'de, D>(deserializer: D) -> Result<LineRange, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<LineRange>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct DiagnosisDocument {
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

/// Descriptors decoded from one model answer. Entries that could not be
/// decoded are listed in `rejected` and do not affect their siblings.
#[derive(Debug, Default)]
pub(crate) struct ParsedDiagnosis {
    pub(crate) errors: Vec<ErrorDescriptor>,
    pub(crate) rejected: Vec<String>,
}

/// Drops an optional ```` ```json ```` fence around a model answer.
pub(crate) fn strip_json_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parses the model's answer into descriptors, keeping the model's order.
/// Only a document that is not `{"errors": [...]}` is an error.
pub(crate) fn parse_diagnosis(response: &str) -> Result<ParsedDiagnosis, String> {
    let body = strip_json_fence(response);
    let mut deserializer = serde_json::Deserializer::from_str(body);
    let document: DiagnosisDocument = serde_path_to_error::deserialize(&mut deserializer)
        .map_err(|err| format!("invalid diagnosis at {}: {}", err.path(), err.inner()))?;

    let mut parsed = ParsedDiagnosis::default();
    for (index, entry) in document.errors.unwrap_or_default().into_iter().enumerate() {
        let decoded: Result<ErrorDescriptor, _> = serde_path_to_error::deserialize(entry);
        match decoded {
            Ok(descriptor) => parsed.errors.push(descriptor),
            Err(err) => {
                let path = err.path().to_string();
                let location = if path == "." {
                    format!("errors[{index}]")
                } else {
                    format!("errors[{index}].{path}")
                };
                parsed.rejected.push(format!("{}: {}", location, err.inner()));
            }
        }
    }
    Ok(parsed)
}

/// Turns raw test output into error descriptors. Every failure (no client,
/// transport error, malformed answer) yields an empty list.
pub(crate) fn diagnose(
    client: Option<&dyn LlmClient>,
    error_log: &str,
    logger: &Logger,
) -> Vec<ErrorDescriptor> {
    let Some(client) = client else {
        eprintln!("No model configured; skipping error analysis.");
        logger.event("diagnosis skipped", &[("reason", "no_client")]);
        return Vec::new();
    };

    let response = match client.query(&diagnosis_messages(error_log)) {
        Ok(response) => response,
        Err(err) => {
            eprintln!("Error analysing test output: {}", err);
            logger.event("diagnosis failed", &[("error", &err)]);
            return Vec::new();
        }
    };

    match parse_diagnosis(&response) {
        Ok(parsed) => {
            for rejected in &parsed.rejected {
                eprintln!("Skipping malformed error entry {}", rejected);
                logger.event("diagnosis entry skipped", &[("error", rejected)]);
            }
            logger.event(
                "diagnosis",
                &[
                    ("errors", &parsed.errors.len().to_string()),
                    ("skipped", &parsed.rejected.len().to_string()),
                ],
            );
            parsed.errors
        }
        Err(err) => {
            eprintln!("Error analysing test output: {}", err);
            logger.event(
                "diagnosis failed",
                &[("error", &err), ("response", &preview(&response, 300))],
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(response: &str) -> Vec<ErrorDescriptor> {
        let parsed = parse_diagnosis(response).expect("parse");
        assert!(parsed.rejected.is_empty(), "rejected: {:?}", parsed.rejected);
        parsed.errors
    }

    #[test]
    fn missing_fields_take_defaults() {
        let errors = parse_ok(r#"{"errors": [{"file_path": "a.py"}, {"range": null}]}"#);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].file_path, "a.py");
        assert_eq!(errors[0].line_range, LineRange::new(1, 1));
        assert_eq!(errors[0].message, "");
        assert_eq!(errors[1].file_path, "");
        assert_eq!(errors[1].line_range, LineRange::new(1, 1));
    }

    #[test]
    fn null_strings_take_defaults() {
        let errors = parse_ok(
            r#"{"errors": [
                {"file_path": "a.py", "range": [3, 4], "message": "m"},
                {"file_path": "b.py", "message": null},
                {"file_path": null, "range": [1.0, 2.0], "message": "float range"}
            ]}"#,
        );
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].line_range, LineRange::new(3, 4));
        assert_eq!(errors[1].file_path, "b.py");
        assert_eq!(errors[1].message, "");
        assert_eq!(errors[2].file_path, "");
        assert_eq!(errors[2].line_range, LineRange::new(1, 2));
    }

    #[test]
    fn duplicates_and_order_pass_through() {
        let response = r#"{"errors": [
            {"file_path": "b.py", "range": [9, 10], "message": "second"},
            {"file_path": "a.py", "range": [2, 2], "message": "first"},
            {"file_path": "a.py", "range": [2, 2], "message": "first"}
        ]}"#;
        let errors = parse_ok(response);
        let files: Vec<&str> = errors.iter().map(|e| e.file_path.as_str()).collect();
        assert_eq!(files, vec!["b.py", "a.py", "a.py"]);
        assert_eq!(errors[0].line_range, LineRange::new(9, 10));
    }

    #[test]
    fn fenced_json_is_accepted() {
        let response = "```json\n{\"errors\": [{\"file_path\": \"t.py\", \"range\": [3, 4], \"message\": \"m\"}]}\n```";
        let errors = parse_ok(response);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line_range, LineRange::new(3, 4));
    }

    #[test]
    fn malformed_entry_is_skipped_and_siblings_survive() {
        let parsed = parse_diagnosis(
            r#"{"errors": [
                {"file_path": "a.py", "range": [3, 4], "message": "m"},
                {"file_path": "b.py", "range": "ten"},
                "not an object",
                {"file_path": "c.py", "range": [5], "message": "n"}
            ]}"#,
        )
        .expect("document parses");
        let files: Vec<&str> = parsed.errors.iter().map(|e| e.file_path.as_str()).collect();
        assert_eq!(files, vec!["a.py", "c.py"]);
        assert_eq!(parsed.rejected.len(), 2);
        assert!(parsed.rejected[0].starts_with("errors[1]."), "got: {:?}", parsed.rejected);
        assert!(parsed.rejected[0].contains("range"), "got: {:?}", parsed.rejected);
        assert!(parsed.rejected[1].starts_with("errors[2]"), "got: {:?}", parsed.rejected);
    }

    #[test]
    fn non_document_answers_are_errors() {
        assert!(parse_diagnosis("I could not find any errors.").is_err());
        let err = parse_diagnosis(r#"{"errors": "none"}"#).expect_err("errors must be a list");
        assert!(err.contains("errors"), "got: {err}");
        assert!(parse_ok(r#"{"errors": null}"#).is_empty());
    }

    #[test]
    fn absent_client_yields_nothing() {
        let logger = Logger::disabled();
        assert!(diagnose(None, "Traceback ...", &logger).is_empty());
    }
}
