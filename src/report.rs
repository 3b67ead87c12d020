use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::coverage::CoverageReport;
use crate::patch::{FixResult, FixType};
use crate::run_loop::{IterationReport, RepairOutcome};
use crate::types::Language;

pub(crate) const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Serialize)]
struct SummaryDocument<'a> {
    language: Language,
    container: &'a str,
    total_fix_attempts: usize,
    successful_fixes: usize,
    code_fixes: usize,
    command_fixes: usize,
    unfixable: usize,
    final_coverage: &'a CoverageReport,
    iterations: &'a [IterationReport],
    fix_results: &'a [FixResult],
}

/// Console lines for the end of a run.
pub(crate) fn render_summary(outcome: &RepairOutcome) -> String {
    let mut out = String::new();
    out.push_str("\n=== Error Fixing Summary ===\n");
    out.push_str(&format!(
        "Total fix attempts: {}\n",
        outcome.fix_results.len()
    ));
    out.push_str(&format!(
        "Successful fixes: {}\n",
        outcome.successful_fixes()
    ));
    out.push_str(&format!(
        "Code fixes: {}\nCommand fixes: {}\nUnfixable errors: {}\n",
        outcome.count_of(FixType::Code),
        outcome.count_of(FixType::Command),
        outcome.count_of(FixType::Unfixable)
    ));
    out.push_str(&format!(
        "Final coverage: {:.2}%\n",
        outcome.final_coverage.coverage_percentage
    ));
    if !outcome.fix_results.is_empty() {
        out.push_str("\nFix details:\n");
        for fix in &outcome.fix_results {
            if fix.success {
                out.push_str(&format!("  ✓ [{}] {}\n", fix.fix_type, fix.file_path));
            } else {
                out.push_str(&format!(
                    "  ✗ [{}] {}: {}\n",
                    fix.fix_type,
                    fix.file_path,
                    fix.failure_reason.as_deref().unwrap_or("unknown")
                ));
            }
            if !fix.commands.is_empty() {
                out.push_str(&format!("      Commands: {}\n", fix.commands.join(", ")));
            }
        }
    }
    out
}

pub(crate) fn print_summary(outcome: &RepairOutcome) {
    print!("{}", render_summary(outcome));
}

/// Writes `summary.json` into `output_dir` through a temp file in the same
/// directory so a partially written summary never replaces a complete one.
pub(crate) fn write_summary(
    output_dir: &Path,
    language: Language,
    container: &str,
    outcome: &RepairOutcome,
) -> Result<PathBuf, String> {
    fs::create_dir_all(output_dir).map_err(|err| {
        format!(
            "failed to create output directory {}: {err}",
            output_dir.display()
        )
    })?;
    let document = SummaryDocument {
        language,
        container,
        total_fix_attempts: outcome.fix_results.len(),
        successful_fixes: outcome.successful_fixes(),
        code_fixes: outcome.count_of(FixType::Code),
        command_fixes: outcome.count_of(FixType::Command),
        unfixable: outcome.count_of(FixType::Unfixable),
        final_coverage: &outcome.final_coverage,
        iterations: &outcome.iterations,
        fix_results: &outcome.fix_results,
    };

    let mut file = NamedTempFile::new_in(output_dir)
        .map_err(|err| format!("failed to create summary file: {err}"))?;
    serde_json::to_writer_pretty(&mut file, &document)
        .map_err(|err| format!("failed to serialize summary: {err}"))?;
    file.write_all(b"\n")
        .map_err(|err| format!("failed to finalize summary file: {err}"))?;

    let target = output_dir.join(SUMMARY_FILE);
    file.persist(&target)
        .map_err(|err| format!("failed to save {}: {}", target.display(), err.error))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn outcome() -> RepairOutcome {
        let coverage = CoverageReport {
            language: Language::Python,
            coverage_percentage: 61.257,
            tests_output: String::new(),
        };
        RepairOutcome {
            fix_results: vec![
                FixResult {
                    file_path: "tests/test_a.py".to_string(),
                    fix_type: FixType::Code,
                    original_content: "a\n".to_string(),
                    proposed_content: "b".to_string(),
                    success: true,
                    failure_reason: None,
                    commands: Vec::new(),
                    description: None,
                },
                FixResult {
                    file_path: "tests/test_b.py".to_string(),
                    fix_type: FixType::Unfixable,
                    original_content: String::new(),
                    proposed_content: String::new(),
                    success: false,
                    failure_reason: Some("Could not read file".to_string()),
                    commands: Vec::new(),
                    description: None,
                },
                FixResult {
                    file_path: "tests/test_c.py".to_string(),
                    fix_type: FixType::Command,
                    original_content: "import requests\n".to_string(),
                    proposed_content: String::new(),
                    success: true,
                    failure_reason: None,
                    commands: vec!["pip install requests".to_string()],
                    description: Some("install requests".to_string()),
                },
            ],
            final_coverage: coverage.clone(),
            iterations: vec![IterationReport {
                iteration: 1,
                coverage,
                errors_attempted: 3,
                errors_fixed: 2,
            }],
        }
    }

    #[test]
    fn summary_lists_counts_and_each_fix() {
        let text = render_summary(&outcome());
        assert!(text.contains("Total fix attempts: 3"), "got: {text}");
        assert!(text.contains("Successful fixes: 2"), "got: {text}");
        assert!(text.contains("Code fixes: 1"), "got: {text}");
        assert!(text.contains("Command fixes: 1"), "got: {text}");
        assert!(text.contains("Unfixable errors: 1"), "got: {text}");
        assert!(text.contains("Final coverage: 61.26%"), "got: {text}");
        assert!(text.contains("✓ [code] tests/test_a.py"), "got: {text}");
        assert!(
            text.contains("✗ [unfixable] tests/test_b.py: Could not read file"),
            "got: {text}"
        );
        assert!(
            text.contains("✓ [command] tests/test_c.py\n      Commands: pip install requests"),
            "got: {text}"
        );
    }

    #[test]
    fn summary_without_fixes_has_no_detail_section() {
        let outcome = RepairOutcome {
            fix_results: Vec::new(),
            final_coverage: CoverageReport::empty(Language::Java),
            iterations: Vec::new(),
        };
        let text = render_summary(&outcome);
        assert!(text.contains("Final coverage: 0.00%"));
        assert!(!text.contains("Fix details"));
    }

    #[test]
    fn summary_json_is_written_into_output_dir() {
        let dir = TempDir::new().expect("tempdir");
        let nested = dir.path().join("out");
        let path =
            write_summary(&nested, Language::Python, "proj-1", &outcome()).expect("write summary");
        assert_eq!(path, nested.join(SUMMARY_FILE));

        let raw = fs::read_to_string(&path).expect("read summary");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("summary json");
        assert_eq!(value["language"], "python");
        assert_eq!(value["container"], "proj-1");
        assert_eq!(value["successful_fixes"], 2);
        assert_eq!(value["code_fixes"], 1);
        assert_eq!(value["command_fixes"], 1);
        assert_eq!(value["unfixable"], 1);
        assert_eq!(value["iterations"][0]["errors_fixed"], 2);
        assert_eq!(
            value["fix_results"][1]["failure_reason"],
            "Could not read file"
        );
        assert!(value["fix_results"][0].get("failure_reason").is_none());
        assert!(value["fix_results"][0].get("commands").is_none());
        assert_eq!(value["fix_results"][1]["fix_type"], "unfixable");
        assert_eq!(value["fix_results"][2]["fix_type"], "command");
        assert_eq!(value["fix_results"][2]["commands"][0], "pip install requests");
        assert_eq!(value["fix_results"][2]["description"], "install requests");
    }
}
