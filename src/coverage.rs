use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::environment::Environment;
use crate::logger::Logger;
use crate::types::Language;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct CoverageReport {
    pub(crate) language: Language,
    pub(crate) coverage_percentage: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub(crate) tests_output: String,
}

impl CoverageReport {
    pub(crate) fn empty(language: Language) -> Self {
        Self {
            language,
            coverage_percentage: 0.0,
            tests_output: String::new(),
        }
    }
}

pub(crate) trait CoverageCollector {
    /// Current coverage of the project. Collection problems yield a 0% report.
    fn collect(&self) -> CoverageReport;
}

#[derive(Debug, Deserialize)]
struct EvalReport {
    #[serde(rename = "coverage_LINE", default)]
    coverage_line: Option<f64>,
    #[serde(default)]
    tests_output: Option<String>,
}

/// Runs the image's coverage evaluation script and reads the JSON report it leaves behind.
pub(crate) struct EvalScriptCollector<'a> {
    env: &'a dyn Environment,
    language: Language,
    command: String,
    report_path: String,
    output_dir: PathBuf,
    logger: &'a Logger,
}

impl<'a> EvalScriptCollector<'a> {
    pub(crate) fn new(
        env: &'a dyn Environment,
        language: Language,
        command: String,
        report_path: String,
        output_dir: PathBuf,
        logger: &'a Logger,
    ) -> Self {
        Self {
            env,
            language,
            command,
            report_path,
            output_dir,
            logger,
        }
    }

    fn try_collect(&self) -> Result<CoverageReport, String> {
        let run = self.env.run_command(&self.command)?;
        if !run.success() {
            // The script may still have produced a report; keep going.
            eprintln!(
                "Coverage command exited with {}: {}",
                run.exit_code,
                run.stderr.trim()
            );
        }

        let raw = self.env.read_file(&self.report_path)?;
        self.save_raw_report(&raw);
        let report: EvalReport = serde_json::from_str(&raw)
            .map_err(|err| format!("Failed to parse {}: {}", self.report_path, err))?;
        Ok(CoverageReport {
            language: self.language,
            coverage_percentage: report.coverage_line.unwrap_or(0.0),
            tests_output: report.tests_output.unwrap_or_default(),
        })
    }

    fn save_raw_report(&self, raw: &str) {
        let target = self.output_dir.join("coverage.json");
        if let Err(err) = fs::create_dir_all(&self.output_dir).and_then(|_| fs::write(&target, raw))
        {
            eprintln!(
                "Warning: failed to save coverage report to {}: {}",
                target.display(),
                err
            );
        }
    }
}

impl CoverageCollector for EvalScriptCollector<'_> {
    fn collect(&self) -> CoverageReport {
        match self.try_collect() {
            Ok(report) => {
                self.logger.event(
                    "coverage",
                    &[("percent", &format!("{:.2}", report.coverage_percentage))],
                );
                report
            }
            Err(err) => {
                eprintln!("Error collecting coverage: {}", err);
                self.logger.event("coverage failed", &[("error", &err)]);
                CoverageReport::empty(self.language)
            }
        }
    }
}
