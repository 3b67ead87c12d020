use serde::Serialize;
use std::process::ExitCode;

use crate::coverage::{CoverageCollector, CoverageReport};
use crate::diagnosis::{diagnose, ErrorDescriptor};
use crate::environment::Environment;
use crate::llm::LlmClient;
use crate::logger::Logger;
use crate::patch::{fix_single_error, fix_single_error_typed, FixResult, FixType};
use crate::types::{FixMode, Language, MaxIterations};

#[derive(Debug)]
pub(crate) struct Quit {
    pub(crate) code: i32,
    #[allow(dead_code)]
    pub(crate) reason: String,
}

impl Quit {
    pub(crate) fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code as u8)
    }
}

pub(crate) fn quit(logger: &Logger, reason: &str, code: i32) -> Quit {
    let logged = if reason.trim().is_empty() {
        "unknown"
    } else {
        reason
    };
    logger.event("quit", &[("reason", logged)]);
    Quit {
        code,
        reason: reason.to_string(),
    }
}

/// Immutable settings for one repair run.
#[derive(Debug, Clone)]
pub(crate) struct FixerConfig {
    pub(crate) language: Language,
    pub(crate) test_command: String,
    pub(crate) max_fix_iterations: MaxIterations,
    pub(crate) fix_mode: FixMode,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct IterationReport {
    pub(crate) iteration: u32,
    pub(crate) coverage: CoverageReport,
    pub(crate) errors_attempted: usize,
    pub(crate) errors_fixed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RepairOutcome {
    pub(crate) fix_results: Vec<FixResult>,
    pub(crate) final_coverage: CoverageReport,
    pub(crate) iterations: Vec<IterationReport>,
}

impl RepairOutcome {
    pub(crate) fn successful_fixes(&self) -> usize {
        self.fix_results.iter().filter(|fix| fix.success).count()
    }

    /// Successful fixes of `fix_type`, or every attempt for `FixType::Unfixable`.
    pub(crate) fn count_of(&self, fix_type: FixType) -> usize {
        self.fix_results
            .iter()
            .filter(|fix| fix.fix_type == fix_type)
            .filter(|fix| fix.success || fix_type == FixType::Unfixable)
            .count()
    }
}

/// Drives test run -> diagnosis -> patch -> coverage rounds until nothing is
/// left to diagnose, no patch lands, or the round cap is hit.
pub(crate) struct ErrorFixer<'a> {
    config: FixerConfig,
    env: &'a dyn Environment,
    coverage: &'a dyn CoverageCollector,
    llm: Option<&'a dyn LlmClient>,
    logger: &'a Logger,
}

impl<'a> ErrorFixer<'a> {
    pub(crate) fn new(
        config: FixerConfig,
        env: &'a dyn Environment,
        coverage: &'a dyn CoverageCollector,
        llm: Option<&'a dyn LlmClient>,
        logger: &'a Logger,
    ) -> Self {
        Self {
            config,
            env,
            coverage,
            llm,
            logger,
        }
    }

    pub(crate) fn run(&self) -> RepairOutcome {
        println!(
            "Starting error fixing for {} project...",
            self.config.language
        );
        let max = self.config.max_fix_iterations.get();
        let mut fix_results = Vec::new();
        let mut iterations: Vec<IterationReport> = Vec::new();

        for iteration in 1..=max {
            println!("\n=== Fix Iteration {}/{} ===", iteration, max);
            self.logger.event(
                "round start",
                &[
                    ("iteration", &iteration.to_string()),
                    ("max", &max.to_string()),
                ],
            );

            println!("Step 1: Running tests to collect errors...");
            let error_output = self.collect_error_output();
            if error_output.trim().is_empty() {
                println!("No errors found in this iteration.");
                self.logger.event("round stop", &[("reason", "no_output")]);
                break;
            }

            println!("Step 2: Analyzing errors...");
            let errors = diagnose(self.llm, &error_output, self.logger);
            if errors.is_empty() {
                println!("No parseable errors found.");
                self.logger.event("round stop", &[("reason", "no_errors")]);
                break;
            }
            println!("Found {} errors to fix", errors.len());

            println!("Step 3: Fixing errors...");
            let round_fixes = self.fix_all(&errors);
            let fixed = round_fixes.iter().filter(|fix| fix.success).count();
            fix_results.extend(round_fixes);
            if fixed == 0 {
                println!("No successful fixes in this iteration.");
                self.logger.event("round stop", &[("reason", "no_progress")]);
                break;
            }
            println!("Successfully fixed {} errors in this iteration.", fixed);

            println!("Step 4: Collecting coverage after iteration {}...", iteration);
            let coverage = self.coverage.collect();
            iterations.push(IterationReport {
                iteration,
                coverage,
                errors_attempted: errors.len(),
                errors_fixed: fixed,
            });
        }

        let final_coverage = match iterations.last() {
            Some(last) => last.coverage.clone(),
            None => {
                println!("\nCollecting final coverage...");
                self.coverage.collect()
            }
        };

        RepairOutcome {
            fix_results,
            final_coverage,
            iterations,
        }
    }

    /// Error stream of the test command, falling back to stdout. Failing to
    /// run the command counts as no output.
    fn collect_error_output(&self) -> String {
        match self.env.run_command(&self.config.test_command) {
            Ok(result) => result.error_output().to_string(),
            Err(err) => {
                eprintln!("Error running test command: {}", err);
                self.logger.event("test run failed", &[("error", &err)]);
                String::new()
            }
        }
    }

    fn fix_all(&self, errors: &[ErrorDescriptor]) -> Vec<FixResult> {
        let mut results = Vec::with_capacity(errors.len());
        for (index, error) in errors.iter().enumerate() {
            println!(
                "  Fixing error {}/{}: {}:{}",
                index + 1,
                errors.len(),
                error.file_path,
                error.line_range
            );
            let result = match self.config.fix_mode {
                FixMode::CodeBlock => {
                    fix_single_error(self.env, self.llm, self.config.language, error, self.logger)
                }
                FixMode::Typed => fix_single_error_typed(
                    self.env,
                    self.llm,
                    self.config.language,
                    error,
                    self.logger,
                ),
            };
            if result.success && result.fix_type == FixType::Command {
                println!("    ✓ Successfully executed commands for {}", error.file_path);
                println!("      Commands: {}", result.commands.join(", "));
            } else if result.success {
                println!("    ✓ Successfully fixed error in {}", error.file_path);
            } else {
                println!(
                    "    ✗ Failed to fix error: {}",
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
            results.push(result);
        }
        results
    }
}
