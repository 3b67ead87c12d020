use clap::ValueEnum;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::num::NonZeroU32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Language {
    Python,
    Java,
}

impl Language {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Java => "java",
        }
    }

    /// Coverage-instrumented test invocation used when the config leaves `test_command` unset.
    pub(crate) fn default_test_command(self) -> &'static str {
        match self {
            Self::Python => concat!(
                "coverage run --source='.' ",
                "--omit='**/tests/**,**/test_*.py,**/*_test.py,**/__init__.py,",
                "**/.venv/**,**/.tox/**,**/.pytest_cache/**' ",
                "-m pytest --continue-on-collection-errors"
            ),
            Self::Java => "mvn -B -q test jacoco:report",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the model is asked to repair a diagnosed error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum FixMode {
    /// Replacement lines in a fenced code block.
    #[default]
    CodeBlock,
    /// A JSON answer that is a code replacement, shell commands to run, or a refusal.
    Typed,
}

impl FixMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::CodeBlock => "code-block",
            Self::Typed => "typed",
        }
    }
}

impl fmt::Display for FixMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct MaxIterations(NonZeroU32);

impl MaxIterations {
    pub(crate) const DEFAULT: u32 = 3;

    pub(crate) fn new(value: u32) -> Result<Self, String> {
        let Some(value) = NonZeroU32::new(value) else {
            return Err("must be a positive integer (got 0)".to_string());
        };
        Ok(Self(value))
    }

    pub(crate) fn get(self) -> u32 {
        self.0.get()
    }
}

impl Default for MaxIterations {
    fn default() -> Self {
        Self(NonZeroU32::MIN.saturating_add(Self::DEFAULT - 1))
    }
}

impl<'de> Deserialize<'de> for MaxIterations {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u32::deserialize(deserializer)?;
        MaxIterations::new(value).map_err(D::Error::custom)
    }
}

impl fmt::Display for MaxIterations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// 1-based inclusive line range as reported by the model. Values are not
/// validated against any file; the patch step clamps them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "[i64; 2]")]
pub(crate) struct LineRange {
    pub(crate) start: i64,
    pub(crate) end: i64,
}

impl LineRange {
    pub(crate) fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

impl Default for LineRange {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

fn whole_line(value: f64) -> Result<i64, String> {
    if value.is_finite() && value.fract() == 0.0 {
        Ok(value as i64)
    } else {
        Err(format!("line number must be a whole number (got {value})"))
    }
}

// Models sometimes emit `[3.0, 4.0]`; whole floats are accepted as line numbers.
impl TryFrom<Vec<f64>> for LineRange {
    type Error = String;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        match value.as_slice() {
            [] => Ok(Self::default()),
            [line] => {
                let line = whole_line(*line)?;
                Ok(Self::new(line, line))
            }
            [start, end, ..] => Ok(Self::new(whole_line(*start)?, whole_line(*end)?)),
        }
    }
}

impl From<LineRange> for [i64; 2] {
    fn from(value: LineRange) -> Self {
        [value.start, value.end]
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_iterations_rejects_zero() {
        let err = MaxIterations::new(0).expect_err("zero should be rejected");
        assert!(err.contains("positive"), "got: {err}");
        assert_eq!(MaxIterations::default().get(), 3);
    }

    #[test]
    fn line_range_accepts_short_arrays() {
        let range: LineRange = serde_json::from_str("[7]").expect("single line");
        assert_eq!(range, LineRange::new(7, 7));
        let range: LineRange = serde_json::from_str("[]").expect("empty");
        assert_eq!(range, LineRange::new(1, 1));
        let range: LineRange = serde_json::from_str("[3, 9, 12]").expect("extra values");
        assert_eq!(range, LineRange::new(3, 9));
    }

    #[test]
    fn line_range_accepts_whole_floats_only() {
        let range: LineRange = serde_json::from_str("[1.0, 2.0]").expect("whole floats");
        assert_eq!(range, LineRange::new(1, 2));
        let err = serde_json::from_str::<LineRange>("[1.5, 2]").expect_err("fractional line");
        assert!(err.to_string().contains("whole number"), "got: {err}");
    }

    #[test]
    fn fix_mode_parses_kebab_case() {
        let mode: FixMode = serde_yaml::from_str("typed").expect("typed");
        assert_eq!(mode, FixMode::Typed);
        let mode: FixMode = serde_yaml::from_str("code-block").expect("code-block");
        assert_eq!(mode, FixMode::CodeBlock);
        assert_eq!(FixMode::default(), FixMode::CodeBlock);
    }

    #[test]
    fn language_parses_lowercase() {
        let language: Language = serde_yaml::from_str("java").expect("parse language");
        assert_eq!(language, Language::Java);
        assert_eq!(Language::Python.to_string(), "python");
    }
}
