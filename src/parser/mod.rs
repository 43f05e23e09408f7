//! Extraction of structured signals from raw check output.
//!
//! Parsers never fail: unrecognized output yields `None`, which the
//! pipeline reports as a degraded feedback line rather than an error.
//! `None` is deliberately distinct from a zero-test result.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Parser hint for test output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestFramework {
    /// Try pytest first, then unittest.
    #[default]
    Auto,
    Pytest,
    Unittest,
}

/// Test execution counts extracted from a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResults {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
}

impl TestResults {
    pub fn new(passed: u32, failed: u32, total: u32) -> Self {
        Self {
            passed,
            failed,
            total,
        }
    }

    /// Fraction of tests passing, defined only when any test ran.
    pub fn pass_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| f64::from(self.passed) / f64::from(self.total))
    }

    /// True only when tests actually ran and none failed.
    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.failed == 0
    }
}

/// A performance measurement. `value` is normalized to seconds; `unit`
/// records the unit the metric was reported in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfResults {
    pub value: f64,
    pub unit: String,
}

/// Parse test output into counts, or `None` when nothing is recognized.
pub fn parse_test_output(output: &str, framework: TestFramework) -> Option<TestResults> {
    match framework {
        TestFramework::Pytest => parse_pytest_output(output),
        TestFramework::Unittest => parse_unittest_output(output),
        TestFramework::Auto => {
            parse_pytest_output(output).or_else(|| parse_unittest_output(output))
        }
    }
}

fn parse_pytest_output(output: &str) -> Option<TestResults> {
    if let Some(results) = parse_json_summary(output) {
        return Some(results);
    }

    static PASSED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) passed").unwrap());
    static FAILED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) failed").unwrap());

    let passed = capture_count(&PASSED_RE, output);
    let failed = capture_count(&FAILED_RE, output);

    if passed.is_some() || failed.is_some() {
        let passed = passed.unwrap_or(0);
        let failed = failed.unwrap_or(0);
        return Some(TestResults::new(passed, failed, passed + failed));
    }

    // Tests ran but collected nothing: a real zero result, not a parse miss.
    let lowered = output.to_lowercase();
    if lowered.contains("no tests ran") || lowered.contains("no tests collected") {
        return Some(TestResults::new(0, 0, 0));
    }

    None
}

fn parse_unittest_output(output: &str) -> Option<TestResults> {
    static RAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Ran (\d+) test").unwrap());
    static OK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bOK\b").unwrap());
    static FAILURES_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"FAILED.*failures?=(\d+)").unwrap());
    static ERRORS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"errors?=(\d+)").unwrap());

    let total = capture_count(&RAN_RE, output)?;

    if OK_RE.is_match(output) {
        return Some(TestResults::new(total, 0, total));
    }
    if let Some(failed) = capture_count(&FAILURES_RE, output) {
        return Some(TestResults::new(total.saturating_sub(failed), failed, total));
    }
    if let Some(errors) = capture_count(&ERRORS_RE, output) {
        return Some(TestResults::new(total.saturating_sub(errors), errors, total));
    }

    None
}

/// Structured output: a top-level or `summary`-nested count object.
fn parse_json_summary(output: &str) -> Option<TestResults> {
    let value: serde_json::Value = serde_json::from_str(output.trim()).ok()?;

    let counts = if value.get("tests").is_some() {
        &value
    } else {
        value.get("summary")?
    };

    let passed = counts.get("passed").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let failed = counts.get("failed").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let total = counts
        .get("total")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(passed + failed);

    Some(TestResults::new(passed, failed, total))
}

fn capture_count(re: &Regex, output: &str) -> Option<u32> {
    re.captures(output)?.get(1)?.as_str().parse().ok()
}

/// Scan output for a numeric literal adjacent to a recognized unit token.
///
/// Fixed priority order: structured JSON duration keys, then seconds,
/// milliseconds, minutes, and finally a bare standalone number (assumed
/// seconds). Thousands separators and decimals are tolerated.
pub fn parse_performance_metric(output: &str) -> Option<PerfResults> {
    if let Some(results) = parse_json_metric(output) {
        return Some(results);
    }

    const NUM: &str = r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)";

    static SECONDS_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(&format!(r"(?i){NUM}\s*(?:seconds?|secs?|s)\b")).unwrap());
    static MILLIS_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(&format!(r"(?i){NUM}\s*(?:milliseconds?|msecs?|ms)\b")).unwrap());
    static MINUTES_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(&format!(r"(?i){NUM}\s*(?:minutes?|mins?|m)\b")).unwrap());
    static BARE_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(&format!(r"(?m)^\s*{NUM}\s*$")).unwrap());

    let patterns: [(&Lazy<Regex>, f64, &str); 4] = [
        (&SECONDS_RE, 1.0, "s"),
        (&MILLIS_RE, 0.001, "ms"),
        (&MINUTES_RE, 60.0, "m"),
        (&BARE_RE, 1.0, "s"),
    ];

    for (re, multiplier, unit) in patterns {
        if let Some(captures) = re.captures(output) {
            let literal = captures.get(1)?.as_str().replace(',', "");
            if let Ok(raw) = literal.parse::<f64>() {
                let value = raw * multiplier;
                if value.is_finite() && value > 0.0 {
                    return Some(PerfResults {
                        value,
                        unit: unit.to_string(),
                    });
                }
            }
        }
    }

    None
}

fn parse_json_metric(output: &str) -> Option<PerfResults> {
    let value: serde_json::Value = serde_json::from_str(output.trim()).ok()?;

    for key in ["time", "duration", "runtime", "elapsed", "seconds"] {
        if let Some(raw) = value.get(key).and_then(|v| v.as_f64()) {
            if !raw.is_finite() || raw <= 0.0 {
                continue;
            }
            // Very large durations are assumed to be milliseconds.
            return Some(if raw < 10_000.0 {
                PerfResults {
                    value: raw,
                    unit: "s".to_string(),
                }
            } else {
                PerfResults {
                    value: raw / 1000.0,
                    unit: "ms".to_string(),
                }
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pytest_passed_and_failed() {
        let results = parse_test_output("12 passed, 3 failed", TestFramework::Pytest).unwrap();
        assert_eq!(results, TestResults::new(12, 3, 15));
    }

    #[test]
    fn parses_pytest_all_passing() {
        let results =
            parse_test_output("===== 5 passed in 0.21s =====", TestFramework::Pytest).unwrap();
        assert_eq!(results, TestResults::new(5, 0, 5));
        assert!(results.all_passed());
        assert_eq!(results.pass_rate(), Some(1.0));
    }

    #[test]
    fn empty_collection_is_zero_not_none() {
        let results = parse_test_output("no tests ran in 0.01s", TestFramework::Pytest).unwrap();
        assert_eq!(results, TestResults::new(0, 0, 0));
        assert_eq!(results.pass_rate(), None);
        assert!(!results.all_passed());
    }

    #[test]
    fn unrecognized_output_is_none() {
        assert_eq!(
            parse_test_output("Segmentation fault (core dumped)", TestFramework::Auto),
            None
        );
    }

    #[test]
    fn parses_json_summary_forms() {
        let top = r#"{"tests": [], "passed": 7, "failed": 1, "total": 8}"#;
        assert_eq!(
            parse_test_output(top, TestFramework::Pytest).unwrap(),
            TestResults::new(7, 1, 8)
        );

        let nested = r#"{"summary": {"passed": 4, "failed": 0}}"#;
        assert_eq!(
            parse_test_output(nested, TestFramework::Pytest).unwrap(),
            TestResults::new(4, 0, 4)
        );
    }

    #[test]
    fn parses_unittest_failures() {
        let output = "Ran 15 tests in 0.003s\n\nFAILED (failures=2)";
        let results = parse_test_output(output, TestFramework::Unittest).unwrap();
        assert_eq!(results, TestResults::new(13, 2, 15));
    }

    #[test]
    fn parses_unittest_ok_and_errors() {
        let output = "Ran 4 tests in 0.001s\n\nOK";
        assert_eq!(
            parse_test_output(output, TestFramework::Unittest).unwrap(),
            TestResults::new(4, 0, 4)
        );

        let output = "Ran 6 tests in 0.002s\n\nFAILED (errors=1)";
        assert_eq!(
            parse_test_output(output, TestFramework::Auto).unwrap(),
            TestResults::new(5, 1, 6)
        );
    }

    #[test]
    fn perf_seconds_and_decimals() {
        let perf = parse_performance_metric("benchmark finished in 1.5 s").unwrap();
        assert_eq!(perf.value, 1.5);
        assert_eq!(perf.unit, "s");

        let perf = parse_performance_metric("elapsed: 0.25 seconds").unwrap();
        assert_eq!(perf.value, 0.25);
    }

    #[test]
    fn perf_milliseconds_with_thousands_separator() {
        let perf = parse_performance_metric("mean runtime 1,234.5 ms").unwrap();
        assert!((perf.value - 1.2345).abs() < 1e-9);
        assert_eq!(perf.unit, "ms");
    }

    #[test]
    fn perf_seconds_take_priority_over_milliseconds() {
        let perf = parse_performance_metric("warmup 250 ms, total 2 s").unwrap();
        assert_eq!(perf.value, 2.0);
        assert_eq!(perf.unit, "s");
    }

    #[test]
    fn perf_bare_number_is_seconds() {
        let perf = parse_performance_metric("  0.75  \n").unwrap();
        assert_eq!(perf.value, 0.75);
        assert_eq!(perf.unit, "s");
    }

    #[test]
    fn perf_json_keys() {
        let perf = parse_performance_metric(r#"{"runtime": 2.5}"#).unwrap();
        assert_eq!(perf.value, 2.5);

        // Large structured values are read as milliseconds.
        let perf = parse_performance_metric(r#"{"elapsed": 12000}"#).unwrap();
        assert_eq!(perf.value, 12.0);
        assert_eq!(perf.unit, "ms");
    }

    #[test]
    fn perf_rejects_nonpositive_and_garbage() {
        assert_eq!(parse_performance_metric("all good, no numbers here"), None);
        assert_eq!(parse_performance_metric("0 ms"), None);
    }
}
