//! Data model shared by the coordinator, the workers and the backends.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/* ---------- platforms & tests ---------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    LeetCode,
    Codeforces,
    AtCoder,
    HumanEval,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::LeetCode => "leetcode",
            Platform::Codeforces => "codeforces",
            Platform::AtCoder => "atcoder",
            Platform::HumanEval => "humaneval",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Stdin,
    Functional,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSample {
    pub input: String,
    /// Empty for synthetic inputs: the case only has to run cleanly.
    #[serde(rename = "output")]
    pub expected: String,
    #[serde(rename = "testtype")]
    pub test_type: TestType,
}

/// Ordered, immutable collection of test cases. Replaced wholesale, never edited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSampleSet {
    pub cases: Vec<TestSample>,
    pub fn_name: Option<String>,
    pub platform: Platform,
}

impl TestSampleSet {
    pub fn new(cases: Vec<TestSample>, fn_name: Option<String>, platform: Platform) -> Self {
        Self {
            cases,
            fn_name,
            platform,
        }
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn first_input(&self) -> Option<&str> {
        self.cases.first().map(|c| c.input.as_str())
    }

    /// Synthetic inputs followed by `base`, ordered by ascending input length
    /// so short cases run (and fail) first. Ties keep their relative order.
    pub fn merged_with_synthetic(base: &TestSampleSet, inputs: &[String]) -> Self {
        let test_type = base
            .cases
            .first()
            .map(|c| c.test_type)
            .unwrap_or(match base.platform {
                Platform::LeetCode | Platform::HumanEval => TestType::Functional,
                Platform::Codeforces | Platform::AtCoder => TestType::Stdin,
            });

        let mut cases: Vec<TestSample> = inputs
            .iter()
            .map(|input| TestSample {
                input: input.clone(),
                expected: String::new(),
                test_type,
            })
            .collect();
        cases.extend(base.cases.iter().cloned());
        cases.sort_by_key(|c| c.input.len());

        Self {
            cases,
            fn_name: base.fn_name.clone(),
            platform: base.platform,
        }
    }
}

/* ---------- problems & candidates ---------- */

#[derive(Clone, Debug)]
pub struct Problem {
    pub question_id: String,
    pub question_content: String,
    pub platform: Platform,
    pub fn_name: Option<String>,
    pub public_tests: Arc<TestSampleSet>,
    pub extra_tests: Arc<TestSampleSet>,
    pub private_tests: Arc<TestSampleSet>,
}

/// One generated program under repair. Owned by its worker for the whole run.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub problem: Arc<Problem>,
    pub code_index: usize,
    pub source: String,
    /// Raw model output the source was extracted from.
    pub raw_output: Option<String>,
    /// True grading verdict.
    pub graded: bool,
    /// Verdict on the public tests alone.
    pub public_grade: bool,
    pub failure: FailureRecord,
}

impl Candidate {
    pub fn problem_id(&self) -> &str {
        &self.problem.question_id
    }

    pub fn public_tests(&self) -> Arc<TestSampleSet> {
        Arc::clone(&self.problem.public_tests)
    }
}

/* ---------- failure taxonomy ---------- */

/// Why a candidate failed. Exactly one variant at a time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureRecord {
    None,
    CompilationError {
        detail: String,
    },
    WrongAnswer {
        input: String,
        produced: String,
        expected: String,
    },
    TimeLimitExceeded {
        detail: String,
        input: String,
        expected: String,
    },
    RuntimeError {
        input: Option<String>,
        expected: Option<String>,
        detail: String,
    },
    HarnessError {
        detail: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    None,
    CompilationError,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    HarnessError,
}

impl FailureRecord {
    pub const UNKNOWN: &'static str = "Unknown";

    /// Placeholder used when no trustworthy failure signal exists.
    pub fn unknown() -> Self {
        FailureRecord::WrongAnswer {
            input: Self::UNKNOWN.into(),
            produced: Self::UNKNOWN.into(),
            expected: Self::UNKNOWN.into(),
        }
    }

    pub fn harness(detail: impl Into<String>) -> Self {
        FailureRecord::HarnessError {
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            FailureRecord::None => FailureKind::None,
            FailureRecord::CompilationError { .. } => FailureKind::CompilationError,
            FailureRecord::WrongAnswer { .. } => FailureKind::WrongAnswer,
            FailureRecord::TimeLimitExceeded { .. } => FailureKind::TimeLimitExceeded,
            FailureRecord::RuntimeError { .. } => FailureKind::RuntimeError,
            FailureRecord::HarnessError { .. } => FailureKind::HarnessError,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, FailureRecord::None)
    }

    /// Parses the benchmark's `{"error_code": ..}` metadata. Accepts the object
    /// itself or a JSON string holding it. Anything unparseable is `None`.
    pub fn from_metadata(value: &Value) -> Self {
        let parsed;
        let obj = match value {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(v) => {
                    parsed = v;
                    &parsed
                }
                Err(_) => return FailureRecord::None,
            },
            other => other,
        };

        let Some(map) = obj.as_object() else {
            return FailureRecord::None;
        };

        let text = |key: &str| -> Option<String> {
            map.get(key).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        };
        let text_or_na = |key: &str| text(key).unwrap_or_else(|| "N/A".to_string());

        let code = match map.get("error_code") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        };

        match code {
            Some(-1) => FailureRecord::CompilationError {
                detail: text_or_na("error"),
            },
            Some(-2) => FailureRecord::WrongAnswer {
                input: text_or_na("inputs"),
                produced: text_or_na("output"),
                expected: text_or_na("expected"),
            },
            Some(-3) => FailureRecord::TimeLimitExceeded {
                detail: text_or_na("error"),
                input: text_or_na("inputs"),
                expected: text_or_na("expected"),
            },
            Some(-4) => FailureRecord::RuntimeError {
                input: text("inputs"),
                expected: text("expected"),
                detail: text("error")
                    .or_else(|| text("error_message"))
                    .unwrap_or_else(|| "N/A".to_string()),
            },
            Some(-5) => FailureRecord::HarnessError {
                detail: text_or_na("error"),
            },
            _ => FailureRecord::None,
        }
    }

    pub fn to_metadata(&self) -> Value {
        use serde_json::json;

        match self {
            FailureRecord::None => json!({}),
            FailureRecord::CompilationError { detail } => json!({
                "error_code": -1,
                "error": detail,
                "error_message": "Compilation Error",
            }),
            FailureRecord::WrongAnswer {
                input,
                produced,
                expected,
            } => json!({
                "error_code": -2,
                "inputs": input,
                "output": produced,
                "expected": expected,
                "error_message": "Wrong Answer",
            }),
            FailureRecord::TimeLimitExceeded {
                detail,
                input,
                expected,
            } => json!({
                "error_code": -3,
                "error": detail,
                "inputs": input,
                "expected": expected,
                "error_message": "Time Limit Exceeded",
            }),
            FailureRecord::RuntimeError {
                input,
                expected,
                detail,
            } => {
                let mut v = json!({
                    "error_code": -4,
                    "error": detail,
                    "error_message": "Runtime Error",
                });
                if let Some(i) = input {
                    v["inputs"] = i.clone().into();
                }
                if let Some(e) = expected {
                    v["expected"] = e.clone().into();
                }
                v
            }
            FailureRecord::HarnessError { detail } => json!({
                "error_code": -5,
                "error": detail,
                "error_message": "TestRunnerError",
            }),
        }
    }
}

/// Outcome of one execution request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// One entry per case actually run; execution stops at the first failure.
    pub verdicts: Vec<bool>,
    pub failure: FailureRecord,
}

impl ExecutionReport {
    pub fn pass(cases: usize) -> Self {
        Self {
            verdicts: vec![true; cases],
            failure: FailureRecord::None,
        }
    }

    pub fn fail(verdicts: Vec<bool>, failure: FailureRecord) -> Self {
        Self { verdicts, failure }
    }

    pub fn harness(detail: impl Into<String>) -> Self {
        Self {
            verdicts: vec![false],
            failure: FailureRecord::harness(detail),
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none() && self.verdicts.iter().all(|v| *v)
    }
}

/// Inputs collected from repeated runs of a generator script.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampledInputs {
    pub inputs: Vec<String>,
    /// False once any run failed or timed out.
    pub clean: bool,
}

/* ---------- worker lifecycle ---------- */

/// Forward-only worker phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
    ExtendingChecker,
    GeneratingTests,
    Repairing,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Every repair attempt sees the original code and failure record.
    KeepOriginal,
    /// Each attempt patches the previous attempt, using the failure it produced.
    ThreadLatest,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RepairOutcome {
    pub code: String,
    pub passed: bool,
    pub repair_attempts: usize,
    pub checker_accepted: bool,
    pub synthetic_tests: usize,
}

impl RepairOutcome {
    pub fn unchanged(code: String) -> Self {
        Self {
            code,
            passed: false,
            repair_attempts: 0,
            checker_accepted: false,
            synthetic_tests: 0,
        }
    }
}

/* ---------- telemetry ---------- */

#[derive(Debug, Default)]
pub struct RunStats {
    pub already_passing: AtomicUsize,
    pub failing: AtomicUsize,
    pub public_failing: AtomicUsize,
    pub checks_inserted: AtomicUsize,
    pub testgen_exposed: AtomicUsize,
    pub testgen_silent: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatsSnapshot {
    pub already_passing: usize,
    pub failing: usize,
    pub public_failing: usize,
    pub checks_inserted: usize,
    pub testgen_exposed: usize,
    pub testgen_silent: usize,
}

impl RunStats {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            already_passing: self.already_passing.load(Ordering::Relaxed),
            failing: self.failing.load(Ordering::Relaxed),
            public_failing: self.public_failing.load(Ordering::Relaxed),
            checks_inserted: self.checks_inserted.load(Ordering::Relaxed),
            testgen_exposed: self.testgen_exposed.load(Ordering::Relaxed),
            testgen_silent: self.testgen_silent.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_codes_map_to_variants() {
        let wa = FailureRecord::from_metadata(&json!({
            "error_code": -2, "inputs": "1 2", "output": "4", "expected": "3"
        }));
        assert_eq!(
            wa,
            FailureRecord::WrongAnswer {
                input: "1 2".into(),
                produced: "4".into(),
                expected: "3".into()
            }
        );

        let as_string = json!("{\"error_code\": \"-1\", \"error\": \"SyntaxError\"}");
        assert_eq!(
            FailureRecord::from_metadata(&as_string).kind(),
            FailureKind::CompilationError
        );

        let rte = FailureRecord::from_metadata(&json!({
            "error_code": -4, "error_message": "boom"
        }));
        assert_eq!(
            rte,
            FailureRecord::RuntimeError {
                input: None,
                expected: None,
                detail: "boom".into()
            }
        );

        assert!(FailureRecord::from_metadata(&json!("not json")).is_none());
        assert!(FailureRecord::from_metadata(&json!({"notes": 1})).is_none());
    }

    #[test]
    fn metadata_survives_render_and_parse() {
        let tle = FailureRecord::TimeLimitExceeded {
            detail: "Time Limit Exceeded".into(),
            input: "5".into(),
            expected: "120".into(),
        };
        assert_eq!(FailureRecord::from_metadata(&tle.to_metadata()), tle);
    }

    #[test]
    fn harness_report_never_counts_as_pass() {
        assert!(!ExecutionReport::harness("pool died").passed());
        assert!(ExecutionReport::pass(3).passed());
        assert!(!ExecutionReport::fail(vec![true, false], FailureRecord::unknown()).passed());
    }

    #[test]
    fn synthetic_merge_orders_by_input_length() {
        let base = TestSampleSet::new(
            vec![TestSample {
                input: "3\n1 2 3".into(),
                expected: "6".into(),
                test_type: TestType::Stdin,
            }],
            None,
            Platform::Codeforces,
        );
        let merged = TestSampleSet::merged_with_synthetic(
            &base,
            &["10\n1 2 3 4 5 6 7 8 9 10".to_string(), "1\n7".to_string()],
        );

        let inputs: Vec<&str> = merged.cases.iter().map(|c| c.input.as_str()).collect();
        assert_eq!(inputs, vec!["1\n7", "3\n1 2 3", "10\n1 2 3 4 5 6 7 8 9 10"]);
        assert!(merged.cases[0].expected.is_empty());
        assert_eq!(merged.cases[1].expected, "6");
    }
}
