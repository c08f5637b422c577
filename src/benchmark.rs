//! Loader for evaluation files: one JSON array, one entry per problem, each
//! carrying the generated candidates and their grading verdicts.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::BenchmarkError;
use crate::state::{Candidate, FailureRecord, Platform, Problem, TestSample, TestSampleSet, TestType};

#[derive(Debug, Deserialize)]
struct RawEntry {
    question_id: String,
    question_content: String,
    platform: Platform,
    #[serde(default, alias = "fn_name")]
    func_name: Option<String>,
    #[serde(default)]
    public_test_cases: Value,
    #[serde(default)]
    extra_test: Value,
    #[serde(default)]
    private_test_cases: Value,
    code_list: Vec<String>,
    #[serde(default)]
    output_list: Vec<String>,
    graded_list: Vec<bool>,
    public_graded_list: Vec<bool>,
    #[serde(default)]
    metadata: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct BenchmarkEntry {
    pub problem: Arc<Problem>,
    pub candidates: Vec<Candidate>,
}

impl BenchmarkEntry {
    pub fn question_id(&self) -> &str {
        &self.problem.question_id
    }
}

pub fn load(path: &Path) -> Result<Vec<BenchmarkEntry>, BenchmarkError> {
    let raw = fs::read_to_string(path).map_err(|source| BenchmarkError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&raw).map_err(|e| match e {
        ParseFailure::Json(source) => BenchmarkError::Parse {
            path: path.to_path_buf(),
            source,
        },
        ParseFailure::Entry(e) => e,
    })
}

enum ParseFailure {
    Json(serde_json::Error),
    Entry(BenchmarkError),
}

fn parse(raw: &str) -> Result<Vec<BenchmarkEntry>, ParseFailure> {
    let entries: Vec<RawEntry> = serde_json::from_str(raw).map_err(ParseFailure::Json)?;
    let out = entries
        .into_iter()
        .map(build_entry)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ParseFailure::Entry)?;
    debug!(problems = out.len(), "benchmark loaded");
    Ok(out)
}

/// Parses an evaluation file held in memory.
pub fn from_json(raw: &str) -> Result<Vec<BenchmarkEntry>, BenchmarkError> {
    parse(raw).map_err(|e| match e {
        ParseFailure::Json(source) => BenchmarkError::Parse {
            path: "<memory>".into(),
            source,
        },
        ParseFailure::Entry(e) => e,
    })
}

fn build_entry(raw: RawEntry) -> Result<BenchmarkEntry, BenchmarkError> {
    let malformed = |reason: String| BenchmarkError::Malformed {
        question_id: raw.question_id.clone(),
        reason,
    };

    let n = raw.code_list.len();
    if raw.graded_list.len() != n || raw.public_graded_list.len() != n {
        return Err(malformed(format!(
            "{n} candidates but {} graded and {} public verdicts",
            raw.graded_list.len(),
            raw.public_graded_list.len()
        )));
    }
    if !raw.metadata.is_empty() && raw.metadata.len() != n {
        return Err(malformed(format!(
            "{n} candidates but {} metadata records",
            raw.metadata.len()
        )));
    }

    let tests = |v: &Value| test_set(v, raw.platform, raw.func_name.clone()).map_err(&malformed);

    let problem = Arc::new(Problem {
        question_id: raw.question_id.clone(),
        question_content: raw.question_content.clone(),
        platform: raw.platform,
        fn_name: raw.func_name.clone(),
        public_tests: Arc::new(tests(&raw.public_test_cases)?),
        extra_tests: Arc::new(tests(&raw.extra_test)?),
        private_tests: Arc::new(tests(&raw.private_test_cases)?),
    });

    let candidates = raw
        .code_list
        .iter()
        .enumerate()
        .map(|(i, source)| Candidate {
            problem: Arc::clone(&problem),
            code_index: i,
            source: source.clone(),
            raw_output: raw.output_list.get(i).cloned(),
            graded: raw.graded_list[i],
            public_grade: raw.public_graded_list[i],
            failure: raw
                .metadata
                .get(i)
                .map(FailureRecord::from_metadata)
                .unwrap_or(FailureRecord::None),
        })
        .collect();

    Ok(BenchmarkEntry {
        problem,
        candidates,
    })
}

/// Test lists arrive as an array, a JSON-encoded array, or (HumanEval) bare
/// assertion strings.
fn test_set(v: &Value, platform: Platform, fn_name: Option<String>) -> Result<TestSampleSet, String> {
    let decoded;
    let v = match v {
        Value::String(s) if s.trim().is_empty() => return Ok(TestSampleSet::new(vec![], fn_name, platform)),
        Value::String(s) => {
            decoded = serde_json::from_str::<Value>(s).map_err(|e| format!("test list: {e}"))?;
            &decoded
        }
        other => other,
    };

    let items = match v {
        Value::Null => return Ok(TestSampleSet::new(vec![], fn_name, platform)),
        Value::Array(items) => items,
        _ => return Err("test list is not an array".into()),
    };

    let cases = items
        .iter()
        .map(|item| match item {
            Value::String(snippet) => Ok(TestSample {
                input: snippet.clone(),
                expected: String::new(),
                test_type: TestType::Functional,
            }),
            other => serde_json::from_value::<TestSample>(other.clone())
                .map_err(|e| format!("test case: {e}")),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TestSampleSet::new(cases, fn_name, platform))
}
