// Python subprocess sandbox. Every call gets its own scratch directory and
// every test case its own interpreter process.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::process::{run_command_with_timeout, truncate_tail, CommandRunResult};
use super::ExecutionBackend;
use crate::error::ExecError;
use crate::state::{
    ExecutionReport, FailureRecord, Platform, SampledInputs, TestSample, TestSampleSet, TestType,
};

const DETAIL_LIMIT: usize = 2_000;
const COMPILE_TIMEOUT: Duration = Duration::from_secs(10);
const GENERATOR_PAUSE: Duration = Duration::from_millis(10);
const FLOAT_TOLERANCE: f64 = 1e-6;

const FUNCTIONAL_PRELUDE: &str = "\
from typing import *
import json, sys, math, heapq, bisect, itertools, functools, collections, string, re
from collections import *
from functools import *
from itertools import *
";

#[derive(Debug, Clone)]
pub struct PythonSandbox {
    python: String,
}

enum Harness {
    /// Program reads the case from stdin.
    Stdin,
    /// `Solution().<fn>(*args)`, one JSON argument per input line.
    Method(String),
    /// The case is an assertion appended to the program.
    Assertion,
}

impl PythonSandbox {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    fn harness(samples: &TestSampleSet) -> Harness {
        let test_type = samples
            .cases
            .first()
            .map(|c| c.test_type)
            .unwrap_or(TestType::Stdin);

        match (samples.platform, test_type, samples.fn_name.as_deref()) {
            (Platform::HumanEval, _, _) => Harness::Assertion,
            (_, TestType::Functional, Some(name)) if !name.trim().is_empty() => {
                Harness::Method(name.trim().to_string())
            }
            _ => Harness::Stdin,
        }
    }

    fn interpreter(&self, script: &Path, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.arg(script)
            .current_dir(dir)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8");
        cmd
    }

    fn compile_error(&self, script: &Path, dir: &Path) -> Result<Option<String>, ExecError> {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-c")
            .arg("import sys; compile(open(sys.argv[1], encoding='utf-8').read(), sys.argv[1], 'exec')")
            .arg(script)
            .current_dir(dir);

        let out = run_command_with_timeout(&mut cmd, None, COMPILE_TIMEOUT)?;
        if out.success() {
            Ok(None)
        } else if out.timed_out {
            Err(ExecError::Harness("syntax check timed out".into()))
        } else {
            Ok(Some(truncate_tail(out.stderr.trim(), DETAIL_LIMIT)))
        }
    }

    fn judge(case: &TestSample, harness: &Harness, out: &CommandRunResult) -> Option<FailureRecord> {
        if out.timed_out {
            return Some(FailureRecord::TimeLimitExceeded {
                detail: "Time Limit Exceeded".into(),
                input: clip(&case.input),
                expected: clip(&case.expected),
            });
        }

        if !out.success() {
            return Some(FailureRecord::RuntimeError {
                input: Some(clip(&case.input)),
                expected: Some(clip(&case.expected)),
                detail: truncate_tail(out.stderr.trim(), DETAIL_LIMIT),
            });
        }

        if case.expected.trim().is_empty() || matches!(harness, Harness::Assertion) {
            return None;
        }

        // A clipped stream cannot be compared.
        let matched = !out.truncated
            && match harness {
                Harness::Method(_) => json_outputs_match(&out.stdout, &case.expected),
                _ => stdout_matches(&out.stdout, &case.expected),
            };

        if matched {
            None
        } else {
            Some(FailureRecord::WrongAnswer {
                input: clip(&case.input),
                produced: clip(out.stdout.trim()),
                expected: clip(&case.expected),
            })
        }
    }
}

impl ExecutionBackend for PythonSandbox {
    fn run(
        &self,
        samples: &TestSampleSet,
        source: &str,
        timeout: Duration,
    ) -> Result<ExecutionReport, ExecError> {
        let dir = tempfile::tempdir()?;
        let harness = Self::harness(samples);

        let program = match &harness {
            Harness::Method(name) => format!(
                "{FUNCTIONAL_PRELUDE}\n{source}\n\nif __name__ == \"__main__\":\n    \
                 _args = [json.loads(_l) for _l in sys.stdin.read().split(\"\\n\") if _l.strip()]\n    \
                 print(json.dumps(Solution().{name}(*_args)))\n"
            ),
            Harness::Stdin | Harness::Assertion => source.to_string(),
        };
        let script = write_script(dir.path(), "candidate.py", &program)?;

        if let Some(detail) = self.compile_error(&script, dir.path())? {
            return Ok(ExecutionReport::fail(
                vec![false],
                FailureRecord::CompilationError { detail },
            ));
        }

        let mut verdicts = Vec::with_capacity(samples.len());
        for (idx, case) in samples.cases.iter().enumerate() {
            let out = match &harness {
                Harness::Assertion => {
                    let path = write_script(
                        dir.path(),
                        &format!("case_{idx}.py"),
                        &format!("{program}\n\n{}\n", case.input),
                    )?;
                    run_command_with_timeout(&mut self.interpreter(&path, dir.path()), None, timeout)?
                }
                _ => run_command_with_timeout(
                    &mut self.interpreter(&script, dir.path()),
                    Some(&case.input),
                    timeout,
                )?,
            };

            if let Some(failure) = Self::judge(case, &harness, &out) {
                debug!(case = idx, kind = ?failure.kind(), "case failed");
                verdicts.push(false);
                return Ok(ExecutionReport::fail(verdicts, failure));
            }
            verdicts.push(true);
        }

        Ok(ExecutionReport::fail(verdicts, FailureRecord::None))
    }

    fn sample_inputs(
        &self,
        script: &str,
        runs: usize,
        timeout: Duration,
    ) -> Result<SampledInputs, ExecError> {
        let dir = tempfile::tempdir()?;

        let mut program = script.to_string();
        if !program.contains("import random") {
            program = format!("import random\n{program}");
        }
        if !program.contains("import time") {
            program = format!("import time\n{program}");
        }
        if program.contains("json.dumps") && !program.contains("import json") {
            program = format!("import json\n{program}");
        }
        let path = write_script(dir.path(), "generator.py", &program)?;

        let mut seen = HashSet::new();
        let mut sampled = SampledInputs {
            inputs: Vec::new(),
            clean: true,
        };

        for run in 0..runs {
            let out = run_command_with_timeout(&mut self.interpreter(&path, dir.path()), None, timeout)?;

            if !out.success() {
                debug!(run, timed_out = out.timed_out, "generator run failed");
                sampled.clean = false;
                break;
            }

            let text = out.stdout.trim();
            if !text.is_empty() && seen.insert(text.to_string()) {
                sampled.inputs.push(text.to_string());
            }

            // Time-seeded generators need distinct millisecond seeds.
            thread::sleep(GENERATOR_PAUSE);
        }

        Ok(sampled)
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf, ExecError> {
    let path = dir.join(name);
    fs::write(&path, body)?;
    Ok(path)
}

fn clip(s: &str) -> String {
    if s.chars().count() <= DETAIL_LIMIT {
        return s.to_string();
    }
    let head: String = s.chars().take(DETAIL_LIMIT).collect();
    format!("{head}...")
}

fn stdout_matches(produced: &str, expected: &str) -> bool {
    let got: Vec<&str> = produced.split_whitespace().collect();
    let want: Vec<&str> = expected.split_whitespace().collect();

    got.len() == want.len() && got.iter().zip(&want).all(|(g, w)| tokens_match(g, w))
}

/// Integer tokens compare exactly. Tolerance applies only when one side is
/// written as a decimal or in exponent form.
fn tokens_match(got: &str, want: &str) -> bool {
    if got == want {
        return true;
    }
    if let (Ok(g), Ok(w)) = (got.parse::<i128>(), want.parse::<i128>()) {
        return g == w;
    }
    if !is_fractional(got) && !is_fractional(want) {
        return false;
    }
    match (got.parse::<f64>(), want.parse::<f64>()) {
        (Ok(g), Ok(w)) => floats_close(g, w),
        _ => false,
    }
}

fn is_fractional(token: &str) -> bool {
    token.contains(['.', 'e', 'E'])
}

fn floats_close(got: f64, want: f64) -> bool {
    (got - want).abs() <= FLOAT_TOLERANCE * want.abs().max(1.0)
}

fn json_outputs_match(produced: &str, expected: &str) -> bool {
    let last = produced.trim().lines().last().unwrap_or("").trim();

    match (
        serde_json::from_str::<Value>(last),
        serde_json::from_str::<Value>(expected.trim()),
    ) {
        (Ok(got), Ok(want)) => values_match(&got, &want),
        _ => last == expected.trim(),
    }
}

fn values_match(got: &Value, want: &Value) -> bool {
    match (got, want) {
        (Value::Number(g), Value::Number(w)) => {
            if let (Some(g), Some(w)) = (g.as_i64(), w.as_i64()) {
                return g == w;
            }
            if let (Some(g), Some(w)) = (g.as_u64(), w.as_u64()) {
                return g == w;
            }
            if !g.is_f64() && !w.is_f64() {
                return false;
            }
            match (g.as_f64(), w.as_f64()) {
                (Some(g), Some(w)) => floats_close(g, w),
                _ => false,
            }
        }
        (Value::Array(g), Value::Array(w)) => {
            g.len() == w.len() && g.iter().zip(w).all(|(a, b)| values_match(a, b))
        }
        _ => got == want,
    }
}
