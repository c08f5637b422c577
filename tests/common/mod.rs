#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mendloop::config::RunConfig;
use mendloop::error::{ExecError, InferenceError};
use mendloop::executor::ExecutionBackend;
use mendloop::llm::{Completion, InferenceBackend, LlmPrompt};
use mendloop::state::{
    Candidate, ExecutionReport, FailureRecord, Platform, Problem, SampledInputs, TestSample,
    TestSampleSet, TestType,
};

type Responder = dyn Fn(&LlmPrompt) -> String + Send + Sync;
type Grader = dyn Fn(&TestSampleSet, &str) -> ExecutionReport + Send + Sync;
type Sampler = dyn Fn(&str) -> SampledInputs + Send + Sync;

/// Inference backend driven by a closure. Records every batch it sees.
pub struct ScriptedInference {
    respond: Box<Responder>,
    batches: Mutex<Vec<Vec<LlmPrompt>>>,
}

impl ScriptedInference {
    pub fn new(respond: impl Fn(&LlmPrompt) -> String + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            batches: Mutex::new(Vec::new()),
        })
    }

    /// Replies with the prompt's user text.
    pub fn echo() -> Arc<Self> {
        Self::new(|p| p.user.clone())
    }

    pub fn batches(&self) -> Vec<Vec<LlmPrompt>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }
}

impl InferenceBackend for ScriptedInference {
    fn complete(&self, prompts: &[LlmPrompt]) -> Result<Vec<Completion>, InferenceError> {
        self.batches.lock().unwrap().push(prompts.to_vec());
        Ok(prompts
            .iter()
            .map(|p| Completion::Single((self.respond)(p)))
            .collect())
    }
}

/// Inference backend whose every batch fails.
pub struct DownInference;

impl InferenceBackend for DownInference {
    fn complete(&self, prompts: &[LlmPrompt]) -> Result<Vec<Completion>, InferenceError> {
        Err(InferenceError::Exhausted(prompts.len()))
    }
}

/// Execution backend driven by closures. Records every graded source.
pub struct ScriptedExec {
    grade: Box<Grader>,
    sample: Box<Sampler>,
    graded: Mutex<Vec<(usize, String)>>,
    samples: AtomicUsize,
    delay: Duration,
}

impl ScriptedExec {
    pub fn new(
        grade: impl Fn(&TestSampleSet, &str) -> ExecutionReport + Send + Sync + 'static,
    ) -> Self {
        Self {
            grade: Box::new(grade),
            sample: Box::new(|_| SampledInputs::default()),
            graded: Mutex::new(Vec::new()),
            samples: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_sampler(
        mut self,
        sample: impl Fn(&str) -> SampledInputs + Send + Sync + 'static,
    ) -> Self {
        self.sample = Box::new(sample);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// (case count, source) for every grading call, in call order.
    pub fn graded(&self) -> Vec<(usize, String)> {
        self.graded.lock().unwrap().clone()
    }

    pub fn sample_calls(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.graded.lock().unwrap().len() + self.sample_calls()
    }
}

impl ExecutionBackend for ScriptedExec {
    fn run(
        &self,
        samples: &TestSampleSet,
        source: &str,
        _timeout: Duration,
    ) -> Result<ExecutionReport, ExecError> {
        self.graded
            .lock()
            .unwrap()
            .push((samples.len(), source.to_string()));
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok((self.grade)(samples, source))
    }

    fn sample_inputs(
        &self,
        script: &str,
        _runs: usize,
        _timeout: Duration,
    ) -> Result<SampledInputs, ExecError> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        Ok((self.sample)(script))
    }
}

pub fn fenced(code: &str) -> String {
    format!("Here you go:\n```python\n{code}\n```\n")
}

pub fn wrong_answer() -> FailureRecord {
    FailureRecord::WrongAnswer {
        input: "1 2".into(),
        produced: "4".into(),
        expected: "3".into(),
    }
}

pub fn wa_report() -> ExecutionReport {
    ExecutionReport::fail(vec![false], wrong_answer())
}

pub fn is_checker(p: &LlmPrompt) -> bool {
    p.system.contains("property-based verification")
}

pub fn is_generator(p: &LlmPrompt) -> bool {
    p.system.contains("random, valid input")
}

pub fn is_repair(p: &LlmPrompt) -> bool {
    p.system.contains("repair incorrect programs")
}

pub fn fast_config() -> RunConfig {
    RunConfig {
        pool_size: 4,
        poll_interval_ms: 5,
        exec_timeout_secs: 2,
        ..RunConfig::default()
    }
}

pub fn stdin_problem(id: &str) -> Arc<Problem> {
    let public = TestSampleSet::new(
        vec![TestSample {
            input: "1 2\n".into(),
            expected: "3\n".into(),
            test_type: TestType::Stdin,
        }],
        None,
        Platform::AtCoder,
    );
    Arc::new(Problem {
        question_id: id.to_string(),
        question_content: "Read two integers and print their sum.".into(),
        platform: Platform::AtCoder,
        fn_name: None,
        public_tests: Arc::new(public),
        extra_tests: Arc::new(TestSampleSet::new(vec![], None, Platform::AtCoder)),
        private_tests: Arc::new(TestSampleSet::new(vec![], None, Platform::AtCoder)),
    })
}

pub fn candidate(
    problem: &Arc<Problem>,
    source: &str,
    graded: bool,
    public_grade: bool,
    failure: FailureRecord,
) -> Candidate {
    Candidate {
        problem: Arc::clone(problem),
        code_index: 0,
        source: source.to_string(),
        raw_output: Some(format!("raw:{source}")),
        graded,
        public_grade,
        failure,
    }
}
