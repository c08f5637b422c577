//! One repair worker per failing candidate.
//!
//! A worker is plain sequential code: ask the model, run the result, ask
//! again. Every suspension goes through its `WorkerLink`, which is where the
//! coordinator batches and schedules. Phases only move forward:
//! `ExtendingChecker -> [GeneratingTests] -> Repairing -> Done`.

pub mod testgen;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::coordinator::mailbox::{WorkerId, WorkerLink};
use crate::error::LinkError;
use crate::llm::extract::{extract_code, inserted_checks};
use crate::llm::prompt::{checker_prompt, repair_prompt, LlmPrompt, PromptContext};
use crate::state::{
    Candidate, FailureKind, FailurePolicy, FailureRecord, RepairOutcome, RunStats, TestSampleSet,
    WorkerState,
};

pub struct RepairWorker {
    link: WorkerLink,
    candidate: Candidate,
    cfg: Arc<RunConfig>,
    stats: Arc<RunStats>,
    state: WorkerState,
    outcome: RepairOutcome,
}

/// Where the repair phase starts from and what it is graded against.
struct RepairPlan {
    code: String,
    failure: FailureRecord,
    tests: Arc<TestSampleSet>,
    policy: FailurePolicy,
}

impl RepairWorker {
    pub fn new(
        link: WorkerLink,
        candidate: Candidate,
        cfg: Arc<RunConfig>,
        stats: Arc<RunStats>,
    ) -> Self {
        let outcome = RepairOutcome::unchanged(candidate.source.clone());
        Self {
            link,
            candidate,
            cfg,
            stats,
            state: WorkerState::ExtendingChecker,
            outcome,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.link.id()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Drives the candidate to `Done` and publishes the outcome. Never fails:
    /// a severed link ends the run with the best code seen so far.
    pub fn run(mut self) -> RepairOutcome {
        if self.candidate.graded {
            self.outcome.passed = true;
        } else if let Err(e) = self.drive() {
            warn!(
                worker = self.id(),
                problem = %self.candidate.problem_id(),
                phase = ?self.state,
                error = %e,
                "coordinator link lost, keeping best code"
            );
        }

        self.transition(WorkerState::Done);

        let RepairWorker { link, outcome, .. } = self;
        link.retire(outcome.clone());
        outcome
    }

    fn drive(&mut self) -> Result<(), LinkError> {
        let checked = self.extend_checker()?;

        let plan = if self.candidate.public_grade {
            self.transition(WorkerState::GeneratingTests);
            self.plan_from_synthetic(checked)?
        } else {
            RepairPlan {
                code: checked,
                failure: self.candidate.failure.clone(),
                tests: self.candidate.public_tests(),
                policy: self.cfg.public_failure_policy,
            }
        };

        self.transition(WorkerState::Repairing);
        self.repair(plan)
    }

    fn transition(&mut self, next: WorkerState) {
        if next == self.state {
            return;
        }
        debug_assert!(next > self.state, "worker phases only move forward");
        debug!(worker = self.id(), from = ?self.state, to = ?next, "phase");
        self.state = next;
    }

    /* ================= inference helpers ================= */

    fn ctx<'a>(&'a self, code: &'a str, failure: &'a FailureRecord) -> PromptContext<'a> {
        PromptContext {
            question: &self.candidate.problem.question_content,
            platform: self.candidate.problem.platform,
            code,
            failure,
            example_input: self.candidate.problem.public_tests.first_input(),
        }
    }

    /// Asks until `extract` finds something, at most `extraction_attempts`
    /// times. `None` means no progress.
    fn request_code(
        &self,
        prompt: &LlmPrompt,
        extract: fn(&str) -> String,
    ) -> Result<Option<String>, LinkError> {
        for attempt in 1..=self.cfg.extraction_attempts {
            let completion = self.link.infer(prompt.clone())?;
            let code = extract(&completion);
            if !code.is_empty() {
                return Ok(Some(code));
            }
            debug!(worker = self.id(), attempt, "nothing extractable in completion");
        }
        Ok(None)
    }

    /* ================= checker extension ================= */

    fn extend_checker(&mut self) -> Result<String, LinkError> {
        let original = self.candidate.source.clone();
        let tests = self.candidate.public_tests();
        let prompt = checker_prompt(&self.ctx(&original, &self.candidate.failure));

        for attempt in 1..=self.cfg.checker_attempts {
            let code = self
                .request_code(&prompt, extract_code)?
                .unwrap_or_else(|| original.clone());

            let report = self
                .link
                .execute(Arc::clone(&tests), code.clone(), self.cfg.exec_timeout())?;

            if report.failure.kind() != FailureKind::WrongAnswer {
                debug!(worker = self.id(), attempt, verdict = ?report.failure.kind(), "checker accepted");
                if code != original && inserted_checks(&original, &code) {
                    RunStats::bump(&self.stats.checks_inserted);
                }
                // Re-running the untouched original is not an accepted checker.
                self.outcome.checker_accepted = code != original;
                self.outcome.code = code.clone();
                return Ok(code);
            }
        }

        debug!(worker = self.id(), "checker extension exhausted, keeping original");
        Ok(original)
    }

    /* ================= repair ================= */

    fn repair(&mut self, plan: RepairPlan) -> Result<(), LinkError> {
        let RepairPlan {
            code: base,
            failure: base_failure,
            tests,
            policy,
        } = plan;

        let mut code = base.clone();
        let mut failure = base_failure.clone();

        for attempt in 1..=self.cfg.repair_attempts {
            let prompt = match policy {
                FailurePolicy::KeepOriginal => repair_prompt(&self.ctx(&base, &base_failure)),
                FailurePolicy::ThreadLatest => repair_prompt(&self.ctx(&code, &failure)),
            };

            let patched = self
                .request_code(&prompt, extract_code)?
                .unwrap_or_else(|| match policy {
                    FailurePolicy::KeepOriginal => base.clone(),
                    FailurePolicy::ThreadLatest => code.clone(),
                });

            if !patched.is_empty() {
                self.outcome.code = patched.clone();
            }
            self.outcome.repair_attempts = attempt;

            let report = self
                .link
                .execute(Arc::clone(&tests), patched.clone(), self.cfg.exec_timeout())?;

            if report.passed() {
                info!(
                    worker = self.id(),
                    problem = %self.candidate.problem_id(),
                    attempt,
                    "repair passed"
                );
                self.outcome.passed = true;
                return Ok(());
            }

            debug!(worker = self.id(), attempt, failure = ?report.failure.kind(), "repair attempt failed");
            code = patched;
            failure = report.failure;
        }

        debug!(worker = self.id(), "repair attempts exhausted");
        Ok(())
    }
}
