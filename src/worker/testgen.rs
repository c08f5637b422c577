use std::sync::Arc;

use tracing::debug;

use super::{RepairPlan, RepairWorker};
use crate::error::LinkError;
use crate::llm::extract::extract_generator;
use crate::llm::prompt::generator_prompt;
use crate::state::{FailureRecord, RunStats, TestSampleSet};

impl RepairWorker {
    /// Synthetic tests for a candidate whose public verdict cannot be trusted.
    /// `None` when no generator produced a single usable input.
    pub(super) fn generate_tests(&mut self) -> Result<Option<Arc<TestSampleSet>>, LinkError> {
        let original = self.candidate.source.clone();
        let none = FailureRecord::None;
        let prompt = generator_prompt(&self.ctx(&original, &none));

        for attempt in 1..=self.cfg.testgen_attempts {
            let Some(script) = self.request_code(&prompt, extract_generator)? else {
                continue;
            };

            let sampled = self.link.sample_inputs(
                script,
                self.cfg.generator_runs,
                self.cfg.generator_timeout(),
            )?;

            if sampled.inputs.is_empty() {
                debug!(worker = self.id(), attempt, "generator produced no inputs");
                continue;
            }

            debug!(
                worker = self.id(),
                attempt,
                inputs = sampled.inputs.len(),
                clean = sampled.clean,
                "synthetic inputs collected"
            );

            let merged = TestSampleSet::merged_with_synthetic(
                &self.candidate.problem.public_tests,
                &sampled.inputs,
            );
            self.outcome.synthetic_tests = sampled.inputs.len();
            return Ok(Some(Arc::new(merged)));
        }

        Ok(None)
    }

    /// Picks tests and starting failure for the repair phase of a candidate
    /// that passed its public tests.
    pub(super) fn plan_from_synthetic(&mut self, checked: String) -> Result<RepairPlan, LinkError> {
        let Some(tests) = self.generate_tests()? else {
            RunStats::bump(&self.stats.testgen_silent);
            return Ok(RepairPlan {
                code: checked,
                failure: FailureRecord::unknown(),
                tests: self.candidate.public_tests(),
                policy: self.cfg.public_failure_policy,
            });
        };

        let probe = self
            .link
            .execute(Arc::clone(&tests), checked.clone(), self.cfg.exec_timeout())?;

        let failure = if probe.passed() {
            RunStats::bump(&self.stats.testgen_silent);
            self.candidate.failure.clone()
        } else {
            RunStats::bump(&self.stats.testgen_exposed);
            probe.failure
        };

        Ok(RepairPlan {
            code: checked,
            failure,
            tests,
            policy: self.cfg.synthetic_failure_policy,
        })
    }
}
