//! Benchmark in, repaired outputs out: one worker thread per failing
//! candidate, all sharing one coordinator.

use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::benchmark::BenchmarkEntry;
use crate::config::RunConfig;
use crate::coordinator::{Coordinator, CoordinatorStats};
use crate::error::OrchestratorError;
use crate::executor::ExecutionBackend;
use crate::llm::backend::InferenceBackend;
use crate::llm::extract::fence;
use crate::state::{RepairOutcome, RunStats, RunStatsSnapshot};
use crate::worker::RepairWorker;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub code: String,
    /// Fenced code for repaired candidates, the original raw output otherwise.
    pub output: String,
    pub repaired: bool,
    pub passed: bool,
    pub repair_attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemResult {
    pub question_id: String,
    pub candidates: Vec<CandidateResult>,
}

impl ProblemResult {
    pub fn output_list(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.output.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub problems: Vec<ProblemResult>,
    pub stats: RunStatsSnapshot,
    pub coordinator: CoordinatorStats,
}

/// Position of a worker's candidate in the result grid.
struct Assignment {
    problem: usize,
    candidate: usize,
    worker: usize,
}

pub fn run_pipeline(
    entries: &[BenchmarkEntry],
    cfg: Arc<RunConfig>,
    inference: Arc<dyn InferenceBackend>,
    executor: Arc<dyn ExecutionBackend>,
) -> Result<PipelineResult, OrchestratorError> {
    let stats = Arc::new(RunStats::default());
    let coordinator = Coordinator::new(inference, executor, &cfg);

    let mut problems: Vec<ProblemResult> = Vec::with_capacity(entries.len());
    let mut assignments = Vec::new();
    let mut workers = Vec::new();

    for (p, entry) in entries.iter().enumerate() {
        let mut results = Vec::with_capacity(entry.candidates.len());

        for (c, candidate) in entry.candidates.iter().enumerate() {
            if candidate.graded {
                RunStats::bump(&stats.already_passing);
                results.push(CandidateResult {
                    code: candidate.source.clone(),
                    output: candidate
                        .raw_output
                        .clone()
                        .unwrap_or_else(|| fence(&candidate.source)),
                    repaired: false,
                    passed: true,
                    repair_attempts: 0,
                });
                continue;
            }

            RunStats::bump(&stats.failing);
            if !candidate.public_grade {
                RunStats::bump(&stats.public_failing);
            }

            let link = coordinator.register();
            assignments.push(Assignment {
                problem: p,
                candidate: c,
                worker: link.id(),
            });
            workers.push(RepairWorker::new(
                link,
                candidate.clone(),
                Arc::clone(&cfg),
                Arc::clone(&stats),
            ));

            // placeholder until the worker reports
            results.push(CandidateResult {
                code: candidate.source.clone(),
                output: fence(&candidate.source),
                repaired: true,
                passed: false,
                repair_attempts: 0,
            });
        }

        problems.push(ProblemResult {
            question_id: entry.problem.question_id.clone(),
            candidates: results,
        });
    }

    let snapshot = stats.snapshot();
    info!(
        already_passing = snapshot.already_passing,
        failing = snapshot.failing,
        public_failing = snapshot.public_failing,
        "candidates loaded"
    );

    let mut handles = Vec::with_capacity(workers.len());
    for worker in workers {
        let name = format!("worker-{}", worker.id());
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
            .map_err(OrchestratorError::Spawn)?;
        handles.push(handle);
    }

    let run = coordinator.run();

    let mut finished: Vec<Option<RepairOutcome>> = handles
        .into_iter()
        .map(|h| match h.join() {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                error!("repair worker panicked");
                None
            }
        })
        .collect();

    let run = run?;

    for a in &assignments {
        let outcome = finished
            .get_mut(a.worker)
            .and_then(Option::take)
            .or_else(|| run.outcomes.get(a.worker).cloned().flatten());

        if let Some(outcome) = outcome {
            let slot = &mut problems[a.problem].candidates[a.candidate];
            slot.output = fence(&outcome.code);
            slot.code = outcome.code;
            slot.passed = outcome.passed;
            slot.repair_attempts = outcome.repair_attempts;
        }
    }

    let stats = stats.snapshot();
    info!(
        checks_inserted = stats.checks_inserted,
        testgen_exposed = stats.testgen_exposed,
        testgen_silent = stats.testgen_silent,
        batches = run.stats.batches(),
        "pipeline finished"
    );

    Ok(PipelineResult {
        problems,
        stats,
        coordinator: run.stats,
    })
}
