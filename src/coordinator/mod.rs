//! The single arbiter between repair workers and the two shared backends.
//!
//! Inference requests are held back until every active worker is parked on
//! one, then flushed as a single batch. Execution requests go straight to a
//! bounded pool; their results land in the result table and are swept back to
//! the requesting worker.

pub mod mailbox;
pub mod pool;
pub mod results;
pub mod roster;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::{InferenceError, OrchestratorError};
use crate::executor::ExecutionBackend;
use crate::llm::backend::InferenceBackend;
use crate::llm::prompt::LlmPrompt;
use crate::state::RepairOutcome;

use mailbox::{Envelope, Payload, Reply, Request, WorkerId, WorkerLink};
use pool::ExecPool;
use results::ResultTable;
use roster::WorkerRoster;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Size of every flushed batch, in flush order.
    pub batch_sizes: Vec<usize>,
    pub prompts: usize,
    pub executions: usize,
    pub inference_ms: u64,
}

impl CoordinatorStats {
    pub fn batches(&self) -> usize {
        self.batch_sizes.len()
    }
}

/// What a finished run hands back: telemetry plus one slot per registered
/// worker (`None` for a worker that never published an outcome).
#[derive(Debug)]
pub struct CoordinatorRun {
    pub stats: CoordinatorStats,
    pub outcomes: Vec<Option<RepairOutcome>>,
}

struct PendingPrompt {
    worker: WorkerId,
    prompt: LlmPrompt,
    reply: Sender<Reply>,
}

struct InFlight {
    worker: WorkerId,
    reply: Sender<Reply>,
}

pub struct Coordinator {
    inference: Arc<dyn InferenceBackend>,
    executor: Arc<dyn ExecutionBackend>,
    results: Arc<ResultTable>,
    roster: Arc<WorkerRoster>,
    mailbox: Sender<Envelope>,
    inbox: Receiver<Envelope>,
    pool_size: usize,
    poll: Duration,
}

impl Coordinator {
    pub fn new(
        inference: Arc<dyn InferenceBackend>,
        executor: Arc<dyn ExecutionBackend>,
        cfg: &RunConfig,
    ) -> Self {
        let (mailbox, inbox) = unbounded();
        Self {
            inference,
            executor,
            results: Arc::new(ResultTable::new()),
            roster: Arc::new(WorkerRoster::new()),
            mailbox,
            inbox,
            pool_size: cfg.pool_size,
            poll: cfg.poll_interval(),
        }
    }

    /// Reserves a result slot and an active-count entry. Every worker must be
    /// registered before `run` starts.
    pub fn register(&self) -> WorkerLink {
        let id = self.results.allocate();
        let enlisted = self.roster.enlist();
        debug_assert_eq!(id, enlisted, "result table and roster out of step");
        WorkerLink::new(id, self.mailbox.clone(), Arc::clone(&self.roster))
    }

    pub fn registered(&self) -> usize {
        self.results.len()
    }

    /// Runs until no worker remains active. Only a failed inference batch
    /// ends the loop early; parked workers then see their link drop.
    pub fn run(self) -> Result<CoordinatorRun, OrchestratorError> {
        let mut pool = ExecPool::new(
            self.pool_size,
            Arc::clone(&self.executor),
            Arc::clone(&self.results),
            self.mailbox.clone(),
        )
        .map_err(OrchestratorError::Spawn)?;

        info!(
            workers = self.registered(),
            pool = pool.size(),
            "coordinator started"
        );

        let mut stats = CoordinatorStats::default();
        let mut pending: Vec<PendingPrompt> = Vec::new();
        let mut in_flight: Vec<InFlight> = Vec::new();

        loop {
            match self.inbox.recv_timeout(self.poll) {
                Ok(envelope) => {
                    self.accept(envelope, &pool, &mut pending, &mut in_flight, &mut stats);
                    while let Ok(envelope) = self.inbox.try_recv() {
                        self.accept(envelope, &pool, &mut pending, &mut in_flight, &mut stats);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            self.sweep(&mut in_flight);

            let active = self.roster.active();
            debug_assert!(pending.len() <= active, "more pending prompts than active workers");

            if !pending.is_empty() && pending.len() >= active {
                self.flush(&mut pending, &mut stats)?;
            }

            if (self.roster.is_finished() || self.roster.active() == 0)
                && pending.is_empty()
                && in_flight.is_empty()
            {
                break;
            }
        }

        pool.shutdown();

        info!(
            batches = stats.batches(),
            prompts = stats.prompts,
            executions = stats.executions,
            inference_ms = stats.inference_ms,
            "coordinator finished"
        );

        Ok(CoordinatorRun {
            stats,
            outcomes: self.roster.take_outputs(),
        })
    }

    fn accept(
        &self,
        envelope: Envelope,
        pool: &ExecPool,
        pending: &mut Vec<PendingPrompt>,
        in_flight: &mut Vec<InFlight>,
        stats: &mut CoordinatorStats,
    ) {
        match envelope {
            Envelope::Request(Request {
                worker,
                payload,
                reply,
            }) => match payload {
                Payload::Inference(prompt) => {
                    debug!(worker, pending = pending.len() + 1, "inference queued");
                    pending.push(PendingPrompt {
                        worker,
                        prompt,
                        reply,
                    });
                }
                Payload::Execution(job) => {
                    debug!(worker, "execution dispatched");
                    self.results.mark_pending(worker);
                    in_flight.push(InFlight { worker, reply });
                    pool.submit(worker, job);
                    stats.executions += 1;
                }
            },
            Envelope::Retired(worker) => {
                debug!(worker, active = self.roster.active(), "worker retired");
            }
            Envelope::Wake => {}
        }
    }

    fn sweep(&self, in_flight: &mut Vec<InFlight>) {
        in_flight.retain(|job| match self.results.take_ready(job.worker) {
            Some(reply) => {
                if job.reply.send(reply).is_err() {
                    warn!(worker = job.worker, "worker went away before its execution finished");
                }
                false
            }
            None => true,
        });
    }

    fn flush(
        &self,
        pending: &mut Vec<PendingPrompt>,
        stats: &mut CoordinatorStats,
    ) -> Result<(), OrchestratorError> {
        let batch = std::mem::take(pending);
        let prompts: Vec<LlmPrompt> = batch.iter().map(|p| p.prompt.clone()).collect();

        let started = Instant::now();
        let completions = self.inference.complete(&prompts)?;
        let elapsed = started.elapsed();

        if completions.len() != prompts.len() {
            return Err(InferenceError::Shape {
                expected: prompts.len(),
                got: completions.len(),
            }
            .into());
        }

        for (entry, completion) in batch.iter().zip(completions) {
            self.results
                .write(entry.worker, Reply::Completion(completion.into_first()));
        }

        for entry in &batch {
            if let Some(reply) = self.results.take_ready(entry.worker) {
                if entry.reply.send(reply).is_err() {
                    warn!(worker = entry.worker, "worker went away before its completion");
                }
            }
        }

        stats.batch_sizes.push(batch.len());
        stats.prompts += batch.len();
        stats.inference_ms += elapsed.as_millis() as u64;

        info!(
            batch = stats.batches(),
            size = batch.len(),
            latency_ms = elapsed.as_millis() as u64,
            "inference batch flushed"
        );

        Ok(())
    }
}
