//! Worker → coordinator request plumbing.
//!
//! Workers push tagged requests into one unbounded channel and then park on a
//! private one-shot reply channel. Pushing never blocks.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use super::roster::WorkerRoster;
use crate::error::LinkError;
use crate::llm::prompt::LlmPrompt;
use crate::state::{ExecutionReport, RepairOutcome, SampledInputs, TestSampleSet};

pub type WorkerId = usize;

#[derive(Debug, Clone)]
pub enum ExecutionJob {
    Grade {
        samples: Arc<TestSampleSet>,
        source: String,
        timeout: Duration,
    },
    SampleInputs {
        script: String,
        runs: usize,
        timeout: Duration,
    },
}

#[derive(Debug, Clone)]
pub enum Payload {
    Inference(LlmPrompt),
    Execution(ExecutionJob),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Completion(String),
    Execution(ExecutionReport),
    Samples(SampledInputs),
}

/// Immutable once sent.
#[derive(Debug)]
pub struct Request {
    pub worker: WorkerId,
    pub payload: Payload,
    pub reply: Sender<Reply>,
}

#[derive(Debug)]
pub enum Envelope {
    Request(Request),
    /// A worker reached `Done`; lets the coordinator re-check the batch quorum now.
    Retired(WorkerId),
    /// An asynchronous execution finished; lets the coordinator sweep now.
    Wake,
}

/// A worker's only handle on the coordinator. Dropping it without calling
/// `retire` still retires the worker, so a panicking worker cannot stall the
/// batch quorum.
pub struct WorkerLink {
    id: WorkerId,
    mailbox: Sender<Envelope>,
    roster: Arc<WorkerRoster>,
    retired: bool,
}

impl WorkerLink {
    pub(crate) fn new(id: WorkerId, mailbox: Sender<Envelope>, roster: Arc<WorkerRoster>) -> Self {
        Self {
            id,
            mailbox,
            roster,
            retired: false,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    fn submit(&self, payload: Payload) -> Result<Reply, LinkError> {
        let (reply, signal): (Sender<Reply>, Receiver<Reply>) = bounded(1);

        self.mailbox
            .send(Envelope::Request(Request {
                worker: self.id,
                payload,
                reply,
            }))
            .map_err(|_| LinkError::MailboxClosed)?;

        signal.recv().map_err(|_| LinkError::ReplyDropped(self.id))
    }

    /// Blocks until the batch holding `prompt` has been flushed.
    pub fn infer(&self, prompt: LlmPrompt) -> Result<String, LinkError> {
        match self.submit(Payload::Inference(prompt))? {
            Reply::Completion(text) => Ok(text),
            _ => Err(LinkError::UnexpectedReply(self.id)),
        }
    }

    pub fn execute(
        &self,
        samples: Arc<TestSampleSet>,
        source: String,
        timeout: Duration,
    ) -> Result<ExecutionReport, LinkError> {
        let job = ExecutionJob::Grade {
            samples,
            source,
            timeout,
        };
        match self.submit(Payload::Execution(job))? {
            Reply::Execution(report) => Ok(report),
            _ => Err(LinkError::UnexpectedReply(self.id)),
        }
    }

    pub fn sample_inputs(
        &self,
        script: String,
        runs: usize,
        timeout: Duration,
    ) -> Result<SampledInputs, LinkError> {
        let job = ExecutionJob::SampleInputs {
            script,
            runs,
            timeout,
        };
        match self.submit(Payload::Execution(job))? {
            Reply::Samples(sampled) => Ok(sampled),
            _ => Err(LinkError::UnexpectedReply(self.id)),
        }
    }

    /// Publishes the final outcome and leaves the active set.
    pub fn retire(mut self, outcome: RepairOutcome) {
        self.finish(Some(outcome));
    }

    fn finish(&mut self, outcome: Option<RepairOutcome>) {
        if self.retired {
            return;
        }
        self.retired = true;
        self.roster.retire(self.id, outcome);
        let _ = self.mailbox.send(Envelope::Retired(self.id));
    }
}

impl Drop for WorkerLink {
    fn drop(&mut self) {
        self.finish(None);
    }
}
