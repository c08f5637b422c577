use std::path::PathBuf;

use thiserror::Error;

/// Faults raised by an inference backend for a whole batch.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("could not parse provider response: {0}")]
    Parse(String),

    #[error("backend returned {got} completions for {expected} prompts")]
    Shape { expected: usize, got: usize },

    #[error("every prompt in a batch of {0} failed")]
    Exhausted(usize),

    #[error("local inference command failed: {0}")]
    Local(String),

    #[error("missing API key for provider {0}")]
    MissingKey(&'static str),
}

/// Faults inside an execution backend. Never crosses the pool boundary:
/// `executor::run_guarded` turns it into a harness failure record.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sandbox io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("harness fault: {0}")]
    Harness(String),
}

/// The coordinator hung up while a worker was parked on a request.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("coordinator mailbox closed")]
    MailboxClosed,

    #[error("coordinator dropped the reply for worker {0}")]
    ReplyDropped(usize),

    #[error("worker {0} received a reply of the wrong kind")]
    UnexpectedReply(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("failed to read benchmark file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse benchmark file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("problem {question_id}: {reason}")]
    Malformed { question_id: String, reason: String },
}

/// Run-level failure. Only inference outages stop a run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("batched inference failed: {0}")]
    Inference(#[from] InferenceError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to write report {path}: {reason}")]
    Report { path: PathBuf, reason: String },
}
