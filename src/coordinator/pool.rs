use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error};

use super::mailbox::{Envelope, ExecutionJob, Reply, WorkerId};
use super::results::ResultTable;
use crate::executor::{run_guarded, sample_guarded, ExecutionBackend};

struct PoolJob {
    worker: WorkerId,
    job: ExecutionJob,
}

/// Fixed number of execution slots. Completed jobs land in the result table;
/// the coordinator is nudged but still discovers completions by sweeping.
pub struct ExecPool {
    jobs: Option<Sender<PoolJob>>,
    handles: Vec<JoinHandle<()>>,
}

impl ExecPool {
    pub fn new(
        size: usize,
        backend: Arc<dyn ExecutionBackend>,
        results: Arc<ResultTable>,
        wake: Sender<Envelope>,
    ) -> std::io::Result<Self> {
        let (tx, rx): (Sender<PoolJob>, Receiver<PoolJob>) = unbounded();

        let mut handles = Vec::with_capacity(size);
        for slot in 0..size.max(1) {
            let rx = rx.clone();
            let backend = Arc::clone(&backend);
            let results = Arc::clone(&results);
            let wake = wake.clone();

            let handle = thread::Builder::new()
                .name(format!("exec-{slot}"))
                .spawn(move || {
                    for PoolJob { worker, job } in rx.iter() {
                        let reply = match job {
                            ExecutionJob::Grade {
                                samples,
                                source,
                                timeout,
                            } => Reply::Execution(run_guarded(
                                backend.as_ref(),
                                &samples,
                                &source,
                                timeout,
                            )),
                            ExecutionJob::SampleInputs {
                                script,
                                runs,
                                timeout,
                            } => Reply::Samples(sample_guarded(
                                backend.as_ref(),
                                &script,
                                runs,
                                timeout,
                            )),
                        };

                        debug!(worker, slot, "execution finished");
                        results.write(worker, reply);
                        let _ = wake.send(Envelope::Wake);
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self {
            jobs: Some(tx),
            handles,
        })
    }

    pub fn submit(&self, worker: WorkerId, job: ExecutionJob) {
        if let Some(jobs) = &self.jobs {
            if jobs.send(PoolJob { worker, job }).is_err() {
                error!(worker, "execution pool is gone");
            }
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stops accepting jobs and waits for in-flight ones.
    pub fn shutdown(&mut self) {
        self.jobs.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ExecPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
