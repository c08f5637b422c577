//! Execution backends: the contract the coordinator's pool calls into, and the
//! guard that keeps backend faults from escaping it.

pub mod process;
pub mod sandbox;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tracing::warn;

use crate::error::ExecError;
use crate::state::{ExecutionReport, SampledInputs, TestSampleSet};

pub use sandbox::PythonSandbox;

/// Runs untrusted candidate code. Implementations must be callable from many
/// pool threads at once; each call is isolated and individually time-boxed.
pub trait ExecutionBackend: Send + Sync {
    /// Grades `source` against `samples`, `timeout` applying to each case.
    fn run(
        &self,
        samples: &TestSampleSet,
        source: &str,
        timeout: Duration,
    ) -> Result<ExecutionReport, ExecError>;

    /// Runs a generator script up to `runs` times and collects its stdout.
    fn sample_inputs(
        &self,
        script: &str,
        runs: usize,
        timeout: Duration,
    ) -> Result<SampledInputs, ExecError>;
}

/// `run` with every fault folded into a harness failure record.
pub fn run_guarded(
    backend: &dyn ExecutionBackend,
    samples: &TestSampleSet,
    source: &str,
    timeout: Duration,
) -> ExecutionReport {
    match catch_unwind(AssertUnwindSafe(|| backend.run(samples, source, timeout))) {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            warn!(error = %e, "execution backend fault");
            ExecutionReport::harness(e.to_string())
        }
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            warn!(%detail, "execution backend panicked");
            ExecutionReport::harness(format!("execution backend panicked: {detail}"))
        }
    }
}

/// `sample_inputs` with faults folded into an unclean, empty result.
pub fn sample_guarded(
    backend: &dyn ExecutionBackend,
    script: &str,
    runs: usize,
    timeout: Duration,
) -> SampledInputs {
    match catch_unwind(AssertUnwindSafe(|| backend.sample_inputs(script, runs, timeout))) {
        Ok(Ok(sampled)) => sampled,
        Ok(Err(e)) => {
            warn!(error = %e, "generator run fault");
            SampledInputs::default()
        }
        Err(panic) => {
            warn!(detail = %panic_message(panic.as_ref()), "generator run panicked");
            SampledInputs::default()
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FailureKind, Platform};

    struct Faulty {
        panic: bool,
    }

    impl ExecutionBackend for Faulty {
        fn run(&self, _: &TestSampleSet, _: &str, _: Duration) -> Result<ExecutionReport, ExecError> {
            if self.panic {
                panic!("sandbox exploded");
            }
            Err(ExecError::Harness("docker daemon unreachable".into()))
        }

        fn sample_inputs(&self, _: &str, _: usize, _: Duration) -> Result<SampledInputs, ExecError> {
            Err(ExecError::Harness("no interpreter".into()))
        }
    }

    fn samples() -> TestSampleSet {
        TestSampleSet::new(Vec::new(), None, Platform::AtCoder)
    }

    #[test]
    fn backend_error_becomes_harness_record() {
        let report = run_guarded(&Faulty { panic: false }, &samples(), "print(1)", Duration::from_secs(1));
        assert_eq!(report.failure.kind(), FailureKind::HarnessError);
        assert!(!report.passed());
    }

    #[test]
    fn backend_panic_becomes_harness_record() {
        let report = run_guarded(&Faulty { panic: true }, &samples(), "print(1)", Duration::from_secs(1));
        match report.failure {
            crate::state::FailureRecord::HarnessError { detail } => {
                assert!(detail.contains("sandbox exploded"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sampling_fault_is_empty_and_unclean() {
        let sampled = sample_guarded(&Faulty { panic: false }, "print(1)", 5, Duration::from_secs(1));
        assert!(sampled.inputs.is_empty());
        assert!(!sampled.clean);
    }
}
