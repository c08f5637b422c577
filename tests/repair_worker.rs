mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use common::*;
use mendloop::config::RunConfig;
use mendloop::coordinator::Coordinator;
use mendloop::executor::ExecutionBackend;
use mendloop::llm::InferenceBackend;
use mendloop::state::{
    Candidate, ExecutionReport, FailureKind, FailurePolicy, FailureRecord, RepairOutcome, RunStats,
    SampledInputs,
};
use mendloop::worker::RepairWorker;

fn run_one(
    candidate: Candidate,
    cfg: RunConfig,
    inference: Arc<dyn InferenceBackend>,
    exec: Arc<dyn ExecutionBackend>,
) -> (RepairOutcome, Arc<RunStats>) {
    let stats = Arc::new(RunStats::default());
    let coord = Coordinator::new(inference, exec, &cfg);
    let worker = RepairWorker::new(coord.register(), candidate, Arc::new(cfg), Arc::clone(&stats));
    let handle = thread::spawn(move || worker.run());
    coord.run().unwrap();
    (handle.join().unwrap(), stats)
}

/// Checker echoes the candidate back with an assertion; repair prompt `n`
/// answers `attempt-n`.
fn numbered_repairs() -> Arc<ScriptedInference> {
    let repairs = AtomicUsize::new(0);
    ScriptedInference::new(move |p| {
        if is_checker(p) {
            fenced("assert True\nprint(4)")
        } else {
            let n = repairs.fetch_add(1, Ordering::SeqCst) + 1;
            fenced(&format!("print('attempt-{n}')"))
        }
    })
}

#[test]
fn stops_at_first_passing_repair() {
    let problem = stdin_problem("q1");
    let cand = candidate(&problem, "print(4)", false, false, wrong_answer());

    let inference = numbered_repairs();
    let exec = ScriptedExec::new(|samples, src| {
        if src.contains("attempt-3") {
            ExecutionReport::pass(samples.len())
        } else if src.contains("assert True") {
            ExecutionReport::fail(vec![false], FailureRecord::RuntimeError {
                input: None,
                expected: None,
                detail: "AssertionError".into(),
            })
        } else {
            wa_report()
        }
    })
    .build();

    let (outcome, stats) = run_one(cand, fast_config(), inference.clone(), exec.clone());

    assert!(outcome.passed);
    assert_eq!(outcome.repair_attempts, 3);
    assert_eq!(outcome.code, "print('attempt-3')");
    assert!(outcome.checker_accepted);
    // one checker prompt plus three repairs, nothing after the pass
    assert_eq!(inference.prompts(), 4);
    assert_eq!(exec.graded().len(), 4);
    assert_eq!(stats.snapshot().checks_inserted, 1);
}

#[test]
fn exhaustion_keeps_last_code() {
    let problem = stdin_problem("q2");
    let cand = candidate(&problem, "print(4)", false, false, wrong_answer());

    let inference = numbered_repairs();
    let exec = ScriptedExec::new(|_, _| wa_report()).build();

    let cfg = RunConfig {
        repair_attempts: 4,
        ..fast_config()
    };
    let (outcome, _) = run_one(cand, cfg, inference.clone(), exec);

    assert!(!outcome.passed);
    assert_eq!(outcome.repair_attempts, 4);
    assert_eq!(outcome.code, "print('attempt-4')");
    // checker kept hitting wrong answers: three checker prompts, four repairs
    assert!(!outcome.checker_accepted);
    assert_eq!(inference.prompts(), 3 + 4);
}

#[test]
fn harness_errors_are_recovered_into_the_loop() {
    let problem = stdin_problem("q3");
    let cand = candidate(&problem, "print(4)", false, false, wrong_answer());

    let calls = AtomicUsize::new(0);
    let inference = numbered_repairs();
    let exec = ScriptedExec::new(move |samples, src| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n == 1 {
            panic!("sandbox exploded");
        }
        if src.contains("attempt-2") {
            ExecutionReport::pass(samples.len())
        } else {
            ExecutionReport::fail(vec![false], FailureRecord::CompilationError { detail: "x".into() })
        }
    })
    .build();

    let (outcome, _) = run_one(cand, fast_config(), inference, exec);

    assert!(outcome.passed, "worker survived the panicking backend");
    assert_eq!(outcome.repair_attempts, 2);
}

#[test]
fn empty_extraction_falls_back_to_prior_code() {
    let problem = stdin_problem("q4");
    let cand = candidate(&problem, "print(4)", false, false, wrong_answer());

    let inference = ScriptedInference::new(|_| "I cannot help with that.".into());
    let exec = ScriptedExec::new(|_, _| wa_report()).build();

    let cfg = RunConfig {
        checker_attempts: 1,
        repair_attempts: 2,
        extraction_attempts: 2,
        ..fast_config()
    };
    let (outcome, _) = run_one(cand, cfg, inference.clone(), exec.clone());

    assert_eq!(outcome.code, "print(4)");
    assert_eq!(inference.prompts(), (1 + 2) * 2);
    assert!(exec.graded().iter().all(|(_, src)| src == "print(4)"));
}

#[test]
fn unchanged_original_is_not_an_accepted_checker() {
    let problem = stdin_problem("q4b");
    let cand = candidate(&problem, "print(4)", false, false, wrong_answer());

    let inference = ScriptedInference::new(|p| {
        if is_checker(p) {
            "No changes needed.".into()
        } else {
            fenced("a, b = map(int, input().split())\nprint(a + b)")
        }
    });
    let exec = ScriptedExec::new(|samples, src| {
        if src.contains("a + b") {
            ExecutionReport::pass(samples.len())
        } else {
            ExecutionReport::fail(vec![false], FailureRecord::RuntimeError {
                input: None,
                expected: None,
                detail: "IndexError".into(),
            })
        }
    })
    .build();

    let cfg = RunConfig {
        checker_attempts: 1,
        extraction_attempts: 1,
        ..fast_config()
    };
    let (outcome, stats) = run_one(cand, cfg, inference, exec.clone());

    assert!(!outcome.checker_accepted);
    assert_eq!(stats.snapshot().checks_inserted, 0);
    assert_eq!(exec.graded()[0].1, "print(4)");
    assert!(outcome.passed);
}

#[test]
fn keep_original_reuses_base_failure() {
    let problem = stdin_problem("q5");
    let cand = candidate(&problem, "print(4)", false, false, wrong_answer());

    let inference = numbered_repairs();
    let exec = ScriptedExec::new(|_, src| {
        if src.contains("attempt") {
            ExecutionReport::fail(vec![false], FailureRecord::RuntimeError {
                input: Some("1 2".into()),
                expected: Some("3".into()),
                detail: format!("boom from {src}"),
            })
        } else {
            ExecutionReport::pass(1)
        }
    })
    .build();

    let cfg = RunConfig {
        repair_attempts: 3,
        public_failure_policy: FailurePolicy::KeepOriginal,
        ..fast_config()
    };
    let (_, _) = run_one(cand.clone(), cfg, inference.clone(), exec.clone());

    let repairs: Vec<_> = inference
        .batches()
        .into_iter()
        .flatten()
        .filter(is_repair)
        .collect();
    assert_eq!(repairs.len(), 3);
    assert!(repairs.iter().all(|p| p.user.contains("Generated Output: 4")));
    assert!(repairs.iter().all(|p| !p.user.contains("boom")));

    let inference = numbered_repairs();
    let cfg = RunConfig {
        repair_attempts: 3,
        public_failure_policy: FailurePolicy::ThreadLatest,
        ..fast_config()
    };
    let (_, _) = run_one(cand, cfg, inference.clone(), exec);

    let repairs: Vec<_> = inference
        .batches()
        .into_iter()
        .flatten()
        .filter(is_repair)
        .collect();
    assert!(repairs[1].user.contains("boom from print('attempt-1')"));
    assert!(repairs[2].user.contains("print('attempt-2')"));
}

#[test]
fn synthetic_tests_drive_repair_of_public_passers() {
    let problem = stdin_problem("q6");
    let cand = candidate(&problem, "print(3)", false, true, FailureRecord::None);

    let inference = ScriptedInference::new(|p| {
        if is_checker(p) {
            fenced("print(3)")
        } else if is_generator(p) {
            fenced("print(random.randint(1, 9), random.randint(1, 9))")
        } else {
            fenced("a, b = map(int, input().split())\nprint(a + b)")
        }
    });
    let exec = ScriptedExec::new(|samples, src| {
        if src.contains("a + b") {
            ExecutionReport::pass(samples.len())
        } else if samples.len() > 1 {
            ExecutionReport::fail(
                vec![false],
                FailureRecord::WrongAnswer {
                    input: "5 5".into(),
                    produced: "3".into(),
                    expected: String::new(),
                },
            )
        } else {
            ExecutionReport::pass(samples.len())
        }
    })
    .with_sampler(|_| SampledInputs {
        inputs: vec!["5 5".into(), "10 20".into()],
        clean: true,
    })
    .build();

    let (outcome, stats) = run_one(cand, fast_config(), inference.clone(), exec.clone());

    assert!(outcome.passed);
    assert_eq!(outcome.synthetic_tests, 2);
    assert_eq!(exec.sample_calls(), 1);

    let snap = stats.snapshot();
    assert_eq!(snap.testgen_exposed, 1);
    assert_eq!(snap.testgen_silent, 0);

    // checker on the public case, probe and repair on the merged three
    let graded = exec.graded();
    assert_eq!(graded[0].0, 1);
    assert!(graded[1..].iter().all(|(n, _)| *n == 3));

    let repair = inference
        .batches()
        .into_iter()
        .flatten()
        .find(is_repair)
        .unwrap();
    assert!(repair.user.contains("Input: 5 5"));
}

#[test]
fn silent_generator_falls_back_to_unknown_failure() {
    let problem = stdin_problem("q7");
    let cand = candidate(&problem, "print(3)", false, true, FailureRecord::None);

    let inference = ScriptedInference::new(|p| {
        if is_generator(p) {
            fenced("print(1)")
        } else {
            fenced("print(3)")
        }
    });
    let exec = ScriptedExec::new(|_, src| {
        if src.contains("fixed") {
            ExecutionReport::pass(1)
        } else {
            ExecutionReport::fail(vec![false], FailureRecord::unknown())
        }
    })
    .build();

    let cfg = RunConfig {
        testgen_attempts: 2,
        repair_attempts: 1,
        ..fast_config()
    };
    let (outcome, stats) = run_one(cand, cfg, inference.clone(), exec.clone());

    assert_eq!(exec.sample_calls(), 2, "generation retried once");
    assert_eq!(outcome.synthetic_tests, 0);
    assert_eq!(stats.snapshot().testgen_silent, 1);

    let repair = inference
        .batches()
        .into_iter()
        .flatten()
        .find(is_repair)
        .unwrap();
    assert!(repair.user.contains("Generated Output: Unknown"));
    assert_eq!(FailureRecord::unknown().kind(), FailureKind::WrongAnswer);
}

#[test]
fn graded_candidate_makes_no_requests() {
    let problem = stdin_problem("q8");
    let cand = candidate(&problem, "print(3)", true, true, FailureRecord::None);

    let inference = ScriptedInference::echo();
    let exec = ScriptedExec::new(|samples, _| ExecutionReport::pass(samples.len())).build();

    let (outcome, _) = run_one(cand, fast_config(), inference.clone(), exec.clone());

    assert_eq!(outcome.code, "print(3)");
    assert!(outcome.passed);
    assert_eq!(inference.prompts(), 0);
    assert_eq!(exec.calls(), 0);
}
