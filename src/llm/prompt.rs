use serde::Serialize;

use crate::state::{FailureRecord, Platform};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LlmPrompt {
    pub system: String,
    pub user: String,
}

/// Everything a phase prompt may draw on.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub question: &'a str,
    pub platform: Platform,
    pub code: &'a str,
    pub failure: &'a FailureRecord,
    pub example_input: Option<&'a str>,
}

/* ============================================================
   Checker extension
   ============================================================ */

pub fn checker_prompt(ctx: &PromptContext<'_>) -> LlmPrompt {
    let system = r#"
You instrument programs with property-based verification.

Rules:
- Insert checks before the program emits its result
- If every property holds, output exactly what the original program outputs
- If any property fails, raise AssertionError
- Do NOT fix bugs or change the solving logic
- Derive properties from the problem statement: invariants, post-conditions, relationships
- Reply with the full instrumented program in one ```python fenced block
"#
    .trim()
    .to_string();

    let mut user = String::new();
    push_problem(&mut user, ctx);
    push_code(&mut user, "ORIGINAL PROGRAM", ctx.code);
    push_failure(
        &mut user,
        "CONTEXT FROM A PREVIOUS RUN (for understanding weaknesses, do not just fix this case)",
        ctx.failure,
    );
    user.push_str("Return the instrumented program.\n");

    LlmPrompt { system, user }
}

/* ============================================================
   Test input generator
   ============================================================ */

pub fn generator_prompt(ctx: &PromptContext<'_>) -> LlmPrompt {
    let system = r#"
You write Python scripts that print one random, valid input for a programming problem.

Rules:
- Seed with the clock: random.seed(int(time.time() * 1000))
- Respect every constraint in the problem statement
- Prefer small and medium sizes; include edge values sometimes
- Print exactly one input, formatted exactly like the example
- Reply with the script in one ```python fenced block
"#
    .trim()
    .to_string();

    let mut user = String::new();
    push_problem(&mut user, ctx);

    let format_hint = match ctx.platform {
        Platform::LeetCode => {
            "Input format: one JSON value per line, one line per function argument.\n"
        }
        Platform::Codeforces | Platform::AtCoder => {
            "Input format: exactly what the program reads from standard input.\n"
        }
        Platform::HumanEval => {
            "Input format: a single line `assert <entry_point>(<random args>) is not None`.\n"
        }
    };
    user.push_str(&format!("PLATFORM\n{}\n{}\n", ctx.platform, format_hint));

    if let Some(example) = ctx.example_input {
        push_code(&mut user, "EXAMPLE INPUT", example);
    }
    push_code(&mut user, "PROGRAM THAT WILL CONSUME THE INPUT", ctx.code);
    user.push_str("Return the generator script.\n");

    LlmPrompt { system, user }
}

/* ============================================================
   Repair
   ============================================================ */

pub fn repair_prompt(ctx: &PromptContext<'_>) -> LlmPrompt {
    let system = r#"
You repair incorrect programs for competitive programming problems.

Rules:
- Keep the program's interface: same input format, same function signature
- Keep any assertions that encode properties of the problem; fix the logic they expose
- Remove debugging output
- Reply with the complete corrected program in one ```python fenced block
"#
    .trim()
    .to_string();

    let mut user = String::new();
    push_problem(&mut user, ctx);
    push_code(&mut user, "CURRENT PROGRAM", ctx.code);
    push_failure(&mut user, "OBSERVED FAILURE", ctx.failure);
    user.push_str("Return the corrected program.\n");

    LlmPrompt { system, user }
}

/* ============================================================
   Shared sections
   ============================================================ */

fn push_problem(out: &mut String, ctx: &PromptContext<'_>) {
    out.push_str("PROBLEM\n");
    out.push_str(ctx.question.trim());
    out.push_str("\n\n");
}

fn push_code(out: &mut String, title: &str, code: &str) {
    out.push_str(title);
    out.push_str("\n```python\n");
    out.push_str(code.trim_end());
    out.push_str("\n```\n\n");
}

fn push_failure(out: &mut String, title: &str, failure: &FailureRecord) {
    let Some(text) = describe_failure(failure) else {
        return;
    };
    out.push_str(title);
    out.push('\n');
    out.push_str(&text);
    out.push_str("\n\n");
}

/// Human-readable failure context; `None` when there is nothing to report.
pub fn describe_failure(failure: &FailureRecord) -> Option<String> {
    let text = match failure {
        FailureRecord::None => return None,
        FailureRecord::CompilationError { detail } => {
            format!("The program failed to compile.\nDetails: {detail}")
        }
        FailureRecord::WrongAnswer {
            input,
            produced,
            expected,
        } => format!(
            "The program produced a wrong answer.\nInput: {input}\nGenerated Output: {produced}\nExpected Output: {expected}"
        ),
        FailureRecord::TimeLimitExceeded {
            detail,
            input,
            expected,
        } => format!(
            "The program exceeded the time limit.\nDetails: {detail}\nInput: {input}\nExpected Output: {expected}"
        ),
        FailureRecord::RuntimeError {
            input: Some(input),
            expected,
            detail,
        } => format!(
            "The program raised a runtime error.\nInput: {input}\nExpected Output: {}\nError Details: {detail}",
            expected.as_deref().unwrap_or("N/A")
        ),
        FailureRecord::RuntimeError {
            input: None,
            detail,
            ..
        } => format!("The program raised a runtime error.\nError Message: {detail}"),
        FailureRecord::HarnessError { detail } => {
            format!("The test harness itself failed while running the program.\nError: {detail}")
        }
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(failure: &'a FailureRecord) -> PromptContext<'a> {
        PromptContext {
            question: "Sum two numbers.",
            platform: Platform::AtCoder,
            code: "print(sum(map(int, input().split())))",
            failure,
            example_input: Some("1 2"),
        }
    }

    #[test]
    fn repair_prompt_carries_failure_context() {
        let failure = FailureRecord::WrongAnswer {
            input: "1 2".into(),
            produced: "4".into(),
            expected: "3".into(),
        };
        let p = repair_prompt(&ctx(&failure));
        assert!(p.user.contains("Generated Output: 4"));
        assert!(p.user.contains("CURRENT PROGRAM"));
    }

    #[test]
    fn checker_prompt_omits_empty_failure() {
        let p = checker_prompt(&ctx(&FailureRecord::None));
        assert!(!p.user.contains("PREVIOUS RUN"));
        assert!(p.system.contains("AssertionError"));
    }

    #[test]
    fn generator_prompt_includes_example() {
        let p = generator_prompt(&ctx(&FailureRecord::None));
        assert!(p.user.contains("EXAMPLE INPUT\n```python\n1 2\n```"));
    }
}
