use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::InferenceError;
use crate::executor::process::{run_command_with_timeout, truncate_tail};
use crate::llm::backend::Completion;
use crate::llm::prompt::LlmPrompt;

/// Runs a local model command once per prompt: prompt on stdin, completion on
/// stdout. Prompts in a batch run one after another.
#[derive(Debug, Clone)]
pub struct LocalCommand {
    command: Vec<String>,
    timeout: Duration,
}

impl LocalCommand {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }

    pub fn run(&self, prompt: &LlmPrompt) -> Result<String, InferenceError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| InferenceError::Local("empty command".into()))?;

        let input = format!("{}\n\n{}", prompt.system, prompt.user);

        let mut cmd = Command::new(program);
        cmd.args(args);

        let out = run_command_with_timeout(&mut cmd, Some(&input), self.timeout)
            .map_err(|e| InferenceError::Local(e.to_string()))?;

        if out.timed_out {
            return Err(InferenceError::Local(format!(
                "{program} timed out after {}s",
                self.timeout.as_secs()
            )));
        }

        if !out.success() {
            return Err(InferenceError::Local(truncate_tail(out.stderr.trim(), 2_000)));
        }

        Ok(out.stdout.trim().to_string())
    }

    /// A failing prompt yields an empty completion; a batch where nothing
    /// succeeded is an error.
    pub fn complete_batch(&self, prompts: &[LlmPrompt]) -> Result<Vec<Completion>, InferenceError> {
        let mut out = Vec::with_capacity(prompts.len());
        let mut failures = 0usize;
        let mut last_error = None;

        for (i, prompt) in prompts.iter().enumerate() {
            match self.run(prompt) {
                Ok(text) => {
                    debug!(index = i, chars = text.len(), "local completion");
                    out.push(Completion::Single(text));
                }
                Err(e) => {
                    warn!(index = i, error = %e, "local completion failed");
                    failures += 1;
                    last_error = Some(e);
                    out.push(Completion::Single(String::new()));
                }
            }
        }

        if !prompts.is_empty() && failures == prompts.len() {
            return Err(last_error.unwrap_or(InferenceError::Exhausted(prompts.len())));
        }

        Ok(out)
    }
}
