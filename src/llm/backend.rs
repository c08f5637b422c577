use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{LlmConfig, ProviderKind};
use crate::error::InferenceError;
use crate::llm::client::LlmClient;
use crate::llm::local::LocalCommand;
use crate::llm::prompt::LlmPrompt;

/// One completion per prompt. Some providers return several choices; only the
/// first is ever consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Completion {
    Single(String),
    Choices(Vec<String>),
}

impl Completion {
    pub fn first(&self) -> &str {
        match self {
            Completion::Single(s) => s,
            Completion::Choices(c) => c.first().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn into_first(self) -> String {
        match self {
            Completion::Single(s) => s,
            Completion::Choices(c) => c.into_iter().next().unwrap_or_default(),
        }
    }
}

impl From<String> for Completion {
    fn from(s: String) -> Self {
        Completion::Single(s)
    }
}

/// Batched text completion. The output has the same length and order as
/// `prompts`; an `Err` fails the whole batch.
pub trait InferenceBackend: Send + Sync {
    fn complete(&self, prompts: &[LlmPrompt]) -> Result<Vec<Completion>, InferenceError>;
}

#[derive(Clone)]
pub enum LlmBackend {
    Local { runner: LocalCommand },
    Remote { client: LlmClient },
}

impl LlmBackend {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self, InferenceError> {
        match cfg.provider {
            ProviderKind::Local => Ok(LlmBackend::Local {
                runner: LocalCommand::new(
                    cfg.command.clone(),
                    Duration::from_secs(cfg.request_timeout_secs),
                ),
            }),
            ProviderKind::OpenAI | ProviderKind::Anthropic => Ok(LlmBackend::Remote {
                client: LlmClient::from_config(cfg)?,
            }),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            LlmBackend::Local { runner } => format!("local:{}", runner.program()),
            LlmBackend::Remote { client } => {
                let cfg = client.config();
                format!("{:?}:{}", cfg.provider, cfg.model).to_lowercase()
            }
        }
    }
}

impl InferenceBackend for LlmBackend {
    fn complete(&self, prompts: &[LlmPrompt]) -> Result<Vec<Completion>, InferenceError> {
        match self {
            LlmBackend::Local { runner } => runner.complete_batch(prompts),
            LlmBackend::Remote { client } => client.complete_batch(prompts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_choice_is_used() {
        let c = Completion::Choices(vec!["a".into(), "b".into()]);
        assert_eq!(c.first(), "a");
        assert_eq!(Completion::Choices(vec![]).first(), "");
        assert_eq!(Completion::Single("x".into()).into_first(), "x");
    }

    #[test]
    fn untagged_deserialize() {
        let v: Vec<Completion> = serde_json::from_str(r#"["one", ["two", "three"]]"#).unwrap();
        assert_eq!(v[0].first(), "one");
        assert_eq!(v[1].first(), "two");
    }

    #[test]
    fn local_provider_needs_no_key() {
        let cfg = LlmConfig {
            provider: ProviderKind::Local,
            command: vec!["cat".into()],
            ..LlmConfig::default()
        };
        let backend = LlmBackend::from_config(&cfg).unwrap();
        assert_eq!(backend.describe(), "local:cat");
    }
}
