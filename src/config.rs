use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::state::FailurePolicy;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub checker_attempts: usize,
    pub testgen_attempts: usize,
    pub repair_attempts: usize,
    pub extraction_attempts: usize,

    pub generator_runs: usize,
    pub generator_timeout_ms: u64,

    /// Per test case.
    pub exec_timeout_secs: u64,
    pub pool_size: usize,
    pub poll_interval_ms: u64,

    pub public_failure_policy: FailurePolicy,
    pub synthetic_failure_policy: FailurePolicy,

    pub python: String,

    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub parallel_requests: usize,
    /// Program and arguments for the `local` provider; the prompt goes to stdin.
    pub command: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            checker_attempts: 3,
            testgen_attempts: 3,
            repair_attempts: 5,
            extraction_attempts: 3,
            generator_runs: 50,
            generator_timeout_ms: 1_000,
            exec_timeout_secs: 6,
            pool_size: 12,
            poll_interval_ms: 100,
            public_failure_policy: FailurePolicy::KeepOriginal,
            synthetic_failure_policy: FailurePolicy::ThreadLatest,
            python: "python3".to_string(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAI,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.2,
            request_timeout_secs: 300,
            parallel_requests: 16,
            command: vec!["ollama".to_string(), "run".to_string(), "qwen2.5-coder".to_string()],
        }
    }
}

impl RunConfig {
    /// Defaults, then the file at `path` (or the user config file when `path`
    /// is `None` and one exists).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let cfg = match path {
            Some(p) => read_config(p)?,
            None => {
                let default_path = config_path();
                if default_path.exists() {
                    read_config(&default_path)?
                } else {
                    RunConfig::default()
                }
            }
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("checker_attempts", self.checker_attempts),
            ("testgen_attempts", self.testgen_attempts),
            ("repair_attempts", self.repair_attempts),
            ("extraction_attempts", self.extraction_attempts),
            ("generator_runs", self.generator_runs),
            ("pool_size", self.pool_size),
            ("llm.parallel_requests", self.llm.parallel_requests),
        ];

        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be at least 1".into()));
        }

        if self.llm.provider == ProviderKind::Local && self.llm.command.is_empty() {
            return Err(ConfigError::Invalid(
                "llm.command is required for the local provider".into(),
            ));
        }

        Ok(())
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_millis(self.generator_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

pub fn config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("mendloop");
    dir.push("config.toml");
    dir
}

fn read_config(path: &Path) -> Result<RunConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "repair_attempts = 2\nsynthetic_failure_policy = \"keep_original\"\n\n[llm]\nprovider = \"anthropic\"\nmodel = \"claude-x\""
        )
        .unwrap();

        let cfg = RunConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.repair_attempts, 2);
        assert_eq!(cfg.checker_attempts, 3);
        assert_eq!(cfg.generator_runs, 50);
        assert_eq!(cfg.synthetic_failure_policy, FailurePolicy::KeepOriginal);
        assert_eq!(cfg.llm.provider, ProviderKind::Anthropic);
        assert_eq!(cfg.llm.max_tokens, 4096);
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let cfg = RunConfig {
            pool_size: 0,
            ..RunConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "repair_attempts = \"many\"").unwrap();

        match RunConfig::load(Some(file.path())) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
