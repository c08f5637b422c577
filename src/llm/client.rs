// src/llm/client.rs

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, trace, warn};

use crate::config::{LlmConfig, ProviderKind};
use crate::error::InferenceError;
use crate::llm::backend::Completion;
use crate::llm::prompt::LlmPrompt;

const PROMPT_ABI_VERSION: &str = "v1-mendloop-repair";
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_STEP_MS: u64 = 350;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct LlmRunResult {
    pub text: String,
    pub prompt_hash: String,
    pub cached_tokens: Option<u64>,
}

#[derive(Clone)]
pub struct LlmClient {
    cfg: ProviderConfig,
    http: reqwest::blocking::Client,
    pool: Arc<ThreadPool>,
}

impl LlmClient {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self, InferenceError> {
        let (provider, key_var) = match cfg.provider {
            ProviderKind::OpenAI => (Provider::OpenAI, "OPENAI_API_KEY"),
            ProviderKind::Anthropic => (Provider::Anthropic, "ANTHROPIC_API_KEY"),
            ProviderKind::Local => {
                return Err(InferenceError::Transport(
                    "local provider has no HTTP client".into(),
                ))
            }
        };

        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(key_var).ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or(InferenceError::MissingKey(key_var))?;

        let provider_cfg = ProviderConfig {
            provider,
            model: cfg.model.clone(),
            api_key,
            base_url: cfg.base_url.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        };

        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.parallel_requests.max(1))
            .thread_name(|i| format!("llm-{i}"))
            .build()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        Ok(Self {
            cfg: provider_cfg,
            http,
            pool: Arc::new(pool),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.cfg
    }

    /// Execute one LLM request
    pub fn run(&self, prompt: &LlmPrompt) -> Result<LlmRunResult, InferenceError> {
        let prompt_hash = hash_prompt(prompt);
        let (url, headers, body) = build_request(&self.cfg, prompt, &prompt_hash);

        let mut req = self.http.post(url).json(&body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;
        let status = resp.status();
        let json: Value = resp
            .json()
            .map_err(|e| InferenceError::Parse(e.to_string()))?;

        if !status.is_success() {
            return Err(InferenceError::Provider {
                status: status.as_u16(),
                body: json.to_string(),
            });
        }

        let cached_tokens = json
            .pointer("/usage/prompt_tokens_details/cached_tokens")
            .or_else(|| json.pointer("/usage/cache_read_input_tokens"))
            .and_then(|v| v.as_u64());

        let text = extract_text(&self.cfg.provider, &json)?;

        Ok(LlmRunResult {
            text,
            prompt_hash,
            cached_tokens,
        })
    }

    fn run_with_retry(&self, prompt: &LlmPrompt) -> Result<LlmRunResult, InferenceError> {
        let mut attempt = 1;
        loop {
            match self.run(prompt) {
                Ok(r) => return Ok(r),
                Err(e) if attempt < MAX_ATTEMPTS && retryable(&e) => {
                    warn!(attempt, error = %e, "inference request failed, retrying");
                    thread::sleep(Duration::from_millis(BACKOFF_STEP_MS * attempt as u64));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends every prompt concurrently on the client's pool. Order is kept;
    /// a prompt that still fails after retries becomes an empty completion.
    pub fn complete_batch(&self, prompts: &[LlmPrompt]) -> Result<Vec<Completion>, InferenceError> {
        let started = Instant::now();

        let results: Vec<Result<LlmRunResult, InferenceError>> = self
            .pool
            .install(|| prompts.par_iter().map(|p| self.run_with_retry(p)).collect());

        let mut failures = 0usize;
        let mut last_error = None;
        let mut out = Vec::with_capacity(results.len());

        for (i, r) in results.into_iter().enumerate() {
            match r {
                Ok(r) => {
                    trace!(index = i, hash = %r.prompt_hash, cached = ?r.cached_tokens, "completion");
                    out.push(Completion::Single(r.text));
                }
                Err(e) => {
                    warn!(index = i, error = %e, "prompt failed after retries");
                    failures += 1;
                    last_error = Some(e);
                    out.push(Completion::Single(String::new()));
                }
            }
        }

        debug!(
            prompts = prompts.len(),
            failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "remote batch complete"
        );

        if !prompts.is_empty() && failures == prompts.len() {
            return Err(match last_error {
                Some(e @ InferenceError::MissingKey(_)) => e,
                Some(e) if prompts.len() == 1 => e,
                _ => InferenceError::Exhausted(prompts.len()),
            });
        }

        Ok(out)
    }
}

fn retryable(e: &InferenceError) -> bool {
    match e {
        InferenceError::Transport(_) => true,
        InferenceError::Provider { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

fn hash_prompt(prompt: &LlmPrompt) -> String {
    let mut h = Sha256::new();
    h.update(PROMPT_ABI_VERSION.as_bytes());
    h.update(prompt.system.as_bytes());
    h.update(prompt.user.as_bytes());
    hex::encode(h.finalize())
}

fn build_request(
    cfg: &ProviderConfig,
    prompt: &LlmPrompt,
    prompt_hash: &str,
) -> (String, Vec<(&'static str, String)>, Value) {
    match cfg.provider {
        Provider::OpenAI => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "messages": [
                    { "role": "system", "content": prompt.system },
                    { "role": "user", "content": prompt.user }
                ],
                "max_tokens": cfg.max_tokens,
                "temperature": cfg.temperature,
                "prompt_cache_key": prompt_hash,
            });

            (
                url,
                vec![("Authorization", format!("Bearer {}", cfg.api_key))],
                body,
            )
        }

        Provider::Anthropic => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1/messages".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "max_tokens": cfg.max_tokens,
                "temperature": cfg.temperature,
                "system": prompt.system,
                "messages": [
                    { "role": "user", "content": prompt.user }
                ]
            });

            (
                url,
                vec![
                    ("x-api-key", cfg.api_key.clone()),
                    ("anthropic-version", "2023-06-01".into()),
                ],
                body,
            )
        }
    }
}

fn extract_text(provider: &Provider, v: &Value) -> Result<String, InferenceError> {
    match provider {
        Provider::OpenAI => v
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_owned)
            .or_else(|| {
                // responses-style payloads from compatible gateways
                v.get("output")?.as_array()?.iter().find_map(|item| {
                    item.get("content")?
                        .as_array()?
                        .iter()
                        .find_map(|c| c.get("text")?.as_str())
                        .map(str::to_owned)
                })
            })
            .ok_or_else(|| InferenceError::Parse("OpenAI response parse failure".into())),

        Provider::Anthropic => {
            let blocks = v
                .get("content")
                .and_then(|c| c.as_array())
                .ok_or_else(|| InferenceError::Parse("Anthropic response parse failure".into()))?;

            let text: String = blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text")?.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            if text.is_empty() {
                Err(InferenceError::Parse("Anthropic response had no text block".into()))
            } else {
                Ok(text)
            }
        }
    }
}
