//! LLM agent caller - invokes specialists over an HTTP chat API.
//!
//! Two wire formats are supported: the Anthropic Messages API (also served
//! by several compatible gateways) and the OpenAI-style chat completions
//! API. `LlmAgent` wraps a specialist definition and exposes it to the
//! workflow engine as an async `execute` entrypoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::agent::AsyncEntrypoint;
use crate::workflow::specialist::SpecialistDef;

/// Configuration for one call to an LLM endpoint.
#[derive(Debug, Clone)]
pub struct AgentCallConfig {
    /// Adapter type: "anthropic", "openai"
    pub adapter: String,
    /// API base URL
    pub base_url: String,
    /// API key / auth token
    pub api_key: String,
    /// Model ID
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub system_prompt: String,
}

impl Default for AgentCallConfig {
    fn default() -> Self {
        Self {
            adapter: "anthropic".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            api_key: String::new(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            temperature: None,
            system_prompt: String::new(),
        }
    }
}

/// Response from an agent call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// The agent's text response
    pub content: String,
    /// Model used
    pub model: String,
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageInfo {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Thin HTTP client shared by every LLM-backed agent.
#[derive(Clone)]
pub struct LlmCaller {
    client: reqwest::Client,
}

impl Default for LlmCaller {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmCaller {
    pub fn new() -> Self {
        // Per-phase timeouts are enforced by the executor; this is only a backstop.
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(600))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Call an LLM with the given configuration and user prompt.
    pub async fn call(
        &self,
        config: &AgentCallConfig,
        user_prompt: &str,
    ) -> Result<AgentResponse, String> {
        match config.adapter.as_str() {
            "anthropic" | "claude" => self.call_anthropic_compatible(config, user_prompt).await,
            "openai" | "opencode" => self.call_openai_compatible(config, user_prompt).await,
            other => Err(format!("Unknown adapter type: '{}'", other)),
        }
    }

    /// POST {base_url}/v1/messages
    async fn call_anthropic_compatible(
        &self,
        config: &AgentCallConfig,
        user_prompt: &str,
    ) -> Result<AgentResponse, String> {
        let url = format!("{}/v1/messages", config.base_url.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "messages": [{ "role": "user", "content": user_prompt }]
        });
        if !config.system_prompt.is_empty() {
            body["system"] = Value::String(config.system_prompt.clone());
        }
        if let Some(temp) = config.temperature {
            body["temperature"] = Value::from(temp);
        }

        tracing::info!(url = %url, model = %config.model, "[LlmCaller] Calling Anthropic API");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        let json = read_json(response).await?;

        let content = json
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let usage = json.get("usage").map(|u| UsageInfo {
            input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()),
            output_tokens: u.get("output_tokens").and_then(|v| v.as_u64()),
        });

        Ok(AgentResponse {
            content,
            model: response_model(&json, config),
            usage,
        })
    }

    /// POST {base_url}/chat/completions
    async fn call_openai_compatible(
        &self,
        config: &AgentCallConfig,
        user_prompt: &str,
    ) -> Result<AgentResponse, String> {
        let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        let mut messages = vec![];
        if !config.system_prompt.is_empty() {
            messages.push(serde_json::json!({ "role": "system", "content": config.system_prompt }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": user_prompt }));

        let mut body = serde_json::json!({ "model": config.model, "messages": messages });
        if let Some(temp) = config.temperature {
            body["temperature"] = Value::from(temp);
        }

        tracing::info!(url = %url, model = %config.model, "[LlmCaller] Calling chat completions API");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", config.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        let json = read_json(response).await?;

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        let usage = json.get("usage").map(|u| UsageInfo {
            input_tokens: u
                .get("prompt_tokens")
                .or_else(|| u.get("input_tokens"))
                .and_then(|v| v.as_u64()),
            output_tokens: u
                .get("completion_tokens")
                .or_else(|| u.get("output_tokens"))
                .and_then(|v| v.as_u64()),
        });

        Ok(AgentResponse {
            content,
            model: response_model(&json, config),
            usage,
        })
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, String> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| format!("Failed to read response body: {}", e))?;
    if !status.is_success() {
        return Err(format!("API returned {}: {}", status, text));
    }
    serde_json::from_str(&text).map_err(|e| format!("Failed to parse response JSON: {}", e))
}

fn response_model(json: &Value, config: &AgentCallConfig) -> String {
    json.get("model")
        .and_then(|m| m.as_str())
        .unwrap_or(&config.model)
        .to_string()
}

/// A specialist exposed as a workflow agent.
pub struct LlmAgent {
    specialist: SpecialistDef,
    caller: LlmCaller,
}

impl LlmAgent {
    pub fn new(specialist: SpecialistDef, caller: LlmCaller) -> Self {
        Self { specialist, caller }
    }

    /// Resolve endpoint, key and model: specialist settings first, then env.
    pub fn call_config(&self) -> Result<AgentCallConfig, String> {
        let spec = &self.specialist;
        let adapter = spec
            .default_adapter
            .clone()
            .unwrap_or_else(|| "anthropic".to_string());

        let base_url = spec
            .metadata
            .get("base_url")
            .map(|u| resolve_env_vars(u))
            .unwrap_or_else(|| match adapter.as_str() {
                "openai" | "opencode" => std::env::var("OPENCODE_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                _ => std::env::var("ANTHROPIC_BASE_URL")
                    .unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
            });

        let api_key = select_api_key(&adapter, |name| std::env::var(name).ok())
            .ok_or_else(|| {
                format!(
                    "No API key found for adapter '{}'. Set {}",
                    adapter,
                    api_key_vars(&adapter).join(" or ")
                )
            })?;

        let model = spec
            .default_model
            .as_ref()
            .map(|m| resolve_env_vars(m))
            .or_else(|| std::env::var("ANTHROPIC_MODEL").ok())
            .unwrap_or_else(|| AgentCallConfig::default().model);

        Ok(AgentCallConfig {
            adapter,
            base_url,
            api_key,
            model,
            system_prompt: spec.system_prompt.clone(),
            ..AgentCallConfig::default()
        })
    }

    /// Render the phase input as the user prompt.
    pub fn build_user_prompt(&self, input: &Value, phase_name: Option<&str>) -> String {
        let mut prompt = String::new();
        if let Some(phase) = phase_name {
            prompt.push_str(&format!("## Phase: {}\n\n", phase));
        }
        prompt.push_str("## Input\n\n");
        prompt.push_str(&serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string()));
        if let Some(ref reminder) = self.specialist.role_reminder {
            prompt.push_str(&format!("\n\n**Reminder:** {}", reminder));
        }
        prompt
    }
}

#[async_trait]
impl AsyncEntrypoint for LlmAgent {
    async fn call(&self, input: Value, phase_name: Option<String>) -> Result<Value, String> {
        let config = self.call_config()?;
        let prompt = self.build_user_prompt(&input, phase_name.as_deref());
        let response = self.caller.call(&config, &prompt).await?;
        if let Some(usage) = &response.usage {
            tracing::debug!(
                agent = %self.specialist.id,
                model = %response.model,
                input_tokens = ?usage.input_tokens,
                output_tokens = ?usage.output_tokens,
                "[LlmAgent] Call finished"
            );
        }
        Ok(Value::String(response.content))
    }
}

/// Credential variables an adapter accepts, in lookup order.
pub fn api_key_vars(adapter: &str) -> &'static [&'static str] {
    match adapter {
        "openai" | "opencode" => &["OPENAI_API_KEY"],
        _ => &["ANTHROPIC_AUTH_TOKEN", "ANTHROPIC_API_KEY"],
    }
}

/// First non-empty key among the adapter's variables.
fn select_api_key(adapter: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    api_key_vars(adapter)
        .iter()
        .filter_map(|&name| lookup(name))
        .find(|key| !key.is_empty())
}

/// Resolve environment variable references in a string.
/// Supports `${ENV_VAR}` and `${ENV_VAR:-default}` syntax.
pub fn resolve_env_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_expr = &caps[1];
        if let Some(idx) = var_expr.find(":-") {
            let var_name = &var_expr[..idx];
            let default_val = &var_expr[idx + 2..];
            std::env::var(var_name).unwrap_or_else(|_| default_val.to_string())
        } else {
            std::env::var(var_expr).unwrap_or_else(|_| format!("${{{}}}", var_expr))
        }
    })
    .to_string()
}
