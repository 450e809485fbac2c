use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::config::OracleConfig;
use crate::device::Screenshot;

// `undo(` and `refinish(` are prose, not calls.
static ACTION_CALL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\b(?:do|finish)\(").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Base64 screenshot sent along with the text.
    pub image_b64: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), image_b64: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), image_b64: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), image_b64: None }
    }

    pub fn with_image(mut self, image_b64: impl Into<String>) -> Self {
        self.image_b64 = Some(image_b64.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleDecision {
    pub action_text: String,
    pub rationale: String,
}

/// The decision service: picks the next action and judges executed ones.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn plan(&self, messages: &[ChatMessage]) -> Result<OracleDecision>;

    /// Free-form judgment of an action given screenshots from before and
    /// after it ran.
    async fn judge(&self, prompt: &str, before: &Screenshot, after: &Screenshot) -> Result<String>;
}

/// Oracle backed by an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiOracle {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ORACLE_API_KEY not set"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }

    async fn post_with_retry(&self, url: &str, body: &Value) -> Result<reqwest::Response> {
        let max_retries = 3;
        let mut attempt = 0;
        let mut backoff = Duration::from_secs(1);

        loop {
            attempt += 1;
            match self
                .client
                .post(url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(body)
                .send()
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
                    if !retryable || attempt > max_retries {
                        return Ok(resp);
                    }
                    warn!(attempt, %status, "oracle returned retryable status");
                }
                Err(e) => {
                    if attempt > max_retries {
                        return Err(anyhow::anyhow!("Max retries exceeded: {}", e));
                    }
                    warn!(attempt, error = %e, ?backoff, "oracle network error, retrying");
                }
            }

            sleep(backoff).await;
            backoff *= 2;
        }
    }

    async fn complete(&self, messages: Vec<Value>, max_tokens: u32) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
        });
        let url = format!("{}/chat/completions", self.base_url);
        let res = self.post_with_retry(&url, &body).await?;
        if !res.status().is_success() {
            let error_text = res.text().await?;
            return Err(anyhow::anyhow!("Oracle API error: {}", error_text));
        }
        let res_json: Value = res.json().await?;
        if let Some(refusal) = res_json["choices"][0]["message"]["refusal"].as_str() {
            return Err(anyhow::anyhow!("Oracle refused: {}", refusal));
        }
        res_json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("No content in oracle response"))
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn plan(&self, messages: &[ChatMessage]) -> Result<OracleDecision> {
        let payload = messages.iter().map(message_to_json).collect();
        let content = self.complete(payload, 1024).await?;
        Ok(split_decision(&content))
    }

    async fn judge(&self, prompt: &str, before: &Screenshot, after: &Screenshot) -> Result<String> {
        let message = json!({
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                { "type": "text", "text": "Screenshot BEFORE the action:" },
                { "type": "image_url", "image_url": { "url": before.data_url() } },
                { "type": "text", "text": "Screenshot AFTER the action:" },
                { "type": "image_url", "image_url": { "url": after.data_url() } }
            ]
        });
        self.complete(vec![message], 512).await
    }
}

fn message_to_json(message: &ChatMessage) -> Value {
    match &message.image_b64 {
        None => json!({ "role": message.role, "content": message.content }),
        Some(b64) => json!({
            "role": message.role,
            "content": [
                { "type": "text", "text": message.content },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/png;base64,{}", b64) }
                }
            ]
        }),
    }
}

/// Split a planning reply into reasoning and the trailing action call.
pub fn split_decision(content: &str) -> OracleDecision {
    let cleaned = content
        .replace("<answer>", "")
        .replace("</answer>", "")
        .replace("```", "");
    let start = ACTION_CALL
        .as_ref()
        .and_then(|re| re.find_iter(&cleaned).last())
        .map(|m| m.start());
    match start {
        Some(idx) => OracleDecision {
            action_text: cleaned[idx..].trim().to_string(),
            rationale: cleaned[..idx]
                .replace("<think>", "")
                .replace("</think>", "")
                .trim()
                .to_string(),
        },
        None => OracleDecision {
            action_text: cleaned.trim().to_string(),
            rationale: String::new(),
        },
    }
}
