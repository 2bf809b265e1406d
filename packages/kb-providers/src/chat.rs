use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub role: String,
	pub content: String,
}
impl ChatMessage {
	pub fn system(content: impl Into<String>) -> Self {
		Self { role: "system".to_string(), content: content.into() }
	}

	pub fn user(content: impl Into<String>) -> Self {
		Self { role: "user".to_string(), content: content.into() }
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
	pub temperature: f32,
	pub max_tokens: u32,
}

/// OpenAI-compatible chat completion returning the first choice's text.
pub async fn complete(
	cfg: &kb_config::ProviderConfig,
	messages: &[ChatMessage],
	options: ChatOptions,
) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": options.temperature,
		"max_tokens": options.max_tokens,
		"messages": messages,
	});
	let res = client
		.post(crate::endpoint(&cfg.api_base, &cfg.path))
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_completion(json)
}

fn parse_completion(json: Value) -> Result<String> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.map(str::to_string)
		.ok_or_else(|| Error::InvalidResponse {
			message: "Chat response is missing choice content.".to_string(),
		})
}
