use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

/// Relevance of the passage at `index` in the request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RerankHit {
	pub index: usize,
	pub relevance_score: f32,
}

pub async fn rerank(
	cfg: &kb_config::ProviderConfig,
	query: &str,
	passages: &[String],
) -> Result<Vec<RerankHit>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let body = serde_json::json!({ "model": cfg.model, "query": query, "documents": passages });
	let res = client
		.post(crate::endpoint(&cfg.api_base, &cfg.path))
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_rerank_response(json, passages.len())
}

/// Accepts `results` or `data` arrays keyed by `relevance_score` or `score`. Out of range indices
/// are dropped.
fn parse_rerank_response(json: Value, passage_count: usize) -> Result<Vec<RerankHit>> {
	let results =
		json.get("results").or_else(|| json.get("data")).and_then(|v| v.as_array()).ok_or_else(
			|| Error::InvalidResponse {
				message: "Rerank response is missing results array.".to_string(),
			},
		)?;
	let mut hits = Vec::with_capacity(results.len());

	for item in results {
		let index = item.get("index").and_then(|v| v.as_u64()).ok_or_else(|| {
			Error::InvalidResponse { message: "Rerank result missing index.".to_string() }
		})? as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::InvalidResponse {
				message: "Rerank result missing score.".to_string(),
			})? as f32;

		if index < passage_count {
			hits.push(RerankHit { index, relevance_score: score });
		}
	}

	Ok(hits)
}
