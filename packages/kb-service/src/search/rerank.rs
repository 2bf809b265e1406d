//! Rerank chain: a dedicated rerank model, then LLM prompt scoring, then the retrieval scores.
//!
//! Scorers are tried in order until one returns scores. FAQ hits never enter the chain.

use std::{collections::HashSet, sync::Arc};

use tokio_util::sync::CancellationToken;

use kb_config::{Config, ProviderConfig, Ranking};
use kb_domain::text;
use kb_providers::chat::{ChatMessage, ChatOptions};

use crate::{
	BoxFuture, ChatProvider, Error, Providers, RerankProvider, Result,
	search::{ScorerKind, SearchResultWithMeta, scoring, sort_ranked},
};

const LLM_SYSTEM_PROMPT: &str = "You rate how well retrieved passages answer a search query. \
Reply with scores only.";

/// A model score for the candidate at `index` in the scorer input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
	pub index: usize,
	pub score: f32,
	pub scorer: ScorerKind,
}

pub trait Scorer
where
	Self: Send + Sync,
{
	fn kind(&self) -> ScorerKind;

	/// An empty result means the scorer had nothing to say and the next one should run.
	fn score<'a>(
		&'a self,
		query: &'a str,
		candidates: &'a [SearchResultWithMeta],
	) -> BoxFuture<'a, Result<Vec<ScoredCandidate>>>;
}

/// Cross-encoder style rerank endpoint. Candidates it does not return are dropped.
pub struct ModelScorer {
	provider: Arc<dyn RerankProvider>,
	cfg: ProviderConfig,
}
impl ModelScorer {
	pub fn new(provider: Arc<dyn RerankProvider>, cfg: ProviderConfig) -> Self {
		Self { provider, cfg }
	}
}

impl Scorer for ModelScorer {
	fn kind(&self) -> ScorerKind {
		ScorerKind::Model
	}

	fn score<'a>(
		&'a self,
		query: &'a str,
		candidates: &'a [SearchResultWithMeta],
	) -> BoxFuture<'a, Result<Vec<ScoredCandidate>>> {
		Box::pin(async move {
			let passages: Vec<String> =
				candidates.iter().map(|item| item.result.enriched_passage()).collect();
			let hits = self.provider.rerank(&self.cfg, query, &passages).await?;
			let mut seen = HashSet::new();
			let scored = hits
				.into_iter()
				.filter(|hit| hit.index < candidates.len() && seen.insert(hit.index))
				.map(|hit| ScoredCandidate {
					index: hit.index,
					score: hit.relevance_score,
					scorer: ScorerKind::Model,
				})
				.collect::<Vec<_>>();

			tracing::info!(
				candidates = candidates.len(),
				scored = scored.len(),
				"Rerank model scored candidates."
			);

			Ok(scored)
		})
	}
}

/// Prompts a chat model for one score per passage, in sequential batches.
///
/// A batch whose call or parse fails keeps the retrieval scores of its candidates.
pub struct LlmScorer {
	provider: Arc<dyn ChatProvider>,
	cfg: ProviderConfig,
	batch_size: usize,
	max_passage_chars: usize,
	temperature: f32,
}
impl LlmScorer {
	pub fn new(
		provider: Arc<dyn ChatProvider>,
		cfg: ProviderConfig,
		batch_size: u32,
		max_passage_chars: u32,
		temperature: f32,
	) -> Self {
		Self {
			provider,
			cfg,
			batch_size: batch_size.max(1) as usize,
			max_passage_chars: max_passage_chars as usize,
			temperature,
		}
	}

	async fn score_batch(
		&self,
		query: &str,
		batch: &[SearchResultWithMeta],
	) -> Result<Vec<f32>> {
		let messages = [
			ChatMessage::system(LLM_SYSTEM_PROMPT),
			ChatMessage::user(build_llm_prompt(query, batch, self.max_passage_chars)),
		];
		let options = ChatOptions {
			temperature: self.temperature,
			max_tokens: batch.len() as u32 * 20 + 100,
		};
		let reply = self.provider.complete(&self.cfg, &messages, options).await?;

		parse_llm_scores(&reply, batch.len()).ok_or_else(|| Error::Provider {
			message: "No valid scores found in LLM response.".to_string(),
		})
	}
}

impl Scorer for LlmScorer {
	fn kind(&self) -> ScorerKind {
		ScorerKind::Llm
	}

	fn score<'a>(
		&'a self,
		query: &'a str,
		candidates: &'a [SearchResultWithMeta],
	) -> BoxFuture<'a, Result<Vec<ScoredCandidate>>> {
		Box::pin(async move {
			let mut scored = Vec::with_capacity(candidates.len());

			for (batch_idx, batch) in candidates.chunks(self.batch_size).enumerate() {
				let batch_start = batch_idx * self.batch_size;

				match self.score_batch(query, batch).await {
					Ok(scores) => scored.extend(scores.into_iter().enumerate().map(
						|(offset, score)| ScoredCandidate {
							index: batch_start + offset,
							score,
							scorer: ScorerKind::Llm,
						},
					)),
					Err(err) => {
						tracing::warn!(
							batch_start,
							batch_len = batch.len(),
							error = %err,
							"LLM rerank batch failed; keeping retrieval scores."
						);

						scored.extend(batch.iter().enumerate().map(|(offset, item)| {
							ScoredCandidate {
								index: batch_start + offset,
								score: item.score(),
								scorer: ScorerKind::Original,
							}
						}));
					},
				}
			}

			Ok(scored)
		})
	}
}

/// Ordered scorers with the retrieval scores as the implicit last resort.
pub struct RerankChain {
	scorers: Vec<Box<dyn Scorer>>,
}
impl RerankChain {
	pub fn new(scorers: Vec<Box<dyn Scorer>>) -> Self {
		Self { scorers }
	}

	/// Model scorer when a rerank provider is configured, then the LLM scorer when a chat provider is.
	pub fn from_config(cfg: &Config, providers: &Providers) -> Self {
		let mut scorers: Vec<Box<dyn Scorer>> = Vec::new();

		if let Some(rerank_cfg) = &cfg.providers.rerank {
			scorers.push(Box::new(ModelScorer::new(providers.rerank.clone(), rerank_cfg.clone())));
		}
		if let Some(llm_cfg) = &cfg.providers.llm {
			scorers.push(Box::new(LlmScorer::new(
				providers.chat.clone(),
				llm_cfg.clone(),
				cfg.rerank.llm_batch_size,
				cfg.rerank.llm_max_passage_chars,
				cfg.rerank.llm_temperature,
			)));
		}

		Self { scorers }
	}

	pub fn kinds(&self) -> Vec<ScorerKind> {
		self.scorers.iter().map(|scorer| scorer.kind()).collect()
	}

	/// Never fails: every scorer failure degrades to the next tier.
	pub async fn score(
		&self,
		query: &str,
		candidates: &[SearchResultWithMeta],
		cancel: &CancellationToken,
	) -> Vec<ScoredCandidate> {
		for scorer in &self.scorers {
			if cancel.is_cancelled() {
				break;
			}

			let kind = scorer.kind();
			let outcome = tokio::select! {
				biased;
				_ = cancel.cancelled() => {
					tracing::warn!(scorer = kind.as_str(), "Rerank cancelled; keeping retrieval scores.");

					break;
				},
				outcome = scorer.score(query, candidates) => outcome,
			};

			match outcome {
				Ok(scored) if !scored.is_empty() => return scored,
				Ok(_) => tracing::warn!(scorer = kind.as_str(), "Scorer returned no scores; falling back."),
				Err(err) => tracing::warn!(
					scorer = kind.as_str(),
					error = %err,
					"Scorer failed; falling back."
				),
			}
		}

		candidates
			.iter()
			.enumerate()
			.map(|(index, item)| ScoredCandidate {
				index,
				score: item.score(),
				scorer: ScorerKind::Original,
			})
			.collect()
	}
}

/// Scores non-FAQ candidates through `chain`, applies the composite score to them and merges the FAQ
/// hits back in with their original scores.
pub async fn rerank_results(
	chain: &RerankChain,
	ranking: &Ranking,
	query: &str,
	results: Vec<SearchResultWithMeta>,
	cancel: &CancellationToken,
) -> Vec<SearchResultWithMeta> {
	let (mut combined, candidates): (Vec<_>, Vec<_>) =
		results.into_iter().partition(SearchResultWithMeta::is_faq);

	for faq in &mut combined {
		faq.explain.scorer = Some(ScorerKind::Faq);
	}

	if !candidates.is_empty() {
		let scored = chain.score(query, &candidates, cancel).await;

		for ScoredCandidate { index, score, scorer } in scored {
			let mut item = candidates[index].clone();
			let composite = scoring::composite_score(ranking, &item.result, score, item.score());

			item.result.score = composite.score;
			item.explain.scorer = Some(scorer);
			item.explain.model_score = Some(score);
			item.explain.source_weight = Some(composite.source_weight);
			item.explain.position_prior = Some(composite.position_prior);

			combined.push(item);
		}
	}

	sort_ranked(&mut combined);

	tracing::info!(results = combined.len(), "Rerank stage finished.");

	combined
}

fn build_llm_prompt(query: &str, batch: &[SearchResultWithMeta], max_chars: usize) -> String {
	let mut prompt = format!(
		"Query: {query}\n\nRate each passage from 0.0 (irrelevant) to 1.0 (directly answers the \
		 query).\n\n"
	);

	for (idx, item) in batch.iter().enumerate() {
		let passage = text::truncate_chars(&item.result.enriched_passage(), max_chars);

		prompt.push_str(&format!("Passage {}:\n{passage}\n\n", idx + 1));
	}

	prompt.push_str(&format!(
		"Return exactly {count} lines in the form \"Passage N: X.XX\", one per passage, from \
		 Passage 1 to Passage {count}.",
		count = batch.len()
	));

	prompt
}

/// Reads one score per non-empty line, taking the text after the last `:` when present.
///
/// Scores are clamped to `[0, 1]`. A short reply is padded with its last score and a long one is
/// truncated. `None` when no line holds a number.
pub fn parse_llm_scores(reply: &str, expected: usize) -> Option<Vec<f32>> {
	let mut scores = Vec::with_capacity(expected);

	for line in reply.trim().lines() {
		let line = line.trim();

		if line.is_empty() {
			continue;
		}

		let raw = line.rsplit(':').next().unwrap_or(line).trim();
		let raw = raw.trim_matches(|c: char| !c.is_ascii_digit() && c != '.');

		if raw.is_empty() {
			continue;
		}

		let Ok(score) = raw.parse::<f32>() else { continue };

		if score.is_finite() {
			scores.push(score.clamp(0.0, 1.0));
		}
	}

	let last = *scores.last()?;

	scores.resize(expected, last);

	Some(scores)
}
