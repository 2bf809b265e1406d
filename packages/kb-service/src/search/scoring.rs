use kb_config::Ranking;
use kb_domain::{SearchResult, text};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeScore {
	pub score: f32,
	pub source_weight: f32,
	pub position_prior: f32,
}

/// `1.0` for curated content, `web_source_factor` for web search hits.
pub fn source_weight(cfg: &Ranking, result: &SearchResult) -> f32 {
	if result.is_web_search() { cfg.web_source_factor } else { 1.0 }
}

/// Small boost for chunks near the start of their document, bounded by `position_prior_span`.
pub fn position_prior(cfg: &Ranking, start_at: i32, end_at: i32) -> f32 {
	if start_at < 0 || end_at <= start_at {
		return 1.0;
	}

	let ratio = 1.0 - start_at as f32 / (end_at as f32 + 1.0);
	let span = cfg.position_prior_span;

	1.0 + ratio.clamp(-span, span)
}

/// Blends the model score with the pre-rerank score and the source and position nudges.
pub fn composite_score(
	cfg: &Ranking,
	result: &SearchResult,
	model_score: f32,
	base_score: f32,
) -> CompositeScore {
	let source_weight = source_weight(cfg, result);
	let position_prior = position_prior(cfg, result.start_at, result.end_at);
	let blended = cfg.model_weight * sanitize(model_score)
		+ cfg.base_weight * sanitize(base_score)
		+ cfg.source_weight * source_weight;

	CompositeScore { score: text::clamp_unit(blended * position_prior), source_weight, position_prior }
}

fn sanitize(score: f32) -> f32 {
	if score.is_finite() { score } else { 0.0 }
}
