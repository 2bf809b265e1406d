//! The retrieval pipeline: fan-out, dedup, rerank, composite scoring and MMR selection.

pub mod dedup;
pub mod diversity;
pub mod hybrid;
pub mod orchestrator;
pub mod report;
pub mod rerank;
pub mod scoring;

use std::cmp::Ordering;

use serde::Serialize;

use kb_domain::{KnowledgeBaseType, SearchResult};

pub const QUERY_TYPE_HYBRID: &str = "hybrid";

/// Per-call retrieval parameters handed to a [`crate::Searcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
	pub query: String,
	pub top_k: u32,
	pub vector_threshold: f32,
	pub keyword_threshold: f32,
}

/// Which stage produced a candidate's model score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
	Model,
	Llm,
	/// No scorer was available or the scorer failed; the retrieval score stands in.
	Original,
	/// FAQ hits skip reranking.
	Faq,
}
impl ScorerKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Model => "model",
			Self::Llm => "llm",
			Self::Original => "original",
			Self::Faq => "faq",
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankingExplain {
	pub retrieval_score: f32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub scorer: Option<ScorerKind>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model_score: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source_weight: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub position_prior: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub mmr_score: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub redundancy: Option<f32>,
}

/// A retrieved chunk plus where it came from. `result.score` is rewritten by each ranking stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResultWithMeta {
	pub result: SearchResult,
	pub source_query: String,
	pub query_type: String,
	pub knowledge_base_id: String,
	pub knowledge_base_type: KnowledgeBaseType,
	pub explain: RankingExplain,
}
impl SearchResultWithMeta {
	pub fn new(
		result: SearchResult,
		source_query: impl Into<String>,
		knowledge_base_id: impl Into<String>,
		knowledge_base_type: KnowledgeBaseType,
	) -> Self {
		let explain = RankingExplain { retrieval_score: result.score, ..Default::default() };

		Self {
			result,
			source_query: source_query.into(),
			query_type: QUERY_TYPE_HYBRID.to_string(),
			knowledge_base_id: knowledge_base_id.into(),
			knowledge_base_type,
			explain,
		}
	}

	pub fn score(&self) -> f32 {
		self.result.score
	}

	pub fn is_faq(&self) -> bool {
		self.knowledge_base_type == KnowledgeBaseType::Faq
	}
}

/// Descending order with NaN last.
pub fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

/// Total order used wherever ties must not depend on arrival order.
pub fn cmp_ranked(lhs: &SearchResultWithMeta, rhs: &SearchResultWithMeta) -> Ordering {
	cmp_f32_desc(lhs.score(), rhs.score())
		.then_with(|| lhs.result.knowledge_id.cmp(&rhs.result.knowledge_id))
		.then_with(|| lhs.result.id.cmp(&rhs.result.id))
}

pub fn sort_ranked(results: &mut [SearchResultWithMeta]) {
	results.sort_by(cmp_ranked);
}
