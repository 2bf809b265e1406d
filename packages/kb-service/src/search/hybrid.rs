//! Postgres-backed [`Searcher`]: vector and keyword retrieval fused by Reciprocal Rank Fusion.

use std::{
	collections::{BTreeMap, HashMap},
	sync::Arc,
};

use kb_config::EmbeddingProviderConfig;
use kb_domain::{MatchType, SearchResult, SearchTarget};
use kb_storage::{
	db::Db,
	models::ChunkHit,
	search::{self, SearchScope},
};

use crate::{
	BoxFuture, EmbeddingProvider, Error, Result, Searcher,
	search::{SearchParams, cmp_f32_desc},
	storage_tenant_id,
};

pub struct HybridSearcher {
	db: Arc<Db>,
	embedding_cfg: EmbeddingProviderConfig,
	rrf_k: u32,
	embedding: Arc<dyn EmbeddingProvider>,
}
impl HybridSearcher {
	pub fn new(
		db: Arc<Db>,
		embedding_cfg: EmbeddingProviderConfig,
		rrf_k: u32,
		embedding: Arc<dyn EmbeddingProvider>,
	) -> Self {
		Self { db, embedding_cfg, rrf_k, embedding }
	}

	async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
		let texts = [query.to_string()];
		let mut vectors = self.embedding.embed(&self.embedding_cfg, &texts).await?;
		let Some(vector) = vectors.pop() else {
			return Err(Error::Provider {
				message: "Embedding provider returned no vectors.".to_string(),
			});
		};

		if vector.len() != self.embedding_cfg.dimensions as usize {
			return Err(Error::Provider {
				message: format!(
					"Embedding dimension mismatch: expected {}, got {}.",
					self.embedding_cfg.dimensions,
					vector.len()
				),
			});
		}

		Ok(vector)
	}

	async fn search(
		&self,
		tenant_id: u64,
		target: &SearchTarget,
		params: &SearchParams,
	) -> Result<Vec<SearchResult>> {
		let scope = SearchScope {
			tenant_id: storage_tenant_id(tenant_id)?,
			knowledge_base_id: &target.knowledge_base_id,
			knowledge_ids: target.knowledge_ids(),
		};
		let vector_hits = match self.embed_query(&params.query).await {
			Ok(vector) =>
				search::vector_search(
					&self.db,
					scope,
					&vector,
					params.vector_threshold,
					params.top_k,
				)
				.await?,
			Err(err) => {
				tracing::warn!(
					knowledge_base_id = %target.knowledge_base_id,
					error = %err,
					"Query embedding failed; using keyword retrieval only."
				);

				Vec::new()
			},
		};
		let keyword_hits = search::keyword_search(
			&self.db,
			scope,
			&params.query,
			params.keyword_threshold,
			params.top_k,
		)
		.await?;
		let fused = fuse_hits(vector_hits, keyword_hits, self.rrf_k, params.top_k as usize);

		tracing::debug!(
			knowledge_base_id = %target.knowledge_base_id,
			results = fused.len(),
			"Hybrid search finished."
		);

		Ok(fused)
	}
}

impl Searcher for HybridSearcher {
	fn hybrid_search<'a>(
		&'a self,
		tenant_id: u64,
		target: &'a SearchTarget,
		params: &'a SearchParams,
	) -> BoxFuture<'a, Result<Vec<SearchResult>>> {
		Box::pin(self.search(tenant_id, target, params))
	}
}

/// Sums `1 / (k + rank)` over every ranked list an id appears in, with 1-based ranks.
///
/// Output is sorted by fused score, ties broken by id.
pub fn reciprocal_rank_fusion(lists: &[Vec<String>], k: u32) -> Vec<(String, f32)> {
	let k = k as f32;
	let mut fused: HashMap<&str, f32> = HashMap::new();

	for list in lists {
		for (rank, id) in list.iter().enumerate() {
			*fused.entry(id.as_str()).or_insert(0.0) += 1.0 / (k + rank as f32 + 1.0);
		}
	}

	let mut out: Vec<(String, f32)> =
		fused.into_iter().map(|(id, score)| (id.to_string(), score)).collect();

	out.sort_by(|lhs, rhs| cmp_f32_desc(lhs.1, rhs.1).then_with(|| lhs.0.cmp(&rhs.0)));

	out
}

/// Fuses the two hit lists and rescales the fused score into `[0, 1]` by the best achievable score,
/// which is rank one in both lists.
///
/// Hits found by the vector search are tagged [`MatchType::Embedding`], the rest
/// [`MatchType::Keywords`].
fn fuse_hits(
	vector_hits: Vec<ChunkHit>,
	keyword_hits: Vec<ChunkHit>,
	rrf_k: u32,
	limit: usize,
) -> Vec<SearchResult> {
	let lists = [
		vector_hits.iter().map(|hit| hit.id.clone()).collect::<Vec<_>>(),
		keyword_hits.iter().map(|hit| hit.id.clone()).collect::<Vec<_>>(),
	];
	let ceiling = 2.0 / (rrf_k as f32 + 1.0);
	let mut by_id: HashMap<String, (ChunkHit, MatchType)> = HashMap::new();

	for hit in keyword_hits {
		by_id.insert(hit.id.clone(), (hit, MatchType::Keywords));
	}
	for hit in vector_hits {
		by_id.insert(hit.id.clone(), (hit, MatchType::Embedding));
	}

	reciprocal_rank_fusion(&lists, rrf_k)
		.into_iter()
		.take(limit)
		.filter_map(|(id, score)| {
			let (hit, match_type) = by_id.remove(&id)?;

			Some(into_result(hit, (score / ceiling).clamp(0.0, 1.0), match_type))
		})
		.collect()
}

fn into_result(hit: ChunkHit, score: f32, match_type: MatchType) -> SearchResult {
	SearchResult {
		id: hit.id,
		content: hit.content,
		knowledge_id: hit.knowledge_id,
		chunk_index: hit.chunk_index,
		knowledge_title: hit.knowledge_title,
		start_at: hit.start_at,
		end_at: hit.end_at,
		seq: hit.chunk_index,
		score,
		match_type,
		sub_chunk_ids: Vec::new(),
		metadata: BTreeMap::new(),
		chunk_type: hit.chunk_type,
		parent_chunk_id: hit.parent_chunk_id,
		image_info: hit.image_info,
		knowledge_filename: hit.knowledge_filename,
		knowledge_source: hit.knowledge_source,
	}
}
