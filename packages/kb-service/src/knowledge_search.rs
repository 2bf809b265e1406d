use std::collections::{HashMap, HashSet};

use tokio_util::sync::CancellationToken;

use kb_domain::{FaqMetadata, SearchTarget, target};

use crate::{
	Error, KbService, Result,
	search::{
		SearchResultWithMeta, dedup, diversity,
		orchestrator::{self, FanOutOptions},
		report,
		rerank::{self, RerankChain},
		sort_ranked,
	},
	tool::{KnowledgeSearchRequest, ToolOutput},
};

/// What a caller may search: whole knowledge bases and individual documents.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeScope {
	pub tenant_id: u64,
	pub knowledge_base_ids: Vec<String>,
	pub knowledge_ids: Vec<String>,
}

impl KbService {
	/// Turns a caller scope into non-overlapping search targets.
	///
	/// Documents that do not exist in the tenant are skipped.
	pub async fn resolve_search_targets(
		&self,
		tenant_id: u64,
		knowledge_base_ids: &[String],
		knowledge_ids: &[String],
	) -> Result<Vec<SearchTarget>> {
		let documents = if knowledge_ids.is_empty() {
			Vec::new()
		} else {
			self.backends.knowledge.document_knowledge_bases(tenant_id, knowledge_ids).await?
		};

		Ok(target::resolve_search_targets(knowledge_base_ids, &documents))
	}

	pub async fn knowledge_search(
		&self,
		scope: &KnowledgeScope,
		mut request: KnowledgeSearchRequest,
		cancel: &CancellationToken,
	) -> Result<ToolOutput> {
		let queries = request.validate(&self.cfg.retrieval)?;
		let tenant_id = scope.tenant_id;
		let targets = self
			.resolve_search_targets(tenant_id, &scope.knowledge_base_ids, &scope.knowledge_ids)
			.await?;
		let targets = target::filter_targets(&targets, &request.knowledge_base_ids);

		if targets.is_empty() {
			return Err(Error::NoSearchTargets);
		}

		let kb_ids = target::knowledge_base_ids(&targets);
		let kb_types = match self.backends.knowledge.knowledge_base_types(tenant_id, &kb_ids).await {
			Ok(types) => types,
			Err(err) => {
				tracing::warn!(
					tenant_id,
					error = %err,
					"Knowledge base type lookup failed; treating all as document knowledge bases."
				);

				HashMap::new()
			},
		};

		tracing::info!(
			tenant_id,
			queries = queries.len(),
			targets = targets.len(),
			"Knowledge search started."
		);

		let retrieval = &self.cfg.retrieval;
		let options = FanOutOptions {
			top_k: retrieval.top_k,
			vector_threshold: retrieval.vector_threshold,
			keyword_threshold: retrieval.keyword_threshold,
			max_concurrent: retrieval.max_concurrent_searches,
		};
		let collected = orchestrator::fan_out(
			self.backends.searcher.clone(),
			tenant_id,
			&queries,
			&targets,
			&kb_types,
			options,
			cancel,
		)
		.await?;
		let collected_len = collected.len();
		let deduped = dedup::dedup_results(collected);
		let chain = RerankChain::from_config(&self.cfg, &self.providers);
		let rerank_query = queries.join(" ");
		let reranked =
			rerank::rerank_results(&chain, &self.cfg.ranking, &rerank_query, deduped, cancel).await;
		let mut ranked = dedup::dedup_results(reranked);

		sort_ranked(&mut ranked);

		let k = diversity::mmr_k(ranked.len(), retrieval.top_k);
		let selected = diversity::select_mmr(ranked, k, self.cfg.diversity.mmr_lambda);

		tracing::info!(
			tenant_id,
			collected = collected_len,
			selected = selected.len(),
			"Knowledge search finished."
		);

		let faq = self.load_faq_metadata(tenant_id, &selected).await;
		let totals = self.load_chunk_totals(tenant_id, &selected).await;

		Ok(report::build_search_report(&selected, &kb_ids, &queries, &faq, &totals))
	}

	async fn load_faq_metadata(
		&self,
		tenant_id: u64,
		results: &[SearchResultWithMeta],
	) -> HashMap<String, FaqMetadata> {
		let mut out = HashMap::new();

		for item in results.iter().filter(|item| item.is_faq()) {
			if out.contains_key(&item.result.id) {
				continue;
			}

			match self.backends.knowledge.faq_metadata(tenant_id, &item.result.id).await {
				Ok(Some(meta)) => {
					out.insert(item.result.id.clone(), meta);
				},
				Ok(None) => {},
				Err(err) => tracing::warn!(
					tenant_id,
					chunk_id = %item.result.id,
					error = %err,
					"Failed to load FAQ metadata."
				),
			}
		}

		out
	}

	async fn load_chunk_totals(
		&self,
		tenant_id: u64,
		results: &[SearchResultWithMeta],
	) -> HashMap<String, i64> {
		let mut seen = HashSet::new();
		let mut out = HashMap::new();

		for item in results {
			let knowledge_id = item.result.knowledge_id.as_str();

			if knowledge_id.is_empty() || !seen.insert(knowledge_id) {
				continue;
			}

			match self.backends.knowledge.count_text_chunks(tenant_id, knowledge_id).await {
				Ok(total) => {
					out.insert(knowledge_id.to_string(), total);
				},
				Err(err) => tracing::warn!(
					tenant_id,
					knowledge_id,
					error = %err,
					"Failed to count document chunks."
				),
			}
		}

		out
	}
}
