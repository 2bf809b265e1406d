use std::{collections::HashMap, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

use kb_domain::{KnowledgeBaseType, SearchResult, SearchTarget};

use crate::{
	Error, Result, Searcher,
	search::{SearchParams, SearchResultWithMeta},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanOutOptions {
	pub top_k: u32,
	pub vector_threshold: f32,
	pub keyword_threshold: f32,
	/// In-flight search cap. Every unit is still issued.
	pub max_concurrent: u32,
}

struct UnitOutcome {
	unit: usize,
	query: String,
	target: SearchTarget,
	outcome: Result<Vec<SearchResult>>,
}

/// Runs one hybrid search per `(query, target)` pair and collects the tagged results.
///
/// A failing unit is logged and contributes nothing. Results come back in unit order
/// (queries outer, targets inner) regardless of completion order. On cancellation the results of the
/// units that finished are returned and the rest are aborted; if none finished the call fails with
/// [`Error::Cancelled`].
pub async fn fan_out(
	searcher: Arc<dyn Searcher>,
	tenant_id: u64,
	queries: &[String],
	targets: &[SearchTarget],
	kb_types: &HashMap<String, KnowledgeBaseType>,
	options: FanOutOptions,
	cancel: &CancellationToken,
) -> Result<Vec<SearchResultWithMeta>> {
	let semaphore = Arc::new(Semaphore::new(options.max_concurrent.max(1) as usize));
	let mut units = JoinSet::new();
	let mut unit = 0;

	for query in queries {
		for target in targets {
			let searcher = searcher.clone();
			let semaphore = semaphore.clone();
			let target = target.clone();
			let params = SearchParams {
				query: query.clone(),
				top_k: options.top_k,
				vector_threshold: options.vector_threshold,
				keyword_threshold: options.keyword_threshold,
			};

			units.spawn(async move {
				// The semaphore is never closed, so a failed acquire only means no permit is held.
				let _permit = semaphore.acquire_owned().await.ok();
				let outcome = searcher.hybrid_search(tenant_id, &target, &params).await;

				UnitOutcome { unit, query: params.query, target, outcome }
			});

			unit += 1;
		}
	}

	let total = unit;
	let mut finished = Vec::with_capacity(total);

	loop {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				units.abort_all();

				if finished.is_empty() {
					tracing::warn!(total, "Search cancelled before any unit finished.");

					return Err(Error::Cancelled);
				}

				tracing::warn!(
					finished = finished.len(),
					total,
					"Search cancelled; returning finished units."
				);

				break;
			},
			joined = units.join_next() => {
				let Some(joined) = joined else { break };

				match joined {
					Ok(outcome) => finished.push(outcome),
					Err(err) => tracing::warn!(error = %err, "Search unit panicked or was aborted."),
				}
			},
		}
	}

	finished.sort_by_key(|outcome| outcome.unit);

	let mut collected = Vec::new();

	for UnitOutcome { query, target, outcome, .. } in finished {
		let results = match outcome {
			Ok(results) => results,
			Err(err) => {
				tracing::warn!(
					knowledge_base_id = %target.knowledge_base_id,
					query = %query,
					error = %err,
					"Search unit failed."
				);

				continue;
			},
		};
		let kb_type = kb_types.get(&target.knowledge_base_id).copied().unwrap_or_default();

		collected.extend(results.into_iter().map(|result| {
			SearchResultWithMeta::new(result, query.as_str(), target.knowledge_base_id.as_str(), kb_type)
		}));
	}

	tracing::info!(units = total, results = collected.len(), "Concurrent search finished.");

	Ok(collected)
}
