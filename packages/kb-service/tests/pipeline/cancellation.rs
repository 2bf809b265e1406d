use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use kb_domain::SearchTarget;
use kb_service::{
	Error, KnowledgeScope, ScorerKind,
	search::{
		SearchResultWithMeta,
		orchestrator::{self, FanOutOptions},
		rerank::{self, RerankChain},
	},
};

use super::{ScriptedSearcher, Unit, hit, ids};

fn options() -> FanOutOptions {
	FanOutOptions { top_k: 5, vector_threshold: 0.6, keyword_threshold: 0.5, max_concurrent: 4 }
}

fn cancel_after(delay: Duration) -> CancellationToken {
	let cancel = CancellationToken::new();
	let trigger = cancel.clone();

	tokio::spawn(async move {
		tokio::time::sleep(delay).await;
		trigger.cancel();
	});

	cancel
}

#[tokio::test]
async fn cancellation_returns_finished_units() {
	let searcher = Arc::new(
		ScriptedSearcher::default()
			.with("q", "kb-fast", Unit::Hits(vec![hit("c1", "k1", 0, 0.8)]))
			.with("q", "kb-slow", Unit::Hang),
	);
	let targets =
		vec![SearchTarget::knowledge_base("kb-fast"), SearchTarget::knowledge_base("kb-slow")];
	let cancel = cancel_after(Duration::from_millis(50));
	let results = tokio::time::timeout(
		Duration::from_secs(5),
		orchestrator::fan_out(searcher, 1, &ids(&["q"]), &targets, &HashMap::new(), options(), &cancel),
	)
	.await
	.expect("Cancelled fan-out must return promptly.")
	.expect("Finished units must be returned.");

	assert_eq!(results.len(), 1);
	assert_eq!(results[0].result.id, "c1");
}

#[tokio::test]
async fn cancellation_before_any_unit_finishes_is_an_error() {
	let searcher = Arc::new(ScriptedSearcher::default().with("q", "kb-slow", Unit::Hang));
	let cancel = cancel_after(Duration::from_millis(20));
	let err = tokio::time::timeout(
		Duration::from_secs(5),
		orchestrator::fan_out(
			searcher,
			1,
			&ids(&["q"]),
			&[SearchTarget::knowledge_base("kb-slow")],
			&HashMap::new(),
			options(),
			&cancel,
		),
	)
	.await
	.expect("Cancelled fan-out must return promptly.")
	.expect_err("Nothing finished, so the call must fail.");

	assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn cancelled_rerank_keeps_retrieval_scores() {
	let cfg = super::config(&[super::RERANK_PROVIDER]);
	let rerank_provider = Arc::new(super::FailingRerank::default());
	let providers = super::providers(rerank_provider.clone(), Arc::new(super::ScriptedChat::default()));
	let chain = RerankChain::from_config(&cfg, &providers);
	let cancel = CancellationToken::new();

	cancel.cancel();

	let candidates = vec![
		SearchResultWithMeta::new(hit("c1", "k1", 0, 0.3), "q", "kb", Default::default()),
		SearchResultWithMeta::new(hit("c2", "k1", 1, 0.6), "q", "kb", Default::default()),
	];
	let ranked = rerank::rerank_results(&chain, &cfg.ranking, "q", candidates, &cancel).await;

	assert_eq!(rerank_provider.calls(), 0);
	assert_eq!(ranked[0].result.id, "c2");
	assert!(ranked.iter().all(|item| item.explain.scorer == Some(ScorerKind::Original)));
}

#[tokio::test]
async fn cancelled_request_fails_knowledge_search() {
	let searcher = Arc::new(ScriptedSearcher::default().with("q", "kb-a", Unit::Hang));
	let service = super::service(
		super::config(&[]),
		super::providers(
			Arc::new(super::FailingRerank::default()),
			Arc::new(super::ScriptedChat::default()),
		),
		searcher,
		Arc::new(super::StubKnowledge::default()),
		Arc::new(super::StubQuery::default()),
	);
	let scope = KnowledgeScope { tenant_id: 1, knowledge_base_ids: ids(&["kb-a"]), ..Default::default() };
	let request = serde_json::from_value(serde_json::json!({ "queries": ["q"] }))
		.expect("Failed to parse request.");
	let cancel = cancel_after(Duration::from_millis(20));
	let err = service
		.knowledge_search(&scope, request, &cancel)
		.await
		.expect_err("A request cancelled before any result must fail.");

	assert!(matches!(err, Error::Cancelled));
}
