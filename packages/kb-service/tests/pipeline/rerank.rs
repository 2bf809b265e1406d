use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use kb_domain::KnowledgeBaseType;
use kb_service::{
	ScorerKind,
	search::{
		SearchResultWithMeta,
		rerank::{self, RerankChain},
	},
};

use super::{FailingRerank, ScriptedChat, hit};

fn candidate(id: &str, chunk_index: i32, score: f32) -> SearchResultWithMeta {
	SearchResultWithMeta::new(hit(id, "k1", chunk_index, score), "q", "kb", KnowledgeBaseType::Document)
}

#[tokio::test]
async fn failing_rerank_model_falls_back_to_llm_scores() {
	let cfg = super::config(&[super::RERANK_PROVIDER, super::LLM_PROVIDER]);
	let rerank_provider = Arc::new(FailingRerank::default());
	let chat = Arc::new(ScriptedChat::new(&[Some("Passage 1: 0.9\nPassage 2: 0.1")]));
	let chain = RerankChain::from_config(&cfg, &super::providers(rerank_provider.clone(), chat.clone()));

	assert_eq!(chain.kinds(), vec![ScorerKind::Model, ScorerKind::Llm]);

	let ranked = rerank::rerank_results(
		&chain,
		&cfg.ranking,
		"q",
		vec![candidate("c1", 0, 0.2), candidate("c2", 1, 0.8)],
		&CancellationToken::new(),
	)
	.await;

	assert_eq!(rerank_provider.calls(), 1);
	assert_eq!(chat.calls(), 1);
	assert_eq!(ranked[0].result.id, "c1");
	assert_eq!(ranked[0].explain.scorer, Some(ScorerKind::Llm));
	assert_eq!(ranked[0].explain.model_score, Some(0.9));
	assert_eq!(ranked[0].explain.retrieval_score, 0.2);
	assert!((ranked[0].score() - (0.6 * 0.9 + 0.3 * 0.2 + 0.1)).abs() < 1e-6);
	assert!((ranked[1].score() - (0.6 * 0.1 + 0.3 * 0.8 + 0.1)).abs() < 1e-6);
}

#[tokio::test]
async fn failed_llm_batch_keeps_original_scores() {
	let llm_batches = format!("{}\n[rerank]\nllm_batch_size = 1\n", super::LLM_PROVIDER);
	let cfg = super::config(&[llm_batches.as_str()]);
	let chat = Arc::new(ScriptedChat::new(&[Some("Passage 1: 0.9"), None]));
	let chain = RerankChain::from_config(
		&cfg,
		&super::providers(Arc::new(FailingRerank::default()), chat.clone()),
	);
	let ranked = rerank::rerank_results(
		&chain,
		&cfg.ranking,
		"q",
		vec![candidate("c1", 0, 0.2), candidate("c2", 1, 0.8)],
		&CancellationToken::new(),
	)
	.await;

	assert_eq!(chat.calls(), 2);

	let c1 = ranked.iter().find(|item| item.result.id == "c1").expect("c1 must survive.");
	let c2 = ranked.iter().find(|item| item.result.id == "c2").expect("c2 must survive.");

	assert_eq!(c1.explain.scorer, Some(ScorerKind::Llm));
	assert_eq!(c2.explain.scorer, Some(ScorerKind::Original));
	assert_eq!(c2.explain.model_score, Some(0.8));
	assert_eq!(ranked[0].result.id, "c2");
}

#[tokio::test]
async fn no_scorers_means_original_scores() {
	let cfg = super::config(&[]);
	let chain = RerankChain::from_config(
		&cfg,
		&super::providers(Arc::new(FailingRerank::default()), Arc::new(ScriptedChat::default())),
	);

	assert!(chain.kinds().is_empty());

	let ranked = rerank::rerank_results(
		&chain,
		&cfg.ranking,
		"q",
		vec![candidate("c1", 0, 0.2), candidate("c2", 1, 0.8)],
		&CancellationToken::new(),
	)
	.await;

	assert_eq!(ranked[0].result.id, "c2");
	assert!(ranked.iter().all(|item| item.explain.scorer == Some(ScorerKind::Original)));
}

#[tokio::test]
async fn faq_results_bypass_scoring() {
	let cfg = super::config(&[super::LLM_PROVIDER]);
	let chat = Arc::new(ScriptedChat::new(&[Some("Passage 1: 0.1")]));
	let chain =
		RerankChain::from_config(&cfg, &super::providers(Arc::new(FailingRerank::default()), chat.clone()));
	let faq = SearchResultWithMeta::new(hit("f1", "k9", 0, 0.75), "q", "kb-faq", KnowledgeBaseType::Faq);
	let ranked = rerank::rerank_results(
		&chain,
		&cfg.ranking,
		"q",
		vec![faq, candidate("c1", 0, 0.5)],
		&CancellationToken::new(),
	)
	.await;

	assert_eq!(chat.calls(), 1);

	let faq = ranked.iter().find(|item| item.result.id == "f1").expect("FAQ hit must survive.");

	assert_eq!(faq.score(), 0.75);
	assert_eq!(faq.explain.scorer, Some(ScorerKind::Faq));
	assert_eq!(faq.explain.model_score, None);
	assert_eq!(ranked[0].result.id, "f1");
}
