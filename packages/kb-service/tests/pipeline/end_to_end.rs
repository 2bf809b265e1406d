use std::{collections::HashMap, sync::Arc};

use tokio_util::sync::CancellationToken;

use kb_domain::{FaqMetadata, KnowledgeBaseType, SearchTarget};
use kb_service::{
	Error, KnowledgeScope, KnowledgeSearchRequest,
	search::{
		dedup,
		orchestrator::{self, FanOutOptions},
	},
};

use super::{
	FailingRerank, ScriptedChat, ScriptedSearcher, StubKnowledge, StubQuery, Unit, hit, ids,
};

fn scripted_searcher() -> ScriptedSearcher {
	ScriptedSearcher::default()
		.with("q1", "kb-a", Unit::Hits(vec![hit("c1", "k1", 0, 0.9), hit("c2", "k1", 1, 0.8)]))
		.with("q1", "kb-b", Unit::Hits(vec![hit("c3", "k2", 0, 0.7), hit("c4", "k2", 1, 0.6)]))
		.with("q2", "kb-a", Unit::Hits(vec![hit("c1", "k1", 0, 0.85), hit("c5", "k1", 2, 0.5)]))
		.with("q2", "kb-b", Unit::Hits(vec![hit("c3", "k2", 0, 0.65), hit("c6", "k2", 2, 0.4)]))
}

fn request(raw: serde_json::Value) -> KnowledgeSearchRequest {
	serde_json::from_value(raw).expect("Failed to parse request.")
}

fn scope(knowledge_base_ids: &[&str]) -> KnowledgeScope {
	KnowledgeScope { tenant_id: 7, knowledge_base_ids: ids(knowledge_base_ids), knowledge_ids: Vec::new() }
}

fn service_with(searcher: ScriptedSearcher, knowledge: StubKnowledge) -> kb_service::KbService {
	super::service(
		super::config(&[]),
		super::providers(Arc::new(FailingRerank::default()), Arc::new(ScriptedChat::default())),
		Arc::new(searcher),
		Arc::new(knowledge),
		Arc::new(StubQuery::default()),
	)
}

#[tokio::test]
async fn duplicates_collapse_before_selection() {
	let targets = vec![SearchTarget::knowledge_base("kb-a"), SearchTarget::knowledge_base("kb-b")];
	let collected = orchestrator::fan_out(
		Arc::new(scripted_searcher()),
		7,
		&ids(&["q1", "q2"]),
		&targets,
		&HashMap::new(),
		FanOutOptions { top_k: 5, vector_threshold: 0.6, keyword_threshold: 0.5, max_concurrent: 16 },
		&CancellationToken::new(),
	)
	.await
	.expect("Failed to fan out.");

	assert_eq!(collected.len(), 8);

	let deduped = dedup::dedup_results(collected);

	assert_eq!(deduped.len(), 6);

	let c1 = deduped.iter().find(|item| item.result.id == "c1").expect("c1 must survive.");

	assert_eq!(c1.score(), 0.9);
	assert_eq!(c1.source_query, "q1");
}

#[tokio::test]
async fn knowledge_search_selects_top_k_distinct_results() {
	let knowledge = StubKnowledge {
		totals: HashMap::from([("k1".to_string(), 10), ("k2".to_string(), 3)]),
		..Default::default()
	};
	let service = service_with(scripted_searcher(), knowledge);
	let out = service
		.knowledge_search(
			&scope(&["kb-a", "kb-b"]),
			request(serde_json::json!({ "queries": ["q1", "q2"] })),
			&CancellationToken::new(),
		)
		.await
		.expect("Failed to run knowledge search.");

	assert_eq!(out.data["count"], 5);
	assert!(out.output.contains("Found 5 relevant results"));
	assert!(out.output.contains("=== Retrieval Coverage ==="));
	assert_eq!(out.data["knowledge_base_ids"], serde_json::json!(["kb-a", "kb-b"]));
	assert_eq!(out.data["queries"], serde_json::json!(["q1", "q2"]));

	let results = out.data["results"].as_array().expect("results must be an array.");
	let mut chunk_ids: Vec<&str> =
		results.iter().filter_map(|result| result["chunk_id"].as_str()).collect();

	assert_eq!(results[0]["chunk_id"], "c1");
	assert_eq!(results[0]["explain"]["scorer"], "original");
	assert!(results[0]["explain"]["mmr_score"].is_number());

	chunk_ids.sort_unstable();
	chunk_ids.dedup();

	assert_eq!(chunk_ids.len(), 5);
}

#[tokio::test]
async fn requested_knowledge_bases_narrow_the_scope() {
	let searcher = Arc::new(scripted_searcher());
	let service = super::service(
		super::config(&[]),
		super::providers(Arc::new(FailingRerank::default()), Arc::new(ScriptedChat::default())),
		searcher.clone(),
		Arc::new(StubKnowledge::default()),
		Arc::new(StubQuery::default()),
	);
	let out = service
		.knowledge_search(
			&scope(&["kb-a", "kb-b"]),
			request(serde_json::json!({ "queries": ["q1"], "knowledge_base_ids": ["kb-b"] })),
			&CancellationToken::new(),
		)
		.await
		.expect("Failed to run knowledge search.");

	assert_eq!(searcher.calls(), 1);
	assert_eq!(out.data["kb_counts"]["kb-b"], 2);
	assert!(out.data["kb_counts"].get("kb-a").is_none());
}

#[tokio::test]
async fn unknown_requested_knowledge_base_has_no_targets() {
	let service = service_with(scripted_searcher(), StubKnowledge::default());
	let err = service
		.knowledge_search(
			&scope(&["kb-a"]),
			request(serde_json::json!({ "queries": ["q1"], "knowledge_base_ids": ["kb-z"] })),
			&CancellationToken::new(),
		)
		.await
		.expect_err("No target matches, so the call must fail.");

	assert!(matches!(err, Error::NoSearchTargets));
}

#[tokio::test]
async fn documents_outside_whole_knowledge_bases_become_targets() {
	let knowledge = StubKnowledge {
		documents: vec![
			("doc-1".to_string(), "kb-a".to_string()),
			("doc-2".to_string(), "kb-c".to_string()),
		],
		..Default::default()
	};
	let service = service_with(ScriptedSearcher::default(), knowledge);
	let targets = service
		.resolve_search_targets(7, &ids(&["kb-a"]), &ids(&["doc-1", "doc-2", "doc-missing"]))
		.await
		.expect("Failed to resolve targets.");

	assert_eq!(
		targets,
		vec![
			SearchTarget::knowledge_base("kb-a"),
			SearchTarget::documents("kb-c", ids(&["doc-2"])),
		]
	);
}

#[tokio::test]
async fn faq_hits_carry_their_questions_and_answers() {
	let searcher = ScriptedSearcher::default()
		.with("reset", "kb-faq", Unit::Hits(vec![hit("f1", "k9", 0, 0.8)]));
	let knowledge = StubKnowledge {
		kb_types: HashMap::from([("kb-faq".to_string(), KnowledgeBaseType::Faq)]),
		faq: HashMap::from([(
			"f1".to_string(),
			FaqMetadata {
				standard_question: "How do I reset my password?".to_string(),
				similar_questions: ids(&["Forgot password"]),
				answers: ids(&["Use the reset link."]),
			},
		)]),
		..Default::default()
	};
	let service = service_with(searcher, knowledge);
	let out = service
		.knowledge_search(
			&scope(&["kb-faq"]),
			request(serde_json::json!({ "queries": ["reset"] })),
			&CancellationToken::new(),
		)
		.await
		.expect("Failed to run knowledge search.");

	assert!(out.output.contains("  FAQ Standard Question: How do I reset my password?\n"));
	assert_eq!(out.data["results"][0]["knowledge_base_type"], "faq");
	assert_eq!(out.data["results"][0]["explain"]["scorer"], "faq");
	assert_eq!(out.data["results"][0]["faq_answers"][0], "Use the reset link.");
}

#[tokio::test]
async fn no_hits_produce_the_empty_report() {
	let service = service_with(ScriptedSearcher::default(), StubKnowledge::default());
	let out = service
		.knowledge_search(
			&scope(&["kb-a", "kb-b"]),
			request(serde_json::json!({ "queries": ["nothing"] })),
			&CancellationToken::new(),
		)
		.await
		.expect("Empty results are not an error.");

	assert!(out.output.starts_with("No relevant content found in 2 knowledge base(s)."));
	assert_eq!(out.data["count"], 0);
}
