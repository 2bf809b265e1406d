use std::{collections::HashMap, sync::Arc};

use kb_service::{Error, GrepChunksRequest, KnowledgeScope, ListKnowledgeChunksRequest};
use kb_storage::models::{GrepChunk, ListedChunk};

use super::{FailingRerank, ScriptedChat, ScriptedSearcher, StubKnowledge, StubQuery, ids};

fn service_with(knowledge: Arc<StubKnowledge>) -> kb_service::KbService {
	super::service(
		super::config(&[]),
		super::providers(Arc::new(FailingRerank::default()), Arc::new(ScriptedChat::default())),
		Arc::new(ScriptedSearcher::default()),
		knowledge,
		Arc::new(StubQuery::default()),
	)
}

fn listed(id: &str, knowledge_id: &str, chunk_index: i32) -> ListedChunk {
	ListedChunk {
		id: id.to_string(),
		knowledge_id: knowledge_id.to_string(),
		knowledge_base_id: "kb-a".to_string(),
		content: format!("section {chunk_index} of {knowledge_id}"),
		chunk_index,
		chunk_type: "text".to_string(),
		start_at: 0,
		end_at: 0,
		parent_chunk_id: None,
		image_info: None,
	}
}

fn grep_row(id: &str, knowledge_id: &str, chunk_index: i32, content: &str) -> GrepChunk {
	GrepChunk {
		id: id.to_string(),
		knowledge_id: knowledge_id.to_string(),
		knowledge_base_id: "kb-a".to_string(),
		knowledge_title: format!("Guide {knowledge_id}"),
		content: content.to_string(),
		chunk_index,
		parent_chunk_id: None,
		total_chunk_count: 3,
	}
}

fn list_request(raw: serde_json::Value) -> ListKnowledgeChunksRequest {
	serde_json::from_value(raw).expect("Failed to parse request.")
}

fn grep_request(raw: serde_json::Value) -> GrepChunksRequest {
	serde_json::from_value(raw).expect("Failed to parse request.")
}

#[tokio::test]
async fn lists_a_page_of_chunks_with_defaults() {
	let knowledge = Arc::new(StubKnowledge {
		titles: HashMap::from([("doc-1".to_string(), "Onboarding".to_string())]),
		chunks: (0..25).map(|idx| listed(&format!("c{idx}"), "doc-1", idx)).collect(),
		..Default::default()
	});
	let service = service_with(knowledge.clone());
	let out = service
		.list_knowledge_chunks(7, list_request(serde_json::json!({ "knowledge_id": " doc-1 " })))
		.await
		.expect("Failed to list chunks.");

	assert_eq!(knowledge.list_calls(), vec![("doc-1".to_string(), 20, 0)]);
	assert_eq!(out.data["total_chunks"], 25);
	assert_eq!(out.data["fetched_chunks"], 20);
	assert_eq!(out.data["knowledge_title"], "Onboarding");
	assert_eq!(out.data["chunks"][19]["chunk_id"], "c19");
	assert!(out.output.contains("Document: Onboarding (doc-1)\nTotal chunks: 25\n"));
	assert!(out.output.contains("More chunks remain."));
}

#[tokio::test]
async fn later_pages_use_the_requested_window() {
	let knowledge = Arc::new(StubKnowledge {
		chunks: (0..25).map(|idx| listed(&format!("c{idx}"), "doc-1", idx)).collect(),
		..Default::default()
	});
	let service = service_with(knowledge.clone());
	let out = service
		.list_knowledge_chunks(
			7,
			list_request(serde_json::json!({ "knowledge_id": "doc-1", "limit": 500, "offset": 20 })),
		)
		.await
		.expect("Failed to list chunks.");

	assert_eq!(knowledge.list_calls(), vec![("doc-1".to_string(), 100, 20)]);
	assert_eq!(out.data["fetched_chunks"], 5);
	assert_eq!(out.data["page"], 1);
	assert_eq!(out.data["chunks"][0]["chunk_index"], 20);
	assert!(!out.output.contains("More chunks remain."));
}

#[tokio::test]
async fn blank_knowledge_id_is_invalid() {
	let knowledge = Arc::new(StubKnowledge::default());
	let service = service_with(knowledge.clone());
	let err = service
		.list_knowledge_chunks(7, list_request(serde_json::json!({ "knowledge_id": "  " })))
		.await
		.expect_err("Blank knowledge_id must be rejected.");

	assert!(matches!(err, Error::InvalidRequest { .. }));
	assert!(knowledge.list_calls().is_empty());
}

#[tokio::test]
async fn grep_ranks_documents_and_falls_back_to_scope_ids() {
	let knowledge = Arc::new(StubKnowledge {
		grep_rows: vec![
			grep_row("c1", "doc-1", 0, "Refund requests need the invoice number."),
			grep_row("c2", "doc-2", 0, "Refund window is thirty days. Refund twice? No."),
			grep_row("c3", "doc-2", 0, "duplicate position is dropped"),
		],
		..Default::default()
	});
	let service = service_with(knowledge.clone());
	let scope = KnowledgeScope {
		tenant_id: 7,
		knowledge_base_ids: ids(&["kb-a"]),
		knowledge_ids: ids(&["doc-1", "doc-2"]),
	};
	let out = service
		.grep_chunks(
			&scope,
			grep_request(serde_json::json!({ "pattern": ["refund", "INVOICE", " "] })),
		)
		.await
		.expect("Failed to grep chunks.");
	let calls = knowledge.grep_calls();

	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].0, 7);
	assert_eq!(calls[0].1, ids(&["refund", "INVOICE"]));
	assert_eq!(calls[0].2, ids(&["kb-a"]));
	assert_eq!(calls[0].3, ids(&["doc-1", "doc-2"]));
	assert_eq!(out.data["result_count"], 2);
	assert_eq!(out.data["knowledge_results"][0]["knowledge_id"], "doc-1");
	assert_eq!(out.data["knowledge_results"][0]["distinct_patterns"], 2);
	assert_eq!(out.data["knowledge_results"][1]["pattern_counts"]["refund"], 2);
	assert_eq!(out.data["knowledge_results"][1]["chunk_hit_count"], 1);
	assert_eq!(out.data["display_type"], "grep_results");
	assert!(out.output.contains("1) knowledge_id=doc-1 | title=Guide doc-1 | chunk_hits=1"));
}

#[tokio::test]
async fn grep_prefers_request_knowledge_bases() {
	let knowledge = Arc::new(StubKnowledge::default());
	let service = service_with(knowledge.clone());
	let scope =
		KnowledgeScope { tenant_id: 7, knowledge_base_ids: ids(&["kb-a"]), knowledge_ids: Vec::new() };
	let out = service
		.grep_chunks(
			&scope,
			grep_request(serde_json::json!({ "pattern": "sku-42", "knowledge_base_ids": ["kb-b"] })),
		)
		.await
		.expect("Failed to grep chunks.");

	assert_eq!(knowledge.grep_calls()[0].2, ids(&["kb-b"]));
	assert_eq!(out.data["result_count"], 0);
	assert!(out.output.ends_with("No matches found.\n"));
}

#[tokio::test]
async fn grep_without_patterns_is_invalid() {
	let knowledge = Arc::new(StubKnowledge::default());
	let service = service_with(knowledge.clone());
	let scope =
		KnowledgeScope { tenant_id: 7, knowledge_base_ids: Vec::new(), knowledge_ids: Vec::new() };
	let err = service
		.grep_chunks(&scope, grep_request(serde_json::json!({ "pattern": [" "] })))
		.await
		.expect_err("Blank patterns must be rejected.");

	assert!(matches!(err, Error::InvalidRequest { .. }));
	assert!(knowledge.grep_calls().is_empty());
}
