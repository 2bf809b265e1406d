use std::sync::Arc;

use serde_json::{Map, Value};

use kb_domain::sql_guard::{self, SqlRejection};
use kb_service::{DatabaseQueryRequest, Error};
use kb_storage::query::QueryRows;

use super::{FailingRerank, ScriptedChat, ScriptedSearcher, StubKnowledge, StubQuery};

fn service_with(query: Arc<StubQuery>) -> kb_service::KbService {
	super::service(
		super::config(&[]),
		super::providers(Arc::new(FailingRerank::default()), Arc::new(ScriptedChat::default())),
		Arc::new(ScriptedSearcher::default()),
		Arc::new(StubKnowledge::default()),
		query,
	)
}

fn request(sql: &str) -> DatabaseQueryRequest {
	DatabaseQueryRequest { sql: sql.to_string() }
}

fn one_row() -> QueryRows {
	let mut row = Map::new();

	row.insert("name".to_string(), Value::from("Handbook"));
	row.insert("doc_count".to_string(), Value::from(3));

	QueryRows { columns: vec!["name".to_string(), "doc_count".to_string()], rows: vec![row] }
}

#[tokio::test]
async fn secured_sql_is_executed_with_the_configured_timeout() {
	let query = Arc::new(StubQuery { rows: one_row(), ..Default::default() });
	let service = service_with(query.clone());
	let out = service
		.database_query(42, request("SELECT name FROM knowledge_bases"))
		.await
		.expect("Failed to run database query.");
	let executed = query.executed();

	assert_eq!(executed.len(), 1);
	assert_eq!(executed[0].1, 5_000);
	assert_eq!(out.data["row_count"], 1);
	assert_eq!(out.data["tenant_id"], 42);
	assert_eq!(out.data["query"], executed[0].0.as_str());
	assert!(out.output.contains("--- Row #1 ---\n  name: Handbook\n  doc_count: 3\n"));

	if sql_guard::parser_available() {
		assert!(executed[0].0.contains("tenant_id = 42"));
	}
}

#[tokio::test]
async fn writes_are_rejected_before_execution() {
	let query = Arc::new(StubQuery::default());
	let service = service_with(query.clone());
	let err = service
		.database_query(42, request("DELETE FROM knowledges"))
		.await
		.expect_err("Writes must be rejected.");

	assert!(matches!(err, Error::SqlRejected(_)));
	assert!(query.executed().is_empty());
}

#[tokio::test]
async fn too_short_sql_is_rejected() {
	let service = service_with(Arc::new(StubQuery::default()));
	let err = service
		.database_query(42, request("SEL"))
		.await
		.expect_err("Short SQL must be rejected.");

	assert!(matches!(err, Error::SqlRejected(SqlRejection::TooShort { min: 6 })));
}

#[tokio::test]
async fn unsafe_mode_is_refused_without_opt_in() {
	if sql_guard::parser_available() {
		return;
	}

	let query = Arc::new(StubQuery::default());
	let service = service_with(query.clone());
	let err = service
		.database_query(42, request("SELECT name FROM knowledge_bases"))
		.await
		.expect_err("Unscoped SQL must be refused.");

	assert!(matches!(err, Error::SqlRejected(SqlRejection::ParserUnavailable)));
	assert!(query.executed().is_empty());
}
