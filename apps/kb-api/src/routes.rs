use axum::{
	Json, Router,
	extract::{State, rejection::JsonRejection},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::state::{AppState, RequestScope};
use kb_service::{
	DatabaseQueryRequest, Error, GrepChunksRequest, KnowledgeScope, KnowledgeSearchRequest,
	ListKnowledgeChunksRequest, ToolDefinition, ToolOutput, tool,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeSearchCall {
	pub tenant_id: u64,
	#[serde(default)]
	pub scope: ScopeBody,
	pub arguments: KnowledgeSearchRequest,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeBody {
	#[serde(default)]
	pub knowledge_base_ids: Vec<String>,
	#[serde(default)]
	pub knowledge_ids: Vec<String>,
}
impl ScopeBody {
	fn into_scope(self, tenant_id: u64) -> KnowledgeScope {
		KnowledgeScope {
			tenant_id,
			knowledge_base_ids: self.knowledge_base_ids,
			knowledge_ids: self.knowledge_ids,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseQueryCall {
	pub tenant_id: u64,
	pub arguments: DatabaseQueryRequest,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListKnowledgeChunksCall {
	pub tenant_id: u64,
	pub arguments: ListKnowledgeChunksRequest,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrepChunksCall {
	pub tenant_id: u64,
	#[serde(default)]
	pub scope: ScopeBody,
	pub arguments: GrepChunksRequest,
}

#[derive(Debug, Serialize)]
pub struct ToolsResponse {
	pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}

impl From<Error> for ApiError {
	fn from(err: Error) -> Self {
		match err {
			Error::InvalidRequest { message } =>
				json_error(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message),
			Error::NoSearchTargets =>
				json_error(StatusCode::BAD_REQUEST, "NO_SEARCH_TARGETS", err.to_string()),
			Error::SqlRejected(rejection) =>
				json_error(StatusCode::UNPROCESSABLE_ENTITY, "SQL_REJECTED", rejection.to_string()),
			Error::Provider { message } => {
				tracing::error!(error = %message, "Provider failure.");

				json_error(StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", "Upstream provider failed.")
			},
			Error::Storage { message } => {
				tracing::error!(error = %message, "Storage failure.");

				json_error(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", "Storage request failed.")
			},
			Error::Cancelled =>
				json_error(StatusCode::REQUEST_TIMEOUT, "CANCELLED", err.to_string()),
		}
	}
}

impl From<JsonRejection> for ApiError {
	fn from(err: JsonRejection) -> Self {
		json_error(StatusCode::BAD_REQUEST, "INVALID_REQUEST", err.body_text())
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/tools", get(tools))
		.route("/v1/tools/knowledge_search", post(knowledge_search))
		.route("/v1/tools/database_query", post(database_query))
		.route("/v1/tools/list_knowledge_chunks", post(list_knowledge_chunks))
		.route("/v1/tools/grep_chunks", post(grep_chunks))
		.with_state(state)
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
	ApiError::new(status, code, message)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn tools(State(state): State<AppState>) -> Json<ToolsResponse> {
	Json(ToolsResponse { tools: tool::definitions(&state.service.cfg.retrieval) })
}

async fn knowledge_search(
	State(state): State<AppState>,
	payload: Result<Json<KnowledgeSearchCall>, JsonRejection>,
) -> Result<Json<ToolOutput>, ApiError> {
	let Json(call) = payload?;
	let scope = call.scope.into_scope(call.tenant_id);
	let request = RequestScope::new(state.request_timeout());
	let output = state.service.knowledge_search(&scope, call.arguments, request.token()).await?;

	Ok(Json(output))
}

async fn database_query(
	State(state): State<AppState>,
	payload: Result<Json<DatabaseQueryCall>, JsonRejection>,
) -> Result<Json<ToolOutput>, ApiError> {
	let Json(call) = payload?;
	let output = state.service.database_query(call.tenant_id, call.arguments).await?;

	Ok(Json(output))
}

async fn list_knowledge_chunks(
	State(state): State<AppState>,
	payload: Result<Json<ListKnowledgeChunksCall>, JsonRejection>,
) -> Result<Json<ToolOutput>, ApiError> {
	let Json(call) = payload?;
	let output = state.service.list_knowledge_chunks(call.tenant_id, call.arguments).await?;

	Ok(Json(output))
}

async fn grep_chunks(
	State(state): State<AppState>,
	payload: Result<Json<GrepChunksCall>, JsonRejection>,
) -> Result<Json<ToolOutput>, ApiError> {
	let Json(call) = payload?;
	let scope = call.scope.into_scope(call.tenant_id);
	let output = state.service.grep_chunks(&scope, call.arguments).await?;

	Ok(Json(output))
}
