//! Agent-facing tool requests, their JSON schemas and the common output envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use kb_config::Retrieval;

use crate::{Error, Result};

pub const KNOWLEDGE_SEARCH: &str = "knowledge_search";
pub const DATABASE_QUERY: &str = "database_query";
pub const LIST_KNOWLEDGE_CHUNKS: &str = "list_knowledge_chunks";
pub const GREP_CHUNKS: &str = "grep_chunks";

pub const DEFAULT_CHUNK_LIMIT: u32 = 20;
pub const MAX_CHUNK_LIMIT: u32 = 100;
pub const DEFAULT_GREP_RESULTS: u32 = 50;
pub const MAX_GREP_RESULTS: u32 = 200;

const KNOWLEDGE_SEARCH_DESCRIPTION: &str = "\
Semantic search over the tenant's knowledge bases.

Pass 1 to 5 short, well-formed questions or topic statements in `queries`. Each query is searched in \
every selected knowledge base, and the merged results are reranked and diversified. Optionally limit \
the scope with `knowledge_base_ids`.

Returns passages grouped by source document, with image captions and OCR text when present, and the \
standard question, similar questions and answers for FAQ entries.";

const DATABASE_QUERY_DESCRIPTION: &str = "\
Run a read-only SQL SELECT against the tenant's metadata tables.

Only a single plain SELECT is accepted. CTEs, UNION, subqueries and locking clauses are refused. Every \
tenant-scoped table is filtered to the caller's tenant automatically, so do not add tenant_id \
conditions yourself.

Tables: knowledge_bases (id, name, description, type, embedding_model_id, created_at, updated_at), \
knowledges (id, knowledge_base_id, type, title, description, source, parse_status, enable_status, \
file_name, file_type, file_size, storage_size, created_at, updated_at, processed_at), chunks (id, \
knowledge_base_id, knowledge_id, content, chunk_index, is_enabled, chunk_type, created_at, \
updated_at), sessions (id, title, description, created_at, updated_at), tenants (id, name, \
description).

Example: SELECT parse_status, COUNT(*) AS count FROM knowledges GROUP BY parse_status";

const LIST_KNOWLEDGE_CHUNKS_DESCRIPTION: &str = "\
Read the chunks of one document in order.

Pass the document's `knowledge_id`, as shown in search results. Page through long documents with \
`limit` (default 20, max 100) and `offset`. Returns each chunk's id, index, type and full content, \
plus image captions and OCR text when present.";

const GREP_CHUNKS_DESCRIPTION: &str = "\
Find documents whose chunks contain exact keywords.

Pass one or more literal strings in `pattern`. Matching is case-insensitive and a chunk matches when \
it contains any pattern. Use this for names, codes and phrases that semantic search may miss. \
Returns up to 20 documents ranked by how many distinct patterns they contain and how often, with \
per-pattern hit counts. Follow up with list_knowledge_chunks or knowledge_search to read content.";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeSearchRequest {
	pub queries: Vec<String>,
	#[serde(default)]
	pub knowledge_base_ids: Vec<String>,
}
impl KnowledgeSearchRequest {
	/// Trims and drops blank entries, then enforces the configured limits. Returns the queries to run.
	pub fn validate(&mut self, cfg: &Retrieval) -> Result<Vec<String>> {
		let queries = non_blank(&self.queries);

		if queries.is_empty() {
			return Err(Error::InvalidRequest {
				message: "queries must contain at least one non-empty query.".to_string(),
			});
		}
		if queries.len() > cfg.max_queries as usize {
			return Err(Error::InvalidRequest {
				message: format!("queries must contain at most {} entries.", cfg.max_queries),
			});
		}

		self.knowledge_base_ids = non_blank(&self.knowledge_base_ids);

		if self.knowledge_base_ids.len() > cfg.max_knowledge_base_ids as usize {
			return Err(Error::InvalidRequest {
				message: format!(
					"knowledge_base_ids must contain at most {} entries.",
					cfg.max_knowledge_base_ids
				),
			});
		}

		Ok(queries)
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseQueryRequest {
	pub sql: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListKnowledgeChunksRequest {
	pub knowledge_id: String,
	#[serde(default)]
	pub limit: Option<i64>,
	#[serde(default)]
	pub offset: Option<i64>,
}
impl ListKnowledgeChunksRequest {
	/// Trims the id, clamps `limit` into `1..=100` and a negative `offset` to zero.
	pub fn validate(&self) -> Result<ChunkWindow> {
		let knowledge_id = self.knowledge_id.trim();

		if knowledge_id.is_empty() {
			return Err(Error::InvalidRequest { message: "knowledge_id is required.".to_string() });
		}

		let limit = self
			.limit
			.map(|limit| limit.clamp(1, i64::from(MAX_CHUNK_LIMIT)) as u32)
			.unwrap_or(DEFAULT_CHUNK_LIMIT);
		let offset = self.offset.unwrap_or(0).max(0) as u64;

		Ok(ChunkWindow { knowledge_id: knowledge_id.to_string(), limit, offset })
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkWindow {
	pub knowledge_id: String,
	pub limit: u32,
	pub offset: u64,
}
impl ChunkWindow {
	/// 1-based page number of `offset` at this page size.
	pub fn page(&self) -> u64 {
		self.offset / u64::from(self.limit) + 1
	}
}

/// A single pattern or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Patterns {
	One(String),
	Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrepChunksRequest {
	pub pattern: Patterns,
	#[serde(default)]
	pub knowledge_base_ids: Vec<String>,
	#[serde(default)]
	pub max_results: Option<i64>,
}
impl GrepChunksRequest {
	/// Returns the non-blank patterns and `max_results` clamped into `1..=200`.
	pub fn validate(&mut self) -> Result<(Vec<String>, u32)> {
		let patterns = match &self.pattern {
			Patterns::One(pattern) => non_blank(std::slice::from_ref(pattern)),
			Patterns::Many(patterns) => non_blank(patterns),
		};

		if patterns.is_empty() {
			return Err(Error::InvalidRequest {
				message: "pattern must contain at least one non-empty pattern.".to_string(),
			});
		}

		self.knowledge_base_ids = non_blank(&self.knowledge_base_ids);

		let max_results = self
			.max_results
			.map(|max| max.clamp(1, i64::from(MAX_GREP_RESULTS)) as u32)
			.unwrap_or(DEFAULT_GREP_RESULTS);

		Ok((patterns, max_results))
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
	pub name: String,
	pub description: String,
	pub parameters: Value,
}

/// Readable text for the agent plus a structured payload for callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
	pub output: String,
	pub data: Value,
}

/// Definitions of every tool, with array bounds taken from `cfg`.
pub fn definitions(cfg: &Retrieval) -> Vec<ToolDefinition> {
	vec![
		ToolDefinition {
			name: KNOWLEDGE_SEARCH.to_string(),
			description: KNOWLEDGE_SEARCH_DESCRIPTION.to_string(),
			parameters: serde_json::json!({
				"type": "object",
				"additionalProperties": false,
				"required": ["queries"],
				"properties": {
					"queries": {
						"type": "array",
						"description": "Questions or topics to search for, e.g. [\"What is RAG?\", \"RAG benefits\"].",
						"items": { "type": "string" },
						"minItems": 1,
						"maxItems": cfg.max_queries
					},
					"knowledge_base_ids": {
						"type": "array",
						"description": "Optional knowledge base ids to limit the search to.",
						"items": { "type": "string" },
						"minItems": 0,
						"maxItems": cfg.max_knowledge_base_ids
					}
				}
			}),
		},
		ToolDefinition {
			name: DATABASE_QUERY.to_string(),
			description: DATABASE_QUERY_DESCRIPTION.to_string(),
			parameters: serde_json::json!({
				"type": "object",
				"additionalProperties": false,
				"required": ["sql"],
				"properties": {
					"sql": {
						"type": "string",
						"description": "A single SELECT statement. The tenant filter is added automatically."
					}
				}
			}),
		},
		ToolDefinition {
			name: LIST_KNOWLEDGE_CHUNKS.to_string(),
			description: LIST_KNOWLEDGE_CHUNKS_DESCRIPTION.to_string(),
			parameters: serde_json::json!({
				"type": "object",
				"additionalProperties": false,
				"required": ["knowledge_id"],
				"properties": {
					"knowledge_id": {
						"type": "string",
						"description": "Document id to read chunks from."
					},
					"limit": {
						"type": "integer",
						"description": "Chunks per page.",
						"default": DEFAULT_CHUNK_LIMIT,
						"minimum": 1,
						"maximum": MAX_CHUNK_LIMIT
					},
					"offset": {
						"type": "integer",
						"description": "Position of the first chunk to return.",
						"default": 0,
						"minimum": 0
					}
				}
			}),
		},
		ToolDefinition {
			name: GREP_CHUNKS.to_string(),
			description: GREP_CHUNKS_DESCRIPTION.to_string(),
			parameters: serde_json::json!({
				"type": "object",
				"additionalProperties": false,
				"required": ["pattern"],
				"properties": {
					"pattern": {
						"type": "array",
						"description": "Literal keywords or phrases, matched case-insensitively with OR.",
						"items": { "type": "string" },
						"minItems": 1
					},
					"knowledge_base_ids": {
						"type": "array",
						"description": "Optional knowledge base ids to limit the search to.",
						"items": { "type": "string" },
						"maxItems": cfg.max_knowledge_base_ids
					},
					"max_results": {
						"type": "integer",
						"description": "Matching chunks to consider before grouping by document.",
						"default": DEFAULT_GREP_RESULTS,
						"minimum": 1,
						"maximum": MAX_GREP_RESULTS
					}
				}
			}),
		},
	]
}

fn non_blank(values: &[String]) -> Vec<String> {
	values
		.iter()
		.map(|value| value.trim())
		.filter(|value| !value.is_empty())
		.map(str::to_string)
		.collect()
}
