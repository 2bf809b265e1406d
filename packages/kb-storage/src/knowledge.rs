//! Tenant-scoped lookups over knowledge bases, documents and chunks.

use crate::{
	Error, Result,
	db::Db,
	models::{Chunk, DocumentOwner, GrepChunk, KnowledgeBaseKind, ListedChunk},
};

/// One page of a document's text and FAQ chunks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkPage {
	/// `None` when the document does not exist for the tenant.
	pub knowledge_title: Option<String>,
	/// Text and FAQ chunks in the whole document.
	pub total: i64,
	pub chunks: Vec<ListedChunk>,
}

/// Case-insensitive substring search over enabled chunks. Patterns are matched literally and
/// combined with OR; empty id lists do not filter.
#[derive(Debug, Clone, Copy)]
pub struct GrepFilter<'a> {
	pub patterns: &'a [String],
	pub knowledge_base_ids: &'a [String],
	pub knowledge_ids: &'a [String],
	pub limit: i64,
}

pub async fn knowledge_base_kinds(
	db: &Db,
	tenant_id: i64,
	knowledge_base_ids: &[String],
) -> Result<Vec<KnowledgeBaseKind>> {
	let rows = sqlx::query_as::<_, KnowledgeBaseKind>(
		"\
SELECT id, type AS kb_type
FROM knowledge_bases
WHERE tenant_id = $1 AND id = ANY($2)",
	)
	.bind(tenant_id)
	.bind(knowledge_base_ids)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}

pub async fn document_owners(
	db: &Db,
	tenant_id: i64,
	knowledge_ids: &[String],
) -> Result<Vec<DocumentOwner>> {
	let rows = sqlx::query_as::<_, DocumentOwner>(
		"\
SELECT id AS knowledge_id, knowledge_base_id
FROM knowledges
WHERE tenant_id = $1 AND id = ANY($2)",
	)
	.bind(tenant_id)
	.bind(knowledge_ids)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}

pub async fn get_chunk(db: &Db, tenant_id: i64, chunk_id: &str) -> Result<Option<Chunk>> {
	let row = sqlx::query_as::<_, Chunk>(
		"\
SELECT id, tenant_id, knowledge_base_id, knowledge_id, content, chunk_index, chunk_type, metadata
FROM chunks
WHERE tenant_id = $1 AND id = $2",
	)
	.bind(tenant_id)
	.bind(chunk_id)
	.fetch_optional(&db.pool)
	.await?;

	Ok(row)
}

pub async fn count_text_chunks(db: &Db, tenant_id: i64, knowledge_id: &str) -> Result<i64> {
	let count: i64 = sqlx::query_scalar(
		"\
SELECT count(*)
FROM chunks
WHERE tenant_id = $1 AND knowledge_id = $2 AND chunk_type = 'text'",
	)
	.bind(tenant_id)
	.bind(knowledge_id)
	.fetch_one(&db.pool)
	.await?;

	Ok(count)
}

pub async fn knowledge_title(db: &Db, tenant_id: i64, knowledge_id: &str) -> Result<Option<String>> {
	let title: Option<String> =
		sqlx::query_scalar("SELECT title FROM knowledges WHERE tenant_id = $1 AND id = $2")
			.bind(tenant_id)
			.bind(knowledge_id)
			.fetch_optional(&db.pool)
			.await?;

	Ok(title.map(|title| title.trim().to_string()))
}

/// Text and FAQ chunks of one document in `chunk_index` order, starting at `offset`.
pub async fn list_chunks(
	db: &Db,
	tenant_id: i64,
	knowledge_id: &str,
	limit: i64,
	offset: i64,
) -> Result<ChunkPage> {
	if limit <= 0 || offset < 0 {
		return Err(Error::InvalidArgument(
			"limit must be positive and offset must not be negative.".to_string(),
		));
	}

	let knowledge_title = knowledge_title(db, tenant_id, knowledge_id).await?;
	let total: i64 = sqlx::query_scalar(
		"\
SELECT count(*)
FROM chunks
WHERE tenant_id = $1 AND knowledge_id = $2 AND chunk_type IN ('text', 'faq')",
	)
	.bind(tenant_id)
	.bind(knowledge_id)
	.fetch_one(&db.pool)
	.await?;
	let chunks = sqlx::query_as::<_, ListedChunk>(
		"\
SELECT
	id,
	knowledge_id,
	knowledge_base_id,
	content,
	chunk_index,
	chunk_type,
	start_at,
	end_at,
	parent_chunk_id,
	image_info
FROM chunks
WHERE tenant_id = $1 AND knowledge_id = $2 AND chunk_type IN ('text', 'faq')
ORDER BY chunk_index ASC, id ASC
LIMIT $3 OFFSET $4",
	)
	.bind(tenant_id)
	.bind(knowledge_id)
	.bind(limit)
	.bind(offset)
	.fetch_all(&db.pool)
	.await?;

	Ok(ChunkPage { knowledge_title, total, chunks })
}

/// Newest matches first, at most `filter.limit` rows.
pub async fn grep_chunks(db: &Db, tenant_id: i64, filter: GrepFilter<'_>) -> Result<Vec<GrepChunk>> {
	if filter.patterns.is_empty() || filter.limit <= 0 {
		return Ok(Vec::new());
	}

	let patterns: Vec<String> =
		filter.patterns.iter().map(|pattern| format!("%{}%", escape_like(pattern))).collect();
	let rows = sqlx::query_as::<_, GrepChunk>(
		"\
SELECT
	c.id,
	c.knowledge_id,
	c.knowledge_base_id,
	COALESCE(k.title, '') AS knowledge_title,
	c.content,
	c.chunk_index,
	c.parent_chunk_id,
	COUNT(*) OVER (PARTITION BY c.knowledge_id) AS total_chunk_count
FROM chunks c
LEFT JOIN knowledges k ON k.id = c.knowledge_id AND k.tenant_id = c.tenant_id
WHERE c.tenant_id = $1
	AND c.is_enabled
	AND c.content ILIKE ANY($2)
	AND (cardinality($3::text[]) = 0 OR c.knowledge_base_id = ANY($3))
	AND (cardinality($4::text[]) = 0 OR c.knowledge_id = ANY($4))
ORDER BY c.created_at DESC, c.id ASC
LIMIT $5",
	)
	.bind(tenant_id)
	.bind(&patterns)
	.bind(filter.knowledge_base_ids)
	.bind(filter.knowledge_ids)
	.bind(filter.limit)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}

/// Escapes `LIKE` metacharacters so the pattern matches literally under the default `\` escape.
pub fn escape_like(pattern: &str) -> String {
	let mut escaped = String::with_capacity(pattern.len());

	for ch in pattern.chars() {
		if matches!(ch, '\\' | '%' | '_') {
			escaped.push('\\');
		}

		escaped.push(ch);
	}

	escaped
}

pub async fn insert_tenant(db: &Db, name: &str) -> Result<i64> {
	let id: i64 = sqlx::query_scalar("INSERT INTO tenants (name) VALUES ($1) RETURNING id")
		.bind(name)
		.fetch_one(&db.pool)
		.await?;

	Ok(id)
}

pub async fn insert_knowledge_base(
	db: &Db,
	tenant_id: i64,
	id: &str,
	name: &str,
	kb_type: &str,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO knowledge_bases (id, tenant_id, name, type)
VALUES ($1, $2, $3, $4)",
	)
	.bind(id)
	.bind(tenant_id)
	.bind(name)
	.bind(kb_type)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn insert_knowledge(
	db: &Db,
	tenant_id: i64,
	knowledge_base_id: &str,
	id: &str,
	title: &str,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO knowledges (id, tenant_id, knowledge_base_id, title, parse_status)
VALUES ($1, $2, $3, $4, 'completed')",
	)
	.bind(id)
	.bind(tenant_id)
	.bind(knowledge_base_id)
	.bind(title)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub struct NewChunk<'a> {
	pub id: &'a str,
	pub tenant_id: i64,
	pub knowledge_base_id: &'a str,
	pub knowledge_id: &'a str,
	pub content: &'a str,
	pub chunk_index: i32,
	pub chunk_type: &'a str,
	pub metadata: serde_json::Value,
}

pub async fn insert_chunk(db: &Db, chunk: &NewChunk<'_>) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO chunks (
	id,
	tenant_id,
	knowledge_base_id,
	knowledge_id,
	content,
	chunk_index,
	chunk_type,
	metadata
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
	)
	.bind(chunk.id)
	.bind(chunk.tenant_id)
	.bind(chunk.knowledge_base_id)
	.bind(chunk.knowledge_id)
	.bind(chunk.content)
	.bind(chunk.chunk_index)
	.bind(chunk.chunk_type)
	.bind(&chunk.metadata)
	.execute(&db.pool)
	.await?;

	Ok(())
}

/// `embedding` is a pgvector literal such as `[0.1,0.2]`.
pub async fn insert_embedding(
	db: &Db,
	chunk_id: &str,
	knowledge_id: &str,
	knowledge_base_id: &str,
	dimension: i32,
	embedding: &str,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO embeddings (chunk_id, knowledge_id, knowledge_base_id, dimension, embedding)
VALUES ($1, $2, $3, $4, $5::text::vector)",
	)
	.bind(chunk_id)
	.bind(knowledge_id)
	.bind(knowledge_base_id)
	.bind(dimension)
	.bind(embedding)
	.execute(&db.pool)
	.await?;

	Ok(())
}
