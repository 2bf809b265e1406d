//! Vector and keyword retrieval over enabled chunks of one knowledge base.

use crate::{Result, db::Db, models::ChunkHit};

const HIT_COLUMNS: &str = "\
c.id,
c.content,
c.knowledge_id,
c.knowledge_base_id,
c.chunk_index,
k.title AS knowledge_title,
c.start_at,
c.end_at,
c.chunk_type,
c.parent_chunk_id,
c.image_info,
k.file_name AS knowledge_filename,
k.source AS knowledge_source";

/// Where a search runs. `knowledge_ids` narrows the knowledge base to specific documents.
#[derive(Debug, Clone, Copy)]
pub struct SearchScope<'a> {
	pub tenant_id: i64,
	pub knowledge_base_id: &'a str,
	pub knowledge_ids: Option<&'a [String]>,
}

pub async fn vector_search(
	db: &Db,
	scope: SearchScope<'_>,
	embedding: &[f32],
	threshold: f32,
	limit: u32,
) -> Result<Vec<ChunkHit>> {
	let sql = format!(
		"\
SELECT {HIT_COLUMNS}, (1 - (e.embedding <=> $1::text::vector))::real AS score
FROM embeddings e
JOIN chunks c ON c.id = e.chunk_id
JOIN knowledges k ON k.id = c.knowledge_id
WHERE c.tenant_id = $2
	AND c.knowledge_base_id = $3
	AND ($4::text[] IS NULL OR c.knowledge_id = ANY($4))
	AND c.is_enabled
	AND 1 - (e.embedding <=> $1::text::vector) >= $5
ORDER BY e.embedding <=> $1::text::vector ASC, c.id ASC
LIMIT $6"
	);
	let hits = sqlx::query_as::<_, ChunkHit>(&sql)
		.bind(vector_to_pg(embedding))
		.bind(scope.tenant_id)
		.bind(scope.knowledge_base_id)
		.bind(scope.knowledge_ids)
		.bind(f64::from(threshold))
		.bind(i64::from(limit))
		.fetch_all(&db.pool)
		.await?;

	tracing::debug!(
		knowledge_base_id = scope.knowledge_base_id,
		hits = hits.len(),
		"Vector search finished."
	);

	Ok(hits)
}

pub async fn keyword_search(
	db: &Db,
	scope: SearchScope<'_>,
	query: &str,
	threshold: f32,
	limit: u32,
) -> Result<Vec<ChunkHit>> {
	let sql = format!(
		"\
SELECT {HIT_COLUMNS}, ranked.score
FROM (
	SELECT
		c.id AS chunk_id,
		ts_rank_cd(to_tsvector('simple', c.content), plainto_tsquery('simple', $1), 32)::real AS score
	FROM chunks c
	WHERE c.tenant_id = $2
		AND c.knowledge_base_id = $3
		AND ($4::text[] IS NULL OR c.knowledge_id = ANY($4))
		AND c.is_enabled
		AND to_tsvector('simple', c.content) @@ plainto_tsquery('simple', $1)
) ranked
JOIN chunks c ON c.id = ranked.chunk_id
JOIN knowledges k ON k.id = c.knowledge_id
WHERE ranked.score >= $5
ORDER BY ranked.score DESC, c.id ASC
LIMIT $6"
	);
	let hits = sqlx::query_as::<_, ChunkHit>(&sql)
		.bind(query)
		.bind(scope.tenant_id)
		.bind(scope.knowledge_base_id)
		.bind(scope.knowledge_ids)
		.bind(threshold)
		.bind(i64::from(limit))
		.fetch_all(&db.pool)
		.await?;

	tracing::debug!(
		knowledge_base_id = scope.knowledge_base_id,
		hits = hits.len(),
		"Keyword search finished."
	);

	Ok(hits)
}

/// Renders an embedding as a pgvector text literal.
pub fn vector_to_pg(vec: &[f32]) -> String {
	let mut out = String::with_capacity(vec.len() * 8 + 2);

	out.push('[');

	for (idx, value) in vec.iter().enumerate() {
		if idx > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}
