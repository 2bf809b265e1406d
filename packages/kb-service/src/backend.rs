use std::{collections::HashMap, sync::Arc};

use kb_domain::{FaqMetadata, KnowledgeBaseType};
use kb_storage::{
	db::Db,
	knowledge::{self, ChunkPage, GrepFilter},
	models::GrepChunk,
	query::{self, QueryRows},
};

use crate::{BoxFuture, Error, KnowledgeStore, QueryExecutor, Result, storage_tenant_id};

/// [`KnowledgeStore`] and [`QueryExecutor`] over the Postgres schema.
pub struct PostgresBackend {
	db: Arc<Db>,
}
impl PostgresBackend {
	pub fn new(db: Arc<Db>) -> Self {
		Self { db }
	}
}

impl KnowledgeStore for PostgresBackend {
	fn knowledge_base_types<'a>(
		&'a self,
		tenant_id: u64,
		knowledge_base_ids: &'a [String],
	) -> BoxFuture<'a, Result<HashMap<String, KnowledgeBaseType>>> {
		Box::pin(async move {
			let tenant_id = storage_tenant_id(tenant_id)?;
			let rows =
				knowledge::knowledge_base_kinds(&self.db, tenant_id, knowledge_base_ids).await?;

			Ok(rows.into_iter().map(|row| (row.id, KnowledgeBaseType::parse(&row.kb_type))).collect())
		})
	}

	fn document_knowledge_bases<'a>(
		&'a self,
		tenant_id: u64,
		knowledge_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<(String, String)>>> {
		Box::pin(async move {
			let tenant_id = storage_tenant_id(tenant_id)?;
			let rows = knowledge::document_owners(&self.db, tenant_id, knowledge_ids).await?;

			Ok(rows.into_iter().map(|row| (row.knowledge_id, row.knowledge_base_id)).collect())
		})
	}

	fn faq_metadata<'a>(
		&'a self,
		tenant_id: u64,
		chunk_id: &'a str,
	) -> BoxFuture<'a, Result<Option<FaqMetadata>>> {
		Box::pin(async move {
			let tenant_id = storage_tenant_id(tenant_id)?;
			let chunk = knowledge::get_chunk(&self.db, tenant_id, chunk_id).await?;

			Ok(chunk.and_then(|chunk| chunk.faq_metadata()))
		})
	}

	fn count_text_chunks<'a>(
		&'a self,
		tenant_id: u64,
		knowledge_id: &'a str,
	) -> BoxFuture<'a, Result<i64>> {
		Box::pin(async move {
			let tenant_id = storage_tenant_id(tenant_id)?;

			Ok(knowledge::count_text_chunks(&self.db, tenant_id, knowledge_id).await?)
		})
	}

	fn list_chunks<'a>(
		&'a self,
		tenant_id: u64,
		knowledge_id: &'a str,
		limit: u32,
		offset: u64,
	) -> BoxFuture<'a, Result<ChunkPage>> {
		Box::pin(async move {
			let tenant_id = storage_tenant_id(tenant_id)?;
			let offset = i64::try_from(offset).map_err(|_| Error::InvalidRequest {
				message: "offset is out of range.".to_string(),
			})?;

			Ok(knowledge::list_chunks(&self.db, tenant_id, knowledge_id, i64::from(limit), offset)
				.await?)
		})
	}

	fn grep_chunks<'a>(
		&'a self,
		tenant_id: u64,
		filter: GrepFilter<'a>,
	) -> BoxFuture<'a, Result<Vec<GrepChunk>>> {
		Box::pin(async move {
			let tenant_id = storage_tenant_id(tenant_id)?;

			Ok(knowledge::grep_chunks(&self.db, tenant_id, filter).await?)
		})
	}
}

impl QueryExecutor for PostgresBackend {
	fn execute_read_only<'a>(
		&'a self,
		sql: &'a str,
		timeout_ms: u64,
	) -> BoxFuture<'a, Result<QueryRows>> {
		Box::pin(async move { Ok(query::execute_read_only(&self.db, sql, timeout_ms).await?) })
	}
}
