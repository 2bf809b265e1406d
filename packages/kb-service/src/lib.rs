pub mod backend;
pub mod database_query;
pub mod grep_chunks;
pub mod knowledge_search;
pub mod list_chunks;
pub mod search;
pub mod tool;

mod error;

pub use error::{Error, Result};
pub use knowledge_search::KnowledgeScope;
pub use search::{RankingExplain, ScorerKind, SearchParams, SearchResultWithMeta};
pub use tool::{
	DatabaseQueryRequest, GrepChunksRequest, KnowledgeSearchRequest, ListKnowledgeChunksRequest,
	ToolDefinition, ToolOutput,
};

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use kb_config::{Config, EmbeddingProviderConfig, ProviderConfig};
use kb_domain::{FaqMetadata, KnowledgeBaseType, SearchResult, SearchTarget};
use kb_providers::{
	chat::{self, ChatMessage, ChatOptions},
	embedding,
	rerank::{self, RerankHit},
};
use kb_storage::{
	db::Db,
	knowledge::{ChunkPage, GrepFilter},
	models::GrepChunk,
	query::QueryRows,
};

use crate::{backend::PostgresBackend, search::hybrid::HybridSearcher};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, kb_providers::Result<Vec<Vec<f32>>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		passages: &'a [String],
	) -> BoxFuture<'a, kb_providers::Result<Vec<RerankHit>>>;
}

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		messages: &'a [ChatMessage],
		options: ChatOptions,
	) -> BoxFuture<'a, kb_providers::Result<String>>;
}

/// Hybrid retrieval over one search target.
pub trait Searcher
where
	Self: Send + Sync,
{
	fn hybrid_search<'a>(
		&'a self,
		tenant_id: u64,
		target: &'a SearchTarget,
		params: &'a SearchParams,
	) -> BoxFuture<'a, Result<Vec<SearchResult>>>;
}

/// Tenant-scoped read-only lookups used around the search pipeline.
pub trait KnowledgeStore
where
	Self: Send + Sync,
{
	fn knowledge_base_types<'a>(
		&'a self,
		tenant_id: u64,
		knowledge_base_ids: &'a [String],
	) -> BoxFuture<'a, Result<HashMap<String, KnowledgeBaseType>>>;

	/// `(knowledge_id, knowledge_base_id)` pairs for the documents that exist.
	fn document_knowledge_bases<'a>(
		&'a self,
		tenant_id: u64,
		knowledge_ids: &'a [String],
	) -> BoxFuture<'a, Result<Vec<(String, String)>>>;

	fn faq_metadata<'a>(
		&'a self,
		tenant_id: u64,
		chunk_id: &'a str,
	) -> BoxFuture<'a, Result<Option<FaqMetadata>>>;

	fn count_text_chunks<'a>(
		&'a self,
		tenant_id: u64,
		knowledge_id: &'a str,
	) -> BoxFuture<'a, Result<i64>>;

	/// One page of a document's text and FAQ chunks in index order.
	fn list_chunks<'a>(
		&'a self,
		tenant_id: u64,
		knowledge_id: &'a str,
		limit: u32,
		offset: u64,
	) -> BoxFuture<'a, Result<ChunkPage>>;

	fn grep_chunks<'a>(
		&'a self,
		tenant_id: u64,
		filter: GrepFilter<'a>,
	) -> BoxFuture<'a, Result<Vec<GrepChunk>>>;
}

/// Runs SQL that already passed the guard.
pub trait QueryExecutor
where
	Self: Send + Sync,
{
	fn execute_read_only<'a>(
		&'a self,
		sql: &'a str,
		timeout_ms: u64,
	) -> BoxFuture<'a, Result<QueryRows>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
	pub chat: Arc<dyn ChatProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		rerank: Arc<dyn RerankProvider>,
		chat: Arc<dyn ChatProvider>,
	) -> Self {
		Self { embedding, rerank, chat }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), rerank: provider.clone(), chat: provider }
	}
}

#[derive(Clone)]
pub struct Backends {
	pub searcher: Arc<dyn Searcher>,
	pub knowledge: Arc<dyn KnowledgeStore>,
	pub query: Arc<dyn QueryExecutor>,
}
impl Backends {
	pub fn new(
		searcher: Arc<dyn Searcher>,
		knowledge: Arc<dyn KnowledgeStore>,
		query: Arc<dyn QueryExecutor>,
	) -> Self {
		Self { searcher, knowledge, query }
	}

	pub fn postgres(db: Arc<Db>, cfg: &Config, embedding: Arc<dyn EmbeddingProvider>) -> Self {
		let backend = Arc::new(PostgresBackend::new(db.clone()));
		let searcher = Arc::new(HybridSearcher::new(
			db,
			cfg.providers.embedding.clone(),
			cfg.retrieval.rrf_k,
			embedding,
		));

		Self { searcher, knowledge: backend.clone(), query: backend }
	}
}

pub struct KbService {
	pub cfg: Config,
	pub providers: Providers,
	pub backends: Backends,
}
impl KbService {
	pub fn new(cfg: Config, db: Db) -> Self {
		let providers = Providers::default();
		let backends = Backends::postgres(Arc::new(db), &cfg, providers.embedding.clone());

		Self { cfg, providers, backends }
	}

	pub fn with_parts(cfg: Config, providers: Providers, backends: Backends) -> Self {
		Self { cfg, providers, backends }
	}
}

struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, kb_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}

impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		query: &'a str,
		passages: &'a [String],
	) -> BoxFuture<'a, kb_providers::Result<Vec<RerankHit>>> {
		Box::pin(rerank::rerank(cfg, query, passages))
	}
}

impl ChatProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a ProviderConfig,
		messages: &'a [ChatMessage],
		options: ChatOptions,
	) -> BoxFuture<'a, kb_providers::Result<String>> {
		Box::pin(chat::complete(cfg, messages, options))
	}
}

pub(crate) fn storage_tenant_id(tenant_id: u64) -> Result<i64> {
	i64::try_from(tenant_id).map_err(|_| Error::InvalidRequest {
		message: "tenant_id is out of range.".to_string(),
	})
}
