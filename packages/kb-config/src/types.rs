use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub rerank: Rerank,
	#[serde(default)]
	pub ranking: Ranking,
	#[serde(default)]
	pub diversity: Diversity,
	#[serde(default)]
	pub security: Security,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	#[serde(default = "default_pool_max_conns")]
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	/// Optional. Cross-encoder style rerank endpoint tried first when scoring candidates.
	pub rerank: Option<ProviderConfig>,
	/// Optional. Chat-completion endpoint used for prompt-based scoring.
	pub llm: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub top_k: u32,
	pub vector_threshold: f32,
	pub keyword_threshold: f32,
	pub max_queries: u32,
	pub max_knowledge_base_ids: u32,
	pub max_concurrent_searches: u32,
	/// Constant `k` in the reciprocal rank fusion term `1 / (k + rank)`.
	pub rrf_k: u32,
	pub request_timeout_ms: u64,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			top_k: 5,
			vector_threshold: 0.6,
			keyword_threshold: 0.5,
			max_queries: 5,
			max_knowledge_base_ids: 10,
			max_concurrent_searches: 16,
			rrf_k: 60,
			request_timeout_ms: 30_000,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Rerank {
	pub llm_batch_size: u32,
	pub llm_max_passage_chars: u32,
	pub llm_temperature: f32,
}
impl Default for Rerank {
	fn default() -> Self {
		Self { llm_batch_size: 15, llm_max_passage_chars: 800, llm_temperature: 0.1 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ranking {
	pub model_weight: f32,
	pub base_weight: f32,
	pub source_weight: f32,
	/// Source weight applied to results whose knowledge source is web search.
	pub web_source_factor: f32,
	/// Maximum absolute adjustment contributed by the chunk position prior.
	pub position_prior_span: f32,
}
impl Default for Ranking {
	fn default() -> Self {
		Self {
			model_weight: 0.6,
			base_weight: 0.3,
			source_weight: 0.1,
			web_source_factor: 0.95,
			position_prior_span: 0.05,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Diversity {
	pub mmr_lambda: f32,
}
impl Default for Diversity {
	fn default() -> Self {
		Self { mmr_lambda: 0.7 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Security {
	pub sql_min_chars: u32,
	pub sql_max_chars: u32,
	/// Permits the prefix-only SQL check when the crate is built without a SQL parser.
	pub allow_unsafe_sql_fallback: bool,
	pub query_timeout_ms: u64,
}
impl Default for Security {
	fn default() -> Self {
		Self {
			sql_min_chars: 6,
			sql_max_chars: 4_096,
			allow_unsafe_sql_fallback: false,
			query_timeout_ms: 5_000,
		}
	}
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_pool_max_conns() -> u32 {
	10
}
