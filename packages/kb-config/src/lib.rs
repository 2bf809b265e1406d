mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, Diversity, EmbeddingProviderConfig, Postgres, ProviderConfig, Providers, Ranking,
	Rerank, Retrieval, Security, Service, Storage,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	finish(cfg)
}

pub fn from_toml_str(raw: &str) -> Result<Config> {
	let cfg: Config = toml::from_str(raw).map_err(|err| Error::ParseInline { source: err })?;

	finish(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "Provider embedding api_key must be non-empty.".to_string(),
		});
	}

	for (label, provider) in
		[("rerank", cfg.providers.rerank.as_ref()), ("llm", cfg.providers.llm.as_ref())]
	{
		let Some(provider) = provider else { continue };

		if provider.api_key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
		if provider.model.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} model must be non-empty."),
			});
		}
	}

	validate_retrieval(cfg)?;
	validate_rerank(cfg)?;
	validate_ranking(cfg)?;

	if !(0.0..=1.0).contains(&cfg.diversity.mmr_lambda) {
		return Err(Error::Validation {
			message: "diversity.mmr_lambda must be in the range 0.0-1.0.".to_string(),
		});
	}
	if cfg.security.sql_min_chars >= cfg.security.sql_max_chars {
		return Err(Error::Validation {
			message: "security.sql_min_chars must be less than security.sql_max_chars.".to_string(),
		});
	}
	if cfg.security.query_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "security.query_timeout_ms must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn finish(mut cfg: Config) -> Result<Config> {
	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

fn validate_retrieval(cfg: &Config) -> Result<()> {
	let retrieval = &cfg.retrieval;

	for (label, value) in [
		("retrieval.top_k", retrieval.top_k),
		("retrieval.max_queries", retrieval.max_queries),
		("retrieval.max_knowledge_base_ids", retrieval.max_knowledge_base_ids),
		("retrieval.max_concurrent_searches", retrieval.max_concurrent_searches),
		("retrieval.rrf_k", retrieval.rrf_k),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	for (label, value) in [
		("retrieval.vector_threshold", retrieval.vector_threshold),
		("retrieval.keyword_threshold", retrieval.keyword_threshold),
	] {
		if !(0.0..=1.0).contains(&value) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-1.0."),
			});
		}
	}

	if retrieval.request_timeout_ms == 0 {
		return Err(Error::Validation {
			message: "retrieval.request_timeout_ms must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_rerank(cfg: &Config) -> Result<()> {
	if cfg.rerank.llm_batch_size == 0 {
		return Err(Error::Validation {
			message: "rerank.llm_batch_size must be greater than zero.".to_string(),
		});
	}
	if cfg.rerank.llm_max_passage_chars == 0 {
		return Err(Error::Validation {
			message: "rerank.llm_max_passage_chars must be greater than zero.".to_string(),
		});
	}
	if !(0.0..=2.0).contains(&cfg.rerank.llm_temperature) {
		return Err(Error::Validation {
			message: "rerank.llm_temperature must be in the range 0.0-2.0.".to_string(),
		});
	}

	Ok(())
}

fn validate_ranking(cfg: &Config) -> Result<()> {
	let ranking = &cfg.ranking;

	for (label, value) in [
		("ranking.model_weight", ranking.model_weight),
		("ranking.base_weight", ranking.base_weight),
		("ranking.source_weight", ranking.source_weight),
		("ranking.web_source_factor", ranking.web_source_factor),
		("ranking.position_prior_span", ranking.position_prior_span),
	] {
		if !value.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if value < 0.0 {
			return Err(Error::Validation { message: format!("{label} must be zero or greater.") });
		}
	}

	if ranking.model_weight <= ranking.base_weight {
		return Err(Error::Validation {
			message: "ranking.model_weight must be greater than ranking.base_weight.".to_string(),
		});
	}
	if ranking.web_source_factor > 1.0 {
		return Err(Error::Validation {
			message: "ranking.web_source_factor must be 1.0 or less.".to_string(),
		});
	}
	if ranking.position_prior_span > 0.5 {
		return Err(Error::Validation {
			message: "ranking.position_prior_span must be 0.5 or less.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.providers.rerank.as_ref().map(|p| p.api_base.trim().is_empty()).unwrap_or(false) {
		cfg.providers.rerank = None;
	}
	if cfg.providers.llm.as_ref().map(|p| p.api_base.trim().is_empty()).unwrap_or(false) {
		cfg.providers.llm = None;
	}

	cfg.service.log_level = cfg.service.log_level.trim().to_string();
}
