//! Literal keyword search over chunk content, reported per document.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use kb_domain::text;
use kb_storage::{knowledge::GrepFilter, models::GrepChunk};

use crate::{
	KbService, KnowledgeScope, Result,
	tool::{GrepChunksRequest, ToolOutput},
};

pub const DISPLAY_TYPE: &str = "grep_results";

/// Rows pulled from storage before dedup and diversity selection.
const FETCH_LIMIT: i64 = 1_000;
/// MMR only runs when more chunks than this survive dedup.
const MMR_MIN_CANDIDATES: usize = 10;
const MMR_LAMBDA: f32 = 0.7;
const MAX_KNOWLEDGE_RESULTS: usize = 20;
const POSITION_BONUS: f32 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeMatch {
	pub knowledge_id: String,
	pub knowledge_base_id: String,
	pub knowledge_title: String,
	pub chunk_hit_count: usize,
	pub total_chunk_count: i64,
	/// Occurrences per pattern, in request order.
	pub pattern_counts: Vec<(String, usize)>,
	pub total_pattern_hits: usize,
	pub distinct_patterns: usize,
}

struct ScoredChunk {
	chunk: GrepChunk,
	score: f32,
}

impl KbService {
	/// Finds chunks containing any pattern and ranks the documents they belong to.
	///
	/// Request knowledge base ids take precedence over the scope's; the scope's document ids always
	/// apply.
	pub async fn grep_chunks(
		&self,
		scope: &KnowledgeScope,
		mut request: GrepChunksRequest,
	) -> Result<ToolOutput> {
		let (patterns, max_results) = request.validate()?;
		let knowledge_base_ids = if request.knowledge_base_ids.is_empty() {
			scope.knowledge_base_ids.clone()
		} else {
			request.knowledge_base_ids
		};
		let filter = GrepFilter {
			patterns: &patterns,
			knowledge_base_ids: &knowledge_base_ids,
			knowledge_ids: &scope.knowledge_ids,
			limit: FETCH_LIMIT,
		};
		let rows = self.backends.knowledge.grep_chunks(scope.tenant_id, filter).await?;
		let fetched = rows.len();
		let selected = select_chunks(dedup_chunks(rows), &patterns, max_results as usize);
		let mut matches = aggregate_by_knowledge(&selected, &patterns);
		let total_matches = matches.len();

		matches.truncate(MAX_KNOWLEDGE_RESULTS);

		tracing::info!(
			tenant_id = scope.tenant_id,
			patterns = patterns.len(),
			fetched,
			selected = selected.len(),
			documents = total_matches,
			"Grep finished."
		);

		let mut data = Map::new();

		data.insert("patterns".to_string(), serde_json::json!(patterns));
		data.insert("knowledge_results".to_string(), knowledge_results(&matches));
		data.insert("result_count".to_string(), serde_json::json!(matches.len()));
		data.insert("total_matches".to_string(), serde_json::json!(total_matches));
		data.insert("knowledge_base_ids".to_string(), serde_json::json!(knowledge_base_ids));
		data.insert("max_results".to_string(), serde_json::json!(max_results));
		data.insert("display_type".to_string(), serde_json::json!(DISPLAY_TYPE));

		Ok(ToolOutput { output: format_matches(&patterns, &matches), data: Value::Object(data) })
	}
}

/// Drops repeats by chunk id, parent chunk, document position and normalized content.
fn dedup_chunks(rows: Vec<GrepChunk>) -> Vec<GrepChunk> {
	let mut seen = HashSet::new();
	let mut signatures = HashSet::new();
	let mut unique = Vec::with_capacity(rows.len());

	for chunk in rows {
		let mut keys = vec![chunk.id.clone()];

		if let Some(parent) = chunk.parent_chunk_id.as_deref().filter(|parent| !parent.is_empty()) {
			keys.push(format!("parent:{parent}"));
		}
		if !chunk.knowledge_id.is_empty() {
			keys.push(format!("kb:{}#{}", chunk.knowledge_id, chunk.chunk_index));
		}
		if keys.iter().any(|key| seen.contains(key)) {
			continue;
		}

		let signature = text::content_signature(&chunk.content);

		if !signature.is_empty() && !signatures.insert(signature) {
			continue;
		}

		seen.extend(keys);
		unique.push(chunk);
	}

	unique
}

/// Scores every chunk, then keeps at most `max_results`, diversified with MMR when there are many.
fn select_chunks(rows: Vec<GrepChunk>, patterns: &[String], max_results: usize) -> Vec<GrepChunk> {
	let scored: Vec<ScoredChunk> = rows
		.into_iter()
		.map(|chunk| {
			let (score, _) = match_score(&chunk.content, patterns);

			ScoredChunk { chunk, score }
		})
		.collect();

	if scored.len() <= MMR_MIN_CANDIDATES {
		return scored.into_iter().take(max_results).map(|item| item.chunk).collect();
	}

	let k = scored.len().min(max_results.max(1));
	let mut remaining: Vec<(ScoredChunk, HashSet<String>)> = scored
		.into_iter()
		.map(|item| {
			let tokens = text::tokenize_simple(&item.chunk.content);

			(item, tokens)
		})
		.collect();
	let mut selected: Vec<(ScoredChunk, HashSet<String>)> = Vec::with_capacity(k);

	while selected.len() < k && !remaining.is_empty() {
		let mut best: Option<(usize, f32)> = None;

		for (idx, (item, tokens)) in remaining.iter().enumerate() {
			let redundancy = selected
				.iter()
				.map(|(_, picked)| text::jaccard(tokens, picked))
				.fold(0.0_f32, f32::max);
			let mmr = MMR_LAMBDA * item.score - (1.0 - MMR_LAMBDA) * redundancy;

			if best.map(|(_, best_mmr)| mmr > best_mmr).unwrap_or(true) {
				best = Some((idx, mmr));
			}
		}

		let Some((idx, _)) = best else { break };

		selected.push(remaining.remove(idx));
	}

	selected.into_iter().map(|(item, _)| item.chunk).collect()
}

/// Share of patterns present plus up to 0.1 for an early first match, capped at 1. Also returns the
/// number of patterns present.
fn match_score(content: &str, patterns: &[String]) -> (f32, usize) {
	if content.is_empty() || patterns.is_empty() {
		return (0.0, 0);
	}

	let lowered = content.to_lowercase();
	let mut matched = 0;
	let mut earliest = lowered.len();

	for pattern in patterns {
		if let Some(pos) = lowered.find(&pattern.to_lowercase()) {
			matched += 1;
			earliest = earliest.min(pos);
		}
	}

	let base = matched as f32 / patterns.len() as f32;
	let bonus = if earliest < lowered.len() {
		(1.0 - earliest as f32 / lowered.len() as f32) * POSITION_BONUS
	} else {
		0.0
	};

	((base + bonus).min(1.0), matched)
}

/// Case-insensitive, non-overlapping occurrences of `pattern`.
fn count_occurrences(lowered_content: &str, pattern: &str) -> usize {
	let pattern = pattern.to_lowercase();

	if pattern.is_empty() {
		return 0;
	}

	lowered_content.matches(&pattern).count()
}

/// Groups chunks by document and orders documents by distinct patterns, total hits, chunk hits and
/// title.
fn aggregate_by_knowledge(chunks: &[GrepChunk], patterns: &[String]) -> Vec<KnowledgeMatch> {
	let mut order: Vec<String> = Vec::new();
	let mut by_knowledge: HashMap<String, KnowledgeMatch> = HashMap::new();

	for chunk in chunks {
		let knowledge_id = if chunk.knowledge_id.is_empty() {
			format!("chunk-{}", chunk.id)
		} else {
			chunk.knowledge_id.clone()
		};
		let entry = by_knowledge.entry(knowledge_id.clone()).or_insert_with(|| {
			order.push(knowledge_id.clone());

			let title = chunk.knowledge_title.trim();
			let knowledge_title =
				if title.is_empty() { "Untitled".to_string() } else { title.to_string() };

			KnowledgeMatch {
				knowledge_id,
				knowledge_base_id: chunk.knowledge_base_id.clone(),
				knowledge_title,
				chunk_hit_count: 0,
				total_chunk_count: chunk.total_chunk_count,
				pattern_counts: patterns.iter().map(|pattern| (pattern.clone(), 0)).collect(),
				total_pattern_hits: 0,
				distinct_patterns: 0,
			}
		});
		let lowered = chunk.content.to_lowercase();

		entry.chunk_hit_count += 1;

		for (pattern, count) in &mut entry.pattern_counts {
			let hits = count_occurrences(&lowered, pattern);

			*count += hits;
			entry.total_pattern_hits += hits;
		}
	}

	let mut matches: Vec<KnowledgeMatch> = order
		.into_iter()
		.filter_map(|knowledge_id| by_knowledge.remove(&knowledge_id))
		.map(|mut entry| {
			entry.distinct_patterns = entry.pattern_counts.iter().filter(|(_, n)| *n > 0).count();

			entry
		})
		.collect();

	matches.sort_by(|lhs, rhs| {
		rhs.distinct_patterns
			.cmp(&lhs.distinct_patterns)
			.then_with(|| rhs.total_pattern_hits.cmp(&lhs.total_pattern_hits))
			.then_with(|| rhs.chunk_hit_count.cmp(&lhs.chunk_hit_count))
			.then_with(|| lhs.knowledge_title.cmp(&rhs.knowledge_title))
	});

	matches
}

fn knowledge_results(matches: &[KnowledgeMatch]) -> Value {
	Value::Array(
		matches
			.iter()
			.map(|entry| {
				let counts: Map<String, Value> = entry
					.pattern_counts
					.iter()
					.map(|(pattern, count)| (pattern.clone(), serde_json::json!(count)))
					.collect();

				serde_json::json!({
					"knowledge_id": entry.knowledge_id,
					"knowledge_base_id": entry.knowledge_base_id,
					"knowledge_title": entry.knowledge_title,
					"chunk_hit_count": entry.chunk_hit_count,
					"total_chunk_count": entry.total_chunk_count,
					"pattern_counts": counts,
					"total_pattern_hits": entry.total_pattern_hits,
					"distinct_patterns": entry.distinct_patterns,
				})
			})
			.collect(),
	)
}

fn format_matches(patterns: &[String], matches: &[KnowledgeMatch]) -> String {
	let mut output = match patterns {
		[pattern] => format!("Pattern: '{pattern}' (case-insensitive)\n"),
		_ => format!(
			"Patterns ({}): [{}] (case-insensitive, OR logic)\n",
			patterns.len(),
			patterns.join(", ")
		),
	};

	output.push_str(&format!("Matches: {} knowledge item(s)\n\n", matches.len()));

	if matches.is_empty() {
		output.push_str("No matches found.\n");

		return output;
	}

	for (idx, entry) in matches.iter().enumerate() {
		let hits = entry
			.pattern_counts
			.iter()
			.map(|(pattern, count)| format!("{pattern}={count}"))
			.collect::<Vec<_>>()
			.join(", ");

		output.push_str(&format!(
			"{}) knowledge_id={} | title={} | chunk_hits={} | chunk_total={} | pattern_hits=[{hits}]\n",
			idx + 1,
			entry.knowledge_id,
			entry.knowledge_title,
			entry.chunk_hit_count,
			entry.total_chunk_count
		));
	}

	output
}
