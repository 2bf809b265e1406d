use std::collections::HashSet;

use kb_domain::text;

use crate::search::SearchResultWithMeta;

/// Number of results MMR keeps: `min(len, max(1, top_k))`.
pub fn mmr_k(candidates: usize, top_k: u32) -> usize {
	candidates.min(top_k.max(1) as usize)
}

/// Greedy Maximal Marginal Relevance over the enriched passage token sets.
///
/// Each round picks the candidate maximizing `lambda * score - (1 - lambda) * redundancy`, where
/// redundancy is the highest Jaccard similarity to anything already picked. Equal MMR scores go to
/// the earlier candidate, so callers should pass candidates in ranked order. Results are returned in
/// pick order with `mmr_score` and `redundancy` filled in.
pub fn select_mmr(
	candidates: Vec<SearchResultWithMeta>,
	k: usize,
	lambda: f32,
) -> Vec<SearchResultWithMeta> {
	if k == 0 || candidates.is_empty() {
		return Vec::new();
	}

	let mut remaining: Vec<(SearchResultWithMeta, HashSet<String>)> = candidates
		.into_iter()
		.map(|item| {
			let tokens = text::tokenize_simple(&item.result.enriched_passage());

			(item, tokens)
		})
		.collect();
	let mut selected: Vec<(SearchResultWithMeta, HashSet<String>)> = Vec::with_capacity(k);

	while selected.len() < k && !remaining.is_empty() {
		let mut best: Option<(usize, f32, f32)> = None;

		for (idx, (item, tokens)) in remaining.iter().enumerate() {
			let redundancy = selected
				.iter()
				.map(|(_, picked)| text::jaccard(tokens, picked))
				.fold(0.0_f32, f32::max);
			let mmr = lambda * item.score() - (1.0 - lambda) * redundancy;

			if best.map(|(_, best_mmr, _)| mmr > best_mmr).unwrap_or(true) {
				best = Some((idx, mmr, redundancy));
			}
		}

		let Some((idx, mmr, redundancy)) = best else { break };
		let (mut item, tokens) = remaining.remove(idx);

		item.explain.mmr_score = Some(mmr);
		item.explain.redundancy = Some(redundancy);

		selected.push((item, tokens));
	}

	if selected.len() > 1 {
		let mut total = 0.0_f32;
		let mut pairs = 0_u32;

		for (i, (_, lhs)) in selected.iter().enumerate() {
			for (_, rhs) in &selected[i + 1..] {
				total += text::jaccard(lhs, rhs);
				pairs += 1;
			}
		}

		tracing::debug!(
			selected = selected.len(),
			avg_redundancy = total / pairs as f32,
			"MMR selection finished."
		);
	}

	selected.into_iter().map(|(item, _)| item).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::search::test_support::meta;

	fn ids(results: &[SearchResultWithMeta]) -> Vec<&str> {
		results.iter().map(|item| item.result.id.as_str()).collect()
	}

	#[test]
	fn prefers_diverse_passage_over_near_duplicate() {
		let out = select_mmr(
			vec![
				meta("a", "k1", "rag combines retrieval and generation", 0.90),
				meta("b", "k2", "rag combines retrieval and generation steps", 0.88),
				meta("c", "k3", "vector databases store embeddings", 0.70),
			],
			2,
			0.7,
		);

		assert_eq!(ids(&out), vec!["a", "c"]);
		assert_eq!(out[0].explain.redundancy, Some(0.0));
		assert!(out[1].explain.mmr_score.is_some());
	}

	#[test]
	fn lambda_one_is_score_order() {
		let out = select_mmr(
			vec![
				meta("a", "k1", "same words", 0.9),
				meta("b", "k2", "same words", 0.8),
				meta("c", "k3", "other words", 0.1),
			],
			3,
			1.0,
		);

		assert_eq!(ids(&out), vec!["a", "b", "c"]);
	}

	#[test]
	fn ties_go_to_the_earlier_candidate() {
		let out = select_mmr(
			vec![meta("x", "k1", "one", 0.5), meta("y", "k2", "two", 0.5)],
			1,
			0.7,
		);

		assert_eq!(ids(&out), vec!["x"]);
	}

	#[test]
	fn zero_k_or_empty_input_selects_nothing() {
		assert!(select_mmr(vec![meta("x", "k1", "one", 0.5)], 0, 0.7).is_empty());
		assert!(select_mmr(Vec::new(), 3, 0.7).is_empty());
	}

	#[test]
	fn k_is_clamped_to_candidate_count() {
		assert_eq!(mmr_k(8, 5), 5);
		assert_eq!(mmr_k(3, 5), 3);
		assert_eq!(mmr_k(3, 0), 1);
		assert_eq!(mmr_k(0, 5), 0);
	}
}
