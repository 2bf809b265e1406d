use std::collections::{HashMap, HashSet};

use kb_domain::{SearchResult, text};

use crate::search::{SearchResultWithMeta, sort_ranked};

/// Identity keys of one chunk: its id, its parent chunk and its position in the document.
pub fn identity_keys(result: &SearchResult) -> Vec<String> {
	let mut keys = vec![result.id.clone()];

	if let Some(parent) = result.parent_chunk_id.as_deref()
		&& !parent.is_empty()
	{
		keys.push(format!("parent:{parent}"));
	}
	if !result.knowledge_id.is_empty() {
		keys.push(format!("kb:{}#{}", result.knowledge_id, result.chunk_index));
	}

	keys
}

/// Collapses duplicate chunks to a single best-scoring instance.
///
/// Candidates are visited best-first. A candidate is dropped when any identity key of an earlier
/// survivor matches, or when an earlier survivor has the same content signature. A dropped candidate
/// still claims its own id, so a lower-scoring copy of it cannot survive later.
pub fn dedup_results(mut results: Vec<SearchResultWithMeta>) -> Vec<SearchResultWithMeta> {
	sort_ranked(&mut results);

	let before = results.len();
	let mut seen_keys = HashSet::new();
	let mut seen_signatures = HashSet::new();
	let mut survivors = Vec::with_capacity(results.len());

	for item in results {
		let keys = identity_keys(&item.result);

		if keys.iter().any(|key| seen_keys.contains(key)) {
			seen_keys.insert(item.result.id.clone());

			continue;
		}

		let signature = text::content_signature(&item.result.content);

		if !signature.is_empty() && !seen_signatures.insert(signature) {
			seen_keys.insert(item.result.id.clone());

			continue;
		}

		seen_keys.extend(keys);
		survivors.push(item);
	}

	let survivors = keep_best_per_id(survivors);

	tracing::debug!(before, after = survivors.len(), "Deduplicated search results.");

	survivors
}

fn keep_best_per_id(results: Vec<SearchResultWithMeta>) -> Vec<SearchResultWithMeta> {
	let mut slot_by_id: HashMap<String, usize> = HashMap::new();
	let mut out: Vec<SearchResultWithMeta> = Vec::with_capacity(results.len());

	for item in results {
		match slot_by_id.get(&item.result.id) {
			Some(&slot) =>
				if item.score() > out[slot].score() {
					out[slot] = item;
				},
			None => {
				slot_by_id.insert(item.result.id.clone(), out.len());
				out.push(item);
			},
		}
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::search::test_support::meta;

	fn ids(results: &[SearchResultWithMeta]) -> Vec<&str> {
		results.iter().map(|item| item.result.id.as_str()).collect()
	}

	#[test]
	fn same_id_keeps_highest_score() {
		let out = dedup_results(vec![
			meta("c1", "k1", "alpha", 0.2),
			meta("c1", "k1", "alpha", 0.9),
			meta("c2", "k2", "beta", 0.5),
		]);

		assert_eq!(ids(&out), vec!["c1", "c2"]);
		assert_eq!(out[0].score(), 0.9);
	}

	#[test]
	fn parent_and_position_keys_collapse_siblings() {
		let mut first = meta("c1", "k1", "first text", 0.8);
		let mut sibling = meta("c2", "k2", "second text", 0.7);
		let mut same_slot = meta("c3", "k1", "third text", 0.6);

		first.result.parent_chunk_id = Some("p1".to_string());
		sibling.result.parent_chunk_id = Some("p1".to_string());
		same_slot.result.chunk_index = first.result.chunk_index;

		let out = dedup_results(vec![same_slot, sibling, first]);

		assert_eq!(ids(&out), vec!["c1"]);
	}

	#[test]
	fn content_signature_catches_rechunked_text() {
		let mut copy = meta("c9", "k9", "  The SAME   text ", 0.4);

		copy.result.chunk_index = 3;

		let out = dedup_results(vec![meta("c1", "k1", "the same text", 0.5), copy]);

		assert_eq!(ids(&out), vec!["c1"]);
	}

	#[test]
	fn empty_content_is_not_a_signature_match() {
		let mut second = meta("c2", "k2", "", 0.4);

		second.result.chunk_index = 1;

		let out = dedup_results(vec![meta("c1", "k1", "", 0.5), second]);

		assert_eq!(out.len(), 2);
	}

	#[test]
	fn empty_input_yields_empty_output() {
		assert!(dedup_results(Vec::new()).is_empty());
	}
}
