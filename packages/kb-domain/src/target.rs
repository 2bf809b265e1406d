use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetScope {
	/// Every chunk in the knowledge base.
	KnowledgeBase,
	/// Only chunks belonging to these documents.
	Documents(Vec<String>),
}

/// One unit of search scope inside a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTarget {
	pub knowledge_base_id: String,
	pub scope: TargetScope,
}
impl SearchTarget {
	pub fn knowledge_base(knowledge_base_id: impl Into<String>) -> Self {
		Self { knowledge_base_id: knowledge_base_id.into(), scope: TargetScope::KnowledgeBase }
	}

	pub fn documents(knowledge_base_id: impl Into<String>, knowledge_ids: Vec<String>) -> Self {
		Self {
			knowledge_base_id: knowledge_base_id.into(),
			scope: TargetScope::Documents(knowledge_ids),
		}
	}

	/// `None` when the whole knowledge base is searched.
	pub fn knowledge_ids(&self) -> Option<&[String]> {
		match &self.scope {
			TargetScope::KnowledgeBase => None,
			TargetScope::Documents(ids) => Some(ids),
		}
	}
}

/// Builds non-overlapping targets from explicit knowledge bases and individual documents.
///
/// `documents` pairs each document id with the knowledge base that owns it. Documents whose knowledge
/// base is already searched whole are dropped; the rest are grouped per knowledge base in first-seen
/// order.
pub fn resolve_search_targets(
	knowledge_base_ids: &[String],
	documents: &[(String, String)],
) -> Vec<SearchTarget> {
	let mut targets = Vec::new();
	let mut whole = HashSet::new();

	for kb_id in knowledge_base_ids {
		let kb_id = kb_id.trim();

		if kb_id.is_empty() || !whole.insert(kb_id.to_string()) {
			continue;
		}

		targets.push(SearchTarget::knowledge_base(kb_id));
	}

	let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
	let mut slot_by_kb: HashMap<String, usize> = HashMap::new();

	for (knowledge_id, kb_id) in documents {
		if kb_id.is_empty() || whole.contains(kb_id.as_str()) {
			continue;
		}

		let slot = *slot_by_kb.entry(kb_id.clone()).or_insert_with(|| {
			grouped.push((kb_id.clone(), Vec::new()));

			grouped.len() - 1
		});
		let ids = &mut grouped[slot].1;

		if !ids.contains(knowledge_id) {
			ids.push(knowledge_id.clone());
		}
	}

	targets.extend(grouped.into_iter().map(|(kb_id, ids)| SearchTarget::documents(kb_id, ids)));

	targets
}

/// Keeps the targets whose knowledge base is in `requested`; an empty request keeps everything.
pub fn filter_targets(targets: &[SearchTarget], requested: &[String]) -> Vec<SearchTarget> {
	if requested.is_empty() {
		return targets.to_vec();
	}

	let requested: HashSet<&str> = requested.iter().map(|id| id.trim()).collect();

	targets
		.iter()
		.filter(|target| requested.contains(target.knowledge_base_id.as_str()))
		.cloned()
		.collect()
}

/// Distinct knowledge base ids in target order.
pub fn knowledge_base_ids(targets: &[SearchTarget]) -> Vec<String> {
	let mut seen = HashSet::new();

	targets
		.iter()
		.filter(|target| seen.insert(target.knowledge_base_id.as_str()))
		.map(|target| target.knowledge_base_id.clone())
		.collect()
}
