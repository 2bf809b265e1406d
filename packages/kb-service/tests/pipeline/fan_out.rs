use std::{
	collections::HashMap,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use kb_domain::{KnowledgeBaseType, SearchResult, SearchTarget};
use kb_service::{
	BoxFuture, Result, SearchParams, Searcher,
	search::orchestrator::{self, FanOutOptions},
};

use super::{ScriptedSearcher, Unit, hit, ids};

/// Holds every search open until the gate is opened and records the in-flight high-water mark.
struct GatedSearcher {
	gate: watch::Receiver<bool>,
	calls: AtomicUsize,
	in_flight: AtomicUsize,
	peak: AtomicUsize,
}
impl GatedSearcher {
	fn new(gate: watch::Receiver<bool>) -> Self {
		Self {
			gate,
			calls: AtomicUsize::new(0),
			in_flight: AtomicUsize::new(0),
			peak: AtomicUsize::new(0),
		}
	}

	fn in_flight(&self) -> usize {
		self.in_flight.load(Ordering::SeqCst)
	}
}
impl Searcher for GatedSearcher {
	fn hybrid_search<'a>(
		&'a self,
		_tenant_id: u64,
		_target: &'a SearchTarget,
		_params: &'a SearchParams,
	) -> BoxFuture<'a, Result<Vec<SearchResult>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

			self.peak.fetch_max(now, Ordering::SeqCst);

			let mut gate = self.gate.clone();
			let _ = gate.wait_for(|open| *open).await;

			self.in_flight.fetch_sub(1, Ordering::SeqCst);

			Ok(Vec::new())
		})
	}
}

fn options() -> FanOutOptions {
	FanOutOptions { top_k: 5, vector_threshold: 0.6, keyword_threshold: 0.5, max_concurrent: 2 }
}

/// Fans three queries over two targets with every search held open, then reports the peak.
async fn peak_in_flight(max_concurrent: u32) -> usize {
	let (open, gate) = watch::channel(false);
	let searcher = Arc::new(GatedSearcher::new(gate));
	let expected = (max_concurrent.max(1) as usize).min(6);
	let task = tokio::spawn({
		let searcher = searcher.clone();

		async move {
			let queries = ids(&["q1", "q2", "q3"]);
			let targets =
				vec![SearchTarget::knowledge_base("kb-a"), SearchTarget::knowledge_base("kb-b")];

			orchestrator::fan_out(
				searcher,
				1,
				&queries,
				&targets,
				&HashMap::new(),
				FanOutOptions { max_concurrent, ..options() },
				&CancellationToken::new(),
			)
			.await
		}
	});

	tokio::time::timeout(Duration::from_secs(5), async {
		while searcher.in_flight() < expected {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("Failed to reach the expected number of in-flight searches.");
	// Give any unit beyond the cap a chance to start before releasing.
	tokio::time::sleep(Duration::from_millis(20)).await;
	open.send(true).expect("Failed to open the search gate.");

	let results = tokio::time::timeout(Duration::from_secs(5), task)
		.await
		.expect("Failed to finish the fan-out in time.")
		.expect("Failed to join the fan-out task.")
		.expect("Failed to fan out.");

	assert!(results.is_empty());
	assert_eq!(searcher.calls.load(Ordering::SeqCst), 6);

	searcher.peak.load(Ordering::SeqCst)
}

#[tokio::test]
async fn all_units_run_concurrently_under_a_wide_cap() {
	assert_eq!(peak_in_flight(8).await, 6);
	assert_eq!(peak_in_flight(6).await, 6);
}

#[tokio::test]
async fn in_flight_searches_never_exceed_the_cap() {
	assert_eq!(peak_in_flight(2).await, 2);
	assert_eq!(peak_in_flight(1).await, 1);
	assert_eq!(peak_in_flight(0).await, 1);
}

#[tokio::test]
async fn every_query_runs_against_every_target() {
	let searcher = Arc::new(ScriptedSearcher::default());
	let queries = ids(&["q1", "q2", "q3"]);
	let targets = vec![SearchTarget::knowledge_base("kb-a"), SearchTarget::knowledge_base("kb-b")];
	let results = orchestrator::fan_out(
		searcher.clone(),
		1,
		&queries,
		&targets,
		&HashMap::new(),
		options(),
		&CancellationToken::new(),
	)
	.await
	.expect("Failed to fan out.");

	assert!(results.is_empty());
	assert_eq!(searcher.calls(), 6);

	let mut pairs: Vec<(String, String)> = searcher
		.seen()
		.into_iter()
		.map(|(query, target)| (query, target.knowledge_base_id))
		.collect();

	pairs.sort();

	assert_eq!(pairs.len(), 6);
	assert_eq!(pairs[0], ("q1".to_string(), "kb-a".to_string()));
	assert_eq!(pairs[5], ("q3".to_string(), "kb-b".to_string()));
}

#[tokio::test]
async fn failing_target_does_not_abort_siblings() {
	let searcher = Arc::new(
		ScriptedSearcher::default()
			.with("q", "kb-a", Unit::Fail)
			.with("q", "kb-b", Unit::Hits(vec![hit("c1", "k1", 0, 0.7), hit("c2", "k1", 1, 0.6)])),
	);
	let targets = vec![SearchTarget::knowledge_base("kb-a"), SearchTarget::knowledge_base("kb-b")];
	let results = orchestrator::fan_out(
		searcher,
		1,
		&ids(&["q"]),
		&targets,
		&HashMap::new(),
		options(),
		&CancellationToken::new(),
	)
	.await
	.expect("A single failing unit must not fail the call.");

	assert_eq!(results.len(), 2);
	assert!(results.iter().all(|item| item.knowledge_base_id == "kb-b"));
}

#[tokio::test]
async fn results_are_tagged_with_their_origin() {
	let searcher = Arc::new(
		ScriptedSearcher::default()
			.with("first", "kb-faq", Unit::Hits(vec![hit("f1", "k9", 0, 0.9)]))
			.with("second", "kb-doc", Unit::Hits(vec![hit("d1", "k1", 0, 0.4)])),
	);
	let targets = vec![SearchTarget::knowledge_base("kb-faq"), SearchTarget::knowledge_base("kb-doc")];
	let kb_types = HashMap::from([("kb-faq".to_string(), KnowledgeBaseType::Faq)]);
	let results = orchestrator::fan_out(
		searcher,
		1,
		&ids(&["first", "second"]),
		&targets,
		&kb_types,
		options(),
		&CancellationToken::new(),
	)
	.await
	.expect("Failed to fan out.");

	assert_eq!(results.len(), 2);
	assert_eq!(results[0].result.id, "f1");
	assert_eq!(results[0].source_query, "first");
	assert_eq!(results[0].knowledge_base_type, KnowledgeBaseType::Faq);
	assert_eq!(results[0].query_type, "hybrid");
	assert_eq!(results[0].explain.retrieval_score, 0.9);
	assert_eq!(results[1].source_query, "second");
	assert_eq!(results[1].knowledge_base_type, KnowledgeBaseType::Document);
}

#[tokio::test]
async fn document_targets_reach_the_searcher() {
	let searcher = Arc::new(ScriptedSearcher::default());
	let targets = vec![SearchTarget::documents("kb-a", ids(&["doc-1", "doc-2"]))];

	orchestrator::fan_out(
		searcher.clone(),
		1,
		&ids(&["q"]),
		&targets,
		&HashMap::new(),
		options(),
		&CancellationToken::new(),
	)
	.await
	.expect("Failed to fan out.");

	let seen = searcher.seen();

	assert_eq!(seen[0].1.knowledge_ids(), Some(&ids(&["doc-1", "doc-2"])[..]));
}
