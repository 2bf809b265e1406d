//! Renders the final ranked results for the calling agent.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use kb_domain::FaqMetadata;

use crate::{search::SearchResultWithMeta, tool::ToolOutput};

pub const DISPLAY_TYPE: &str = "search_results";

/// Builds the text report and the structured payload.
///
/// `faq` maps chunk ids to FAQ metadata and `totals` maps knowledge ids to their text chunk counts.
/// Documents with an unknown or zero total are left out of the coverage section.
pub fn build_search_report(
	results: &[SearchResultWithMeta],
	knowledge_base_ids: &[String],
	queries: &[String],
	faq: &HashMap<String, FaqMetadata>,
	totals: &HashMap<String, i64>,
) -> ToolOutput {
	if results.is_empty() {
		return empty_report(knowledge_base_ids, queries);
	}

	let mut output = String::new();
	let kb_counts = count_by_knowledge_base(results);

	output.push_str("=== Search Results ===\n");

	output.push_str(&format!("Found {} relevant results\n\n", results.len()));

	output.push_str("Knowledge Base Coverage:\n");

	for (kb_id, count) in &kb_counts {
		output.push_str(&format!("  - {kb_id}: {count} results\n"));
	}

	output.push_str("\n=== Detailed Results ===\n\n");

	let mut formatted = Vec::with_capacity(results.len());
	let mut documents: Vec<(&str, &str, HashSet<i32>)> = Vec::new();
	let mut current_document = None;

	for (idx, item) in results.iter().enumerate() {
		let result = &item.result;

		if current_document != Some(result.knowledge_id.as_str()) {
			current_document = Some(result.knowledge_id.as_str());

			if idx > 0 {
				output.push('\n');
			}

			output.push_str(&format!("[Source Document: {}]\n", result.knowledge_title));
		}

		match documents.iter_mut().find(|(id, _, _)| *id == result.knowledge_id) {
			Some((_, _, indices)) => {
				indices.insert(result.chunk_index);
			},
			None => documents.push((
				result.knowledge_id.as_str(),
				result.knowledge_title.as_str(),
				HashSet::from([result.chunk_index]),
			)),
		}

		output.push_str(&format!(
			"\nResult #{}:\n  [chunk_id: {}][chunk_index: {}]\nContent: {}\n",
			idx + 1,
			result.id,
			result.chunk_index,
			result.content
		));

		let mut entry = Map::new();

		entry.insert("result_index".to_string(), serde_json::json!(idx + 1));
		entry.insert("chunk_id".to_string(), serde_json::json!(result.id));
		entry.insert("content".to_string(), serde_json::json!(result.content));
		entry.insert("knowledge_id".to_string(), serde_json::json!(result.knowledge_id));
		entry.insert("knowledge_title".to_string(), serde_json::json!(result.knowledge_title));
		entry.insert("knowledge_base_id".to_string(), serde_json::json!(item.knowledge_base_id));
		entry.insert("match_type".to_string(), serde_json::json!(result.match_type));
		entry.insert("source_query".to_string(), serde_json::json!(item.source_query));
		entry.insert("query_type".to_string(), serde_json::json!(item.query_type));
		entry.insert("knowledge_base_type".to_string(), serde_json::json!(item.knowledge_base_type));
		entry.insert("score".to_string(), serde_json::json!(result.score));
		entry.insert("explain".to_string(), serde_json::json!(item.explain));

		let images = result.images();

		if !images.is_empty() {
			output.push_str(&format!("  Related Images ({}):\n", images.len()));

			let mut image_list = Vec::new();

			for (image_idx, image) in images.iter().enumerate() {
				output.push_str(&format!("    Image {}:\n", image_idx + 1));

				let mut image_data = Map::new();

				if !image.url.is_empty() {
					output.push_str(&format!("      URL: {}\n", image.url));

					image_data.insert("url".to_string(), serde_json::json!(image.url));
				}
				if !image.caption.is_empty() {
					output.push_str(&format!("      Caption: {}\n", image.caption));

					image_data.insert("caption".to_string(), serde_json::json!(image.caption));
				}
				if !image.ocr_text.is_empty() {
					output.push_str(&format!("      OCR Text: {}\n", image.ocr_text));

					image_data.insert("ocr_text".to_string(), serde_json::json!(image.ocr_text));
				}
				if !image_data.is_empty() {
					image_list.push(Value::Object(image_data));
				}
			}

			if !image_list.is_empty() {
				entry.insert("images".to_string(), Value::Array(image_list));
			}
		}

		if item.is_faq()
			&& let Some(meta) = faq.get(&result.id)
		{
			write_faq(&mut output, &mut entry, meta);
		}

		formatted.push(Value::Object(entry));
	}

	let mut coverage = Vec::new();
	let mut coverage_text = String::new();

	for (knowledge_id, title, indices) in &documents {
		let Some(&total) = totals.get(*knowledge_id) else { continue };

		if total <= 0 {
			continue;
		}

		let retrieved = indices.len() as i64;
		let percentage = retrieved as f64 / total as f64 * 100.0;

		coverage_text.push_str(&format!(
			"Document: {title} ({knowledge_id})\n  Total chunks: {total}\n  Retrieved: {retrieved} \
			 ({percentage:.1}%)\n  Not retrieved: {}\n",
			(total - retrieved).max(0)
		));

		coverage.push(serde_json::json!({
			"knowledge_id": knowledge_id,
			"knowledge_title": title,
			"total_chunks": total,
			"retrieved_chunks": retrieved,
		}));
	}

	if !coverage_text.is_empty() {
		output.push_str("\n=== Retrieval Coverage ===\n\n");
		output.push_str(&coverage_text);
	}

	let mut counts = Map::new();

	for (kb_id, count) in kb_counts {
		counts.insert(kb_id.to_string(), serde_json::json!(count));
	}

	let mut data = Map::new();

	data.insert("knowledge_base_ids".to_string(), serde_json::json!(knowledge_base_ids));
	data.insert("count".to_string(), serde_json::json!(formatted.len()));
	data.insert("results".to_string(), Value::Array(formatted));
	data.insert("kb_counts".to_string(), Value::Object(counts));
	data.insert("document_coverage".to_string(), Value::Array(coverage));
	data.insert("display_type".to_string(), serde_json::json!(DISPLAY_TYPE));

	if !queries.is_empty() {
		data.insert("queries".to_string(), serde_json::json!(queries));
	}

	ToolOutput { output, data: Value::Object(data) }
}

fn empty_report(knowledge_base_ids: &[String], queries: &[String]) -> ToolOutput {
	let mut output = format!(
		"No relevant content found in {} knowledge base(s).\n\n",
		knowledge_base_ids.len()
	);

	output.push_str("=== Next Steps ===\n");
	output.push_str("- Do not answer from general knowledge.\n");
	output.push_str("- Use web search if it is available.\n");
	output.push_str(
		"- Otherwise state that no relevant information was found in the knowledge base.\n",
	);

	let mut data = Map::new();

	data.insert("knowledge_base_ids".to_string(), serde_json::json!(knowledge_base_ids));
	data.insert("results".to_string(), Value::Array(Vec::new()));
	data.insert("count".to_string(), serde_json::json!(0));

	if !queries.is_empty() {
		data.insert("queries".to_string(), serde_json::json!(queries));
	}

	ToolOutput { output, data: Value::Object(data) }
}

fn write_faq(output: &mut String, entry: &mut Map<String, Value>, meta: &FaqMetadata) {
	if !meta.standard_question.is_empty() {
		output.push_str(&format!("  FAQ Standard Question: {}\n", meta.standard_question));

		entry.insert(
			"faq_standard_question".to_string(),
			serde_json::json!(meta.standard_question),
		);
	}
	if !meta.similar_questions.is_empty() {
		output.push_str(&format!("  FAQ Similar Questions: {}\n", meta.similar_questions.join("; ")));

		entry.insert(
			"faq_similar_questions".to_string(),
			serde_json::json!(meta.similar_questions),
		);
	}
	if !meta.answers.is_empty() {
		output.push_str("  FAQ Answers:\n");

		for (idx, answer) in meta.answers.iter().enumerate() {
			output.push_str(&format!("    Answer Choice {}: {answer}\n", idx + 1));
		}

		entry.insert("faq_answers".to_string(), serde_json::json!(meta.answers));
	}
}

/// Result counts per knowledge base, in first-seen order.
fn count_by_knowledge_base(results: &[SearchResultWithMeta]) -> Vec<(&str, usize)> {
	let mut counts: Vec<(&str, usize)> = Vec::new();

	for item in results {
		match counts.iter_mut().find(|(id, _)| *id == item.knowledge_base_id) {
			Some((_, count)) => *count += 1,
			None => counts.push((item.knowledge_base_id.as_str(), 1)),
		}
	}

	counts
}
