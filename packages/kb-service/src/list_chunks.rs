use serde_json::{Map, Value};

use kb_domain::parse_images;
use kb_storage::{knowledge::ChunkPage, models::ListedChunk};

use crate::{
	KbService, Result,
	tool::{ChunkWindow, ListKnowledgeChunksRequest, ToolOutput},
};

pub const DISPLAY_TYPE: &str = "knowledge_chunks";

impl KbService {
	/// Pages through one document's text and FAQ chunks for the tenant.
	pub async fn list_knowledge_chunks(
		&self,
		tenant_id: u64,
		request: ListKnowledgeChunksRequest,
	) -> Result<ToolOutput> {
		let window = request.validate()?;
		let page = self
			.backends
			.knowledge
			.list_chunks(tenant_id, &window.knowledge_id, window.limit, window.offset)
			.await?;

		tracing::info!(
			tenant_id,
			knowledge_id = %window.knowledge_id,
			total = page.total,
			fetched = page.chunks.len(),
			"Listed knowledge chunks."
		);

		Ok(build_chunks_output(&window, page))
	}
}

fn build_chunks_output(window: &ChunkWindow, page: ChunkPage) -> ToolOutput {
	let output = format_chunks(window, &page);
	let ChunkPage { knowledge_title, total, chunks } = page;
	let fetched = chunks.len();
	let chunks: Vec<Value> =
		chunks.iter().enumerate().map(|(idx, chunk)| chunk_entry(idx + 1, chunk)).collect();
	let mut data = Map::new();

	data.insert("knowledge_id".to_string(), serde_json::json!(window.knowledge_id));
	data.insert(
		"knowledge_title".to_string(),
		serde_json::json!(knowledge_title.unwrap_or_default()),
	);
	data.insert("total_chunks".to_string(), serde_json::json!(total));
	data.insert("fetched_chunks".to_string(), serde_json::json!(fetched));
	data.insert("page".to_string(), serde_json::json!(window.page()));
	data.insert("page_size".to_string(), serde_json::json!(window.limit));
	data.insert("offset".to_string(), serde_json::json!(window.offset));
	data.insert("chunks".to_string(), Value::Array(chunks));
	data.insert("display_type".to_string(), serde_json::json!(DISPLAY_TYPE));

	ToolOutput { output, data: Value::Object(data) }
}

fn chunk_entry(seq: usize, chunk: &ListedChunk) -> Value {
	let mut entry = Map::new();

	entry.insert("seq".to_string(), serde_json::json!(seq));
	entry.insert("chunk_id".to_string(), serde_json::json!(chunk.id));
	entry.insert("chunk_index".to_string(), serde_json::json!(chunk.chunk_index));
	entry.insert("content".to_string(), serde_json::json!(chunk.content));
	entry.insert("chunk_type".to_string(), serde_json::json!(chunk.chunk_type));
	entry.insert("knowledge_id".to_string(), serde_json::json!(chunk.knowledge_id));
	entry.insert("knowledge_base_id".to_string(), serde_json::json!(chunk.knowledge_base_id));
	entry.insert("start_at".to_string(), serde_json::json!(chunk.start_at));
	entry.insert("end_at".to_string(), serde_json::json!(chunk.end_at));
	entry.insert("parent_chunk_id".to_string(), serde_json::json!(chunk.parent_chunk_id));

	let images: Vec<Value> = parse_images(chunk.image_info.as_deref())
		.into_iter()
		.filter_map(|image| {
			let mut image_data = Map::new();

			if !image.url.is_empty() {
				image_data.insert("url".to_string(), serde_json::json!(image.url));
			}
			if !image.caption.is_empty() {
				image_data.insert("caption".to_string(), serde_json::json!(image.caption));
			}
			if !image.ocr_text.is_empty() {
				image_data.insert("ocr_text".to_string(), serde_json::json!(image.ocr_text));
			}

			(!image_data.is_empty()).then_some(Value::Object(image_data))
		})
		.collect();

	if !images.is_empty() {
		entry.insert("images".to_string(), Value::Array(images));
	}

	Value::Object(entry)
}

fn format_chunks(window: &ChunkWindow, page: &ChunkPage) -> String {
	let mut output = String::from("=== Knowledge Chunks ===\n\n");

	match page.knowledge_title.as_deref() {
		Some(title) if !title.is_empty() =>
			output.push_str(&format!("Document: {title} ({})\n", window.knowledge_id)),
		_ => output.push_str(&format!("Document ID: {}\n", window.knowledge_id)),
	}

	output.push_str(&format!("Total chunks: {}\n", page.total));

	let (Some(first), Some(last)) = (page.chunks.first(), page.chunks.last()) else {
		output.push_str("No chunks found. Check that the document has finished parsing.\n");

		if page.total > 0 {
			output.push_str("The document has chunks but this page is empty. Check limit and offset.\n");
		}

		return output;
	};

	output.push_str(&format!(
		"Fetched: {} (index {} - {})\n\n=== Chunk Content ===\n\n",
		page.chunks.len(),
		first.chunk_index,
		last.chunk_index
	));

	for (idx, chunk) in page.chunks.iter().enumerate() {
		let content = chunk.content.trim();

		output.push_str(&format!("Chunk #{} (Index {})\n", idx + 1, chunk.chunk_index + 1));
		output.push_str(&format!("  chunk_id: {}\n", chunk.id));
		output.push_str(&format!("  type: {}\n", chunk.chunk_type));
		output.push_str(&format!(
			"  content: {}\n",
			if content.is_empty() { "(empty)" } else { content }
		));

		let images = parse_images(chunk.image_info.as_deref());

		if !images.is_empty() {
			output.push_str(&format!("  Related Images ({}):\n", images.len()));

			for (image_idx, image) in images.iter().enumerate() {
				output.push_str(&format!("    Image {}:\n", image_idx + 1));

				if !image.url.is_empty() {
					output.push_str(&format!("      URL: {}\n", image.url));
				}
				if !image.caption.is_empty() {
					output.push_str(&format!("      Caption: {}\n", image.caption));
				}
				if !image.ocr_text.is_empty() {
					output.push_str(&format!("      OCR Text: {}\n", image.ocr_text));
				}
			}
		}

		output.push('\n');
	}

	if window.offset + (page.chunks.len() as u64) < page.total.max(0) as u64 {
		output.push_str("More chunks remain. Call again with a larger offset to read the rest.\n");
	}

	output
}
