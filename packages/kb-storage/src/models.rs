use serde_json::Value;

use kb_domain::FaqMetadata;

/// A chunk matched by one of the search primitives, joined with its document.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChunkHit {
	pub id: String,
	pub content: String,
	pub knowledge_id: String,
	pub knowledge_base_id: String,
	pub chunk_index: i32,
	pub knowledge_title: String,
	pub start_at: i32,
	pub end_at: i32,
	pub chunk_type: String,
	pub parent_chunk_id: Option<String>,
	pub image_info: Option<String>,
	pub knowledge_filename: String,
	pub knowledge_source: String,
	pub score: f32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KnowledgeBaseKind {
	pub id: String,
	pub kb_type: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentOwner {
	pub knowledge_id: String,
	pub knowledge_base_id: String,
}

/// A text or FAQ chunk as listed page by page for one document.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ListedChunk {
	pub id: String,
	pub knowledge_id: String,
	pub knowledge_base_id: String,
	pub content: String,
	pub chunk_index: i32,
	pub chunk_type: String,
	pub start_at: i32,
	pub end_at: i32,
	pub parent_chunk_id: Option<String>,
	pub image_info: Option<String>,
}

/// An enabled chunk whose content matched a grep pattern.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct GrepChunk {
	pub id: String,
	pub knowledge_id: String,
	pub knowledge_base_id: String,
	pub knowledge_title: String,
	pub content: String,
	pub chunk_index: i32,
	pub parent_chunk_id: Option<String>,
	/// Matching chunks in the same document.
	pub total_chunk_count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Chunk {
	pub id: String,
	pub tenant_id: i64,
	pub knowledge_base_id: String,
	pub knowledge_id: String,
	pub content: String,
	pub chunk_index: i32,
	pub chunk_type: String,
	pub metadata: Value,
}
impl Chunk {
	/// FAQ fields from the metadata column; `None` when absent or malformed.
	pub fn faq_metadata(&self) -> Option<FaqMetadata> {
		if !self.metadata.is_object() {
			return None;
		}

		let meta: FaqMetadata = serde_json::from_value(self.metadata.clone()).ok()?;

		if meta.is_empty() { None } else { Some(meta) }
	}
}
