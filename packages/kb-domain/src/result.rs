use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a chunk entered the candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
	Embedding,
	Keywords,
	NearbyChunk,
	History,
	ParentChunk,
	RelationChunk,
	Graph,
	WebSearch,
}
impl MatchType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Embedding => "embedding",
			Self::Keywords => "keywords",
			Self::NearbyChunk => "nearby_chunk",
			Self::History => "history",
			Self::ParentChunk => "parent_chunk",
			Self::RelationChunk => "relation_chunk",
			Self::Graph => "graph",
			Self::WebSearch => "web_search",
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBaseType {
	#[default]
	Document,
	Faq,
}
impl KnowledgeBaseType {
	/// Unknown labels are treated as document knowledge bases.
	pub fn parse(raw: &str) -> Self {
		if raw.trim().eq_ignore_ascii_case("faq") { Self::Faq } else { Self::Document }
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Document => "document",
			Self::Faq => "faq",
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub caption: String,
	#[serde(default)]
	pub ocr_text: String,
}

/// Parses a chunk's `image_info` column. Missing, blank or malformed JSON yields no images.
pub fn parse_images(raw: Option<&str>) -> Vec<ImageInfo> {
	let Some(raw) = raw else { return Vec::new() };

	if raw.trim().is_empty() {
		return Vec::new();
	}

	serde_json::from_str(raw).unwrap_or_default()
}

/// FAQ entry stored in a chunk's metadata column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqMetadata {
	#[serde(default)]
	pub standard_question: String,
	#[serde(default)]
	pub similar_questions: Vec<String>,
	#[serde(default)]
	pub answers: Vec<String>,
}
impl FaqMetadata {
	pub fn is_empty(&self) -> bool {
		self.standard_question.is_empty()
			&& self.similar_questions.is_empty()
			&& self.answers.is_empty()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
	pub id: String,
	pub content: String,
	pub knowledge_id: String,
	pub chunk_index: i32,
	#[serde(default)]
	pub knowledge_title: String,
	#[serde(default)]
	pub start_at: i32,
	#[serde(default)]
	pub end_at: i32,
	#[serde(default)]
	pub seq: i32,
	pub score: f32,
	pub match_type: MatchType,
	#[serde(default)]
	pub sub_chunk_ids: Vec<String>,
	#[serde(default)]
	pub metadata: BTreeMap<String, String>,
	#[serde(default)]
	pub chunk_type: String,
	#[serde(default)]
	pub parent_chunk_id: Option<String>,
	/// Raw JSON array of [`ImageInfo`] objects.
	#[serde(default)]
	pub image_info: Option<String>,
	#[serde(default)]
	pub knowledge_filename: String,
	#[serde(default)]
	pub knowledge_source: String,
}
impl SearchResult {
	/// Images attached to the chunk. Malformed image JSON yields no images.
	pub fn images(&self) -> Vec<ImageInfo> {
		parse_images(self.image_info.as_deref())
	}

	/// Content followed by image captions and OCR text, the text a scorer should judge.
	pub fn enriched_passage(&self) -> String {
		let mut image_texts = Vec::new();

		for image in self.images() {
			if !image.caption.is_empty() {
				image_texts.push(format!("Image caption: {}", image.caption));
			}
			if !image.ocr_text.is_empty() {
				image_texts.push(format!("Image text: {}", image.ocr_text));
			}
		}

		if image_texts.is_empty() {
			return self.content.clone();
		}

		let mut combined = self.content.clone();

		if !combined.is_empty() {
			combined.push_str("\n\n");
		}

		combined.push_str(&image_texts.join("\n"));

		combined
	}

	pub fn is_web_search(&self) -> bool {
		self.knowledge_source.eq_ignore_ascii_case("web_search")
	}
}
