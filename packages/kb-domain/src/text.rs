use std::collections::HashSet;

/// Lowercased whitespace tokens.
pub fn tokenize_simple(text: &str) -> HashSet<String> {
	text.split_whitespace().map(str::to_lowercase).collect()
}

/// Jaccard similarity of two token sets. Two empty sets have no overlap.
pub fn jaccard(lhs: &HashSet<String>, rhs: &HashSet<String>) -> f32 {
	if lhs.is_empty() && rhs.is_empty() {
		return 0.0;
	}

	let intersection = lhs.intersection(rhs).count();
	let union = lhs.len() + rhs.len() - intersection;

	if union == 0 {
		return 0.0;
	}

	intersection as f32 / union as f32
}

/// Whitespace-collapsed, lowercased content hashed with blake3. Empty content has an empty signature.
pub fn content_signature(content: &str) -> String {
	let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();

	if normalized.is_empty() {
		return String::new();
	}

	blake3::hash(normalized.as_bytes()).to_hex().to_string()
}

/// Cuts `text` to at most `max_chars` characters, marking a cut with a trailing ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
	match text.char_indices().nth(max_chars) {
		Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
		None => text.to_string(),
	}
}

pub fn clamp_unit(value: f32) -> f32 {
	if value.is_nan() {
		return 0.0;
	}

	value.clamp(0.0, 1.0)
}
