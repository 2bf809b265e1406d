pub mod result;
pub mod sql_guard;
pub mod target;
pub mod text;

pub use result::{
	FaqMetadata, ImageInfo, KnowledgeBaseType, MatchType, SearchResult, parse_images,
};
pub use target::{SearchTarget, TargetScope};
