//! Knowledge graph layer (C6): entity extraction over memory content and
//! community detection over the resulting entity/memory graph.

mod community;
mod extraction;

pub use community::{detect_communities, CommunityConfig, DetectedCommunity};
pub use extraction::{context_snippet, extract_entities, ExtractedEntity};
