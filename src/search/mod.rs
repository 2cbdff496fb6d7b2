//! Natural-language retrieval over captured items.
//!
//! - `interpret`: lexical kind detection and query cleaning
//! - `keyword`: conjunctive keyword scoring over item fields
//! - `hybrid`: concurrent semantic + keyword fusion with the browse fallback

pub mod hybrid;
pub mod interpret;
pub mod keyword;

pub use hybrid::{HybridSearchEngine, MatchSource, SearchResult};
pub use interpret::{interpret, Interpretation, KindFilter};
