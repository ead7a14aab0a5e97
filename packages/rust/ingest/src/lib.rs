//! Paper sources for lineage.
//!
//! An ingest source turns a paper identity into raw text plus the raw
//! bibliography. Two sources are provided:
//! - [`SemanticScholarClient`]: the Semantic Scholar Graph API (abstract + references)
//! - [`LocalCorpus`]: a directory of `<file_stem>.json` documents, for offline runs

mod local;
mod semantic_scholar;

pub use local::{CorpusPaper, LocalCorpus};
pub use semantic_scholar::SemanticScholarClient;

use lineage_shared::BibEntry;

/// User-Agent string for outbound requests.
pub(crate) const USER_AGENT: &str = concat!("lineage/", env!("CARGO_PKG_VERSION"));

/// A fetched paper, before extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestedPaper {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    /// Text handed to the extraction producer.
    pub raw_text: String,
    pub bibliography: Vec<BibEntry>,
}
