//! Core domain types for lineage knowledge records.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LineageError, Result};

/// Current schema version for persisted lineage documents.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Prefix of canonical keys built from a DOI.
const DOI_KEY_PREFIX: &str = "doi:";

/// Prefix of canonical keys built from the (title, first author, year) fallback.
const REF_KEY_PREFIX: &str = "ref:";

/// Hex characters of the fallback hash kept in the canonical key.
const REF_HASH_LEN: usize = 16;

/// Hex characters of the disambiguating hash appended to lossy file stems.
const STEM_HASH_LEN: usize = 8;

static DOI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^10\.\d{4,9}/[-._;()/:a-z0-9<>\[\]]+$").expect("valid regex")
});

// ---------------------------------------------------------------------------
// PaperIdentity
// ---------------------------------------------------------------------------

/// Canonical dedup key for a paper.
///
/// Either `doi:<normalized doi>` or `ref:<hash>` where the hash covers the
/// normalized title, first-author surname, and year. Two identities are equal
/// iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperIdentity(String);

impl PaperIdentity {
    /// Build an identity from a DOI in any common notation.
    ///
    /// Returns `None` if the normalized DOI does not match the canonical pattern.
    pub fn from_doi(raw: &str) -> Option<Self> {
        let doi = normalize_doi(raw);
        is_canonical_doi(&doi).then(|| Self(format!("{DOI_KEY_PREFIX}{doi}")))
    }

    /// Build the fallback identity from bibliographic metadata.
    ///
    /// Returns `None` when the title normalizes to nothing.
    pub fn from_metadata(title: &str, first_author: Option<&str>, year: Option<i32>) -> Option<Self> {
        let title = normalize_title(title);
        if title.is_empty() {
            return None;
        }
        let author = first_author.map(author_surname).unwrap_or_default();
        let year = year.map(|y| y.to_string()).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update(b"|");
        hasher.update(author.as_bytes());
        hasher.update(b"|");
        hasher.update(year.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        Some(Self(format!("{REF_KEY_PREFIX}{}", &digest[..REF_HASH_LEN])))
    }

    /// Parse a user- or store-supplied identifier.
    ///
    /// Accepts canonical keys (`doi:…`, `ref:…`), bare DOIs, and DOI URLs.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if let Some(hash) = trimmed.strip_prefix(REF_KEY_PREFIX) {
            if hash.len() == REF_HASH_LEN && hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Ok(Self(format!("{REF_KEY_PREFIX}{}", hash.to_ascii_lowercase())));
            }
            return Err(LineageError::parse(format!("malformed reference key '{trimmed}'")));
        }
        Self::from_doi(trimmed)
            .ok_or_else(|| LineageError::parse(format!("'{trimmed}' is not a valid DOI")))
    }

    /// The canonical key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The normalized DOI, if this identity is DOI-based.
    pub fn doi(&self) -> Option<&str> {
        self.0.strip_prefix(DOI_KEY_PREFIX)
    }

    /// Whether this identity was resolved from a DOI.
    pub fn is_doi(&self) -> bool {
        self.doi().is_some()
    }

    /// Filesystem-safe name, also used as the wikilink target of rendered notes.
    ///
    /// The DOI prefix separator (or the `ref:` hash) maps to `_`. Any other
    /// character outside `[a-z0-9.-]` is also replaced, and then a short hash
    /// of the full key is appended so distinct identities never share a stem.
    pub fn file_stem(&self) -> String {
        let (head, tail) = match self.doi() {
            Some(doi) => doi.split_once('/').unwrap_or((doi, "")),
            None => self.0.split_once(':').unwrap_or((self.0.as_str(), "")),
        };

        let mut lossy = false;
        let tail: String = tail
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
                    c
                } else {
                    lossy = true;
                    '_'
                }
            })
            .collect();

        let mut stem = format!("{head}_{tail}");
        if lossy {
            let digest = format!("{:x}", Sha256::digest(self.0.as_bytes()));
            stem.push('-');
            stem.push_str(&digest[..STEM_HASH_LEN]);
        }
        stem
    }
}

impl std::fmt::Display for PaperIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PaperIdentity {
    type Err = LineageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Strip URL / scheme prefixes and case-fold a DOI.
pub fn normalize_doi(raw: &str) -> String {
    let mut doi = raw.trim().to_lowercase();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi.org/",
        "doi:",
    ] {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim().to_string();
            break;
        }
    }
    doi
}

/// Whether an already-normalized DOI matches the canonical DOI shape.
pub fn is_canonical_doi(doi: &str) -> bool {
    DOI_RE.is_match(doi)
}

/// Lowercase, keep alphanumerics, collapse everything else to single spaces.
fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract a comparable surname from "Smith, J." or "John Smith".
fn author_surname(author: &str) -> String {
    let author = author.trim();
    let surname = match author.split_once(',') {
        Some((last, _)) => last,
        None => author.split_whitespace().last().unwrap_or(""),
    };
    surname
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

// ---------------------------------------------------------------------------
// KnowledgeRecord
// ---------------------------------------------------------------------------

/// Bibliographic metadata of a distilled paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMeta {
    pub title: String,
    /// Ordered author list.
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub identity: PaperIdentity,
}

/// The paper's central argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreAnalysis {
    pub central_hypothesis: String,
    #[serde(default)]
    pub methodology_summary: String,
    #[serde(default)]
    pub significance: String,
}

/// An atomic claim anchored to evidence in the paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    /// Unique within the record (e.g. `KP1`).
    pub id: String,
    pub content: String,
    /// Where the evidence lives, e.g. "Table 2".
    pub evidence_anchor: String,
    /// In `[0.0, 1.0]`.
    pub confidence_score: f64,
}

/// One step of a logic chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", content = "id", rename_all = "snake_case")]
pub enum FlowStep {
    KeyPoint(String),
    Conclusion,
}

/// An argument thread from key points to a conclusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicChain {
    pub name: String,
    /// Key point ids in argument order, always terminated by [`FlowStep::Conclusion`].
    pub argument_flow: Vec<FlowStep>,
    pub conclusion_derived: String,
}

impl LogicChain {
    /// Key point ids referenced by this chain, in order.
    pub fn key_point_ids(&self) -> impl Iterator<Item = &str> {
        self.argument_flow.iter().filter_map(|step| match step {
            FlowStep::KeyPoint(id) => Some(id.as_str()),
            FlowStep::Conclusion => None,
        })
    }
}

/// How the citing paper uses a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsageType {
    #[serde(alias = "foundational")]
    Foundational,
    #[serde(alias = "comparison")]
    Comparison,
    #[serde(alias = "refuting")]
    Refuting,
}

impl UsageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foundational => "Foundational",
            Self::Comparison => "Comparison",
            Self::Refuting => "Refuting",
        }
    }
}

/// The paper a citation points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationTarget {
    /// `None` only when the producer explicitly marked the identity unresolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<PaperIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_author: Option<String>,
    /// Influence signal, filled from bibliography enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u64>,
    /// A DOI that failed the canonical pattern; the identity fell back to metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_doi: Option<String>,
}

/// A classified reference from the paper's bibliography.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub target: CitationTarget,
    pub usage_type: UsageType,
    #[serde(default)]
    pub notes: String,
}

impl Citation {
    pub fn identity(&self) -> Option<&PaperIdentity> {
        self.target.identity.as_ref()
    }

    /// Display title, falling back to the canonical key.
    pub fn display_title(&self) -> String {
        match (&self.target.title, &self.target.identity) {
            (Some(title), _) if !title.trim().is_empty() => title.clone(),
            (_, Some(identity)) => identity.to_string(),
            _ => "Unresolved reference".to_string(),
        }
    }
}

/// The validated, structured distillation of one paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub meta: PaperMeta,
    pub core_analysis: CoreAnalysis,
    pub key_points: Vec<KeyPoint>,
    #[serde(default)]
    pub logic_chains: Vec<LogicChain>,
    /// At most one entry per resolved target identity; first occurrence wins.
    #[serde(default)]
    pub citation_network: Vec<Citation>,
}

impl KnowledgeRecord {
    pub fn identity(&self) -> &PaperIdentity {
        &self.meta.identity
    }
}

// ---------------------------------------------------------------------------
// Bibliography entries (raw, from ingest)
// ---------------------------------------------------------------------------

/// A raw bibliography entry as returned by the ingest source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BibEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u64>,
    /// Unstructured reference string, if the source provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl BibEntry {
    /// Identity by the same rules the validator applies to citations.
    pub fn identity(&self) -> Option<PaperIdentity> {
        self.doi
            .as_deref()
            .and_then(PaperIdentity::from_doi)
            .or_else(|| {
                self.title.as_deref().and_then(|title| {
                    PaperIdentity::from_metadata(
                        title,
                        self.authors.first().map(String::as_str),
                        self.year,
                    )
                })
            })
    }
}

// ---------------------------------------------------------------------------
// PaperOutcome
// ---------------------------------------------------------------------------

/// Terminal outcome recorded for a visited paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperOutcome {
    /// Record extracted, validated, and rendered.
    Completed,
    /// Record valid and citations propagated, but the artifact was not written.
    RenderFailed,
    /// No valid record after the bounded Extract retries.
    ExtractionFailed,
    /// The paper could not be ingested.
    FetchFailed,
}

impl PaperOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::RenderFailed => "render_failed",
            Self::ExtractionFailed => "extraction_failed",
            Self::FetchFailed => "fetch_failed",
        }
    }
}

impl std::fmt::Display for PaperOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doi_identity_normalizes_prefixes_and_case() {
        let a = PaperIdentity::from_doi("https://doi.org/10.1000/ABC.2020").unwrap();
        let b = PaperIdentity::from_doi("doi:10.1000/abc.2020").unwrap();
        let c = PaperIdentity::from_doi("  10.1000/Abc.2020 ").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.as_str(), "doi:10.1000/abc.2020");
        assert_eq!(a.doi(), Some("10.1000/abc.2020"));
    }

    #[test]
    fn malformed_doi_is_rejected() {
        assert!(PaperIdentity::from_doi("not-a-doi").is_none());
        assert!(PaperIdentity::from_doi("10.12/too-short-prefix").is_none());
        assert!(PaperIdentity::parse("hello world").is_err());
    }

    #[test]
    fn metadata_identity_is_stable_under_formatting() {
        let a = PaperIdentity::from_metadata("Attention Is All You Need", Some("Vaswani, A."), Some(2017))
            .unwrap();
        let b = PaperIdentity::from_metadata("attention is all  you need!", Some("Ashish Vaswani"), Some(2017))
            .unwrap();
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("ref:"));
        assert!(!a.is_doi());

        let other_year =
            PaperIdentity::from_metadata("Attention Is All You Need", Some("Vaswani, A."), Some(2018))
                .unwrap();
        assert_ne!(a, other_year);
        assert!(PaperIdentity::from_metadata("  ?! ", None, None).is_none());
    }

    #[test]
    fn parse_roundtrips_canonical_keys() {
        let doi = PaperIdentity::from_doi("10.1000/xyz").unwrap();
        assert_eq!(PaperIdentity::parse(doi.as_str()).unwrap(), doi);

        let fallback = PaperIdentity::from_metadata("A Title", None, None).unwrap();
        let parsed: PaperIdentity = fallback.as_str().parse().unwrap();
        assert_eq!(parsed, fallback);
    }

    #[test]
    fn file_stem_is_filesystem_safe() {
        let plain = PaperIdentity::from_doi("10.1000/xyz.2020-1").unwrap();
        assert_eq!(plain.file_stem(), "10.1000_xyz.2020-1");

        let id = PaperIdentity::from_doi("10.1000/a/b(c)").unwrap();
        let stem = id.file_stem();
        assert!(stem.starts_with("10.1000_a_b_c_-"));
        assert!(stem.chars().all(|c| c.is_ascii_alphanumeric() || "._-".contains(c)));

        let fallback = PaperIdentity::from_metadata("Title", None, None).unwrap();
        assert_eq!(fallback.file_stem(), fallback.as_str().replacen(':', "_", 1));
    }

    #[test]
    fn file_stems_of_distinct_dois_do_not_collide() {
        let underscore = PaperIdentity::from_doi("10.1000/a_b").unwrap();
        let slash = PaperIdentity::from_doi("10.1000/a/b").unwrap();
        let dotted = PaperIdentity::from_doi("10.1000/a.b").unwrap();
        assert_ne!(underscore.file_stem(), slash.file_stem());
        assert_ne!(underscore.file_stem(), dotted.file_stem());
        assert_eq!(dotted.file_stem(), "10.1000_a.b");
        // Stable across calls, since it names files on disk.
        assert_eq!(slash.file_stem(), slash.file_stem());
    }

    #[test]
    fn bib_entry_identity_prefers_doi() {
        let entry = BibEntry {
            title: Some("Deep Residual Learning".into()),
            authors: vec!["He, K.".into()],
            year: Some(2016),
            doi: Some("10.1109/CVPR.2016.90".into()),
            ..Default::default()
        };
        assert_eq!(entry.identity().unwrap().as_str(), "doi:10.1109/cvpr.2016.90");

        let no_doi = BibEntry {
            doi: Some("garbage".into()),
            ..entry
        };
        assert!(no_doi.identity().unwrap().as_str().starts_with("ref:"));
    }

    #[test]
    fn record_serialization() {
        let record = KnowledgeRecord {
            meta: PaperMeta {
                title: "Paper".into(),
                authors: vec!["Doe, J.".into()],
                year: Some(2020),
                identity: PaperIdentity::from_doi("10.1000/p0").unwrap(),
            },
            core_analysis: CoreAnalysis {
                central_hypothesis: "H".into(),
                methodology_summary: String::new(),
                significance: String::new(),
            },
            key_points: vec![KeyPoint {
                id: "KP1".into(),
                content: "claim".into(),
                evidence_anchor: "Table 1".into(),
                confidence_score: 0.9,
            }],
            logic_chains: vec![LogicChain {
                name: "chain".into(),
                argument_flow: vec![FlowStep::KeyPoint("KP1".into()), FlowStep::Conclusion],
                conclusion_derived: "C".into(),
            }],
            citation_network: vec![],
        };

        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains(r#""step":"key_point","id":"KP1""#));
        let parsed: KnowledgeRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, record);
        assert_eq!(parsed.logic_chains[0].key_point_ids().collect::<Vec<_>>(), vec!["KP1"]);
    }
}
