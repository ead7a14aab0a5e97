//! Lenient model of extraction output.
//!
//! Every field is optional or defaulted so that a structurally incomplete
//! candidate still deserializes and the validator can report *all* of its
//! problems at once. Only JSON that does not have the overall shape (wrong
//! types, non-object root) is rejected up front.

use lineage_shared::{FlowStep, KnowledgeRecord};
use serde::{Deserialize, Serialize};

use crate::validator::ValidationError;

/// Marker the producer uses to terminate an `argument_flow`.
pub const CONCLUSION_MARKER: &str = "conclusion";

/// A candidate knowledge record as produced by the extraction collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateRecord {
    pub meta: CandidateMeta,
    pub core_analysis: CandidateCoreAnalysis,
    pub key_points: Vec<CandidateKeyPoint>,
    pub logic_chains: Vec<CandidateLogicChain>,
    pub citation_network: Vec<CandidateCitation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateMeta {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateCoreAnalysis {
    pub central_hypothesis: Option<String>,
    pub methodology_summary: Option<String>,
    pub significance: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateKeyPoint {
    pub id: Option<String>,
    pub content: Option<String>,
    pub evidence_anchor: Option<String>,
    pub confidence_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateLogicChain {
    pub name: Option<String>,
    /// Key point ids, terminated by the conclusion marker.
    pub argument_flow: Vec<String>,
    pub conclusion_derived: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateCitation {
    #[serde(alias = "target_paper_doi")]
    pub doi: Option<String>,
    #[serde(alias = "target_paper_title")]
    pub title: Option<String>,
    pub year: Option<i32>,
    pub authors: Vec<String>,
    pub citation_count: Option<u64>,
    /// Expected to be one of `Foundational`, `Comparison`, `Refuting`.
    pub usage_type: Option<String>,
    pub notes: Option<String>,
    /// Set by the producer when the target could not be identified.
    pub unresolved: bool,
}

impl CandidateRecord {
    /// Deserialize producer output, mapping shape errors to a validation error.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        if !value.is_object() {
            return Err(ValidationError::MalformedCandidate {
                path: "$".into(),
                message: "candidate record must be a JSON object".into(),
            });
        }
        serde_json::from_value(value).map_err(|e| ValidationError::MalformedCandidate {
            path: "$".into(),
            message: e.to_string(),
        })
    }
}

impl From<&KnowledgeRecord> for CandidateRecord {
    /// Re-express a validated record in candidate form (used for re-validation
    /// of cached and stored records).
    fn from(record: &KnowledgeRecord) -> Self {
        Self {
            meta: CandidateMeta {
                title: Some(record.meta.title.clone()),
                authors: record.meta.authors.clone(),
                year: record.meta.year,
                doi: record.meta.identity.doi().map(str::to_string),
            },
            core_analysis: CandidateCoreAnalysis {
                central_hypothesis: Some(record.core_analysis.central_hypothesis.clone()),
                methodology_summary: Some(record.core_analysis.methodology_summary.clone()),
                significance: Some(record.core_analysis.significance.clone()),
            },
            key_points: record
                .key_points
                .iter()
                .map(|kp| CandidateKeyPoint {
                    id: Some(kp.id.clone()),
                    content: Some(kp.content.clone()),
                    evidence_anchor: Some(kp.evidence_anchor.clone()),
                    confidence_score: Some(kp.confidence_score),
                })
                .collect(),
            logic_chains: record
                .logic_chains
                .iter()
                .map(|chain| CandidateLogicChain {
                    name: Some(chain.name.clone()),
                    argument_flow: chain
                        .argument_flow
                        .iter()
                        .map(|step| match step {
                            FlowStep::KeyPoint(id) => id.clone(),
                            FlowStep::Conclusion => CONCLUSION_MARKER.to_string(),
                        })
                        .collect(),
                    conclusion_derived: Some(chain.conclusion_derived.clone()),
                })
                .collect(),
            citation_network: record
                .citation_network
                .iter()
                .map(|c| CandidateCitation {
                    doi: c
                        .target
                        .identity
                        .as_ref()
                        .and_then(|id| id.doi().map(str::to_string))
                        .or_else(|| c.target.rejected_doi.clone()),
                    title: c.target.title.clone(),
                    year: c.target.year,
                    authors: c.target.first_author.iter().cloned().collect(),
                    citation_count: c.target.citation_count,
                    usage_type: Some(c.usage_type.as_str().to_string()),
                    notes: Some(c.notes.clone()),
                    unresolved: c.target.identity.is_none(),
                })
                .collect(),
        }
    }
}
