//! Knowledge record validator.
//!
//! [`validate`] is a pure function over a [`CandidateRecord`]. It never stops
//! at the first problem: every violation is collected so that a single retry
//! message can describe all of them.

use std::collections::HashSet;

use lineage_shared::{
    Citation, CitationTarget, CoreAnalysis, FlowStep, KeyPoint, KnowledgeRecord, LogicChain,
    PaperIdentity, PaperMeta, UsageType, is_canonical_doi, normalize_doi,
};
use serde::{Deserialize, Serialize};

use crate::candidate::{CONCLUSION_MARKER, CandidateCitation, CandidateRecord};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// One violation of the knowledge record contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("{path}: required field is missing or empty")]
    MissingField { path: String },

    #[error("key_points[{index}]: duplicate key point id '{id}'")]
    DuplicateKeyPointId { id: String, index: usize },

    #[error("key point '{id}': confidence_score {score} is outside [0.0, 1.0]")]
    OutOfRangeConfidence { id: String, score: f64 },

    #[error("key point '{id}': evidence_anchor is missing")]
    MissingEvidenceAnchor { id: String },

    #[error("logic chain '{chain}': argument_flow references unknown key point '{id}'")]
    DanglingReference { chain: String, id: String },

    #[error("logic chain '{chain}': the conclusion marker must be the last step")]
    MisplacedConclusion { chain: String },

    #[error(
        "citation_network[{index}]: target has no usable DOI or title and is not marked unresolved"
    )]
    UnresolvedCitation { index: usize },

    #[error("{path}: year {year} is outside {min}..={max}", min = PLAUSIBLE_YEARS.start(), max = PLAUSIBLE_YEARS.end())]
    ImplausibleYear { path: String, year: i32 },

    #[error("{path}: {message}")]
    MalformedCandidate { path: String, message: String },
}

/// Publication years accepted for a paper or a cited work.
pub const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 1400..=2200;

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Validate producer JSON. Shape errors are reported as a single
/// [`ValidationError::MalformedCandidate`].
pub fn validate_json(value: serde_json::Value) -> Result<KnowledgeRecord, Vec<ValidationError>> {
    let candidate = CandidateRecord::from_value(value).map_err(|e| vec![e])?;
    validate(&candidate)
}

/// Validate a candidate, deriving the paper identity from its own metadata.
pub fn validate(candidate: &CandidateRecord) -> Result<KnowledgeRecord, Vec<ValidationError>> {
    validate_inner(candidate, None)
}

/// Validate a candidate whose identity is already known (the frontier entry
/// being processed). The candidate's own DOI is ignored.
pub fn validate_as(
    candidate: &CandidateRecord,
    identity: &PaperIdentity,
) -> Result<KnowledgeRecord, Vec<ValidationError>> {
    validate_inner(candidate, Some(identity))
}

fn validate_inner(
    candidate: &CandidateRecord,
    known_identity: Option<&PaperIdentity>,
) -> Result<KnowledgeRecord, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let meta = check_meta(candidate, known_identity, &mut errors);
    let core_analysis = check_core_analysis(candidate, &mut errors);
    let key_points = check_key_points(candidate, &mut errors);
    let declared: HashSet<&str> = key_points.iter().map(|kp| kp.id.as_str()).collect();
    let logic_chains = check_logic_chains(candidate, &declared, &mut errors);
    let citation_network = check_citations(candidate, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    // Every check returned its part; a missing part implies a recorded error.
    match (meta, core_analysis) {
        (Some(meta), Some(core_analysis)) => Ok(KnowledgeRecord {
            meta,
            core_analysis,
            key_points,
            logic_chains,
            citation_network,
        }),
        _ => Err(vec![ValidationError::MissingField {
            path: "meta".into(),
        }]),
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn check_year(year: Option<i32>, path: impl FnOnce() -> String, errors: &mut Vec<ValidationError>) {
    if let Some(year) = year {
        if !PLAUSIBLE_YEARS.contains(&year) {
            errors.push(ValidationError::ImplausibleYear { path: path(), year });
        }
    }
}

fn check_meta(
    candidate: &CandidateRecord,
    known_identity: Option<&PaperIdentity>,
    errors: &mut Vec<ValidationError>,
) -> Option<PaperMeta> {
    let meta = &candidate.meta;
    check_year(meta.year, || "meta.year".into(), errors);
    let Some(title) = non_empty(meta.title.as_ref()) else {
        errors.push(ValidationError::MissingField {
            path: "meta.title".into(),
        });
        return None;
    };

    let identity = match known_identity {
        Some(identity) => identity.clone(),
        None => {
            let from_doi = meta.doi.as_deref().and_then(PaperIdentity::from_doi);
            let resolved = from_doi.or_else(|| {
                PaperIdentity::from_metadata(
                    &title,
                    meta.authors.first().map(String::as_str),
                    meta.year,
                )
            });
            match resolved {
                Some(identity) => identity,
                None => {
                    errors.push(ValidationError::MalformedCandidate {
                        path: "meta".into(),
                        message: "paper identity cannot be derived from DOI or title".into(),
                    });
                    return None;
                }
            }
        }
    };

    Some(PaperMeta {
        title,
        authors: meta
            .authors
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
        year: meta.year,
        identity,
    })
}

fn check_core_analysis(
    candidate: &CandidateRecord,
    errors: &mut Vec<ValidationError>,
) -> Option<CoreAnalysis> {
    let core = &candidate.core_analysis;
    let hypothesis = non_empty(core.central_hypothesis.as_ref());
    if hypothesis.is_none() {
        errors.push(ValidationError::MissingField {
            path: "core_analysis.central_hypothesis".into(),
        });
    }
    if candidate.key_points.is_empty() {
        errors.push(ValidationError::MissingField {
            path: "key_points".into(),
        });
    }

    hypothesis.map(|central_hypothesis| CoreAnalysis {
        central_hypothesis,
        methodology_summary: non_empty(core.methodology_summary.as_ref()).unwrap_or_default(),
        significance: non_empty(core.significance.as_ref()).unwrap_or_default(),
    })
}

fn check_key_points(candidate: &CandidateRecord, errors: &mut Vec<ValidationError>) -> Vec<KeyPoint> {
    let mut seen = HashSet::new();
    let mut key_points = Vec::with_capacity(candidate.key_points.len());
    let mut range_errors = Vec::new();
    let mut anchor_errors = Vec::new();

    for (index, kp) in candidate.key_points.iter().enumerate() {
        let Some(id) = non_empty(kp.id.as_ref()) else {
            errors.push(ValidationError::MissingField {
                path: format!("key_points[{index}].id"),
            });
            continue;
        };
        if !seen.insert(id.clone()) {
            errors.push(ValidationError::DuplicateKeyPointId { id, index });
            continue;
        }

        let content = non_empty(kp.content.as_ref());
        if content.is_none() {
            errors.push(ValidationError::MissingField {
                path: format!("key_points[{index}].content"),
            });
        }

        let score = match kp.confidence_score {
            Some(score) if (0.0..=1.0).contains(&score) => Some(score),
            Some(score) => {
                range_errors.push(ValidationError::OutOfRangeConfidence {
                    id: id.clone(),
                    score,
                });
                None
            }
            None => {
                errors.push(ValidationError::MissingField {
                    path: format!("key_points[{index}].confidence_score"),
                });
                None
            }
        };

        let anchor = non_empty(kp.evidence_anchor.as_ref());
        if anchor.is_none() {
            anchor_errors.push(ValidationError::MissingEvidenceAnchor { id: id.clone() });
        }

        if let (Some(content), Some(evidence_anchor), Some(confidence_score)) =
            (content, anchor, score)
        {
            key_points.push(KeyPoint {
                id,
                content,
                evidence_anchor,
                confidence_score,
            });
        } else {
            // Keep the id declared so chains referencing it are not also
            // reported as dangling.
            key_points.push(KeyPoint {
                id,
                content: String::new(),
                evidence_anchor: String::new(),
                confidence_score: 0.0,
            });
        }
    }

    errors.extend(range_errors);
    errors.extend(anchor_errors);
    key_points
}

fn is_conclusion_marker(step: &str) -> bool {
    step.eq_ignore_ascii_case(CONCLUSION_MARKER) || step == "∴"
}

fn check_logic_chains(
    candidate: &CandidateRecord,
    declared: &HashSet<&str>,
    errors: &mut Vec<ValidationError>,
) -> Vec<LogicChain> {
    let mut chains = Vec::with_capacity(candidate.logic_chains.len());

    for (index, chain) in candidate.logic_chains.iter().enumerate() {
        let name = non_empty(chain.name.as_ref());
        if name.is_none() {
            errors.push(ValidationError::MissingField {
                path: format!("logic_chains[{index}].name"),
            });
        }
        let label = name.clone().unwrap_or_else(|| format!("logic_chains[{index}]"));

        let conclusion = non_empty(chain.conclusion_derived.as_ref());
        if conclusion.is_none() {
            errors.push(ValidationError::MissingField {
                path: format!("logic_chains[{index}].conclusion_derived"),
            });
        }

        let steps: Vec<&str> = chain
            .argument_flow
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if steps.is_empty() {
            errors.push(ValidationError::MissingField {
                path: format!("logic_chains[{index}].argument_flow"),
            });
        }

        let mut flow = Vec::with_capacity(steps.len() + 1);
        let last = steps.len().saturating_sub(1);
        for (pos, step) in steps.iter().enumerate() {
            if is_conclusion_marker(step) {
                if pos != last {
                    errors.push(ValidationError::MisplacedConclusion {
                        chain: label.clone(),
                    });
                }
                continue;
            }
            if !declared.contains(step) {
                errors.push(ValidationError::DanglingReference {
                    chain: label.clone(),
                    id: (*step).to_string(),
                });
            }
            flow.push(FlowStep::KeyPoint((*step).to_string()));
        }
        flow.push(FlowStep::Conclusion);

        if let (Some(name), Some(conclusion_derived)) = (name, conclusion) {
            chains.push(LogicChain {
                name,
                argument_flow: flow,
                conclusion_derived,
            });
        }
    }

    chains
}

fn parse_usage_type(raw: &str) -> Option<UsageType> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "foundational" => Some(UsageType::Foundational),
        "comparison" => Some(UsageType::Comparison),
        "refuting" => Some(UsageType::Refuting),
        _ => None,
    }
}

/// Resolve a citation target. A DOI that fails the canonical pattern is
/// kept as `rejected_doi` and the identity falls back to metadata.
fn resolve_target(citation: &CandidateCitation) -> CitationTarget {
    let title = non_empty(citation.title.as_ref());
    let first_author = citation
        .authors
        .first()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());

    let mut rejected_doi = None;
    let mut identity = None;
    if let Some(raw) = non_empty(citation.doi.as_ref()) {
        let doi = normalize_doi(&raw);
        if is_canonical_doi(&doi) {
            identity = PaperIdentity::from_doi(&doi);
        } else {
            rejected_doi = Some(raw);
        }
    }
    if identity.is_none() {
        identity = title.as_deref().and_then(|title| {
            PaperIdentity::from_metadata(title, first_author.as_deref(), citation.year)
        });
    }

    CitationTarget {
        identity,
        title,
        year: citation.year,
        first_author,
        citation_count: citation.citation_count,
        rejected_doi,
    }
}

fn check_citations(candidate: &CandidateRecord, errors: &mut Vec<ValidationError>) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut citations = Vec::with_capacity(candidate.citation_network.len());

    for (index, citation) in candidate.citation_network.iter().enumerate() {
        check_year(citation.year, || format!("citation_network[{index}].year"), errors);
        let usage_type = match citation.usage_type.as_deref() {
            None => {
                errors.push(ValidationError::MissingField {
                    path: format!("citation_network[{index}].usage_type"),
                });
                None
            }
            Some(raw) => {
                let parsed = parse_usage_type(raw);
                if parsed.is_none() {
                    errors.push(ValidationError::MalformedCandidate {
                        path: format!("citation_network[{index}].usage_type"),
                        message: format!(
                            "'{raw}' is not one of Foundational, Comparison, Refuting"
                        ),
                    });
                }
                parsed
            }
        };

        let target = resolve_target(citation);
        if target.identity.is_none() && !citation.unresolved {
            errors.push(ValidationError::UnresolvedCitation { index });
            continue;
        }

        let Some(usage_type) = usage_type else {
            continue;
        };

        if let Some(identity) = &target.identity {
            if !seen.insert(identity.clone()) {
                continue;
            }
        }

        citations.push(Citation {
            target,
            usage_type,
            notes: citation
                .notes
                .as_deref()
                .map(|n| n.trim().to_string())
                .unwrap_or_default(),
        });
    }

    citations
}
