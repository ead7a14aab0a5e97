//! Citation classifier and ranker.
//!
//! Decides which of a paper's citations become recursion candidates. Only
//! [`UsageType::Foundational`] citations with a resolved identity are
//! eligible; the rest stay in the knowledge record but are never enqueued.
//! Ranking is a pure function of its inputs. Identity resolution and
//! enrichment (year, citation count) happen before ranking.

pub mod policy;

pub use policy::RankingPolicy;

use lineage_shared::{Citation, UsageType};

/// Base weight for a usage type. Non-foundational citations are filtered
/// out before scoring, so this mostly orders ties.
fn usage_weight(usage_type: UsageType) -> f64 {
    match usage_type {
        UsageType::Foundational => 1.0,
        UsageType::Comparison | UsageType::Refuting => 0.0,
    }
}

/// A citation selected for recursion, with the score that placed it.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCitation {
    pub citation: Citation,
    pub score: f64,
}

/// Scores and selects foundational citations.
#[derive(Debug, Clone, Default)]
pub struct CitationRanker {
    policy: RankingPolicy,
}

impl CitationRanker {
    pub fn new(policy: RankingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RankingPolicy {
        &self.policy
    }

    /// Whether a citation may be followed at all.
    pub fn is_eligible(citation: &Citation) -> bool {
        citation.usage_type == UsageType::Foundational && citation.identity().is_some()
    }

    /// Score one citation against the citing paper's year.
    pub fn score(&self, citation: &Citation, reference_year: Option<i32>) -> f64 {
        let target = &citation.target;
        let mut score = usage_weight(citation.usage_type);
        score += self
            .policy
            .signal(target.year, reference_year, target.citation_count);

        if citation.identity().is_some_and(|id| id.is_doi()) {
            score += self.policy.doi_bonus;
        }
        if target.title.as_deref().is_some_and(|t| !t.trim().is_empty()) {
            score += self.policy.metadata_bonus;
        }
        if target.first_author.is_some() {
            score += self.policy.metadata_bonus;
        }
        score
    }

    /// Rank eligible citations and keep the top `max_selected`, best first.
    ///
    /// When the citing paper's year is unknown, ages are measured against
    /// the most recent year among the candidates. Equal scores keep their
    /// order of appearance.
    pub fn rank(
        &self,
        citations: &[Citation],
        current_paper_year: Option<i32>,
        max_selected: usize,
    ) -> Vec<RankedCitation> {
        let eligible: Vec<&Citation> = citations.iter().filter(|c| Self::is_eligible(c)).collect();
        let reference_year =
            current_paper_year.or_else(|| eligible.iter().filter_map(|c| c.target.year).max());

        let mut ranked: Vec<RankedCitation> = eligible
            .into_iter()
            .map(|citation| RankedCitation {
                score: self.score(citation, reference_year),
                citation: citation.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(max_selected);

        tracing::debug!(
            candidates = citations.len(),
            selected = ranked.len(),
            ?reference_year,
            "ranked citations"
        );
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineage_shared::{CitationTarget, PaperIdentity, RankingPolicyKind};

    fn citation(doi: &str, title: &str, year: Option<i32>, usage_type: UsageType) -> Citation {
        Citation {
            target: CitationTarget {
                identity: PaperIdentity::from_doi(doi),
                title: Some(title.into()),
                year,
                first_author: Some("Author".into()),
                citation_count: None,
                rejected_doi: None,
            },
            usage_type,
            notes: String::new(),
        }
    }

    fn seed_citations() -> Vec<Citation> {
        vec![
            citation("10.1000/a", "A", Some(1990), UsageType::Foundational),
            citation("10.1000/b", "B", Some(2000), UsageType::Foundational),
            citation("10.1000/c", "C", Some(2015), UsageType::Foundational),
            citation("10.1000/d", "D", Some(1950), UsageType::Comparison),
        ]
    }

    fn titles(ranked: &[RankedCitation]) -> Vec<String> {
        ranked.iter().map(|r| r.citation.display_title()).collect()
    }

    #[test]
    fn age_policy_selects_oldest_foundational() {
        let ranker = CitationRanker::default();
        let ranked = ranker.rank(&seed_citations(), Some(2020), 2);
        assert_eq!(titles(&ranked), vec!["A", "B"]);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn comparison_and_refuting_are_never_selected() {
        let ranker = CitationRanker::default();
        let ranked = ranker.rank(&seed_citations(), Some(2020), 10);
        assert_eq!(ranked.len(), 3);
        assert!(ranked.iter().all(|r| r.citation.usage_type == UsageType::Foundational));
    }

    #[test]
    fn unresolved_citations_are_not_eligible() {
        let mut citations = seed_citations();
        citations[0].target.identity = None;
        let ranked = CitationRanker::default().rank(&citations, Some(2020), 5);
        assert_eq!(titles(&ranked), vec!["B", "C"]);
    }

    #[test]
    fn doi_identity_outranks_metadata_identity_at_equal_age() {
        let mut citations = vec![
            citation("10.1000/x", "X", Some(2000), UsageType::Foundational),
            citation("10.1000/y", "Y", Some(2000), UsageType::Foundational),
        ];
        citations[0].target.identity = PaperIdentity::from_metadata("X", Some("Author"), Some(2000));
        let ranked = CitationRanker::default().rank(&citations, Some(2020), 1);
        assert_eq!(titles(&ranked), vec!["Y"]);
    }

    #[test]
    fn influence_policy_prefers_highly_cited() {
        let mut citations = seed_citations();
        citations[2].target.citation_count = Some(50_000);
        citations[0].target.citation_count = Some(10);
        let policy = RankingPolicy {
            kind: RankingPolicyKind::Influence,
            ..RankingPolicy::default()
        };
        let ranked = CitationRanker::new(policy).rank(&citations, Some(2020), 1);
        assert_eq!(titles(&ranked), vec!["C"]);
    }

    #[test]
    fn unknown_paper_year_uses_latest_candidate_year() {
        let ranked = CitationRanker::default().rank(&seed_citations(), None, 3);
        assert_eq!(titles(&ranked), vec!["A", "B", "C"]);
    }

    #[test]
    fn extreme_years_rank_without_overflow() {
        let citations = vec![
            citation("10.1000/min", "Min", Some(i32::MIN), UsageType::Foundational),
            citation("10.1000/max", "Max", Some(i32::MAX), UsageType::Foundational),
            citation("10.1000/b", "B", Some(2000), UsageType::Foundational),
        ];
        let ranked = CitationRanker::default().rank(&citations, Some(2020), 3);
        assert_eq!(titles(&ranked), vec!["Min", "B", "Max"]);

        // Reference year taken from the candidates themselves.
        let ranked = CitationRanker::default().rank(&citations, None, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].citation.display_title(), "Min");
    }

    #[test]
    fn ties_keep_input_order_and_zero_selects_nothing() {
        let citations = vec![
            citation("10.1000/p", "P", None, UsageType::Foundational),
            citation("10.1000/q", "Q", None, UsageType::Foundational),
        ];
        let ranker = CitationRanker::default();
        assert_eq!(titles(&ranker.rank(&citations, Some(2020), 2)), vec!["P", "Q"]);
        assert!(ranker.rank(&citations, Some(2020), 0).is_empty());
    }
}
