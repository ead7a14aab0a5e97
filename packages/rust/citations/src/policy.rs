//! Scoring policy for the citation ranker.

use lineage_shared::{RankingConfig, RankingPolicyKind};

/// Weights used to score a foundational citation.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingPolicy {
    pub kind: RankingPolicyKind,
    pub age_weight: f64,
    pub age_horizon_years: u32,
    pub influence_weight: f64,
    pub influence_cap: u64,
    pub doi_bonus: f64,
    pub metadata_bonus: f64,
}

impl Default for RankingPolicy {
    fn default() -> Self {
        Self::from(&RankingConfig::default())
    }
}

impl From<&RankingConfig> for RankingPolicy {
    fn from(config: &RankingConfig) -> Self {
        Self {
            kind: config.policy,
            age_weight: config.age_weight,
            age_horizon_years: config.age_horizon_years.max(1),
            influence_weight: config.influence_weight,
            influence_cap: config.influence_cap.max(1),
            doi_bonus: config.doi_bonus,
            metadata_bonus: config.metadata_bonus,
        }
    }
}

impl RankingPolicy {
    /// Age signal in `[0, 1]`: how much older the cited work is than the
    /// reference year, saturating at the horizon. Unknown or later years score 0.
    pub fn age_signal(&self, year: Option<i32>, reference_year: Option<i32>) -> f64 {
        match (year, reference_year) {
            (Some(year), Some(reference)) if year <= reference => {
                let age = (i64::from(reference) - i64::from(year)) as f64;
                (age / f64::from(self.age_horizon_years)).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }

    /// Influence signal in `[0, 1]`: log-scaled citation count, saturating at the cap.
    pub fn influence_signal(&self, citation_count: Option<u64>) -> f64 {
        let Some(count) = citation_count else {
            return 0.0;
        };
        let count = count.min(self.influence_cap) as f64;
        (count.ln_1p() / (self.influence_cap as f64).ln_1p()).clamp(0.0, 1.0)
    }

    /// Weighted combination of the signals selected by the policy kind.
    pub fn signal(&self, year: Option<i32>, reference_year: Option<i32>, citation_count: Option<u64>) -> f64 {
        let age = self.age_signal(year, reference_year) * self.age_weight;
        let influence = self.influence_signal(citation_count) * self.influence_weight;
        match self.kind {
            RankingPolicyKind::Age => age,
            RankingPolicyKind::Influence => influence,
            RankingPolicyKind::Blend => (age + influence) / 2.0,
        }
    }
}
