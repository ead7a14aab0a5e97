//! Per-paper pipeline: ingest → extract/validate → rank → render → enqueue.
//!
//! [`PipelineController::process`] folds every per-paper failure into a
//! [`PipelineResult`]. Only fatal errors (state or storage I/O) are returned
//! as `Err` and abort the run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lineage_citations::CitationRanker;
use lineage_ingest::IngestedPaper;
use lineage_schema::{CandidateRecord, ValidationError, format_feedback, validate_as};
use lineage_shared::{
    AppConfig, BibEntry, KnowledgeRecord, LineageError, PaperIdentity, PaperOutcome, Result,
    RunLimits,
};
use lineage_state::{FrontierEntry, RecursionStateManager, VisitedEntry};
use lineage_storage::Storage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelFlag;
use crate::collaborators::{Extract, ExtractRequest, Ingest, Render};
use crate::extraction::prompt_hash;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Stage at which a paper stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStage {
    Ingest,
    Extract,
    Render,
    Cancelled,
}

/// Terminal result of processing one paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineResult {
    Completed {
        identity: PaperIdentity,
        depth: u32,
        record: Box<KnowledgeRecord>,
        citations_enqueued: Vec<PaperIdentity>,
        render_ref: String,
    },
    Failed {
        identity: PaperIdentity,
        depth: u32,
        stage: FailedStage,
        error: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        validation_errors: Vec<ValidationError>,
        /// Non-empty only for render failures.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        citations_enqueued: Vec<PaperIdentity>,
    },
    /// Visited in an earlier run whose result was not stored.
    Visited {
        identity: PaperIdentity,
        depth: u32,
        outcome: PaperOutcome,
    },
}

impl PipelineResult {
    pub fn identity(&self) -> &PaperIdentity {
        match self {
            Self::Completed { identity, .. }
            | Self::Failed { identity, .. }
            | Self::Visited { identity, .. } => identity,
        }
    }

    pub fn depth(&self) -> u32 {
        match self {
            Self::Completed { depth, .. } | Self::Failed { depth, .. } | Self::Visited { depth, .. } => {
                *depth
            }
        }
    }

    /// Outcome recorded in the visited set; `None` for cancelled papers.
    pub fn outcome(&self) -> Option<PaperOutcome> {
        match self {
            Self::Completed { .. } => Some(PaperOutcome::Completed),
            Self::Failed { stage, .. } => match stage {
                FailedStage::Ingest => Some(PaperOutcome::FetchFailed),
                FailedStage::Extract => Some(PaperOutcome::ExtractionFailed),
                FailedStage::Render => Some(PaperOutcome::RenderFailed),
                FailedStage::Cancelled => None,
            },
            Self::Visited { outcome, .. } => Some(*outcome),
        }
    }

    pub fn citations_enqueued(&self) -> &[PaperIdentity] {
        match self {
            Self::Completed { citations_enqueued, .. } | Self::Failed { citations_enqueued, .. } => {
                citations_enqueued
            }
            Self::Visited { .. } => &[],
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                stage: FailedStage::Cancelled,
                ..
            }
        )
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Retry and timeout bounds for the external stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Extra Extract attempts after a validation failure.
    pub max_retries: u32,
    pub ingest_timeout: Duration,
    pub extract_timeout: Duration,
    pub render_timeout: Duration,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_retries: config.extraction.max_retries,
            ingest_timeout: Duration::from_secs(config.timeouts.ingest_secs),
            extract_timeout: Duration::from_secs(config.timeouts.extract_secs),
            render_timeout: Duration::from_secs(config.timeouts.render_secs),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// The three external collaborators of the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub ingest: Arc<dyn Ingest>,
    pub extract: Arc<dyn Extract>,
    pub render: Arc<dyn Render>,
}

/// Why extraction produced no record.
struct ExtractFailure {
    error: String,
    validation_errors: Vec<ValidationError>,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Runs the per-paper state machine.
pub struct PipelineController {
    state: Arc<RecursionStateManager>,
    storage: Arc<Storage>,
    collaborators: Collaborators,
    ranker: CitationRanker,
    settings: PipelineSettings,
    cancel: CancelFlag,
}

impl PipelineController {
    pub fn new(
        state: Arc<RecursionStateManager>,
        storage: Arc<Storage>,
        collaborators: Collaborators,
        ranker: CitationRanker,
        settings: PipelineSettings,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            state,
            storage,
            collaborators,
            ranker,
            settings,
            cancel,
        }
    }

    pub fn state(&self) -> &Arc<RecursionStateManager> {
        &self.state
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Process one frontier entry.
    ///
    /// An identity that is already visited is a no-op returning its stored
    /// result; no collaborator is called.
    #[instrument(skip_all, fields(identity = %entry.identity, depth = entry.depth))]
    pub async fn process(&self, entry: &FrontierEntry, limits: &RunLimits) -> Result<PipelineResult> {
        if let Some(visited) = self.state.visited(&entry.identity).await {
            debug!("already visited");
            return self.stored_result(&entry.identity, &visited).await;
        }
        if self.cancel.is_cancelled() {
            return self.cancelled(entry, "before ingest").await;
        }

        let started = Instant::now();

        // --- Ingest ---
        let ingest = &self.collaborators.ingest;
        let fetched = with_timeout(
            "ingest",
            self.settings.ingest_timeout,
            ingest.fetch(&entry.identity, entry.title.as_deref()),
        )
        .await;
        if self.cancel.is_cancelled() {
            return self.cancelled(entry, "during ingest").await;
        }
        let paper = match fetched {
            Ok(paper) => paper,
            Err(e) => {
                warn!(stage = "ingest", error = %e, "paper failed");
                let result = PipelineResult::Failed {
                    identity: entry.identity.clone(),
                    depth: entry.depth,
                    stage: FailedStage::Ingest,
                    error: e.to_string(),
                    validation_errors: Vec::new(),
                    citations_enqueued: Vec::new(),
                };
                return self.finish(entry, entry.title.clone(), result, Vec::new(), limits).await;
            }
        };

        // --- Extract + validate ---
        let extracted = self.extract_record(entry, &paper).await;
        if self.cancel.is_cancelled() {
            return self.cancelled(entry, "during extraction").await;
        }
        let record = match extracted {
            Ok(record) => enrich_citations(record, &paper.bibliography),
            Err(failure) => {
                warn!(
                    stage = "extract",
                    error = %failure.error,
                    violations = failure.validation_errors.len(),
                    "paper failed"
                );
                let result = PipelineResult::Failed {
                    identity: entry.identity.clone(),
                    depth: entry.depth,
                    stage: FailedStage::Extract,
                    error: failure.error,
                    validation_errors: failure.validation_errors,
                    citations_enqueued: Vec::new(),
                };
                let title = paper.title.clone().or_else(|| entry.title.clone());
                return self.finish(entry, title, result, Vec::new(), limits).await;
            }
        };
        self.storage.upsert_record(&record).await?;

        // --- Classify & select ---
        let selected = self.select_citations(entry, &record, limits);

        // --- Render ---
        let rendered = with_timeout(
            "render",
            self.settings.render_timeout,
            self.collaborators.render.render(&record),
        )
        .await;
        if self.cancel.is_cancelled() {
            return self.cancelled(entry, "during render").await;
        }

        let title = Some(record.meta.title.clone());
        let result = match rendered {
            Ok(render_ref) => PipelineResult::Completed {
                identity: entry.identity.clone(),
                depth: entry.depth,
                record: Box::new(record),
                citations_enqueued: Vec::new(),
                render_ref,
            },
            Err(e) => {
                warn!(stage = "render", error = %e, "render failed, citations still propagate");
                PipelineResult::Failed {
                    identity: entry.identity.clone(),
                    depth: entry.depth,
                    stage: FailedStage::Render,
                    error: e.to_string(),
                    validation_errors: Vec::new(),
                    citations_enqueued: Vec::new(),
                }
            }
        };

        let result = self.finish(entry, title, result, selected, limits).await?;
        info!(
            outcome = ?result.outcome(),
            enqueued = result.citations_enqueued().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "paper processed"
        );
        Ok(result)
    }

    /// Rank foundational citations; a paper at `max_depth` selects none.
    fn select_citations(
        &self,
        entry: &FrontierEntry,
        record: &KnowledgeRecord,
        limits: &RunLimits,
    ) -> Vec<FrontierEntry> {
        if entry.depth >= limits.max_depth {
            debug!(max_depth = limits.max_depth, "at depth bound, citations not followed");
            return Vec::new();
        }
        self.ranker
            .rank(&record.citation_network, record.meta.year, limits.max_citations)
            .into_iter()
            .filter_map(|ranked| {
                let identity = ranked.citation.identity()?.clone();
                Some(FrontierEntry {
                    identity,
                    depth: entry.depth + 1,
                    discovered_from: Some(entry.identity.clone()),
                    title: ranked.citation.target.title.clone(),
                })
            })
            .collect()
    }

    /// Extract a valid record, consulting the cache first and retrying the
    /// producer with feedback on validation failure.
    async fn extract_record(
        &self,
        entry: &FrontierEntry,
        paper: &IngestedPaper,
    ) -> std::result::Result<KnowledgeRecord, ExtractFailure> {
        let extract = &self.collaborators.extract;
        let hash = prompt_hash(&paper.raw_text, &paper.bibliography);
        let model = extract.model_id();

        match self.storage.get_extraction_cache(&hash, model).await {
            Ok(Some(json)) => match self.validate_cached(entry, paper, &json) {
                Some(record) => {
                    debug!("extraction cache hit");
                    return Ok(record);
                }
                None => debug!("cached candidate no longer validates, calling producer"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "extraction cache lookup failed"),
        }

        let attempts = self.settings.max_retries + 1;
        let mut last_errors: Vec<ValidationError> = Vec::new();

        for attempt in 1..=attempts {
            let request = ExtractRequest {
                identity: entry.identity.clone(),
                title: paper.title.clone().or_else(|| entry.title.clone()),
                raw_text: paper.raw_text.clone(),
                bibliography: paper.bibliography.clone(),
                feedback: (!last_errors.is_empty()).then(|| format_feedback(&last_errors)),
                prior_errors: std::mem::take(&mut last_errors),
            };

            let value = with_timeout(
                "extract",
                self.settings.extract_timeout,
                extract.extract(&request),
            )
            .await
            .map_err(|e| ExtractFailure {
                error: e.to_string(),
                validation_errors: Vec::new(),
            })?;

            if self.cancel.is_cancelled() {
                return Err(ExtractFailure {
                    error: LineageError::Cancelled.to_string(),
                    validation_errors: Vec::new(),
                });
            }

            let outcome = CandidateRecord::from_value(value).map_err(|e| vec![e]).and_then(|mut candidate| {
                fill_meta(&mut candidate, entry, paper);
                validate_as(&candidate, &entry.identity)
            });
            match outcome {
                Ok(record) => {
                    self.cache_candidate(&hash, model, &record).await;
                    debug!(attempt, "candidate accepted");
                    return Ok(record);
                }
                Err(errors) => {
                    info!(attempt, attempts, violations = errors.len(), "candidate rejected");
                    last_errors = errors;
                }
            }
        }

        Err(ExtractFailure {
            error: format!("no valid record after {attempts} attempt(s)"),
            validation_errors: last_errors,
        })
    }

    fn validate_cached(
        &self,
        entry: &FrontierEntry,
        paper: &IngestedPaper,
        json: &str,
    ) -> Option<KnowledgeRecord> {
        let value: serde_json::Value = serde_json::from_str(json).ok()?;
        let mut candidate = CandidateRecord::from_value(value).ok()?;
        fill_meta(&mut candidate, entry, paper);
        validate_as(&candidate, &entry.identity).ok()
    }

    async fn cache_candidate(&self, hash: &str, model: &str, record: &KnowledgeRecord) {
        let json = match serde_json::to_string(&CandidateRecord::from(record)) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize candidate for cache");
                return;
            }
        };
        if let Err(e) = self.storage.set_extraction_cache(hash, model, &json).await {
            warn!(error = %e, "failed to write extraction cache");
        }
    }

    /// Mark visited, enqueue citations, and store the result.
    async fn finish(
        &self,
        entry: &FrontierEntry,
        title: Option<String>,
        mut result: PipelineResult,
        citations: Vec<FrontierEntry>,
        limits: &RunLimits,
    ) -> Result<PipelineResult> {
        let outcome = result
            .outcome()
            .ok_or_else(|| LineageError::validation("cancelled results are never finished"))?;
        let accepted = self
            .state
            .complete(&entry.identity, entry.depth, title, outcome, citations, limits.max_depth)
            .await?;

        match &mut result {
            PipelineResult::Completed { citations_enqueued, .. }
            | PipelineResult::Failed { citations_enqueued, .. } => *citations_enqueued = accepted,
            PipelineResult::Visited { .. } => {}
        }

        let json = serde_json::to_string(&result)
            .map_err(|e| LineageError::Storage(format!("failed to serialize result: {e}")))?;
        self.storage.set_result(&entry.identity, outcome, &json).await?;
        Ok(result)
    }

    async fn stored_result(
        &self,
        identity: &PaperIdentity,
        visited: &VisitedEntry,
    ) -> Result<PipelineResult> {
        match self.storage.get_result(identity).await? {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| LineageError::Storage(format!("stored result for {identity} is invalid: {e}"))),
            None => Ok(PipelineResult::Visited {
                identity: identity.clone(),
                depth: visited.depth,
                outcome: visited.outcome,
            }),
        }
    }

    /// Return the entry to the frontier without visiting it.
    async fn cancelled(&self, entry: &FrontierEntry, when: &str) -> Result<PipelineResult> {
        info!(when, "cancelled, returning paper to the frontier");
        self.state.release(&entry.identity).await?;
        Ok(PipelineResult::Failed {
            identity: entry.identity.clone(),
            depth: entry.depth,
            stage: FailedStage::Cancelled,
            error: LineageError::Cancelled.to_string(),
            validation_errors: Vec::new(),
            citations_enqueued: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Bound an external call; elapsing counts as that stage's failure.
async fn with_timeout<T>(
    stage: &str,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LineageError::Timeout {
            stage: stage.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

/// Fill metadata the producer omitted from what ingest already knows.
fn fill_meta(candidate: &mut CandidateRecord, entry: &FrontierEntry, paper: &IngestedPaper) {
    let meta = &mut candidate.meta;
    if meta.title.as_deref().is_none_or(|t| t.trim().is_empty()) {
        meta.title = paper.title.clone().or_else(|| entry.title.clone());
    }
    if meta.authors.is_empty() {
        meta.authors = paper.authors.clone();
    }
    if meta.year.is_none() {
        meta.year = paper.year;
    }
}

/// Copy year, citation count, and first author from the raw bibliography
/// onto citations that lack them. Matching is by identity only.
fn enrich_citations(mut record: KnowledgeRecord, bibliography: &[BibEntry]) -> KnowledgeRecord {
    let by_identity: HashMap<PaperIdentity, &BibEntry> = bibliography
        .iter()
        .filter_map(|entry| entry.identity().map(|id| (id, entry)))
        .collect();

    for citation in &mut record.citation_network {
        let Some(bib) = citation.target.identity.as_ref().and_then(|id| by_identity.get(id)) else {
            continue;
        };
        let target = &mut citation.target;
        if target.year.is_none() {
            target.year = bib.year;
        }
        if target.citation_count.is_none() {
            target.citation_count = bib.citation_count;
        }
        if target.first_author.is_none() {
            target.first_author = bib.authors.first().cloned();
        }
        if target.title.is_none() {
            target.title = bib.title.clone();
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, candidate_json, paper};
    use lineage_shared::UsageType;

    fn limits(max_depth: u32, max_citations: usize) -> RunLimits {
        RunLimits {
            max_depth,
            max_citations,
            concurrency: 2,
        }
    }

    fn seed(doi: &str) -> FrontierEntry {
        FrontierEntry::seed(PaperIdentity::parse(doi).expect("doi"))
    }

    #[tokio::test]
    async fn completed_paper_enqueues_ranked_foundational_citations() {
        let h = Harness::new().await;
        h.ingest.add("10.1000/p0", paper("P0", 2020));
        h.extract.respond(
            "10.1000/p0",
            candidate_json(
                "P0",
                2020,
                &[
                    ("10.1000/a", "A", 1990, "Foundational"),
                    ("10.1000/b", "B", 2000, "Foundational"),
                    ("10.1000/c", "C", 2015, "Foundational"),
                    ("10.1000/d", "D", 1970, "Comparison"),
                ],
            ),
        );
        let controller = h.controller();

        let result = controller
            .process(&seed("10.1000/p0"), &limits(1, 2))
            .await
            .expect("process");

        let PipelineResult::Completed { record, citations_enqueued, render_ref, .. } = &result else {
            panic!("expected completed, got {result:?}");
        };
        assert_eq!(record.citation_network.len(), 4);
        let enqueued: Vec<&str> = citations_enqueued.iter().map(|id| id.as_str()).collect();
        assert_eq!(enqueued, vec!["doi:10.1000/a", "doi:10.1000/b"]);
        assert!(render_ref.contains("doi:10.1000/p0"));

        let pending = controller.state().snapshot().await.pending;
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|e| e.depth == 1));
        assert!(pending.iter().all(|e| e.identity.as_str() != "doi:10.1000/d"));

        let stored = controller
            .storage()
            .get_record(&PaperIdentity::parse("10.1000/p0").expect("doi"))
            .await
            .expect("get")
            .expect("stored");
        assert_eq!(stored.meta.title, "P0");
        h.cleanup();
    }

    #[tokio::test]
    async fn second_process_returns_stored_result_without_external_calls() {
        let h = Harness::new().await;
        h.ingest.add("10.1000/p0", paper("P0", 2020));
        h.extract.respond(
            "10.1000/p0",
            candidate_json("P0", 2020, &[("10.1000/a", "A", 1990, "Foundational")]),
        );
        let controller = h.controller();
        let entry = seed("10.1000/p0");

        let first = controller.process(&entry, &limits(2, 5)).await.expect("first");
        let second = controller.process(&entry, &limits(2, 5)).await.expect("second");

        assert_eq!(first, second);
        assert_eq!(h.ingest.calls(), 1);
        assert_eq!(h.extract.calls(), 1);
        assert_eq!(h.render.calls(), 1);
        h.cleanup();
    }

    #[tokio::test]
    async fn dangling_reference_exhausts_retries_with_feedback() {
        let h = Harness::new().await;
        h.ingest.add("10.1000/p0", paper("P0", 2020));
        let mut bad = candidate_json("P0", 2020, &[("10.1000/a", "A", 1990, "Foundational")]);
        bad["logic_chains"][0]["argument_flow"] = serde_json::json!(["KP1", "KP9", "conclusion"]);
        h.extract.respond("10.1000/p0", bad);
        let controller = h.controller();

        let result = controller
            .process(&seed("10.1000/p0"), &limits(3, 5))
            .await
            .expect("process");

        // One attempt plus the default two retries.
        assert_eq!(h.extract.calls(), 3);
        let requests = h.extract.requests();
        assert!(requests[0].prior_errors.is_empty());
        assert!(requests[1].feedback.as_deref().is_some_and(|f| f.contains("KP9")));
        assert!(matches!(
            &requests[2].prior_errors[0],
            ValidationError::DanglingReference { id, chain } if id == "KP9" && chain == "main argument"
        ));

        let PipelineResult::Failed { stage, validation_errors, citations_enqueued, .. } = &result else {
            panic!("expected failure, got {result:?}");
        };
        assert_eq!(*stage, FailedStage::Extract);
        assert_eq!(validation_errors.len(), 1);
        assert!(citations_enqueued.is_empty());

        let visited = controller
            .state()
            .visited(&PaperIdentity::parse("10.1000/p0").expect("doi"))
            .await
            .expect("visited");
        assert_eq!(visited.outcome, PaperOutcome::ExtractionFailed);
        assert!(!controller.state().has_pending().await);
        assert_eq!(h.render.calls(), 0);
        h.cleanup();
    }

    #[tokio::test]
    async fn retry_that_validates_continues_the_pipeline() {
        let h = Harness::new().await;
        h.ingest.add("10.1000/p0", paper("P0", 2020));
        let good = candidate_json("P0", 2020, &[]);
        let mut bad = good.clone();
        bad["key_points"][0]["confidence_score"] = serde_json::json!(1.5);
        h.extract.respond_sequence("10.1000/p0", vec![bad, good]);
        let controller = h.controller();

        let result = controller
            .process(&seed("10.1000/p0"), &limits(3, 5))
            .await
            .expect("process");
        assert_eq!(result.outcome(), Some(PaperOutcome::Completed));
        assert_eq!(h.extract.calls(), 2);
        h.cleanup();
    }

    #[tokio::test]
    async fn render_failure_still_enqueues_citations() {
        let h = Harness::new().await;
        h.ingest.add("10.1000/p0", paper("P0", 2020));
        h.extract.respond(
            "10.1000/p0",
            candidate_json("P0", 2020, &[("10.1000/a", "A", 1990, "Foundational")]),
        );
        h.render.fail_with("disk full");
        let controller = h.controller();

        let result = controller
            .process(&seed("10.1000/p0"), &limits(3, 5))
            .await
            .expect("process");

        assert_eq!(result.outcome(), Some(PaperOutcome::RenderFailed));
        assert_eq!(result.citations_enqueued().len(), 1);
        assert!(controller.state().has_pending().await);
        assert!(
            controller
                .storage()
                .get_record(result.identity())
                .await
                .expect("get")
                .is_some()
        );
        h.cleanup();
    }

    #[tokio::test]
    async fn fetch_failure_is_terminal_and_visited() {
        let h = Harness::new().await;
        let controller = h.controller();

        let result = controller
            .process(&seed("10.1000/missing"), &limits(3, 5))
            .await
            .expect("process");

        assert!(matches!(result, PipelineResult::Failed { stage: FailedStage::Ingest, .. }));
        assert_eq!(result.outcome(), Some(PaperOutcome::FetchFailed));
        assert_eq!(h.extract.calls(), 0);
        assert!(controller.state().visited(result.identity()).await.is_some());
        h.cleanup();
    }

    #[tokio::test]
    async fn paper_at_max_depth_enqueues_nothing() {
        let h = Harness::new().await;
        h.ingest.add("10.1000/p0", paper("P0", 2020));
        h.extract.respond(
            "10.1000/p0",
            candidate_json("P0", 2020, &[("10.1000/a", "A", 1990, "Foundational")]),
        );
        let controller = h.controller();

        let result = controller
            .process(&seed("10.1000/p0"), &limits(0, 5))
            .await
            .expect("process");
        assert_eq!(result.outcome(), Some(PaperOutcome::Completed));
        assert!(result.citations_enqueued().is_empty());
        assert!(!controller.state().has_pending().await);
        h.cleanup();
    }

    #[tokio::test]
    async fn cancellation_during_extraction_releases_paper() {
        let h = Harness::new().await;
        h.ingest.add("10.1000/p0", paper("P0", 2020));
        h.extract.respond("10.1000/p0", candidate_json("P0", 2020, &[]));
        let controller = h.controller();
        h.extract.cancel_on_call(controller.cancel_flag().clone());

        let entry = seed("10.1000/p0");
        controller.state().enqueue(entry.clone(), 3).await.expect("enqueue");
        let batch = controller.state().take_next_batch(1).await;

        let result = controller.process(&batch[0], &limits(3, 5)).await.expect("process");
        assert!(result.is_cancelled());
        assert_eq!(result.outcome(), None);
        assert!(controller.state().visited(&entry.identity).await.is_none());
        assert_eq!(controller.state().snapshot().await.pending, vec![entry]);
        assert_eq!(h.render.calls(), 0);
        h.cleanup();
    }

    #[tokio::test]
    async fn slow_ingest_times_out_as_fetch_failure() {
        let h = Harness::new().await;
        h.ingest.add("10.1000/slow", paper("Slow", 2020));
        h.ingest.delay(Duration::from_millis(200));
        let settings = PipelineSettings {
            ingest_timeout: Duration::from_millis(20),
            ..PipelineSettings::default()
        };
        let controller = h.controller_with(settings);

        let result = controller
            .process(&seed("10.1000/slow"), &limits(3, 5))
            .await
            .expect("process");
        let PipelineResult::Failed { stage, error, .. } = &result else {
            panic!("expected failure, got {result:?}");
        };
        assert_eq!(*stage, FailedStage::Ingest);
        assert!(error.contains("timed out"));
        h.cleanup();
    }

    #[tokio::test]
    async fn slow_render_times_out_as_render_failure() {
        let h = Harness::new().await;
        h.ingest.add("10.1000/p0", paper("P0", 2020));
        h.extract.respond(
            "10.1000/p0",
            candidate_json("P0", 2020, &[("10.1000/a", "A", 1990, "Foundational")]),
        );
        h.render.delay(Duration::from_millis(200));
        let settings = PipelineSettings {
            render_timeout: Duration::from_millis(20),
            ..PipelineSettings::default()
        };
        let controller = h.controller_with(settings);

        let result = controller
            .process(&seed("10.1000/p0"), &limits(3, 5))
            .await
            .expect("process");

        let PipelineResult::Failed { stage, error, citations_enqueued, .. } = &result else {
            panic!("expected failure, got {result:?}");
        };
        assert_eq!(*stage, FailedStage::Render);
        assert!(error.contains("timed out"));
        assert_eq!(citations_enqueued, &vec![PaperIdentity::parse("10.1000/a").expect("doi")]);
        assert_eq!(result.outcome(), Some(PaperOutcome::RenderFailed));
        h.cleanup();
    }

    #[tokio::test]
    async fn cached_candidate_skips_producer() {
        let h = Harness::new().await;
        h.ingest.add("10.1000/p0", paper("P0", 2020));
        h.extract.respond("10.1000/p0", candidate_json("P0", 2020, &[]));
        let controller = h.controller();
        controller.process(&seed("10.1000/p0"), &limits(3, 5)).await.expect("first");

        controller.state().reset().await.expect("reset state");
        controller.storage().reset().await.expect("reset storage");

        let again = controller.process(&seed("10.1000/p0"), &limits(3, 5)).await.expect("again");
        assert_eq!(again.outcome(), Some(PaperOutcome::Completed));
        assert_eq!(h.ingest.calls(), 2);
        assert_eq!(h.extract.calls(), 1);
        h.cleanup();
    }

    #[test]
    fn enrichment_fills_missing_citation_fields_from_bibliography() {
        let record: KnowledgeRecord = lineage_schema::validate_json(candidate_json(
            "P0",
            2020,
            &[("10.1000/a", "A", 1990, "Foundational")],
        ))
        .expect("valid");
        let mut record = record;
        record.citation_network[0].target.year = None;

        let bib = vec![BibEntry {
            title: Some("A".into()),
            authors: vec!["Ancestor, A.".into()],
            year: Some(1991),
            doi: Some("10.1000/A".into()),
            citation_count: Some(1234),
            raw: None,
        }];
        let enriched = enrich_citations(record, &bib);
        let target = &enriched.citation_network[0].target;
        assert_eq!(target.year, Some(1991));
        assert_eq!(target.citation_count, Some(1234));
        assert_eq!(enriched.citation_network[0].usage_type, UsageType::Foundational);
    }

    #[test]
    fn result_serializes_with_status_tag() {
        let result = PipelineResult::Visited {
            identity: PaperIdentity::parse("10.1000/x").expect("doi"),
            depth: 1,
            outcome: PaperOutcome::FetchFailed,
        };
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["status"], "visited");
        assert_eq!(json["outcome"], "fetch_failed");
        let back: PipelineResult = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, result);
    }
}
