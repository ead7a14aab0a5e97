//! Run orchestration: breadth-first draining of the frontier.
//!
//! Each batch holds entries of a single depth (the shallowest pending one)
//! and is processed by up to `concurrency` workers. The next batch is only
//! taken once every worker of the current one has returned, so depth `d+1`
//! is never scheduled while depth `d` still has pending entries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use lineage_shared::{LineageError, PaperIdentity, PaperOutcome, Result, RunLimits};
use lineage_state::{FrontierEntry, StateSnapshot};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::pipeline::{PipelineController, PipelineResult};
use crate::progress::{ProgressReporter, SilentProgress};

/// Outcome counts of one `analyze`/`resume` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Papers that reached a terminal outcome in this run.
    pub papers_processed: usize,
    pub completed: usize,
    pub render_failed: usize,
    pub extraction_failed: usize,
    pub fetch_failed: usize,
    /// Papers returned to the frontier because the run was cancelled.
    pub cancelled: usize,
    /// Set when `analyze` was given a seed that is already visited.
    pub seed_already_visited: bool,
    /// Visited papers per depth across the whole state, after the run.
    pub per_depth_counts: BTreeMap<u32, usize>,
    /// Entries still waiting in the frontier.
    pub pending: usize,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn papers_failed(&self) -> usize {
        self.render_failed + self.extraction_failed + self.fetch_failed
    }

    fn record(&mut self, result: &PipelineResult) {
        match result.outcome() {
            Some(outcome) => {
                self.papers_processed += 1;
                match outcome {
                    PaperOutcome::Completed => self.completed += 1,
                    PaperOutcome::RenderFailed => self.render_failed += 1,
                    PaperOutcome::ExtractionFailed => self.extraction_failed += 1,
                    PaperOutcome::FetchFailed => self.fetch_failed += 1,
                }
            }
            None => self.cancelled += 1,
        }
    }
}

/// Run entry point: `analyze`, `resume`, `status`, `reset`.
pub struct RunOrchestrator {
    controller: Arc<PipelineController>,
    progress: Arc<dyn ProgressReporter>,
}

impl RunOrchestrator {
    pub fn new(controller: Arc<PipelineController>) -> Self {
        Self {
            controller,
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn controller(&self) -> &Arc<PipelineController> {
        &self.controller
    }

    /// Seed the frontier with `seed` at depth 0 and drain it.
    #[instrument(skip_all, fields(seed = %seed, max_depth = limits.max_depth))]
    pub async fn analyze(&self, seed: PaperIdentity, limits: RunLimits) -> Result<RunSummary> {
        let accepted = self
            .controller
            .state()
            .enqueue(FrontierEntry::seed(seed.clone()), limits.max_depth)
            .await?;
        if !accepted {
            info!(%seed, "seed already visited or pending");
        }
        let seed_already_visited = self.controller.state().visited(&seed).await.is_some();

        let mut summary = self.drain(limits).await?;
        summary.seed_already_visited = seed_already_visited;
        Ok(summary)
    }

    /// Drain the persisted frontier without a new seed.
    #[instrument(skip_all, fields(max_depth = limits.max_depth))]
    pub async fn resume(&self, limits: RunLimits) -> Result<RunSummary> {
        self.drain(limits).await
    }

    /// Current state for reporting.
    pub async fn status(&self) -> StateSnapshot {
        self.controller.state().snapshot().await
    }

    /// Clear recursion state, stored records, and stored results.
    pub async fn reset(&self) -> Result<()> {
        self.controller.state().reset().await?;
        self.controller.storage().reset().await
    }

    async fn drain(&self, limits: RunLimits) -> Result<RunSummary> {
        let started = Instant::now();
        let state = self.controller.state();
        let cancel = self.controller.cancel_flag();
        let mut summary = RunSummary::default();
        let mut current_depth = None;

        let drained = loop {
            if cancel.is_cancelled() {
                info!("run cancelled, stopping before the next batch");
                break Ok(());
            }

            let batch = state.take_next_batch(limits.concurrency.max(1)).await;
            let Some(depth) = batch.first().map(|e| e.depth) else {
                break Ok(());
            };

            if depth > limits.max_depth {
                // Left over from a run with a larger bound.
                for entry in batch.iter().rev() {
                    state.release(&entry.identity).await?;
                }
                info!(depth, "remaining entries are beyond max_depth, stopping");
                break Ok(());
            }

            if current_depth != Some(depth) {
                self.progress.phase(&format!("Depth {depth}"));
                current_depth = Some(depth);
            }

            if let Err(e) = self.run_batch(batch, limits, &mut summary).await {
                break Err(e);
            }
        };

        self.controller.collaborators().extract.shutdown().await;
        drained?;

        summary.per_depth_counts = state.stats().await;
        summary.pending = state.snapshot().await.pending.len();
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            processed = summary.papers_processed,
            completed = summary.completed,
            failed = summary.papers_failed(),
            cancelled = summary.cancelled,
            pending = summary.pending,
            elapsed_ms = summary.elapsed_ms,
            "run finished"
        );
        self.progress.done(&summary);
        Ok(summary)
    }

    /// Process one single-depth batch concurrently. Every worker is awaited
    /// before a fatal error is returned.
    async fn run_batch(
        &self,
        batch: Vec<FrontierEntry>,
        limits: RunLimits,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let mut handles = Vec::with_capacity(batch.len());
        for entry in batch {
            self.progress.paper_started(&entry);
            let controller = Arc::clone(&self.controller);
            let identity = entry.identity.clone();
            handles.push((
                identity,
                tokio::spawn(async move { controller.process(&entry, &limits).await }),
            ));
        }

        let mut fatal = None;
        for (identity, handle) in handles {
            match handle.await {
                Ok(Ok(result)) => {
                    self.progress.paper_finished(&result);
                    summary.record(&result);
                }
                Ok(Err(e)) => {
                    error!(%identity, error = %e, "fatal error, aborting run");
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    warn!(%identity, error = %e, "worker task failed");
                    fatal.get_or_insert(LineageError::Worker(format!("{identity}: {e}")));
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
