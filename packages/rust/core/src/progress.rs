//! Progress reporting hooks for runs.

use lineage_state::FrontierEntry;

use crate::orchestrator::RunSummary;
use crate::pipeline::PipelineResult;

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase (e.g. a new depth).
    fn phase(&self, name: &str);
    /// Called when a worker picks up a paper.
    fn paper_started(&self, entry: &FrontierEntry);
    /// Called when a paper reaches a terminal result.
    fn paper_finished(&self, result: &PipelineResult);
    /// Called once the run stops.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn paper_started(&self, _entry: &FrontierEntry) {}
    fn paper_finished(&self, _result: &PipelineResult) {}
    fn done(&self, _summary: &RunSummary) {}
}
