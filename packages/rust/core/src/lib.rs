//! Pipeline control and run orchestration for lineage.
//!
//! This crate ties the validator, ranker, recursion state, storage, and the
//! ingest/extract/render collaborators into the per-paper pipeline and the
//! breadth-first run (`analyze`, `resume`, `status`, `reset`).

pub mod cancel;
pub mod collaborators;
pub mod extraction;
pub mod graph;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod runtime;

#[cfg(test)]
mod test_support;

pub use cancel::CancelFlag;
pub use collaborators::{Extract, ExtractRequest, Ingest, Render};
pub use graph::{CitationGraph, citation_graph};
pub use orchestrator::{RunOrchestrator, RunSummary};
pub use pipeline::{Collaborators, FailedStage, PipelineController, PipelineResult, PipelineSettings};
pub use progress::{ProgressReporter, SilentProgress};
