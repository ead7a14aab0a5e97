//! Wiring of the run components from [`AppConfig`].

use std::path::PathBuf;
use std::sync::Arc;

use lineage_citations::{CitationRanker, RankingPolicy};
use lineage_shared::{AppConfig, Result};
use lineage_state::{RecursionStateManager, STATE_FILE_NAME, StateSnapshot};
use lineage_storage::{DATABASE_FILE_NAME, Storage};
use tracing::info;

use crate::cancel::CancelFlag;
use crate::collaborators::{ingest_from_config, render_from_config};
use crate::extraction::{BridgeConfig, BridgeExtractor};
use crate::orchestrator::RunOrchestrator;
use crate::pipeline::{Collaborators, PipelineController, PipelineSettings};

/// `<state_dir>/recursion_state.json`
pub fn state_path(config: &AppConfig) -> PathBuf {
    PathBuf::from(&config.defaults.state_dir).join(STATE_FILE_NAME)
}

/// `<state_dir>/lineage.db`
pub fn database_path(config: &AppConfig) -> PathBuf {
    PathBuf::from(&config.defaults.state_dir).join(DATABASE_FILE_NAME)
}

/// Open state and storage read-write and assemble an orchestrator with the
/// configured collaborators.
pub async fn build_orchestrator(config: &AppConfig, cancel: CancelFlag) -> Result<RunOrchestrator> {
    let state = RecursionStateManager::open(&state_path(config)).await?;
    let storage = Storage::open(&database_path(config)).await?;

    let collaborators = Collaborators {
        ingest: ingest_from_config(config)?,
        extract: Arc::new(BridgeExtractor::new(BridgeConfig::from(&config.extraction))),
        render: render_from_config(config),
    };
    let ranker = CitationRanker::new(RankingPolicy::from(&config.ranking));
    info!(
        state_dir = %config.defaults.state_dir,
        source = ?config.ingest.source,
        policy = ?config.ranking.policy,
        "run components ready"
    );

    let controller = PipelineController::new(
        Arc::new(state),
        Arc::new(storage),
        collaborators,
        ranker,
        PipelineSettings::from(config),
        cancel,
    );
    Ok(RunOrchestrator::new(Arc::new(controller)))
}

/// Read-only view for reporting commands. The database is `None` when no
/// run has created it yet.
pub async fn open_report(config: &AppConfig) -> Result<(StateSnapshot, Option<Storage>)> {
    let state = RecursionStateManager::open(&state_path(config)).await?;
    let db = database_path(config);
    let storage = if db.exists() {
        Some(Storage::open_readonly(&db).await?)
    } else {
        None
    };
    Ok((state.snapshot().await, storage))
}
