//! Shared types, error model, and configuration for lineage.
//!
//! This crate is the foundation depended on by all other lineage crates.
//! It provides:
//! - [`LineageError`]: the unified error type
//! - Domain types ([`PaperIdentity`], [`KnowledgeRecord`], [`Citation`], [`PaperOutcome`])
//! - Configuration ([`AppConfig`], [`RunLimits`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, ExtractionConfig, IngestConfig, IngestSource, RankingConfig,
    RankingPolicyKind, RunLimits, TimeoutsConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, semantic_scholar_api_key,
};
pub use error::{LineageError, Result};
pub use types::{
    BibEntry, CURRENT_SCHEMA_VERSION, Citation, CitationTarget, CoreAnalysis, FlowStep, KeyPoint,
    KnowledgeRecord, LogicChain, PaperIdentity, PaperMeta, PaperOutcome, UsageType,
    is_canonical_doi, normalize_doi,
};
