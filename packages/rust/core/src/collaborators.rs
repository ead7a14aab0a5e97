//! External collaborators of the pipeline controller.
//!
//! The controller only talks to papers, producers, and renderers through
//! these traits. Concrete sources from `lineage-ingest` and the note writer
//! from `lineage-markdown` implement them here.

use std::path::PathBuf;
use std::sync::Arc;

use lineage_ingest::{IngestedPaper, LocalCorpus, SemanticScholarClient};
use lineage_markdown::NoteWriter;
use lineage_schema::ValidationError;
use lineage_shared::{
    AppConfig, BibEntry, IngestSource, KnowledgeRecord, PaperIdentity, Result,
    semantic_scholar_api_key,
};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Obtains raw text and raw bibliography for a paper.
#[async_trait::async_trait]
pub trait Ingest: Send + Sync {
    /// `title_hint` is the title known at discovery time, for sources that
    /// can only look up non-DOI identities by title.
    async fn fetch(&self, identity: &PaperIdentity, title_hint: Option<&str>) -> Result<IngestedPaper>;
}

/// Input to one extraction attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractRequest {
    pub identity: PaperIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub raw_text: String,
    pub bibliography: Vec<BibEntry>,
    /// Violations of the previous attempt, empty on the first attempt.
    pub prior_errors: Vec<ValidationError>,
    /// Human-readable form of `prior_errors`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// Untrusted producer of candidate knowledge records.
#[async_trait::async_trait]
pub trait Extract: Send + Sync {
    /// Produce candidate record JSON. The output is validated by the caller.
    async fn extract(&self, request: &ExtractRequest) -> Result<serde_json::Value>;

    /// Model identifier, part of the extraction cache key.
    fn model_id(&self) -> &str;

    /// Release external resources at the end of a run.
    async fn shutdown(&self) {}
}

/// Turns a validated record into a persisted artifact.
#[async_trait::async_trait]
pub trait Render: Send + Sync {
    /// Returns a reference to the written artifact (e.g. a file path).
    async fn render(&self, record: &KnowledgeRecord) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Implementations
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl Ingest for SemanticScholarClient {
    async fn fetch(&self, identity: &PaperIdentity, title_hint: Option<&str>) -> Result<IngestedPaper> {
        SemanticScholarClient::fetch(self, identity, title_hint).await
    }
}

#[async_trait::async_trait]
impl Ingest for LocalCorpus {
    async fn fetch(&self, identity: &PaperIdentity, _title_hint: Option<&str>) -> Result<IngestedPaper> {
        LocalCorpus::fetch(self, identity).await
    }
}

#[async_trait::async_trait]
impl Render for NoteWriter {
    async fn render(&self, record: &KnowledgeRecord) -> Result<String> {
        let path = self.write(record).await?;
        Ok(path.display().to_string())
    }
}

/// Build the ingest source selected in config.
pub fn ingest_from_config(config: &AppConfig) -> Result<Arc<dyn Ingest>> {
    match config.ingest.source {
        IngestSource::SemanticScholar => Ok(Arc::new(SemanticScholarClient::new(
            &config.ingest.semantic_scholar_url,
            semantic_scholar_api_key(config),
            config.timeouts.ingest_secs,
        )?)),
        IngestSource::Local => Ok(Arc::new(LocalCorpus::new(PathBuf::from(
            &config.ingest.corpus_dir,
        )))),
    }
}

/// Build the note writer for the configured output directory.
pub fn render_from_config(config: &AppConfig) -> Arc<dyn Render> {
    Arc::new(NoteWriter::new(PathBuf::from(&config.defaults.output_dir)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_source_is_selected_from_config() {
        let dir = std::env::temp_dir().join(format!("lineage-collab-test-{}", uuid::Uuid::now_v7()));
        let mut config = AppConfig::default();
        config.ingest.source = IngestSource::Local;
        config.ingest.corpus_dir = dir.display().to_string();

        let identity = PaperIdentity::parse("10.1000/nowhere").expect("doi");
        let ingest = ingest_from_config(&config).expect("ingest");
        let err = ingest.fetch(&identity, None).await.expect_err("empty corpus");
        assert!(err.to_string().contains("not in local corpus"));
    }

    #[tokio::test]
    async fn note_writer_renders_to_the_output_dir() {
        let dir = std::env::temp_dir().join(format!("lineage-collab-test-{}", uuid::Uuid::now_v7()));
        let mut config = AppConfig::default();
        config.defaults.output_dir = dir.display().to_string();

        let candidate = serde_json::json!({
            "meta": { "title": "Rendered", "year": 2020 },
            "core_analysis": { "central_hypothesis": "It renders" },
            "key_points": [
                { "id": "KP1", "content": "Claim", "evidence_anchor": "Sec. 2", "confidence_score": 0.5 }
            ]
        });
        let identity = PaperIdentity::parse("10.1000/rendered").expect("doi");
        let candidate = lineage_schema::CandidateRecord::from_value(candidate).expect("candidate");
        let record = lineage_schema::validate_as(&candidate, &identity).expect("valid");

        let render_ref = render_from_config(&config).render(&record).await.expect("render");
        assert!(render_ref.ends_with("10.1000_rendered.md"));
        assert!(std::path::Path::new(&render_ref).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn semantic_scholar_source_requires_valid_url() {
        let mut config = AppConfig::default();
        config.ingest.semantic_scholar_url = "::".into();
        assert!(ingest_from_config(&config).is_err());
    }
}
