//! Local JSON corpus source.
//!
//! Each paper is a file `<corpus_dir>/<file_stem>.json` where `file_stem`
//! is [`PaperIdentity::file_stem`].

use std::path::{Path, PathBuf};

use lineage_shared::{BibEntry, LineageError, PaperIdentity, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::IngestedPaper;

/// On-disk shape of a corpus document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusPaper {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub year: Option<i32>,
    pub text: String,
    #[serde(default)]
    pub bibliography: Vec<BibEntry>,
}

/// A directory of pre-extracted papers.
#[derive(Debug, Clone)]
pub struct LocalCorpus {
    dir: PathBuf,
}

impl LocalCorpus {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `identity`.
    pub fn path_for(&self, identity: &PaperIdentity) -> PathBuf {
        self.dir.join(format!("{}.json", identity.file_stem()))
    }

    /// Read the document for `identity`.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn fetch(&self, identity: &PaperIdentity) -> Result<IngestedPaper> {
        let path = self.path_for(identity);
        debug!(path = %path.display(), "reading corpus document");

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LineageError::fetch(
                    identity,
                    format!("not in local corpus ({})", path.display()),
                ));
            }
            Err(e) => return Err(LineageError::io(&path, e)),
        };

        let paper: CorpusPaper = serde_json::from_str(&content).map_err(|e| {
            LineageError::fetch(identity, format!("invalid corpus document {}: {e}", path.display()))
        })?;

        if paper.text.trim().is_empty() {
            return Err(LineageError::fetch(identity, "corpus document has no text"));
        }

        Ok(IngestedPaper {
            title: paper.title,
            authors: paper.authors,
            year: paper.year,
            raw_text: paper.text,
            bibliography: paper.bibliography,
        })
    }

    /// Write a document for `identity`, creating the corpus directory if needed.
    pub async fn store(&self, identity: &PaperIdentity, paper: &CorpusPaper) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| LineageError::io(&self.dir, e))?;
        let path = self.path_for(identity);
        let json = serde_json::to_string_pretty(paper)
            .map_err(|e| LineageError::validation(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| LineageError::io(&path, e))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_corpus() -> LocalCorpus {
        LocalCorpus::new(std::env::temp_dir().join(format!(
            "lineage-corpus-test-{}",
            uuid::Uuid::now_v7()
        )))
    }

    #[tokio::test]
    async fn store_then_fetch() {
        let corpus = temp_corpus();
        let identity = PaperIdentity::parse("10.1000/local.1").expect("doi");
        let doc = CorpusPaper {
            title: Some("Local Paper".into()),
            authors: vec!["Doe, J.".into()],
            year: Some(1999),
            text: "Body text.".into(),
            bibliography: vec![BibEntry {
                title: Some("Cited".into()),
                doi: Some("10.1000/cited".into()),
                ..Default::default()
            }],
        };

        let path = corpus.store(&identity, &doc).await.expect("store");
        assert!(path.ends_with("10.1000_local.1.json"));

        let paper = corpus.fetch(&identity).await.expect("fetch");
        assert_eq!(paper.title.as_deref(), Some("Local Paper"));
        assert_eq!(paper.raw_text, "Body text.");
        assert_eq!(paper.bibliography.len(), 1);

        let _ = std::fs::remove_dir_all(corpus.dir());
    }

    #[tokio::test]
    async fn missing_document_is_fetch_error() {
        let corpus = temp_corpus();
        let identity = PaperIdentity::parse("10.1000/absent").expect("doi");
        let err = corpus.fetch(&identity).await.expect_err("missing");
        assert!(matches!(err, LineageError::Fetch { .. }));
    }

    #[tokio::test]
    async fn empty_text_is_fetch_error() {
        let corpus = temp_corpus();
        let identity = PaperIdentity::parse("10.1000/empty").expect("doi");
        corpus
            .store(&identity, &CorpusPaper::default())
            .await
            .expect("store");
        let err = corpus.fetch(&identity).await.expect_err("empty");
        assert!(err.to_string().contains("no text"));

        let _ = std::fs::remove_dir_all(corpus.dir());
    }
}
