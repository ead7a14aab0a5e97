//! Semantic Scholar Graph API client.

use std::time::Duration;

use lineage_shared::{BibEntry, LineageError, PaperIdentity, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::{IngestedPaper, USER_AGENT};

/// Fields requested for the paper itself and for its references.
const PAPER_FIELDS: &str = "title,authors,year,abstract,externalIds,\
references.title,references.year,references.authors,references.externalIds,references.citationCount";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct S2Author {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct S2ExternalIds {
    #[serde(rename = "DOI", default)]
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Reference {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    authors: Vec<S2Author>,
    #[serde(default)]
    external_ids: Option<S2ExternalIds>,
    #[serde(default)]
    citation_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct S2Paper {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    authors: Vec<S2Author>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(default)]
    references: Vec<S2Reference>,
}

#[derive(Debug, Deserialize)]
struct S2MatchResponse {
    #[serde(default)]
    data: Vec<S2Paper>,
}

fn author_names(authors: Vec<S2Author>) -> Vec<String> {
    authors.into_iter().filter_map(|a| a.name).collect()
}

impl From<S2Reference> for BibEntry {
    fn from(reference: S2Reference) -> Self {
        Self {
            title: reference.title,
            authors: author_names(reference.authors),
            year: reference.year,
            doi: reference.external_ids.and_then(|ids| ids.doi),
            citation_count: reference.citation_count,
            raw: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Fetches paper metadata, abstract, and references from Semantic Scholar.
#[derive(Debug, Clone)]
pub struct SemanticScholarClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    /// Build a client for `base_url` (e.g. `https://api.semanticscholar.org`).
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| LineageError::config(format!("invalid Semantic Scholar URL '{base_url}': {e}")))?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LineageError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/graph/v1/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    /// Fetch a paper by DOI, or by title match for non-DOI identities.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn fetch(&self, identity: &PaperIdentity, title_hint: Option<&str>) -> Result<IngestedPaper> {
        let paper = match (identity.doi(), title_hint) {
            (Some(doi), _) => self.fetch_by_doi(identity, doi).await?,
            (None, Some(title)) => self.match_title(identity, title).await?,
            (None, None) => {
                return Err(LineageError::fetch(
                    identity,
                    "identity has no DOI and no title to search for",
                ));
            }
        };
        into_ingested(identity, paper)
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let mut request = self.client.get(url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        request
            .send()
            .await
            .map_err(|e| LineageError::Network(format!("{url}: {e}")))
    }

    async fn fetch_by_doi(&self, identity: &PaperIdentity, doi: &str) -> Result<S2Paper> {
        let url = self.endpoint(&format!("paper/DOI:{doi}"));
        debug!(%url, "fetching paper");
        let response = self.get(&url, &[("fields", PAPER_FIELDS)]).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(LineageError::fetch(identity, "not found on Semantic Scholar")),
            status if !status.is_success() => {
                Err(LineageError::fetch(identity, format!("HTTP {status}")))
            }
            _ => response
                .json::<S2Paper>()
                .await
                .map_err(|e| LineageError::fetch(identity, format!("invalid response: {e}"))),
        }
    }

    async fn match_title(&self, identity: &PaperIdentity, title: &str) -> Result<S2Paper> {
        let url = self.endpoint("paper/search/match");
        debug!(%url, title, "matching paper by title");
        let response = self
            .get(&url, &[("query", title), ("fields", PAPER_FIELDS)])
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(LineageError::fetch(identity, "no title match on Semantic Scholar")),
            status if !status.is_success() => {
                Err(LineageError::fetch(identity, format!("HTTP {status}")))
            }
            _ => {
                let matched = response
                    .json::<S2MatchResponse>()
                    .await
                    .map_err(|e| LineageError::fetch(identity, format!("invalid response: {e}")))?;
                matched
                    .data
                    .into_iter()
                    .next()
                    .ok_or_else(|| LineageError::fetch(identity, "no title match on Semantic Scholar"))
            }
        }
    }
}

fn into_ingested(identity: &PaperIdentity, paper: S2Paper) -> Result<IngestedPaper> {
    let abstract_text = paper
        .abstract_text
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| LineageError::fetch(identity, "no abstract or full text available"))?;

    let raw_text = match &paper.title {
        Some(title) => format!("{title}\n\n{abstract_text}"),
        None => abstract_text,
    };

    Ok(IngestedPaper {
        title: paper.title,
        authors: author_names(paper.authors),
        year: paper.year,
        raw_text,
        bibliography: paper.references.into_iter().map(BibEntry::from).collect(),
    })
}
