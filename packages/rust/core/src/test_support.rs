//! In-memory collaborators and a temp-dir harness for pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lineage_citations::CitationRanker;
use lineage_ingest::IngestedPaper;
use lineage_shared::{KnowledgeRecord, LineageError, PaperIdentity, Result};
use lineage_state::{RecursionStateManager, STATE_FILE_NAME};
use lineage_storage::{DATABASE_FILE_NAME, Storage};
use serde_json::{Value, json};

use crate::cancel::CancelFlag;
use crate::collaborators::{Extract, ExtractRequest, Ingest, Render};
use crate::orchestrator::RunOrchestrator;
use crate::pipeline::{Collaborators, PipelineController, PipelineSettings};

fn id(doi: &str) -> PaperIdentity {
    PaperIdentity::parse(doi).expect("valid doi")
}

/// Ingested paper with a title-derived body.
pub fn paper(title: &str, year: i32) -> IngestedPaper {
    IngestedPaper {
        title: Some(title.to_string()),
        authors: vec!["Author, A.".into()],
        year: Some(year),
        raw_text: format!("{title}\n\nFull text of {title}."),
        bibliography: Vec::new(),
    }
}

/// A candidate that validates, citing `(doi, title, year, usage_type)` targets.
pub fn candidate_json(title: &str, year: i32, citations: &[(&str, &str, i32, &str)]) -> Value {
    let citation_network: Vec<Value> = citations
        .iter()
        .map(|(doi, cited_title, cited_year, usage)| {
            json!({
                "doi": doi,
                "title": cited_title,
                "year": cited_year,
                "authors": ["Cited, C."],
                "usage_type": usage,
                "notes": ""
            })
        })
        .collect();

    json!({
        "meta": { "title": title, "authors": ["Author, A."], "year": year },
        "core_analysis": {
            "central_hypothesis": format!("{title} holds"),
            "methodology_summary": "Controlled experiments",
            "significance": "Widely reused"
        },
        "key_points": [
            { "id": "KP1", "content": "First claim", "evidence_anchor": "Table 1", "confidence_score": 0.9 },
            { "id": "KP2", "content": "Second claim", "evidence_anchor": "Figure 2", "confidence_score": 0.6 }
        ],
        "logic_chains": [
            {
                "name": "main argument",
                "argument_flow": ["KP1", "KP2", "conclusion"],
                "conclusion_derived": "The hypothesis holds"
            }
        ],
        "citation_network": citation_network
    })
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeIngest {
    papers: Mutex<HashMap<PaperIdentity, IngestedPaper>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl FakeIngest {
    pub fn add(&self, doi: &str, paper: IngestedPaper) {
        self.papers.lock().expect("lock").insert(id(doi), paper);
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().expect("lock") = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Ingest for FakeIngest {
    async fn fetch(&self, identity: &PaperIdentity, _title_hint: Option<&str>) -> Result<IngestedPaper> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.papers
            .lock()
            .expect("lock")
            .get(identity)
            .cloned()
            .ok_or_else(|| LineageError::fetch(identity, "not in fake corpus"))
    }
}

/// Replays scripted responses per identity; the last response repeats.
#[derive(Default)]
pub struct FakeExtract {
    responses: Mutex<HashMap<PaperIdentity, VecDeque<Value>>>,
    requests: Mutex<Vec<ExtractRequest>>,
    cancel_on_call: Mutex<Option<CancelFlag>>,
    calls: AtomicUsize,
}

impl FakeExtract {
    pub fn respond(&self, doi: &str, candidate: Value) {
        self.respond_sequence(doi, vec![candidate]);
    }

    pub fn respond_sequence(&self, doi: &str, candidates: Vec<Value>) {
        self.responses
            .lock()
            .expect("lock")
            .insert(id(doi), candidates.into());
    }

    /// Trip `flag` whenever the producer is called.
    pub fn cancel_on_call(&self, flag: CancelFlag) {
        *self.cancel_on_call.lock().expect("lock") = Some(flag);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ExtractRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait::async_trait]
impl Extract for FakeExtract {
    async fn extract(&self, request: &ExtractRequest) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("lock").push(request.clone());
        if let Some(flag) = self.cancel_on_call.lock().expect("lock").as_ref() {
            flag.cancel();
        }

        let mut responses = self.responses.lock().expect("lock");
        let queue = responses
            .get_mut(&request.identity)
            .ok_or_else(|| LineageError::Extraction(format!("no scripted candidate for {}", request.identity)))?;
        let candidate = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        candidate.ok_or_else(|| LineageError::Extraction("empty script".into()))
    }

    fn model_id(&self) -> &str {
        "fake-model"
    }
}

#[derive(Default)]
pub struct FakeRender {
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl FakeRender {
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().expect("lock") = Some(delay);
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().expect("lock") = Some(message.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Render for FakeRender {
    async fn render(&self, record: &KnowledgeRecord) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure.lock().expect("lock").clone() {
            Some(message) => Err(LineageError::Render(message)),
            None => Ok(format!("rendered:{}", record.identity())),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// State file, database, and fakes under a unique temp directory.
pub struct Harness {
    pub dir: PathBuf,
    pub ingest: Arc<FakeIngest>,
    pub extract: Arc<FakeExtract>,
    pub render: Arc<FakeRender>,
    pub state: Arc<RecursionStateManager>,
    pub storage: Arc<Storage>,
    pub cancel: CancelFlag,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("lineage-core-test-{}", uuid::Uuid::now_v7()));
        let state = RecursionStateManager::open(&dir.join(STATE_FILE_NAME))
            .await
            .expect("open state");
        let storage = Storage::open(&dir.join(DATABASE_FILE_NAME))
            .await
            .expect("open storage");
        Self {
            dir,
            ingest: Arc::new(FakeIngest::default()),
            extract: Arc::new(FakeExtract::default()),
            render: Arc::new(FakeRender::default()),
            state: Arc::new(state),
            storage: Arc::new(storage),
            cancel: CancelFlag::new(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            ingest: self.ingest.clone(),
            extract: self.extract.clone(),
            render: self.render.clone(),
        }
    }

    pub fn controller_with(&self, settings: PipelineSettings) -> PipelineController {
        PipelineController::new(
            Arc::clone(&self.state),
            Arc::clone(&self.storage),
            self.collaborators(),
            CitationRanker::default(),
            settings,
            self.cancel.clone(),
        )
    }

    pub fn controller(&self) -> PipelineController {
        self.controller_with(PipelineSettings::default())
    }

    pub fn orchestrator(&self) -> RunOrchestrator {
        RunOrchestrator::new(Arc::new(self.controller()))
    }

    pub fn cleanup(&self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
