//! Frontier, visited set, and their serialized mutation interface.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lineage_shared::{CURRENT_SCHEMA_VERSION, PaperIdentity, PaperOutcome, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::persist::{self, PersistedState};

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A permanently visited paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitedEntry {
    /// Depth at first visit.
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub outcome: PaperOutcome,
}

/// A paper waiting to be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub identity: PaperIdentity,
    pub depth: u32,
    /// `None` for the run seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_from: Option<PaperIdentity>,
    /// Title known at discovery time, used as a lookup hint by ingest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl FrontierEntry {
    pub fn seed(identity: PaperIdentity) -> Self {
        Self {
            identity,
            depth: 0,
            discovered_from: None,
            title: None,
        }
    }
}

/// Read-only copy of the state for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    pub visited: Vec<(PaperIdentity, VisitedEntry)>,
    pub pending: Vec<FrontierEntry>,
    pub in_flight: usize,
}

impl StateSnapshot {
    /// Visited papers per depth.
    pub fn per_depth_counts(&self) -> BTreeMap<u32, usize> {
        let mut counts = BTreeMap::new();
        for (_, entry) in &self.visited {
            *counts.entry(entry.depth).or_insert(0) += 1;
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    visited: BTreeMap<PaperIdentity, VisitedEntry>,
    frontier: VecDeque<FrontierEntry>,
    in_flight: BTreeMap<PaperIdentity, FrontierEntry>,
}

impl Inner {
    fn should_enqueue(&self, identity: &PaperIdentity, depth: u32, max_depth: u32) -> bool {
        if depth > max_depth
            || self.visited.contains_key(identity)
            || self.in_flight.contains_key(identity)
        {
            return false;
        }
        !self
            .frontier
            .iter()
            .any(|e| &e.identity == identity && e.depth <= depth)
    }

    /// Insert or lower an entry. Returns whether the frontier changed.
    fn enqueue(&mut self, entry: FrontierEntry, max_depth: u32) -> bool {
        if !self.should_enqueue(&entry.identity, entry.depth, max_depth) {
            return false;
        }
        if let Some(existing) = self
            .frontier
            .iter_mut()
            .find(|e| e.identity == entry.identity)
        {
            existing.depth = entry.depth;
            existing.discovered_from = entry.discovered_from;
            if existing.title.is_none() {
                existing.title = entry.title;
            }
        } else {
            self.frontier.push_back(entry);
        }
        true
    }

    fn mark_visited(
        &mut self,
        identity: &PaperIdentity,
        depth: u32,
        title: Option<String>,
        outcome: PaperOutcome,
    ) {
        self.in_flight.remove(identity);
        self.frontier.retain(|e| &e.identity != identity);
        self.visited
            .entry(identity.clone())
            .or_insert_with(|| VisitedEntry {
                depth,
                title,
                completed_at: Utc::now(),
                outcome,
            });
    }

    fn to_persisted(&self) -> PersistedState {
        let mut in_flight: Vec<FrontierEntry> = self.in_flight.values().cloned().collect();
        in_flight.sort_by_key(|e| e.depth);
        in_flight.extend(self.frontier.iter().cloned());
        PersistedState {
            schema_version: CURRENT_SCHEMA_VERSION,
            updated_at: Utc::now(),
            visited: self.visited.clone(),
            pending: in_flight,
        }
    }

    fn from_persisted(state: PersistedState) -> Self {
        let mut inner = Self {
            visited: state.visited,
            ..Self::default()
        };
        for entry in state.pending {
            if inner.visited.contains_key(&entry.identity)
                || inner.frontier.iter().any(|e| e.identity == entry.identity)
            {
                continue;
            }
            inner.frontier.push_back(entry);
        }
        inner
    }
}

/// Owner of the recursion state.
///
/// All methods take `&self`; share it between workers behind an `Arc`.
#[derive(Debug)]
pub struct RecursionStateManager {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl RecursionStateManager {
    /// Open the state file at `path`, starting empty if it does not exist.
    ///
    /// Entries that were in flight when the previous process stopped are
    /// returned to the frontier.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        let inner = match persist::load(path).await? {
            Some(state) => {
                let inner = Inner::from_persisted(state);
                info!(
                    visited = inner.visited.len(),
                    pending = inner.frontier.len(),
                    "loaded recursion state"
                );
                inner
            }
            None => {
                debug!("no recursion state on disk, starting empty");
                Inner::default()
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(inner),
        })
    }

    /// Path of the backing state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, inner: &Inner) -> Result<()> {
        persist::save(&self.path, &inner.to_persisted()).await
    }

    /// Whether `identity` would be accepted into the frontier at `depth`.
    pub async fn should_enqueue(&self, identity: &PaperIdentity, depth: u32, max_depth: u32) -> bool {
        self.inner.lock().await.should_enqueue(identity, depth, max_depth)
    }

    /// Add an entry to the frontier if [`Self::should_enqueue`] holds, then persist.
    /// Returns whether the entry was accepted.
    pub async fn enqueue(&self, entry: FrontierEntry, max_depth: u32) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let identity = entry.identity.clone();
        let depth = entry.depth;
        if !inner.enqueue(entry, max_depth) {
            debug!(%identity, depth, "enqueue rejected");
            return Ok(false);
        }
        self.persist(&inner).await?;
        debug!(%identity, depth, "enqueued");
        Ok(true)
    }

    /// Remove up to `n` entries from the frontier and track them as in flight.
    ///
    /// Only entries at the shallowest pending depth are returned, in discovery
    /// order, so a batch never mixes depths.
    pub async fn take_next_batch(&self, n: usize) -> Vec<FrontierEntry> {
        let mut inner = self.inner.lock().await;
        let Some(depth) = inner.frontier.iter().map(|e| e.depth).min() else {
            return Vec::new();
        };

        let mut batch = Vec::with_capacity(n);
        let mut rest = VecDeque::with_capacity(inner.frontier.len());
        while let Some(entry) = inner.frontier.pop_front() {
            if batch.len() < n && entry.depth == depth {
                batch.push(entry);
            } else {
                rest.push_back(entry);
            }
        }
        inner.frontier = rest;
        for entry in &batch {
            inner.in_flight.insert(entry.identity.clone(), entry.clone());
        }
        batch
    }

    /// Record a terminal outcome. The first visit of an identity is permanent.
    pub async fn mark_visited(
        &self,
        identity: &PaperIdentity,
        depth: u32,
        title: Option<String>,
        outcome: PaperOutcome,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.mark_visited(identity, depth, title, outcome);
        self.persist(&inner).await?;
        debug!(%identity, depth, %outcome, "marked visited");
        Ok(())
    }

    /// Mark a paper visited and enqueue its selected citations in one
    /// transition with a single write. Returns the identities accepted into
    /// the frontier.
    pub async fn complete(
        &self,
        identity: &PaperIdentity,
        depth: u32,
        title: Option<String>,
        outcome: PaperOutcome,
        citations: Vec<FrontierEntry>,
        max_depth: u32,
    ) -> Result<Vec<PaperIdentity>> {
        let mut inner = self.inner.lock().await;
        inner.mark_visited(identity, depth, title, outcome);
        let mut accepted = Vec::new();
        for entry in citations {
            let candidate = entry.identity.clone();
            if inner.enqueue(entry, max_depth) {
                accepted.push(candidate);
            }
        }
        self.persist(&inner).await?;
        debug!(%identity, depth, %outcome, accepted = accepted.len(), "completed");
        Ok(accepted)
    }

    /// Return an in-flight entry to the front of the frontier without
    /// visiting it (used for cancelled papers).
    pub async fn release(&self, identity: &PaperIdentity) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.in_flight.remove(identity) else {
            return Ok(());
        };
        inner.frontier.push_front(entry);
        self.persist(&inner).await
    }

    /// The visited entry for `identity`, if any.
    pub async fn visited(&self, identity: &PaperIdentity) -> Option<VisitedEntry> {
        self.inner.lock().await.visited.get(identity).cloned()
    }

    /// Whether any entry is waiting in the frontier.
    pub async fn has_pending(&self) -> bool {
        !self.inner.lock().await.frontier.is_empty()
    }

    /// Visited papers per depth.
    pub async fn stats(&self) -> BTreeMap<u32, usize> {
        self.snapshot().await.per_depth_counts()
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().await;
        let mut pending: Vec<FrontierEntry> = inner.in_flight.values().cloned().collect();
        pending.extend(inner.frontier.iter().cloned());
        StateSnapshot {
            visited: inner
                .visited
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            pending,
            in_flight: inner.in_flight.len(),
        }
    }

    /// Clear visited, frontier, and in-flight tracking, and persist the empty state.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        *inner = Inner::default();
        self.persist(&inner).await?;
        info!("recursion state reset");
        Ok(())
    }
}
