//! Citation graph export.
//!
//! Nodes are the papers of the run (stored records and visited entries)
//! plus citation targets that were never processed. Edges are resolved
//! citations, labelled with their usage type.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lineage_shared::{PaperIdentity, PaperOutcome, Result, UsageType};
use lineage_state::StateSnapshot;
use lineage_storage::Storage;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: PaperIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Depth at first visit; `None` for targets that were never processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PaperOutcome>,
    pub key_points: usize,
    pub processed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub source: PaperIdentity,
    pub target: PaperIdentity,
    pub usage_type: UsageType,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphMetadata {
    pub node_count: usize,
    pub edge_count: usize,
    pub processed_count: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitationGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metadata: GraphMetadata,
}

/// Build the graph from stored records and the visited set.
pub async fn citation_graph(storage: &Storage, snapshot: &StateSnapshot) -> Result<CitationGraph> {
    let mut nodes: BTreeMap<PaperIdentity, GraphNode> = BTreeMap::new();

    for (identity, visited) in &snapshot.visited {
        nodes.insert(
            identity.clone(),
            GraphNode {
                id: identity.clone(),
                title: visited.title.clone(),
                year: None,
                depth: Some(visited.depth),
                outcome: Some(visited.outcome),
                key_points: 0,
                processed: true,
            },
        );
    }

    let records = storage.list_records().await?;
    let mut edges = Vec::new();
    for record in &records {
        let node = nodes.entry(record.identity().clone()).or_insert_with(|| GraphNode {
            id: record.identity().clone(),
            title: None,
            year: None,
            depth: None,
            outcome: None,
            key_points: 0,
            processed: true,
        });
        node.title = Some(record.meta.title.clone());
        node.year = record.meta.year;
        node.key_points = record.key_points.len();

        for citation in &record.citation_network {
            let Some(target) = citation.identity() else {
                continue;
            };
            edges.push(GraphEdge {
                source: record.identity().clone(),
                target: target.clone(),
                usage_type: citation.usage_type,
                notes: citation.notes.clone(),
            });
        }
    }

    // Targets that were cited but never processed.
    for record in &records {
        for citation in &record.citation_network {
            let Some(target) = citation.identity() else {
                continue;
            };
            nodes.entry(target.clone()).or_insert_with(|| GraphNode {
                id: target.clone(),
                title: citation.target.title.clone(),
                year: citation.target.year,
                depth: None,
                outcome: None,
                key_points: 0,
                processed: false,
            });
        }
    }

    let nodes: Vec<GraphNode> = nodes.into_values().collect();
    let metadata = GraphMetadata {
        node_count: nodes.len(),
        edge_count: edges.len(),
        processed_count: nodes.iter().filter(|n| n.processed).count(),
        generated_at: Utc::now(),
    };
    Ok(CitationGraph {
        nodes,
        edges,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineage_shared::RunLimits;

    use crate::test_support::{Harness, candidate_json, paper};

    #[tokio::test]
    async fn graph_contains_processed_papers_and_cited_targets() {
        let h = Harness::new().await;
        h.ingest.add("10.1000/p0", paper("P0", 2020));
        h.extract.respond(
            "10.1000/p0",
            candidate_json(
                "P0",
                2020,
                &[
                    ("10.1000/a", "A", 1990, "Foundational"),
                    ("10.1000/d", "D", 1970, "Comparison"),
                ],
            ),
        );
        let orchestrator = h.orchestrator();
        let limits = RunLimits {
            max_depth: 1,
            max_citations: 5,
            concurrency: 1,
        };
        orchestrator
            .analyze(PaperIdentity::parse("10.1000/p0").expect("doi"), limits)
            .await
            .expect("analyze");

        let graph = citation_graph(&h.storage, &orchestrator.status().await)
            .await
            .expect("graph");

        // P0 completed, A fetch-failed (not in the fake corpus), D only cited.
        assert_eq!(graph.metadata.node_count, 3);
        assert_eq!(graph.metadata.processed_count, 2);
        assert_eq!(graph.edges.len(), 2);

        let p0 = graph.nodes.iter().find(|n| n.id.as_str() == "doi:10.1000/p0").expect("p0");
        assert_eq!(p0.depth, Some(0));
        assert_eq!(p0.key_points, 2);
        assert_eq!(p0.outcome, Some(PaperOutcome::Completed));

        let a = graph.nodes.iter().find(|n| n.id.as_str() == "doi:10.1000/a").expect("a");
        assert_eq!(a.outcome, Some(PaperOutcome::FetchFailed));

        let d = graph.nodes.iter().find(|n| n.id.as_str() == "doi:10.1000/d").expect("d");
        assert!(!d.processed);
        assert_eq!(d.title.as_deref(), Some("D"));

        let json = serde_json::to_value(&graph).expect("serialize");
        assert_eq!(json["edges"][1]["usage_type"], "Comparison");
        h.cleanup();
    }
}
