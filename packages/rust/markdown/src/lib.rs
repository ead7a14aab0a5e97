//! Obsidian-style note rendering for knowledge records.
//!
//! Notes carry YAML frontmatter and link cited papers with wikilinks whose
//! target is [`PaperIdentity::file_stem`], so a note for a cited paper,
//! once rendered, is the link target.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use lineage_shared::{
    Citation, FlowStep, KnowledgeRecord, LineageError, PaperIdentity, Result, UsageType,
};
use regex::Regex;
use tracing::{debug, instrument};

/// Subdirectory of the output directory holding paper notes.
pub const NOTES_DIR: &str = "papers";

/// Collapses runs of whitespace (including newlines) into one space.
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options for rendering a note.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Timestamp written to the `created` frontmatter field. Defaults to now.
    pub created_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render a knowledge record into an Obsidian note.
pub fn render_note(record: &KnowledgeRecord, opts: &RenderOptions) -> String {
    let created = opts
        .created_at
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

    let mut out = build_frontmatter(record, &created);
    out.push('\n');

    let meta = &record.meta;
    out.push_str(&format!("# {}\n\n", single_line(&meta.title)));
    if !meta.authors.is_empty() {
        out.push_str(&format!("**Authors**: {}\n", meta.authors.join(", ")));
    }
    if let Some(year) = meta.year {
        out.push_str(&format!("**Year**: {year}\n"));
    }
    match meta.identity.doi() {
        Some(doi) => out.push_str(&format!("**DOI**: [{doi}](https://doi.org/{doi})\n")),
        None => out.push_str(&format!("**Identity**: `{}`\n", meta.identity)),
    }
    out.push('\n');

    let core = &record.core_analysis;
    push_section(&mut out, "Central Hypothesis", &core.central_hypothesis);
    push_section(&mut out, "Methodology", &core.methodology_summary);
    push_section(&mut out, "Significance", &core.significance);

    out.push_str("## Key Points\n\n");
    for kp in &record.key_points {
        out.push_str(&format!("### {}: {}\n\n", kp.id, single_line(&kp.content)));
        out.push_str(&format!("- **Evidence**: {}\n", single_line(&kp.evidence_anchor)));
        out.push_str(&format!("- **Confidence**: {:.2}\n\n", kp.confidence_score));
    }

    if !record.logic_chains.is_empty() {
        out.push_str("## Logic Chains\n\n");
        for chain in &record.logic_chains {
            out.push_str(&format!("### {}\n\n", single_line(&chain.name)));
            out.push_str(&format!("**Argument Flow**: {}\n\n", format_flow(&chain.argument_flow)));
            out.push_str(&format!("**Conclusion**: {}\n\n", chain.conclusion_derived.trim()));
        }
    }

    if !record.citation_network.is_empty() {
        out.push_str("## Citation Network\n\n");
        for (usage_type, heading) in [
            (UsageType::Foundational, "Foundational Papers"),
            (UsageType::Comparison, "Comparison Papers"),
            (UsageType::Refuting, "Refuting Papers"),
        ] {
            let group: Vec<&Citation> = record
                .citation_network
                .iter()
                .filter(|c| c.usage_type == usage_type)
                .collect();
            if group.is_empty() {
                continue;
            }
            out.push_str(&format!("### {heading}\n\n"));
            for citation in group {
                out.push_str(&format!("- {}\n", citation_link(citation)));
                if !citation.notes.trim().is_empty() {
                    out.push_str(&format!("  - {}\n", single_line(&citation.notes)));
                }
            }
            out.push('\n');
        }
    }

    out
}

fn push_section(out: &mut String, heading: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    out.push_str(&format!("## {heading}\n\n{}\n\n", body.trim()));
}

/// `KP1 → KP2 → ∴`
fn format_flow(flow: &[FlowStep]) -> String {
    flow.iter()
        .map(|step| match step {
            FlowStep::KeyPoint(id) => id.as_str(),
            FlowStep::Conclusion => "∴",
        })
        .collect::<Vec<_>>()
        .join(" → ")
}

/// Wikilink to a resolved citation, or plain text for an unresolved one.
fn citation_link(citation: &Citation) -> String {
    let title = wikilink_text(&citation.display_title());
    match citation.identity() {
        Some(identity) => wikilink(identity, &title),
        None => format!("{title} *(unresolved)*"),
    }
}

/// `[[<file_stem>|<title>]]`
pub fn wikilink(identity: &PaperIdentity, title: &str) -> String {
    format!("[[{}|{}]]", identity.file_stem(), wikilink_text(title))
}

/// Strip characters that would terminate a wikilink.
fn wikilink_text(s: &str) -> String {
    single_line(s)
        .replace('|', "-")
        .replace('[', "(")
        .replace(']', ")")
}

fn single_line(s: &str) -> String {
    WHITESPACE_RE.replace_all(s.trim(), " ").into_owned()
}

/// Build YAML frontmatter for a paper note.
fn build_frontmatter(record: &KnowledgeRecord, created: &str) -> String {
    let meta = &record.meta;
    let mut fm = String::from("---\n");
    fm.push_str(&format!("identity: \"{}\"\n", escape_yaml_string(meta.identity.as_str())));
    fm.push_str(&format!("title: \"{}\"\n", escape_yaml_string(&single_line(&meta.title))));
    if meta.authors.is_empty() {
        fm.push_str("authors: []\n");
    } else {
        fm.push_str("authors:\n");
        for author in &meta.authors {
            fm.push_str(&format!("  - \"{}\"\n", escape_yaml_string(author)));
        }
    }
    if let Some(year) = meta.year {
        fm.push_str(&format!("year: {year}\n"));
    }
    if let Some(doi) = meta.identity.doi() {
        fm.push_str(&format!("doi: \"{}\"\n", escape_yaml_string(doi)));
    }
    fm.push_str("tags:\n  - knowledge-record\n  - scientific-paper\n");
    fm.push_str(&format!("aliases:\n  - \"{}\"\n", escape_yaml_string(&single_line(&meta.title))));
    fm.push_str(&format!("created: \"{created}\"\n"));
    fm.push_str("---\n");
    fm
}

/// Escape special characters in a YAML string value.
fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Writes rendered notes to `<output_dir>/papers/<file_stem>.md`.
#[derive(Debug, Clone)]
pub struct NoteWriter {
    output_dir: PathBuf,
    opts: RenderOptions,
}

impl NoteWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            opts: RenderOptions::default(),
        }
    }

    pub fn with_options(mut self, opts: RenderOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the note for `identity`.
    pub fn note_path(&self, identity: &PaperIdentity) -> PathBuf {
        self.output_dir
            .join(NOTES_DIR)
            .join(format!("{}.md", identity.file_stem()))
    }

    /// Render and write the note. Returns the written path.
    #[instrument(skip_all, fields(identity = %record.identity()))]
    pub async fn write(&self, record: &KnowledgeRecord) -> Result<PathBuf> {
        let path = self.note_path(record.identity());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LineageError::io(parent, e))?;
        }
        let note = render_note(record, &self.opts);
        // Temp file then rename, so a reader never sees a partial note.
        let temp = path.with_extension("md.tmp");
        tokio::fs::write(&temp, note)
            .await
            .map_err(|e| LineageError::Render(format!("{}: {e}", temp.display())))?;
        tokio::fs::rename(&temp, &path)
            .await
            .map_err(|e| LineageError::Render(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "wrote note");
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use lineage_shared::{CitationTarget, CoreAnalysis, KeyPoint, LogicChain, PaperMeta};

    fn record() -> KnowledgeRecord {
        let cite = |doi: &str, title: &str, usage_type| Citation {
            target: CitationTarget {
                identity: PaperIdentity::from_doi(doi),
                title: Some(title.into()),
                year: None,
                first_author: None,
                citation_count: None,
                rejected_doi: None,
            },
            usage_type,
            notes: "why it matters".into(),
        };
        KnowledgeRecord {
            meta: PaperMeta {
                title: "Deep \"Learning\" for Climate".into(),
                authors: vec!["Smith, J.".into(), "Doe, A.".into()],
                year: Some(2024),
                identity: PaperIdentity::parse("10.1000/climate.2024").expect("doi"),
            },
            core_analysis: CoreAnalysis {
                central_hypothesis: "Deep networks improve prediction".into(),
                methodology_summary: "CNN-LSTM".into(),
                significance: String::new(),
            },
            key_points: vec![KeyPoint {
                id: "KP1".into(),
                content: "Lower\nRMSE".into(),
                evidence_anchor: "Table 3".into(),
                confidence_score: 0.923,
            }],
            logic_chains: vec![LogicChain {
                name: "Performance".into(),
                argument_flow: vec![FlowStep::KeyPoint("KP1".into()), FlowStep::Conclusion],
                conclusion_derived: "Superior".into(),
            }],
            citation_network: vec![
                cite("10.1000/lstm.1997", "LSTM [v2] | long", UsageType::Foundational),
                cite("10.1000/arima", "ARIMA", UsageType::Comparison),
                Citation {
                    target: CitationTarget {
                        identity: None,
                        title: Some("Personal communication".into()),
                        year: None,
                        first_author: None,
                        citation_count: None,
                        rejected_doi: None,
                    },
                    usage_type: UsageType::Refuting,
                    notes: String::new(),
                },
            ],
        }
    }

    fn opts() -> RenderOptions {
        RenderOptions {
            created_at: Some("2024-01-01T00:00:00Z".into()),
        }
    }

    #[test]
    fn frontmatter_is_escaped_and_complete() {
        let note = render_note(&record(), &opts());
        assert!(note.starts_with("---\nidentity: \"doi:10.1000/climate.2024\"\n"));
        assert!(note.contains("title: \"Deep \\\"Learning\\\" for Climate\""));
        assert!(note.contains("  - \"Smith, J.\""));
        assert!(note.contains("year: 2024"));
        assert!(note.contains("doi: \"10.1000/climate.2024\""));
        assert!(note.contains("created: \"2024-01-01T00:00:00Z\""));
    }

    #[test]
    fn sections_render_in_order() {
        let note = render_note(&record(), &opts());
        let hypothesis = note.find("## Central Hypothesis").expect("hypothesis");
        let key_points = note.find("## Key Points").expect("key points");
        let chains = note.find("## Logic Chains").expect("chains");
        let citations = note.find("## Citation Network").expect("citations");
        assert!(hypothesis < key_points && key_points < chains && chains < citations);
        // Empty significance is omitted.
        assert!(!note.contains("## Significance"));
        assert!(note.contains("### KP1: Lower RMSE"));
        assert!(note.contains("- **Confidence**: 0.92"));
        assert!(note.contains("**Argument Flow**: KP1 → ∴"));
    }

    #[test]
    fn citations_are_grouped_with_wikilinks() {
        let note = render_note(&record(), &opts());
        assert!(note.contains("### Foundational Papers\n\n- [[10.1000_lstm.1997|LSTM (v2) - long]]"));
        assert!(note.contains("### Comparison Papers\n\n- [[10.1000_arima|ARIMA]]"));
        assert!(note.contains("- Personal communication *(unresolved)*"));
    }

    #[tokio::test]
    async fn writer_places_note_by_file_stem() {
        let dir = std::env::temp_dir().join(format!("lineage-md-test-{}", uuid::Uuid::now_v7()));
        let writer = NoteWriter::new(&dir).with_options(opts());
        let path = writer.write(&record()).await.expect("write");
        assert_eq!(path, dir.join("papers").join("10.1000_climate.2024.md"));
        let content = std::fs::read_to_string(&path).expect("read");
        assert!(content.contains("# Deep \"Learning\" for Climate"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
