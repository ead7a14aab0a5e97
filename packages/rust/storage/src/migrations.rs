//! SQL migration definitions for the lineage database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: records, paper_results, extraction_cache",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Validated knowledge records, one per canonical identity
CREATE TABLE IF NOT EXISTS records (
    identity    TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    year        INTEGER,
    record_json TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

-- Terminal pipeline results, replayed for already-visited identities
CREATE TABLE IF NOT EXISTS paper_results (
    identity    TEXT PRIMARY KEY,
    outcome     TEXT NOT NULL,
    result_json TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_paper_results_outcome ON paper_results(outcome);

-- Validated extraction output keyed by input hash and model
CREATE TABLE IF NOT EXISTS extraction_cache (
    prompt_hash    TEXT NOT NULL,
    model_id       TEXT NOT NULL,
    candidate_json TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    UNIQUE(prompt_hash, model_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
