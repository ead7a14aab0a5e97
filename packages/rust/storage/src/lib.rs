//! libSQL storage layer for lineage (local, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding validated
//! knowledge records, the terminal pipeline result of every processed
//! paper, and the extraction cache.
//!
//! **Access rules:**
//! - Run commands (`analyze`, `resume`, `reset`): read-write via [`Storage::open`]
//! - Reporting commands (`status`, `graph`): read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use lineage_shared::{KnowledgeRecord, LineageError, PaperIdentity, PaperOutcome, Result};

/// File name of the database inside the state directory.
pub const DATABASE_FILE_NAME: &str = "lineage.db";

fn storage_err(e: impl std::fmt::Display) -> LineageError {
    LineageError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LineageError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LineageError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        LineageError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(LineageError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Knowledge records
    // -----------------------------------------------------------------------

    /// Insert or replace the validated record for its identity.
    pub async fn upsert_record(&self, record: &KnowledgeRecord) -> Result<()> {
        self.check_writable()?;
        let json = serde_json::to_string(record).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO records (identity, title, year, record_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(identity) DO UPDATE SET
                   title = excluded.title,
                   year = excluded.year,
                   record_json = excluded.record_json",
                params![
                    record.identity().as_str(),
                    record.meta.title.as_str(),
                    record.meta.year,
                    json.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get the stored record for an identity.
    pub async fn get_record(&self, identity: &PaperIdentity) -> Result<Option<KnowledgeRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT record_json FROM records WHERE identity = ?1",
                params![identity.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let json: String = row.get(0).map_err(storage_err)?;
                Ok(Some(serde_json::from_str(&json).map_err(storage_err)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// All stored records, ordered by identity.
    pub async fn list_records(&self) -> Result<Vec<KnowledgeRecord>> {
        let mut rows = self
            .conn
            .query("SELECT record_json FROM records ORDER BY identity", params![])
            .await
            .map_err(storage_err)?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let json: String = row.get(0).map_err(storage_err)?;
            records.push(serde_json::from_str(&json).map_err(storage_err)?);
        }
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Pipeline results
    // -----------------------------------------------------------------------

    /// Store the serialized terminal result of a paper (upserts).
    pub async fn set_result(
        &self,
        identity: &PaperIdentity,
        outcome: PaperOutcome,
        result_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO paper_results (identity, outcome, result_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(identity) DO UPDATE SET
                   outcome = excluded.outcome,
                   result_json = excluded.result_json,
                   updated_at = excluded.updated_at",
                params![identity.as_str(), outcome.as_str(), result_json, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get the serialized terminal result of a paper.
    pub async fn get_result(&self, identity: &PaperIdentity) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM paper_results WHERE identity = ?1",
                params![identity.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Number of stored results per outcome.
    pub async fn count_results_by_outcome(&self) -> Result<Vec<(String, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT outcome, COUNT(*) FROM paper_results GROUP BY outcome ORDER BY outcome",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut counts = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            counts.push((
                row.get::<String>(0).map_err(storage_err)?,
                row.get::<u64>(1).map_err(storage_err)?,
            ));
        }
        Ok(counts)
    }

    // -----------------------------------------------------------------------
    // Extraction cache
    // -----------------------------------------------------------------------

    /// Get a cached candidate record.
    pub async fn get_extraction_cache(
        &self,
        prompt_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT candidate_json FROM extraction_cache
                 WHERE prompt_hash = ?1 AND model_id = ?2",
                params![prompt_hash, model_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Store a validated candidate record in the cache (upserts).
    pub async fn set_extraction_cache(
        &self,
        prompt_hash: &str,
        model_id: &str,
        candidate_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO extraction_cache (prompt_hash, model_id, candidate_json, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(prompt_hash, model_id) DO UPDATE SET
                   candidate_json = excluded.candidate_json,
                   created_at = excluded.created_at",
                params![prompt_hash, model_id, candidate_json, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Drop every cached extraction.
    pub async fn invalidate_extraction_cache(&self) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM extraction_cache", params![])
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reset
    // -----------------------------------------------------------------------

    /// Remove all records and results. The extraction cache is kept so a
    /// rerun does not repeat producer calls for unchanged inputs.
    pub async fn reset(&self) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute_batch("DELETE FROM records; DELETE FROM paper_results;")
            .await
            .map_err(storage_err)?;
        tracing::info!("cleared stored records and results");
        Ok(())
    }
}
