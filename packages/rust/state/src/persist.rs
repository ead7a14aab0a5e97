//! On-disk layout of the recursion state and atomic replace-on-write.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lineage_shared::{CURRENT_SCHEMA_VERSION, LineageError, PaperIdentity, Result};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::manager::{FrontierEntry, VisitedEntry};

/// File name of the state document inside the state directory.
pub const STATE_FILE_NAME: &str = "recursion_state.json";

/// The persisted state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedState {
    pub schema_version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub visited: BTreeMap<PaperIdentity, VisitedEntry>,
    /// In-flight entries first, then the frontier in discovery order.
    #[serde(default)]
    pub pending: Vec<FrontierEntry>,
}

fn invalid_data(message: String) -> std::io::Error {
    std::io::Error::new(ErrorKind::InvalidData, message)
}

/// Load the state file. A missing file is an empty state; anything
/// unreadable or unparseable is a fatal error.
pub(crate) async fn load(path: &Path) -> Result<Option<PersistedState>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LineageError::state_io(path, e)),
    };

    let state: PersistedState = serde_json::from_str(&content)
        .map_err(|e| LineageError::state_io(path, invalid_data(format!("corrupt state file: {e}"))))?;

    if state.schema_version > CURRENT_SCHEMA_VERSION {
        return Err(LineageError::state_io(
            path,
            invalid_data(format!(
                "state schema version {} is newer than supported version {CURRENT_SCHEMA_VERSION}",
                state.schema_version
            )),
        ));
    }

    Ok(Some(state))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write the state to a sibling temp file, fsync it, then rename over the
/// target. Readers see either the previous or the new document.
pub(crate) async fn save(path: &Path, state: &PersistedState) -> Result<()> {
    let json = serde_json::to_vec_pretty(state)
        .map_err(|e| LineageError::state_io(path, invalid_data(e.to_string())))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| LineageError::state_io(parent, e))?;
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| LineageError::state_io(&tmp, e))?;
    file.write_all(&json)
        .await
        .map_err(|e| LineageError::state_io(&tmp, e))?;
    file.sync_all()
        .await
        .map_err(|e| LineageError::state_io(&tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| LineageError::state_io(path, e))?;
    Ok(())
}
