//! Extraction bridge.
//!
//! Spawns the extraction subprocess and talks to it with a JSON-lines
//! protocol over stdin/stdout:
//!
//! ```text
//! <- {"type":"ready"}
//! -> {"type":"extract","id":"req-1","model":"gpt-4o","task":{...}}
//! <- {"type":"result","id":"req-1","candidate":{...}}
//! <- {"type":"error","id":"req-1","error":"rate limited"}
//! -> {"type":"shutdown"}
//! ```
//!
//! The subprocess is started lazily on the first request and shared by all
//! workers; requests are serialized over the single pipe.

use std::path::PathBuf;
use std::process::Stdio;

use lineage_shared::{BibEntry, ExtractionConfig, LineageError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{Extract, ExtractRequest};

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Extract {
        id: String,
        model: &'a str,
        task: &'a ExtractRequest,
    },
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result {
        id: String,
        candidate: serde_json::Value,
    },
    Error {
        #[serde(default)]
        id: Option<String>,
        error: String,
    },
}

/// How a single request ended.
enum Exchange {
    /// The producer answered with a candidate.
    Candidate(serde_json::Value),
    /// The producer reported a failure; the pipe is still usable.
    Refused(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How to launch the bridge subprocess.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub model: String,
}

impl From<&ExtractionConfig> for BridgeConfig {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            program: config.bridge_cmd.clone(),
            args: vec!["run".into(), config.bridge_script.clone()],
            working_dir: config.working_dir.as_ref().map(PathBuf::from),
            model: config.model.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

struct BridgeHandle {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    request_counter: u64,
}

impl BridgeHandle {
    async fn spawn(config: &BridgeConfig) -> Result<Self> {
        info!(cmd = %config.program, args = ?config.args, "spawning extraction bridge");

        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            LineageError::Extraction(format!(
                "failed to spawn bridge: {e}. Is `{}` installed?",
                config.program
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LineageError::Extraction("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LineageError::Extraction("failed to capture bridge stdout".into()))?;

        let mut handle = Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            request_counter: 0,
        };
        handle.wait_for_ready().await?;
        Ok(handle)
    }

    async fn read_message(&mut self) -> Result<ResponseMessage> {
        let line = self
            .lines
            .next_line()
            .await
            .map_err(|e| LineageError::Extraction(format!("bridge read error: {e}")))?
            .ok_or_else(|| LineageError::Extraction("bridge closed stdout unexpectedly".into()))?;

        serde_json::from_str(line.trim()).map_err(|e| {
            LineageError::Extraction(format!(
                "invalid bridge message: {e} (got: {})",
                line.chars().take(200).collect::<String>()
            ))
        })
    }

    async fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_message().await? {
            ResponseMessage::Ready => {
                info!("bridge is ready");
                Ok(())
            }
            other => Err(LineageError::Extraction(format!(
                "expected ready message, got: {other:?}"
            ))),
        }
    }

    async fn write_message(&mut self, message: &RequestMessage<'_>) -> Result<()> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| LineageError::Extraction(format!("failed to serialize request: {e}")))?;
        json.push('\n');
        self.stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| LineageError::Extraction(format!("failed to write to bridge stdin: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| LineageError::Extraction(format!("failed to flush bridge stdin: {e}")))
    }

    async fn send_task(&mut self, model: &str, task: &ExtractRequest) -> Result<Exchange> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);
        self.write_message(&RequestMessage::Extract {
            id: id.clone(),
            model,
            task,
        })
        .await?;

        loop {
            match self.read_message().await? {
                ResponseMessage::Result { id: resp_id, candidate } if resp_id == id => {
                    return Ok(Exchange::Candidate(decode_candidate(candidate)));
                }
                ResponseMessage::Error { id: resp_id, error }
                    if resp_id.as_deref().is_none_or(|r| r == id) =>
                {
                    return Ok(Exchange::Refused(error));
                }
                ResponseMessage::Ready => {
                    return Err(LineageError::Extraction(
                        "unexpected ready message during extraction".into(),
                    ));
                }
                stale => debug!(expected = %id, ?stale, "discarding stale bridge response"),
            }
        }
    }

    async fn shutdown(mut self) {
        let _ = self.write_message(&RequestMessage::Shutdown).await;
        match self.child.wait().await {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
    }
}

/// Producers sometimes return the record as a JSON string. Text that does not
/// parse is passed through so validation reports it.
fn decode_candidate(candidate: serde_json::Value) -> serde_json::Value {
    match candidate {
        serde_json::Value::String(text) => {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Compute the extraction cache key for a paper's inputs.
pub fn prompt_hash(raw_text: &str, bibliography: &[BibEntry]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_text.as_bytes());
    hasher.update([0u8]);
    for entry in bibliography {
        if let Ok(json) = serde_json::to_vec(entry) {
            hasher.update(&json);
        }
        hasher.update([b'\n']);
    }
    format!("{:x}", hasher.finalize())
}

/// [`Extract`] implementation backed by the bridge subprocess.
pub struct BridgeExtractor {
    config: BridgeConfig,
    handle: Mutex<Option<BridgeHandle>>,
}

impl BridgeExtractor {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            handle: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Extract for BridgeExtractor {
    #[instrument(skip_all, fields(identity = %request.identity, attempt = request.prior_errors.len()))]
    async fn extract(&self, request: &ExtractRequest) -> Result<serde_json::Value> {
        let mut slot = self.handle.lock().await;

        // The handle is out of the slot while a request is on the wire; if
        // this future is dropped mid-exchange the subprocess is killed and
        // the next request starts a fresh one.
        let mut handle = match slot.take() {
            Some(handle) => handle,
            None => BridgeHandle::spawn(&self.config).await?,
        };

        match handle.send_task(&self.config.model, request).await {
            Ok(Exchange::Candidate(candidate)) => {
                *slot = Some(handle);
                Ok(candidate)
            }
            Ok(Exchange::Refused(error)) => {
                *slot = Some(handle);
                Err(LineageError::Extraction(error))
            }
            Err(e) => {
                warn!(error = %e, "bridge failed, it will be restarted on the next request");
                Err(e)
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.shutdown().await;
        }
    }
}
