use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;

/// Who submitted a snippet.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: String,
    pub name: String,
}

impl Requester {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One snippet submission. Built once by the caller and only read afterwards.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    pub description: Option<String>,
    pub requester: Requester,
    pub working_dir: PathBuf,
    pub time_budget: Duration,
}

/// Why an execution did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionFailure {
    #[error("execution timed out after {} seconds", .budget.as_secs_f64())]
    Timeout { budget: Duration },

    #[error("{kind}: {message}")]
    Fault {
        kind: String,
        message: String,
        exit_code: Option<i32>,
    },

    #[error("could not start snippet: {0}")]
    Launch(String),
}

impl ExecutionFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionFailure::Timeout { .. })
    }

    /// Text shown to the requester and stored in history.
    pub fn message(&self) -> String {
        match self {
            ExecutionFailure::Fault { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Failed(ExecutionFailure),
}

/// Normalized result of one engine call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    pub stdout: String,
    pub stderr: String,
    /// Force-delivered files and saved plots, in the order the snippet produced them.
    pub artifacts: Vec<PathBuf>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Completed)
    }

    pub fn failure(&self) -> Option<&ExecutionFailure> {
        match &self.outcome {
            ExecutionOutcome::Completed => None,
            ExecutionOutcome::Failed(failure) => Some(failure),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.failure().map(ExecutionFailure::message)
    }
}

/// A history entry before the store has assigned its id and timestamp.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewRecord {
    pub requester_id: String,
    pub requester_name: String,
    pub code: String,
    pub description: Option<String>,
    pub success: bool,
    pub output: String,
    pub error_msg: Option<String>,
    pub artifacts: Vec<PathBuf>,
    pub duration_ms: u64,
}

impl NewRecord {
    pub fn from_execution(
        request: &ExecutionRequest,
        result: &ExecutionResult,
        artifacts: &[PathBuf],
    ) -> Self {
        Self {
            requester_id: request.requester.id.clone(),
            requester_name: request.requester.name.clone(),
            code: request.code.clone(),
            description: request.description.clone(),
            success: result.success(),
            output: result.stdout.clone(),
            error_msg: result.error_message(),
            artifacts: artifacts.to_vec(),
            duration_ms: result.duration.as_millis() as u64,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryRecord {
    pub id: u64,
    pub requester_id: String,
    pub requester_name: String,
    pub code: String,
    pub code_hash: String, // SHA256 of the normalized snippet
    #[serde(default)]
    pub description: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_new(id: u64, created_at: DateTime<Utc>, record: NewRecord) -> Self {
        let code_hash = hash_code(&record.code);
        Self {
            id,
            requester_id: record.requester_id,
            requester_name: record.requester_name,
            code: record.code,
            code_hash,
            description: record.description,
            success: record.success,
            output: record.output,
            error_msg: record.error_msg,
            artifacts: record.artifacts,
            duration_ms: record.duration_ms,
            created_at,
        }
    }
}

/// Where replies and artifacts go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTarget {
    pub session_id: String,
    pub kind: ConversationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Private,
    Group,
}

/// Line endings and trailing whitespace do not change a snippet's identity.
fn normalize_code(code: &str) -> String {
    code.trim()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_code(code).as_bytes());
    hex::encode(hasher.finalize())
}
