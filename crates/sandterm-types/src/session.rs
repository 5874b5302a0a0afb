//! Session identity and the summary returned over HTTP.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque 128-bit session identifier, rendered as a stable hyphenated string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a `Session`, monotonic: once `Terminated`, never re-enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Running,
    Terminating,
    Terminated,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Running)
    }
}

/// Public summary returned by the HTTP API (spec.md §6 `summary`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub shell: String,
    pub cwd: String,
    pub cols: u16,
    pub rows: u16,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_activity: chrono::DateTime<chrono::Utc>,
    pub active: bool,
    pub pid: Option<u32>,
}

/// Request body for `POST /api/terminal/sessions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub shell: Option<String>,
    pub cwd: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

/// Request body for `POST /api/terminal/sessions/{id}/size`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

/// Response body for `POST /api/maintenance/cleanup`, shape pinned from
/// `original_source/app/api/maintenance_api.py`.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub status: &'static str,
    pub message: &'static str,
    pub inactive_sessions_cleaned: usize,
    pub orphaned_directories_cleaned: usize,
}
