//! Error types for the session multiplexer (spec.md §7)

use thiserror::Error;

/// Errors raised by `sandterm-core`. Each variant maps to one row of
/// spec.md §7's surface-behavior table; the transport crate turns
/// these into HTTP status codes or WebSocket `error` events.
#[derive(Error, Debug)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("path rejected: {0}")]
    PathRejected(String),

    #[error("session is not active")]
    NotActive,

    #[error("invalid terminal dimensions: {cols}x{rows}")]
    BadDims { cols: u16, rows: u16 },

    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    #[error("failed to set up workspace: {0}")]
    WorkspaceSetupFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
