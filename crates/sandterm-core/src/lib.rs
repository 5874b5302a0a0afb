//! sandterm-core — PTY-backed shell sessions, per-session filesystem
//! isolation, and the registry that owns their lifecycle.
//!
//! This crate has no knowledge of HTTP or WebSockets; `sandterm-server`
//! is the only consumer of its public surface.

pub mod emulator;
pub mod error;
pub mod path_guard;
pub mod registry;
pub mod ring_buffer;
pub mod session;
pub mod sink;
pub mod workspace;

pub use error::{Error, Result};
pub use registry::SessionRegistry;
pub use session::Session;
pub use sink::OutputSink;
pub use workspace::WorkspaceLayout;
