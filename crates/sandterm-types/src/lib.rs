//! sandterm-types — pure wire types shared by the core and its transport
//!
//! No async runtime dependency: this crate only defines the data that
//! crosses the HTTP/WebSocket boundary, so it can be reused by a thin
//! client without pulling in tokio or portable-pty.

pub mod session;
pub mod ws;

pub use session::*;
pub use ws::*;
