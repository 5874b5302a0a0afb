//! OutputSink — the explicit capability that replaces the source's
//! duck-typed output callbacks (spec.md §9).
//!
//! A `Session` fans raw PTY bytes out to every attached sink. Sinks
//! never block the reader and never block each other: `deliver` is
//! non-blocking and may drop. `Transport` supplies the concrete
//! implementation backed by a bounded queue (spec.md §4.7); the core
//! only depends on this trait.

use std::fmt;

pub trait OutputSink: Send + Sync {
    /// Deliver a chunk of raw PTY output. Must not block; a sink that
    /// cannot keep up should drop the data rather than stall.
    fn deliver(&self, bytes: &[u8]);

    /// Close the sink, signalling no further `deliver` calls will
    /// come and releasing any resources the sink owns.
    fn close(&self);
}

impl fmt::Debug for dyn OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OutputSink")
    }
}
