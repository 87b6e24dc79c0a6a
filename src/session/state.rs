//! Session lifecycle states.

use std::fmt;

/// Lifecycle of a book-mirroring session.
///
/// `Disconnected → Connecting → AwaitingSnapshot → Replaying → Live`, with
/// `Live → Resyncing → Replaying` on a sequence gap and any state `→
/// Disconnected` when the transport drops. [`Terminated`](Self::Terminated)
/// is the terminal disconnected state reached on shutdown or a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingSnapshot,
    Replaying,
    Live,
    Resyncing,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingSnapshot => "awaiting_snapshot",
            Self::Replaying => "replaying",
            Self::Live => "live",
            Self::Resyncing => "resyncing",
            Self::Terminated => "terminated",
        }
    }

    /// Returns `true` once no further reconnects will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
