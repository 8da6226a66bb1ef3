//! Aggregator session lifecycle.

use std::fmt;

/// Lifecycle state of an aggregator session.
///
/// `Uninitialized -> Registering -> Registered -> Deregistering -> Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    /// CREATE published, waiting for the server acknowledgment.
    Registering,
    /// Handle assigned; commands are accepted.
    Registered,
    /// DELETE published, waiting for the server acknowledgment.
    Deregistering,
    /// Deleted, failed to register, or shut down. Terminal.
    Terminated,
}

impl SessionState {
    /// Check if the session accepts commands.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Registered)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "UNINITIALIZED"),
            Self::Registering => write!(f, "REGISTERING"),
            Self::Registered => write!(f, "REGISTERED"),
            Self::Deregistering => write!(f, "DEREGISTERING"),
            Self::Terminated => write!(f, "TERMINATED"),
        }
    }
}
