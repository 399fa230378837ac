//! Error types and classification.
//!
//! Concord distinguishes recoverable conditions (CAS mismatch, a slow peer)
//! from fatal ones (an out-of-order apply, a corrupt journal record). The
//! recoverable ones are ordinary results surfaced to the caller of
//! `propose`; the fatal ones propagate to the runtime, which stops the
//! replica rather than continue from inconsistent state.

use thiserror::Error;

use crate::store::mutation::Cas;

/// Common Concord error conditions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConcordError {
    /// A conditional mutation's expected CAS did not match the path's
    /// current CAS. Carries the current token so the caller can retry.
    #[error("cas mismatch: expected {expected}, current {current}")]
    CasMismatch { expected: Cas, current: Cas },

    /// Path is not legal (must match `^/$|^(/[a-zA-Z0-9.-]+)+$`).
    #[error("bad path: {path}")]
    BadPath { path: String },

    /// A mutation string could not be decoded.
    #[error("bad mutation: {mutation:?}")]
    BadMutation { mutation: String },

    /// The path addresses a directory where a file operation was requested.
    #[error("is a directory: {path}")]
    IsADirectory { path: String },

    /// An intermediate path component exists but is not a directory.
    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    /// A wait was registered for a seqn whose event has been cleaned
    /// from the store's log.
    #[error("too late: seqn {seqn} has been cleaned")]
    TooLate { seqn: u64 },

    /// An apply arrived out of order. Fatal to the local replica; the only
    /// sanctioned recovery is journal replay or catch-up from peers.
    #[error("seqn violation: expected {expected}, got {got}")]
    SeqnViolation { expected: u64, got: u64 },

    /// The journal rejected or corrupted a record.
    #[error("journal: {message}")]
    Journal { message: String },

    /// A transport-level failure (peer unreachable, malformed packet).
    #[error("transport: {message}")]
    Transport { message: String },

    /// A channel or component shut down while a caller was blocked on it.
    #[error("closed: {what}")]
    Closed { what: &'static str },
}

impl ConcordError {
    /// True if the operation may be retried as-is (possibly with backoff).
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::CasMismatch { .. } | Self::Transport { .. })
    }

    /// True if this error invalidates the local replica's consistency.
    /// Fatal errors must stop the replica, never be skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SeqnViolation { .. } | Self::Journal { .. })
    }

    /// Create a transport error from any displayable cause.
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: cause.to_string(),
        }
    }

    /// Create a journal error from any displayable cause.
    pub fn journal(cause: impl std::fmt::Display) -> Self {
        Self::Journal {
            message: cause.to_string(),
        }
    }
}

/// Result type using ConcordError.
pub type ConcordResult<T> = Result<T, ConcordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let cas = ConcordError::CasMismatch {
            expected: Cas::Missing,
            current: Cas::At(4),
        };
        assert!(cas.is_retriable());
        assert!(!cas.is_fatal());

        let seqn = ConcordError::SeqnViolation {
            expected: 3,
            got: 5,
        };
        assert!(seqn.is_fatal());
        assert!(!seqn.is_retriable());
    }

    #[test]
    fn display_carries_tokens() {
        let err = ConcordError::CasMismatch {
            expected: Cas::At(1),
            current: Cas::At(2),
        };
        assert_eq!(err.to_string(), "cas mismatch: expected 1, current 2");
    }
}
