//! Close codes and close classification.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Close code sent when the last listener leaves (RFC 6455 "normal closure").
pub const CLEAN_CLOSE_CODE: u16 = 1000;

/// Close reason sent alongside [`CLEAN_CLOSE_CODE`].
pub const CLEAN_CLOSE_REASON: &str = "no listeners remain";

// ============================================================================
// CloseKind
// ============================================================================

/// How a connection ended.
///
/// Only a close the multiplexer itself initiated, because its registry
/// emptied, is [`CloseKind::Clean`]. Everything else, including a close
/// frame sent by the peer, counts as abnormal and is eligible for reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Multiplexer-initiated close with [`CLEAN_CLOSE_CODE`].
    Clean,
    /// Network failure, stream end, peer close, or failed connect.
    Abnormal,
}

impl CloseKind {
    /// Returns `true` if this close may trigger a reconnect.
    #[inline]
    #[must_use]
    pub const fn is_abnormal(self) -> bool {
        matches!(self, Self::Abnormal)
    }
}

impl fmt::Display for CloseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => f.write_str("clean"),
            Self::Abnormal => f.write_str("abnormal"),
        }
    }
}
