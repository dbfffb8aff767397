//! Error types for the aliasing engine.

use thiserror::Error;

/// Result type alias for aliasing operations.
pub type Result<T> = std::result::Result<T, AliasError>;

/// Errors that can occur while inspecting or rewriting a packet.
///
/// A flow with no translation link is *not* an error; the engine reports
/// that as [`AliasOutcome::PassThrough`](crate::AliasOutcome::PassThrough).
/// Errors are reserved for packets the engine refuses to interpret at all.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AliasError {
    /// Buffer is shorter than the header it claims to contain.
    #[error("truncated packet: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required to interpret the header.
        need: usize,
        /// Bytes actually present.
        have: usize,
    },

    /// The buffer does not start with an IPv4 header.
    #[error("not an IPv4 packet (version {0})")]
    NotIpv4(u8),

    /// IP header length field is below the 20-byte minimum.
    #[error("invalid IP header length: {0} bytes")]
    InvalidHeaderLength(usize),

    /// IP total length is smaller than the header it follows.
    #[error("invalid IP total length: {0} bytes")]
    InvalidTotalLength(usize),

    /// A payload rewrite would not fit the caller's buffer.
    #[error("buffer capacity exceeded: need {need} bytes, have {have}")]
    CapacityExceeded {
        /// Bytes the rewritten datagram requires.
        need: usize,
        /// Capacity of the caller's buffer.
        have: usize,
    },
}
