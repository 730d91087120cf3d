//! Session error types

use thiserror::Error;

/// Errors surfaced by session operations.
///
/// The variants split into protocol violations the caller can recover from
/// (`HandshakeAlreadyComplete`, `InvalidKeyExchange`, `ReorderLimitExceeded`),
/// cryptographic failures (`MalformedFrame`, `DuplicateOrExpired`,
/// `Undecryptable`) and caller misuse (`NotYetHandshaken`, `CorruptState`).
/// A failed `decrypt` never mutates session state, so rejecting the offending
/// frame and carrying on is always safe.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The two-phase key exchange already ran to completion on this session.
    #[error("handshake already complete")]
    HandshakeAlreadyComplete,

    /// The peer's key exchange material is unusable, including the case
    /// where the peer echoed our own DH values back at us.
    #[error("peer's key exchange material is invalid")]
    InvalidKeyExchange,

    /// `decrypt` was called before the handshake completed.
    #[error("handshake not complete yet")]
    NotYetHandshaken,

    /// The frame is too short to carry a sealed header, or the sealed
    /// header opened to the wrong length.
    #[error("malformed frame")]
    MalformedFrame,

    /// The message number lies behind the receive counter and no saved key
    /// exists for it: a duplicate, or a message delayed past tolerance.
    #[error("duplicate message or message delayed longer than tolerance")]
    DuplicateOrExpired,

    /// Accepting the message would require skipping more keys than the
    /// reordering window allows.
    #[error("message exceeds reordering limit")]
    ReorderLimitExceeded,

    /// No key on hand opens the frame, or its payload failed
    /// authentication.
    #[error("cannot decrypt")]
    Undecryptable,

    /// A serialized session failed to load.
    #[error("corrupt session state: {0}")]
    CorruptState(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
