// Error taxonomy for the relay crate.
//
// Most failures here are recovered close to where they occur: malformed
// frames are dropped with the connection left open, per-recipient forward
// failures are logged inside the fan-out loop, and a closed channel only
// triggers cleanup for that one connection. The variants below are the ones
// that cross an API boundary.

use copresence_protocol::{CodecError, UserId};

/// Result alias used throughout the relay crate.
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Registry invariant violation: the user id is already registered.
    /// Should not occur with counter-based assignment; the offending
    /// connection is rejected if it does.
    #[error("duplicate user id: {0}")]
    DuplicateUser(UserId),

    /// Peer disconnected or local shutdown closed the channel.
    #[error("channel closed")]
    ChannelClosed,

    /// A frame failed to decode. Recovered locally — the frame is dropped
    /// and the connection stays open.
    #[error("malformed message: {0}")]
    Malformed(#[from] CodecError),

    /// Connect-time handshake did not produce the expected greeting.
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}
