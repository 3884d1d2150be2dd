use thiserror::Error;

/// Errors that cross the library surface.
///
/// Wire-level receive faults (framing resync, rejected lengths, checksum
/// failures) are not represented here: the stream state machine recovers from
/// them locally and accounts for them in the per-port counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The message type nibble is not one of the four defined types.
    #[error("message type {0} not supported")]
    MsgTypeNotSupported(u8),
    /// The message is larger than this build can buffer.
    #[error("message length {0} invalid")]
    MsgLengthInvalid(u16),
    /// A CRC32-bearing message failed verification.
    #[error("crc32 check failed")]
    Crc32Fail,
    /// No parser handled the attribute; the message carries no data.
    #[error("attribute {0} not handled")]
    AttNotHandled(u32),
    /// A legacy `QB` header was seen but no legacy hooks are registered.
    #[error("legacy header support not registered")]
    LegacyUnsupported,
    /// A parameter name was not found in the attribute's schema.
    #[error("parameter key not found")]
    KeyNotFound,
}

pub type Result<T> = core::result::Result<T, Error>;
