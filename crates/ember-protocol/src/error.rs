//! Protocol error types for RESP parsing.

use thiserror::Error;

/// Errors that can occur when parsing a server reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input buffer doesn't contain a complete frame yet.
    /// The caller should read more data and try again.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The first byte of a frame didn't match any known type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// Failed to parse an integer value from the frame content.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A bulk string or aggregate declared an invalid length.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// A simple string or error line was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A bulk string exceeds the maximum allowed size.
    #[error("bulk string too large: {0} bytes")]
    BulkStringTooLarge(usize),

    /// An array or map declares more elements than allowed.
    #[error("too many elements: {0}")]
    TooManyElements(usize),

    /// Aggregates are nested deeper than the parser allows.
    #[error("nesting too deep (limit {0})")]
    NestingTooDeep(usize),
}
