//! RESP frame types.
//!
//! The [`Frame`] enum represents a single parsed reply. Bulk strings use
//! `Bytes` so a large `CLUSTER NODES` payload is not copied again after
//! it leaves the read buffer.

use bytes::Bytes;

/// A single RESP protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string reply, e.g. `+OK\r\n`.
    Simple(String),

    /// Error reply, e.g. `-MOVED 3999 127.0.0.1:6381\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Bulk (binary-safe) string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Ordered array of frames.
    Array(Vec<Frame>),

    /// Null value. Covers RESP3 `_\r\n` and the RESP2 `$-1` / `*-1` forms.
    Null,

    /// Ordered map of key-value frame pairs (RESP3 `%`).
    Map(Vec<(Frame, Frame)>),
}

impl Frame {
    /// Returns `true` if this frame is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Returns `true` for the `+OK` status reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Simple(s) if s == "OK")
    }

    /// Returns the textual content of a simple or bulk string.
    ///
    /// Bulk data is decoded lossily; `None` for every other frame type.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Frame::Simple(s) => Some(s.clone()),
            Frame::Bulk(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }
}
