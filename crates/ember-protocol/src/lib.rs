//! ember-protocol: RESP wire codec for the cluster client.
//!
//! The client writes commands as arrays of bulk strings and reads back
//! replies from servers that may speak either RESP2 or RESP3, so the
//! parser accepts both null encodings (`_\r\n`, `$-1\r\n`, `*-1\r\n`).
//!
//! # quick start
//!
//! ```
//! use bytes::{Bytes, BytesMut};
//! use ember_protocol::{encode_command, parse_frame, Frame};
//!
//! let mut buf = BytesMut::new();
//! encode_command(&[Bytes::from_static(b"GET"), Bytes::from_static(b"k")], &mut buf);
//! assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");
//!
//! let (frame, consumed) = parse_frame(b"$-1\r\n").unwrap().unwrap();
//! assert_eq!(frame, Frame::Null);
//! assert_eq!(consumed, 5);
//! ```

pub mod error;
pub mod parse;
mod serialize;
pub mod types;

pub use error::ProtocolError;
pub use parse::parse_frame;
pub use serialize::encode_command;
pub use types::Frame;
