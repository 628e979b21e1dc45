//! Direct-to-buffer RESP serialization.
//!
//! Commands go out as arrays of bulk strings. Integer lengths are written
//! with `itoa` so no intermediate `String` is allocated per argument.

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::Frame;

/// Encodes a command (name followed by arguments) as a RESP array of
/// bulk strings, appending it to `dst`.
pub fn encode_command(args: &[Bytes], dst: &mut BytesMut) {
    dst.put_u8(b'*');
    write_len(args.len(), dst);
    for arg in args {
        dst.put_u8(b'$');
        write_len(arg.len(), dst);
        dst.put_slice(arg);
        dst.put_slice(b"\r\n");
    }
}

impl Frame {
    /// Serializes this frame into the provided buffer.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => line(b'+', s.as_bytes(), dst),
            Frame::Error(msg) => line(b'-', msg.as_bytes(), dst),
            Frame::Integer(n) => {
                let mut buf = itoa::Buffer::new();
                line(b':', buf.format(*n).as_bytes(), dst);
            }
            Frame::Bulk(data) => {
                dst.put_u8(b'$');
                write_len(data.len(), dst);
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(items) => {
                dst.put_u8(b'*');
                write_len(items.len(), dst);
                for item in items {
                    item.serialize(dst);
                }
            }
            Frame::Null => dst.put_slice(b"_\r\n"),
            Frame::Map(pairs) => {
                dst.put_u8(b'%');
                write_len(pairs.len(), dst);
                for (key, val) in pairs {
                    key.serialize(dst);
                    val.serialize(dst);
                }
            }
        }
    }
}

fn line(prefix: u8, body: &[u8], dst: &mut BytesMut) {
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

/// Writes a length header value followed by `\r\n`.
fn write_len(len: usize, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(len).as_bytes());
    dst.put_slice(b"\r\n");
}
