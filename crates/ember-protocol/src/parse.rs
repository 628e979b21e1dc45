//! Incremental RESP reply parser.
//!
//! The client reads socket data into a growing buffer and calls
//! [`parse_frame`] after every read. A complete reply is returned with the
//! number of bytes it occupied; a partial reply yields `Ok(None)` and the
//! buffer is left untouched so the call can be repeated once more data
//! has arrived.
//!
//! Both RESP2 and RESP3 replies are accepted. The RESP2 null forms
//! (`$-1\r\n` and `*-1\r\n`) decode to [`Frame::Null`] just like the
//! RESP3 `_\r\n`.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// Maximum nesting depth for arrays and maps.
const MAX_NESTING_DEPTH: usize = 64;

/// Maximum number of elements in a single array or map.
const MAX_AGGREGATE_LEN: usize = 1_048_576;

/// Maximum length of a bulk string in bytes (512 MB, matching Redis).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound for the initial `Vec` allocation of an aggregate. The
/// vector still grows past this as elements are decoded.
const PREALLOC_CAP: usize = 256;

/// Attempts to parse one complete reply from the start of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` when a full frame is present,
/// `Ok(None)` when more data is needed, or an error when the bytes can
/// never form a valid frame.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut reader = Reader { buf, pos: 0 };
    match reader.frame(0) {
        Ok(frame) => Ok(Some((frame, reader.pos))),
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read position over a borrowed input buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn frame(&mut self, depth: usize) -> Result<Frame, ProtocolError> {
        let prefix = self.byte()?;
        match prefix {
            b'+' => Ok(Frame::Simple(self.text_line("simple string")?)),
            b'-' => Ok(Frame::Error(self.text_line("error reply")?)),
            b':' => Ok(Frame::Integer(self.integer_line()?)),
            b'$' => self.bulk(),
            b'*' => {
                let Some(count) = self.aggregate_len()? else {
                    return Ok(Frame::Null);
                };
                let depth = nested(depth)?;
                let mut items = Vec::with_capacity(count.min(PREALLOC_CAP));
                for _ in 0..count {
                    items.push(self.frame(depth)?);
                }
                Ok(Frame::Array(items))
            }
            b'%' => {
                let Some(count) = self.aggregate_len()? else {
                    return Ok(Frame::Null);
                };
                let depth = nested(depth)?;
                let mut pairs = Vec::with_capacity(count.min(PREALLOC_CAP));
                for _ in 0..count {
                    let key = self.frame(depth)?;
                    let val = self.frame(depth)?;
                    pairs.push((key, val));
                }
                Ok(Frame::Map(pairs))
            }
            b'_' => {
                self.line()?;
                Ok(Frame::Null)
            }
            other => Err(ProtocolError::InvalidPrefix(other)),
        }
    }

    fn bulk(&mut self) -> Result<Frame, ProtocolError> {
        let len = self.integer_line()?;
        if len == -1 {
            return Ok(Frame::Null);
        }
        if len < 0 {
            return Err(ProtocolError::InvalidFrameLength(len));
        }
        if len > MAX_BULK_LEN {
            return Err(ProtocolError::BulkStringTooLarge(len as usize));
        }

        let len = len as usize;
        let start = self.pos;
        let end = start + len;
        if self.buf.len() < end + 2 {
            return Err(ProtocolError::Incomplete);
        }
        if &self.buf[end..end + 2] != b"\r\n" {
            return Err(ProtocolError::InvalidFrameLength(len as i64));
        }
        self.pos = end + 2;
        Ok(Frame::Bulk(Bytes::copy_from_slice(&self.buf[start..end])))
    }

    /// Reads an aggregate header. `None` means a RESP2 null aggregate.
    fn aggregate_len(&mut self) -> Result<Option<usize>, ProtocolError> {
        let count = self.integer_line()?;
        if count == -1 {
            return Ok(None);
        }
        if count < 0 {
            return Err(ProtocolError::InvalidFrameLength(count));
        }
        let count = count as usize;
        if count > MAX_AGGREGATE_LEN {
            return Err(ProtocolError::TooManyElements(count));
        }
        Ok(Some(count))
    }

    fn byte(&mut self) -> Result<u8, ProtocolError> {
        let b = *self.buf.get(self.pos).ok_or(ProtocolError::Incomplete)?;
        self.pos += 1;
        Ok(b)
    }

    /// Returns the bytes up to the next `\r\n` and moves past it.
    fn line(&mut self) -> Result<&'a [u8], ProtocolError> {
        let buf: &'a [u8] = self.buf;
        let mut from = self.pos;
        while let Some(offset) = memchr::memchr(b'\r', &buf[from..]) {
            let cr = from + offset;
            match buf.get(cr + 1) {
                Some(b'\n') => {
                    let line = &buf[self.pos..cr];
                    self.pos = cr + 2;
                    return Ok(line);
                }
                Some(_) => from = cr + 1,
                None => break,
            }
        }
        Err(ProtocolError::Incomplete)
    }

    fn text_line(&mut self, what: &'static str) -> Result<String, ProtocolError> {
        let line = self.line()?;
        std::str::from_utf8(line)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8(what))
    }

    fn integer_line(&mut self) -> Result<i64, ProtocolError> {
        parse_i64(self.line()?)
    }
}

fn nested(depth: usize) -> Result<usize, ProtocolError> {
    let next = depth + 1;
    if next > MAX_NESTING_DEPTH {
        return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
    }
    Ok(next)
}

/// Parses a decimal i64 without going through `str`.
///
/// Negative values accumulate downward so `i64::MIN` does not overflow.
fn parse_i64(buf: &[u8]) -> Result<i64, ProtocolError> {
    let (negative, digits) = match buf.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, buf),
        None => return Err(ProtocolError::InvalidInteger),
    };
    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }

    digits.iter().try_fold(0i64, |acc, &b| {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        let digit = (b - b'0') as i64;
        let shifted = acc.checked_mul(10).ok_or(ProtocolError::InvalidInteger)?;
        let next = if negative {
            shifted.checked_sub(digit)
        } else {
            shifted.checked_add(digit)
        };
        next.ok_or(ProtocolError::InvalidInteger)
    })
}
