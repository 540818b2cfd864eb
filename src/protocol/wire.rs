//! Wire primitives: string encoding and frame I/O.
//!
//! Strings are encoded as a signed 32-bit length followed by UTF-8 bytes:
//! ```text
//! ┌───────────┬─────────────┐
//! │ Length    │ Bytes       │
//! │ 4 bytes   │ n bytes     │
//! │ int32 BE  │ UTF-8       │
//! └───────────┴─────────────┘
//! ```
//! A length of `-1` denotes a null string (no bytes follow), `0` an empty
//! string, and any positive `n` exactly `n` UTF-8 bytes.
//!
//! Frames are one signed 32-bit big-endian length followed by that many
//! payload bytes. A frame length of `0` is the reserved close signal in
//! both directions.

use std::io::{self, Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the frame length prefix in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Error produced while decoding a frame payload.
///
/// Decode failures never cross the channel boundary as panics; the caller
/// reports them to the diagnostic channel and treats the exchange as dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload ended before the announced data was read.
    #[error("truncated payload: needed {needed} more bytes")]
    Truncated {
        /// Number of missing bytes.
        needed: usize,
    },

    /// A string length prefix below the `-1` null sentinel.
    #[error("invalid string length {0}")]
    InvalidStringLength(i32),

    /// A null string in a position that requires a value.
    #[error("unexpected null string")]
    UnexpectedNull,

    /// A negative property count.
    #[error("negative property count {0}")]
    NegativePropertyCount(i32),

    /// String bytes were not valid UTF-8.
    #[error("invalid UTF-8 in string: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Append a length-prefixed string to `buf`, `None` encoding as the `-1`
/// null sentinel.
pub fn put_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        None => buf.put_i32(-1),
        Some(s) => {
            let bytes = s.as_bytes();
            buf.put_i32(bytes.len() as i32);
            buf.put_slice(bytes);
        }
    }
}

/// Cursor over a frame payload with checked, big-endian reads.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Create a reader over a payload.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::Truncated {
                needed: n - self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    /// Read a big-endian signed 32-bit integer.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a big-endian signed 64-bit integer.
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let b = self.take(8)?;
        Ok(i64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a length-prefixed string, the `-1` sentinel decoding to `None`.
    pub fn read_string(&mut self) -> Result<Option<String>, DecodeError> {
        let length = self.read_i32()?;
        if length < -1 {
            return Err(DecodeError::InvalidStringLength(length));
        }
        if length == -1 {
            return Ok(None);
        }
        let bytes = self.take(length as usize)?;
        Ok(Some(String::from_utf8(bytes.to_vec())?))
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

/// Write one length-prefixed frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&(payload.len() as i32).to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Write the zero-length close frame and flush.
pub fn write_close_frame<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(&0i32.to_be_bytes())?;
    writer.flush()
}

/// Read one length-prefixed frame, blocking until it is complete.
///
/// Returns `None` for the zero-length close frame. A negative declared
/// length is reported as an I/O error; the connection is unusable after it.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Bytes>> {
    let mut head = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut head)?;
    let length = i32::from_be_bytes(head);
    if length == 0 {
        return Ok(None);
    }
    if length < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("negative frame length {length}"),
        ));
    }
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;
    Ok(Some(Bytes::from(payload)))
}
