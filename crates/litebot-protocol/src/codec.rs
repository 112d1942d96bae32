use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Not enough data: wanted {wanted}, have {have}")]
    NotEnoughData { wanted: usize, have: usize },
    #[error("Unterminated string")]
    UnterminatedString,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// An in-memory pair of byte queues: `sent` accumulates outgoing bytes until
/// flushed, `received` is consumed from the front.
#[derive(Debug, Default, Clone)]
pub struct Buffer {
    sent: BytesMut,
    received: BytesMut,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer whose receive side is pre-filled, used to parse a datagram or frame.
    pub fn from_received(data: &[u8]) -> Self {
        Self {
            sent: BytesMut::new(),
            received: BytesMut::from(data),
        }
    }

    /// Append incoming bytes to the receive side.
    pub fn receive(&mut self, data: &[u8]) {
        self.received.extend_from_slice(data);
    }

    /// Bytes still unread on the receive side.
    pub fn remaining(&self) -> usize {
        self.received.len()
    }

    /// Remove and return exactly the first `n` received bytes.
    pub fn read(&mut self, n: usize) -> CodecResult<BytesMut> {
        if self.received.len() < n {
            return Err(CodecError::NotEnoughData {
                wanted: n,
                have: self.received.len(),
            });
        }
        Ok(self.received.split_to(n))
    }

    /// Discard `n` received bytes.
    pub fn skip(&mut self, n: usize) -> CodecResult<()> {
        self.read(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        self.ensure(1)?;
        Ok(self.received.get_u8())
    }

    pub fn read_int(&mut self) -> CodecResult<i32> {
        self.ensure(4)?;
        Ok(self.received.get_i32())
    }

    pub fn read_uint(&mut self) -> CodecResult<u32> {
        self.ensure(4)?;
        Ok(self.received.get_u32())
    }

    pub fn read_int_le(&mut self) -> CodecResult<i32> {
        self.ensure(4)?;
        Ok(self.received.get_i32_le())
    }

    /// Read bytes up to a NUL terminator and decode them as Latin-1.
    /// The terminator is consumed but not returned.
    pub fn read_ascii(&mut self) -> CodecResult<String> {
        let end = self
            .received
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::UnterminatedString)?;
        let bytes = self.received.split_to(end);
        self.received.advance(1);
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    /// Append raw bytes to the send side.
    pub fn write(&mut self, data: &[u8]) {
        self.sent.extend_from_slice(data);
    }

    /// Append a string encoded byte-for-byte as Latin-1. Characters outside
    /// that range are written as `?`.
    pub fn write_str(&mut self, s: &str) {
        for c in s.chars() {
            let b = u32::from(c);
            self.sent.put_u8(if b <= 0xFF { b as u8 } else { b'?' });
        }
    }

    /// Append another buffer's pending output, flushing it.
    pub fn write_buffer(&mut self, other: &mut Buffer) {
        let data = other.flush();
        self.sent.extend_from_slice(&data);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.sent.put_u8(value);
    }

    pub fn write_int(&mut self, value: i32) {
        self.sent.put_i32(value);
    }

    pub fn write_uint(&mut self, value: u32) {
        self.sent.put_u32(value);
    }

    pub fn write_int_le(&mut self, value: i32) {
        self.sent.put_i32_le(value);
    }

    /// Take everything written so far, leaving the send side empty.
    pub fn flush(&mut self) -> BytesMut {
        self.sent.split()
    }

    /// Bytes written but not yet flushed.
    pub fn pending(&self) -> usize {
        self.sent.len()
    }

    fn ensure(&self, n: usize) -> CodecResult<()> {
        if self.received.len() < n {
            return Err(CodecError::NotEnoughData {
                wanted: n,
                have: self.received.len(),
            });
        }
        Ok(())
    }
}
