use super::protocol::{MAX_PAYLOAD_SIZE, MessageType, Packet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("buffer underrun reading {field}: need {needed} bytes, {remaining} left")]
    Underrun {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 { field: &'static str },
    #[error("unknown message type {0}")]
    UnknownMessageType(u16),
    #[error("expected {expected:?} body, got message type {actual}")]
    UnexpectedType { expected: MessageType, actual: u16 },
    #[error("payload of {size} bytes exceeds {max}")]
    Oversize { size: usize, max: usize },
}

/// Writes POD fields in declaration order, host byte order, no padding.
#[derive(Debug, Default)]
pub struct Serializer {
    buf: Vec<u8>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// `u32` byte length followed by the raw UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self, message_type: MessageType) -> Result<Packet, CodecError> {
        if self.buf.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::Oversize {
                size: self.buf.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Packet::new(message_type, self.buf))
    }
}

/// Reads POD fields back in the order they were written. Every read names
/// the field so underruns can be reported precisely.
#[derive(Debug)]
pub struct Deserializer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Deserializer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, field: &'static str, needed: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < needed {
            return Err(CodecError::Underrun {
                field,
                needed,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(field, N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(field, 1)?[0])
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, CodecError> {
        self.take_array(field).map(u16::from_ne_bytes)
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        self.take_array(field).map(u32::from_ne_bytes)
    }

    pub fn read_f32(&mut self, field: &'static str) -> Result<f32, CodecError> {
        self.take_array(field).map(f32::from_ne_bytes)
    }

    pub fn read_bool(&mut self, field: &'static str) -> Result<bool, CodecError> {
        Ok(self.read_u8(field)? != 0)
    }

    pub fn read_string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let len = self.read_u32(field)? as usize;
        let bytes = self.take(field, len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { field })
    }
}

/// Cuts `value` to at most `max_bytes` without splitting a character.
pub fn truncate_utf8(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
