use crate::config::{MAGIC_BYTES, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
use crate::error::{DimError, Result};

/// Magic(4) + Version(1) + Length(4)
pub const HEADER_SIZE: usize = 9;

/// A single framed unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload,
        }
    }

    /// Size of this packet once encoded.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&MAGIC_BYTES);
        out.push(self.version);
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a complete packet from `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let length = parse_header(buf)?;
        let end = HEADER_SIZE + length;
        if buf.len() < end {
            return Err(DimError::InvalidHeader);
        }
        Ok(Self {
            version: buf[4],
            payload: buf[HEADER_SIZE..end].to_vec(),
        })
    }
}

/// Validate a packet header and return the declared payload length.
///
/// Requires at least [`HEADER_SIZE`] bytes.
pub(crate) fn parse_header(buf: &[u8]) -> Result<usize> {
    if buf.len() < HEADER_SIZE || buf[..4] != MAGIC_BYTES {
        return Err(DimError::InvalidHeader);
    }
    if buf[4] != PROTOCOL_VERSION {
        return Err(DimError::UnsupportedVersion(buf[4]));
    }
    let length = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
    if length > MAX_PAYLOAD_SIZE {
        return Err(DimError::OversizedPacket(length));
    }
    Ok(length)
}
