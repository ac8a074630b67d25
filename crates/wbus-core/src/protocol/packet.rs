//! Frame encoding/decoding
//!
//! Implements the W-Bus frame format and the byte-level parser that
//! recovers frames from the raw K-line stream.
//!
//! Frame format:
//! - 1 byte: address (sender id in the high nibble, receiver id in the low nibble)
//! - 1 byte: length L (payload bytes + 1 checksum byte, L >= 1)
//! - L-1 bytes: payload
//! - 1 byte: checksum (XOR of every preceding byte, including address and length)

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use super::{ProtocolError, MAX_PAYLOAD_SIZE};

/// A pair of 4-bit node ids packed into one address byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Sending node
    pub from: u8,
    /// Receiving node
    pub to: u8,
}

impl Address {
    /// Create an address; both ids are truncated to 4 bits
    pub const fn new(from: u8, to: u8) -> Self {
        Self {
            from: from & 0x0f,
            to: to & 0x0f,
        }
    }

    /// Unpack an address byte
    pub const fn from_byte(byte: u8) -> Self {
        Self {
            from: byte >> 4,
            to: byte & 0x0f,
        }
    }

    /// Pack into the wire representation `(from << 4) | to`
    pub const fn to_byte(self) -> u8 {
        (self.from << 4) | self.to
    }

    /// The address a reply to this address carries
    pub const fn inverse(self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}->{:#x}", self.from, self.to)
    }
}

/// One checksum-validated W-Bus message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sender/receiver pair
    pub address: Address,
    /// Payload bytes (without length and checksum)
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame with the given payload
    pub fn new(address: Address, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            payload: payload.into(),
        }
    }

    /// First payload byte, the request or response code
    pub fn code(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Get the total encoded size
    pub fn encoded_size(&self) -> usize {
        self.payload.len() + 3
    }

    /// Encode the frame to wire bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge(self.payload.len()));
        }

        let mut bytes = Vec::with_capacity(self.encoded_size());
        bytes.push(self.address.to_byte());
        bytes.push(self.payload.len() as u8 + 1);
        bytes.extend_from_slice(&self.payload);
        bytes.push(checksum(&bytes));
        Ok(bytes)
    }

    /// Decode exactly one complete frame from raw bytes.
    ///
    /// Unlike [`FrameParser`] this does not filter on address; it only
    /// checks structure and checksum.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 3 {
            return Err(ProtocolError::InvalidFrame(format!(
                "{} bytes is shorter than a header",
                data.len()
            )));
        }

        let length = data[1] as usize;
        if length == 0 {
            return Err(ProtocolError::InvalidFrame("zero length".to_string()));
        }
        if data.len() != length + 2 {
            return Err(ProtocolError::InvalidFrame(format!(
                "declared length {} does not match {} bytes",
                length,
                data.len()
            )));
        }

        let (body, trailer) = data.split_at(data.len() - 1);
        let expected = checksum(body);
        if trailer[0] != expected {
            return Err(ProtocolError::InvalidFrame(format!(
                "checksum {:#04x}, expected {:#04x}",
                trailer[0], expected
            )));
        }

        Ok(Self {
            address: Address::from_byte(data[0]),
            payload: data[2..data.len() - 1].to_vec(),
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.address)?;
        for (i, byte) in self.payload.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "]")
    }
}

/// XOR fold of a byte slice
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Address,
    Length,
    Payload,
    Checksum,
}

/// Counters of what the parser accepted and dropped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    /// Frames emitted
    pub frames: u64,
    /// Valid frames dropped as our own echo
    pub loopback: u64,
    /// Bytes discarded while looking for an address
    pub bad_address: u64,
    /// Frames aborted by a zero length byte
    pub bad_length: u64,
    /// Frames dropped on checksum mismatch
    pub bad_checksum: u64,
}

/// Byte-at-a-time W-Bus frame parser.
///
/// Only two address bytes are legal in a session: `incoming` (replies from
/// the controller) and `outgoing` (our own transmissions echoed back by the
/// K-line). Both are parsed; frames carrying `outgoing` are dropped once
/// their checksum has been verified.
#[derive(Debug, Clone)]
pub struct FrameParser {
    incoming: u8,
    outgoing: u8,
    state: ParseState,
    address: u8,
    length: u8,
    payload: Vec<u8>,
    stats: ParserStats,
}

impl FrameParser {
    /// Create a parser accepting the two given address bytes
    pub fn new(incoming: u8, outgoing: u8) -> Self {
        Self {
            incoming,
            outgoing,
            state: ParseState::Address,
            address: 0,
            length: 0,
            payload: Vec::new(),
            stats: ParserStats::default(),
        }
    }

    /// Create a parser for a session between `local` (us) and `remote`
    pub fn for_session(local: u8, remote: u8) -> Self {
        Self::new(
            Address::new(remote, local).to_byte(),
            Address::new(local, remote).to_byte(),
        )
    }

    /// Counters since creation
    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Whether the parser is between frames
    pub fn is_idle(&self) -> bool {
        self.state == ParseState::Address
    }

    /// Feed a chunk of bytes, returning every frame it completes
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Feed one byte
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            ParseState::Address => {
                if byte != self.incoming && byte != self.outgoing {
                    warn!("W-Bus: malformed address byte {:#04x}, skipping", byte);
                    self.stats.bad_address += 1;
                    return None;
                }
                self.address = byte;
                self.state = ParseState::Length;
                None
            }
            ParseState::Length => {
                if byte == 0 {
                    warn!("W-Bus: zero length after address {:#04x}, resetting", self.address);
                    self.stats.bad_length += 1;
                    self.state = ParseState::Address;
                    return None;
                }
                self.length = byte;
                self.payload.clear();
                self.payload.reserve(byte as usize - 1);
                self.state = if byte == 1 {
                    ParseState::Checksum
                } else {
                    ParseState::Payload
                };
                None
            }
            ParseState::Payload => {
                self.payload.push(byte);
                if self.payload.len() + 1 >= self.length as usize {
                    self.state = ParseState::Checksum;
                }
                None
            }
            ParseState::Checksum => {
                self.state = ParseState::Address;

                let expected =
                    self.address ^ self.length ^ checksum(&self.payload);
                if byte != expected {
                    warn!(
                        "W-Bus: checksum mismatch {:#04x} != {:#04x}, dropping frame",
                        byte, expected
                    );
                    self.stats.bad_checksum += 1;
                    return None;
                }

                if self.address == self.outgoing {
                    debug!("W-Bus: loopback frame ignored");
                    self.stats.loopback += 1;
                    return None;
                }

                self.stats.frames += 1;
                Some(Frame {
                    address: Address::from_byte(self.address),
                    payload: std::mem::take(&mut self.payload),
                })
            }
        }
    }
}
