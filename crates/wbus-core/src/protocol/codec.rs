//! tokio-util codec over the W-Bus frame parser

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{Frame, FrameParser, ProtocolError};

/// Frame codec for a W-Bus session.
///
/// Decoding consumes input byte by byte, so partial frames stay inside the
/// parser rather than in the read buffer. Chunk boundaries therefore never
/// change which frames come out.
#[derive(Debug, Clone)]
pub struct WBusCodec {
    parser: FrameParser,
}

impl WBusCodec {
    /// Creates a codec for a session between `local` (us) and `remote`
    pub fn new(local: u8, remote: u8) -> Self {
        Self {
            parser: FrameParser::for_session(local, remote),
        }
    }

    /// Access the underlying parser (for its counters)
    pub fn parser(&self) -> &FrameParser {
        &self.parser
    }
}

impl Decoder for WBusCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while src.has_remaining() {
            let byte = src.get_u8();
            if let Some(frame) = self.parser.push(byte) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}

impl Encoder<Frame> for WBusCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.to_bytes()?;
        dst.reserve(bytes.len());
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
