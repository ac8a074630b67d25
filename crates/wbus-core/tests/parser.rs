//! Tests for W-Bus frame parsing

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wbus_core::protocol::{checksum, Address, Frame, FrameParser};

    /// Controller reply carrying a two-entry fault list, a request echo and
    /// a status reply, with line noise in between
    fn traffic() -> Vec<u8> {
        let mut bytes = vec![0x00, 0x13];
        bytes.extend([0x4f, 0x08, 0xd6, 0x01, 0x02, 0x02, 0x05, 0x06, 0x01]);
        bytes.push(checksum(&bytes[2..]));
        bytes.extend([0xf4, 0x02, 0x38, 0xce]);
        bytes.extend([0x55]);
        bytes.extend([0x4f, 0x03, 0xb8, 0x0b, 0xff]);
        bytes
    }

    fn parse_in_chunks(bytes: &[u8], chunk: usize) -> Vec<Frame> {
        let mut parser = FrameParser::for_session(0xf, 0x4);
        bytes
            .chunks(chunk)
            .flat_map(|c| parser.feed(c))
            .collect()
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let bytes = traffic();
        let whole = parse_in_chunks(&bytes, bytes.len());
        assert_eq!(whole.len(), 2);
        assert_eq!(whole[0].payload, vec![0xd6, 0x01, 0x02, 0x02, 0x05, 0x06, 0x01]);
        assert_eq!(whole[1].payload, vec![0xb8, 0x0b]);

        for chunk in 1..bytes.len() {
            assert_eq!(parse_in_chunks(&bytes, chunk), whole, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_error_list_reply() {
        let mut parser = FrameParser::for_session(0xf, 0x4);
        let frames = parser.feed(&[0x4f, 0x06, 0xd6, 0x01, 0x01, 0x02, 0x05, 0x98]);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address, Address::new(0x4, 0xf));
        assert_eq!(frames[0].payload, vec![0xd6, 0x01, 0x01, 0x02, 0x05]);
    }

    #[test]
    fn test_own_echo_produces_nothing() {
        let request = Frame::new(Address::new(0xf, 0x4), vec![0x56, 0x01]);
        let bytes = request.to_bytes().unwrap();
        assert_eq!(bytes, vec![0xf4, 0x03, 0x56, 0x01, 0xa0]);

        let mut parser = FrameParser::for_session(0xf, 0x4);
        assert!(parser.feed(&bytes).is_empty());
        assert_eq!(parser.stats().loopback, 1);
        assert!(parser.is_idle());
    }

    #[test]
    fn test_zero_length_restarts_at_next_byte() {
        let mut parser = FrameParser::for_session(0xf, 0x4);
        let frames = parser.feed(&[0x4f, 0x00, 0x4f, 0x02, 0xb8, 0xf5]);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![0xb8]);
        assert_eq!(parser.stats().bad_length, 1);
    }

    #[test]
    fn test_corrupt_checksum_dropped() {
        let mut parser = FrameParser::for_session(0xf, 0x4);
        assert!(parser.feed(&[0x4f, 0x02, 0xb8, 0x00]).is_empty());
        assert_eq!(parser.stats().bad_checksum, 1);

        // the parser recovers for the next frame
        assert_eq!(parser.feed(&[0x4f, 0x02, 0xb8, 0xf5]).len(), 1);
    }

    #[test]
    fn test_only_session_addresses_accepted() {
        let mut parser = FrameParser::for_session(0xf, 0x4);
        // valid frame from node 3 to node 0xf
        let foreign = Frame::new(Address::new(0x3, 0xf), vec![0xb8])
            .to_bytes()
            .unwrap();

        let frames = parser.feed(&foreign);
        assert!(frames.is_empty());
        assert!(parser.stats().bad_address >= 1);
    }

    #[test]
    fn test_length_one_frame_has_empty_payload() {
        let mut parser = FrameParser::for_session(0xf, 0x4);
        let frames = parser.feed(&[0x4f, 0x01, 0x4e]);

        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
        assert_eq!(frames[0].code(), None);
    }
}
