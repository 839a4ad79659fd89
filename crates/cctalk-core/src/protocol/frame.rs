//! Frame encoding/decoding
//!
//! Implements the ccTalk frame layout shared by requests and responses
//! (source and destination swap direction):
//!
//! - 1 byte: destination address
//! - 1 byte: payload length L
//! - 1 byte: source address
//! - 1 byte: command header
//! - L bytes: payload
//! - 1 byte: checksum, chosen so the unsigned sum of all frame bytes
//!   modulo 256 equals zero

use super::{ProtocolError, MAX_PAYLOAD};

/// A decoded ccTalk frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination address (device for requests, host for responses).
    pub destination: u8,
    /// Source address.
    pub source: u8,
    /// Command header byte; 0 marks a reply.
    pub header: u8,
    /// Payload, up to 255 bytes. Empty payload on a reply is an ACK.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame.
    pub fn new(destination: u8, source: u8, header: u8, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Self {
            destination,
            source,
            header,
            payload,
        }
    }

    /// Decode a frame from raw bytes, verifying size consistency and the
    /// zero-sum checksum.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 5 {
            return Err(ProtocolError::ReplyTooShort(data.len()));
        }

        let length = data[1] as usize;
        if data.len() != 5 + length {
            return Err(ProtocolError::ReplyLengthMismatch {
                expected: 5 + length,
                actual: data.len(),
            });
        }

        if checksum(data) != 0 {
            return Err(ProtocolError::ChecksumMismatch);
        }

        Ok(Self {
            destination: data[0],
            source: data[2],
            header: data[3],
            payload: data[4..4 + length].to_vec(),
        })
    }

    /// Encode the frame to raw bytes, appending the checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.push(self.destination);
        bytes.push(self.payload.len() as u8);
        bytes.push(self.source);
        bytes.push(self.header);
        bytes.extend_from_slice(&self.payload);
        bytes.push(0u8.wrapping_sub(checksum(&bytes)));
        bytes
    }

    /// Total encoded size including the checksum byte.
    pub fn encoded_len(&self) -> usize {
        5 + self.payload.len()
    }
}

/// Unsigned sum of all bytes modulo 256. A well-formed frame sums to zero.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let original = Frame::new(2, 1, 254, vec![]);
        let encoded = original.to_bytes();
        let decoded = Frame::from_bytes(&encoded).expect("should decode");
        assert_eq!(original, decoded);
    }

    #[test]
    fn simple_poll_wire_bytes() {
        // SimplePoll to address 2: 02 00 01 FE, checksum FF.
        let frame = Frame::new(2, 1, 254, vec![]);
        assert_eq!(frame.to_bytes(), vec![0x02, 0x00, 0x01, 0xfe, 0xff]);
    }

    #[test]
    fn checksum_law() {
        let frames = [
            Frame::new(2, 1, 231, vec![0xff, 0xff]),
            Frame::new(40, 1, 157, vec![7]),
            Frame::new(1, 2, 0, vec![1, 2, 3, 4, 5]),
        ];
        for frame in frames {
            assert_eq!(checksum(&frame.to_bytes()), 0);
        }
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(
            Frame::from_bytes(&[1, 0, 2, 0]),
            Err(ProtocolError::ReplyTooShort(4))
        ));
    }

    #[test]
    fn rejects_length_mismatch() {
        // Length field says 2 payload bytes, but only one is present.
        let data = [1, 2, 40, 0, 9, 0];
        assert!(matches!(
            Frame::from_bytes(&data),
            Err(ProtocolError::ReplyLengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut encoded = Frame::new(1, 2, 0, vec![0x42]).to_bytes();
        encoded[4] ^= 0xff;
        assert!(matches!(
            Frame::from_bytes(&encoded),
            Err(ProtocolError::ChecksumMismatch)
        ));
    }
}
