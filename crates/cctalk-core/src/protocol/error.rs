//! Protocol errors

use thiserror::Error;

/// Errors that can occur on the serial link.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request #{0} write timeout")]
    WriteTimeout(u64),

    #[error("Response #{0} read timeout")]
    ResponseTimeout(u64),

    #[error("Response too short ({0} bytes)")]
    ReplyTooShort(usize),

    #[error("Response length inconsistent: length field implies {expected} bytes, got {actual}")]
    ReplyLengthMismatch { expected: usize, actual: usize },

    #[error("Response checksum does not sum to zero")]
    ChecksumMismatch,

    #[error("Response destination address {0} is not the host")]
    BadDestination(u8),

    #[error("Response source address {actual}, expected {expected}")]
    BadSource { expected: u8, actual: u8 },

    #[error("Response header {0}, expected 0 (reply)")]
    UnexpectedHeader(u8),

    #[error("Request payload too large ({0} bytes)")]
    PayloadTooLarge(usize),

    #[error("DES-encrypted ccTalk links are not supported")]
    EncryptionUnsupported,

    #[error("16-bit CRC checksums are not supported")]
    Checksum16Unsupported,

    #[error("Serial worker is gone")]
    WorkerGone,

    #[error("Port is not open")]
    NotOpen,
}
