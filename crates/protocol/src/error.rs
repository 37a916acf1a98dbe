use thiserror::Error;

/// Errors produced while encoding or decoding packets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("payload too large for length prefix: {0} bytes")]
    Oversize(usize),

    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    #[error("unexpected trailing bytes: {0}")]
    TrailingBytes(usize),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Result type for packet operations
pub type PacketResult<T> = std::result::Result<T, PacketError>;
