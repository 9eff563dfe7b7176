use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid IMEI: {0}")]
    InvalidImei(String),

    // Framing errors
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Checksum mismatch: expected {expected:#04X}, got {actual:#04X}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Frame too large: {size} bytes exceeds maximum {max_size} bytes")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("Decode error in {context}: {message}")]
    Decode { context: String, message: String },

    // State machine errors
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Transport errors
    #[error("Not connected")]
    NotConnected,

    #[error("Connection timeout after {0}s")]
    ConnectTimeout(u64),

    #[error("Login timeout after {0}s")]
    LoginTimeout(u64),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    // Bridge errors
    #[error("Bridge link not open")]
    BridgeNotOpen,

    #[error("Bridge error: {0}")]
    Bridge(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for decode errors, which always carry the decoding context.
    pub fn decode(context: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Decode {
            context: context.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
