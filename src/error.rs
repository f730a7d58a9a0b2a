//! Error types for chakra-drive

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// chakra-drive error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration file write error
    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Unknown device type in config
    #[error("Unknown device type: {0}")]
    UnknownDevice(String),

    /// Device not initialized
    #[error("Device not initialized")]
    NotInitialized,

    /// Device initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Communication timeout
    #[error("Communication timeout")]
    Timeout,

    /// Invalid packet or response
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Checksum mismatch
    #[error("Checksum error: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumError {
        /// Expected checksum value
        expected: u16,
        /// Actual checksum value
        actual: u16,
    },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A worker thread could not be spawned or has gone away
    #[error("Thread error: {0}")]
    Thread(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
