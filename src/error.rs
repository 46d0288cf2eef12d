use crate::i2c::I2cAddress;
use thiserror::Error;

/// Errors that can occur while driving I2C peripherals.
///
/// Transport failures reported by the bus come first, followed by argument
/// and configuration errors and the failures that abort a device's startup.
#[derive(Error, Debug)]
pub enum Error {
    /// The addressed device did not acknowledge.
    #[error("No device found at I2C address {address}: Device did not acknowledge (NACK)")]
    I2cNack {
        /// The address that sent the NACK.
        address: I2cAddress,
    },
    /// The transfer did not complete within the transport's timeout.
    #[error(
        "I2C timeout at address {address}: Device did not respond within timeout period. Check device power and connections."
    )]
    I2cTimeout {
        /// The address being accessed when the timeout occurred.
        address: I2cAddress,
    },
    /// General I/O error from the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Any other failure reported by the bus transport.
    #[error("I2C bus error: {0}")]
    Bus(String),
    /// The transport moved fewer bytes than requested.
    #[error("Short transfer (expected {expected} bytes, got {actual})")]
    ShortTransfer {
        /// Number of bytes requested.
        expected: usize,
        /// Number of bytes actually transferred.
        actual: usize,
    },
    /// Function argument is outside the valid range.
    #[error("Argument out of range: {0}")]
    ArgumentOutOfRange(String),
    /// Not a valid 7-bit bus address.
    #[error("Invalid 7-bit I2C address: 0x{0:02X}")]
    InvalidAddress(u8),
    /// A settings blob could not be deserialized.
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// A register descriptor names an encoding that does not exist.
    #[error("Unsupported register encoding '{0}'")]
    UnsupportedEncoding(String),
    /// No handler exists for the declared chip type.
    #[error("Unsupported device type '{0}'")]
    UnsupportedDevice(String),
    /// The chip variant lacks the requested feature.
    #[error("Feature not supported by this chip model: {0}")]
    UnsupportedFeature(String),
    /// A numeric value does not fit into the register encoding.
    #[error("Value {value} cannot be encoded as {encoding}")]
    ValueOutOfRange {
        /// The rejected value.
        value: f64,
        /// Name of the encoding.
        encoding: &'static str,
    },
    /// A point received a value of the wrong type.
    #[error("Point '{point}' cannot accept value {value}")]
    InvalidPointValue {
        /// Full point id.
        point: String,
        /// Display form of the rejected value.
        value: String,
    },
    /// The configured interrupt point does not exist on the host.
    #[error("Interrupt point '{0}' not found")]
    MissingInterruptPoint(String),
    /// A point id was used that the host does not know.
    #[error("Unknown point '{0}'")]
    UnknownPoint(String),
}

impl Error {
    /// True for failures reported by the bus transport itself (NACK,
    /// timeout, I/O). Callers treat these as "this attempt failed".
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::I2cNack { .. }
                | Error::I2cTimeout { .. }
                | Error::Io(_)
                | Error::Bus(_)
                | Error::ShortTransfer { .. }
        )
    }
}

/// Result type alias for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

// Helpers for creating specific UnsupportedFeature errors
pub(crate) fn unsupported_keypad(variant: &str) -> Error {
    Error::UnsupportedFeature(format!("{} has no keypad engine", variant))
}
pub(crate) fn unsupported_level_shifter(variant: &str) -> Error {
    Error::UnsupportedFeature(format!("{} has no level shifter", variant))
}
