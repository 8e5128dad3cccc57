//! Error types for the esp-ble-prov crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No advertising peripheral matched the requested name.
    #[error("Device not found: {name}")]
    DeviceNotFound {
        /// The advertised name that was searched for.
        name: String,
    },

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The secure session handshake was rejected or could not complete.
    #[error("Handshake failed ({code}): {message}")]
    HandshakeFailed {
        /// Numeric code reported by the device or the session layer.
        code: i32,
        /// Human readable description.
        message: String,
    },

    /// The device dropped the connection while a request was in flight.
    #[error("Device disconnected unexpectedly")]
    DisconnectedUnexpectedly,

    /// An application endpoint rejected or failed a request.
    #[error("Endpoint {endpoint} failed ({code}): {message}")]
    EndpointSendFailed {
        /// The endpoint the payload was addressed to.
        endpoint: String,
        /// Numeric code of the underlying failure.
        code: i32,
        /// Human readable description.
        message: String,
    },

    /// The device does not expose the named endpoint.
    #[error("Endpoint not found: {endpoint}")]
    EndpointNotFound {
        /// Name of the endpoint that was not found.
        endpoint: String,
    },

    /// Invalid data was received from the device.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// CRC check failed for a framed message.
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// The expected CRC value.
        expected: u16,
        /// The actual CRC value received.
        actual: u16,
    },

    /// A step of the provisioning sequence did not complete in time.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// The step that timed out.
        operation: String,
    },

    /// The device answered a request with a non-zero status.
    #[error("Device reported error status {code}")]
    DeviceError {
        /// The status byte returned by the device.
        code: u8,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Numeric code carried to the boundary, stringified by the method channel.
    pub fn code(&self) -> i32 {
        match self {
            Self::Bluetooth(_) => 1,
            Self::BluetoothUnavailable => 27,
            Self::DeviceNotFound { .. } => 27,
            Self::ConnectionFailed { .. } => 2,
            Self::HandshakeFailed { code, .. } => *code,
            Self::DisconnectedUnexpectedly => 3,
            Self::EndpointSendFailed { code, .. } => *code,
            Self::EndpointNotFound { .. } => 4,
            Self::InvalidData { .. } => 5,
            Self::CrcMismatch { .. } => 6,
            Self::Timeout { .. } => 7,
            Self::DeviceError { code } => i32::from(*code),
            Self::InvalidParameter { .. } => 8,
            Self::Internal(_) => 9,
        }
    }

    /// Whether the error means "no BLE hardware" and should read as an empty scan.
    pub fn is_bluetooth_unavailable(&self) -> bool {
        matches!(self, Self::BluetoothUnavailable)
    }

    pub(crate) fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_preserve_wrapped_values() {
        let err = Error::HandshakeFailed {
            code: 13,
            message: "bad proof".to_string(),
        };
        assert_eq!(err.code(), 13);
        assert_eq!(err.to_string(), "Handshake failed (13): bad proof");

        assert_eq!(Error::DeviceError { code: 4 }.code(), 4);
        assert_eq!(Error::BluetoothUnavailable.code(), 27);
    }

    #[test]
    fn test_bluetooth_unavailable_check() {
        assert!(Error::BluetoothUnavailable.is_bluetooth_unavailable());
        assert!(!Error::DisconnectedUnexpectedly.is_bluetooth_unavailable());
    }
}
