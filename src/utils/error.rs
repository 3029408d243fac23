use thiserror::Error;

use crate::modbus::frame::ExceptionCode;

/// Every protocol failure is representable here and returned to the caller;
/// there is no fatal path. `CrcError` is retried at the inner request scope,
/// `Timeout` at the outer scope with backoff, and `RequestError` is retried
/// only for `ServerDeviceFailure`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("CRC checksum mismatch")]
    CrcError,

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Device exception: {0}")]
    RequestError(ExceptionCode),

    #[error("Invalid response from device")]
    InvalidResponse,

    #[error("Payload too long: {0} bytes exceeds the PDU data limit")]
    PayloadTooLong(usize),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => ModbusError::Timeout,
            _ => ModbusError::CommunicationError(format!("IO error: {}", err)),
        }
    }
}

impl From<serialport::Error> for ModbusError {
    fn from(err: serialport::Error) -> Self {
        ModbusError::ConnectionError(format!("Serial port error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ModbusError::Timeout
    }
}
