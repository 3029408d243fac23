//! Modbus RTU Client Engine
//!
//! This library implements the client side of the Modbus RTU protocol over
//! an asynchronous serial line: frame construction, CRC-16 integrity
//! checking, silence-based frame delimiting, timeout detection, and a
//! two-level retry policy that turns a noisy half-duplex byte stream into
//! a request call with bounded failure modes.

pub mod cli;
pub mod config;
pub mod modbus;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, ParityConfig};
pub use modbus::{
    crc16_modbus, decode_response, encode_request, ExceptionCode, FunctionTable, ModbusClient,
    RegisterAccess, RequestOptions, RequestPayload, Response, SerialTransport, Transport,
};
pub use utils::error::ModbusError;

pub const VERSION: &str = "0.1.0";
