pub mod client;
pub mod crc;
pub mod engine;
pub mod frame;
pub mod transport;

pub use client::{ModbusClient, RegisterAccess};
pub use crc::crc16_modbus;
pub use engine::{request, request_named, FunctionTable, RequestOptions, RequestPayload};
pub use frame::{decode_response, encode_request, ExceptionCode, Response};
pub use transport::{read_frame, send_frame, SerialTransport, Transport};
