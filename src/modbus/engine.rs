use log::{debug, warn};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

use super::frame::{self, decode_response, encode_request, ExceptionCode};
use super::transport::{read_frame, send_frame, Transport};
use crate::utils::error::ModbusError;

/// Default per-attempt response deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
/// Default attempt budget for both retry scopes.
pub const DEFAULT_ATTEMPTS: u32 = 5;
/// Fixed backoff before retrying after a response timeout.
pub const TIMEOUT_BACKOFF: Duration = Duration::from_millis(10);

/// Per-request tuning knobs. Both retry scopes share the attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub attempts: u32,
    pub timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RequestOptions {
    pub fn new(attempts: u32, timeout: Duration) -> Self {
        Self { attempts, timeout }
    }
}

/// Request payload in any of its accepted shapes, normalized to wire bytes
/// before the retry scopes run. Register values are encoded big-endian,
/// the standard Modbus convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    Raw(Vec<u8>),
    Word(u16),
    Words(Vec<u16>),
}

impl RequestPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            RequestPayload::Raw(bytes) => bytes.clone(),
            RequestPayload::Word(word) => word.to_be_bytes().to_vec(),
            RequestPayload::Words(words) => {
                let mut bytes = Vec::with_capacity(words.len() * 2);
                for word in words {
                    bytes.extend_from_slice(&word.to_be_bytes());
                }
                bytes
            }
        }
    }
}

impl From<Vec<u8>> for RequestPayload {
    fn from(bytes: Vec<u8>) -> Self {
        RequestPayload::Raw(bytes)
    }
}

impl From<&[u8]> for RequestPayload {
    fn from(bytes: &[u8]) -> Self {
        RequestPayload::Raw(bytes.to_vec())
    }
}

impl From<u16> for RequestPayload {
    fn from(word: u16) -> Self {
        RequestPayload::Word(word)
    }
}

impl From<Vec<u16>> for RequestPayload {
    fn from(words: Vec<u16>) -> Self {
        RequestPayload::Words(words)
    }
}

impl From<&[u16]> for RequestPayload {
    fn from(words: &[u16]) -> Self {
        RequestPayload::Words(words.to_vec())
    }
}

/// Immutable name → function-code mapping for callers that address
/// functions symbolically. An unknown name is a configuration mistake,
/// not a protocol failure.
#[derive(Debug, Clone)]
pub struct FunctionTable {
    codes: HashMap<&'static str, u8>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        let mut codes = HashMap::new();
        codes.insert("read_holding_registers", frame::function::READ_HOLDING_REGISTERS);
        codes.insert("read_input_registers", frame::function::READ_INPUT_REGISTERS);
        codes.insert("write_single_coil", frame::function::WRITE_SINGLE_COIL);
        codes.insert("write_single_register", frame::function::WRITE_SINGLE_REGISTER);
        codes.insert("diagnostics", frame::function::DIAGNOSTICS);
        Self { codes }
    }
}

impl FunctionTable {
    pub fn resolve(&self, name: &str) -> Result<u8, ModbusError> {
        self.codes
            .get(name)
            .copied()
            .ok_or_else(|| ModbusError::ConfigError(format!("Unknown function name: {}", name)))
    }
}

/// One logical request: frame, send, receive, validate, with the nested
/// retry policy applied.
///
/// Inner scope (per outer attempt, bounded by `options.attempts`): CRC
/// failures and stale/foreign frames retry immediately with no backoff.
/// Outer scope (bounded by `options.attempts`): `ServerDeviceFailure`
/// exceptions retry the whole inner cycle, timeouts retry after a 10 ms
/// backoff, every other exception code surfaces immediately. Exhausting
/// either scope surfaces the last error seen.
///
/// A broadcast (address 0) is transmitted once; no device may answer it,
/// so the body is empty by definition.
pub async fn request(
    transport: &mut dyn Transport,
    server: u8,
    function: u8,
    payload: RequestPayload,
    options: RequestOptions,
) -> Result<Vec<u8>, ModbusError> {
    let frame = encode_request(server, function, &payload.to_bytes())?;

    if server == 0 {
        send_frame(transport, &frame).await?;
        return Ok(Vec::new());
    }

    let mut last_err = ModbusError::Timeout;
    for attempt in 0..options.attempts {
        match exchange(transport, server, function, &frame, &options).await {
            Ok(body) => return Ok(body),
            Err(ModbusError::RequestError(ExceptionCode::ServerDeviceFailure)) => {
                warn!(
                    "Device {} busy (attempt {}/{})",
                    server,
                    attempt + 1,
                    options.attempts
                );
                last_err = ModbusError::RequestError(ExceptionCode::ServerDeviceFailure);
            }
            Err(ModbusError::Timeout) => {
                debug!(
                    "Response timeout from device {} (attempt {}/{})",
                    server,
                    attempt + 1,
                    options.attempts
                );
                last_err = ModbusError::Timeout;
                sleep(TIMEOUT_BACKOFF).await;
            }
            // Permanent protocol rejections and exhausted CRC retries
            Err(err) => return Err(err),
        }
    }
    Err(last_err)
}

/// Resolve a symbolic function name through `table`, then `request`.
pub async fn request_named(
    transport: &mut dyn Transport,
    table: &FunctionTable,
    server: u8,
    function_name: &str,
    payload: RequestPayload,
    options: RequestOptions,
) -> Result<Vec<u8>, ModbusError> {
    let function = table.resolve(function_name)?;
    request(transport, server, function, payload, options).await
}

/// Inner retry scope: one send/receive/validate cycle per attempt,
/// retrying only on corrupted frames. Timeouts and device exceptions
/// belong to the outer scope and propagate.
async fn exchange(
    transport: &mut dyn Transport,
    server: u8,
    function: u8,
    frame: &[u8],
    options: &RequestOptions,
) -> Result<Vec<u8>, ModbusError> {
    let mut last_err = ModbusError::CrcError;
    for _ in 0..options.attempts {
        send_frame(transport, frame).await?;
        let raw = read_frame(transport, options.timeout).await?;

        match decode_response(&raw) {
            Ok(response) => {
                if response.address != server || response.function != function {
                    // A stale or foreign frame; indistinguishable from noise
                    debug!(
                        "Mismatched echo from device {}: addr {} fn {}",
                        server, response.address, response.function
                    );
                    last_err = ModbusError::CrcError;
                    continue;
                }
                return Ok(response.data);
            }
            Err(ModbusError::CrcError) => {
                debug!("CRC mismatch from device {}, retrying", server);
                last_err = ModbusError::CrcError;
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err)
}
