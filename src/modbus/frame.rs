use std::fmt;

use super::crc::crc16_modbus;
use crate::utils::error::ModbusError;

/// Maximum PDU size (function code + data) allowed by the protocol.
pub const MAX_PDU_SIZE: usize = 253;
/// Maximum data bytes in a request payload (PDU minus the function code).
pub const MAX_PAYLOAD_SIZE: usize = MAX_PDU_SIZE - 1;
/// Shortest possible frame: address + function code + 2 CRC bytes.
pub const MIN_FRAME_SIZE: usize = 4;
/// High bit of the function code marks an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Function codes this client speaks.
pub mod function {
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const DIAGNOSTICS: u8 = 0x08;
}

/// Fault code carried by an exception response. Codes outside the closed
/// set pass through as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Other(u8),
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            1 => ExceptionCode::IllegalFunction,
            2 => ExceptionCode::IllegalDataAddress,
            3 => ExceptionCode::IllegalDataValue,
            4 => ExceptionCode::ServerDeviceFailure,
            other => ExceptionCode::Other(other),
        }
    }
}

impl ExceptionCode {
    pub fn code(&self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 1,
            ExceptionCode::IllegalDataAddress => 2,
            ExceptionCode::IllegalDataValue => 3,
            ExceptionCode::ServerDeviceFailure => 4,
            ExceptionCode::Other(code) => *code,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionCode::IllegalFunction => write!(f, "illegal function (1)"),
            ExceptionCode::IllegalDataAddress => write!(f, "illegal data address (2)"),
            ExceptionCode::IllegalDataValue => write!(f, "illegal data value (3)"),
            ExceptionCode::ServerDeviceFailure => write!(f, "server device failure (4)"),
            ExceptionCode::Other(code) => write!(f, "exception code {}", code),
        }
    }
}

/// A validated response with the CRC already stripped off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub address: u8,
    pub function: u8,
    pub data: Vec<u8>,
}

/// Build an outbound RTU frame: `[address, function, payload.., crc_lo, crc_hi]`.
pub fn encode_request(address: u8, function: u8, payload: &[u8]) -> Result<Vec<u8>, ModbusError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ModbusError::PayloadTooLong(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(address);
    frame.push(function);
    frame.extend_from_slice(payload);

    let crc = crc16_modbus(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Validate and strip an inbound frame.
///
/// Frames too short to carry address + function + CRC are indistinguishable
/// from corruption and reported as `CrcError`, as is a nonzero CRC residue.
/// A set exception flag yields `RequestError` carrying the fault code.
pub fn decode_response(frame: &[u8]) -> Result<Response, ModbusError> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(ModbusError::CrcError);
    }
    if crc16_modbus(frame) != 0 {
        return Err(ModbusError::CrcError);
    }

    let body = &frame[..frame.len() - 2];
    let address = body[0];
    let function = body[1];

    if function & EXCEPTION_FLAG != 0 {
        // Exception responses carry exactly one fault byte
        let code = *body.get(2).ok_or(ModbusError::CrcError)?;
        return Err(ModbusError::RequestError(ExceptionCode::from(code)));
    }

    Ok(Response {
        address,
        function,
        data: body[2..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_crc(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&crc16_modbus(body).to_le_bytes());
        frame
    }

    #[test]
    fn test_encode_request_layout() {
        let frame = encode_request(7, 3, &[0x00, 0x0A, 0x00, 0x01]).unwrap();
        assert_eq!(&frame[..6], &[7, 3, 0x00, 0x0A, 0x00, 0x01]);
        assert_eq!(frame.len(), 8);
        assert_eq!(crc16_modbus(&frame), 0);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            encode_request(1, 3, &payload),
            Err(ModbusError::PayloadTooLong(MAX_PAYLOAD_SIZE + 1))
        );
        assert!(encode_request(1, 3, &vec![0u8; MAX_PAYLOAD_SIZE]).is_ok());
    }

    #[test]
    fn test_round_trip() {
        let frame = encode_request(0x11, 0x06, &[0x00, 0x64, 0x12, 0x34]).unwrap();
        let response = decode_response(&frame).unwrap();
        assert_eq!(response.address, 0x11);
        assert_eq!(response.function, 0x06);
        assert_eq!(response.data, vec![0x00, 0x64, 0x12, 0x34]);
    }

    #[test]
    fn test_decode_short_frame_is_crc_error() {
        assert_eq!(decode_response(&[]), Err(ModbusError::CrcError));
        assert_eq!(decode_response(&[0x01, 0x03, 0xFF]), Err(ModbusError::CrcError));
    }

    #[test]
    fn test_decode_corrupted_frame() {
        let mut frame = encode_request(7, 3, &[0x02, 0xAB, 0xCD]).unwrap();
        frame[3] ^= 0x10;
        assert_eq!(decode_response(&frame), Err(ModbusError::CrcError));
    }

    #[test]
    fn test_decode_exception_response() {
        let frame = with_crc(&[7, 3 | EXCEPTION_FLAG, 4]);
        assert_eq!(
            decode_response(&frame),
            Err(ModbusError::RequestError(ExceptionCode::ServerDeviceFailure))
        );

        let frame = with_crc(&[7, 3 | EXCEPTION_FLAG, 2]);
        assert_eq!(
            decode_response(&frame),
            Err(ModbusError::RequestError(ExceptionCode::IllegalDataAddress))
        );
    }

    #[test]
    fn test_unknown_exception_code_passes_through() {
        let frame = with_crc(&[7, 8 | EXCEPTION_FLAG, 0x0B]);
        assert_eq!(
            decode_response(&frame),
            Err(ModbusError::RequestError(ExceptionCode::Other(0x0B)))
        );
    }

    #[test]
    fn test_all_zero_read_is_crc_error() {
        // A transport hiccup can hand back zero-filled garbage; it must be
        // reported as corruption, never panic
        assert_eq!(decode_response(&[0u8; 8]), Err(ModbusError::CrcError));
    }
}
