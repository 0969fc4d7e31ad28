//! Modbus TCP ADU encoding and decoding.
//!
//! ```text
//! bytes 0-1  transaction id  (echoed)
//! bytes 2-3  protocol id     (must be 0)
//! bytes 4-5  length          (bytes that follow this field)
//! byte  6    unit id         (echoed)
//! byte  7    function code
//! bytes 8..  payload
//! ```

use serde::Serialize;

use crate::error::FrameError;

/// MBAP header plus the function code byte.
pub const HEADER_LEN: usize = 8;

/// Bytes preceding the unit id (transaction id, protocol id, length).
const LENGTH_PREFIX_LEN: usize = 6;

/// Bit set on the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Function codes served by the endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Holding Registers.
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers.
    ReadInputRegisters = 0x04,
    /// Write Single Register.
    WriteSingleRegister = 0x06,
    /// Write Multiple Registers.
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    /// Maps a wire byte to a supported function code.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x06 => Some(Self::WriteSingleRegister),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }
}

/// Exception codes carried in exception responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Function code not supported.
    IllegalFunction = 0x01,
    /// Address range outside the register table.
    IllegalDataAddress = 0x02,
    /// Malformed payload or quantity out of bounds.
    IllegalDataValue = 0x03,
    /// Unexpected failure while servicing the request.
    SlaveDeviceFailure = 0x04,
    /// Used for rejected MBAP headers (wrong protocol id or length).
    GatewayTargetFailed = 0x0B,
}

/// Decoded MBAP header and function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Echoed in the response.
    pub transaction_id: u16,
    /// Always 0 for Modbus.
    pub protocol_id: u16,
    /// Byte count following the length field.
    pub length: u16,
    /// Echoed in the response.
    pub unit_id: u8,
    /// Raw function code byte.
    pub function_code: u8,
}

impl Header {
    fn parse(bytes: &[u8]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
            function_code: bytes[7],
        }
    }
}

/// A validated request: header plus the function-specific payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Header fields.
    pub header: Header,
    /// Bytes after the function code.
    pub payload: &'a [u8],
}

/// Decodes one request ADU.
///
/// # Errors
///
/// - [`FrameError::TooShort`] when fewer than [`HEADER_LEN`] bytes arrived.
/// - [`FrameError::ProtocolId`] when the protocol id is not 0.
/// - [`FrameError::LengthMismatch`] when the length field disagrees with the
///   number of bytes received.
pub fn decode(bytes: &[u8]) -> Result<Frame<'_>, FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::TooShort(bytes.len()));
    }

    let header = Header::parse(bytes);
    if header.protocol_id != 0 {
        return Err(FrameError::ProtocolId { header });
    }

    let actual = bytes.len() - LENGTH_PREFIX_LEN;
    if usize::from(header.length) != actual {
        return Err(FrameError::LengthMismatch { header, actual });
    }

    Ok(Frame {
        header,
        payload: &bytes[HEADER_LEN..],
    })
}

/// Builds a normal response: header, unit id, function code, `payload`.
///
/// The length field covers unit id, function code, and payload.
pub fn encode_response(header: &Header, function_code: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    write_header(&mut out, header, (2 + payload.len()) as u16);
    out.push(function_code);
    out.extend_from_slice(payload);
    out
}

/// Builds the 9-byte exception response for `function_code`.
pub fn encode_exception(header: &Header, function_code: u8, code: ExceptionCode) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 1);
    write_header(&mut out, header, 3);
    out.push(function_code | EXCEPTION_FLAG);
    out.push(code as u8);
    out
}

fn write_header(out: &mut Vec<u8>, header: &Header, length: u16) {
    out.extend_from_slice(&header.transaction_id.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.push(header.unit_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_request() -> Vec<u8> {
        vec![0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x7D, 0x10, 0x00, 0x02]
    }

    #[test]
    fn decodes_valid_read_request() {
        let bytes = read_request();
        let frame = decode(&bytes).expect("valid frame");
        assert_eq!(frame.header.transaction_id, 0x1234);
        assert_eq!(frame.header.protocol_id, 0);
        assert_eq!(frame.header.length, 6);
        assert_eq!(frame.header.unit_id, 1);
        assert_eq!(frame.header.function_code, 0x03);
        assert_eq!(frame.payload, &[0x7D, 0x10, 0x00, 0x02]);
    }

    #[test]
    fn short_input_is_not_a_frame() {
        for len in 0..HEADER_LEN {
            assert_eq!(decode(&read_request()[..len]), Err(FrameError::TooShort(len)));
        }
    }

    #[test]
    fn nonzero_protocol_id_is_rejected_with_header() {
        let mut bytes = read_request();
        bytes[3] = 0x01;
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::ProtocolId { .. }));
        assert_eq!(err.header().map(|h| h.transaction_id), Some(0x1234));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut bytes = read_request();
        bytes.push(0xFF);
        let err = decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                header: Header::parse(&bytes),
                actual: 7
            }
        );
    }

    #[test]
    fn header_only_frame_has_empty_payload() {
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x01, 0x2B];
        let frame = decode(&bytes).expect("valid frame");
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn exception_frame_is_nine_bytes() {
        let bytes = read_request();
        let header = decode(&bytes).expect("valid frame").header;
        let out = encode_exception(&header, 0x03, ExceptionCode::IllegalDataAddress);
        assert_eq!(out, vec![0x12, 0x34, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]);
    }

    #[test]
    fn response_length_counts_unit_function_and_payload() {
        let bytes = read_request();
        let header = decode(&bytes).expect("valid frame").header;
        let out = encode_response(&header, 0x03, &[0x04, 0x00, 0x01, 0x00, 0x02]);
        assert_eq!(u16::from_be_bytes([out[4], out[5]]), 7);
        assert_eq!(out.len(), 6 + 7);
        assert_eq!(out[7], 0x03);
    }

    #[test]
    fn function_code_lookup() {
        assert_eq!(
            FunctionCode::from_byte(0x10),
            Some(FunctionCode::WriteMultipleRegisters)
        );
        assert_eq!(FunctionCode::from_byte(0x01), None);
        assert_eq!(FunctionCode::from_byte(0x83), None);
    }
}
