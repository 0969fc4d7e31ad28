//! Request validation and routing onto a [`RegisterTable`].
//!
//! Every decoded request produces exactly one response frame. Frames too short
//! to carry a header produce none.

use std::sync::Mutex;

use tracing::{debug, error, warn};

use super::codec::{self, ExceptionCode, Frame, FunctionCode};
use super::table::RegisterTable;
use crate::error::{FrameError, TableError};

/// Largest register count a single read may request.
pub const MAX_READ_QUANTITY: u16 = 125;

/// Why a recognised request could not be serviced.
#[derive(Debug)]
enum RequestError {
    /// Validation failure answered with a standard exception code.
    Rejected(ExceptionCode),
    /// Anything unexpected; answered with [`ExceptionCode::SlaveDeviceFailure`].
    Internal(TableError),
}

impl From<TableError> for RequestError {
    fn from(err: TableError) -> Self {
        Self::Internal(err)
    }
}

type RequestResult = Result<Vec<u8>, RequestError>;

/// Decodes `bytes` and services the request against `table`.
///
/// Returns `None` for input too short to carry a header; such input cannot be
/// answered because none of its header fields can be trusted. Header
/// rejections are answered with exception `0x0B` using the peer's own
/// transaction id, unit id, and function code.
pub fn handle_frame(bytes: &[u8], table: &Mutex<RegisterTable>) -> Option<Vec<u8>> {
    match codec::decode(bytes) {
        Ok(frame) => Some(dispatch(&frame, table)),
        Err(FrameError::TooShort(len)) => {
            debug!(len, "dropping frame shorter than header");
            None
        }
        Err(err) => {
            warn!(%err, "rejecting frame header");
            err.header().map(|header| {
                codec::encode_exception(
                    header,
                    header.function_code,
                    ExceptionCode::GatewayTargetFailed,
                )
            })
        }
    }
}

/// Routes a validated frame by function code and builds the response.
pub fn dispatch(frame: &Frame<'_>, table: &Mutex<RegisterTable>) -> Vec<u8> {
    let header = &frame.header;
    let function_code = header.function_code;
    debug!(
        transaction_id = header.transaction_id,
        unit_id = header.unit_id,
        function_code,
        "modbus request"
    );

    let result = match FunctionCode::from_byte(function_code) {
        Some(FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters) => {
            read_registers(frame.payload, table)
        }
        Some(FunctionCode::WriteSingleRegister) => write_single_register(frame.payload, table),
        Some(FunctionCode::WriteMultipleRegisters) => {
            write_multiple_registers(frame.payload, table)
        }
        None => Err(RequestError::Rejected(ExceptionCode::IllegalFunction)),
    };

    match result {
        Ok(payload) => codec::encode_response(header, function_code, &payload),
        Err(RequestError::Rejected(code)) => {
            debug!(function_code, ?code, "request rejected");
            codec::encode_exception(header, function_code, code)
        }
        Err(RequestError::Internal(err)) => {
            error!(function_code, %err, "failed to service request");
            codec::encode_exception(header, function_code, ExceptionCode::SlaveDeviceFailure)
        }
    }
}

fn be_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn lock(table: &Mutex<RegisterTable>) -> Result<std::sync::MutexGuard<'_, RegisterTable>, TableError> {
    table.lock().map_err(|_| TableError::Poisoned)
}

fn read_registers(payload: &[u8], table: &Mutex<RegisterTable>) -> RequestResult {
    if payload.len() < 4 {
        return Err(RequestError::Rejected(ExceptionCode::IllegalDataValue));
    }
    let start = be_u16(payload, 0);
    let quantity = be_u16(payload, 2);
    if !(1..=MAX_READ_QUANTITY).contains(&quantity) {
        return Err(RequestError::Rejected(ExceptionCode::IllegalDataValue));
    }

    let table = lock(table)?;
    if !table.contains_range(start, quantity) {
        return Err(RequestError::Rejected(ExceptionCode::IllegalDataAddress));
    }
    let values = table.read(start, quantity)?;

    let mut out = Vec::with_capacity(1 + values.len() * 2);
    out.push((values.len() * 2) as u8);
    for value in values {
        out.extend_from_slice(&value.to_be_bytes());
    }
    Ok(out)
}

fn write_single_register(payload: &[u8], table: &Mutex<RegisterTable>) -> RequestResult {
    if payload.len() < 4 {
        return Err(RequestError::Rejected(ExceptionCode::IllegalDataValue));
    }
    let address = be_u16(payload, 0);
    let value = be_u16(payload, 2);

    let mut table = lock(table)?;
    if !table.contains_range(address, 1) {
        return Err(RequestError::Rejected(ExceptionCode::IllegalDataAddress));
    }
    table.set(address, value)?;
    Ok(payload[..4].to_vec())
}

fn write_multiple_registers(payload: &[u8], table: &Mutex<RegisterTable>) -> RequestResult {
    if payload.len() < 5 {
        return Err(RequestError::Rejected(ExceptionCode::IllegalDataValue));
    }
    let start = be_u16(payload, 0);
    let quantity = be_u16(payload, 2);
    let byte_count = usize::from(payload[4]);
    let data = &payload[5..];
    if data.len() < byte_count || byte_count < usize::from(quantity) * 2 {
        return Err(RequestError::Rejected(ExceptionCode::IllegalDataValue));
    }

    let values: Vec<u16> = data
        .chunks_exact(2)
        .take(usize::from(quantity))
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    let mut table = lock(table)?;
    if !table.contains_range(start, quantity) {
        return Err(RequestError::Rejected(ExceptionCode::IllegalDataAddress));
    }
    table.write(start, &values)?;
    Ok(payload[..4].to_vec())
}
