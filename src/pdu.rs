//! # Message Codec
//!
//! Function codes, exception codes and the protocol data unit (PDU) itself.
//! Requests and responses are closed tagged unions over the supported
//! function set; encoding and decoding are each a single `match` over the
//! tag, and the two directions are symmetric: fields are serialized in the
//! exact order the Modbus specification defines and parsed back in the same
//! order.
//!
//! Read and write counts are validated against the configured maxima before
//! any encoding happens — an oversized request is a validation error, never
//! a silently truncated frame.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModbusError, ModbusResult};

/// Modbus slave/unit identifier (0 = broadcast, 1-247 = addressed).
pub type SlaveId = u8;

/// Broadcast slave identifier: requests are transmitted but never answered.
pub const BROADCAST_SLAVE_ID: SlaveId = 0;

/// Modbus function codes supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Read Exception Status (0x07)
    ReadExceptionStatus = 0x07,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
    /// Report Slave ID (0x11)
    ReportSlaveId = 0x11,
}

impl FunctionCode {
    /// Convert from the wire byte.
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(FunctionCode::ReadCoils),
            0x02 => Ok(FunctionCode::ReadDiscreteInputs),
            0x03 => Ok(FunctionCode::ReadHoldingRegisters),
            0x04 => Ok(FunctionCode::ReadInputRegisters),
            0x05 => Ok(FunctionCode::WriteSingleCoil),
            0x06 => Ok(FunctionCode::WriteSingleRegister),
            0x07 => Ok(FunctionCode::ReadExceptionStatus),
            0x0F => Ok(FunctionCode::WriteMultipleCoils),
            0x10 => Ok(FunctionCode::WriteMultipleRegisters),
            0x11 => Ok(FunctionCode::ReportSlaveId),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to the wire byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether this is a read function.
    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
                | FunctionCode::ReadExceptionStatus
                | FunctionCode::ReportSlaveId
        )
    }

    /// Whether this is a write function.
    pub fn is_write_function(self) -> bool {
        matches!(
            self,
            FunctionCode::WriteSingleCoil
                | FunctionCode::WriteSingleRegister
                | FunctionCode::WriteMultipleCoils
                | FunctionCode::WriteMultipleRegisters
        )
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::ReadExceptionStatus => "Read Exception Status",
            FunctionCode::WriteMultipleCoils => "Write Multiple Coils",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
            FunctionCode::ReportSlaveId => "Report Slave ID",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ExceptionCode {
    /// Convert from the wire byte. Unknown codes yield `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::ServerDeviceFailure),
            0x05 => Some(ExceptionCode::Acknowledge),
            0x06 => Some(ExceptionCode::ServerDeviceBusy),
            0x08 => Some(ExceptionCode::MemoryParityError),
            0x0A => Some(ExceptionCode::GatewayPathUnavailable),
            0x0B => Some(ExceptionCode::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    /// Convert to the wire byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}", self.to_u8())
    }
}

/// Per-master codec limits applied before a read or write request is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CodecLimits {
    /// Maximum coils/discrete inputs in one read request.
    pub max_read_bit_count: u16,
    /// Maximum registers in one read request.
    pub max_read_register_count: u16,
    /// Maximum registers in one write-multiple request.
    pub max_write_register_count: u16,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_read_bit_count: crate::MAX_READ_BIT_COUNT,
            max_read_register_count: crate::MAX_READ_REGISTER_COUNT,
            max_write_register_count: crate::MAX_WRITE_REGISTER_COUNT,
        }
    }
}

/// A Modbus request PDU.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPdu {
    ReadCoils { address: u16, count: u16 },
    ReadDiscreteInputs { address: u16, count: u16 },
    ReadHoldingRegisters { address: u16, count: u16 },
    ReadInputRegisters { address: u16, count: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    ReadExceptionStatus,
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
    ReportSlaveId,
}

impl RequestPdu {
    /// The function code this request encodes to.
    pub fn function(&self) -> FunctionCode {
        match self {
            RequestPdu::ReadCoils { .. } => FunctionCode::ReadCoils,
            RequestPdu::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            RequestPdu::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            RequestPdu::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            RequestPdu::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            RequestPdu::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            RequestPdu::ReadExceptionStatus => FunctionCode::ReadExceptionStatus,
            RequestPdu::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            RequestPdu::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
            RequestPdu::ReportSlaveId => FunctionCode::ReportSlaveId,
        }
    }

    /// Validate the request against the codec limits.
    ///
    /// Called by `encode`; exposed separately so the master can reject a
    /// request before acquiring the line.
    pub fn validate(&self, limits: &CodecLimits) -> ModbusResult<()> {
        match self {
            RequestPdu::ReadCoils { address, count }
            | RequestPdu::ReadDiscreteInputs { address, count } => {
                validate_range(*address, *count)?;
                if *count > limits.max_read_bit_count {
                    return Err(ModbusError::invalid_data(format!(
                        "read bit count {} exceeds maximum {}",
                        count, limits.max_read_bit_count
                    )));
                }
                Ok(())
            }
            RequestPdu::ReadHoldingRegisters { address, count }
            | RequestPdu::ReadInputRegisters { address, count } => {
                validate_range(*address, *count)?;
                if *count > limits.max_read_register_count {
                    return Err(ModbusError::invalid_data(format!(
                        "read register count {} exceeds maximum {}",
                        count, limits.max_read_register_count
                    )));
                }
                Ok(())
            }
            RequestPdu::WriteMultipleCoils { address, values } => {
                let count = values.len() as u16;
                validate_range(*address, count)?;
                if values.is_empty() || values.len() > crate::MAX_WRITE_BIT_COUNT as usize {
                    return Err(ModbusError::invalid_data(format!(
                        "write coil count {} outside 1-{}",
                        values.len(),
                        crate::MAX_WRITE_BIT_COUNT
                    )));
                }
                Ok(())
            }
            RequestPdu::WriteMultipleRegisters { address, values } => {
                let count = values.len() as u16;
                validate_range(*address, count)?;
                if values.is_empty() || count > limits.max_write_register_count {
                    return Err(ModbusError::invalid_data(format!(
                        "write register count {} outside 1-{}",
                        values.len(),
                        limits.max_write_register_count
                    )));
                }
                Ok(())
            }
            RequestPdu::WriteSingleCoil { .. }
            | RequestPdu::WriteSingleRegister { .. }
            | RequestPdu::ReadExceptionStatus
            | RequestPdu::ReportSlaveId => Ok(()),
        }
    }

    /// Serialize the request PDU (function code + payload).
    pub fn encode(&self, limits: &CodecLimits) -> ModbusResult<Vec<u8>> {
        self.validate(limits)?;

        let mut buf = vec![self.function().to_u8()];
        match self {
            RequestPdu::ReadCoils { address, count }
            | RequestPdu::ReadDiscreteInputs { address, count }
            | RequestPdu::ReadHoldingRegisters { address, count }
            | RequestPdu::ReadInputRegisters { address, count } => {
                buf.extend_from_slice(&address.to_be_bytes());
                buf.extend_from_slice(&count.to_be_bytes());
            }
            RequestPdu::WriteSingleCoil { address, value } => {
                buf.extend_from_slice(&address.to_be_bytes());
                let wire: u16 = if *value { 0xFF00 } else { 0x0000 };
                buf.extend_from_slice(&wire.to_be_bytes());
            }
            RequestPdu::WriteSingleRegister { address, value } => {
                buf.extend_from_slice(&address.to_be_bytes());
                buf.extend_from_slice(&value.to_be_bytes());
            }
            RequestPdu::WriteMultipleCoils { address, values } => {
                let packed = pack_bits(values);
                buf.extend_from_slice(&address.to_be_bytes());
                buf.extend_from_slice(&(values.len() as u16).to_be_bytes());
                buf.push(packed.len() as u8);
                buf.extend_from_slice(&packed);
            }
            RequestPdu::WriteMultipleRegisters { address, values } => {
                buf.extend_from_slice(&address.to_be_bytes());
                buf.extend_from_slice(&(values.len() as u16).to_be_bytes());
                buf.push((values.len() * 2) as u8);
                for value in values {
                    buf.extend_from_slice(&value.to_be_bytes());
                }
            }
            RequestPdu::ReadExceptionStatus | RequestPdu::ReportSlaveId => {}
        }
        Ok(buf)
    }

    /// Parse a request PDU from the wire (responder side).
    pub fn decode(pdu: &[u8]) -> ModbusResult<Self> {
        if pdu.is_empty() {
            return Err(ModbusError::frame("empty request PDU"));
        }
        let function = FunctionCode::from_u8(pdu[0])?;
        let payload = &pdu[1..];

        match function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                let (address, count) = read_address_count(payload)?;
                Ok(match function {
                    FunctionCode::ReadCoils => RequestPdu::ReadCoils { address, count },
                    FunctionCode::ReadDiscreteInputs => {
                        RequestPdu::ReadDiscreteInputs { address, count }
                    }
                    FunctionCode::ReadHoldingRegisters => {
                        RequestPdu::ReadHoldingRegisters { address, count }
                    }
                    _ => RequestPdu::ReadInputRegisters { address, count },
                })
            }
            FunctionCode::WriteSingleCoil => {
                let (address, wire) = read_address_count(payload)?;
                let value = match wire {
                    0xFF00 => true,
                    0x0000 => false,
                    other => {
                        return Err(ModbusError::invalid_data(format!(
                            "invalid coil value 0x{:04X}",
                            other
                        )))
                    }
                };
                Ok(RequestPdu::WriteSingleCoil { address, value })
            }
            FunctionCode::WriteSingleRegister => {
                let (address, value) = read_address_count(payload)?;
                Ok(RequestPdu::WriteSingleRegister { address, value })
            }
            FunctionCode::ReadExceptionStatus => Ok(RequestPdu::ReadExceptionStatus),
            FunctionCode::WriteMultipleCoils => {
                let (address, count) = read_address_count(payload)?;
                let byte_count = *payload
                    .get(4)
                    .ok_or_else(|| ModbusError::frame("truncated write coils request"))?
                    as usize;
                let data = payload
                    .get(5..5 + byte_count)
                    .ok_or_else(|| ModbusError::frame("truncated write coils request"))?;
                if byte_count != (count as usize + 7) / 8 {
                    return Err(ModbusError::frame("byte count does not match coil count"));
                }
                let values = unpack_bits(data, count as usize);
                Ok(RequestPdu::WriteMultipleCoils { address, values })
            }
            FunctionCode::WriteMultipleRegisters => {
                let (address, count) = read_address_count(payload)?;
                let byte_count = *payload
                    .get(4)
                    .ok_or_else(|| ModbusError::frame("truncated write registers request"))?
                    as usize;
                let data = payload
                    .get(5..5 + byte_count)
                    .ok_or_else(|| ModbusError::frame("truncated write registers request"))?;
                if byte_count != count as usize * 2 {
                    return Err(ModbusError::frame(
                        "byte count does not match register count",
                    ));
                }
                let values = data
                    .chunks(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                Ok(RequestPdu::WriteMultipleRegisters { address, values })
            }
            FunctionCode::ReportSlaveId => Ok(RequestPdu::ReportSlaveId),
        }
    }
}

impl fmt::Display for RequestPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.function())
    }
}

/// A Modbus response PDU.
///
/// A device exception is its own variant rather than an optional field, so
/// a response is either data or an error description, never an ambiguous mix.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePdu {
    /// Bit values; the length is `byte_count * 8`, callers truncate to the
    /// count they requested.
    ReadCoils { values: Vec<bool> },
    ReadDiscreteInputs { values: Vec<bool> },
    ReadHoldingRegisters { values: Vec<u16> },
    ReadInputRegisters { values: Vec<u16> },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    ReadExceptionStatus { status: u8 },
    WriteMultipleCoils { address: u16, count: u16 },
    WriteMultipleRegisters { address: u16, count: u16 },
    ReportSlaveId {
        slave_id: u8,
        run_indicator: bool,
        data: Vec<u8>,
    },
    /// The device rejected the request.
    Exception {
        function: FunctionCode,
        code: ExceptionCode,
    },
}

impl ResponsePdu {
    /// The function code this response answers.
    pub fn function(&self) -> FunctionCode {
        match self {
            ResponsePdu::ReadCoils { .. } => FunctionCode::ReadCoils,
            ResponsePdu::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            ResponsePdu::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            ResponsePdu::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            ResponsePdu::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            ResponsePdu::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            ResponsePdu::ReadExceptionStatus { .. } => FunctionCode::ReadExceptionStatus,
            ResponsePdu::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            ResponsePdu::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
            ResponsePdu::ReportSlaveId { .. } => FunctionCode::ReportSlaveId,
            ResponsePdu::Exception { function, .. } => *function,
        }
    }

    /// Whether this is an exception response.
    pub fn is_exception(&self) -> bool {
        matches!(self, ResponsePdu::Exception { .. })
    }

    /// Convert an exception response into the matching error, if any.
    pub fn exception_error(&self) -> Option<ModbusError> {
        match self {
            ResponsePdu::Exception { function, code } => {
                Some(ModbusError::exception(function.to_u8(), code.to_u8()))
            }
            _ => None,
        }
    }

    /// Serialize the response PDU (responder side).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ResponsePdu::ReadCoils { values } | ResponsePdu::ReadDiscreteInputs { values } => {
                let packed = pack_bits(values);
                let mut buf = vec![self.function().to_u8(), packed.len() as u8];
                buf.extend_from_slice(&packed);
                buf
            }
            ResponsePdu::ReadHoldingRegisters { values }
            | ResponsePdu::ReadInputRegisters { values } => {
                let mut buf = vec![self.function().to_u8(), (values.len() * 2) as u8];
                for value in values {
                    buf.extend_from_slice(&value.to_be_bytes());
                }
                buf
            }
            ResponsePdu::WriteSingleCoil { address, value } => {
                let wire: u16 = if *value { 0xFF00 } else { 0x0000 };
                let mut buf = vec![self.function().to_u8()];
                buf.extend_from_slice(&address.to_be_bytes());
                buf.extend_from_slice(&wire.to_be_bytes());
                buf
            }
            ResponsePdu::WriteSingleRegister { address, value } => {
                let mut buf = vec![self.function().to_u8()];
                buf.extend_from_slice(&address.to_be_bytes());
                buf.extend_from_slice(&value.to_be_bytes());
                buf
            }
            ResponsePdu::ReadExceptionStatus { status } => {
                vec![self.function().to_u8(), *status]
            }
            ResponsePdu::WriteMultipleCoils { address, count }
            | ResponsePdu::WriteMultipleRegisters { address, count } => {
                let mut buf = vec![self.function().to_u8()];
                buf.extend_from_slice(&address.to_be_bytes());
                buf.extend_from_slice(&count.to_be_bytes());
                buf
            }
            ResponsePdu::ReportSlaveId {
                slave_id,
                run_indicator,
                data,
            } => {
                let mut buf = vec![self.function().to_u8(), (2 + data.len()) as u8];
                buf.push(*slave_id);
                buf.push(if *run_indicator { 0xFF } else { 0x00 });
                buf.extend_from_slice(data);
                buf
            }
            ResponsePdu::Exception { function, code } => {
                vec![function.to_u8() | 0x80, code.to_u8()]
            }
        }
    }

    /// Parse a response PDU from the wire (master side).
    pub fn decode(pdu: &[u8]) -> ModbusResult<Self> {
        if pdu.is_empty() {
            return Err(ModbusError::frame("empty response PDU"));
        }

        let raw_function = pdu[0];
        if raw_function & 0x80 != 0 {
            let function = FunctionCode::from_u8(raw_function & 0x7F)?;
            let raw_code = *pdu
                .get(1)
                .ok_or_else(|| ModbusError::frame("truncated exception response"))?;
            let code = ExceptionCode::from_u8(raw_code)
                .ok_or_else(|| ModbusError::protocol(format!("unknown exception code 0x{:02X}", raw_code)))?;
            return Ok(ResponsePdu::Exception { function, code });
        }

        let function = FunctionCode::from_u8(raw_function)?;
        let payload = &pdu[1..];

        match function {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
                let data = read_counted_bytes(payload)?;
                let values = unpack_bits(data, data.len() * 8);
                Ok(match function {
                    FunctionCode::ReadCoils => ResponsePdu::ReadCoils { values },
                    _ => ResponsePdu::ReadDiscreteInputs { values },
                })
            }
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                let data = read_counted_bytes(payload)?;
                if data.len() % 2 != 0 {
                    return Err(ModbusError::frame("odd register data length"));
                }
                let values: Vec<u16> = data
                    .chunks(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                Ok(match function {
                    FunctionCode::ReadHoldingRegisters => {
                        ResponsePdu::ReadHoldingRegisters { values }
                    }
                    _ => ResponsePdu::ReadInputRegisters { values },
                })
            }
            FunctionCode::WriteSingleCoil => {
                let (address, wire) = read_address_count(payload)?;
                Ok(ResponsePdu::WriteSingleCoil {
                    address,
                    value: wire == 0xFF00,
                })
            }
            FunctionCode::WriteSingleRegister => {
                let (address, value) = read_address_count(payload)?;
                Ok(ResponsePdu::WriteSingleRegister { address, value })
            }
            FunctionCode::ReadExceptionStatus => {
                let status = *payload
                    .get(0)
                    .ok_or_else(|| ModbusError::frame("truncated exception status response"))?;
                Ok(ResponsePdu::ReadExceptionStatus { status })
            }
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
                let (address, count) = read_address_count(payload)?;
                Ok(match function {
                    FunctionCode::WriteMultipleCoils => {
                        ResponsePdu::WriteMultipleCoils { address, count }
                    }
                    _ => ResponsePdu::WriteMultipleRegisters { address, count },
                })
            }
            FunctionCode::ReportSlaveId => {
                let data = read_counted_bytes(payload)?;
                if data.len() < 2 {
                    return Err(ModbusError::frame("truncated report slave id response"));
                }
                Ok(ResponsePdu::ReportSlaveId {
                    slave_id: data[0],
                    run_indicator: data[1] == 0xFF,
                    data: data[2..].to_vec(),
                })
            }
        }
    }
}

fn validate_range(start: u16, count: u16) -> ModbusResult<()> {
    if count == 0 || (start as u32 + count as u32) > 65536 {
        return Err(ModbusError::invalid_address(start, count));
    }
    Ok(())
}

fn read_address_count(payload: &[u8]) -> ModbusResult<(u16, u16)> {
    if payload.len() < 4 {
        return Err(ModbusError::frame("PDU payload too short"));
    }
    Ok((
        u16::from_be_bytes([payload[0], payload[1]]),
        u16::from_be_bytes([payload[2], payload[3]]),
    ))
}

fn read_counted_bytes(payload: &[u8]) -> ModbusResult<&[u8]> {
    let byte_count = *payload
        .get(0)
        .ok_or_else(|| ModbusError::frame("missing byte count"))? as usize;
    payload
        .get(1..1 + byte_count)
        .ok_or_else(|| ModbusError::frame("incomplete counted data"))
}

/// Pack boolean values into bytes, bit 0 first.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; (bits.len() + 7) / 8];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack bytes into boolean values, bit 0 first; missing bytes read false.
pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
    (0..bit_count)
        .map(|i| {
            bytes
                .get(i / 8)
                .map_or(false, |byte| byte & (1 << (i % 8)) != 0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(
            FunctionCode::from_u8(0x03).unwrap(),
            FunctionCode::ReadHoldingRegisters
        );
        assert_eq!(FunctionCode::ReadHoldingRegisters.to_u8(), 0x03);
        assert_eq!(
            FunctionCode::from_u8(0x11).unwrap(),
            FunctionCode::ReportSlaveId
        );
        assert!(FunctionCode::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_read_request_round_trip() {
        let request = RequestPdu::ReadHoldingRegisters {
            address: 10,
            count: 2,
        };
        let encoded = request.encode(&CodecLimits::default()).unwrap();
        assert_eq!(encoded, vec![0x03, 0x00, 0x0A, 0x00, 0x02]);
        assert_eq!(RequestPdu::decode(&encoded).unwrap(), request);
    }

    #[test]
    fn test_write_multiple_coils_round_trip() {
        let request = RequestPdu::WriteMultipleCoils {
            address: 19,
            values: vec![true, false, true, true, false, false, true, true, true, false],
        };
        let encoded = request.encode(&CodecLimits::default()).unwrap();
        // 0x0F, addr 0x0013, count 0x000A, byte count 2, 0xCD 0x01
        assert_eq!(encoded, vec![0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]);
        assert_eq!(RequestPdu::decode(&encoded).unwrap(), request);
    }

    #[test]
    fn test_count_validation() {
        let limits = CodecLimits::default();

        let oversized = RequestPdu::ReadHoldingRegisters {
            address: 0,
            count: 200,
        };
        assert!(matches!(
            oversized.encode(&limits),
            Err(ModbusError::InvalidData { .. })
        ));

        let zero = RequestPdu::ReadCoils {
            address: 0,
            count: 0,
        };
        assert!(matches!(
            zero.encode(&limits),
            Err(ModbusError::InvalidAddress { .. })
        ));

        let overflow = RequestPdu::ReadInputRegisters {
            address: 65530,
            count: 10,
        };
        assert!(overflow.encode(&limits).is_err());
    }

    #[test]
    fn test_register_response_round_trip() {
        let response = ResponsePdu::ReadHoldingRegisters {
            values: vec![0x1234, 0x5678],
        };
        let encoded = response.encode();
        assert_eq!(encoded, vec![0x03, 0x04, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(ResponsePdu::decode(&encoded).unwrap(), response);
    }

    #[test]
    fn test_exception_response() {
        let encoded = vec![0x83, 0x02];
        let response = ResponsePdu::decode(&encoded).unwrap();
        assert!(response.is_exception());
        assert_eq!(
            response,
            ResponsePdu::Exception {
                function: FunctionCode::ReadHoldingRegisters,
                code: ExceptionCode::IllegalDataAddress,
            }
        );
        assert_eq!(response.encode(), encoded);

        let err = response.exception_error().unwrap();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_report_slave_id_round_trip() {
        let response = ResponsePdu::ReportSlaveId {
            slave_id: 17,
            run_indicator: true,
            data: b"meridian".to_vec(),
        };
        let encoded = response.encode();
        assert_eq!(encoded[0], 0x11);
        assert_eq!(encoded[1] as usize, 2 + 8);
        assert_eq!(ResponsePdu::decode(&encoded).unwrap(), response);
    }

    #[test]
    fn test_exception_status_round_trip() {
        let response = ResponsePdu::ReadExceptionStatus { status: 0x6D };
        let encoded = response.encode();
        assert_eq!(encoded, vec![0x07, 0x6D]);
        assert_eq!(ResponsePdu::decode(&encoded).unwrap(), response);
    }

    #[test]
    fn test_bit_packing() {
        let bits = vec![true, false, true, true, false, false, false, false, true];
        let packed = pack_bits(&bits);
        assert_eq!(packed, vec![0b0000_1101, 0b0000_0001]);
        assert_eq!(unpack_bits(&packed, bits.len()), bits);
    }

    #[test]
    fn test_invalid_coil_value_rejected() {
        // Write Single Coil with a value that is neither 0x0000 nor 0xFF00
        let pdu = vec![0x05, 0x00, 0x01, 0x12, 0x34];
        assert!(matches!(
            RequestPdu::decode(&pdu),
            Err(ModbusError::InvalidData { .. })
        ));
    }
}
