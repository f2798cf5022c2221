//! # Frame Codec
//!
//! Per-transport envelopes around a PDU:
//!
//! - **RTU**: `[slave][PDU][CRC16-LE]`, CRC-16 polynomial 0xA001 over
//!   slave + PDU.
//! - **ASCII**: `:` + hex(`[slave][PDU][LRC]`) + CRLF, LRC being the
//!   two's complement of the byte sum.
//! - **IP (MBAP)**: `[transaction:2][protocol:2][length:2][slave][PDU]`,
//!   used verbatim over TCP and per-datagram over UDP. The protocol id is
//!   fixed at zero; anything else is transport-level garbage and the frame
//!   is rejected. No checksum — TCP/UDP already guarantee byte integrity.
//!
//! Stream-oriented transports additionally need reassembly: MBAP frames are
//! delimited by their length field, ASCII frames by CRLF. RTU frames have no
//! in-band delimiter at all and are split by the inter-frame silence at the
//! transport layer instead.

use bytes::{Buf, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use tracing::trace;

use crate::error::{ModbusError, ModbusResult};
use crate::pdu::SlaveId;

/// MBAP header: transaction id (2) + protocol id (2) + length (2).
pub const MBAP_HEADER_SIZE: usize = 6;

/// The only protocol id MBAP defines.
pub const MBAP_PROTOCOL_ID: u16 = 0x0000;

/// CRC calculator for RTU framing (poly 0xA001, LSB-first).
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// ASCII frame start delimiter.
const ASCII_START: u8 = b':';

/// The framing modes the engine speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// MBAP envelope over TCP or UDP.
    Ip,
    /// Binary serial framing with CRC-16.
    Rtu,
    /// Printable serial framing with LRC.
    Ascii,
}

/// An unframed application data unit: who it is for and the raw PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Adu {
    pub slave_id: SlaveId,
    pub pdu: Vec<u8>,
    /// Present for IP framing only; serial envelopes carry no transaction id.
    pub transaction_id: Option<u16>,
}

/// Compute the Modbus CRC-16 over a byte slice.
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Compute the LRC: two's complement of the sum of all bytes.
pub fn lrc(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    sum.wrapping_neg()
}

/// Wrap a PDU in an RTU envelope.
pub fn frame_rtu(slave_id: SlaveId, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 3);
    frame.push(slave_id);
    frame.extend_from_slice(pdu);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    log_packet("framed", &frame, "RTU");
    frame
}

/// Strip and verify an RTU envelope.
pub fn unframe_rtu(frame: &[u8]) -> ModbusResult<Adu> {
    if frame.len() < 4 {
        return Err(ModbusError::frame("RTU frame too short"));
    }
    let data_len = frame.len() - 2;
    let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    let computed = crc16(&frame[..data_len]);
    if received != computed {
        return Err(ModbusError::checksum_mismatch(computed, received));
    }
    Ok(Adu {
        slave_id: frame[0],
        pdu: frame[1..data_len].to_vec(),
        transaction_id: None,
    })
}

/// Wrap a PDU in an ASCII envelope.
pub fn frame_ascii(slave_id: SlaveId, pdu: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(pdu.len() + 2);
    raw.push(slave_id);
    raw.extend_from_slice(pdu);
    raw.push(lrc(&raw));

    let mut frame = Vec::with_capacity(raw.len() * 2 + 3);
    frame.push(ASCII_START);
    frame.extend_from_slice(hex::encode_upper(&raw).as_bytes());
    frame.push(b'\r');
    frame.push(b'\n');
    log_packet("framed", &frame, "ASCII");
    frame
}

/// Strip and verify an ASCII envelope.
pub fn unframe_ascii(frame: &[u8]) -> ModbusResult<Adu> {
    // Minimum frame: ":AAFFLL\r\n"
    if frame.len() < 9 {
        return Err(ModbusError::frame("ASCII frame too short"));
    }
    if frame[0] != ASCII_START {
        return Err(ModbusError::frame("missing ASCII start delimiter"));
    }
    let len = frame.len();
    if frame[len - 2] != b'\r' || frame[len - 1] != b'\n' {
        return Err(ModbusError::frame("missing ASCII end delimiter"));
    }

    let hex_data = &frame[1..len - 2];
    if hex_data.len() % 2 != 0 {
        return Err(ModbusError::frame("odd ASCII frame length"));
    }
    let mut raw = hex::decode(hex_data)
        .map_err(|e| ModbusError::frame(format!("invalid ASCII hex: {}", e)))?;
    if raw.len() < 3 {
        return Err(ModbusError::frame("ASCII frame too short after decoding"));
    }

    let received = raw.pop().unwrap();
    let computed = lrc(&raw);
    if received != computed {
        return Err(ModbusError::checksum_mismatch(
            computed as u16,
            received as u16,
        ));
    }

    Ok(Adu {
        slave_id: raw[0],
        pdu: raw[1..].to_vec(),
        transaction_id: None,
    })
}

/// Wrap a PDU in an MBAP envelope for TCP/UDP.
pub fn frame_mbap(transaction_id: u16, slave_id: SlaveId, pdu: &[u8]) -> Vec<u8> {
    let length = (pdu.len() + 1) as u16; // slave id + PDU
    let mut frame = Vec::with_capacity(MBAP_HEADER_SIZE + 1 + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&MBAP_PROTOCOL_ID.to_be_bytes());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(slave_id);
    frame.extend_from_slice(pdu);
    log_packet("framed", &frame, "MBAP");
    frame
}

/// Strip and verify an MBAP envelope.
pub fn unframe_mbap(frame: &[u8]) -> ModbusResult<Adu> {
    if frame.len() < MBAP_HEADER_SIZE + 2 {
        return Err(ModbusError::frame("MBAP frame too short"));
    }
    let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
    let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
    if protocol_id != MBAP_PROTOCOL_ID {
        return Err(ModbusError::frame(format!(
            "invalid MBAP protocol id 0x{:04X}",
            protocol_id
        )));
    }
    let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    if length < 2 || frame.len() < MBAP_HEADER_SIZE + length {
        return Err(ModbusError::frame("incomplete MBAP frame"));
    }
    Ok(Adu {
        slave_id: frame[MBAP_HEADER_SIZE],
        pdu: frame[MBAP_HEADER_SIZE + 1..MBAP_HEADER_SIZE + length].to_vec(),
        transaction_id: Some(transaction_id),
    })
}

/// Pull one complete MBAP frame out of a reassembly buffer, if present.
///
/// Leaves partial frames in place; a length field over the frame-size cap
/// is unrecoverable stream garbage and reported as a frame error.
pub fn extract_mbap_frame(buf: &mut BytesMut) -> ModbusResult<Option<Vec<u8>>> {
    if buf.len() < MBAP_HEADER_SIZE {
        return Ok(None);
    }
    let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    if MBAP_HEADER_SIZE + length > crate::MAX_IP_FRAME_SIZE {
        return Err(ModbusError::frame("MBAP frame exceeds maximum size"));
    }
    if buf.len() < MBAP_HEADER_SIZE + length {
        return Ok(None);
    }
    Ok(Some(buf.copy_to_bytes(MBAP_HEADER_SIZE + length).to_vec()))
}

/// Pull one CRLF-terminated ASCII frame out of a reassembly buffer.
///
/// Noise before the start delimiter is discarded.
pub fn extract_ascii_frame(buf: &mut BytesMut) -> ModbusResult<Option<Vec<u8>>> {
    // Drop anything before ':'
    if let Some(start) = buf.iter().position(|&b| b == ASCII_START) {
        if start > 0 {
            buf.advance(start);
        }
    } else {
        buf.clear();
        return Ok(None);
    }

    if buf.len() > crate::MAX_ASCII_FRAME_SIZE {
        buf.clear();
        return Err(ModbusError::frame("ASCII frame exceeds maximum size"));
    }

    for i in 1..buf.len() {
        if buf[i - 1] == b'\r' && buf[i] == b'\n' {
            return Ok(Some(buf.copy_to_bytes(i + 1).to_vec()));
        }
    }
    Ok(None)
}

/// Whether a request to this slave id expects a response at all.
pub fn expects_response(slave_id: SlaveId) -> bool {
    slave_id != crate::pdu::BROADCAST_SLAVE_ID
}

/// Wire-level packet trace in the usual hex-dump form.
pub fn log_packet(direction: &str, data: &[u8], protocol: &str) {
    trace!(
        "[MODBUS-{}] {} {}",
        protocol,
        direction,
        crate::utils::format::bytes_to_hex(data)
    );
}
