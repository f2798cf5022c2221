//! # Serial Line Settings and RTU Timing
//!
//! RTU is a half-duplex binary framing with no in-band delimiters: frames
//! are separated by mandatory silence on the line. The Modbus specification
//! fixes the inter-character gap at 1.5 character times and the inter-frame
//! gap at 3.5 character times, except above 19200 baud where both collapse
//! to constants (750 µs and 1750 µs).
//!
//! Character time here is computed from the configured line shape as
//! `data_bits + stop_contribution + parity_bit`, where one stop bit
//! contributes zero extra bits. That zero is a long-standing quirk of the
//! deployed fleet's timing and is kept as-is; see DESIGN.md.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};

/// Data bits per serial character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Seven,
    Eight,
}

impl DataBits {
    pub fn bit_count(self) -> u32 {
        match self {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }

    pub fn to_serial(self) -> tokio_serial::DataBits {
        match self {
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

/// Stop bits per serial character.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl StopBits {
    /// Extra bit contribution to character time. One stop bit contributes
    /// nothing; see the module docs.
    pub fn extra_bits(self) -> f64 {
        match self {
            StopBits::One => 0.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }

    /// Map to the serial driver's type. The driver has no 1.5-stop-bit mode;
    /// asking for one is a configuration error, never a silent default.
    pub fn to_serial(self) -> ModbusResult<tokio_serial::StopBits> {
        match self {
            StopBits::One => Ok(tokio_serial::StopBits::One),
            StopBits::Two => Ok(tokio_serial::StopBits::Two),
            StopBits::OnePointFive => Err(ModbusError::configuration(
                "1.5 stop bits are not supported by the serial driver",
            )),
        }
    }
}

/// Parity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    pub fn is_enabled(self) -> bool {
        !matches!(self, Parity::None)
    }

    pub fn to_serial(self) -> tokio_serial::Parity {
        match self {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Serial port configuration for RTU and ASCII transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl SerialSettings {
    /// 8N1 settings, the common RTU default.
    pub fn new(device: &str, baud_rate: u32) -> Self {
        Self {
            device: device.to_string(),
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }

    /// Reject line shapes the engine cannot honor.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.baud_rate == 0 {
            return Err(ModbusError::configuration("baud rate must be non-zero"));
        }
        if self.device.is_empty() {
            return Err(ModbusError::configuration("serial device must be set"));
        }
        Ok(())
    }
}

/// The two RTU silence intervals, computed once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtuTiming {
    /// Maximum silence inside one frame (1.5 character times).
    pub character_spacing: Duration,
    /// Minimum silence between frames (3.5 character times).
    pub message_frame_spacing: Duration,
}

/// Fixed spacing above 19200 baud, per the Modbus RTU specification.
const FAST_CHARACTER_SPACING_NS: u64 = 750_000;
const FAST_FRAME_SPACING_NS: u64 = 1_750_000;

impl RtuTiming {
    /// Derive the spacing intervals from the serial line shape.
    pub fn from_settings(settings: &SerialSettings) -> Self {
        if settings.baud_rate > 19_200 {
            return Self {
                character_spacing: Duration::from_nanos(FAST_CHARACTER_SPACING_NS),
                message_frame_spacing: Duration::from_nanos(FAST_FRAME_SPACING_NS),
            };
        }

        let char_bits = settings.data_bits.bit_count() as f64
            + settings.stop_bits.extra_bits()
            + if settings.parity.is_enabled() { 1.0 } else { 0.0 };
        let char_time_ns = char_bits / settings.baud_rate as f64 * 1e9;

        Self {
            character_spacing: Duration::from_nanos((1.5 * char_time_ns).round() as u64),
            message_frame_spacing: Duration::from_nanos((3.5 * char_time_ns).round() as u64),
        }
    }

    /// Apply explicit overrides from the master configuration; a zero
    /// override keeps the computed value.
    pub fn with_overrides(
        mut self,
        character_spacing: Option<Duration>,
        message_frame_spacing: Option<Duration>,
    ) -> Self {
        if let Some(spacing) = character_spacing.filter(|d| !d.is_zero()) {
            self.character_spacing = spacing;
        }
        if let Some(spacing) = message_frame_spacing.filter(|d| !d.is_zero()) {
            self.message_frame_spacing = spacing;
        }
        self
    }
}
