//! # Error Handling
//!
//! Error types for the Meridian Modbus engine. The taxonomy separates the
//! failure classes that callers treat differently:
//!
//! - **Configuration / initialization** — invalid parameters caught at
//!   construction, or a failed `init()` that leaves the master reusable.
//! - **Transport** — I/O failures, connection loss, checksum mismatches and
//!   malformed envelopes. These abort the in-flight transaction only and are
//!   candidates for retry.
//! - **Protocol exceptions** — a well-formed response in which the device
//!   rejected the request with a standard Modbus exception code. Distinct
//!   from transport failure so callers can apply different retry policy.
//! - **Validation** — requests rejected before any bytes are transmitted:
//!   counts over the configured maxima, values outside a data type's bound,
//!   malformed value arrays.
//! - **Timeout** — no matching response within the per-attempt window.
//!
//! All errors implement the standard traits via `thiserror` and carry enough
//! context to log meaningfully.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors produced by the Modbus engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// Low-level I/O failure (socket, serial line).
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection establishment or maintenance failure.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// An operation exceeded its configured time limit.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Envelope-level format violation (short frame, bad delimiters,
    /// wrong protocol id, oversized frame).
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// CRC-16 (RTU) or LRC (ASCII) validation failure.
    #[error("Checksum mismatch: expected={expected:04X}, actual={actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// Modbus protocol violation that is not a framing issue.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Unsupported or malformed function code.
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Address/count combination outside the valid range.
    #[error("Invalid address: start={start}, count={count}")]
    InvalidAddress { start: u16, count: u16 },

    /// Value rejected before encoding: out of bound, wrong shape, or
    /// count over the configured maximum.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// The device answered with a Modbus exception response.
    #[error("Modbus exception: function=0x{function:02X}, code=0x{code:02X} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Invalid construction parameters. Fails fast, never defaults silently.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// `init()` failed; the controller remains uninitialized and reusable.
    #[error("Initialization error: {message}")]
    Init { message: String },

    /// Operation invalid in the controller's current lifecycle state.
    #[error("Invalid state: {message}")]
    State { message: String },

    /// The controller was destroyed while the operation was outstanding.
    #[error("Controller closed")]
    Closed,

    /// A second waiter was registered under an occupied correlation key.
    #[error("Correlation key collision: {key}")]
    CorrelationCollision { key: String },

    /// Library-internal error; indicates a bug.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a new I/O error.
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new frame error.
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Create a checksum mismatch error (CRC-16, or LRC widened to u16).
    pub fn checksum_mismatch(expected: u16, actual: u16) -> Self {
        Self::ChecksumMismatch { expected, actual }
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an invalid function error.
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid address error.
    pub fn invalid_address(start: u16, count: u16) -> Self {
        Self::InvalidAddress { start, count }
    }

    /// Create an invalid data error.
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a device exception error with the standard reason text.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::Exception {
            function,
            code,
            message,
        }
    }

    /// Create a configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an initialization error.
    pub fn init<S: Into<String>>(message: S) -> Self {
        Self::Init {
            message: message.into(),
        }
    }

    /// Create an invalid-state error.
    pub fn state<S: Into<String>>(message: S) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a retry of the failed operation might succeed.
    ///
    /// Transport-class failures and timeouts are transient by nature; device
    /// exceptions are permanent except for Acknowledge and Busy.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            Self::ChecksumMismatch { .. } => true,
            Self::Exception { code, .. } => matches!(code, 0x05 | 0x06),
            _ => false,
        }
    }

    /// Whether the error originated below the Modbus protocol layer.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::ChecksumMismatch { .. }
                | Self::Frame { .. }
                | Self::Closed
        )
    }

    /// Whether the error is a Modbus protocol-level issue, including a
    /// device-reported exception.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::InvalidFunction { .. } | Self::Exception { .. }
        )
    }

    /// Whether the request was rejected before any bytes were transmitted.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::InvalidData { .. } | Self::InvalidAddress { .. })
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("operation", 0)
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

impl From<tokio_serial::Error> for ModbusError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::connection(err.to_string())
    }
}
