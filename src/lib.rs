//! # Meridian Modbus
//!
//! A Modbus protocol engine for industrial automation: a process can act as
//! a **master** (polling and writing remote slave devices) and/or as a
//! **slave** (serving a local register image to remote masters), over four
//! transports — TCP, UDP, RTU serial and ASCII serial.
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Responder |
//! |------|----------|--------|-----------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x07 | Read Exception Status | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//! | 0x11 | Report Slave ID | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ### Master
//!
//! ```rust,no_run
//! use meridian_modbus::{ModbusMaster, ModbusMasterConfig, ModbusResult};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let master = ModbusMaster::new(ModbusMasterConfig::tcp("192.168.1.7", 502))?;
//!     master.init().await?;
//!
//!     let values = master.read_holding_registers(1, 0, 10).await?;
//!     println!("registers: {:?}", values);
//!
//!     master.write_single_register(1, 100, 0x1234).await?;
//!     master.destroy().await;
//!     Ok(())
//! }
//! ```
//!
//! ### Slave responder
//!
//! ```rust,no_run
//! use meridian_modbus::{ModbusTcpResponder, ProcessImage, ResponderConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = Arc::new(ProcessImage::new(1));
//!     image.set_holding_register(0, 42);
//!
//!     let mut responder = ModbusTcpResponder::new(ResponderConfig::default(), image);
//!     responder.start().await?;
//!     // responder is now serving the image...
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! application value
//!        │ value codec (Locator)            register image
//!        ▼                                        ▲
//!   request PDU ── message codec ──► bytes        │ process image
//!        │                                        │
//!   frame codec (RTU CRC / ASCII LRC / MBAP)      │
//!        │                                        │
//!   byte transport (TCP / UDP / serial) ◄──► responder
//!        │
//!   transaction matcher ◄── inbound read loop
//! ```

/// Error taxonomy and result alias.
pub mod error;

/// Function codes, exception codes, and the request/response PDU codec.
pub mod pdu;

/// Per-transport envelopes: RTU CRC-16, ASCII LRC, MBAP for TCP/UDP.
pub mod frame;

/// Serial line settings and RTU inter-character/inter-frame timing.
pub mod timing;

/// Typed value codec: data types, locators, swaps, BCD, M10K, strings.
pub mod value;

/// Transaction matcher correlating requests with inbound responses.
pub mod matcher;

/// Raw byte transports over TCP, UDP, and serial lines.
pub mod transport;

/// The master controller: lifecycle, send/retry policy, IO task.
pub mod master;

/// Slave-side process image with typed access and write listeners.
pub mod image;

/// TCP slave responder serving a process image.
pub mod responder;

/// Shared formatting and logging helpers.
pub mod utils;

// Re-export the main types for convenience
pub use error::{ModbusError, ModbusResult};
pub use frame::{Adu, Framing};
pub use image::{ProcessImage, RegisterWrite, WriteListener};
pub use master::{
    ConnectionSettings, MasterState, MasterStats, ModbusMaster, ModbusMasterConfig,
};
pub use matcher::{CorrelationKey, MatchedResponse, TransactionMatcher, Waiter};
pub use pdu::{
    CodecLimits, ExceptionCode, FunctionCode, RequestPdu, ResponsePdu, SlaveId,
    BROADCAST_SLAVE_ID,
};
pub use responder::{ModbusTcpResponder, ResponderConfig, ResponderStats};
pub use timing::{DataBits, Parity, RtuTiming, SerialSettings, StopBits};
pub use transport::{ByteTransport, SerialByteTransport, TcpByteTransport, UdpByteTransport};
pub use value::{DataType, Locator, RegisterRange, Value};

/// Maximum coils/discrete inputs in one read request.
pub const MAX_READ_BIT_COUNT: u16 = 2000;

/// Maximum registers in one read request.
pub const MAX_READ_REGISTER_COUNT: u16 = 125;

/// Maximum registers in one write-multiple request.
pub const MAX_WRITE_REGISTER_COUNT: u16 = 123;

/// Maximum coils in one write-multiple request.
pub const MAX_WRITE_BIT_COUNT: u16 = 1968;

/// Maximum MBAP frame size (header + slave id + PDU).
pub const MAX_IP_FRAME_SIZE: usize = 260;

/// Maximum RTU frame size.
pub const MAX_SERIAL_FRAME_SIZE: usize = 256;

/// Maximum ASCII frame size (hex-expanded serial frame plus delimiters).
pub const MAX_ASCII_FRAME_SIZE: usize = MAX_SERIAL_FRAME_SIZE * 2 + 3;

/// Modbus TCP default port.
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
