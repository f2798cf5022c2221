//! # Byte Transport Layer
//!
//! Raw duplex byte channels underneath the frame codec: TCP, UDP, and the
//! serial line shared by RTU and ASCII framing. The contract is deliberately
//! small — `open`, `read`, `write`, `close` — so the master's IO task can
//! drive any of them identically.
//!
//! The serial transport owns the RTU send-side timing: before every
//! transmission it sleeps out whatever remains of the inter-frame gap since
//! the previous send, and optionally purges the port buffers after a
//! configured quiet period. The "last send" instant is updated after the
//! attempt whether or not it succeeded, so a failed write still holds the
//! line quiet for the full gap.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{sleep, timeout, Instant};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt};

use crate::error::{ModbusError, ModbusResult};
use crate::timing::{RtuTiming, SerialSettings};

/// A raw duplex byte channel.
#[async_trait]
pub trait ByteTransport: Send {
    /// Establish the channel. Failure is an initialization error; the
    /// transport stays closed and may be opened again later.
    async fn open(&mut self) -> ModbusResult<()>;

    /// Read up to `buf.len()` bytes, returning how many arrived.
    async fn read(&mut self, buf: &mut [u8]) -> ModbusResult<usize>;

    /// Transmit all of `data`.
    async fn write(&mut self, data: &[u8]) -> ModbusResult<()>;

    /// Close the channel. Safe to call more than once.
    async fn close(&mut self) -> ModbusResult<()>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;
}

/// TCP byte transport.
pub struct TcpByteTransport {
    address: SocketAddr,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpByteTransport {
    pub fn new(address: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            address,
            connect_timeout,
            stream: None,
        }
    }
}

#[async_trait]
impl ByteTransport for TcpByteTransport {
    async fn open(&mut self) -> ModbusResult<()> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(self.address))
            .await
            .map_err(|_| {
                ModbusError::connection(format!("connect to {} timed out", self.address))
            })?
            .map_err(|e| {
                ModbusError::connection(format!("failed to connect to {}: {}", self.address, e))
            })?;
        stream
            .set_nodelay(true)
            .map_err(|e| ModbusError::connection(format!("set_nodelay failed: {}", e)))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("TCP transport not open"))?;
        let n = stream.read(buf).await?;
        if n == 0 {
            self.stream = None;
            return Err(ModbusError::connection("connection closed by peer"));
        }
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> ModbusResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("TCP transport not open"))?;
        stream.write_all(data).await?;
        Ok(())
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// UDP byte transport. One datagram carries one MBAP frame.
pub struct UdpByteTransport {
    address: SocketAddr,
    socket: Option<UdpSocket>,
}

impl UdpByteTransport {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            socket: None,
        }
    }
}

#[async_trait]
impl ByteTransport for UdpByteTransport {
    async fn open(&mut self) -> ModbusResult<()> {
        let bind_address: SocketAddr = if self.address.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_address)
            .await
            .map_err(|e| ModbusError::connection(format!("UDP bind failed: {}", e)))?;
        socket.connect(self.address).await.map_err(|e| {
            ModbusError::connection(format!("UDP connect to {} failed: {}", self.address, e))
        })?;
        self.socket = Some(socket);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| ModbusError::connection("UDP transport not open"))?;
        Ok(socket.recv(buf).await?)
    }

    async fn write(&mut self, data: &[u8]) -> ModbusResult<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| ModbusError::connection("UDP transport not open"))?;
        let sent = socket.send(data).await?;
        if sent != data.len() {
            return Err(ModbusError::io("short UDP send"));
        }
        Ok(())
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.socket = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}

/// Serial byte transport for RTU and ASCII lines.
pub struct SerialByteTransport {
    settings: SerialSettings,
    /// RTU inter-frame spacing, enforced on the send side. `None` for ASCII
    /// lines, which have no silence requirement.
    timing: Option<RtuTiming>,
    /// Quiet period before transmitting during which stale buffered data is
    /// discarded. Zero disables the purge.
    discard_data_delay: Duration,
    port: Option<tokio_serial::SerialStream>,
    last_send: Option<Instant>,
}

impl SerialByteTransport {
    pub fn new(
        settings: SerialSettings,
        timing: Option<RtuTiming>,
        discard_data_delay: Duration,
    ) -> ModbusResult<Self> {
        settings.validate()?;
        // Surface an unsupported line shape at construction, not at open()
        settings.stop_bits.to_serial()?;
        Ok(Self {
            settings,
            timing,
            discard_data_delay,
            port: None,
            last_send: None,
        })
    }

    /// Sleep out whatever remains of the inter-frame gap.
    async fn wait_frame_spacing(&self) {
        let Some(timing) = self.timing else { return };
        if let Some(last_send) = self.last_send {
            let elapsed = last_send.elapsed();
            if elapsed < timing.message_frame_spacing {
                sleep(timing.message_frame_spacing - elapsed).await;
            }
        }
    }

    async fn transmit(&mut self, data: &[u8]) -> ModbusResult<()> {
        let discard_delay = self.discard_data_delay;
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::connection("serial port not open"))?;

        if !discard_delay.is_zero() {
            sleep(discard_delay).await;
            port.clear(ClearBuffer::All)
                .map_err(|e| ModbusError::io(format!("failed to purge port: {}", e)))?;
        }

        port.write_all(data).await?;
        port.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ByteTransport for SerialByteTransport {
    async fn open(&mut self) -> ModbusResult<()> {
        let builder = tokio_serial::new(&self.settings.device, self.settings.baud_rate)
            .data_bits(self.settings.data_bits.to_serial())
            .stop_bits(self.settings.stop_bits.to_serial()?)
            .parity(self.settings.parity.to_serial());

        let port = builder.open_native_async().map_err(|e| {
            ModbusError::connection(format!(
                "failed to open serial port {}: {}",
                self.settings.device, e
            ))
        })?;
        self.port = Some(port);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> ModbusResult<usize> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ModbusError::connection("serial port not open"))?;
        Ok(port.read(buf).await?)
    }

    async fn write(&mut self, data: &[u8]) -> ModbusResult<()> {
        self.wait_frame_spacing().await;
        let result = self.transmit(data).await;
        // The line went busy either way; hold the gap from now.
        self.last_send = Some(Instant::now());
        result
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.port = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
