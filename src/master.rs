//! # Master Controller
//!
//! Owns a byte transport, a frame codec and a transaction matcher, and
//! exposes the master lifecycle:
//!
//! ```text
//! Uninitialized ── init() ──> Ready ── destroy() ──> Destroyed
//!        ^                      │
//!        └── failed init() ─────┘ (controller stays reusable)
//! ```
//!
//! `init()` opens the transport and spawns the IO task — the background
//! worker that drives the inbound read loop, reassembles frames, and
//! resolves waiters in the matcher. `send()` frames a request, registers a
//! waiter under the transaction's correlation key, transmits, and suspends
//! until the waiter resolves or the per-attempt timeout fires; timeouts and
//! transport failures are retried up to the configured count. Broadcast
//! requests (slave id 0) are transmitted without a waiter and complete
//! immediately. `destroy()` stops the IO task, closes the transport and
//! unblocks every outstanding `send()` with a closed error; it never fails
//! and may be called repeatedly.
//!
//! Serial masters hold an async line mutex across each attempt, so requests
//! on the half-duplex bus are strictly serialized. IP masters skip the lock
//! and may keep many transactions in flight under distinct transaction ids.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;

use bytes::BytesMut;
use log::{debug, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::frame::{self, Adu, Framing};
use crate::matcher::{CorrelationKey, MatchedResponse, TransactionMatcher};
use crate::pdu::{CodecLimits, RequestPdu, ResponsePdu, SlaveId};
use crate::timing::{RtuTiming, SerialSettings};
use crate::transport::{ByteTransport, SerialByteTransport, TcpByteTransport, UdpByteTransport};
use crate::value::{Locator, Value};

/// Where the master connects, and how the line is framed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ConnectionSettings {
    Tcp {
        host: String,
        port: u16,
    },
    Udp {
        host: String,
        port: u16,
    },
    Rtu {
        #[serde(flatten)]
        serial: SerialSettings,
        /// Explicit override of the computed inter-character spacing, in
        /// microseconds. Zero or absent keeps the computed value.
        #[serde(default)]
        character_spacing_us: Option<u64>,
        /// Explicit override of the computed inter-frame spacing.
        #[serde(default)]
        frame_spacing_us: Option<u64>,
    },
    Ascii {
        #[serde(flatten)]
        serial: SerialSettings,
    },
}

impl ConnectionSettings {
    /// The framing mode this connection uses.
    pub fn framing(&self) -> Framing {
        match self {
            ConnectionSettings::Tcp { .. } | ConnectionSettings::Udp { .. } => Framing::Ip,
            ConnectionSettings::Rtu { .. } => Framing::Rtu,
            ConnectionSettings::Ascii { .. } => Framing::Ascii,
        }
    }

    fn is_serial(&self) -> bool {
        matches!(
            self,
            ConnectionSettings::Rtu { .. } | ConnectionSettings::Ascii { .. }
        )
    }

    fn socket_addr(host: &str, port: u16) -> ModbusResult<SocketAddr> {
        format!("{}:{}", host, port)
            .parse()
            .map_err(|e| ModbusError::configuration(format!("invalid address {}: {}", host, e)))
    }
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_retries() -> u32 {
    2
}

/// Everything needed to build a master: transport parameters plus policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusMasterConfig {
    pub connection: ConnectionSettings,
    /// Per-attempt response timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first attempt on timeout or transport error.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub limits: CodecLimits,
    /// Serial quiet period before transmitting, during which stale buffered
    /// data is purged. Zero disables it.
    #[serde(default)]
    pub discard_data_delay_ms: u64,
    /// Rewrite single-write requests as their multiple-write forms, for
    /// devices that only implement 0x0F/0x10.
    #[serde(default)]
    pub multiple_writes_only: bool,
}

impl ModbusMasterConfig {
    /// TCP master with default policy.
    pub fn tcp(host: &str, port: u16) -> Self {
        Self::with_connection(ConnectionSettings::Tcp {
            host: host.to_string(),
            port,
        })
    }

    /// UDP master with default policy.
    pub fn udp(host: &str, port: u16) -> Self {
        Self::with_connection(ConnectionSettings::Udp {
            host: host.to_string(),
            port,
        })
    }

    /// RTU master with default policy and computed line spacing.
    pub fn rtu(serial: SerialSettings) -> Self {
        Self::with_connection(ConnectionSettings::Rtu {
            serial,
            character_spacing_us: None,
            frame_spacing_us: None,
        })
    }

    /// ASCII master with default policy.
    pub fn ascii(serial: SerialSettings) -> Self {
        Self::with_connection(ConnectionSettings::Ascii { serial })
    }

    fn with_connection(connection: ConnectionSettings) -> Self {
        Self {
            connection,
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            limits: CodecLimits::default(),
            discard_data_delay_ms: 0,
            multiple_writes_only: false,
        }
    }

    /// Load a configuration from its JSON representation.
    pub fn from_json(json: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on parameters the engine cannot honor.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.timeout_ms == 0 {
            return Err(ModbusError::configuration("timeout must be non-zero"));
        }
        match &self.connection {
            ConnectionSettings::Tcp { host, port } | ConnectionSettings::Udp { host, port } => {
                ConnectionSettings::socket_addr(host, *port)?;
            }
            ConnectionSettings::Rtu { serial, .. } | ConnectionSettings::Ascii { serial } => {
                serial.validate()?;
                serial.stop_bits.to_serial()?;
            }
        }
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Master lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Uninitialized,
    Initializing,
    Ready,
    Destroyed,
}

/// Communication statistics, cumulative over the master's lifetime.
#[derive(Debug, Clone, Default)]
pub struct MasterStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// A frame handed to the IO task for transmission.
struct IoCommand {
    frame: Vec<u8>,
    done: oneshot::Sender<ModbusResult<()>>,
}

struct IoHandle {
    cmd_tx: mpsc::Sender<IoCommand>,
    task: tokio::task::JoinHandle<()>,
}

/// A Modbus master controller.
pub struct ModbusMaster {
    config: ModbusMasterConfig,
    framing: Framing,
    state: StdMutex<MasterState>,
    matcher: Arc<TransactionMatcher>,
    io: StdMutex<Option<IoHandle>>,
    /// Serializes attempts on half-duplex serial lines. `None` for IP.
    line_lock: Option<Mutex<()>>,
    transaction_counter: AtomicU16,
    stats: Arc<StdMutex<MasterStats>>,
}

impl ModbusMaster {
    /// Build an uninitialized master from its configuration.
    pub fn new(config: ModbusMasterConfig) -> ModbusResult<Self> {
        config.validate()?;
        let framing = config.connection.framing();
        let line_lock = config.connection.is_serial().then(|| Mutex::new(()));
        Ok(Self {
            config,
            framing,
            state: StdMutex::new(MasterState::Uninitialized),
            matcher: Arc::new(TransactionMatcher::new()),
            io: StdMutex::new(None),
            line_lock,
            transaction_counter: AtomicU16::new(1),
            stats: Arc::new(StdMutex::new(MasterStats::default())),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MasterState {
        *self.state.lock().unwrap()
    }

    /// Snapshot of the communication statistics.
    pub fn stats(&self) -> MasterStats {
        self.stats.lock().unwrap().clone()
    }

    /// Open the transport and start the IO task. On failure the controller
    /// returns to `Uninitialized` and may be initialized again later.
    pub async fn init(&self) -> ModbusResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                MasterState::Uninitialized => *state = MasterState::Initializing,
                other => {
                    return Err(ModbusError::state(format!(
                        "init() is not valid in state {:?}",
                        other
                    )))
                }
            }
        }

        match self.open_transport().await {
            Ok(transport) => {
                let (cmd_tx, cmd_rx) = mpsc::channel(16);
                let rtu_gap = self.rtu_character_gap();
                let task = tokio::spawn(run_io(
                    transport,
                    self.framing,
                    rtu_gap,
                    self.matcher.clone(),
                    self.stats.clone(),
                    cmd_rx,
                ));
                *self.io.lock().unwrap() = Some(IoHandle { cmd_tx, task });
                *self.state.lock().unwrap() = MasterState::Ready;
                Ok(())
            }
            Err(e) => {
                *self.state.lock().unwrap() = MasterState::Uninitialized;
                Err(ModbusError::init(e.to_string()))
            }
        }
    }

    /// Stop the IO task, close the transport, and unblock every outstanding
    /// `send()` with a closed error. Never fails; repeat calls are no-ops.
    pub async fn destroy(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == MasterState::Destroyed {
                return;
            }
            *state = MasterState::Destroyed;
        }
        // Dropping the command channel wakes the IO task, which closes the
        // transport on its way out.
        let handle = self.io.lock().unwrap().take();
        if let Some(handle) = handle {
            drop(handle.cmd_tx);
            let _ = handle.task.await;
        }
        self.matcher.fail_all(ModbusError::Closed);
    }

    /// Send a request to `slave_id` and wait for the matched response.
    ///
    /// Returns `Ok(None)` for broadcast requests, which expect no response.
    /// A device exception surfaces as [`ModbusError::Exception`], distinct
    /// from transport failures, and is not retried.
    pub async fn send(
        &self,
        slave_id: SlaveId,
        request: RequestPdu,
    ) -> ModbusResult<Option<ResponsePdu>> {
        self.ensure_ready()?;
        let request = self.apply_write_policy(request);
        let pdu = request.encode(&self.config.limits)?;

        // Serial lines carry one transaction at a time.
        let _line_guard = match &self.line_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let attempts = self.config.retries + 1;
        let mut last_error = ModbusError::timeout(request.to_string(), self.config.timeout_ms);

        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("retry {} of {} for {}", attempt, self.config.retries, request);
            }
            match self.send_attempt(slave_id, &request, &pdu).await {
                Ok(response) => return Ok(response),
                // Device exceptions and validation failures are final.
                Err(e) if !e.is_transport_error() => return Err(e),
                Err(ModbusError::Closed) => return Err(ModbusError::Closed),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    async fn send_attempt(
        &self,
        slave_id: SlaveId,
        request: &RequestPdu,
        pdu: &[u8],
    ) -> ModbusResult<Option<ResponsePdu>> {
        let (frame_bytes, key) = self.build_frame(slave_id, pdu);

        if !frame::expects_response(slave_id) {
            // Broadcast: transmit and complete immediately, no waiter.
            self.transmit(frame_bytes).await?;
            return Ok(None);
        }

        let waiter = self.matcher.register(key)?;
        if let Err(e) = self.transmit(frame_bytes).await {
            self.matcher.remove(key);
            return Err(e);
        }

        let matched = match timeout(self.config.timeout(), waiter.wait()).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                self.matcher.remove(key);
                self.stats.lock().unwrap().timeouts += 1;
                return Err(ModbusError::timeout(request.to_string(), self.config.timeout_ms));
            }
        };

        if matched.slave_id != slave_id {
            self.stats.lock().unwrap().errors += 1;
            return Err(ModbusError::protocol(format!(
                "response slave id mismatch: expected {}, got {}",
                slave_id, matched.slave_id
            )));
        }
        if let Some(error) = matched.response.exception_error() {
            self.stats.lock().unwrap().errors += 1;
            return Err(error);
        }
        if matched.response.function() != request.function() {
            self.stats.lock().unwrap().errors += 1;
            return Err(ModbusError::protocol(format!(
                "response function mismatch: expected {}, got {}",
                request.function(),
                matched.response.function()
            )));
        }
        Ok(Some(matched.response))
    }

    /// Probe whether `slave_id` is reachable. A device exception still means
    /// the device answered, so it counts as reachable.
    pub async fn test_connectivity(&self, slave_id: SlaveId) -> bool {
        match self.send(slave_id, RequestPdu::ReadExceptionStatus).await {
            Ok(_) => true,
            Err(e) => e.is_protocol_error(),
        }
    }

    // --- typed convenience operations ------------------------------------

    /// Read coils, truncated to the requested count.
    pub async fn read_coils(
        &self,
        slave_id: SlaveId,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<bool>> {
        let response = self
            .send(slave_id, RequestPdu::ReadCoils { address, count })
            .await?;
        match response {
            Some(ResponsePdu::ReadCoils { mut values }) => {
                values.truncate(count as usize);
                Ok(values)
            }
            other => Err(unexpected_response(other)),
        }
    }

    /// Read discrete inputs, truncated to the requested count.
    pub async fn read_discrete_inputs(
        &self,
        slave_id: SlaveId,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<bool>> {
        let response = self
            .send(slave_id, RequestPdu::ReadDiscreteInputs { address, count })
            .await?;
        match response {
            Some(ResponsePdu::ReadDiscreteInputs { mut values }) => {
                values.truncate(count as usize);
                Ok(values)
            }
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn read_holding_registers(
        &self,
        slave_id: SlaveId,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        let response = self
            .send(slave_id, RequestPdu::ReadHoldingRegisters { address, count })
            .await?;
        match response {
            Some(ResponsePdu::ReadHoldingRegisters { values }) => Ok(values),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn read_input_registers(
        &self,
        slave_id: SlaveId,
        address: u16,
        count: u16,
    ) -> ModbusResult<Vec<u16>> {
        let response = self
            .send(slave_id, RequestPdu::ReadInputRegisters { address, count })
            .await?;
        match response {
            Some(ResponsePdu::ReadInputRegisters { values }) => Ok(values),
            other => Err(unexpected_response(other)),
        }
    }

    pub async fn write_single_coil(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> ModbusResult<()> {
        self.send(slave_id, RequestPdu::WriteSingleCoil { address, value })
            .await?;
        Ok(())
    }

    pub async fn write_single_register(
        &self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> ModbusResult<()> {
        self.send(slave_id, RequestPdu::WriteSingleRegister { address, value })
            .await?;
        Ok(())
    }

    pub async fn write_multiple_coils(
        &self,
        slave_id: SlaveId,
        address: u16,
        values: Vec<bool>,
    ) -> ModbusResult<()> {
        self.send(slave_id, RequestPdu::WriteMultipleCoils { address, values })
            .await?;
        Ok(())
    }

    pub async fn write_multiple_registers(
        &self,
        slave_id: SlaveId,
        address: u16,
        values: Vec<u16>,
    ) -> ModbusResult<()> {
        self.send(slave_id, RequestPdu::WriteMultipleRegisters { address, values })
            .await?;
        Ok(())
    }

    /// Read a typed point: fetch its registers and decode them through the
    /// value codec.
    pub async fn read_point(&self, slave_id: SlaveId, locator: &Locator) -> ModbusResult<Value> {
        use crate::value::RegisterRange;
        match locator.range {
            RegisterRange::CoilStatus => {
                let bits = self.read_coils(slave_id, locator.offset, 1).await?;
                Ok(Value::Bool(bits.first().copied().unwrap_or(false)))
            }
            RegisterRange::DiscreteInput => {
                let bits = self.read_discrete_inputs(slave_id, locator.offset, 1).await?;
                Ok(Value::Bool(bits.first().copied().unwrap_or(false)))
            }
            RegisterRange::HoldingRegister => {
                let words = self
                    .read_holding_registers(slave_id, locator.offset, locator.register_count)
                    .await?;
                locator.decode(&words)
            }
            RegisterRange::InputRegister => {
                let words = self
                    .read_input_registers(slave_id, locator.offset, locator.register_count)
                    .await?;
                locator.decode(&words)
            }
        }
    }

    /// Write a typed point: encode the value through the value codec and
    /// transmit the matching write request.
    pub async fn write_point(
        &self,
        slave_id: SlaveId,
        locator: &Locator,
        value: &Value,
    ) -> ModbusResult<()> {
        use crate::value::RegisterRange;
        match locator.range {
            RegisterRange::CoilStatus => {
                let bit = match value {
                    Value::Bool(b) => *b,
                    _ => return Err(ModbusError::invalid_data("coil point expects a boolean")),
                };
                self.write_single_coil(slave_id, locator.offset, bit).await
            }
            RegisterRange::HoldingRegister => {
                let words = locator.encode(value)?;
                if words.len() == 1 {
                    self.write_single_register(slave_id, locator.offset, words[0])
                        .await
                } else {
                    self.write_multiple_registers(slave_id, locator.offset, words)
                        .await
                }
            }
            other => Err(ModbusError::invalid_data(format!(
                "{} is not writable from a master",
                other
            ))),
        }
    }

    // --- internals --------------------------------------------------------

    fn ensure_ready(&self) -> ModbusResult<()> {
        match self.state() {
            MasterState::Ready => Ok(()),
            MasterState::Destroyed => Err(ModbusError::Closed),
            other => Err(ModbusError::state(format!(
                "send() is not valid in state {:?}",
                other
            ))),
        }
    }

    fn apply_write_policy(&self, request: RequestPdu) -> RequestPdu {
        if !self.config.multiple_writes_only {
            return request;
        }
        match request {
            RequestPdu::WriteSingleCoil { address, value } => RequestPdu::WriteMultipleCoils {
                address,
                values: vec![value],
            },
            RequestPdu::WriteSingleRegister { address, value } => {
                RequestPdu::WriteMultipleRegisters {
                    address,
                    values: vec![value],
                }
            }
            other => other,
        }
    }

    fn next_transaction_id(&self) -> u16 {
        let id = self.transaction_counter.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            self.transaction_counter.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }

    fn build_frame(&self, slave_id: SlaveId, pdu: &[u8]) -> (Vec<u8>, CorrelationKey) {
        match self.framing {
            Framing::Ip => {
                let transaction_id = self.next_transaction_id();
                (
                    frame::frame_mbap(transaction_id, slave_id, pdu),
                    CorrelationKey::Transaction(transaction_id),
                )
            }
            Framing::Rtu => (frame::frame_rtu(slave_id, pdu), CorrelationKey::Serial),
            Framing::Ascii => (frame::frame_ascii(slave_id, pdu), CorrelationKey::Serial),
        }
    }

    async fn transmit(&self, frame_bytes: Vec<u8>) -> ModbusResult<()> {
        let cmd_tx = {
            let io = self.io.lock().unwrap();
            match io.as_ref() {
                Some(handle) => handle.cmd_tx.clone(),
                None => return Err(ModbusError::Closed),
            }
        };

        {
            let mut stats = self.stats.lock().unwrap();
            stats.requests_sent += 1;
            stats.bytes_sent += frame_bytes.len() as u64;
        }

        let (done_tx, done_rx) = oneshot::channel();
        cmd_tx
            .send(IoCommand {
                frame: frame_bytes,
                done: done_tx,
            })
            .await
            .map_err(|_| ModbusError::Closed)?;
        done_rx.await.map_err(|_| ModbusError::Closed)?
    }

    async fn open_transport(&self) -> ModbusResult<Box<dyn ByteTransport>> {
        let mut transport: Box<dyn ByteTransport> = match &self.config.connection {
            ConnectionSettings::Tcp { host, port } => Box::new(TcpByteTransport::new(
                ConnectionSettings::socket_addr(host, *port)?,
                self.config.timeout(),
            )),
            ConnectionSettings::Udp { host, port } => Box::new(UdpByteTransport::new(
                ConnectionSettings::socket_addr(host, *port)?,
            )),
            ConnectionSettings::Rtu {
                serial,
                character_spacing_us,
                frame_spacing_us,
            } => {
                let timing = RtuTiming::from_settings(serial).with_overrides(
                    character_spacing_us.map(Duration::from_micros),
                    frame_spacing_us.map(Duration::from_micros),
                );
                Box::new(SerialByteTransport::new(
                    serial.clone(),
                    Some(timing),
                    Duration::from_millis(self.config.discard_data_delay_ms),
                )?)
            }
            ConnectionSettings::Ascii { serial } => Box::new(SerialByteTransport::new(
                serial.clone(),
                None,
                Duration::from_millis(self.config.discard_data_delay_ms),
            )?),
        };
        transport.open().await?;
        Ok(transport)
    }

    fn rtu_character_gap(&self) -> Option<Duration> {
        match &self.config.connection {
            ConnectionSettings::Rtu {
                serial,
                character_spacing_us,
                frame_spacing_us,
            } => {
                let timing = RtuTiming::from_settings(serial).with_overrides(
                    character_spacing_us.map(Duration::from_micros),
                    frame_spacing_us.map(Duration::from_micros),
                );
                Some(timing.character_spacing)
            }
            _ => None,
        }
    }
}

impl Drop for ModbusMaster {
    fn drop(&mut self) {
        // Drop the command channel so the IO task winds down on its own;
        // waiters resolve through the matcher.
        if let Ok(mut io) = self.io.lock() {
            io.take();
        }
        self.matcher.fail_all(ModbusError::Closed);
    }
}

fn unexpected_response(response: Option<ResponsePdu>) -> ModbusError {
    match response {
        Some(r) => ModbusError::protocol(format!("unexpected response {}", r.function())),
        None => ModbusError::protocol("missing response for addressed request"),
    }
}

/// One IO-task event; the select arms only classify, the handling below
/// keeps exclusive use of the transport.
enum IoEvent {
    Command(Option<IoCommand>),
    Read(ModbusResult<usize>),
    FrameGapElapsed,
}

/// The background read/write loop. Owns the transport for the lifetime of
/// the controller's `Ready` state.
async fn run_io(
    mut transport: Box<dyn ByteTransport>,
    framing: Framing,
    rtu_gap: Option<Duration>,
    matcher: Arc<TransactionMatcher>,
    stats: Arc<StdMutex<MasterStats>>,
    mut cmd_rx: mpsc::Receiver<IoCommand>,
) {
    let mut acc = BytesMut::with_capacity(crate::MAX_IP_FRAME_SIZE);
    let mut chunk = [0u8; 512];
    let gap = rtu_gap.unwrap_or(Duration::from_millis(10));

    loop {
        let rtu_frame_pending = framing == Framing::Rtu && !acc.is_empty();

        let event = tokio::select! {
            cmd = cmd_rx.recv() => IoEvent::Command(cmd),
            result = transport.read(&mut chunk) => IoEvent::Read(result),
            _ = tokio::time::sleep(gap), if rtu_frame_pending => IoEvent::FrameGapElapsed,
        };

        match event {
            IoEvent::Command(Some(IoCommand { frame, done })) => {
                let result = transport.write(&frame).await;
                if let Err(ref e) = result {
                    warn!("transmit failed: {}", e);
                    stats.lock().unwrap().errors += 1;
                }
                let _ = done.send(result);
            }
            IoEvent::Command(None) => break,
            IoEvent::Read(Ok(n)) => {
                stats.lock().unwrap().bytes_received += n as u64;
                acc.extend_from_slice(&chunk[..n]);
                if drain_frames(framing, &mut acc, &matcher, &stats).is_err() {
                    // Unrecoverable stream garbage; resynchronize.
                    acc.clear();
                }
            }
            IoEvent::Read(Err(e)) => {
                debug!("read loop stopped: {}", e);
                matcher.fail_all(e);
                break;
            }
            IoEvent::FrameGapElapsed => {
                // Silence on the RTU line: the accumulated bytes are one frame.
                let frame_bytes = acc.split().freeze();
                deliver_frame(framing, &frame_bytes, &matcher, &stats);
            }
        }
    }

    let _ = transport.close().await;
    matcher.fail_all(ModbusError::Closed);
}

/// Extract and deliver every complete frame in the buffer (stream framings).
fn drain_frames(
    framing: Framing,
    acc: &mut BytesMut,
    matcher: &TransactionMatcher,
    stats: &StdMutex<MasterStats>,
) -> ModbusResult<()> {
    loop {
        let extracted = match framing {
            Framing::Ip => frame::extract_mbap_frame(acc)?,
            Framing::Ascii => frame::extract_ascii_frame(acc)?,
            // RTU frames end with line silence, handled by the gap timer.
            Framing::Rtu => None,
        };
        match extracted {
            Some(frame_bytes) => deliver_frame(framing, &frame_bytes, matcher, stats),
            None => return Ok(()),
        }
    }
}

/// Unframe, decode and route one inbound frame to its waiter.
fn deliver_frame(
    framing: Framing,
    frame_bytes: &[u8],
    matcher: &TransactionMatcher,
    stats: &StdMutex<MasterStats>,
) {
    frame::log_packet("received", frame_bytes, framing_label(framing));

    let adu: ModbusResult<Adu> = match framing {
        Framing::Ip => frame::unframe_mbap(frame_bytes),
        Framing::Rtu => frame::unframe_rtu(frame_bytes),
        Framing::Ascii => frame::unframe_ascii(frame_bytes),
    };
    let adu = match adu {
        Ok(adu) => adu,
        Err(e) => {
            // Checksum and framing failures discard the frame; the waiter
            // times out and retries per policy.
            debug!("discarding inbound frame: {}", e);
            stats.lock().unwrap().errors += 1;
            return;
        }
    };

    let key = match adu.transaction_id {
        Some(id) => CorrelationKey::Transaction(id),
        None => CorrelationKey::Serial,
    };

    match ResponsePdu::decode(&adu.pdu) {
        Ok(response) => {
            let delivered = matcher.deliver(
                key,
                Ok(MatchedResponse {
                    slave_id: adu.slave_id,
                    response,
                }),
            );
            if delivered {
                stats.lock().unwrap().responses_received += 1;
            }
        }
        // A well-framed but unparseable PDU aborts that transaction.
        Err(e) => {
            matcher.deliver(key, Err(e));
        }
    }
}

fn framing_label(framing: Framing) -> &'static str {
    match framing {
        Framing::Ip => "MBAP",
        Framing::Rtu => "RTU",
        Framing::Ascii => "ASCII",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{DataBits, Parity, StopBits};

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "connection": {"transport": "tcp", "host": "192.168.1.7", "port": 502},
            "timeout_ms": 250,
            "retries": 1
        }"#;
        let config = ModbusMasterConfig::from_json(json).unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.retries, 1);
        assert_eq!(config.connection.framing(), Framing::Ip);
        assert_eq!(config.limits, CodecLimits::default());
    }

    #[test]
    fn test_rtu_config_from_json() {
        let json = r#"{
            "connection": {
                "transport": "rtu",
                "device": "/dev/ttyUSB0",
                "baud_rate": 19200,
                "data_bits": "Eight",
                "stop_bits": "One",
                "parity": "Even",
                "frame_spacing_us": 5000
            }
        }"#;
        let config = ModbusMasterConfig::from_json(json).unwrap();
        match &config.connection {
            ConnectionSettings::Rtu {
                serial,
                frame_spacing_us,
                ..
            } => {
                assert_eq!(serial.baud_rate, 19_200);
                assert_eq!(serial.data_bits, DataBits::Eight);
                assert_eq!(serial.parity, Parity::Even);
                assert_eq!(*frame_spacing_us, Some(5_000));
            }
            other => panic!("wrong connection: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let mut config = ModbusMasterConfig::tcp("not an address", 502);
        assert!(matches!(
            ModbusMaster::new(config.clone()),
            Err(ModbusError::Configuration { .. })
        ));

        config = ModbusMasterConfig::tcp("127.0.0.1", 502);
        config.timeout_ms = 0;
        assert!(ModbusMaster::new(config).is_err());

        let mut serial = SerialSettings::new("/dev/ttyUSB0", 9_600);
        serial.stop_bits = StopBits::OnePointFive;
        assert!(matches!(
            ModbusMaster::new(ModbusMasterConfig::rtu(serial)),
            Err(ModbusError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_requires_ready_state() {
        let master = ModbusMaster::new(ModbusMasterConfig::tcp("127.0.0.1", 502)).unwrap();
        assert_eq!(master.state(), MasterState::Uninitialized);

        let result = master
            .send(1, RequestPdu::ReadCoils { address: 0, count: 1 })
            .await;
        assert!(matches!(result, Err(ModbusError::State { .. })));
    }

    #[tokio::test]
    async fn test_failed_init_leaves_master_reusable() {
        // Nothing listens on port 1
        let mut config = ModbusMasterConfig::tcp("127.0.0.1", 1);
        config.timeout_ms = 200;
        let master = ModbusMaster::new(config).unwrap();

        let result = master.init().await;
        assert!(matches!(result, Err(ModbusError::Init { .. })));
        assert_eq!(master.state(), MasterState::Uninitialized);

        // A later init() attempt is allowed (and fails the same way here)
        assert!(master.init().await.is_err());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_terminal() {
        let master = ModbusMaster::new(ModbusMasterConfig::tcp("127.0.0.1", 502)).unwrap();
        master.destroy().await;
        master.destroy().await;
        assert_eq!(master.state(), MasterState::Destroyed);

        assert!(matches!(master.init().await, Err(ModbusError::State { .. })));
        let result = master
            .send(1, RequestPdu::ReadCoils { address: 0, count: 1 })
            .await;
        assert_eq!(result, Err(ModbusError::Closed));
    }

    #[test]
    fn test_multiple_writes_only_policy() {
        let mut config = ModbusMasterConfig::tcp("127.0.0.1", 502);
        config.multiple_writes_only = true;
        let master = ModbusMaster::new(config).unwrap();

        let rewritten = master.apply_write_policy(RequestPdu::WriteSingleRegister {
            address: 9,
            value: 0x1234,
        });
        assert_eq!(
            rewritten,
            RequestPdu::WriteMultipleRegisters {
                address: 9,
                values: vec![0x1234],
            }
        );

        let rewritten = master.apply_write_policy(RequestPdu::WriteSingleCoil {
            address: 3,
            value: true,
        });
        assert_eq!(
            rewritten,
            RequestPdu::WriteMultipleCoils {
                address: 3,
                values: vec![true],
            }
        );

        // Reads pass through untouched
        let read = RequestPdu::ReadCoils { address: 0, count: 8 };
        assert_eq!(master.apply_write_policy(read.clone()), read);
    }

    #[test]
    fn test_transaction_ids_skip_zero() {
        let master = ModbusMaster::new(ModbusMasterConfig::tcp("127.0.0.1", 502)).unwrap();
        master.transaction_counter.store(u16::MAX, Ordering::Relaxed);
        let a = master.next_transaction_id();
        let b = master.next_transaction_id();
        assert_eq!(a, u16::MAX);
        assert_ne!(b, 0);
    }
}
