//! # TCP Slave Responder
//!
//! Serves a [`ProcessImage`] to remote masters over Modbus TCP: accepts
//! connections, reassembles MBAP frames, decodes the request PDU, applies
//! it to the image, and frames the response under the request's transaction
//! id. Requests addressed to another unit are ignored; broadcast writes
//! (unit 0) are applied but never answered.
//!
//! Malformed counts and unsupported functions come back as the proper
//! Modbus exception responses rather than dropped connections, which is
//! what real masters expect from a compliant device.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use bytes::BytesMut;
use log::{debug, error, info, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::frame;
use crate::image::ProcessImage;
use crate::pdu::{ExceptionCode, RequestPdu, ResponsePdu, BROADCAST_SLAVE_ID};

/// Responder configuration.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub bind_address: SocketAddr,
    pub max_connections: usize,
    /// Idle time after which a silent client connection is dropped.
    pub request_timeout: Duration,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:502".parse().unwrap(),
            max_connections: 64,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Responder statistics.
#[derive(Debug, Clone, Default)]
pub struct ResponderStats {
    pub connections: u64,
    pub requests: u64,
    pub exception_responses: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// A Modbus TCP slave responder serving one process image.
pub struct ModbusTcpResponder {
    config: ResponderConfig,
    image: Arc<ProcessImage>,
    /// Additional data returned by Report Slave ID (0x11).
    identity: Vec<u8>,
    stats: Arc<StdMutex<ResponderStats>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    local_address: Option<SocketAddr>,
    running: Arc<AtomicBool>,
}

impl ModbusTcpResponder {
    pub fn new(config: ResponderConfig, image: Arc<ProcessImage>) -> Self {
        Self {
            config,
            image,
            identity: b"meridian_modbus".to_vec(),
            stats: Arc::new(StdMutex::new(ResponderStats::default())),
            shutdown_tx: None,
            local_address: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the identity blob served by Report Slave ID.
    pub fn set_identity(&mut self, identity: Vec<u8>) {
        self.identity = identity;
    }

    /// The address actually bound, available after `start()`.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_address
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ResponderStats {
        self.stats.lock().unwrap().clone()
    }

    /// Bind the listener and start accepting clients.
    pub async fn start(&mut self) -> ModbusResult<()> {
        if self.is_running() {
            return Err(ModbusError::state("responder already running"));
        }

        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| {
                ModbusError::init(format!("bind {} failed: {}", self.config.bind_address, e))
            })?;
        self.local_address = Some(listener.local_addr()?);

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());
        self.running.store(true, Ordering::SeqCst);

        let image = self.image.clone();
        let identity = self.identity.clone();
        let stats = self.stats.clone();
        let running = self.running.clone();
        let request_timeout = self.config.request_timeout;
        let max_connections = self.config.max_connections;

        info!("modbus responder listening on {}", self.local_address.unwrap());

        tokio::spawn(async move {
            let mut shutdown_rx = shutdown_tx.subscribe();
            let permits = Arc::new(tokio::sync::Semaphore::new(max_connections));
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let permit = match permits.clone().try_acquire_owned() {
                                    Ok(permit) => permit,
                                    Err(_) => {
                                        warn!("rejecting {}: connection limit reached", peer);
                                        continue;
                                    }
                                };
                                stats.lock().unwrap().connections += 1;
                                debug!("client connected: {}", peer);
                                let client = handle_client(
                                    stream,
                                    image.clone(),
                                    identity.clone(),
                                    stats.clone(),
                                    shutdown_tx.subscribe(),
                                    request_timeout,
                                );
                                tokio::spawn(async move {
                                    let _permit = permit;
                                    client.await;
                                });
                            }
                            Err(e) => {
                                error!("accept failed: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    /// Stop accepting clients and close active handlers.
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

async fn handle_client(
    mut stream: TcpStream,
    image: Arc<ProcessImage>,
    identity: Vec<u8>,
    stats: Arc<StdMutex<ResponderStats>>,
    mut shutdown_rx: broadcast::Receiver<()>,
    request_timeout: Duration,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let mut acc = BytesMut::with_capacity(crate::MAX_IP_FRAME_SIZE);
    let mut chunk = [0u8; 512];

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            read = timeout(request_timeout, stream.read(&mut chunk)) => {
                let n = match read {
                    Ok(Ok(0)) => break,
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => {
                        debug!("read error from {}: {}", peer, e);
                        break;
                    }
                    Err(_) => {
                        debug!("idle timeout for {}", peer);
                        break;
                    }
                };
                stats.lock().unwrap().bytes_received += n as u64;
                acc.extend_from_slice(&chunk[..n]);

                loop {
                    let frame_bytes = match frame::extract_mbap_frame(&mut acc) {
                        Ok(Some(bytes)) => bytes,
                        Ok(None) => break,
                        Err(e) => {
                            warn!("unrecoverable stream from {}: {}", peer, e);
                            return;
                        }
                    };
                    if let Some(reply) = serve_frame(&frame_bytes, &image, &identity, &stats) {
                        if let Err(e) = stream.write_all(&reply).await {
                            debug!("write to {} failed: {}", peer, e);
                            return;
                        }
                        stats.lock().unwrap().bytes_sent += reply.len() as u64;
                    }
                }
            }
        }
    }
    debug!("client disconnected: {}", peer);
}

/// Process one inbound MBAP frame; `None` means no reply is owed.
fn serve_frame(
    frame_bytes: &[u8],
    image: &ProcessImage,
    identity: &[u8],
    stats: &StdMutex<ResponderStats>,
) -> Option<Vec<u8>> {
    let adu = match frame::unframe_mbap(frame_bytes) {
        Ok(adu) => adu,
        Err(e) => {
            debug!("discarding malformed request frame: {}", e);
            return None;
        }
    };
    let transaction_id = adu.transaction_id.unwrap_or(0);

    let broadcast = adu.slave_id == BROADCAST_SLAVE_ID;
    if !broadcast && adu.slave_id != image.slave_id() {
        // Addressed to some other unit on a bridged line; not ours.
        return None;
    }

    stats.lock().unwrap().requests += 1;

    let response = match RequestPdu::decode(&adu.pdu) {
        Ok(request) => execute(&request, image, identity),
        Err(ModbusError::InvalidFunction { code }) => {
            stats.lock().unwrap().exception_responses += 1;
            // Cannot type the function, answer with the raw exception form
            let pdu = vec![code | 0x80, ExceptionCode::IllegalFunction.to_u8()];
            return (!broadcast)
                .then(|| frame::frame_mbap(transaction_id, image.slave_id(), &pdu));
        }
        Err(e) => {
            debug!("unparseable request from master: {}", e);
            return None;
        }
    };

    if response.is_exception() {
        stats.lock().unwrap().exception_responses += 1;
    }
    if broadcast {
        // Broadcast requests generate no response, ever.
        return None;
    }
    Some(frame::frame_mbap(
        transaction_id,
        image.slave_id(),
        &response.encode(),
    ))
}

/// Apply a decoded request to the process image.
fn execute(request: &RequestPdu, image: &ProcessImage, identity: &[u8]) -> ResponsePdu {
    let exception = |code| ResponsePdu::Exception {
        function: request.function(),
        code,
    };

    match request {
        RequestPdu::ReadCoils { address, count } => {
            if *count == 0 || *count > crate::MAX_READ_BIT_COUNT {
                return exception(ExceptionCode::IllegalDataValue);
            }
            ResponsePdu::ReadCoils {
                values: image.read_coils(*address, *count),
            }
        }
        RequestPdu::ReadDiscreteInputs { address, count } => {
            if *count == 0 || *count > crate::MAX_READ_BIT_COUNT {
                return exception(ExceptionCode::IllegalDataValue);
            }
            ResponsePdu::ReadDiscreteInputs {
                values: image.read_discrete_inputs(*address, *count),
            }
        }
        RequestPdu::ReadHoldingRegisters { address, count } => {
            if *count == 0 || *count > crate::MAX_READ_REGISTER_COUNT {
                return exception(ExceptionCode::IllegalDataValue);
            }
            ResponsePdu::ReadHoldingRegisters {
                values: image.read_holding_registers(*address, *count),
            }
        }
        RequestPdu::ReadInputRegisters { address, count } => {
            if *count == 0 || *count > crate::MAX_READ_REGISTER_COUNT {
                return exception(ExceptionCode::IllegalDataValue);
            }
            ResponsePdu::ReadInputRegisters {
                values: image.read_input_registers(*address, *count),
            }
        }
        RequestPdu::WriteSingleCoil { address, value } => {
            image.set_coil(*address, *value);
            ResponsePdu::WriteSingleCoil {
                address: *address,
                value: *value,
            }
        }
        RequestPdu::WriteSingleRegister { address, value } => {
            image.set_holding_register(*address, *value);
            ResponsePdu::WriteSingleRegister {
                address: *address,
                value: *value,
            }
        }
        RequestPdu::WriteMultipleCoils { address, values } => {
            if values.is_empty() || values.len() > crate::MAX_WRITE_BIT_COUNT as usize {
                return exception(ExceptionCode::IllegalDataValue);
            }
            image.write_coil_run(*address, values);
            ResponsePdu::WriteMultipleCoils {
                address: *address,
                count: values.len() as u16,
            }
        }
        RequestPdu::WriteMultipleRegisters { address, values } => {
            if values.is_empty() || values.len() > crate::MAX_WRITE_REGISTER_COUNT as usize {
                return exception(ExceptionCode::IllegalDataValue);
            }
            image.write_holding_run(*address, values);
            ResponsePdu::WriteMultipleRegisters {
                address: *address,
                count: values.len() as u16,
            }
        }
        RequestPdu::ReadExceptionStatus => ResponsePdu::ReadExceptionStatus {
            status: image.exception_status(),
        },
        RequestPdu::ReportSlaveId => ResponsePdu::ReportSlaveId {
            slave_id: image.slave_id(),
            run_indicator: true,
            data: identity.to_vec(),
        },
    }
}
