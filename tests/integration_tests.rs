//! Integration tests exercising the engine components together: framing and
//! PDU codecs end to end, master against a live TCP responder, correlation
//! under reordered responses, retry/timeout policy, and broadcast handling.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use meridian_modbus::{
    frame, CodecLimits, DataType, Locator, ModbusError, ModbusMaster, ModbusMasterConfig,
    ModbusTcpResponder, ProcessImage, RegisterRange, RequestPdu, ResponderConfig, ResponsePdu,
    SerialSettings, Value,
};

async fn start_responder(image: Arc<ProcessImage>) -> (ModbusTcpResponder, SocketAddr) {
    let config = ResponderConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    };
    let mut responder = ModbusTcpResponder::new(config, image);
    responder.start().await.unwrap();
    let address = responder.local_address().unwrap();
    (responder, address)
}

async fn connect_master(address: SocketAddr) -> ModbusMaster {
    let mut config = ModbusMasterConfig::tcp(&address.ip().to_string(), address.port());
    config.timeout_ms = 1_000;
    let master = ModbusMaster::new(config).unwrap();
    master.init().await.unwrap();
    master
}

/// The full §-by-§ scenario: encode a Read Holding Registers request for
/// slave 1, offset 10, count 2; frame it for RTU; unframe and decode it back
/// to an identical request. Then decode a two-register response as a
/// swapped 32-bit value.
#[test]
fn test_rtu_request_round_trip_and_swapped_decode() {
    let request = RequestPdu::ReadHoldingRegisters {
        address: 10,
        count: 2,
    };
    let pdu = request.encode(&CodecLimits::default()).unwrap();
    let framed = frame::frame_rtu(1, &pdu);

    let adu = frame::unframe_rtu(&framed).unwrap();
    assert_eq!(adu.slave_id, 1);
    assert_eq!(RequestPdu::decode(&adu.pdu).unwrap(), request);

    // Response carrying registers [0x0001, 0x8000] as UINT32 swapped
    let locator = Locator::new(
        RegisterRange::HoldingRegister,
        10,
        DataType::Uint32Swapped,
    )
    .unwrap();
    assert_eq!(
        locator.decode(&[0x0001, 0x8000]).unwrap(),
        Value::U32(0x8000_0001)
    );
}

/// Known-good frame from the wire: 01 03 00 00 00 02 C4 0B.
#[test]
fn test_rtu_frame_matches_reference_bytes() {
    let pdu = RequestPdu::ReadHoldingRegisters {
        address: 0,
        count: 2,
    }
    .encode(&CodecLimits::default())
    .unwrap();
    let framed = frame::frame_rtu(1, &pdu);
    assert_eq!(
        framed,
        vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]
    );
}

#[tokio::test]
async fn test_master_reads_and_writes_through_responder() {
    let image = Arc::new(ProcessImage::new(1));
    image.write_holding_run(0, &[0x0001, 0x8000]);
    image.set_input(3, true);
    let (_responder, address) = start_responder(image.clone()).await;
    let master = connect_master(address).await;

    // Typed point read through the value codec
    let point = Locator::new(RegisterRange::HoldingRegister, 0, DataType::Uint32Swapped).unwrap();
    assert_eq!(
        master.read_point(1, &point).await.unwrap(),
        Value::U32(0x8000_0001)
    );

    // Discrete inputs
    let inputs = master.read_discrete_inputs(1, 0, 8).await.unwrap();
    assert_eq!(inputs[3], true);
    assert_eq!(inputs[0], false);

    // Typed point write lands in the image
    let gauge = Locator::new(RegisterRange::HoldingRegister, 20, DataType::Float32).unwrap();
    master
        .write_point(1, &gauge, &Value::F32(98.25))
        .await
        .unwrap();
    assert_eq!(
        image
            .numeric(RegisterRange::HoldingRegister, 20, DataType::Float32)
            .unwrap(),
        Value::F32(98.25)
    );

    // Coil write + read back
    master.write_single_coil(1, 5, true).await.unwrap();
    let coils = master.read_coils(1, 0, 8).await.unwrap();
    assert_eq!(coils.len(), 8);
    assert!(coils[5]);

    // Connectivity probe uses Read Exception Status
    assert!(master.test_connectivity(1).await);

    let stats = master.stats();
    assert!(stats.requests_sent >= 5);
    assert_eq!(stats.timeouts, 0);

    master.destroy().await;
}

#[tokio::test]
async fn test_master_from_json_config() {
    let image = Arc::new(ProcessImage::new(1));
    image.set_holding_register(0, 7);
    let (_responder, address) = start_responder(image).await;

    let json = format!(
        r#"{{"connection": {{"transport": "tcp", "host": "{}", "port": {}}}, "timeout_ms": 1000}}"#,
        address.ip(),
        address.port()
    );
    let master = ModbusMaster::new(ModbusMasterConfig::from_json(&json).unwrap()).unwrap();
    master.init().await.unwrap();
    assert_eq!(
        master.read_holding_registers(1, 0, 1).await.unwrap(),
        vec![7]
    );
    master.destroy().await;
}

/// Broadcast requests complete immediately: no waiter, no timeout possible.
#[tokio::test]
async fn test_broadcast_completes_without_waiting() {
    let image = Arc::new(ProcessImage::new(1));
    let (_responder, address) = start_responder(image.clone()).await;

    let mut config = ModbusMasterConfig::tcp(&address.ip().to_string(), address.port());
    config.timeout_ms = 2_000;
    let master = ModbusMaster::new(config).unwrap();
    master.init().await.unwrap();

    let started = Instant::now();
    let result = master
        .send(
            0,
            RequestPdu::WriteSingleRegister {
                address: 0,
                value: 99,
            },
        )
        .await
        .unwrap();
    assert_eq!(result, None);
    // Far below the 2-second timeout: nothing was waited on
    assert!(started.elapsed() < Duration::from_millis(500));

    // The broadcast write was still applied by the responder
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(image.read_holding_registers(0, 1), vec![99]);

    master.destroy().await;
}

/// A raw device stub that answers two requests in reverse arrival order.
/// Each waiter must still receive only its own response.
#[tokio::test]
async fn test_concurrent_transactions_survive_reordering() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut pending = Vec::new();
        let mut buf = bytes::BytesMut::new();
        let mut chunk = [0u8; 256];
        while pending.len() < 2 {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            while let Some(frame_bytes) = frame::extract_mbap_frame(&mut buf).unwrap() {
                pending.push(frame::unframe_mbap(&frame_bytes).unwrap());
            }
        }
        // Answer in reverse order; the payload echoes the requested address
        for adu in pending.into_iter().rev() {
            let request = RequestPdu::decode(&adu.pdu).unwrap();
            let address = match request {
                RequestPdu::ReadHoldingRegisters { address, .. } => address,
                other => panic!("unexpected request: {:?}", other),
            };
            let response = ResponsePdu::ReadHoldingRegisters {
                values: vec![address],
            };
            let reply =
                frame::frame_mbap(adu.transaction_id.unwrap(), adu.slave_id, &response.encode());
            socket.write_all(&reply).await.unwrap();
        }
        // Keep the connection open until the test is done
        let _ = socket.read(&mut chunk).await;
    });

    let master = Arc::new(connect_master(address).await);
    let first = {
        let master = master.clone();
        tokio::spawn(async move { master.read_holding_registers(1, 111, 1).await })
    };
    let second = {
        let master = master.clone();
        tokio::spawn(async move { master.read_holding_registers(1, 222, 1).await })
    };

    assert_eq!(first.await.unwrap().unwrap(), vec![111]);
    assert_eq!(second.await.unwrap().unwrap(), vec![222]);
    master.destroy().await;
}

/// A silent device: every attempt times out, the per-attempt timeout is
/// honored, and the call fails terminally after `retries + 1` attempts.
#[tokio::test]
async fn test_timeout_retries_then_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut chunk = [0u8; 256];
        // Swallow everything, answer nothing
        while socket.read(&mut chunk).await.unwrap_or(0) > 0 {}
    });

    let mut config = ModbusMasterConfig::tcp(&address.ip().to_string(), address.port());
    config.timeout_ms = 100;
    config.retries = 1;
    let master = ModbusMaster::new(config).unwrap();
    master.init().await.unwrap();

    let started = Instant::now();
    let result = master.read_holding_registers(1, 0, 1).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(ModbusError::Timeout { .. })));
    // Two attempts of 100 ms each
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2));
    assert_eq!(master.stats().timeouts, 2);

    master.destroy().await;
}

/// A device exception is a distinct outcome from transport failure and is
/// not retried.
#[tokio::test]
async fn test_device_exception_surfaces_without_retry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = bytes::BytesMut::new();
        let mut chunk = [0u8; 256];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            while let Some(frame_bytes) = frame::extract_mbap_frame(&mut buf).unwrap() {
                let adu = frame::unframe_mbap(&frame_bytes).unwrap();
                // Illegal data address for everything
                let pdu = vec![adu.pdu[0] | 0x80, 0x02];
                let reply =
                    frame::frame_mbap(adu.transaction_id.unwrap(), adu.slave_id, &pdu);
                socket.write_all(&reply).await.unwrap();
            }
        }
    });

    let master = connect_master(address).await;
    let result = master.read_holding_registers(1, 5000, 1).await;
    match result {
        Err(ModbusError::Exception { code, .. }) => assert_eq!(code, 0x02),
        other => panic!("expected device exception, got {:?}", other),
    }
    // Exactly one attempt: exceptions are never retried
    assert_eq!(master.stats().requests_sent, 1);
    master.destroy().await;
}

/// destroy() unblocks an outstanding send with a closed error instead of
/// leaving it hanging until the timeout.
#[tokio::test]
async fn test_destroy_unblocks_outstanding_send() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut chunk = [0u8; 256];
        while socket.read(&mut chunk).await.unwrap_or(0) > 0 {}
    });

    let mut config = ModbusMasterConfig::tcp(&address.ip().to_string(), address.port());
    config.timeout_ms = 10_000;
    config.retries = 0;
    let master = Arc::new(ModbusMaster::new(config).unwrap());
    master.init().await.unwrap();

    let in_flight = {
        let master = master.clone();
        tokio::spawn(async move { master.read_holding_registers(1, 0, 1).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    master.destroy().await;
    let result = in_flight.await.unwrap();

    assert_eq!(result, Err(ModbusError::Closed));
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// Validation failures are rejected before any bytes reach the wire.
#[tokio::test]
async fn test_oversized_request_never_transmitted() {
    let image = Arc::new(ProcessImage::new(1));
    let (_responder, address) = start_responder(image).await;
    let master = connect_master(address).await;

    let result = master.read_holding_registers(1, 0, 500).await;
    assert!(matches!(result, Err(ModbusError::InvalidData { .. })));
    assert_eq!(master.stats().requests_sent, 0);

    let bound = master
        .write_point(
            1,
            &Locator::new(RegisterRange::HoldingRegister, 0, DataType::Bcd16).unwrap(),
            &Value::U32(123_456),
        )
        .await;
    assert!(matches!(bound, Err(ModbusError::InvalidData { .. })));
    assert_eq!(master.stats().requests_sent, 0);

    master.destroy().await;
}

/// The UDP master speaks the same MBAP framing, one frame per datagram.
#[tokio::test]
async fn test_udp_master_round_trip() {
    let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let address = server.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            let (n, peer) = match server.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(_) => return,
            };
            let adu = frame::unframe_mbap(&buf[..n]).unwrap();
            let response = match RequestPdu::decode(&adu.pdu).unwrap() {
                RequestPdu::ReadInputRegisters { count, .. } => {
                    ResponsePdu::ReadInputRegisters {
                        values: (0..count).map(|i| i * 2).collect(),
                    }
                }
                other => panic!("unexpected request: {:?}", other),
            };
            let reply = frame::frame_mbap(
                adu.transaction_id.unwrap(),
                adu.slave_id,
                &response.encode(),
            );
            server.send_to(&reply, peer).await.unwrap();
        }
    });

    let mut config = ModbusMasterConfig::udp(&address.ip().to_string(), address.port());
    config.timeout_ms = 1_000;
    let master = ModbusMaster::new(config).unwrap();
    master.init().await.unwrap();

    assert_eq!(
        master.read_input_registers(1, 0, 4).await.unwrap(),
        vec![0, 2, 4, 6]
    );
    master.destroy().await;
}

/// Frame gap timing across baud rates, per the RTU silence rules.
#[test]
fn test_frame_gap_calculations() {
    use meridian_modbus::RtuTiming;

    for baud in [9_600u32, 19_200] {
        let timing = RtuTiming::from_settings(&SerialSettings::new("/dev/ttyUSB0", baud));
        let char_time_ns = 8.0 / baud as f64 * 1e9;
        assert_eq!(
            timing.character_spacing,
            Duration::from_nanos((1.5 * char_time_ns).round() as u64)
        );
        assert_eq!(
            timing.message_frame_spacing,
            Duration::from_nanos((3.5 * char_time_ns).round() as u64)
        );
    }

    for baud in [38_400u32, 115_200] {
        let timing = RtuTiming::from_settings(&SerialSettings::new("/dev/ttyUSB0", baud));
        assert_eq!(timing.character_spacing, Duration::from_nanos(750_000));
        assert_eq!(
            timing.message_frame_spacing,
            Duration::from_nanos(1_750_000)
        );
    }
}

/// Write listeners observe master-initiated writes through the responder,
/// with no-op suppression intact.
#[tokio::test]
async fn test_remote_write_notifies_listener_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let image = Arc::new(ProcessImage::new(1));
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    image.add_write_listener(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let (_responder, address) = start_responder(image).await;
    let master = connect_master(address).await;

    master.write_single_register(1, 0, 7).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Writing the same value again is a no-op for the listener
    master.write_single_register(1, 0, 7).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    master.destroy().await;
}
