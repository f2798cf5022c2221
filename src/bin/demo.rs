//! End-to-end demo: a TCP slave responder serving a process image, polled
//! and written by a master on the same machine.
//!
//! ```bash
//! RUST_LOG=debug cargo run --bin demo
//! ```

use anyhow::Result;
use std::sync::Arc;

use meridian_modbus::{
    DataType, Locator, ModbusMaster, ModbusMasterConfig, ModbusTcpResponder, ProcessImage,
    RegisterRange, ResponderConfig, Value,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init()
        .ok();

    // Slave side: a process image with a few points
    let image = Arc::new(ProcessImage::new(1));
    image.set_numeric(
        RegisterRange::HoldingRegister,
        0,
        DataType::Uint32Swapped,
        &Value::U32(0x8000_0001),
    )?;
    image.set_numeric(
        RegisterRange::InputRegister,
        0,
        DataType::Float32,
        &Value::F32(21.5),
    )?;
    image.set_exception_status(0x07);
    image.add_write_listener(Box::new(|write| {
        println!(
            "image write: {} @{}: {} -> {}",
            write.range, write.offset, write.old, write.new
        );
    }));

    let mut responder = ModbusTcpResponder::new(
        ResponderConfig {
            bind_address: "127.0.0.1:0".parse()?,
            ..Default::default()
        },
        image.clone(),
    );
    responder.start().await?;
    let address = responder
        .local_address()
        .expect("responder reports its bound address after start");
    println!("responder listening on {}", address);

    // Master side
    let master = ModbusMaster::new(ModbusMasterConfig::tcp(
        &address.ip().to_string(),
        address.port(),
    ))?;
    master.init().await?;

    println!("connectivity: {}", master.test_connectivity(1).await);

    let point = Locator::new(RegisterRange::HoldingRegister, 0, DataType::Uint32Swapped)?;
    println!("point value: {}", master.read_point(1, &point).await?);

    let temperature = Locator::new(RegisterRange::InputRegister, 0, DataType::Float32)?;
    println!("temperature: {}", master.read_point(1, &temperature).await?);

    master.write_single_register(1, 100, 0x2A2A).await?;
    master
        .write_multiple_registers(1, 101, vec![1, 2, 3])
        .await?;
    println!(
        "registers 100..104: {:?}",
        master.read_holding_registers(1, 100, 4).await?
    );

    master.write_single_coil(1, 0, true).await?;
    println!("coils 0..8: {:?}", master.read_coils(1, 0, 8).await?);

    let stats = master.stats();
    println!(
        "master stats: {} requests, {} responses, {} timeouts",
        stats.requests_sent, stats.responses_received, stats.timeouts
    );

    master.destroy().await;
    responder.stop().await;
    Ok(())
}
