//! Reads every register of the SunSpec meter map from a Modbus/TCP device
//! and prints the decoded values. Useful for checking what an inverter will
//! see from the gateway, or from a real meter.
//!
//! Usage: `sunspec_reader [host:port]` (default `METER_ADDR` or 127.0.0.1:502)

use shelly_sunspec_gateway::register_catalog::RegisterCatalog;
use shelly_sunspec_gateway::register_decoder::RegisterValue;
use std::env;
use std::net::SocketAddr;
use tokio_modbus::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_METER_ADDR: &str = "127.0.0.1:502";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let meter_addr: SocketAddr = env::args()
        .nth(1)
        .or_else(|| env::var("METER_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_METER_ADDR.to_string())
        .parse()?;

    info!("Reading SunSpec registers from {meter_addr}");
    let mut ctx = tcp::connect(meter_addr).await?;

    let mut failures = 0;
    for entry in RegisterCatalog::sunspec_meter().entries() {
        // Catalog addresses are 1-based register numbers
        let words = match ctx.read_holding_registers(entry.address - 1, entry.length).await? {
            Ok(words) => words,
            Err(exception) => {
                warn!("Reading {} at {} failed: {exception}", entry.name, entry.address);
                failures += 1;
                continue;
            }
        };
        match RegisterValue::decode(entry, &words) {
            Ok(value) => println!(
                "{:>5} {:<12} {:<24} {}",
                entry.address,
                entry.name,
                value.to_string(),
                entry.description
            ),
            Err(e) => {
                warn!("{e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} registers could not be read");
    }
    Ok(())
}
