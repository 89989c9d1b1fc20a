//! Shelly SunSpec Gateway Library
//!
//! Reads a Shelly Pro 3EM over its HTTP RPC API and publishes the readings as
//! a SunSpec float meter (model 213) over Modbus/TCP, so inverters that expect
//! a Fronius smart meter can use the Shelly instead.

pub mod config;
pub mod error;
pub mod gateway_coordinator;
pub mod meter_service;
pub mod normalizer;
pub mod poll_loop;
pub mod register_catalog;
pub mod register_decoder;
pub mod register_encoder;
pub mod register_table;
pub mod semantic_mapper;
pub mod shelly_client;
pub mod shutdown;
pub mod telemetry;

// Re-export commonly used types for easier access
pub use config::Config;
pub use error::{GatewayError, Result};
pub use gateway_coordinator::GatewayCoordinator;
pub use meter_service::SunSpecMeterService;
pub use poll_loop::{PollLoop, PollState, TelemetrySource};
pub use register_decoder::RegisterValue;
pub use register_table::{RegisterImage, SharedRegisterTable};
pub use shelly_client::ShellyClient;
pub use shutdown::ShutdownFlag;
pub use telemetry::{Phase, TelemetryRecord};
