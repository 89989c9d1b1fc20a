use crate::config::Config;
use crate::error::Result;
use crate::poll_loop::PollLoop;
use crate::register_encoder::identification_image;
use crate::register_table::SharedRegisterTable;
use crate::shelly_client::ShellyClient;
use crate::shutdown::ShutdownFlag;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Wires the register table, Shelly client and poll loop together.
pub struct GatewayCoordinator {
    table: SharedRegisterTable,
    shutdown: ShutdownFlag,
    poll_handle: JoinHandle<()>,
}

impl GatewayCoordinator {
    /// Seeds the register table with the identification block and starts
    /// polling the Shelly in the background. Offset calibration, when
    /// enabled, happens inside the poll task, so this returns without
    /// waiting for the meter.
    pub async fn start(config: Config, shutdown: ShutdownFlag) -> Result<Self> {
        let table = SharedRegisterTable::new(identification_image(&config.identity)?);
        let client = ShellyClient::from_config(&config)?;
        info!("Initializing gateway for {}", client.endpoint_url());

        let poll_loop = PollLoop::new(client, config, table.clone(), shutdown.clone())?;
        let poll_handle = poll_loop.spawn();

        Ok(Self {
            table,
            shutdown,
            poll_handle,
        })
    }

    /// Handle to the table the Modbus server should serve
    pub fn register_table(&self) -> SharedRegisterTable {
        self.table.clone()
    }

    /// Asks the poll loop to stop and waits for it to finish its cycle
    pub async fn stop(self) {
        self.shutdown.trigger();
        if let Err(e) = self.poll_handle.await {
            warn!("Poll loop ended abnormally: {e}");
        }
    }
}
