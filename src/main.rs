use shelly_sunspec_gateway::{Config, GatewayCoordinator, ShutdownFlag, SunSpecMeterService};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Shelly SunSpec gateway");
    let config = Config::from_env()?;
    let socket_addr: SocketAddr = config.modbus_bind.parse()?;

    let shutdown = ShutdownFlag::new();
    let coordinator = GatewayCoordinator::start(config, shutdown).await?;
    let emulated_meter = SunSpecMeterService::new(coordinator.register_table());

    tokio::select! {
        res = server_context(socket_addr, emulated_meter) => {
            if let Err(e) = &res {
                error!("Modbus server stopped: {e}");
            }
            coordinator.stop().await;
            res
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, waiting for the poll loop");
            coordinator.stop().await;
            Ok(())
        }
    }
}

async fn server_context(
    socket_addr: SocketAddr,
    emulated_meter: SunSpecMeterService,
) -> anyhow::Result<()> {
    info!("Starting up Modbus server on {socket_addr}");
    let listener = TcpListener::bind(socket_addr).await?;
    let server = Server::new(listener);
    let new_service = |_socket_addr| Ok(Some(emulated_meter.clone()));
    let on_connected = |stream, socket_addr| async move {
        accept_tcp_connection(stream, socket_addr, new_service)
    };
    let on_process_error = |err| {
        error!("{err}");
    };
    server.serve(&on_connected, on_process_error).await?;
    Ok(())
}
