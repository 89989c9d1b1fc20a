use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    net::TcpListener,
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

use shelly_sunspec_gateway::{
    register_catalog::RegisterCatalog, Config, GatewayCoordinator, RegisterValue, ShutdownFlag,
    SunSpecMeterService,
};

/// Builds a `Shelly.GetStatus` document. Phases A and B import, phase C
/// exports `c_act_power` (negative) through an unsigned current reading.
fn status_document(c_act_power: f64) -> Value {
    json!({
        "em:0": {
            "id": 0,
            "a_current": 4.0,
            "a_voltage": 230.0,
            "a_act_power": 900.0,
            "a_aprt_power": 920.0,
            "a_pf": 0.97,
            "a_freq": 50.0,
            "b_current": 2.0,
            "b_voltage": 231.0,
            "b_act_power": 450.0,
            "b_aprt_power": 460.0,
            "b_pf": 0.97,
            "b_freq": 50.0,
            "c_current": 3.0,
            "c_voltage": 229.0,
            "c_act_power": c_act_power,
            "c_aprt_power": 690.0,
            "c_pf": 0.87,
            "c_freq": 50.0,
            "n_current": null,
            "total_current": 9.0,
            "total_act_power": 1350.0 + c_act_power,
            "total_aprt_power": 2070.0,
            "user_calibrated_phase": []
        },
        "emdata:0": {
            "id": 0,
            "a_total_act_energy": 1000.0,
            "a_total_act_ret_energy": 10.0,
            "b_total_act_energy": 2000.0,
            "b_total_act_ret_energy": 20.0,
            "c_total_act_energy": 3000.0,
            "c_total_act_ret_energy": 30.0,
            "total_act": 6000.0,
            "total_act_ret": 60.0
        }
    })
}

/// Mock Shelly Pro 3EM HTTP RPC server
struct MockShellyServer {
    status: Mutex<Value>,
    request_count: AtomicU32,
    should_fail: AtomicBool,
}

impl MockShellyServer {
    fn new() -> Self {
        Self {
            status: Mutex::new(status_document(-600.0)),
            request_count: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
        }
    }

    fn set_c_power(&self, power: f64) {
        *self.status.lock().unwrap() = status_document(power);
    }

    fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::Relaxed);
    }

    fn get_request_count(&self) -> u32 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn create_router(self: Arc<Self>) -> Router {
        Router::new().route(
            "/rpc/Shelly.GetStatus",
            get({
                let server = self.clone();
                move || async move {
                    server.request_count.fetch_add(1, Ordering::Relaxed);

                    if server.should_fail.load(Ordering::Relaxed) {
                        return Err(StatusCode::INTERNAL_SERVER_ERROR);
                    }
                    Ok(Json(server.status.lock().unwrap().clone()))
                }
            }),
        )
    }
}

/// Start mock Shelly HTTP server
async fn start_mock_shelly_server() -> (Arc<MockShellyServer>, SocketAddr, oneshot::Sender<()>) {
    let mock_server = Arc::new(MockShellyServer::new());
    let app = mock_server.clone().create_router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        let server = axum::serve(listener, app);
        tokio::select! {
            _ = server => {},
            _ = shutdown_rx => {
                println!("Mock Shelly server shutting down");
            }
        }
    });

    (mock_server, addr, shutdown_tx)
}

/// Start the emulated meter's Modbus TCP server
async fn start_meter_server(emulated_meter: SunSpecMeterService) -> SocketAddr {
    let meter_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let meter_addr = meter_listener.local_addr().unwrap();

    tokio::spawn(async move {
        let server = Server::new(meter_listener);
        let new_service = |_socket_addr| Ok(Some(emulated_meter.clone()));
        let on_connected = |stream, socket_addr| async move {
            accept_tcp_connection(stream, socket_addr, new_service)
        };
        let on_process_error = |err| {
            eprintln!("Meter server error: {}", err);
        };

        let _ = server.serve(&on_connected, on_process_error).await;
    });

    meter_addr
}

fn test_config(shelly_addr: SocketAddr) -> Config {
    Config {
        shelly_url: format!("http://{}/rpc/Shelly.GetStatus", shelly_addr),
        poll_interval_ms: 100,
        error_backoff_ms: 300,
        request_timeout_ms: 500,
        ..Config::default()
    }
}

/// Reads one float from the emulated meter, given its SunSpec register number
async fn read_f32(
    meter_addr: SocketAddr,
    sunspec_register: u16,
) -> Result<f32, Box<dyn std::error::Error>> {
    let mut ctx = tcp::connect(meter_addr).await?;
    let words = ctx.read_holding_registers(sunspec_register - 1, 2).await??;
    Ok(u16_pair_to_f32(words[0], words[1]))
}

async fn read_f32_with_timeout(meter_addr: SocketAddr, sunspec_register: u16) -> f32 {
    timeout(Duration::from_secs(5), read_f32(meter_addr, sunspec_register))
        .await
        .expect("Timeout waiting for Modbus response")
        .expect("Failed to read from meter")
}

/// SunSpec floats are stored as [high_bits, low_bits]
fn u16_pair_to_f32(high: u16, low: u16) -> f32 {
    let combined: u32 = ((high as u32) << 16) | (low as u32);
    f32::from_bits(combined)
}

#[tokio::test]
async fn test_full_integration() {
    let (mock_shelly, shelly_addr, _shelly_shutdown) = start_mock_shelly_server().await;

    let coordinator = GatewayCoordinator::start(test_config(shelly_addr), ShutdownFlag::new())
        .await
        .unwrap();
    let meter_addr = start_meter_server(SunSpecMeterService::new(coordinator.register_table())).await;

    sleep(Duration::from_millis(500)).await;

    // Identification block
    let mut ctx = tcp::connect(meter_addr).await.unwrap();
    let header = ctx.read_holding_registers(40000, 4).await.unwrap().unwrap();
    assert_eq!(header, vec![0x5375, 0x6e53, 1, 65]);
    let model = ctx.read_holding_registers(40069, 2).await.unwrap().unwrap();
    assert_eq!(model, vec![213, 124]);

    // Test 1: measurements published with SunSpec signs
    let total_power = read_f32_with_timeout(meter_addr, 40098).await;
    assert!((total_power - 750.0).abs() < 0.1, "W = {total_power}");
    let c_current = read_f32_with_timeout(meter_addr, 40078).await;
    assert_eq!(c_current, -3.0);
    let total_current = read_f32_with_timeout(meter_addr, 40072).await;
    assert_eq!(total_current, 3.0);
    let c_reactive = read_f32_with_timeout(meter_addr, 40120).await;
    assert!((c_reactive - (690.0f32 * 690.0 - 600.0 * 600.0).sqrt()).abs() < 0.01);
    let ab_voltage = read_f32_with_timeout(meter_addr, 40090).await;
    assert!((ab_voltage - 230.0 * 3f32.sqrt()).abs() < 0.01);

    // Test 2: updates propagate
    mock_shelly.set_c_power(-300.0);
    sleep(Duration::from_millis(500)).await;
    let updated_power = read_f32_with_timeout(meter_addr, 40098).await;
    assert!((updated_power - 1050.0).abs() < 0.1, "W = {updated_power}");

    // Test 3: while the Shelly fails the last good reading stays published
    mock_shelly.set_should_fail(true);
    sleep(Duration::from_millis(200)).await;
    mock_shelly.set_c_power(300.0);
    sleep(Duration::from_millis(400)).await;
    let stale_power = read_f32_with_timeout(meter_addr, 40098).await;
    assert!((stale_power - 1050.0).abs() < 0.1, "W = {stale_power}");

    // Test 4: recovery after the backoff
    mock_shelly.set_should_fail(false);
    sleep(Duration::from_millis(1000)).await;
    let recovered_power = read_f32_with_timeout(meter_addr, 40098).await;
    assert!((recovered_power - 1650.0).abs() < 0.1, "W = {recovered_power}");
    // Importing again, so the current is positive
    let c_current = read_f32_with_timeout(meter_addr, 40078).await;
    assert_eq!(c_current, 3.0);

    assert!(
        mock_shelly.get_request_count() > 5,
        "Expected repeated Shelly polls, got {}",
        mock_shelly.get_request_count()
    );

    coordinator.stop().await;
}

#[tokio::test]
async fn test_calibrated_offsets_and_nullified_channel() {
    let (_mock_shelly, shelly_addr, _shelly_shutdown) = start_mock_shelly_server().await;

    let config = Config {
        calibrate_offsets: true,
        nullify_channel: vec!["b".to_string()],
        ..test_config(shelly_addr)
    };
    let coordinator = GatewayCoordinator::start(config, ShutdownFlag::new())
        .await
        .unwrap();
    let meter_addr = start_meter_server(SunSpecMeterService::new(coordinator.register_table())).await;

    sleep(Duration::from_millis(500)).await;

    // Counters have not moved since calibration
    assert_eq!(read_f32_with_timeout(meter_addr, 40138).await, 0.0);
    assert_eq!(read_f32_with_timeout(meter_addr, 40130).await, 0.0);

    // Phase B contributes nothing, but its voltage is still reported
    assert_eq!(read_f32_with_timeout(meter_addr, 40102).await, 0.0);
    assert_eq!(read_f32_with_timeout(meter_addr, 40076).await, 0.0);
    assert_eq!(read_f32_with_timeout(meter_addr, 40084).await, 231.0);
    assert_eq!(read_f32_with_timeout(meter_addr, 40098).await, 300.0);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_every_catalog_register_decodes_over_modbus() {
    let (_mock_shelly, shelly_addr, _shelly_shutdown) = start_mock_shelly_server().await;

    let coordinator = GatewayCoordinator::start(test_config(shelly_addr), ShutdownFlag::new())
        .await
        .unwrap();
    let meter_addr = start_meter_server(SunSpecMeterService::new(coordinator.register_table())).await;

    sleep(Duration::from_millis(500)).await;

    let mut ctx = tcp::connect(meter_addr).await.unwrap();
    for entry in RegisterCatalog::sunspec_meter().entries() {
        let words = ctx
            .read_holding_registers(entry.address - 1, entry.length)
            .await
            .unwrap()
            .unwrap();
        let value = RegisterValue::decode(entry, &words).unwrap();
        match entry.name {
            "SID" => assert_eq!(value, RegisterValue::Uint32(0x5375_6e53)),
            "Mn" => assert_eq!(value, RegisterValue::Text("Fronius".to_string())),
            "SN" => assert_eq!(value, RegisterValue::Text("00000002".to_string())),
            "MeterID" => assert_eq!(value, RegisterValue::Uint16(213)),
            "W" => assert_eq!(value, RegisterValue::Float32(750.0)),
            "EndID" => assert_eq!(value, RegisterValue::Uint16(0xFFFF)),
            _ => {}
        }
    }

    coordinator.stop().await;
}
