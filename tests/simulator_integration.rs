mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ModbusClient, eventually, local_config, manual_clock};
use ess_modbus_sim::devices::AlarmKind;
use ess_modbus_sim::devices::battery::PeakShavingMode;
use ess_modbus_sim::registers::{battery, pv};
use ess_modbus_sim::runner::Simulator;
use ess_modbus_sim::sim::clock::Clock;

async fn start() -> (Simulator, Arc<ess_modbus_sim::sim::ManualClock>) {
    let clock = manual_clock();
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let simulator = Simulator::start(local_config(), dyn_clock)
        .await
        .expect("simulator should start");
    (simulator, clock)
}

#[tokio::test]
async fn three_endpoints_on_distinct_ports() {
    let (simulator, _clock) = start().await;
    let statuses = simulator.statuses();

    for status in [&statuses.pv1, &statuses.pv2, &statuses.battery] {
        assert!(status.running, "{} should be running", status.name);
        assert_ne!(status.port, 0);
    }
    assert_ne!(statuses.pv1.port, statuses.pv2.port);
    assert_ne!(statuses.pv2.port, statuses.battery.port);
    assert_eq!(simulator.context().seed(), 42);

    simulator.shutdown().await;
}

#[tokio::test]
async fn pv_endpoints_publish_the_same_solar_model() {
    let (simulator, _clock) = start().await;
    let mut pv1 = ModbusClient::connect(simulator.pv1_addr()).await;
    let mut pv2 = ModbusClient::connect(simulator.pv2_addr()).await;

    let startup = simulator.context().solar.snapshot().startup_time_s;
    assert_eq!(pv1.read_u32(pv::STARTUP_TIME.address).await, startup);
    assert_eq!(pv2.read_u32(pv::STARTUP_TIME.address).await, startup);
    assert_eq!(
        pv1.read_u32(pv::SHUTDOWN_TIME.address).await,
        pv2.read_u32(pv::SHUTDOWN_TIME.address).await
    );

    // slots past the configured MPPT channels stay zero on both
    let unused = pv::mppt_voltage(20).address;
    assert_eq!(pv1.read_holding(unused, 8).await, vec![0; 8]);
    assert_eq!(pv2.read_input(unused, 8).await, vec![0; 8]);

    simulator.shutdown().await;
}

#[tokio::test]
async fn battery_endpoint_publishes_fixed_and_live_registers() {
    let (simulator, _clock) = start().await;
    let mut client = ModbusClient::connect(simulator.battery_addr()).await;

    let connecting = client.read_holding(battery::CONNECTING.address, 1).await;
    assert_eq!(connecting, vec![battery::CONNECTING_STATUS]);
    let rack_mode = client.read_holding(battery::RACK_MODE.address, 1).await;
    assert_eq!(rack_mode, vec![3]);

    let statuses = client.read_holding(battery::SYSTEM_STATUS.address, 3).await;
    for status in statuses {
        assert!((1..=3).contains(&status), "status {status}");
    }

    let soc = client.read_holding(battery::SYSTEM_SOC.address, 1).await[0];
    assert!(soc <= 1000);

    simulator.shutdown().await;
}

#[tokio::test]
async fn load_override_drives_peak_shaving_over_modbus() {
    let (simulator, _clock) = start().await;
    let engine = Arc::clone(&simulator.context().battery);
    engine.set_soc(60.0);
    engine.set_load_override(Some(100.0));

    let mut client = ModbusClient::connect(simulator.battery_addr()).await;
    let start = battery::BATTERY_POWER.address;
    let span = battery::LOAD_POWER.address + 2 - start;
    let words = |values: &[u16], address: u16| {
        let i = usize::from(address - start);
        (u32::from(values[i]) << 16) | u32::from(values[i + 1])
    };
    let values = client
        .wait_for_holding(start, span, Duration::from_secs(3), |v| {
            words(v, battery::LOAD_POWER.address) == 100_000
                && words(v, battery::BATTERY_POWER.address) > 0
        })
        .await;
    assert_eq!(words(&values, battery::LOAD_POWER.address), 100_000);
    assert!(words(&values, battery::BATTERY_POWER.address) > 0);
    assert_eq!(engine.snapshot().peak_shaving.mode, PeakShavingMode::Discharging);

    simulator.shutdown().await;
}

#[tokio::test]
async fn manual_alarm_reaches_the_alarm_register() {
    let (simulator, _clock) = start().await;
    let engine = Arc::clone(&simulator.context().battery);
    let mut client = ModbusClient::connect(simulator.battery_addr()).await;
    let alarm_addr = battery::ALARM_CODE.address;

    engine.trigger_alarm(AlarmKind::Overtemperature);
    let code = AlarmKind::Overtemperature.code();
    let limit = Duration::from_secs(3);
    let raised = client.wait_for_holding(alarm_addr, 1, limit, |v| v[0] == code).await;
    assert_eq!(raised, vec![code]);

    assert_eq!(engine.clear_alarm(), Some(AlarmKind::Overtemperature));
    let cleared = client.wait_for_holding(alarm_addr, 1, limit, |v| v[0] == 0).await;
    assert_eq!(cleared, vec![0]);

    simulator.shutdown().await;
}

#[tokio::test]
async fn automatic_alarm_follows_the_clock() {
    let mut config = local_config();
    config.alarms.trigger_interval_ms = 5_000;
    config.alarms.duration_ms = 2_000;
    let clock = manual_clock();
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let simulator = Simulator::start(config, dyn_clock).await.expect("start");
    let engine = Arc::clone(&simulator.context().battery);

    assert_eq!(engine.snapshot().alarm_code, 0);

    clock.advance(Duration::from_secs(5));
    let raised = eventually(Duration::from_secs(3), || {
        let engine = Arc::clone(&engine);
        async move { engine.snapshot().alarm_code != 0 }
    })
    .await;
    assert!(raised, "alarm should fire once the interval has elapsed");

    clock.advance(Duration::from_secs(2));
    let cleared = eventually(Duration::from_secs(3), || {
        let engine = Arc::clone(&engine);
        async move { engine.snapshot().alarm_code == 0 }
    })
    .await;
    assert!(cleared, "alarm should clear after its duration");

    simulator.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_every_endpoint() {
    let (simulator, _clock) = start().await;
    let addrs = [
        simulator.pv1_addr(),
        simulator.pv2_addr(),
        simulator.battery_addr(),
    ];
    let _client = ModbusClient::connect(addrs[0]).await;

    let statuses = simulator.shutdown().await;
    for status in [statuses.pv1, statuses.pv2, statuses.battery] {
        assert!(!status.running, "{} still running", status.name);
        assert_eq!(status.connections, 0);
    }
    for addr in addrs {
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}

#[tokio::test]
async fn bind_conflict_is_reported() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let mut config = local_config();
    config.servers.battery.port = occupied.local_addr().expect("addr").port();

    let clock: Arc<dyn Clock> = manual_clock();
    let err = Simulator::start(config, clock).await.err();
    assert!(
        matches!(err, Some(ess_modbus_sim::error::EndpointError::Bind { .. })),
        "expected bind error, got {err:?}"
    );
}
