//! Shared test fixtures for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use ess_modbus_sim::config::{ServerConfig, SimulatorConfig};
use ess_modbus_sim::error::TableError;
use ess_modbus_sim::modbus::RegisterTable;
use ess_modbus_sim::registers::RegisterPublisher;
use ess_modbus_sim::sim::clock::ManualClock;

/// How long a test waits for any single socket operation.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Noon on a summer day, so the PV model is producing.
pub fn noon() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .expect("valid timestamp")
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(noon()))
}

/// Defaults with every endpoint on `127.0.0.1:0`, seed 42, and a 100 ms tick.
pub fn local_config() -> SimulatorConfig {
    let mut config = SimulatorConfig::defaults();
    for server in [
        &mut config.servers.pv1,
        &mut config.servers.pv2,
        &mut config.servers.battery,
    ] {
        *server = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
    }
    config.simulation.seed = Some(42);
    config.simulation.tick_ms = 100;
    config
}

/// Publishes a fixed value pattern: `address -> value`.
pub struct FixedPublisher {
    pub cells: Vec<(u16, u16)>,
}

impl RegisterPublisher for FixedPublisher {
    fn name(&self) -> &str {
        "fixed"
    }

    fn publish(&self, table: &mut RegisterTable) -> Result<(), TableError> {
        for &(address, value) in &self.cells {
            table.set(address, value)?;
        }
        Ok(())
    }
}

/// Builds a Modbus TCP frame with a correct length field.
pub fn frame(transaction: u16, unit: u8, function: u8, payload: &[u8]) -> Vec<u8> {
    let length = (payload.len() + 2) as u16;
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&transaction.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.push(unit);
    out.push(function);
    out.extend_from_slice(payload);
    out
}

/// Two big-endian u16 values back to back.
pub fn pair(a: u16, b: u16) -> Vec<u8> {
    let mut out = a.to_be_bytes().to_vec();
    out.extend_from_slice(&b.to_be_bytes());
    out
}

/// Decodes the register values of a read response.
pub fn registers(response: &[u8]) -> Vec<u16> {
    response[9..]
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect()
}

/// Minimal Modbus TCP master for tests.
pub struct ModbusClient {
    stream: TcpStream,
    transaction: u16,
}

impl ModbusClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = timeout(IO_TIMEOUT, TcpStream::connect(addr))
            .await
            .expect("connect timed out")
            .expect("connect should succeed");
        Self {
            stream,
            transaction: 0,
        }
    }

    /// Sends raw bytes and waits for one response.
    pub async fn raw(&mut self, bytes: &[u8]) -> Vec<u8> {
        self.send(bytes).await;
        self.receive().await
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write should succeed");
    }

    pub async fn receive(&mut self) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        let len = timeout(IO_TIMEOUT, self.stream.read(&mut buf))
            .await
            .expect("response timed out")
            .expect("read should succeed");
        buf.truncate(len);
        buf
    }

    /// Function 03 or 04; returns the raw response.
    pub async fn read(&mut self, function: u8, start: u16, quantity: u16) -> Vec<u8> {
        self.transaction = self.transaction.wrapping_add(1);
        let request = frame(self.transaction, 1, function, &pair(start, quantity));
        self.raw(&request).await
    }

    /// Reads holding registers and returns their values.
    pub async fn read_holding(&mut self, start: u16, quantity: u16) -> Vec<u16> {
        let response = self.read(0x03, start, quantity).await;
        assert_eq!(response[7], 0x03, "unexpected response {response:02x?}");
        registers(&response)
    }

    /// Reads input registers and returns their values.
    pub async fn read_input(&mut self, start: u16, quantity: u16) -> Vec<u16> {
        let response = self.read(0x04, start, quantity).await;
        assert_eq!(response[7], 0x04, "unexpected response {response:02x?}");
        registers(&response)
    }

    /// Reads a 32-bit word pair.
    pub async fn read_u32(&mut self, address: u16) -> u32 {
        let words = self.read_holding(address, 2).await;
        (u32::from(words[0]) << 16) | u32::from(words[1])
    }

    /// Re-reads holding registers every 50 ms until `accept` passes or
    /// `limit` elapses; returns the last values read.
    pub async fn wait_for_holding(
        &mut self,
        start: u16,
        quantity: u16,
        limit: Duration,
        accept: impl Fn(&[u16]) -> bool,
    ) -> Vec<u16> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let values = self.read_holding(start, quantity).await;
            if accept(&values) || tokio::time::Instant::now() >= deadline {
                return values;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn write_single(&mut self, address: u16, value: u16) -> Vec<u8> {
        self.transaction = self.transaction.wrapping_add(1);
        let request = frame(self.transaction, 1, 0x06, &pair(address, value));
        self.raw(&request).await
    }

    pub async fn write_multiple(&mut self, start: u16, values: &[u16]) -> Vec<u8> {
        self.transaction = self.transaction.wrapping_add(1);
        let mut payload = pair(start, values.len() as u16);
        payload.push((values.len() * 2) as u8);
        for value in values {
            payload.extend_from_slice(&value.to_be_bytes());
        }
        let request = frame(self.transaction, 1, 0x10, &payload);
        self.raw(&request).await
    }
}

/// Polls `check` every 50 ms until it returns `true` or `limit` elapses.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check().await
}
