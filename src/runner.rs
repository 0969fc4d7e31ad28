//! Wires the simulation context to the three Modbus endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{ServerConfig, SimulatorConfig};
use crate::error::EndpointError;
use crate::modbus::{EndpointConfig, EndpointMonitor, EndpointStatus, ModbusEndpoint};
use crate::registers::{BatteryPublisher, RegisterPublisher, SolarPublisher};
use crate::sim::clock::Clock;
use crate::sim::context::SimulationContext;

/// Status of all three endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatuses {
    pub pv1: EndpointStatus,
    pub pv2: EndpointStatus,
    pub battery: EndpointStatus,
}

/// Status handles for all three endpoints; cheap to clone into other tasks.
#[derive(Debug, Clone)]
pub struct EndpointMonitors {
    pub pv1: EndpointMonitor,
    pub pv2: EndpointMonitor,
    pub battery: EndpointMonitor,
}

impl EndpointMonitors {
    pub fn statuses(&self) -> EndpointStatuses {
        EndpointStatuses {
            pv1: self.pv1.status(),
            pv2: self.pv2.status(),
            battery: self.battery.status(),
        }
    }
}

/// The running simulator: engines, alarm timer, and three endpoints.
///
/// PV1 and PV2 publish the same solar engine; the battery endpoint publishes
/// the battery engine.
pub struct Simulator {
    config: SimulatorConfig,
    context: SimulationContext,
    pv1: ModbusEndpoint,
    pv2: ModbusEndpoint,
    battery: ModbusEndpoint,
    shutdown_tx: watch::Sender<bool>,
    engine_tasks: Vec<JoinHandle<()>>,
}

impl Simulator {
    /// Builds the engines, starts their tasks, and binds all three endpoints.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `clock` - Time source for both engines
    ///
    /// # Errors
    ///
    /// Returns the first [`EndpointError`] hit while binding; anything
    /// already started is stopped before returning.
    pub async fn start(config: SimulatorConfig, clock: Arc<dyn Clock>) -> Result<Self, EndpointError> {
        let context = SimulationContext::from_config(&config, clock);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine_tasks = context.spawn(&shutdown_rx);

        let period = config.simulation.tick();
        let endpoint = |name: &str, server: &ServerConfig| EndpointConfig {
            publish_interval: period,
            ..EndpointConfig::new(name, server.host.clone(), server.port)
        };
        let solar = |name: &str| -> Arc<dyn RegisterPublisher> {
            Arc::new(SolarPublisher::new(name, Arc::clone(&context.solar)))
        };
        let battery_publisher: Arc<dyn RegisterPublisher> =
            Arc::new(BatteryPublisher::new("battery", Arc::clone(&context.battery)));

        let servers = &config.servers;
        let bound = async {
            let pv1 = ModbusEndpoint::bind(&endpoint("pv1", &servers.pv1), solar("pv1")).await?;
            let pv2 = ModbusEndpoint::bind(&endpoint("pv2", &servers.pv2), solar("pv2")).await?;
            let battery =
                ModbusEndpoint::bind(&endpoint("battery", &servers.battery), battery_publisher).await?;
            Ok::<_, EndpointError>((pv1, pv2, battery))
        }
        .await;

        let (pv1, pv2, battery) = match bound {
            Ok(endpoints) => endpoints,
            Err(err) => {
                error!(%err, "failed to start endpoints");
                stop_engines(&shutdown_tx, engine_tasks).await;
                return Err(err);
            }
        };

        info!(
            pv1 = %pv1.local_addr(),
            pv2 = %pv2.local_addr(),
            battery = %battery.local_addr(),
            seed = context.seed(),
            "simulator started"
        );
        Ok(Self {
            config,
            context,
            pv1,
            pv2,
            battery,
            shutdown_tx,
            engine_tasks,
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Shared engines, for operator controls and the REST API.
    pub fn context(&self) -> &SimulationContext {
        &self.context
    }

    pub fn pv1_addr(&self) -> SocketAddr {
        self.pv1.local_addr()
    }

    pub fn pv2_addr(&self) -> SocketAddr {
        self.pv2.local_addr()
    }

    pub fn battery_addr(&self) -> SocketAddr {
        self.battery.local_addr()
    }

    pub fn statuses(&self) -> EndpointStatuses {
        self.monitors().statuses()
    }

    pub fn monitors(&self) -> EndpointMonitors {
        EndpointMonitors {
            pv1: self.pv1.monitor(),
            pv2: self.pv2.monitor(),
            battery: self.battery.monitor(),
        }
    }

    /// Closes every endpoint, then stops the engines.
    ///
    /// Returns the final endpoint statuses, all with `running == false`.
    pub async fn shutdown(mut self) -> EndpointStatuses {
        self.pv1.shutdown().await;
        self.pv2.shutdown().await;
        self.battery.shutdown().await;
        let tasks = std::mem::take(&mut self.engine_tasks);
        stop_engines(&self.shutdown_tx, tasks).await;
        info!("simulator stopped");
        self.statuses()
    }
}

async fn stop_engines(shutdown_tx: &watch::Sender<bool>, tasks: Vec<JoinHandle<()>>) {
    // Ignored error: no receivers left means every engine task already ended.
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(err) = task.await {
            error!(%err, "engine task failed");
        }
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
