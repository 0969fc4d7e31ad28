//! TCP listener that serves one [`RegisterTable`] and keeps it fed from a
//! [`RegisterPublisher`].
//!
//! Each endpoint runs three kinds of task: one accept loop, one session per
//! live connection, and one periodic publisher. All of them stop when the
//! endpoint is shut down or dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use super::dispatch;
use super::table::{RegisterTable, SharedTable};
use crate::error::EndpointError;
use crate::registers::RegisterPublisher;

/// Receive buffer per connection; comfortably above the largest Modbus TCP ADU.
const READ_BUFFER_LEN: usize = 1024;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Where and how often an endpoint serves its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Label used in logs and status reports.
    pub name: String,
    /// Interface to bind (e.g. `"0.0.0.0"`).
    pub host: String,
    /// TCP port; 0 picks an ephemeral port.
    pub port: u16,
    /// Period of the table publish step.
    pub publish_interval: Duration,
}

impl EndpointConfig {
    /// Creates a config publishing once per second.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            publish_interval: Duration::from_secs(1),
        }
    }
}

/// Point-in-time endpoint status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    /// Endpoint label.
    pub name: String,
    /// `false` once the listener has been closed.
    pub running: bool,
    /// Bound TCP port.
    pub port: u16,
    /// Currently open client connections.
    pub connections: usize,
}

#[derive(Debug)]
struct EndpointState {
    name: String,
    port: u16,
    running: AtomicBool,
    connections: AtomicUsize,
}

/// Cheap, clonable read handle onto an endpoint's status.
#[derive(Debug, Clone)]
pub struct EndpointMonitor {
    state: Arc<EndpointState>,
}

impl EndpointMonitor {
    /// Returns the current status.
    pub fn status(&self) -> EndpointStatus {
        EndpointStatus {
            name: self.state.name.clone(),
            running: self.state.running.load(Ordering::SeqCst),
            port: self.state.port,
            connections: self.state.connections.load(Ordering::SeqCst),
        }
    }
}

/// Holds one slot in the live-connection count for as long as it exists.
struct ConnectionGuard {
    state: Arc<EndpointState>,
}

impl ConnectionGuard {
    fn new(state: Arc<EndpointState>) -> Self {
        state.connections.fetch_add(1, Ordering::SeqCst);
        Self { state }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A running Modbus TCP slave.
///
/// # Examples
///
/// ```no_run
/// # async fn demo(publisher: std::sync::Arc<dyn ess_modbus_sim::registers::RegisterPublisher>)
/// # -> Result<(), ess_modbus_sim::error::EndpointError> {
/// use ess_modbus_sim::modbus::{EndpointConfig, ModbusEndpoint};
///
/// let mut endpoint =
///     ModbusEndpoint::bind(&EndpointConfig::new("pv1", "127.0.0.1", 0), publisher).await?;
/// println!("listening on {}", endpoint.local_addr());
/// endpoint.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ModbusEndpoint {
    local_addr: SocketAddr,
    table: SharedTable,
    state: Arc<EndpointState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ModbusEndpoint {
    /// Binds the listener, publishes once, and starts the accept and publish
    /// tasks on the current tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Bind address, label, and publish period
    /// * `publisher` - Copies simulation state into the table on every publish step
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Bind`] if the address cannot be bound and
    /// [`EndpointError::Io`] if the bound address cannot be queried.
    pub async fn bind(
        config: &EndpointConfig,
        publisher: Arc<dyn RegisterPublisher>,
    ) -> Result<Self, EndpointError> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| EndpointError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let table = RegisterTable::shared();
        publish_into(publisher.as_ref(), &table);

        let state = Arc::new(EndpointState {
            name: config.name.clone(),
            port: local_addr.port(),
            running: AtomicBool::new(true),
            connections: AtomicUsize::new(0),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&table),
            Arc::clone(&state),
            shutdown_rx.clone(),
        ));
        let publish = tokio::spawn(publish_loop(
            publisher,
            Arc::clone(&table),
            config.publish_interval,
            shutdown_rx,
        ));

        info!(endpoint = %config.name, %local_addr, "modbus endpoint listening");
        Ok(Self {
            local_addr,
            table,
            state,
            shutdown_tx,
            tasks: vec![accept, publish],
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle to the endpoint's register table.
    pub fn table(&self) -> SharedTable {
        Arc::clone(&self.table)
    }

    /// Returns `{running, port, connections}` for this endpoint.
    pub fn status(&self) -> EndpointStatus {
        self.monitor().status()
    }

    /// Returns a status handle that outlives borrows of the endpoint.
    pub fn monitor(&self) -> EndpointMonitor {
        EndpointMonitor {
            state: Arc::clone(&self.state),
        }
    }

    /// Stops accepting, force-closes every open connection, stops the
    /// publisher, and returns once the listener is closed.
    pub async fn shutdown(&mut self) {
        // Ignored error: every receiver already gone means every task already stopped.
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                error!(endpoint = %self.state.name, %err, "endpoint task failed");
            }
        }
        self.state.running.store(false, Ordering::SeqCst);
        info!(endpoint = %self.state.name, "modbus endpoint closed");
    }
}

impl Drop for ModbusEndpoint {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Runs one publish step with the table lock held throughout.
fn publish_into(publisher: &dyn RegisterPublisher, table: &SharedTable) {
    let Ok(mut guard) = table.lock() else {
        error!(publisher = publisher.name(), "register table lock poisoned; skipping publish");
        return;
    };
    if let Err(err) = publisher.publish(&mut guard) {
        error!(publisher = publisher.name(), %err, "publish step failed");
    }
}

async fn publish_loop(
    publisher: Arc<dyn RegisterPublisher>,
    table: SharedTable,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => publish_into(publisher.as_ref(), &table),
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    table: SharedTable,
    state: Arc<EndpointState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let guard = ConnectionGuard::new(Arc::clone(&state));
                    sessions.spawn(serve_connection(stream, peer, Arc::clone(&table), guard));
                }
                Err(err) => {
                    warn!(endpoint = %state.name, %err, "accept failed");
                    // transient errors like EMFILE repeat immediately otherwise
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(err) = joined {
                    error!(endpoint = %state.name, %err, "connection task failed");
                }
            }
        }
    }

    sessions.shutdown().await;
    drop(listener);
    state.running.store(false, Ordering::SeqCst);
}

/// Serves one client until it disconnects or the socket fails.
///
/// Every successful `read` is treated as one request frame.
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    table: SharedTable,
    _guard: ConnectionGuard,
) {
    info!(%peer, "client connected");
    let mut buf = vec![0u8; READ_BUFFER_LEN];
    loop {
        let len = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(len) => len,
            Err(err) => {
                debug!(%peer, %err, "read failed");
                break;
            }
        };

        let Some(response) = dispatch::handle_frame(&buf[..len], &table) else {
            continue;
        };
        if let Err(err) = stream.write_all(&response).await {
            debug!(%peer, %err, "write failed");
            break;
        }
    }
    info!(%peer, "client disconnected");
}
