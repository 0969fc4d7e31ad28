//! Simulator entry point: CLI wiring, config loading, and runtime lifecycle.

use std::process;
use std::sync::Arc;

use tracing::{error, info, warn};

use ess_modbus_sim::cli::{self, CliOptions, Command};
use ess_modbus_sim::config::SimulatorConfig;
use ess_modbus_sim::logging;
use ess_modbus_sim::runner::Simulator;
use ess_modbus_sim::sim::clock::{Clock, WallClock};

fn load_config(cli: &CliOptions) -> SimulatorConfig {
    let mut config = match cli.config.as_deref() {
        Some(path) => SimulatorConfig::from_toml_file(path).unwrap_or_else(|e| {
            eprintln!("{e}");
            process::exit(1);
        }),
        None => SimulatorConfig::defaults(),
    };

    // Apply seed override
    if cli.seed.is_some() {
        config.simulation.seed = cli.seed;
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }
    config
}

async fn run(cli: CliOptions, config: SimulatorConfig) -> Result<(), String> {
    let clock: Arc<dyn Clock> = Arc::new(WallClock::new());
    let simulator = Simulator::start(config, clock)
        .await
        .map_err(|e| format!("failed to start simulator: {e}"))?;

    let (api_stop_tx, api_stop_rx) = tokio::sync::oneshot::channel::<()>();
    #[cfg(feature = "api")]
    let api_task = cli.api_port.map(|port| {
        use std::net::SocketAddr;

        let state = Arc::new(ess_modbus_sim::api::AppState::from_simulator(&simulator));
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tokio::spawn(async move {
            let stop = async move {
                let _ = api_stop_rx.await;
            };
            if let Err(e) = ess_modbus_sim::api::serve(state, addr, stop).await {
                error!(%addr, %e, "REST API failed");
            }
        })
    });
    #[cfg(not(feature = "api"))]
    {
        drop(api_stop_rx);
        if cli.api_port.is_some() {
            warn!("--api-port ignored: built without the `api` feature");
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "failed to listen for Ctrl-C; shutting down");
    }
    info!("shutdown requested");

    let _ = api_stop_tx.send(());
    #[cfg(feature = "api")]
    if let Some(task) = api_task {
        if let Err(e) = task.await {
            error!(%e, "REST API task failed");
        }
    }

    let statuses = simulator.shutdown().await;
    for status in [statuses.pv1, statuses.pv2, statuses.battery] {
        info!(
            endpoint = %status.name,
            port = status.port,
            running = status.running,
            "endpoint stopped"
        );
    }
    Ok(())
}

fn main() {
    let cli = match cli::parse_args() {
        Ok(Command::Run(opts)) => opts,
        Ok(Command::Help) => {
            cli::print_usage();
            return;
        }
        Err(e) => {
            eprintln!("error: {e}");
            cli::print_usage();
            process::exit(1);
        }
    };

    let config = load_config(&cli);
    logging::init(&cli.log_level);

    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("error: failed to create tokio runtime: {e}");
        process::exit(1);
    });
    if let Err(e) = rt.block_on(run(cli, config)) {
        error!("{e}");
        eprintln!("error: {e}");
        process::exit(1);
    }
}
