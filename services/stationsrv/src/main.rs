//! Drilling station service
//!
//! Drives one or two rotary-indexing drilling stations over Modbus TCP and
//! exposes them to the cell over MQTT. Each station runs as its own task;
//! a shared cancellation token turns SIGINT/SIGTERM into a cooperative
//! stop that parks every actuator before the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fieldbus::{ModbusTransport, TransportOptions};
use stationsrv::config::Config;
use stationsrv::interlock::LockSet;
use stationsrv::io::StationIo;
use stationsrv::pipeline::StationController;
use stationsrv::routing::RoutingSink;
use stationsrv::shutdown;
use stationsrv::telemetry::{TelemetryEvent, TelemetryService};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[clap(short, long, value_parser, default_value = "config/stationsrv.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(
                "Failed to load configuration from {}: {}",
                args.config.display(),
                e
            );
            std::process::exit(1);
        }
    };

    info!(
        "Starting {}: {} station(s), paired={}",
        config.service_name,
        config.stations.len(),
        config.effective_paired()
    );

    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel::<TelemetryEvent>(64);
    let (routing_sink, routing_rx) = RoutingSink::channel(config.routing_queue);

    let mut lock_sets: Vec<LockSet> = if config.effective_paired() {
        let (first, second) = LockSet::pair();
        vec![first, second]
    } else {
        config
            .stations
            .iter()
            .map(|_| LockSet::standalone())
            .collect()
    };

    let mut controllers = Vec::new();
    let mut command_targets = Vec::new();
    for station in &config.stations {
        let identity = station.resolve_identity()?;
        let addr = station.socket_addr()?;
        let transport = ModbusTransport::new(
            addr,
            TransportOptions {
                exchange_timeout: config.transport.exchange_timeout(),
                slave_id: config.transport.slave_id,
            },
        );
        let io = Arc::new(StationIo::new(
            Arc::new(transport),
            station.output_base,
            station.input_base,
            config.transport.write_attempts,
            config.transport.write_backoff(),
        ));
        info!("[{}] station wired to {}", identity, addr);

        command_targets.push((identity.clone(), io.clone()));
        controllers.push(StationController::new(
            identity,
            io,
            lock_sets.remove(0),
            routing_sink.clone(),
            event_tx.clone(),
            config.timing.clone(),
            cancel.clone(),
        ));
    }
    // Controllers hold the only remaining senders; the pump ends when the
    // last controller does.
    drop(event_tx);
    drop(routing_sink);

    let telemetry = TelemetryService::connect(&config.mqtt, command_targets, cancel.clone());
    let pump = tokio::spawn(telemetry.pump(event_rx, routing_rx));

    let tasks: Vec<_> = controllers
        .into_iter()
        .map(|controller| tokio::spawn(controller.run()))
        .collect();
    let mut stations = futures::future::join_all(tasks);

    let results = tokio::select! {
        _ = shutdown::wait_for_shutdown() => {
            info!("Shutdown requested, stopping stations");
            cancel.cancel();
            (&mut stations).await
        }
        results = &mut stations => {
            warn!("All station controllers ended before shutdown was requested");
            cancel.cancel();
            results
        }
    };

    let mut faulted = false;
    for result in results {
        match result {
            Ok(Ok(())) => {}
            // The controller already logged the fault with its station tag
            Ok(Err(_)) => faulted = true,
            Err(e) => {
                faulted = true;
                error!("Station task panicked: {}", e);
            }
        }
    }

    if let Err(e) = pump.await {
        warn!("Telemetry pump ended abnormally: {}", e);
    }

    info!("Station service stopped");
    if faulted {
        std::process::exit(1);
    }
    Ok(())
}
