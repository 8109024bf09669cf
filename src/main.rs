//! Station Uplink - telemetry uplink service for weather station readings
//!
//! This service samples a simulated weather station, queues the readings,
//! and ships them one at a time to a remote collection endpoint with
//! throttling, staleness filtering, and bounded retries.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `UPLINK_HASH`: station credential (required)
//! - `UPLINK_SERVER_URL`: report endpoint (default: temperatur.nu)
//! - `UPLINK_POST_INTERVAL_SECS`: minimum seconds between deliveries (default: 600)
//! - `UPLINK_MAX_BACKLOG`: newest records retained under backlog (default: 1000)
//! - `UPLINK_STALE_SECS`: max record age worth sending (default: no limit)
//! - `UPLINK_TIMEOUT_SECS`: HTTP request timeout (default: 60)
//! - `UPLINK_MAX_TRIES`: delivery attempts per record (default: 3)
//! - `UPLINK_RETRY_WAIT_SECS`: wait between attempts (default: 5)
//! - `UPLINK_SKIP_UPLOAD`: format requests but never send (default: false)
//! - `UPLINK_SAMPLE_INTERVAL_SECS`: simulated station cadence (default: 30)
//! - `RUST_LOG`: logging level filter (default: info)

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use station_uplink::client::HttpTransport;
use station_uplink::config::DeliveryConfig;
use station_uplink::format::FieldMapping;
use station_uplink::queue::{RecordQueue, RecordSender};
use station_uplink::station::StationSimulator;
use station_uplink::worker::DeliveryWorker;

/// Default cadence of the simulated station, in seconds
const DEFAULT_SAMPLE_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting station uplink service...");

    // Load configuration from environment; a missing credential stops the
    // service before the worker ever starts
    let config = match DeliveryConfig::from_env() {
        Ok(config) => {
            info!(
                endpoint = %config.server_url,
                post_interval_secs = config.post_interval.as_secs(),
                max_tries = config.max_tries,
                skip_upload = config.skip_upload,
                "Configuration loaded"
            );
            Arc::new(config)
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let transport = match HttpTransport::new(config.timeout) {
        Ok(transport) => transport,
        Err(e) => {
            error!(error = %e, "Failed to create HTTP transport");
            std::process::exit(1);
        }
    };

    // The queue is the only hand-off point between producer and worker
    let (sender, queue) = RecordQueue::new(config.max_backlog);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn the delivery worker - owns all throttle/staleness/retry policy
    let worker = DeliveryWorker::new(
        queue,
        config.clone(),
        FieldMapping::temperatur_nu(),
        shutdown_rx,
    );
    let worker_transport = transport.clone();
    let worker_handle = tokio::spawn(async move {
        worker
            .run(move |request| {
                let transport = worker_transport.clone();
                async move { transport.fetch(&request).await }
            })
            .await
    });

    // Spawn the station sampler - produces records at a fixed cadence
    let sample_interval = env::var("UPLINK_SAMPLE_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SAMPLE_INTERVAL_SECS);
    let station_handle = tokio::spawn(run_station(
        StationSimulator::new(),
        sender,
        Duration::from_secs(sample_interval),
    ));
    info!(sample_interval_secs = sample_interval, "Station sampler started");

    // Wait for shutdown signal
    info!("Station uplink running. Press Ctrl+C to stop.");
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received, stopping...");
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    }

    // Graceful shutdown: stop producing, then signal the worker to finish or
    // abandon its current attempt
    station_handle.abort();
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = config.timeout + Duration::from_secs(5);
    match tokio::time::timeout(shutdown_timeout, worker_handle).await {
        Ok(Ok(stats)) => {
            info!(
                delivered = stats.delivered,
                failed = stats.failed,
                stale_discards = stats.stale_discards,
                backlog_discards = stats.backlog_discards,
                "Worker shut down gracefully"
            );
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Worker panicked during shutdown");
        }
        Err(_) => {
            warn!("Worker shutdown timed out after {:?}", shutdown_timeout);
        }
    }

    info!("Station uplink stopped");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}

/// Sample the station at a fixed cadence and enqueue each reading.
///
/// Runs until the worker side of the queue goes away or the task is aborted.
async fn run_station(mut station: StationSimulator, sender: RecordSender, every: Duration) {
    let mut ticker = interval(every);

    loop {
        ticker.tick().await;

        if sender.is_closed() {
            info!("Queue closed, station sampler stopping");
            break;
        }

        let record = station.sample();
        debug!(
            record_id = %record.id,
            out_temp = ?record.value("outTemp"),
            "Sampled station"
        );
        sender.send(record);
    }
}
