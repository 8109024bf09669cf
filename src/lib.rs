//! Station Uplink
//!
//! Ships periodic weather station readings to a remote collection endpoint
//! over an unreliable network link, without blocking the producer and with
//! bounded memory when the endpoint is unreachable:
//!
//! - **config**: environment-based delivery configuration
//! - **record**: the immutable reading snapshot flowing through the pipeline
//! - **units**: pure unit-system conversion for outgoing records
//! - **queue**: non-blocking producer / single-consumer transfer queue
//! - **format**: field mapping and credential-redacting request construction
//! - **client**: HTTP transport and delivery outcome classification
//! - **worker**: the background delivery loop (throttle, staleness, retries)
//! - **station**: simulated record source for running without hardware
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! use station_uplink::client::HttpTransport;
//! use station_uplink::config::DeliveryConfig;
//! use station_uplink::format::FieldMapping;
//! use station_uplink::queue::RecordQueue;
//! use station_uplink::station::StationSimulator;
//! use station_uplink::worker::DeliveryWorker;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(DeliveryConfig::from_env().expect("Failed to load config"));
//!     let transport = HttpTransport::new(config.timeout).expect("Failed to create transport");
//!
//!     let (sender, queue) = RecordQueue::new(config.max_backlog);
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//!     // Producer side: enqueue never blocks
//!     let mut station = StationSimulator::new();
//!     sender.send(station.sample());
//!
//!     // Consumer side: the worker owns all delivery policy
//!     let worker = DeliveryWorker::new(queue, config, FieldMapping::temperatur_nu(), shutdown_rx);
//!     let stats = worker
//!         .run(move |request| {
//!             let transport = transport.clone();
//!             async move { transport.fetch(&request).await }
//!         })
//!         .await;
//!     println!("delivered {} records", stats.delivered);
//! }
//! ```

// Module declarations
pub mod client;
pub mod config;
pub mod format;
pub mod queue;
pub mod record;
pub mod station;
pub mod units;
pub mod worker;

// Re-export commonly used types at crate root for convenience
pub use client::{DeliveryOutcome, HttpTransport, TransportError, TransportResponse};
pub use config::{ConfigError, DeliveryConfig};
pub use format::{FieldMapping, FormatError, FormattedRequest, MappingEntry};
pub use queue::{RecordQueue, RecordSender};
pub use record::Record;
pub use station::StationSimulator;
pub use units::{convert_record, convert_value, ObservationKind, UnitSystem};
pub use worker::{DeliveryWorker, WorkerState, WorkerStats};
