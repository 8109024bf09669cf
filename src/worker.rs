//! Delivery worker: the background task that drains the transfer queue and
//! ships records to the collection endpoint.
//!
//! The worker owns all delivery policy. Backlog trimming happens in the queue
//! it drains; throttling, staleness filtering, dry-run handling, and the
//! bounded retry discipline live in the cycle below. A failure delivering one
//! record never escapes the loop, so one bad record cannot stall the ones
//! behind it, and nothing is ever reported back to the producer.
//!
//! ```text
//! IDLE ──► THROTTLED ──► FILTERING ──► SENDING ──► IDLE
//!   │                                               ▲
//!   └──────────── shutdown signal ──► STOPPED ◄─────┘
//! ```
//!
//! The network call itself is injected as an async callback, so the retry
//! policy is testable against scripted transports without a live endpoint.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::client::{classify, DeliveryOutcome, TransportError, TransportResponse};
use crate::config::DeliveryConfig;
use crate::format::{format_request, FieldMapping, FormattedRequest};
use crate::queue::RecordQueue;
use crate::record::Record;
use crate::units::convert_record;

/// Where the worker currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting on the transfer queue
    Idle,

    /// Holding a candidate until the posting interval elapses
    Throttled,

    /// Applying staleness policy and preparing the request
    Filtering,

    /// A delivery attempt sequence is in flight
    Sending,

    /// Shutdown observed; no further records will be drained
    Stopped,
}

/// Counters accumulated over the worker's lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    /// Records delivered successfully
    pub delivered: u64,

    /// Records dropped after exhausting retries or on a fatal response
    pub failed: u64,

    /// Records discarded for exceeding the stale age
    pub stale_discards: u64,

    /// Records discarded by backlog trimming
    pub backlog_discards: u64,

    /// Candidates replaced by fresher records while throttled
    pub superseded: u64,

    /// Requests formatted but not sent (dry-run)
    pub dry_runs: u64,
}

/// The long-lived consumer of the transfer queue.
///
/// Owns the consumer end of the queue and every piece of mutable delivery
/// state (last-attempt timestamp, counters). Runs until the queue closes or
/// the shutdown signal flips.
pub struct DeliveryWorker {
    queue: RecordQueue,
    config: Arc<DeliveryConfig>,
    mapping: FieldMapping,
    shutdown: watch::Receiver<bool>,
    state: WorkerState,
    stats: WorkerStats,
    last_attempt: Option<Instant>,
}

impl DeliveryWorker {
    pub fn new(
        queue: RecordQueue,
        config: Arc<DeliveryConfig>,
        mapping: FieldMapping,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            config,
            mapping,
            shutdown,
            state: WorkerState::Idle,
            stats: WorkerStats::default(),
            last_attempt: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Run the delivery loop until the queue closes or shutdown is signalled.
    ///
    /// `send` performs exactly one network call for a formatted request; the
    /// worker layers throttling, outcome classification, and bounded retries
    /// on top. Returns the final counters.
    pub async fn run<S, Fut>(mut self, send: S) -> WorkerStats
    where
        S: Fn(FormattedRequest) -> Fut,
        Fut: Future<Output = Result<TransportResponse, TransportError>>,
    {
        info!(
            endpoint = %self.config.server_url,
            post_interval_secs = self.config.post_interval.as_secs(),
            max_tries = self.config.max_tries,
            skip_upload = self.config.skip_upload,
            "Delivery worker started"
        );

        while let Some(record) = self.next_candidate().await {
            if let Some(record) = self.throttle(record).await {
                self.process(&send, record).await;
            }
        }

        self.state = WorkerState::Stopped;
        self.stats.backlog_discards = self.queue.discarded();
        info!(
            delivered = self.stats.delivered,
            failed = self.stats.failed,
            stale_discards = self.stats.stale_discards,
            backlog_discards = self.stats.backlog_discards,
            "Delivery worker stopped"
        );
        self.stats
    }

    /// Wait for the next queue record, observing the shutdown signal.
    async fn next_candidate(&mut self) -> Option<Record> {
        self.state = WorkerState::Idle;
        if *self.shutdown.borrow() {
            return None;
        }

        let record = tokio::select! {
            record = self.queue.next() => record?,
            _ = self.shutdown.changed() => return None,
        };
        self.stats.backlog_discards = self.queue.discarded();
        Some(record)
    }

    /// Enforce the minimum posting interval.
    ///
    /// Sleeps out the remainder of the interval, then replaces the candidate
    /// with the newest record that arrived in the meantime: at most one
    /// delivery attempt per interval, and the freshest data wins. Returns
    /// `None` when shutdown interrupts the wait.
    async fn throttle(&mut self, candidate: Record) -> Option<Record> {
        let Some(remaining) = self.time_until_next_attempt() else {
            return Some(candidate);
        };

        self.state = WorkerState::Throttled;
        debug!(
            record_id = %candidate.id,
            wait_secs = remaining.as_secs_f64(),
            "Holding record until posting interval elapses"
        );

        tokio::select! {
            _ = tokio::time::sleep(remaining) => {}
            _ = self.shutdown.changed() => return None,
        }

        let (newest, skipped) = self.queue.take_newest();
        match newest {
            Some(newer) => {
                let superseded = skipped as u64 + 1;
                self.stats.superseded += superseded;
                debug!(
                    record_id = %newer.id,
                    superseded,
                    "Candidate superseded by fresher record"
                );
                Some(newer)
            }
            None => Some(candidate),
        }
    }

    fn time_until_next_attempt(&self) -> Option<Duration> {
        let last = self.last_attempt?;
        let next = last + self.config.post_interval;
        let now = Instant::now();
        (now < next).then(|| next - now)
    }

    /// Filter, transform, format, and deliver one candidate record.
    async fn process<S, Fut>(&mut self, send: &S, record: Record)
    where
        S: Fn(FormattedRequest) -> Fut,
        Fut: Future<Output = Result<TransportResponse, TransportError>>,
    {
        self.state = WorkerState::Filtering;
        if self.is_stale(&record) {
            return;
        }

        let transformed = convert_record(&record, self.config.target_units);
        let request = match format_request(
            &transformed,
            &self.mapping,
            &self.config.hash,
            &self.config.server_url,
        ) {
            Ok(request) => request,
            Err(err) => {
                error!(record_id = %record.id, error = %err, "Could not format request");
                self.stats.failed += 1;
                return;
            }
        };

        // Throttling is measured between attempt starts; a dry run counts
        // as an attempt.
        self.last_attempt = Some(Instant::now());

        if self.config.skip_upload {
            self.stats.dry_runs += 1;
            info!(record_id = %record.id, url = %request, "Dry run, skipping upload");
            return;
        }

        self.deliver(send, &record, request).await;
    }

    fn is_stale(&mut self, record: &Record) -> bool {
        let Some(stale) = self.config.stale else {
            return false;
        };

        let age = record.age_secs(Utc::now());
        if age > stale.as_secs() as i64 {
            self.stats.stale_discards += 1;
            debug!(
                record_id = %record.id,
                age_secs = age,
                stale_secs = stale.as_secs(),
                "Discarding stale record"
            );
            true
        } else {
            false
        }
    }

    /// One bounded retry sequence for a single record.
    async fn deliver<S, Fut>(&mut self, send: &S, record: &Record, request: FormattedRequest)
    where
        S: Fn(FormattedRequest) -> Fut,
        Fut: Future<Output = Result<TransportResponse, TransportError>>,
    {
        self.state = WorkerState::Sending;
        let mut last_reason = String::new();

        for attempt in 1..=self.config.max_tries {
            if attempt > 1 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.retry_wait) => {}
                    _ = self.shutdown.changed() => {
                        self.log_failure(record, attempt - 1, "shutdown during retry wait");
                        return;
                    }
                }
            }

            match classify(&send(request.clone()).await) {
                DeliveryOutcome::Success => {
                    self.stats.delivered += 1;
                    if self.config.log_success {
                        info!(record_id = %record.id, attempt, url = %request, "Report delivered");
                    }
                    return;
                }
                DeliveryOutcome::Retry(reason) => {
                    warn!(
                        record_id = %record.id,
                        attempt,
                        max_tries = self.config.max_tries,
                        reason = %reason,
                        "Delivery attempt failed"
                    );
                    last_reason = reason;
                }
                DeliveryOutcome::Fatal(reason) => {
                    self.log_failure(record, attempt, &reason);
                    return;
                }
            }
        }

        self.log_failure(record, self.config.max_tries, &last_reason);
    }

    fn log_failure(&mut self, record: &Record, attempts: u32, reason: &str) {
        self.stats.failed += 1;
        if self.config.log_failure {
            error!(record_id = %record.id, attempts, reason = %reason, "Report dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::UnitSystem;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    fn test_config() -> DeliveryConfig {
        DeliveryConfig {
            hash: "ABC123".to_string(),
            server_url: "http://collector.example/report.php".to_string(),
            post_interval: Duration::from_secs(600),
            max_tries: 3,
            retry_wait: Duration::from_secs(5),
            ..DeliveryConfig::default()
        }
    }

    fn reading(temp_c: f64) -> Record {
        Record::new(UnitSystem::MetricWx).with_field("outTemp", Some(temp_c))
    }

    fn ok_response() -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status: StatusCode::OK,
            body: "ok".to_string(),
        })
    }

    fn status_response(status: u16) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status: StatusCode::from_u16(status).unwrap(),
            body: String::new(),
        })
    }

    /// Records the virtual start time and URL of every transport call.
    struct CallLog {
        calls: Mutex<Vec<(Instant, String)>>,
    }

    impl CallLog {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn push(&self, request: &FormattedRequest) {
            self.calls
                .lock()
                .unwrap()
                .push((Instant::now(), request.url().as_str().to_string()));
        }

        fn times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }

        fn urls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(_, u)| u.clone()).collect()
        }

        fn len(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    fn worker(
        config: DeliveryConfig,
        queue: RecordQueue,
        shutdown: watch::Receiver<bool>,
    ) -> DeliveryWorker {
        DeliveryWorker::new(queue, Arc::new(config), FieldMapping::temperatur_nu(), shutdown)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_delivery() {
        let (sender, queue) = RecordQueue::new(Some(1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log = CallLog::new();
        let log_clone = log.clone();

        sender.send(reading(21.4));
        drop(sender);

        let stats = worker(test_config(), queue, shutdown_rx)
            .run(move |request| {
                log_clone.push(&request);
                async { ok_response() }
            })
            .await;

        assert_eq!(log.len(), 1);
        assert!(log.urls()[0].contains("t=21"));
        assert!(log.urls()[0].contains("hash=ABC123"));
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 0);
        drop(shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_spaced_by_retry_wait() {
        let (sender, queue) = RecordQueue::new(Some(1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log = CallLog::new();
        let log_clone = log.clone();

        sender.send(reading(21.0));
        drop(sender);

        let stats = worker(test_config(), queue, shutdown_rx)
            .run(move |request| {
                log_clone.push(&request);
                async { status_response(500) }
            })
            .await;

        let times = log.times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(5));
        assert_eq!(times[2] - times[1], Duration::from_secs(5));
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);
        drop(shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_response_short_circuits_retries() {
        let (sender, queue) = RecordQueue::new(Some(1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log = CallLog::new();
        let log_clone = log.clone();

        sender.send(reading(21.0));
        drop(sender);

        let stats = worker(test_config(), queue, shutdown_rx)
            .run(move |request| {
                log_clone.push(&request);
                async { status_response(401) }
            })
            .await;

        assert_eq!(log.len(), 1);
        assert_eq!(stats.failed, 1);
        drop(shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stall_subsequent_records() {
        let mut config = test_config();
        config.post_interval = Duration::ZERO;
        let (sender, queue) = RecordQueue::new(Some(1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log = CallLog::new();
        let log_clone = log.clone();

        sender.send(reading(1.0));
        sender.send(reading(2.0));
        drop(sender);

        // first record is rejected outright, second succeeds
        let stats = worker(config, queue, shutdown_rx)
            .run(move |request| {
                log_clone.push(&request);
                let first = log_clone.len() == 1;
                async move {
                    if first {
                        status_response(400)
                    } else {
                        ok_response()
                    }
                }
            })
            .await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 1);
        drop(shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_record_never_reaches_transport() {
        let mut config = test_config();
        config.stale = Some(Duration::from_secs(300));
        let (sender, queue) = RecordQueue::new(Some(1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log = CallLog::new();
        let log_clone = log.clone();

        let old = reading(21.0)
            .with_timestamp(Utc::now() - chrono::Duration::seconds(400));
        sender.send(old);
        drop(sender);

        let stats = worker(config, queue, shutdown_rx)
            .run(move |request| {
                log_clone.push(&request);
                async { ok_response() }
            })
            .await;

        assert_eq!(log.len(), 0);
        assert_eq!(stats.stale_discards, 1);
        assert_eq!(stats.failed, 0);
        drop(shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_spaced_by_post_interval() {
        let (sender, queue) = RecordQueue::new(Some(1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log = CallLog::new();
        let log_clone = log.clone();

        sender.send(reading(1.0));
        sender.send(reading(2.0));
        drop(sender);

        worker(test_config(), queue, shutdown_rx)
            .run(move |request| {
                log_clone.push(&request);
                async { ok_response() }
            })
            .await;

        let times = log.times();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_secs(600));
        drop(shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_candidate_superseded_by_newest() {
        let (sender, queue) = RecordQueue::new(Some(1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log = CallLog::new();
        let log_clone = log.clone();

        sender.send(reading(1.0));
        sender.send(reading(2.0));
        sender.send(reading(3.0));
        drop(sender);

        let stats = worker(test_config(), queue, shutdown_rx)
            .run(move |request| {
                log_clone.push(&request);
                async { ok_response() }
            })
            .await;

        // the first record goes out immediately; while the second waits out
        // the interval the third arrives and wins
        let urls = log.urls();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("t=1"));
        assert!(urls[1].contains("t=3"));
        assert_eq!(stats.superseded, 1);
        assert_eq!(stats.delivered, 2);
        drop(shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_bound_drops_oldest() {
        let mut config = test_config();
        config.post_interval = Duration::ZERO;
        config.max_backlog = Some(2);
        let (sender, queue) = RecordQueue::new(config.max_backlog);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log = CallLog::new();
        let log_clone = log.clone();

        for i in 1..=5 {
            sender.send(reading(i as f64));
        }
        drop(sender);

        let stats = worker(config, queue, shutdown_rx)
            .run(move |request| {
                log_clone.push(&request);
                async { ok_response() }
            })
            .await;

        let urls = log.urls();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("t=4"));
        assert!(urls[1].contains("t=5"));
        assert_eq!(stats.backlog_discards, 3);
        assert_eq!(stats.delivered, 2);
        drop(shutdown_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_skips_transport() {
        let mut config = test_config();
        config.skip_upload = true;
        let (sender, queue) = RecordQueue::new(Some(1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log = CallLog::new();
        let log_clone = log.clone();

        sender.send(reading(21.0));
        drop(sender);

        let stats = worker(config, queue, shutdown_rx)
            .run(move |request| {
                log_clone.push(&request);
                async { ok_response() }
            })
            .await;

        assert_eq!(log.len(), 0);
        assert_eq!(stats.dry_runs, 1);
        assert_eq!(stats.delivered, 0);
        drop(shutdown_tx);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_worker() {
        let (sender, queue) = RecordQueue::new(Some(1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            worker(test_config(), queue, shutdown_rx)
                .run(|_request| async { ok_response() })
                .await
        });

        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap();
        assert_eq!(stats.delivered, 0);

        // the producer side stays decoupled: sending after shutdown is silent
        sender.send(reading(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_throttle_wait() {
        let (sender, queue) = RecordQueue::new(Some(1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log = CallLog::new();
        let log_clone = log.clone();

        sender.send(reading(1.0));
        sender.send(reading(2.0));

        let handle = tokio::spawn(async move {
            worker(test_config(), queue, shutdown_rx)
                .run(move |request| {
                    log_clone.push(&request);
                    async { ok_response() }
                })
                .await
        });

        // let the first record go out, then stop while the second is throttled
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(log.len(), 1);
        drop(sender);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_conversion_applied_before_formatting() {
        let (sender, queue) = RecordQueue::new(Some(1000));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let log = CallLog::new();
        let log_clone = log.clone();

        // 50 degF must reach the endpoint as 10 degC
        sender.send(Record::new(UnitSystem::Us).with_field("outTemp", Some(50.0)));
        drop(sender);

        worker(test_config(), queue, shutdown_rx)
            .run(move |request| {
                log_clone.push(&request);
                async { ok_response() }
            })
            .await;

        assert!(log.urls()[0].contains("t=10"));
        drop(shutdown_tx);
    }
}
