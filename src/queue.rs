//! Transfer queue between the station producer and the delivery worker.
//!
//! The queue is the sole hand-off point in the pipeline: the producer side
//! never blocks and never sees an error, the single consumer receives records
//! in FIFO order. Memory stays bounded on the consumer side, where each cycle
//! trims the drained backlog to the newest `max_backlog` records before a
//! candidate is selected.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::record::Record;

/// Producer handle for submitting records to the queue.
///
/// Clonable and non-blocking. A record sent after the consumer has gone away
/// is dropped with a debug log; the producer is never handed an error.
#[derive(Clone)]
pub struct RecordSender {
    tx: mpsc::UnboundedSender<Record>,
}

impl RecordSender {
    /// Enqueue one record. Always returns immediately.
    pub fn send(&self, record: Record) {
        if let Err(err) = self.tx.send(record) {
            debug!(record_id = %err.0.id, "Queue closed, dropping record");
        }
    }

    /// True once the consumer side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the transfer queue. Exactly one exists per channel.
pub struct RecordQueue {
    rx: mpsc::UnboundedReceiver<Record>,

    /// Records drained from the channel but not yet handed to the worker
    pending: VecDeque<Record>,

    /// Keep at most this many drained records; `None` means unbounded
    max_backlog: Option<usize>,

    /// Total records dropped by backlog trimming
    discarded: u64,
}

impl RecordQueue {
    /// Create a queue, returning the producer handle and the consumer.
    pub fn new(max_backlog: Option<usize>) -> (RecordSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();

        let queue = Self {
            rx,
            pending: VecDeque::new(),
            max_backlog,
            discarded: 0,
        };

        (RecordSender { tx }, queue)
    }

    /// Wait for the next record in FIFO order.
    ///
    /// Before selecting, everything immediately available is drained and the
    /// backlog is trimmed to the newest `max_backlog` records, discarding the
    /// oldest excess. Returns `None` once every producer handle has been
    /// dropped and the queue is fully drained.
    pub async fn next(&mut self) -> Option<Record> {
        self.drain_available();
        if self.pending.is_empty() {
            let first = self.rx.recv().await?;
            self.pending.push_back(first);
            self.drain_available();
        }
        self.trim_backlog();
        self.pending.pop_front()
    }

    /// Take the newest immediately-available record and discard everything
    /// older, returning the count of discarded records.
    ///
    /// Used by the worker to supersede a throttled candidate with fresher
    /// data once the posting interval has elapsed.
    pub fn take_newest(&mut self) -> (Option<Record>, usize) {
        self.drain_available();
        let newest = self.pending.pop_back();
        let dropped = self.pending.len();
        self.pending.clear();
        (newest, dropped)
    }

    /// Records currently drained and awaiting selection.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Total records dropped by backlog trimming so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn drain_available(&mut self) {
        while let Ok(record) = self.rx.try_recv() {
            self.pending.push_back(record);
        }
    }

    fn trim_backlog(&mut self) {
        let Some(max) = self.max_backlog else {
            return;
        };
        let excess = self.pending.len().saturating_sub(max);
        if excess > 0 {
            // Newest data wins: drop from the front
            self.pending.drain(..excess);
            self.discarded += excess as u64;
            info!(
                dropped = excess,
                retained = self.pending.len(),
                "Backlog over limit, discarding oldest records"
            );
        }
    }
}
