//! Bounded event intake and batching.
//!
//! The producer enqueues without ever blocking indefinitely: a full queue is
//! retried once inside a short grace window and then the event is dropped and
//! counted. A single batcher task drains the queue and emits a batch when
//! either the size bound is reached or the timeout since the first pending
//! event elapses. Shutdown flushes the pending batch before closing the
//! subscriber channel.

use crate::config::ListenerConfig;
use crate::error::Error;
use crate::now_ns;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spectre_k8s_util::event::{EventBatch, RawEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One retry inside this window before an event is dropped.
const ENQUEUE_GRACE: Duration = Duration::from_millis(10);

pub struct EventListener {
    tx: mpsc::Sender<RawEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventListener {
    /// Start the batcher task. The returned receiver yields batches until
    /// shutdown; the join handle completes after the final flush.
    pub fn spawn(
        config: ListenerConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<EventBatch>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
        let (batch_tx, batch_rx) = mpsc::channel(8);
        let dropped = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(batcher(config, rx, batch_tx, cancel));
        (Self { tx, dropped }, batch_rx, handle)
    }

    /// Non-blocking enqueue with one bounded-grace retry.
    pub async fn enqueue(&self, event: RawEvent) -> Result<(), Error> {
        let event = match self.tx.try_send(event) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(Error::BufferFull),
            Err(mpsc::error::TrySendError::Full(event)) => event,
        };
        tokio::time::sleep(ENQUEUE_GRACE).await;
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(_) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(msg = "listener buffer full, event dropped", dropped_total = total);
                Err(Error::BufferFull)
            }
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Intake side only, with the raw queue handed back; batching is not
    /// running.
    #[cfg(test)]
    fn without_batcher(buffer_size: usize) -> (Self, mpsc::Receiver<RawEvent>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn queue_capacity(&self) -> usize {
        self.tx.capacity()
    }
}

async fn batcher(
    config: ListenerConfig,
    mut rx: mpsc::Receiver<RawEvent>,
    batch_tx: mpsc::Sender<EventBatch>,
    cancel: CancellationToken,
) {
    let batch_size = config.batch_size.max(1);
    let timeout = Duration::from_millis(config.batch_timeout.max(1));
    let mut pending: Vec<RawEvent> = Vec::with_capacity(batch_size);
    // armed only while a partial batch is pending
    let mut deadline = Instant::now() + timeout;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                None => break,
                Some(event) => {
                    if pending.is_empty() {
                        deadline = Instant::now() + timeout;
                    }
                    pending.push(event);
                    if pending.len() >= batch_size {
                        flush(&mut pending, &batch_tx).await;
                    }
                }
            },
            _ = tokio::time::sleep_until(deadline), if !pending.is_empty() => {
                flush(&mut pending, &batch_tx).await;
            }
        }
    }

    // drain whatever the producer managed to enqueue, then final flush
    while let Ok(event) = rx.try_recv() {
        pending.push(event);
    }
    if !pending.is_empty() {
        info!(msg = "flushing final batch on shutdown", size = pending.len());
        flush(&mut pending, &batch_tx).await;
    }
}

async fn flush(pending: &mut Vec<RawEvent>, batch_tx: &mpsc::Sender<EventBatch>) {
    let events = std::mem::take(pending);
    let batch = EventBatch::new(now_ns(), events);
    debug!(msg = "batch formed", batch_id = %batch.batch_id, size = batch.len());
    if batch_tx.send(batch).await.is_err() {
        warn!(msg = "batch subscriber gone, discarding batch");
    }
}
