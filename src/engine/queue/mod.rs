//! Frame correlation queue: an unbounded FIFO fed by the receive path and
//! drained by scenario logic with bounded waits.
//!
//! `push` never blocks and never waits on the consumer: it is a plain send on
//! an unbounded channel. `pop` suspends only the calling scenario.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::trace;

use crate::engine::event::{CapturedEvent, EventFilter};
use crate::error::TimeoutError;

/// FIFO of captured events for one correlation stream.
///
/// A queue only accepts events while live, i.e. between [`open`](Self::open)
/// and [`close`](Self::close). Both transitions discard any backlog so a
/// scenario never observes events captured for its predecessor.
#[derive(Debug)]
pub struct CorrelationQueue {
    filter: EventFilter,
    live: AtomicBool,
    tx: mpsc::UnboundedSender<CapturedEvent>,
    rx: Mutex<mpsc::UnboundedReceiver<CapturedEvent>>,
}

impl CorrelationQueue {
    /// Create a closed queue accepting events matching `filter`.
    pub fn new(filter: EventFilter) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            filter,
            live: AtomicBool::new(false),
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Start accepting events; stale backlog is discarded.
    pub fn open(&self) {
        self.drain();
        self.live.store(true, Ordering::Release);
    }

    /// Stop accepting events and discard the backlog.
    pub fn close(&self) {
        self.live.store(false, Ordering::Release);
        self.drain();
    }

    /// Enqueue `event` if the queue is live and the filter accepts it.
    ///
    /// Returns whether the event was accepted.
    pub fn push(&self, event: CapturedEvent) -> bool {
        if !self.is_live() || !self.filter.matches(&event) {
            return false;
        }
        trace!(pgn = event.pgn, source = event.source, "event queued");
        self.tx.send(event).is_ok()
    }

    /// Wait up to `timeout` for the next event.
    pub async fn pop(&self, timeout: Duration) -> Result<CapturedEvent, TimeoutError> {
        self.pop_where(timeout, |_| true).await
    }

    /// Wait up to `timeout` for the next event satisfying `accept`; events
    /// rejected on the way are consumed.
    pub async fn pop_where<F>(
        &self,
        timeout: Duration,
        mut accept: F,
    ) -> Result<CapturedEvent, TimeoutError>
    where
        F: FnMut(&CapturedEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let expired = TimeoutError { waited: timeout };
        let mut rx = timeout_at(deadline, self.rx.lock())
            .await
            .map_err(|_| expired)?;
        loop {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) if accept(&event) => return Ok(event),
                Ok(Some(event)) => {
                    trace!(pgn = event.pgn, source = event.source, "event skipped");
                }
                // The sender lives as long as the queue: a closed channel cannot happen,
                // but it is still reported as silence.
                Ok(None) | Err(_) => return Err(expired),
            }
        }
    }

    /// Wait for `window` and report the first event arriving in it, if any.
    pub async fn expect_silence(&self, window: Duration) -> Result<(), CapturedEvent> {
        match self.pop(window).await {
            Ok(event) => Err(event),
            Err(_) => Ok(()),
        }
    }

    fn drain(&self) {
        // A concurrent `pop` owns the receiver; it is the scenario's own stream,
        // so there is nothing stale to discard in that case.
        if let Ok(mut rx) = self.rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
    }
}
