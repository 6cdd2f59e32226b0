//! Fair multi-source merge with bounded unfairness.
//!
//! [`FairScheduler`] forwards items from N input channels into one sink
//! such that no input can monopolize throughput while others have items
//! ready. The worker keeps two flags per source:
//!
//! - `closed` — the source channel has ended; it is out of the rotation
//!   for good.
//! - `rate_limited` — the source just delivered an item; it sits out until
//!   the next reset.
//!
//! Each turn the worker waits for the first of: the stop signal, an item
//! or closure from any admitted source, or — only while the fallback arm
//! is armed — the observation that no admitted source is ready. Delivering
//! an item rate-limits its source and arms the fallback; the fallback
//! firing readmits every still-open source and disarms itself, so the
//! worker never spins while all sources are idle.
//!
//! Between any two consecutive deliveries from the same source there is
//! either a delivery from every other open source that had an item ready
//! or a "no source ready" observation: unfairness is bounded.
//!
//! # Example
//!
//! ```ignore
//! use tokio::sync::mpsc;
//! use ventio::scheduler::FairScheduler;
//!
//! let (sink_tx, mut sink_rx) = mpsc::channel(1);
//! let mut scheduler = FairScheduler::new(sink_tx);
//!
//! let (source_tx, source_rx) = mpsc::channel(1);
//! scheduler.add_source(source_rx)?;
//! scheduler.start();
//!
//! source_tx.send(42).await?;
//! assert_eq!(sink_rx.recv().await, Some(42));
//!
//! scheduler.stop();
//! ```

use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::task::Poll;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{Result, VentioError};

/// Merges N source channels into one sink, fairly.
pub struct FairScheduler<T> {
    sources: Vec<mpsc::Receiver<T>>,
    sink: Option<mpsc::Sender<T>>,
    stop: Option<oneshot::Sender<()>>,
    started: bool,
}

impl<T: Send + 'static> FairScheduler<T> {
    /// Create a scheduler that forwards into `sink`.
    pub fn new(sink: mpsc::Sender<T>) -> Self {
        Self {
            sources: Vec::new(),
            sink: Some(sink),
            stop: None,
            started: false,
        }
    }

    /// Register a source channel. Valid only before [`FairScheduler::start`].
    ///
    /// # Errors
    ///
    /// Returns [`VentioError::SchedulerStarted`] once the scheduler has
    /// been started.
    pub fn add_source(&mut self, source: mpsc::Receiver<T>) -> Result<()> {
        if self.started {
            return Err(VentioError::SchedulerStarted);
        }
        self.sources.push(source);
        Ok(())
    }

    /// Spawn the merge worker.
    ///
    /// With zero sources the sink is closed immediately and no worker is
    /// spawned. Starting twice has no effect.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&mut self) {
        if self.started {
            debug!("scheduler already started");
            return;
        }
        self.started = true;

        let Some(sink) = self.sink.take() else { return };
        if self.sources.is_empty() {
            // Dropping the only sender closes the sink.
            return;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop = Some(stop_tx);

        let worker = MergeWorker::new(std::mem::take(&mut self.sources), sink, stop_rx);
        tokio::spawn(worker.run());
    }

    /// Stop the worker; the sink closes after any in-flight delivery
    /// completes. A no-op before [`FairScheduler::start`] and after a
    /// previous stop.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            // The worker may already have exited on its own.
            let _ = stop.send(());
        }
    }
}

/// One wake-up of the merge worker.
enum Event<T> {
    /// The stop signal fired (or its sender disappeared).
    Stop,
    /// An admitted source delivered an item.
    Item(usize, T),
    /// An admitted source ended.
    SourceClosed(usize),
    /// The armed fallback fired: no admitted source was ready.
    Idle,
}

struct MergeWorker<T> {
    sources: Vec<mpsc::Receiver<T>>,
    sink: mpsc::Sender<T>,
    stop_rx: oneshot::Receiver<()>,
    closed: Vec<bool>,
    rate_limited: Vec<bool>,
    fallback_armed: bool,
    /// Source index to poll first; rotates past the last delivering source.
    cursor: usize,
}

impl<T: Send + 'static> MergeWorker<T> {
    fn new(
        sources: Vec<mpsc::Receiver<T>>,
        sink: mpsc::Sender<T>,
        stop_rx: oneshot::Receiver<()>,
    ) -> Self {
        let count = sources.len();
        Self {
            sources,
            sink,
            stop_rx,
            closed: vec![false; count],
            rate_limited: vec![false; count],
            fallback_armed: false,
            cursor: 0,
        }
    }

    async fn run(mut self) {
        loop {
            match self.next_event().await {
                Event::Stop => {
                    // Dropping `self.sink` closes the output.
                    return;
                }
                Event::Item(index, item) => {
                    self.rate_limited[index] = true;
                    self.fallback_armed = true;
                    self.cursor = (index + 1) % self.sources.len();
                    if self.sink.send(item).await.is_err() {
                        // Receiver gone; nothing left to forward to.
                        return;
                    }
                }
                Event::SourceClosed(index) => {
                    self.closed[index] = true;
                    if self.closed.iter().all(|&closed| closed) {
                        return;
                    }
                }
                Event::Idle => {
                    // Readmit every still-open source and disarm the
                    // fallback until the next delivery.
                    for index in 0..self.sources.len() {
                        if !self.closed[index] {
                            self.rate_limited[index] = false;
                        }
                    }
                    self.fallback_armed = false;
                }
            }
        }
    }

    /// Multiplex over the stop signal, every admitted source, and — while
    /// armed — the fallback arm.
    async fn next_event(&mut self) -> Event<T> {
        let Self {
            sources,
            stop_rx,
            closed,
            rate_limited,
            fallback_armed,
            cursor,
            ..
        } = self;

        poll_fn(|cx| {
            if Pin::new(&mut *stop_rx).poll(cx).is_ready() {
                return Poll::Ready(Event::Stop);
            }

            let count = sources.len();
            for offset in 0..count {
                let index = (*cursor + offset) % count;
                if closed[index] || rate_limited[index] {
                    continue;
                }
                match sources[index].poll_recv(cx) {
                    Poll::Ready(Some(item)) => return Poll::Ready(Event::Item(index, item)),
                    Poll::Ready(None) => return Poll::Ready(Event::SourceClosed(index)),
                    Poll::Pending => {}
                }
            }

            if *fallback_armed {
                Poll::Ready(Event::Idle)
            } else {
                Poll::Pending
            }
        })
        .await
    }
}
