//! The tailing loop driving a pipeline.
//!
//! `Created -> Running -> Stopping -> Stopped`. While running, each polled
//! record goes through the converter, the filter policy and the processor, in
//! that order. [`LoopHandle::stop`] can be called from anywhere; it interrupts
//! a pending poll, after which the loop closes the processor (draining the
//! dispatcher) and the source.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::converter::RecordConverter;
use crate::filter::FilterPolicy;
use crate::model::{Keyed, RawRecord};
use crate::processor::OffsetsProcessor;
use crate::source::OffsetsSource;
use crate::{Error, Result};

/// Pause before polling again after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Lifecycle of a tailing loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Created => "created",
            LoopState::Running => "running",
            LoopState::Stopping => "stopping",
            LoopState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counters reported when the loop finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Raw records received from the source
    pub polled: u64,
    /// Records handed to the processor
    pub processed: u64,
    /// Records dropped by the filter policy
    pub filtered: u64,
    /// Records the converter does not care about
    pub skipped: u64,
    /// Records that failed to decode
    pub undecodable: u64,
    /// Records the processor rejected
    pub failed: u64,
}

struct LoopShared {
    state: Mutex<LoopState>,
    stop_requested: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

/// Cloneable handle used to observe and stop a loop.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    /// Request the loop to stop.
    ///
    /// Returns `true` for the call that actually requested the stop, `false`
    /// for every later call.
    pub fn stop(&self) -> bool {
        if self.shared.stop_requested.swap(true, Ordering::SeqCst) {
            return false;
        }

        {
            let mut state = self.shared.state.lock();
            if *state == LoopState::Running {
                *state = LoopState::Stopping;
            }
        }

        // The loop holds a receiver from construction, so this is never lost.
        let _ = self.shared.shutdown_tx.send(());
        info!("Stop requested");
        true
    }

    pub fn state(&self) -> LoopState {
        *self.shared.state.lock()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::SeqCst)
    }
}

/// Polls a source and feeds converted, filtered records to a processor.
pub struct OffsetsLoop<C>
where
    C: RecordConverter,
{
    source: Box<dyn OffsetsSource>,
    converter: C,
    filter: FilterPolicy,
    processor: Box<dyn OffsetsProcessor<C::Output>>,
    poll_timeout: Duration,
    shared: Arc<LoopShared>,
    shutdown_rx: broadcast::Receiver<()>,
    stats: LoopStats,
}

impl<C> OffsetsLoop<C>
where
    C: RecordConverter,
    C::Output: Keyed + Sync,
{
    pub fn new(
        source: Box<dyn OffsetsSource>,
        converter: C,
        filter: FilterPolicy,
        processor: Box<dyn OffsetsProcessor<C::Output>>,
        poll_timeout: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self {
            source,
            converter,
            filter,
            processor,
            poll_timeout,
            shared: Arc::new(LoopShared {
                state: Mutex::new(LoopState::Created),
                stop_requested: AtomicBool::new(false),
                shutdown_tx,
            }),
            shutdown_rx,
            stats: LoopStats::default(),
        }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run until stopped, then close the processor and the source.
    pub async fn run(mut self) -> Result<LoopStats> {
        let start = {
            let mut state = self.shared.state.lock();
            if *state != LoopState::Created {
                return Err(Error::InvalidState(format!(
                    "loop cannot run from state {}",
                    *state
                )));
            }
            if self.shared.stop_requested.load(Ordering::SeqCst) {
                *state = LoopState::Stopping;
                false
            } else {
                *state = LoopState::Running;
                true
            }
        };

        if start {
            info!(poll_timeout_ms = self.poll_timeout.as_millis() as u64, "Tailing loop running");
            self.poll_until_stopped().await;
        }

        {
            let mut state = self.shared.state.lock();
            if *state == LoopState::Running {
                *state = LoopState::Stopping;
            }
        }
        info!("Tailing loop stopping, draining processor");

        if let Err(e) = self.processor.close().await {
            error!(error = %e, "Failed to close processor");
        }
        if let Err(e) = self.source.close().await {
            error!(error = %e, "Failed to close source");
        }

        *self.shared.state.lock() = LoopState::Stopped;
        info!(
            polled = self.stats.polled,
            processed = self.stats.processed,
            filtered = self.stats.filtered,
            skipped = self.stats.skipped,
            undecodable = self.stats.undecodable,
            failed = self.stats.failed,
            "Tailing loop stopped"
        );
        Ok(self.stats)
    }

    async fn poll_until_stopped(&mut self) {
        let timeout = self.poll_timeout;

        while !self.shared.stop_requested.load(Ordering::SeqCst) {
            let polled = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => break,
                polled = self.source.poll(timeout) => polled,
            };

            match polled {
                Ok(records) => {
                    for record in records {
                        self.handle_record(record).await;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Poll failed");
                    tokio::select! {
                        _ = self.shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }

    async fn handle_record(&mut self, raw: RawRecord) {
        self.stats.polled += 1;

        let record = match self
            .converter
            .convert(raw.key.as_deref(), raw.value.as_deref())
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.stats.skipped += 1;
                return;
            }
            Err(e) => {
                warn!(
                    partition = raw.partition,
                    offset = raw.offset,
                    error = %e,
                    "Skipping undecodable record"
                );
                self.stats.undecodable += 1;
                return;
            }
        };

        if self.filter.should_ignore(&record) {
            self.stats.filtered += 1;
            return;
        }

        match self.processor.process(&record).await {
            Ok(()) => {
                self.stats.processed += 1;
                debug!(key = %record.offset_key(), "Record dispatched");
            }
            Err(e) => {
                self.stats.failed += 1;
                error!(key = %record.offset_key(), error = %e, "Failed to dispatch record");
            }
        }
    }
}
