//! Periodic extraction of ready buffers.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use drift_model::DriveEvent;
use futures::FutureExt;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::buffer::{FolderBuffer, SealAttempt};
use crate::panic::panic_message;
use crate::publish::{FanoutReport, PublisherRegistry};
use crate::registry::BufferRegistry;
use crate::stats::PipelineObserver;

/// Summary of one sweep tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub inspected: usize,
    pub published: usize,
    pub empty_dropped: usize,
    /// Buffers skipped because an add held their lock.
    pub deferred: usize,
    /// Buffers whose processing panicked plus failed publisher deliveries.
    pub failures: usize,
}

enum Swept {
    Busy,
    NotReady,
    Empty,
    Published(FanoutReport),
}

pub struct Sweeper {
    registry: Arc<BufferRegistry>,
    publishers: Arc<PublisherRegistry>,
    observer: Arc<dyn PipelineObserver>,
    interval: Duration,
}

impl fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sweeper")
            .field("interval", &self.interval)
            .field("pending_buffers", &self.registry.len())
            .field("publishers", &self.publishers.len())
            .finish()
    }
}

impl Sweeper {
    pub fn new(
        registry: Arc<BufferRegistry>,
        publishers: Arc<PublisherRegistry>,
        observer: Arc<dyn PipelineObserver>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            publishers,
            observer,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one tick: publish every ready buffer registered at the start of
    /// the tick. A panic while processing one buffer is logged and the tick
    /// moves on to the next.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for buffer in self.registry.snapshot() {
            report.inspected += 1;
            match AssertUnwindSafe(self.sweep_buffer(&buffer)).catch_unwind().await {
                Ok(Swept::Busy) => report.deferred += 1,
                Ok(Swept::NotReady) => {}
                Ok(Swept::Empty) => report.empty_dropped += 1,
                Ok(Swept::Published(fanout)) => {
                    report.published += 1;
                    report.failures += fanout.failed;
                }
                Err(payload) => {
                    report.failures += 1;
                    error!(
                        target: "drift::sweep",
                        context_id = %buffer.context_id(),
                        panic = %panic_message(payload.as_ref()),
                        "panic while sweeping buffer"
                    );
                }
            }
        }

        if report.published > 0 || report.failures > 0 {
            debug!(
                target: "drift::sweep",
                inspected = report.inspected,
                published = report.published,
                failures = report.failures,
                "sweep finished"
            );
        }
        self.observer.on_sweep(&report);
        report
    }

    async fn sweep_buffer(&self, buffer: &Arc<FolderBuffer>) -> Swept {
        let registry = &self.registry;
        let contents = match buffer.seal_if_ready(|| registry.remove_exact(buffer)) {
            SealAttempt::Sealed(contents) => contents,
            SealAttempt::NotReady => return Swept::NotReady,
            SealAttempt::Busy => {
                trace!(target: "drift::sweep", context_id = %buffer.context_id(), "buffer busy; deferring");
                return Swept::Busy;
            }
        };

        if contents.folder_ids.is_empty() {
            trace!(target: "drift::sweep", context_id = %buffer.context_id(), "dropping empty buffer");
            return Swept::Empty;
        }

        let event = DriveEvent::new(
            buffer.context_id(),
            contents.folder_ids,
            false,
            contents.push_token,
        );
        debug!(
            target: "drift::sweep",
            context_id = %event.context_id(),
            folder_count = event.folder_ids().len(),
            has_push_token = event.push_token().is_some(),
            "publishing consolidated drive event"
        );
        Swept::Published(self.publishers.publish(&event).await)
    }

    /// Sweep every `interval` until `shutdown` fires. The delay is measured
    /// from the end of one tick to the start of the next.
    pub fn spawn(self: Arc<Self>, handle: &Handle, shutdown: CancellationToken) -> JoinHandle<()> {
        handle.spawn(async move {
            info!(
                target: "drift::sweep",
                interval_ms = self.interval.as_millis() as u64,
                "sweeper started"
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!(target: "drift::sweep", "sweeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(self.interval) => {
                        if let Err(payload) = AssertUnwindSafe(self.sweep_once()).catch_unwind().await {
                            error!(
                                target: "drift::sweep",
                                panic = %panic_message(payload.as_ref()),
                                "sweep tick panicked; continuing with next tick"
                            );
                        }
                    }
                }
            }
        })
    }
}
