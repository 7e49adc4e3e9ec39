//! Pipeline instrumentation hooks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use drift_model::{ContextId, DriveEvent};
use serde::{Deserialize, Serialize};

use crate::ingest::DropReason;
use crate::publish::FanoutReport;
use crate::sweep::SweepReport;

/// Receives notifications about what the pipeline is doing. Every hook
/// defaults to a no-op; implementations override what they care about.
///
/// Hooks run inline on the pipeline's own tasks and must not block.
pub trait PipelineObserver: Send + Sync {
    fn on_notification_received(&self) {}

    fn on_notification_dropped(&self, _reason: DropReason) {}

    /// A buffering task ran on the ingesting caller because the executor
    /// rejected it.
    fn on_task_inline(&self) {}

    fn on_task_failed(&self, _context_id: ContextId, _error: &str) {}

    fn on_buffer_created(&self, _context_id: ContextId) {}

    fn on_sweep(&self, _report: &SweepReport) {}

    fn on_event_published(&self, _event: &DriveEvent, _report: &FanoutReport) {}

    fn on_publisher_error(&self, _publisher: &str, _error: &str) {}
}

/// No-op observer used when instrumentation is not wired up.
pub struct NoopPipelineObserver;

impl PipelineObserver for NoopPipelineObserver {}

impl fmt::Debug for NoopPipelineObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NoopPipelineObserver")
    }
}

/// Lock-free counters fed by the observer hooks.
#[derive(Debug, Default)]
pub struct PipelineStats {
    notifications_received: AtomicU64,
    notifications_dropped: AtomicU64,
    dropped_missing_session: AtomicU64,
    dropped_missing_folder: AtomicU64,
    dropped_ignored_file_name: AtomicU64,
    tasks_inline: AtomicU64,
    task_failures: AtomicU64,
    buffers_created: AtomicU64,
    sweeps: AtomicU64,
    events_published: AtomicU64,
    deliveries: AtomicU64,
    skipped_deliveries: AtomicU64,
    delivery_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub notifications_received: u64,
    pub notifications_dropped: u64,
    pub dropped_missing_session: u64,
    pub dropped_missing_folder: u64,
    pub dropped_ignored_file_name: u64,
    pub tasks_inline: u64,
    pub task_failures: u64,
    pub buffers_created: u64,
    pub sweeps: u64,
    pub events_published: u64,
    pub deliveries: u64,
    pub skipped_deliveries: u64,
    pub delivery_failures: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            notifications_received: load(&self.notifications_received),
            notifications_dropped: load(&self.notifications_dropped),
            dropped_missing_session: load(&self.dropped_missing_session),
            dropped_missing_folder: load(&self.dropped_missing_folder),
            dropped_ignored_file_name: load(&self.dropped_ignored_file_name),
            tasks_inline: load(&self.tasks_inline),
            task_failures: load(&self.task_failures),
            buffers_created: load(&self.buffers_created),
            sweeps: load(&self.sweeps),
            events_published: load(&self.events_published),
            deliveries: load(&self.deliveries),
            skipped_deliveries: load(&self.skipped_deliveries),
            delivery_failures: load(&self.delivery_failures),
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl PipelineObserver for PipelineStats {
    fn on_notification_received(&self) {
        bump(&self.notifications_received, 1);
    }

    fn on_notification_dropped(&self, reason: DropReason) {
        bump(&self.notifications_dropped, 1);
        let per_reason = match reason {
            DropReason::MissingSession => &self.dropped_missing_session,
            DropReason::MissingFolder => &self.dropped_missing_folder,
            DropReason::IgnoredFileName => &self.dropped_ignored_file_name,
        };
        bump(per_reason, 1);
    }

    fn on_task_inline(&self) {
        bump(&self.tasks_inline, 1);
    }

    fn on_task_failed(&self, _context_id: ContextId, _error: &str) {
        bump(&self.task_failures, 1);
    }

    fn on_buffer_created(&self, _context_id: ContextId) {
        bump(&self.buffers_created, 1);
    }

    fn on_sweep(&self, _report: &SweepReport) {
        bump(&self.sweeps, 1);
    }

    fn on_event_published(&self, _event: &DriveEvent, report: &FanoutReport) {
        bump(&self.events_published, 1);
        bump(&self.deliveries, report.delivered as u64);
        bump(&self.skipped_deliveries, report.skipped as u64);
        bump(&self.delivery_failures, report.failed as u64);
    }
}
