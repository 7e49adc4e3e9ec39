//! Publisher registration and event fan-out.

use std::any::type_name;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use drift_model::DriveEvent;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::panic::panic_message;
use crate::stats::PipelineObserver;

#[async_trait]
pub trait DriveEventPublisher: Send + Sync {
    async fn publish(&self, event: &DriveEvent) -> Result<()>;

    /// Local-only publishers never see events received from other nodes.
    fn is_local_only(&self) -> bool {
        false
    }

    /// Label used in logs.
    fn name(&self) -> &str {
        type_name::<Self>()
    }
}

/// Outcome of delivering one event to every registered publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

type PublisherList = Arc<Vec<Arc<dyn DriveEventPublisher>>>;

/// Copy-on-write set of publishers.
///
/// Registration swaps in a new list; a fan-out in progress keeps iterating
/// the list it started with, so publishers may (un)register from inside
/// `publish`.
pub struct PublisherRegistry {
    publishers: RwLock<PublisherList>,
    observer: Arc<dyn PipelineObserver>,
}

impl fmt::Debug for PublisherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .snapshot()
            .iter()
            .map(|publisher| publisher.name().to_string())
            .collect();
        f.debug_struct("PublisherRegistry")
            .field("publishers", &names)
            .finish()
    }
}

fn same_publisher(a: &Arc<dyn DriveEventPublisher>, b: &Arc<dyn DriveEventPublisher>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl PublisherRegistry {
    pub fn new(observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            publishers: RwLock::new(Arc::new(Vec::new())),
            observer,
        }
    }

    /// Returns `false` when this exact publisher is already registered.
    pub fn register(&self, publisher: Arc<dyn DriveEventPublisher>) -> bool {
        let mut guard = self.publishers.write();
        if guard.iter().any(|existing| same_publisher(existing, &publisher)) {
            return false;
        }
        debug!(target: "drift::publish", publisher = publisher.name(), "registered publisher");
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(publisher);
        *guard = Arc::new(next);
        true
    }

    pub fn unregister(&self, publisher: &Arc<dyn DriveEventPublisher>) -> bool {
        let mut guard = self.publishers.write();
        let next: Vec<_> = guard
            .iter()
            .filter(|existing| !same_publisher(existing, publisher))
            .cloned()
            .collect();
        if next.len() == guard.len() {
            return false;
        }
        debug!(target: "drift::publish", publisher = publisher.name(), "unregistered publisher");
        *guard = Arc::new(next);
        true
    }

    pub fn snapshot(&self) -> PublisherList {
        Arc::clone(&self.publishers.read())
    }

    pub fn len(&self) -> usize {
        self.publishers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.read().is_empty()
    }

    /// Deliver `event` to every eligible publisher in registration order.
    /// Errors and panics from one publisher are logged and counted; the
    /// remaining publishers still receive the event.
    pub async fn publish(&self, event: &DriveEvent) -> FanoutReport {
        let publishers = self.snapshot();
        let mut report = FanoutReport::default();

        for publisher in publishers.iter() {
            if event.is_remote() && publisher.is_local_only() {
                report.skipped += 1;
                continue;
            }

            match AssertUnwindSafe(publisher.publish(event)).catch_unwind().await {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    let message = err.to_string();
                    warn!(
                        target: "drift::publish",
                        publisher = publisher.name(),
                        context_id = %event.context_id(),
                        error = %message,
                        "publisher failed to deliver drive event"
                    );
                    self.observer.on_publisher_error(publisher.name(), &message);
                }
                Err(payload) => {
                    report.failed += 1;
                    let message = panic_message(payload.as_ref());
                    error!(
                        target: "drift::publish",
                        publisher = publisher.name(),
                        context_id = %event.context_id(),
                        panic = %message,
                        "publisher panicked while delivering drive event"
                    );
                    self.observer.on_publisher_error(publisher.name(), &message);
                }
            }
        }

        self.observer.on_event_published(event, &report);
        report
    }
}
