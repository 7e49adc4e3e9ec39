//! Test doubles for the pipeline's collaborators.
//!
//! Public so downstream crates can drive the pipeline deterministically in
//! their own tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use drift_model::{DriveEvent, FolderId, Session};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::error::{DriftError, Result};
use crate::publish::DriveEventPublisher;
use crate::resolver::PathResolver;

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed_ms: AtomicU64,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to `elapsed` after creation. Moving backwards is allowed.
    pub fn set_elapsed(&self, elapsed: Duration) {
        self.elapsed_ms
            .store(elapsed.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

/// Publisher that keeps every event it receives.
#[derive(Debug)]
pub struct RecordingPublisher {
    label: String,
    local_only: bool,
    events: Mutex<Vec<DriveEvent>>,
}

impl RecordingPublisher {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            local_only: false,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn local_only(label: impl Into<String>) -> Self {
        Self {
            local_only: true,
            ..Self::new(label)
        }
    }

    pub fn events(&self) -> Vec<DriveEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl DriveEventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DriveEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn is_local_only(&self) -> bool {
        self.local_only
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Publisher that fails every delivery, either with an error or a panic.
#[derive(Debug)]
pub struct FailingPublisher {
    label: String,
    panics: bool,
    pub calls: AtomicUsize,
}

impl FailingPublisher {
    pub fn erroring(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            panics: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn panicking(label: impl Into<String>) -> Self {
        Self {
            panics: true,
            ..Self::erroring(label)
        }
    }
}

#[async_trait]
impl DriveEventPublisher for FailingPublisher {
    async fn publish(&self, event: &DriveEvent) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("{} refused event for context {}", self.label, event.context_id());
        }
        Err(DriftError::Publish(format!("{} is unavailable", self.label)))
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Resolver returning a fixed chain and counting lookups.
#[derive(Debug)]
pub struct CountingPathResolver {
    chain: Vec<FolderId>,
    pub calls: AtomicUsize,
}

impl CountingPathResolver {
    pub fn new(chain: Vec<FolderId>) -> Self {
        Self {
            chain,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PathResolver for CountingPathResolver {
    async fn resolve_ancestor_chain(
        &self,
        _folder_id: &FolderId,
        _session: &Session,
    ) -> Result<Vec<FolderId>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.chain.clone())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FailingPathResolver;

#[async_trait]
impl PathResolver for FailingPathResolver {
    async fn resolve_ancestor_chain(
        &self,
        folder_id: &FolderId,
        _session: &Session,
    ) -> Result<Vec<FolderId>> {
        Err(DriftError::PathResolution {
            folder_id: folder_id.clone(),
            message: "folder storage unavailable".to_string(),
        })
    }
}

/// Resolver that sleeps before answering; pair with a short resolve timeout.
#[derive(Debug)]
pub struct SlowPathResolver {
    delay: Duration,
    chain: Vec<FolderId>,
}

impl SlowPathResolver {
    pub fn new(delay: Duration, chain: Vec<FolderId>) -> Self {
        Self { delay, chain }
    }
}

#[async_trait]
impl PathResolver for SlowPathResolver {
    async fn resolve_ancestor_chain(
        &self,
        _folder_id: &FolderId,
        _session: &Session,
    ) -> Result<Vec<FolderId>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.chain.clone())
    }
}
