//! The assembled pipeline and its lifecycle.

use std::fmt;
use std::sync::Arc;

use drift_model::{ChangeNotification, ContextId, DriveEvent};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::BufferDeps;
use crate::clock::{Clock, SystemClock};
use crate::config::ConsolidationConfig;
use crate::error::{DriftError, Result};
use crate::executor::{TaskExecutor, TokioExecutor};
use crate::ingest::{EventIngestor, IngestOutcome};
use crate::name_filter::{DefaultFileNameFilter, FileNameFilter};
use crate::publish::{DriveEventPublisher, FanoutReport, PublisherRegistry};
use crate::registry::BufferRegistry;
use crate::resolver::{NoopPathResolver, PathResolver};
use crate::stats::{NoopPipelineObserver, PipelineObserver};
use crate::sweep::{SweepReport, Sweeper};

pub struct DriveEventServiceBuilder {
    config: ConsolidationConfig,
    clock: Option<Arc<dyn Clock>>,
    resolver: Option<Arc<dyn PathResolver>>,
    name_filter: Option<Arc<dyn FileNameFilter>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    observer: Option<Arc<dyn PipelineObserver>>,
}

impl fmt::Debug for DriveEventServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveEventServiceBuilder")
            .field("config", &self.config)
            .field("custom_clock", &self.clock.is_some())
            .field("custom_resolver", &self.resolver.is_some())
            .field("custom_name_filter", &self.name_filter.is_some())
            .field("custom_executor", &self.executor.is_some())
            .field("custom_observer", &self.observer.is_some())
            .finish()
    }
}

impl DriveEventServiceBuilder {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self {
            config,
            clock: None,
            resolver: None,
            name_filter: None,
            executor: None,
            observer: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_path_resolver(mut self, resolver: Arc<dyn PathResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_name_filter(mut self, name_filter: Arc<dyn FileNameFilter>) -> Self {
        self.name_filter = Some(name_filter);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> DriveEventService {
        let config = self.config;
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(NoopPipelineObserver));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(NoopPathResolver));
        let name_filter = self
            .name_filter
            .unwrap_or_else(|| Arc::new(DefaultFileNameFilter::new(&config.file_names)));
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(TokioExecutor::new(config.max_in_flight_tasks)));

        let deps = Arc::new(BufferDeps::from_config(&config, clock, resolver));
        let registry = Arc::new(BufferRegistry::new(deps, Arc::clone(&observer)));
        let publishers = Arc::new(PublisherRegistry::new(Arc::clone(&observer)));
        let ingestor = EventIngestor::new(
            Arc::clone(&registry),
            executor,
            name_filter,
            Arc::clone(&observer),
        );
        let sweeper = Arc::new(Sweeper::new(
            Arc::clone(&registry),
            Arc::clone(&publishers),
            observer,
            config.sweep_interval(),
        ));

        DriveEventService {
            config,
            registry,
            publishers,
            ingestor,
            sweeper,
            sweep_task: Mutex::new(None),
        }
    }
}

struct SweepTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the buffer registry, the ingestor, the sweeper and the publisher set.
///
/// Ingestion and direct publishing work whether or not the sweep loop is
/// running; buffered changes are only published once [`start`] has been
/// called (or via [`sweep_now`]).
///
/// [`start`]: DriveEventService::start
/// [`sweep_now`]: DriveEventService::sweep_now
pub struct DriveEventService {
    config: ConsolidationConfig,
    registry: Arc<BufferRegistry>,
    publishers: Arc<PublisherRegistry>,
    ingestor: EventIngestor,
    sweeper: Arc<Sweeper>,
    sweep_task: Mutex<Option<SweepTask>>,
}

impl fmt::Debug for DriveEventService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveEventService")
            .field("config", &self.config)
            .field("pending_buffers", &self.registry.len())
            .field("publishers", &self.publishers)
            .field("running", &self.is_running())
            .finish()
    }
}

impl DriveEventService {
    pub fn builder(config: ConsolidationConfig) -> DriveEventServiceBuilder {
        DriveEventServiceBuilder::new(config)
    }

    pub fn new(config: ConsolidationConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Spawn the sweep loop on the current runtime. Calling it while the
    /// loop is already running does nothing.
    pub fn start(&self) -> Result<()> {
        let handle = Handle::try_current()
            .map_err(|err| DriftError::Internal(format!("cannot start sweeper: {err}")))?;

        let mut guard = self.sweep_task.lock();
        if guard.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            debug!(target: "drift::sweep", "sweeper already running");
            return Ok(());
        }

        let shutdown = CancellationToken::new();
        let join = Arc::clone(&self.sweeper).spawn(&handle, shutdown.clone());
        *guard = Some(SweepTask {
            shutdown,
            handle: join,
        });
        info!(
            target: "drift::sweep",
            sweep_interval_ms = self.config.sweep_interval().as_millis() as u64,
            "drive event service started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.sweep_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Stop the sweep loop and wait for it to exit. Ingestion tasks already
    /// submitted still run to completion; unswept buffers are abandoned.
    pub async fn shutdown(&self) {
        let task = self.sweep_task.lock().take();
        let Some(task) = task else {
            return;
        };
        task.shutdown.cancel();
        if let Err(err) = task.handle.await {
            warn!(target: "drift::sweep", error = %err, "sweeper task ended abnormally");
        }
        info!(
            target: "drift::sweep",
            abandoned_buffers = self.registry.len(),
            "drive event service stopped"
        );
    }

    pub async fn ingest(&self, notification: ChangeNotification) -> IngestOutcome {
        self.ingestor.ingest(notification).await
    }

    /// Fan `event` out immediately, bypassing consolidation.
    pub async fn publish_direct(&self, event: DriveEvent) -> FanoutReport {
        self.publishers.publish(&event).await
    }

    /// Republish an event received from another node. Local-only publishers
    /// do not see it.
    pub async fn publish_remote(&self, event: DriveEvent) -> FanoutReport {
        self.publish_direct(event.into_remote()).await
    }

    pub fn register_publisher(&self, publisher: Arc<dyn DriveEventPublisher>) -> bool {
        self.publishers.register(publisher)
    }

    pub fn unregister_publisher(&self, publisher: &Arc<dyn DriveEventPublisher>) -> bool {
        self.publishers.unregister(publisher)
    }

    pub async fn sweep_now(&self) -> SweepReport {
        self.sweeper.sweep_once().await
    }

    /// Contexts with a buffer waiting to be swept.
    pub fn pending_contexts(&self) -> Vec<ContextId> {
        self.registry.contexts()
    }
}

impl Drop for DriveEventService {
    fn drop(&mut self) {
        if let Some(task) = self.sweep_task.get_mut().take() {
            task.shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use drift_model::{FolderId, Session, UserId};

    use super::*;
    use crate::executor::InlineExecutor;
    use crate::testing::RecordingPublisher;

    fn notification(context: u32, folder_id: &str) -> ChangeNotification {
        ChangeNotification::new(Session::new(ContextId(context), UserId(1)))
            .folder(FolderId::try_new(folder_id).unwrap())
    }

    #[test]
    fn start_requires_a_runtime() {
        let service = DriveEventService::new(ConsolidationConfig::default());
        assert!(matches!(service.start(), Err(DriftError::Internal(_))));
        assert!(!service.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn running_service_publishes_after_quiet_period() {
        let service = DriveEventService::builder(ConsolidationConfig::default())
            .with_executor(Arc::new(InlineExecutor))
            .build();
        let recorder = Arc::new(RecordingPublisher::new("recorder"));
        service.register_publisher(recorder.clone());
        service.start().unwrap();
        service.start().unwrap();
        assert!(service.is_running());

        let _ = service.ingest(notification(1, "10")).await;
        assert_eq!(service.pending_contexts(), vec![ContextId(1)]);

        // Ticks at 2.5s (not ready yet) and 5s (ready).
        tokio::time::sleep(Duration::from_millis(2_600)).await;
        assert!(recorder.is_empty());
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(recorder.len(), 1);
        assert!(service.pending_contexts().is_empty());

        service.shutdown().await;
        assert!(!service.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_sweeping() {
        let service = DriveEventService::builder(ConsolidationConfig::default())
            .with_executor(Arc::new(InlineExecutor))
            .build();
        let recorder = Arc::new(RecordingPublisher::new("recorder"));
        service.register_publisher(recorder.clone());
        service.start().unwrap();
        service.shutdown().await;

        let _ = service.ingest(notification(1, "10")).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(recorder.is_empty());
        assert_eq!(service.pending_contexts(), vec![ContextId(1)]);

        let report = service.sweep_now().await;
        assert_eq!(report.published, 1);
        assert_eq!(recorder.len(), 1);
    }

    #[tokio::test]
    async fn remote_republish_marks_event_remote() {
        let service = DriveEventService::new(ConsolidationConfig::default());
        let local = Arc::new(RecordingPublisher::local_only("local"));
        let cluster = Arc::new(RecordingPublisher::new("cluster"));
        service.register_publisher(local.clone());
        service.register_publisher(cluster.clone());

        let event = DriveEvent::new(ContextId(4), [FolderId::try_new("9").unwrap()], false, None);
        let report = service.publish_remote(event.clone()).await;

        assert_eq!(report.skipped, 1);
        assert!(local.is_empty());
        assert_eq!(cluster.events(), vec![event.into_remote()]);

        let empty = DriveEvent::new(ContextId(4), Vec::<FolderId>::new(), false, None);
        let report = service.publish_direct(empty).await;
        assert_eq!(report.delivered, 2);
    }
}
