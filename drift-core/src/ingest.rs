//! Entry point for raw change notifications.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use drift_model::{ChangeNotification, FolderId, Session};
use futures::FutureExt;
use tracing::{debug, error, trace, warn};

use crate::buffer::AddOutcome;
use crate::error::{DriftError, Result};
use crate::executor::{Task, TaskExecutor};
use crate::name_filter::FileNameFilter;
use crate::panic::panic_message;
use crate::registry::BufferRegistry;
use crate::stats::PipelineObserver;

/// A freshly created buffer cannot be ready, so a second attempt always
/// lands. The bound only guards against a broken clock.
const MAX_SEALED_RETRIES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    MissingSession,
    MissingFolder,
    IgnoredFileName,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DropReason::MissingSession => "missing session",
            DropReason::MissingFolder => "missing folder id",
            DropReason::IgnoredFileName => "invalid or ignored file name",
        };
        f.write_str(reason)
    }
}

/// What [`EventIngestor::ingest`] did with a notification. Callers are free
/// to ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Buffering was handed to the executor.
    Dispatched,
    /// The executor declined; buffering ran on the caller and has finished.
    RanInline,
    Dropped(DropReason),
}

/// Validated contents of a notification.
#[derive(Debug)]
struct BufferingWork {
    session: Session,
    folder_id: FolderId,
    path: Option<Vec<FolderId>>,
    old_parent: Option<FolderId>,
}

pub struct EventIngestor {
    registry: Arc<BufferRegistry>,
    executor: Arc<dyn TaskExecutor>,
    name_filter: Arc<dyn FileNameFilter>,
    observer: Arc<dyn PipelineObserver>,
}

impl fmt::Debug for EventIngestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventIngestor")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl EventIngestor {
    pub fn new(
        registry: Arc<BufferRegistry>,
        executor: Arc<dyn TaskExecutor>,
        name_filter: Arc<dyn FileNameFilter>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            registry,
            executor,
            name_filter,
            observer,
        }
    }

    /// Validate `notification` and buffer it for its context.
    ///
    /// Never fails: incomplete notifications are dropped, and errors or
    /// panics while buffering are logged and reported to the observer.
    pub async fn ingest(&self, notification: ChangeNotification) -> IngestOutcome {
        self.observer.on_notification_received();

        let work = match self.validate(notification) {
            Ok(work) => work,
            Err(reason) => {
                debug!(target: "drift::ingest", %reason, "dropping change notification");
                self.observer.on_notification_dropped(reason);
                return IngestOutcome::Dropped(reason);
            }
        };

        match self.executor.submit(self.buffering_task(work)) {
            Ok(()) => IngestOutcome::Dispatched,
            Err(rejected) => {
                trace!(target: "drift::ingest", "executor declined buffering task; running inline");
                self.observer.on_task_inline();
                rejected.into_task().await;
                IngestOutcome::RanInline
            }
        }
    }

    fn validate(&self, notification: ChangeNotification) -> std::result::Result<BufferingWork, DropReason> {
        let ChangeNotification {
            session,
            folder_id,
            parent_folder_id,
            old_parent_folder_id,
            folder_path,
            file_name,
        } = notification;

        let session = session.ok_or(DropReason::MissingSession)?;
        let folder_id = parent_folder_id
            .or(folder_id)
            .ok_or(DropReason::MissingFolder)?;
        if let Some(name) = file_name.as_deref()
            && self.name_filter.is_invalid_or_ignored(name)
        {
            return Err(DropReason::IgnoredFileName);
        }

        Ok(BufferingWork {
            session,
            folder_id,
            path: folder_path,
            old_parent: old_parent_folder_id,
        })
    }

    fn buffering_task(&self, work: BufferingWork) -> Task {
        let registry = Arc::clone(&self.registry);
        let observer = Arc::clone(&self.observer);

        async move {
            let context_id = work.session.context_id;
            match AssertUnwindSafe(apply(&registry, work)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(
                        target: "drift::ingest",
                        context_id = %context_id,
                        error = %err,
                        "failed to buffer change notification"
                    );
                    observer.on_task_failed(context_id, &err.to_string());
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(
                        target: "drift::ingest",
                        context_id = %context_id,
                        panic = %message,
                        "buffering task panicked"
                    );
                    observer.on_task_failed(context_id, &message);
                }
            }
        }
        .boxed()
    }
}

async fn apply(registry: &BufferRegistry, work: BufferingWork) -> Result<()> {
    let BufferingWork {
        session,
        folder_id,
        path,
        old_parent,
    } = work;

    add_to_live_buffer(registry, &session, folder_id, path).await?;
    // A moved folder also changes the listing of the folder it left.
    if let Some(old_parent) = old_parent {
        add_to_live_buffer(registry, &session, old_parent, None).await?;
    }
    Ok(())
}

async fn add_to_live_buffer(
    registry: &BufferRegistry,
    session: &Session,
    folder_id: FolderId,
    path: Option<Vec<FolderId>>,
) -> Result<()> {
    for _ in 0..MAX_SEALED_RETRIES {
        let buffer = registry.get_or_create(session.context_id);
        match buffer.add(session, folder_id.clone(), path.clone()).await? {
            AddOutcome::Accepted => return Ok(()),
            AddOutcome::Sealed => {
                trace!(
                    target: "drift::ingest",
                    context_id = %session.context_id,
                    "buffer sealed by sweep; retrying on a fresh buffer"
                );
            }
        }
    }

    Err(DriftError::Internal(format!(
        "buffer for context {} kept sealing before folder {folder_id} could be added",
        session.context_id
    )))
}
