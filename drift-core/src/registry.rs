use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use drift_model::ContextId;
use tracing::trace;

use crate::buffer::{BufferDeps, FolderBuffer};
use crate::stats::PipelineObserver;

/// Live buffers keyed by context. At most one buffer per context is
/// registered at any time.
///
/// Map guards are never held across an await: callers receive a cloned
/// `Arc` and lock the buffer afterwards.
pub struct BufferRegistry {
    buffers: DashMap<ContextId, Arc<FolderBuffer>>,
    deps: Arc<BufferDeps>,
    observer: Arc<dyn PipelineObserver>,
}

impl fmt::Debug for BufferRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRegistry")
            .field("buffer_count", &self.buffers.len())
            .field("deps", &self.deps)
            .finish()
    }
}

impl BufferRegistry {
    pub fn new(deps: Arc<BufferDeps>, observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            buffers: DashMap::new(),
            deps,
            observer,
        }
    }

    /// Buffer for `context_id`, creating it if none is registered.
    /// Concurrent callers for the same context all get the same buffer.
    pub fn get_or_create(&self, context_id: ContextId) -> Arc<FolderBuffer> {
        let mut created = false;
        let buffer = self
            .buffers
            .entry(context_id)
            .or_insert_with(|| {
                created = true;
                Arc::new(FolderBuffer::new(context_id, Arc::clone(&self.deps)))
            })
            .value()
            .clone();

        if created {
            trace!(target: "drift::buffer", context_id = %context_id, "created buffer");
            self.observer.on_buffer_created(context_id);
        }
        buffer
    }

    pub fn get(&self, context_id: ContextId) -> Option<Arc<FolderBuffer>> {
        self.buffers.get(&context_id).map(|entry| entry.value().clone())
    }

    /// Removes the entry for the buffer's context only if it is still this
    /// exact buffer.
    pub fn remove_exact(&self, buffer: &Arc<FolderBuffer>) -> bool {
        self.buffers
            .remove_if(&buffer.context_id(), |_, current| Arc::ptr_eq(current, buffer))
            .is_some()
    }

    /// Registered buffers at the time of the call.
    pub fn snapshot(&self) -> Vec<Arc<FolderBuffer>> {
        self.buffers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn contexts(&self) -> Vec<ContextId> {
        self.buffers.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
