//! # Drift Core
//!
//! Consolidates drive folder change notifications into [`DriveEvent`]s and
//! fans them out to registered publishers.
//!
//! ## Pipeline
//!
//! ```text
//! ChangeNotification -> EventIngestor -> BufferRegistry::get_or_create
//!     -> FolderBuffer::add -> (time passes) -> Sweeper::sweep_once
//!     -> PublisherRegistry::publish -> DriveEventPublisher(s)
//! ```
//!
//! - [`ingest`]: validates raw notifications and hands buffering work to a
//!   [`executor::TaskExecutor`].
//! - [`buffer`]: the per-context debounce accumulator and its readiness policy.
//! - [`registry`]: concurrent map from context to its live buffer.
//! - [`sweep`]: periodic extraction of ready buffers.
//! - [`publish`]: copy-on-write publisher set with failure-isolated fan-out.
//! - [`service`]: owns all of the above and the sweep lifecycle.
//!
//! [`DriveEvent`]: drift_model::DriveEvent

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod name_filter;
pub mod publish;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod stats;
pub mod sweep;
pub mod testing;

mod panic;

pub use drift_model as model;

pub use buffer::{AddOutcome, BufferDeps, BufferThresholds, FolderBuffer};
pub use clock::{Clock, SystemClock};
pub use config::{ConsolidationConfig, FileNameRules};
pub use error::{DriftError, Result};
pub use executor::{InlineExecutor, Rejected, Task, TaskExecutor, TokioExecutor};
pub use ingest::{DropReason, EventIngestor, IngestOutcome};
pub use name_filter::{DefaultFileNameFilter, FileNameFilter};
pub use publish::{DriveEventPublisher, FanoutReport, PublisherRegistry};
pub use registry::BufferRegistry;
pub use resolver::{InMemoryFolderTree, NoopPathResolver, PathResolver};
pub use service::{DriveEventService, DriveEventServiceBuilder};
pub use stats::{NoopPipelineObserver, PipelineObserver, PipelineStats, StatsSnapshot};
pub use sweep::{SweepReport, Sweeper};
