//! JSON-lines input accepted by `driftd`.
//!
//! One message per line:
//!
//! ```text
//! {"notification": {"SESSION": {"context_id": 1, "push_token": "t"}, "FOLDER_ID": "10"}}
//! {"remote_event": {"context_id": 1, "folder_ids": ["10"], "remote": true}}
//! {"folder": {"id": "10", "parent": "1"}}
//! ```

use std::sync::Arc;

use anyhow::Context;
use drift_core::model::{ChangeNotification, DriveEvent, FolderId};
use drift_core::{DriveEventService, FanoutReport, InMemoryFolderTree, IngestOutcome};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A folder and its parent, fed into the in-memory folder tree that backs
/// ancestor lookups.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FolderRecord {
    pub id: FolderId,
    #[serde(default)]
    pub parent: Option<FolderId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundMessage {
    Notification(ChangeNotification),
    RemoteEvent(DriveEvent),
    Folder(FolderRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Blank,
    Ingested(IngestOutcome),
    Republished(FanoutReport),
    FolderRecorded,
}

#[derive(Debug)]
pub struct InputHandler {
    service: Arc<DriveEventService>,
    tree: Arc<InMemoryFolderTree>,
}

impl InputHandler {
    pub fn new(service: Arc<DriveEventService>, tree: Arc<InMemoryFolderTree>) -> Self {
        Self { service, tree }
    }

    pub async fn handle_line(&self, line: &str) -> anyhow::Result<LineOutcome> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(LineOutcome::Blank);
        }

        let message: InboundMessage =
            serde_json::from_str(line).context("malformed input line")?;
        let outcome = match message {
            InboundMessage::Notification(notification) => {
                LineOutcome::Ingested(self.service.ingest(notification).await)
            }
            InboundMessage::RemoteEvent(event) => {
                LineOutcome::Republished(self.service.publish_remote(event).await)
            }
            InboundMessage::Folder(record) => {
                debug!(folder_id = %record.id, "recording folder");
                self.tree.insert(record.id, record.parent);
                LineOutcome::FolderRecorded
            }
        };
        Ok(outcome)
    }

    /// Handle lines until the sender side closes. Bad lines are logged and
    /// skipped. Returns the number of lines read.
    pub async fn run(&self, mut lines: mpsc::Receiver<String>) -> usize {
        let mut count = 0;
        while let Some(line) = lines.recv().await {
            count += 1;
            if let Err(err) = self.handle_line(&line).await {
                warn!(line = count, error = ?err, "skipping input line");
            }
        }
        info!(lines = count, "input closed");
        count
    }
}

/// Read stdin on a dedicated thread; blocking reads would otherwise keep the
/// runtime from shutting down.
pub fn spawn_stdin_reader(capacity: usize) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}
