//! Publishers bundled with `driftd`.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drift_core::model::DriveEvent;
use drift_core::{DriveEventPublisher, Result};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::info;

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl DriveEventPublisher for LogPublisher {
    async fn publish(&self, event: &DriveEvent) -> Result<()> {
        info!(
            target: "drift::publish",
            context_id = %event.context_id(),
            folder_count = event.folder_ids().len(),
            remote = event.is_remote(),
            push_token = event.push_token().map(|token| token.as_str()),
            "drive event"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    published_at: DateTime<Utc>,
    event: &'a DriveEvent,
}

/// Writes one JSON envelope per event, newline terminated.
pub struct JsonLinesPublisher<W> {
    writer: Mutex<W>,
    local_only: bool,
}

impl<W> fmt::Debug for JsonLinesPublisher<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesPublisher")
            .field("local_only", &self.local_only)
            .finish_non_exhaustive()
    }
}

impl<W> JsonLinesPublisher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            local_only: false,
        }
    }

    /// Only events produced by this node are written.
    pub fn local_only(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            local_only: true,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> DriveEventPublisher for JsonLinesPublisher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, event: &DriveEvent) -> Result<()> {
        let mut line = serde_json::to_vec(&Envelope {
            published_at: Utc::now(),
            event,
        })?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    fn is_local_only(&self) -> bool {
        self.local_only
    }

    fn name(&self) -> &str {
        "json-lines"
    }
}

#[cfg(test)]
mod tests {
    use drift_core::model::{ContextId, FolderId, PushToken};
    use serde_json::Value;

    use super::*;

    #[tokio::test]
    async fn writes_one_envelope_per_event() {
        let publisher = JsonLinesPublisher::local_only(Vec::new());
        assert!(publisher.is_local_only());

        let event = DriveEvent::new(
            ContextId(2),
            [FolderId::try_new("b").unwrap(), FolderId::try_new("a").unwrap()],
            false,
            Some(PushToken::new("tok")),
        );
        publisher.publish(&event).await.unwrap();
        publisher.publish(&event).await.unwrap();

        let output = String::from_utf8(publisher.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert!(first["published_at"].as_str().is_some());
        assert_eq!(first["event"]["context_id"], 2);
        assert_eq!(first["event"]["folder_ids"], serde_json::json!(["a", "b"]));
        assert_eq!(first["event"]["push_token"], "tok");
        assert_eq!(first["event"]["remote"], false);
    }

    #[tokio::test]
    async fn log_publisher_always_succeeds() {
        let event = DriveEvent::new(ContextId(1), [FolderId::try_new("x").unwrap()], true, None);
        assert!(LogPublisher.publish(&event).await.is_ok());
        assert!(!LogPublisher.is_local_only());
    }
}
