use std::collections::BTreeSet;

use crate::ids::{ContextId, FolderId, PushToken};

/// Consolidated change event for one context.
///
/// Immutable once built. Equality and hashing cover all four fields so
/// downstream consumers can deduplicate identical events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriveEvent {
    context_id: ContextId,
    folder_ids: BTreeSet<FolderId>,
    remote: bool,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    push_token: Option<PushToken>,
}

impl DriveEvent {
    pub fn new(
        context_id: ContextId,
        folder_ids: impl IntoIterator<Item = FolderId>,
        remote: bool,
        push_token: Option<PushToken>,
    ) -> Self {
        Self {
            context_id,
            folder_ids: folder_ids.into_iter().collect(),
            remote,
            push_token,
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn folder_ids(&self) -> &BTreeSet<FolderId> {
        &self.folder_ids
    }

    pub fn contains(&self, folder_id: &FolderId) -> bool {
        self.folder_ids.contains(folder_id)
    }

    /// Whether the event was received from another node rather than produced
    /// by this process.
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Origin token, present only when every contributing change came from
    /// the same client.
    pub fn push_token(&self) -> Option<&PushToken> {
        self.push_token.as_ref()
    }

    /// The same event, flagged as received from another node.
    pub fn into_remote(mut self) -> Self {
        self.remote = true;
        self
    }
}
