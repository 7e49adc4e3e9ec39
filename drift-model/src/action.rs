//! Client sync actions derived from a [`DriveEvent`].

use crate::event::DriveEvent;
use crate::ids::FolderId;

/// Instruction for a drive client, computed per request from an event and
/// the root folders that client synchronizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "action", rename_all = "snake_case"))]
pub enum DriveAction {
    /// Resynchronize every root the client tracks.
    SyncDirectories,
    /// Resynchronize a single root folder.
    SyncDirectory { root: FolderId },
}

impl DriveEvent {
    /// One [`DriveAction::SyncDirectory`] per supplied root that this event
    /// touches, in the order the roots were given.
    pub fn actions(&self, root_folder_ids: &[FolderId]) -> Vec<DriveAction> {
        root_folder_ids
            .iter()
            .filter(|root| self.contains(root))
            .map(|root| DriveAction::SyncDirectory { root: root.clone() })
            .collect()
    }

    /// A single [`DriveAction::SyncDirectories`] when any supplied root is
    /// touched; for clients that only know how to resync everything.
    pub fn coarse_actions(&self, root_folder_ids: &[FolderId]) -> Vec<DriveAction> {
        if self.contains_any(root_folder_ids) {
            vec![DriveAction::SyncDirectories]
        } else {
            Vec::new()
        }
    }

    pub fn contains_any(&self, root_folder_ids: &[FolderId]) -> bool {
        root_folder_ids.iter().any(|root| self.contains(root))
    }
}
