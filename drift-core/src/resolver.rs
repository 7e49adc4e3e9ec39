//! Folder ancestor lookups.
//!
//! Buffers ask a [`PathResolver`] for the ancestors of every folder they see
//! for the first time so that clients syncing a parent folder get notified
//! about changes deep below it. Resolution is best-effort: the buffer logs
//! failures and carries on without ancestors.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use drift_model::{FolderId, Session};

use crate::error::{DriftError, Result};

#[async_trait]
pub trait PathResolver: Send + Sync {
    /// Ancestors of `folder_id`, ordered leaf to root, excluding the folder
    /// itself.
    async fn resolve_ancestor_chain(
        &self,
        folder_id: &FolderId,
        session: &Session,
    ) -> Result<Vec<FolderId>>;
}

/// Resolver used when no folder hierarchy is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPathResolver;

#[async_trait]
impl PathResolver for NoopPathResolver {
    async fn resolve_ancestor_chain(
        &self,
        _folder_id: &FolderId,
        _session: &Session,
    ) -> Result<Vec<FolderId>> {
        Ok(Vec::new())
    }
}

/// Parent map kept in memory. Roots are folders registered without a parent.
#[derive(Default)]
pub struct InMemoryFolderTree {
    parents: DashMap<FolderId, Option<FolderId>>,
}

impl fmt::Debug for InMemoryFolderTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryFolderTree")
            .field("folder_count", &self.parents.len())
            .finish()
    }
}

impl InMemoryFolderTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `folder_id` below `parent`, or as a root when `parent` is `None`.
    /// Re-inserting a folder moves it.
    pub fn insert(&self, folder_id: FolderId, parent: Option<FolderId>) {
        self.parents.insert(folder_id, parent);
    }

    pub fn remove(&self, folder_id: &FolderId) -> bool {
        self.parents.remove(folder_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    fn chain(&self, folder_id: &FolderId) -> Result<Vec<FolderId>> {
        let mut current = match self.parents.get(folder_id) {
            Some(entry) => entry.value().clone(),
            None => {
                return Err(DriftError::PathResolution {
                    folder_id: folder_id.clone(),
                    message: "unknown folder".to_string(),
                });
            }
        };

        let mut chain = Vec::new();
        let mut seen: HashSet<FolderId> = HashSet::from([folder_id.clone()]);
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                return Err(DriftError::PathResolution {
                    folder_id: folder_id.clone(),
                    message: format!("cycle detected at folder {parent}"),
                });
            }
            // Parents that were never registered end the chain.
            current = self
                .parents
                .get(&parent)
                .and_then(|entry| entry.value().clone());
            chain.push(parent);
        }
        Ok(chain)
    }
}

#[async_trait]
impl PathResolver for InMemoryFolderTree {
    async fn resolve_ancestor_chain(
        &self,
        folder_id: &FolderId,
        _session: &Session,
    ) -> Result<Vec<FolderId>> {
        self.chain(folder_id)
    }
}

#[cfg(test)]
mod tests {
    use drift_model::{ContextId, UserId};

    use super::*;

    fn folder(id: &str) -> FolderId {
        FolderId::try_new(id).unwrap()
    }

    fn session() -> Session {
        Session::new(ContextId(1), UserId(1))
    }

    #[tokio::test]
    async fn walks_leaf_to_root() {
        let tree = InMemoryFolderTree::new();
        tree.insert(folder("1"), None);
        tree.insert(folder("10"), Some(folder("1")));
        tree.insert(folder("100"), Some(folder("10")));

        let chain = tree
            .resolve_ancestor_chain(&folder("100"), &session())
            .await
            .unwrap();
        assert_eq!(chain, vec![folder("10"), folder("1")]);

        let root = tree
            .resolve_ancestor_chain(&folder("1"), &session())
            .await
            .unwrap();
        assert!(root.is_empty());
    }

    #[tokio::test]
    async fn unknown_folder_and_cycles_fail() {
        let tree = InMemoryFolderTree::new();
        assert!(
            tree.resolve_ancestor_chain(&folder("404"), &session())
                .await
                .is_err()
        );

        tree.insert(folder("a"), Some(folder("b")));
        tree.insert(folder("b"), Some(folder("a")));
        let err = tree
            .resolve_ancestor_chain(&folder("a"), &session())
            .await
            .unwrap_err();
        assert!(matches!(err, DriftError::PathResolution { .. }));
    }

    #[tokio::test]
    async fn unregistered_parent_ends_chain() {
        let tree = InMemoryFolderTree::new();
        tree.insert(folder("child"), Some(folder("orphan-parent")));
        let chain = tree
            .resolve_ancestor_chain(&folder("child"), &session())
            .await
            .unwrap();
        assert_eq!(chain, vec![folder("orphan-parent")]);
    }
}
