//! Core data model definitions shared across Drift crates.
//!
//! Everything here is a plain value: identifiers, the session that triggered
//! a change, the raw change notification, the consolidated [`DriveEvent`] and
//! the client sync [`DriveAction`]s projected from it.
#![allow(missing_docs)]

pub mod action;
pub mod error;
pub mod event;
pub mod ids;
pub mod notification;
pub mod session;

// Intentionally curated re-exports for downstream consumers.
pub use action::DriveAction;
pub use error::{ModelError, Result as ModelResult};
pub use event::DriveEvent;
pub use ids::{ContextId, FolderId, PushToken, UserId};
pub use notification::ChangeNotification;
pub use session::Session;
