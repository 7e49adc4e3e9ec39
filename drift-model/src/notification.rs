use crate::ids::FolderId;
use crate::session::Session;

/// Raw change notification emitted by the file storage layer.
///
/// Serialized with the upper-case property names the storage layer uses:
/// `SESSION`, `FOLDER_ID`, `PARENT_FOLDER_ID`, `OLD_PARENT_FOLDER_ID`,
/// `FOLDER_PATH` (ordered ids, leaf to root) and `FILE_NAME`. A usable
/// notification carries `SESSION` and at least one of `FOLDER_ID` /
/// `PARENT_FOLDER_ID`; anything else is dropped by the ingestor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(default, rename_all = "SCREAMING_SNAKE_CASE")
)]
pub struct ChangeNotification {
    pub session: Option<Session>,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "blank_as_none"))]
    pub folder_id: Option<FolderId>,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "blank_as_none"))]
    pub parent_folder_id: Option<FolderId>,
    #[cfg_attr(feature = "serde", serde(deserialize_with = "blank_as_none"))]
    pub old_parent_folder_id: Option<FolderId>,
    pub folder_path: Option<Vec<FolderId>>,
    pub file_name: Option<String>,
}

impl ChangeNotification {
    pub fn new(session: Session) -> Self {
        Self {
            session: Some(session),
            ..Self::default()
        }
    }

    pub fn folder(mut self, folder_id: FolderId) -> Self {
        self.folder_id = Some(folder_id);
        self
    }

    pub fn parent(mut self, parent_folder_id: FolderId) -> Self {
        self.parent_folder_id = Some(parent_folder_id);
        self
    }

    pub fn old_parent(mut self, old_parent_folder_id: FolderId) -> Self {
        self.old_parent_folder_id = Some(old_parent_folder_id);
        self
    }

    pub fn path(mut self, folder_path: Vec<FolderId>) -> Self {
        self.folder_path = Some(folder_path);
        self
    }

    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// The folder a change is attributed to: the parent folder when the
    /// notification names one (file-level changes), otherwise the folder
    /// itself.
    pub fn effective_folder_id(&self) -> Option<&FolderId> {
        self.parent_folder_id.as_ref().or(self.folder_id.as_ref())
    }
}

/// Storage emits `""` for an unset folder reference; read it as absent so the
/// ingestor decides whether the notification is usable.
#[cfg(feature = "serde")]
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<FolderId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = serde::Deserialize::deserialize(deserializer)?;
    match raw {
        Some(id) if !id.trim().is_empty() => FolderId::try_new(id)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ContextId, UserId};

    fn folder(id: &str) -> FolderId {
        FolderId::try_new(id).unwrap()
    }

    #[test]
    fn parent_wins_over_folder() {
        let session = Session::new(ContextId(1), UserId(1));
        let notification = ChangeNotification::new(session.clone())
            .folder(folder("10"))
            .parent(folder("20"));
        assert_eq!(notification.effective_folder_id(), Some(&folder("20")));

        let notification = ChangeNotification::new(session).folder(folder("10"));
        assert_eq!(notification.effective_folder_id(), Some(&folder("10")));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn decodes_storage_property_names() {
        let raw = r#"{
            "SESSION": {"context_id": 7, "user_id": 3, "push_token": "dev-1"},
            "FOLDER_ID": "100",
            "OLD_PARENT_FOLDER_ID": "90",
            "FOLDER_PATH": ["100", "50", "1"],
            "FILE_NAME": "report.odt"
        }"#;
        let parsed: ChangeNotification = serde_json::from_str(raw).unwrap();
        let session = parsed.session.as_ref().unwrap();
        assert_eq!(session.context_id, ContextId(7));
        assert_eq!(parsed.parent_folder_id, None);
        assert_eq!(parsed.old_parent_folder_id, Some(folder("90")));
        assert_eq!(parsed.folder_path.as_ref().map(Vec::len), Some(3));
        assert_eq!(parsed.file_name.as_deref(), Some("report.odt"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn blank_folder_references_decode_as_absent() {
        let raw = r#"{
            "SESSION": {"context_id": 7},
            "FOLDER_ID": "",
            "PARENT_FOLDER_ID": "20",
            "OLD_PARENT_FOLDER_ID": "  "
        }"#;
        let parsed: ChangeNotification = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.folder_id, None);
        assert_eq!(parsed.old_parent_folder_id, None);
        assert_eq!(parsed.effective_folder_id(), Some(&folder("20")));

        let parsed: ChangeNotification =
            serde_json::from_str(r#"{"SESSION": {"context_id": 7}, "FOLDER_ID": null}"#).unwrap();
        assert_eq!(parsed.effective_folder_id(), None);
    }
}
