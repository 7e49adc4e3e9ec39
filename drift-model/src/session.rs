use crate::ids::{ContextId, PushToken, UserId};

/// The session a change was performed in, as far as the event pipeline cares
/// about it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Session {
    pub context_id: ContextId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub user_id: UserId,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub push_token: Option<PushToken>,
}

impl Session {
    pub fn new(context_id: ContextId, user_id: UserId) -> Self {
        Self {
            context_id,
            user_id,
            push_token: None,
        }
    }

    pub fn with_push_token(mut self, token: impl Into<String>) -> Self {
        self.push_token = PushToken::non_empty(token);
        self
    }

    /// The push token of the originating client, treating an empty token as
    /// absent.
    pub fn push_token(&self) -> Option<&PushToken> {
        self.push_token.as_ref().filter(|token| !token.is_empty())
    }
}
