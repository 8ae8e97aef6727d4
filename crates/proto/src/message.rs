use serde::{Deserialize, Serialize};

/// Room every session joins unless configured or invited elsewhere.
pub const DEFAULT_ROOM: &str = "public";

/// Avatar shown for users who did not pick one.
pub const DEFAULT_AVATAR: &str = "👤";

/// Whether `room` can be used as a single broker topic segment.
///
/// Rejects blank names, MQTT wildcards (`+`, `#`), level separators and
/// control characters.
pub fn is_valid_room(room: &str) -> bool {
    !room.trim().is_empty()
        && !room.contains(['/', '+', '#'])
        && !room.chars().any(char::is_control)
}

/// Local user identity used to tag outbound chat and filter our own echoes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Name shown next to chat bubbles.
    pub display_name: String,
    /// Short avatar glyph (usually a single emoji).
    pub avatar: String,
}

impl UserIdentity {
    /// Creates an identity from a display name and avatar.
    pub fn new(display_name: impl Into<String>, avatar: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            avatar: avatar.into(),
        }
    }
}

impl Default for UserIdentity {
    fn default() -> Self {
        Self::new("Guest", DEFAULT_AVATAR)
    }
}

/// JSON envelope exchanged over the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatPayload {
    /// Plain room chat message.
    #[serde(rename = "chat")]
    Chat {
        user: String,
        #[serde(default = "default_avatar")]
        avatar: String,
        text: String,
    },
}

impl ChatPayload {
    /// Builds a chat envelope for `text` sent by `identity`.
    pub fn chat(identity: &UserIdentity, text: impl Into<String>) -> Self {
        Self::Chat {
            user: identity.display_name.clone(),
            avatar: identity.avatar.clone(),
            text: text.into(),
        }
    }
}

/// Chat message received from another participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChat {
    /// Sender display name.
    pub sender: String,
    /// Sender avatar glyph.
    pub avatar: String,
    /// Message text (raw, not yet escaped).
    pub text: String,
}

impl From<ChatPayload> for InboundChat {
    fn from(payload: ChatPayload) -> Self {
        match payload {
            ChatPayload::Chat { user, avatar, text } => Self {
                sender: user,
                avatar: if avatar.trim().is_empty() {
                    default_avatar()
                } else {
                    avatar
                },
                text,
            },
        }
    }
}

fn default_avatar() -> String {
    DEFAULT_AVATAR.to_string()
}
