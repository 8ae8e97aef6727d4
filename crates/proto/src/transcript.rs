use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{InboundChat, UserIdentity};

/// Unique identifier for a transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    /// Creates a new random entry identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One rendered bubble in the chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Identifier used to remove provisional entries.
    pub id: EntryId,
    /// Entry body. Raw text unless `is_pre_rendered` is set.
    pub text: String,
    /// Whether the local user authored this entry.
    pub is_own: bool,
    /// Sender label ("USER", "AI", "SYS" or a peer's display name).
    pub sender: String,
    /// Avatar glyph.
    pub avatar: String,
    /// Body is already-sanitized markup and must not be escaped again.
    pub is_pre_rendered: bool,
    /// Placeholder shown while an AI query is in flight.
    pub provisional: bool,
    /// Creation timestamp in UTC.
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    fn build(text: impl Into<String>, is_own: bool, sender: &str, avatar: &str) -> Self {
        Self {
            id: EntryId::new(),
            text: text.into(),
            is_own,
            sender: sender.to_string(),
            avatar: avatar.to_string(),
            is_pre_rendered: false,
            provisional: false,
            created_at: Utc::now(),
        }
    }

    /// Own chat message tagged with the local identity.
    pub fn own_chat(identity: &UserIdentity, text: impl Into<String>) -> Self {
        Self::build(text, true, &identity.display_name, &identity.avatar)
    }

    /// Own `/ai` prompt.
    pub fn own_prompt(prompt: impl Into<String>) -> Self {
        Self::build(prompt, true, "USER", "🧠")
    }

    /// Message received from another participant.
    pub fn peer(inbound: &InboundChat) -> Self {
        Self::build(inbound.text.clone(), false, &inbound.sender, &inbound.avatar)
    }

    /// "Thinking..." placeholder for an in-flight AI query.
    pub fn thinking() -> Self {
        let mut entry = Self::build("Thinking...", true, "AI", "⏳");
        entry.provisional = true;
        entry
    }

    /// Final AI reply carrying sanitized markup.
    pub fn assistant_markup(markup: impl Into<String>) -> Self {
        let mut entry = Self::build(markup, false, "AI", "🤖");
        entry.is_pre_rendered = true;
        entry
    }

    /// System notice (errors, missing credentials).
    pub fn system(text: impl Into<String>, avatar: &str) -> Self {
        Self::build(text, false, "SYS", avatar)
    }

    /// Body as it must be displayed: raw text is escaped, markup is trusted.
    pub fn display_text(&self) -> Cow<'_, str> {
        if self.is_pre_rendered {
            Cow::Borrowed(&self.text)
        } else {
            escape_markup(&self.text)
        }
    }
}

/// Escapes `<` and `>` so raw text is never interpreted as markup.
pub fn escape_markup(text: &str) -> Cow<'_, str> {
    if !text.contains(['<', '>']) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace('<', "&lt;").replace('>', "&gt;"))
}
