//! Shared protocol types for the Nexus chat client.
//!
//! This crate defines the transcript entry model, the broker wire payload,
//! identities, and the strongly-typed error enums shared across the
//! workspace.

pub mod error;
pub mod event;
pub mod message;
pub mod transcript;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of transport status types.
pub use event::ConnectionStatus;
/// Re-export of identity and wire payload types.
pub use message::{
    ChatPayload, DEFAULT_AVATAR, DEFAULT_ROOM, InboundChat, UserIdentity, is_valid_room,
};
/// Re-export of transcript entry types.
pub use transcript::{EntryId, TranscriptEntry, escape_markup};

/// Masks a secret for display, keeping only its last four characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}
