//! Client core: passphrase gate, credential storage, invite decoding and
//! message routing between the chat transport and the AI client.

pub mod credentials;
pub mod invite;
pub mod router;
pub mod session;
pub mod storage;
pub mod transcript;

/// Provider keys and selection, persisted through a [`KeyValueStore`].
pub use credentials::{
    CREDENTIALS_KEY, CredentialBundle, CredentialStore, SharedCredentials,
};
/// Invite token decoding and share-link construction.
pub use invite::{InviteBundle, InviteCredential, InviteDecoder, invite_url};
/// Chat / AI routing.
pub use router::{MessageRouter, SubmitOutcome};
/// Passphrase gate.
pub use session::{AttemptPolicy, InviteSummary, Session, SessionGate, UnlockResult};
/// Key/value persistence.
pub use storage::{FileStore, KeyValueStore, MemoryStore};
/// Transcript capability and in-memory transcript.
pub use transcript::{MemoryTranscript, TranscriptView};
