//! Passphrase gate and per-process session state.

use std::str::FromStr;
use std::time::{Duration, Instant};

use agent::ProviderPreset;
use parking_lot::Mutex;
use proto::{DEFAULT_ROOM, UserIdentity, is_valid_room};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::credentials::SharedCredentials;
use crate::invite::InviteBundle;

/// Session state owned by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Whether the passphrase has been accepted. Never goes back to false.
    pub unlocked: bool,
    /// Identity attached to outbound chat.
    pub user: UserIdentity,
    /// Room used for chat publishes.
    pub room: String,
    /// Invite waiting to be applied on the first successful unlock.
    pub pending_invite: Option<InviteBundle>,
}

impl Session {
    /// Creates a locked session in `room`.
    ///
    /// An empty room means the public room; a name that is not a single topic
    /// segment falls back to it as well.
    pub fn new(user: UserIdentity, room: impl Into<String>) -> Self {
        let room = room.into();
        let room = room.trim();
        let room = if room.is_empty() {
            DEFAULT_ROOM.to_string()
        } else if !is_valid_room(room) {
            warn!(%room, "Invalid room name; joining {DEFAULT_ROOM}");
            DEFAULT_ROOM.to_string()
        } else {
            room.to_string()
        };
        Self {
            unlocked: false,
            user,
            room,
            pending_invite: None,
        }
    }

    /// Attaches the startup invite.
    pub fn with_invite(mut self, invite: Option<InviteBundle>) -> Self {
        self.pending_invite = invite.filter(|bundle| !bundle.is_empty());
        self
    }
}

/// Throttling applied after consecutive wrong passphrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptPolicy {
    /// Consecutive mismatches allowed before throttling starts.
    pub max_failures: u32,
    /// How long attempts are refused once the limit is hit.
    pub cooldown: Duration,
}

/// What an applied invite changed, for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InviteSummary {
    /// Provider whose key was stored.
    pub provider: Option<String>,
    /// Model selected alongside the key.
    pub model: Option<String>,
    /// Room joined because of the invite.
    pub room: Option<String>,
}

/// Result of [`SessionGate::attempt_unlock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockResult {
    /// The session is unlocked. `invite` is set when a pending invite was applied.
    Unlocked { invite: Option<InviteSummary> },
    /// Wrong passphrase.
    Mismatch,
    /// Too many wrong passphrases; try again after `retry_after`.
    Throttled { retry_after: Duration },
}

impl UnlockResult {
    /// True for [`UnlockResult::Unlocked`].
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked { .. })
    }
}

#[derive(Debug, Default)]
struct Failures {
    consecutive: u32,
    locked_until: Option<Instant>,
}

struct GateState {
    session: Session,
    failures: Failures,
}

/// Locked → Unlocked gate in front of every command.
///
/// This is a client-side UX gate, not authentication. Passphrases are compared
/// as SHA-256 digests so a mismatch reveals nothing about how close it was.
pub struct SessionGate {
    passphrase_digest: Vec<u8>,
    credentials: SharedCredentials,
    policy: Option<AttemptPolicy>,
    state: Mutex<GateState>,
}

impl SessionGate {
    /// Creates a locked gate for `session`.
    pub fn new(passphrase: &str, session: Session, credentials: SharedCredentials) -> Self {
        Self {
            passphrase_digest: digest(passphrase),
            credentials,
            policy: None,
            state: Mutex::new(GateState {
                session,
                failures: Failures::default(),
            }),
        }
    }

    /// Enables attempt throttling. Without a policy attempts are unlimited.
    pub fn with_policy(mut self, policy: Option<AttemptPolicy>) -> Self {
        self.policy = policy.filter(|p| p.max_failures > 0);
        self
    }

    /// Checks `passphrase` and unlocks the session on a match.
    pub fn attempt_unlock(&self, passphrase: &str) -> UnlockResult {
        let mut state = self.state.lock();
        let now = Instant::now();

        if let Some(until) = state.failures.locked_until {
            if now < until {
                let retry_after = until - now;
                debug!(?retry_after, "Unlock attempt throttled");
                return UnlockResult::Throttled { retry_after };
            }
            state.failures = Failures::default();
        }

        if digest(passphrase) != self.passphrase_digest {
            state.failures.consecutive += 1;
            warn!(
                failures = state.failures.consecutive,
                "Passphrase mismatch"
            );
            if let Some(policy) = self.policy
                && state.failures.consecutive >= policy.max_failures
            {
                state.failures.locked_until = Some(now + policy.cooldown);
            }
            return UnlockResult::Mismatch;
        }

        state.failures = Failures::default();
        if state.session.unlocked {
            debug!("Session already unlocked");
            return UnlockResult::Unlocked { invite: None };
        }

        state.session.unlocked = true;
        let pending = state.session.pending_invite.take();
        let invite = pending.map(|bundle| self.apply_invite(&mut state.session, bundle));
        info!(room = %state.session.room, "Session unlocked");
        UnlockResult::Unlocked { invite }
    }

    fn apply_invite(&self, session: &mut Session, bundle: InviteBundle) -> InviteSummary {
        let mut summary = InviteSummary::default();

        if let Some(credential) = bundle.credential {
            let mut creds = self.credentials.lock();
            let model = credential
                .model
                .or_else(|| {
                    ProviderPreset::from_str(&credential.provider)
                        .ok()
                        .map(|preset| preset.default_model().to_string())
                })
                .unwrap_or_else(|| creds.selection().1.to_string());
            if let Err(e) = creds.set_key(&credential.provider, &credential.key) {
                warn!("Failed to persist invite key: {e}");
            }
            if let Err(e) = creds.set_selection(&credential.provider, &model) {
                warn!("Failed to persist invite selection: {e}");
            }
            info!(provider = %credential.provider, %model, "Applied invite credential");
            summary.provider = Some(credential.provider);
            summary.model = Some(model);
        }

        match bundle.room_override {
            Some(room) if is_valid_room(&room) => {
                info!(%room, "Joining invite room");
                session.room = room.clone();
                summary.room = Some(room);
            }
            Some(room) => warn!(%room, "Ignoring invalid invite room"),
            None => {}
        }

        summary
    }

    /// Current unlock state.
    pub fn is_unlocked(&self) -> bool {
        self.state.lock().session.unlocked
    }

    /// Copy of the session state.
    pub fn snapshot(&self) -> Session {
        self.state.lock().session.clone()
    }

    /// Identity used for outbound chat.
    pub fn user(&self) -> UserIdentity {
        self.state.lock().session.user.clone()
    }

    /// Room used for outbound chat.
    pub fn room(&self) -> String {
        self.state.lock().session.room.clone()
    }

    /// Shared credential handle.
    pub fn credentials(&self) -> SharedCredentials {
        self.credentials.clone()
    }
}

fn digest(value: &str) -> Vec<u8> {
    Sha256::digest(value.as_bytes()).to_vec()
}
