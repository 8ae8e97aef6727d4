//! Outbound message routing: room chat vs. `/ai` queries.

use std::sync::Arc;

use agent::{AiQuery, AiRequest};
use channels::ChatTransport;
use proto::{ConnectionStatus, InboundChat, TranscriptEntry};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::SessionGate;
use crate::transcript::TranscriptView;

const AI_PREFIX: &str = "/ai";

/// What [`MessageRouter::submit`] did with the input.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Session is locked; nothing was sent or shown.
    Rejected,
    /// Blank input.
    Ignored,
    /// Published to the room.
    Chat,
    /// `/ai` command but no usable key for the selected provider.
    KeyMissing,
    /// AI query running; the task finishes once the transcript is updated.
    AiDispatched(JoinHandle<()>),
}

impl SubmitOutcome {
    /// Handle of the in-flight AI query, if one was started.
    pub fn into_task(self) -> Option<JoinHandle<()>> {
        match self {
            Self::AiDispatched(handle) => Some(handle),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Empty,
    Chat(&'a str),
    Ai(&'a str),
}

/// Splits trimmed user input into chat text or an AI prompt.
///
/// `/ai` counts as a command only when followed by a space or the end of the
/// input; the prompt may be empty.
fn classify(raw: &str) -> Command<'_> {
    let text = raw.trim();
    if text.is_empty() {
        return Command::Empty;
    }
    match text.strip_prefix(AI_PREFIX) {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => {
            Command::Ai(rest.trim_start_matches(' '))
        }
        _ => Command::Chat(text),
    }
}

/// Coordinates the gate, the chat transport, the AI client and the transcript.
///
/// Every path appends its synchronous entries before `submit` returns. AI
/// replies land later from a spawned task, which removes its own
/// "Thinking..." placeholder by id before appending the reply or error.
pub struct MessageRouter {
    gate: Arc<SessionGate>,
    transport: Arc<dyn ChatTransport>,
    ai: Arc<dyn AiQuery>,
    view: Arc<dyn TranscriptView>,
}

impl MessageRouter {
    /// Creates a router over the given collaborators.
    pub fn new(
        gate: Arc<SessionGate>,
        transport: Arc<dyn ChatTransport>,
        ai: Arc<dyn AiQuery>,
        view: Arc<dyn TranscriptView>,
    ) -> Self {
        Self {
            gate,
            transport,
            ai,
            view,
        }
    }

    /// Handles one line of user input.
    ///
    /// Must be called from within a tokio runtime (the AI path spawns).
    pub fn submit(&self, raw: &str) -> SubmitOutcome {
        if !self.gate.is_unlocked() {
            debug!("Input rejected while locked");
            self.view.gate_rejected();
            return SubmitOutcome::Rejected;
        }

        match classify(raw) {
            Command::Empty => SubmitOutcome::Ignored,
            Command::Ai(prompt) => self.submit_ai(prompt),
            Command::Chat(text) => self.submit_chat(text),
        }
    }

    fn submit_chat(&self, text: &str) -> SubmitOutcome {
        let session = self.gate.snapshot();
        debug!(room = %session.room, chars = text.len(), "Routing chat");
        self.view
            .append(TranscriptEntry::own_chat(&session.user, text));
        self.transport.publish(&session.room, text);
        SubmitOutcome::Chat
    }

    fn submit_ai(&self, prompt: &str) -> SubmitOutcome {
        self.view.append(TranscriptEntry::own_prompt(prompt));

        let request = {
            let creds = self.gate.credentials();
            let creds = creds.lock();
            let (provider, model) = creds.selection();
            creds.usable_key(provider).map(|key| AiRequest {
                prompt: prompt.to_string(),
                provider: provider.to_string(),
                model: model.to_string(),
                key: key.to_string(),
            })
        };
        let Some(request) = request else {
            debug!("No usable key for selected provider");
            self.view
                .append(TranscriptEntry::system("Error: No API Key", "⚠️"));
            return SubmitOutcome::KeyMissing;
        };

        let thinking = TranscriptEntry::thinking();
        let thinking_id = thinking.id.clone();
        self.view.append(thinking);
        debug!(provider = %request.provider, model = %request.model, "Dispatching AI query");

        let ai = self.ai.clone();
        let view = self.view.clone();
        let handle = tokio::spawn(async move {
            let result = ai.ask(request).await;
            if !view.remove(&thinking_id) {
                debug!(id = %thinking_id, "Provisional entry already gone");
            }
            match result {
                Ok(markup) => view.append(TranscriptEntry::assistant_markup(markup)),
                Err(e) => {
                    warn!("AI query failed: {e}");
                    view.append(TranscriptEntry::system(format!("AI Error: {e}"), "❌"));
                }
            }
        });
        SubmitOutcome::AiDispatched(handle)
    }

    /// Shows an inbound chat message from another participant.
    ///
    /// Returns false when the message was dropped (locked session or our own
    /// echo).
    pub fn deliver(&self, inbound: &InboundChat) -> bool {
        let session = self.gate.snapshot();
        if !session.unlocked {
            debug!(sender = %inbound.sender, "Dropping inbound chat while locked");
            return false;
        }
        if inbound.sender == session.user.display_name {
            return false;
        }
        self.view.append(TranscriptEntry::peer(inbound));
        true
    }

    /// Transport connection state, for display.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.transport.status()
    }

    /// Room chat is currently published to.
    pub fn room(&self) -> String {
        self.gate.room()
    }
}
