use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use agent::{AiQuery, AiRequest};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use channels::{ChatTransport, LoopbackTransport};
use gateway::{
    CredentialStore, InviteBundle, InviteCredential, InviteDecoder, KeyValueStore, MemoryStore,
    MemoryTranscript, MessageRouter, Session, SessionGate, SubmitOutcome, UnlockResult,
};
use parking_lot::Mutex;
use proto::{InboundChat, LlmError, UserIdentity};
use tokio::sync::oneshot;

/// Answers immediately with a fixed result and counts calls.
struct FixedAi {
    reply: Result<String, String>,
    calls: AtomicUsize,
    last: Mutex<Option<AiRequest>>,
}

impl FixedAi {
    fn ok(markup: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(markup.to_string()),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    fn err(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiQuery for FixedAi {
    async fn ask(&self, request: AiRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(request);
        self.reply.clone().map_err(LlmError::Api)
    }
}

/// Holds each query until the test releases it by prompt.
#[derive(Default)]
struct GatedAi {
    gates: Mutex<HashMap<String, oneshot::Receiver<String>>>,
}

impl GatedAi {
    fn gate(&self, prompt: &str) -> oneshot::Sender<String> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(prompt.to_string(), rx);
        tx
    }
}

#[async_trait]
impl AiQuery for GatedAi {
    async fn ask(&self, request: AiRequest) -> Result<String, LlmError> {
        let rx = self
            .gates
            .lock()
            .remove(&request.prompt)
            .ok_or_else(|| LlmError::InvalidResponse("no gate".to_string()))?;
        rx.await
            .map_err(|_| LlmError::InvalidResponse("gate dropped".to_string()))
    }
}

struct Harness {
    router: MessageRouter,
    gate: Arc<SessionGate>,
    transport: Arc<LoopbackTransport>,
    transcript: Arc<MemoryTranscript>,
    store: Arc<dyn KeyValueStore>,
}

fn harness(ai: Arc<dyn AiQuery>, invite: Option<InviteBundle>) -> Harness {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let creds = CredentialStore::load(store.clone()).into_shared();
    let session = Session::new(UserIdentity::new("ada", "🦊"), "public").with_invite(invite);
    let gate = Arc::new(SessionGate::new("nexus", session, creds));
    let (transport, _inbound) = LoopbackTransport::new();
    let transport = Arc::new(transport);
    let transcript = Arc::new(MemoryTranscript::new());
    let router = MessageRouter::new(
        gate.clone(),
        transport.clone(),
        ai,
        transcript.clone(),
    );
    Harness {
        router,
        gate,
        transport,
        transcript,
        store,
    }
}

fn unlocked(ai: Arc<dyn AiQuery>) -> Harness {
    let h = harness(ai, None);
    assert!(h.gate.attempt_unlock("nexus").is_unlocked());
    h
}

fn with_groq_key(h: &Harness) {
    h.gate
        .credentials()
        .lock()
        .set_key("groq", "gsk_test")
        .expect("set key");
}

#[tokio::test]
async fn locked_submit_produces_nothing() {
    let ai = FixedAi::ok("4");
    let h = harness(ai.clone(), None);

    for input in ["hello", "/ai 2+2", ""] {
        assert!(matches!(h.router.submit(input), SubmitOutcome::Rejected));
    }
    assert!(h.transcript.is_empty());
    assert!(h.transport.published().is_empty());
    assert_eq!(ai.calls(), 0);
    assert_eq!(h.transcript.rejections(), 3);
}

#[tokio::test]
async fn blank_input_is_a_silent_no_op() {
    let ai = FixedAi::ok("4");
    let h = unlocked(ai.clone());

    assert!(matches!(h.router.submit(""), SubmitOutcome::Ignored));
    assert!(matches!(h.router.submit("   "), SubmitOutcome::Ignored));
    assert!(matches!(h.router.submit(" \t\n "), SubmitOutcome::Ignored));
    assert!(h.transcript.is_empty());
    assert!(h.transport.published().is_empty());
    assert_eq!(ai.calls(), 0);
}

#[tokio::test]
async fn bare_ai_command_without_key_reports_missing_key() {
    let ai = FixedAi::ok("4");
    let h = unlocked(ai.clone());

    assert!(matches!(h.router.submit("/ai"), SubmitOutcome::KeyMissing));
    assert!(matches!(h.router.submit("  /ai   "), SubmitOutcome::KeyMissing));

    let texts: Vec<String> = h.transcript.entries().iter().map(|e| e.text.clone()).collect();
    assert_eq!(texts, ["", "Error: No API Key", "", "Error: No API Key"]);
    assert!(h.transport.published().is_empty());
    assert_eq!(ai.calls(), 0);
}

#[tokio::test]
async fn bare_ai_command_queries_with_empty_prompt() {
    let ai = FixedAi::ok("<p>ask me something</p>");
    let h = unlocked(ai.clone());
    with_groq_key(&h);

    let task = h.router.submit("/ai").into_task().expect("dispatched");
    task.await.expect("task");

    assert_eq!(ai.calls(), 1);
    assert_eq!(ai.last.lock().clone().expect("request").prompt, "");
    assert_eq!(h.transcript.provisional_count(), 0);
    assert!(h.transport.published().is_empty());
}

#[tokio::test]
async fn ai_prefix_followed_by_tab_is_chat() {
    let ai = FixedAi::ok("4");
    let h = unlocked(ai.clone());
    with_groq_key(&h);

    assert!(matches!(h.router.submit("/ai\tnot a command"), SubmitOutcome::Chat));
    assert_eq!(
        h.transport.published(),
        vec![("public".to_string(), "/ai\tnot a command".to_string())]
    );
    assert_eq!(ai.calls(), 0);
}

#[tokio::test]
async fn chat_appends_own_entry_and_publishes_once() {
    let ai = FixedAi::ok("4");
    let h = unlocked(ai.clone());

    assert!(matches!(h.router.submit("hello"), SubmitOutcome::Chat));

    let entries = h.transcript.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].text, "hello");
    assert!(entries[0].is_own);
    assert_eq!(entries[0].sender, "ada");
    assert_eq!(entries[0].avatar, "🦊");
    assert_eq!(
        h.transport.published(),
        vec![("public".to_string(), "hello".to_string())]
    );
    assert_eq!(ai.calls(), 0);
}

#[tokio::test]
async fn aix_is_routed_as_chat() {
    let ai = FixedAi::ok("4");
    let h = unlocked(ai.clone());
    with_groq_key(&h);

    assert!(matches!(h.router.submit("/aix hello"), SubmitOutcome::Chat));
    assert_eq!(h.transport.published().len(), 1);
    assert_eq!(ai.calls(), 0);
}

#[tokio::test]
async fn chat_markup_is_escaped_on_display() {
    let h = unlocked(FixedAi::ok("4"));
    h.router.submit("<script>alert(1)</script>");

    let entries = h.transcript.entries();
    assert!(!entries[0].is_pre_rendered);
    assert_eq!(
        entries[0].display_text(),
        "&lt;script&gt;alert(1)&lt;/script&gt;"
    );
}

#[tokio::test]
async fn ai_without_key_reports_missing_key() {
    let ai = FixedAi::ok("4");
    let h = unlocked(ai.clone());

    assert!(matches!(
        h.router.submit("/ai what is 2+2"),
        SubmitOutcome::KeyMissing
    ));

    let entries = h.transcript.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].text, "what is 2+2");
    assert!(entries[0].is_own);
    assert_eq!(entries[1].sender, "SYS");
    assert!(entries[1].text.contains("No API Key"));
    assert_eq!(ai.calls(), 0);
    assert!(h.transport.published().is_empty());
}

#[tokio::test]
async fn ai_with_key_replaces_thinking_with_reply() {
    let ai = FixedAi::ok("<p>4</p>");
    let h = unlocked(ai.clone());
    with_groq_key(&h);

    let task = h
        .router
        .submit("/ai what is 2+2")
        .into_task()
        .expect("dispatched");

    let during = h.transcript.entries();
    assert_eq!(during.len(), 2);
    assert_eq!(during[0].text, "what is 2+2");
    assert!(during[1].provisional);
    assert_eq!(during[1].text, "Thinking...");

    task.await.expect("task");

    let after = h.transcript.entries();
    assert_eq!(after.len(), 2);
    assert_eq!(h.transcript.provisional_count(), 0);
    assert_eq!(after[1].text, "<p>4</p>");
    assert!(after[1].is_pre_rendered);
    assert!(!after[1].is_own);

    let request = ai.last.lock().clone().expect("request");
    assert_eq!(request.prompt, "what is 2+2");
    assert_eq!(request.provider, "groq");
    assert_eq!(request.model, "llama-3.3-70b-versatile");
    assert_eq!(request.key, "gsk_test");
}

#[tokio::test]
async fn ai_failure_replaces_thinking_with_error() {
    let ai = FixedAi::err("API Error 401");
    let h = unlocked(ai.clone());
    with_groq_key(&h);

    let task = h.router.submit("/ai hi").into_task().expect("dispatched");
    task.await.expect("task");

    let entries = h.transcript.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(h.transcript.provisional_count(), 0);
    assert_eq!(entries[1].sender, "SYS");
    assert!(entries[1].text.contains("API Error 401"));
    assert!(!entries[1].is_pre_rendered);
}

#[tokio::test]
async fn concurrent_queries_resolving_out_of_order_remove_their_own_placeholder() {
    let ai = Arc::new(GatedAi::default());
    let first_gate = ai.gate("first");
    let second_gate = ai.gate("second");
    let h = unlocked(ai.clone());
    with_groq_key(&h);

    let first = h.router.submit("/ai first").into_task().expect("first");
    let second = h.router.submit("/ai second").into_task().expect("second");
    assert_eq!(h.transcript.provisional_count(), 2);

    // A peer message lands while both queries are in flight.
    assert!(h.router.deliver(&InboundChat {
        sender: "bob".to_string(),
        avatar: "🐻".to_string(),
        text: "mid-query".to_string(),
    }));

    second_gate.send("<p>two</p>".to_string()).expect("release second");
    second.await.expect("second task");
    assert_eq!(h.transcript.provisional_count(), 1);

    first_gate.send("<p>one</p>".to_string()).expect("release first");
    first.await.expect("first task");
    assert_eq!(h.transcript.provisional_count(), 0);

    let texts: Vec<String> = h
        .transcript
        .entries()
        .into_iter()
        .map(|e| e.text)
        .collect();
    assert_eq!(
        texts,
        vec!["first", "second", "mid-query", "<p>two</p>", "<p>one</p>"]
    );
}

#[tokio::test]
async fn deliver_filters_own_echo_and_locked_sessions() {
    let h = harness(FixedAi::ok("4"), None);
    let peer = InboundChat {
        sender: "bob".to_string(),
        avatar: "🐻".to_string(),
        text: "<b>hi</b>".to_string(),
    };
    assert!(!h.router.deliver(&peer));
    assert!(h.transcript.is_empty());

    h.gate.attempt_unlock("nexus");
    assert!(h.router.deliver(&peer));
    let echo = InboundChat {
        sender: "ada".to_string(),
        ..peer.clone()
    };
    assert!(!h.router.deliver(&echo));

    let entries = h.transcript.entries();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].is_own);
    assert_eq!(entries[0].display_text(), "&lt;b&gt;hi&lt;/b&gt;");
}

#[tokio::test]
async fn invite_credentials_survive_reload_and_reach_queries() {
    let invite = InviteDecoder::decode(
        &InviteBundle {
            credential: Some(InviteCredential {
                provider: "groq".to_string(),
                key: "abc".to_string(),
                model: None,
            }),
            room_override: Some("lab".to_string()),
        }
        .encode(),
    );
    let ai = FixedAi::ok("<p>ok</p>");
    let h = harness(ai.clone(), invite);

    assert_eq!(h.gate.attempt_unlock("wrong"), UnlockResult::Mismatch);
    assert!(h.gate.attempt_unlock("nexus").is_unlocked());

    let reloaded = CredentialStore::load(h.store.clone());
    assert_eq!(
        reloaded
            .bundle()
            .keys_by_provider
            .get("groq")
            .map(String::as_str),
        Some("abc")
    );

    h.router.submit("hello lab");
    assert_eq!(
        h.transport.published(),
        vec![("lab".to_string(), "hello lab".to_string())]
    );

    let task = h.router.submit("/ai ping").into_task().expect("dispatched");
    task.await.expect("task");
    assert_eq!(ai.last.lock().clone().expect("request").key, "abc");
}

#[tokio::test]
async fn invite_wildcard_room_cannot_widen_the_subscription() {
    let token = STANDARD.encode(r##"{"r":"#"}"##);
    let decoded = InviteDecoder::decode(&token).unwrap_or_default();
    assert!(decoded.room_override.is_none());

    let forged = InviteBundle {
        credential: None,
        room_override: Some("#".to_string()),
    };
    let h = harness(FixedAi::ok("4"), Some(forged));
    assert!(h.gate.attempt_unlock("nexus").is_unlocked());

    assert_eq!(h.router.room(), "public");
    assert_eq!(channels::topic_for("termos", &h.router.room()), "termos/public");

    h.router.submit("hello");
    assert_eq!(
        h.transport.published(),
        vec![("public".to_string(), "hello".to_string())]
    );
}

#[tokio::test]
async fn malformed_invite_leaves_store_untouched() {
    let invite = InviteDecoder::from_argument("https://nexus.example/?s=!!garbage!!");
    assert!(invite.is_none());

    let h = harness(FixedAi::ok("4"), invite);
    assert!(h.gate.attempt_unlock("nexus").is_unlocked());
    assert!(!h.gate.credentials().lock().has_usable_key("groq"));
    assert_eq!(h.router.room(), "public");
}

#[tokio::test]
async fn router_reports_transport_status() {
    let h = unlocked(FixedAi::ok("4"));
    assert!(h.router.connection_status().is_connected());
    h.transport
        .set_status(proto::ConnectionStatus::Disconnected);
    assert!(!h.router.connection_status().is_connected());
    assert!(!h.transport.status().is_connected());
}
