use proto::{ChatPayload, InboundChat, TranscriptEntry, UserIdentity};

#[test]
fn chat_payload_round_trip_contract() {
    let identity = UserIdentity::new("ada", "🦊");
    let payload = ChatPayload::chat(&identity, "<b>hello</b>");

    let serialized = serde_json::to_string(&payload).expect("serialize payload");
    let parsed: ChatPayload = serde_json::from_str(&serialized).expect("deserialize payload");
    assert_eq!(parsed, payload);

    let inbound = InboundChat::from(parsed);
    assert_eq!(inbound.sender, "ada");
    assert_eq!(inbound.avatar, "🦊");
    assert_eq!(inbound.text, "<b>hello</b>");

    let entry = TranscriptEntry::peer(&inbound);
    assert_eq!(entry.display_text(), "&lt;b&gt;hello&lt;/b&gt;");
}

#[test]
fn payload_from_browser_client_is_accepted() {
    let raw = r#"{"type":"chat","user":"Guest","avatar":"👤","text":"hi from the web"}"#;
    let inbound = InboundChat::from(serde_json::from_str::<ChatPayload>(raw).expect("parse"));
    assert_eq!(inbound.sender, "Guest");
    assert_eq!(inbound.text, "hi from the web");
}
