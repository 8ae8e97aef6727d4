//! MQTT chat transport over a public broker.

use std::time::Duration;

use proto::{
    ChannelError, ChatPayload, ConnectionStatus, DEFAULT_ROOM, InboundChat, UserIdentity,
};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::transport::ChatTransport;

const INBOUND_CAPACITY: usize = 64;
const REQUEST_CAPACITY: usize = 32;

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Broker host name.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// First topic segment (`<prefix>/public`, `<prefix>/rooms/<room>`).
    pub topic_prefix: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "broker.emqx.io".to_string(),
            port: 1883,
            topic_prefix: "termos".to_string(),
            reconnect_delay: Duration::from_millis(2000),
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// MQTT-backed [`ChatTransport`].
///
/// A background task drives the rumqttc event loop, re-subscribes after every
/// (re)connect, and retries on a fixed delay after connection loss.
pub struct MqttTransport {
    client: AsyncClient,
    identity: UserIdentity,
    topic_prefix: String,
    status: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl MqttTransport {
    /// Starts connecting to the broker and subscribes to `room`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(
        settings: MqttSettings,
        identity: UserIdentity,
        room: &str,
    ) -> (Self, mpsc::Receiver<InboundChat>) {
        let client_id = generate_client_id();
        let mut options = MqttOptions::new(client_id.clone(), settings.host.clone(), settings.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let topic = topic_for(&settings.topic_prefix, room);
        info!(
            host = %settings.host,
            port = settings.port,
            client_id = %client_id,
            topic = %topic,
            "Starting MQTT transport"
        );

        let task = tokio::spawn(drive_event_loop(
            eventloop,
            client.clone(),
            topic,
            identity.display_name.clone(),
            inbound_tx,
            status_tx,
            settings.reconnect_delay,
        ));

        let transport = Self {
            client,
            identity,
            topic_prefix: settings.topic_prefix,
            status: status_rx,
            task,
        };
        (transport, inbound_rx)
    }

    /// Returns a watch handle that observes connection status changes.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Sends a DISCONNECT to the broker and stops the event loop.
    pub fn shutdown(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect request failed: {e}");
        }
        self.task.abort();
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ChatTransport for MqttTransport {
    fn publish(&self, room: &str, text: &str) {
        if !self.status().is_connected() {
            debug!(room, "MQTT not connected; dropping outbound chat");
            return;
        }
        let payload = match encode_outbound(&self.identity, text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode chat payload: {e}");
                return;
            }
        };
        let topic = topic_for(&self.topic_prefix, room);
        if let Err(e) = self
            .client
            .try_publish(topic.clone(), QoS::AtMostOnce, false, payload)
        {
            warn!(%topic, "{}", ChannelError::SendFailed(e.to_string()));
        }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }
}

/// Polls the event loop until the inbound receiver is dropped.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    local_user: String,
    inbound_tx: mpsc::Sender<InboundChat>,
    status_tx: watch::Sender<ConnectionStatus>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(%topic, "MQTT connected");
                status_tx.send_replace(ConnectionStatus::Connected);
                if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                    warn!(%topic, "MQTT subscribe failed: {e}");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(inbound) = decode_inbound(&publish.payload, &local_user) else {
                    continue;
                };
                if inbound_tx.send(inbound).await.is_err() {
                    debug!("Stopping MQTT event loop: {}", ChannelError::Closed);
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                let err = ChannelError::ConnectionFailed(e.to_string());
                let previous = status_tx.send_replace(ConnectionStatus::Disconnected);
                if previous.is_connected() {
                    warn!("MQTT connection lost: {err}");
                } else {
                    debug!("MQTT connect attempt failed: {err}");
                }
                if inbound_tx.is_closed() {
                    debug!("Stopping MQTT event loop: {}", ChannelError::Closed);
                    break;
                }
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
    status_tx.send_replace(ConnectionStatus::Disconnected);
}

/// Maps a room to its broker topic.
pub fn topic_for(prefix: &str, room: &str) -> String {
    if room == DEFAULT_ROOM {
        format!("{prefix}/public")
    } else {
        format!("{prefix}/rooms/{room}")
    }
}

/// Generates a random `nexus_xxxxxxxx` client id.
fn generate_client_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().fold(String::from("nexus_"), |mut s, b| {
        s.push_str(&format!("{b:02x}"));
        s
    })
}

/// Serializes an outbound chat envelope.
fn encode_outbound(identity: &UserIdentity, text: &str) -> Result<Vec<u8>, ChannelError> {
    serde_json::to_vec(&ChatPayload::chat(identity, text))
        .map_err(|e| ChannelError::InvalidPayload(e.to_string()))
}

/// Parses an inbound payload, dropping our own echoes and unknown envelopes.
fn decode_inbound(payload: &[u8], local_user: &str) -> Option<InboundChat> {
    let parsed: ChatPayload = match serde_json::from_slice(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Ignoring inbound payload: {}", ChannelError::InvalidPayload(e.to_string()));
            return None;
        }
    };
    let inbound = InboundChat::from(parsed);
    if inbound.sender == local_user {
        return None;
    }
    Some(inbound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_for_public_and_named_rooms() {
        assert_eq!(topic_for("termos", "public"), "termos/public");
        assert_eq!(topic_for("termos", "lab"), "termos/rooms/lab");
        assert_eq!(topic_for("nexus", "public"), "nexus/public");
    }

    #[test]
    fn client_id_has_prefix_and_hex_suffix() {
        let id = generate_client_id();
        let suffix = id.strip_prefix("nexus_").expect("prefix");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn encode_outbound_writes_chat_envelope() {
        let identity = UserIdentity::new("ada", "🦊");
        let bytes = encode_outbound(&identity, "hello").expect("encode");
        let json: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(json["type"], "chat");
        assert_eq!(json["user"], "ada");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn decode_inbound_accepts_peer_messages() {
        let raw = r#"{"type":"chat","user":"bob","avatar":"🐻","text":"yo"}"#;
        let inbound = decode_inbound(raw.as_bytes(), "ada").expect("peer message");
        assert_eq!(inbound.sender, "bob");
        assert_eq!(inbound.avatar, "🐻");
        assert_eq!(inbound.text, "yo");
    }

    #[test]
    fn decode_inbound_filters_own_messages() {
        let raw = r#"{"type":"chat","user":"ada","avatar":"🦊","text":"echo"}"#;
        assert!(decode_inbound(raw.as_bytes(), "ada").is_none());
    }

    #[test]
    fn outbound_envelope_round_trips_non_ascii_identity() {
        let identity = UserIdentity::new("zoë", "🦊");
        let bytes = encode_outbound(&identity, "héllo ✓").expect("encode");
        let inbound = decode_inbound(&bytes, "ada").expect("peer message");
        assert_eq!(inbound.sender, "zoë");
        assert_eq!(inbound.avatar, "🦊");
        assert_eq!(inbound.text, "héllo ✓");
    }

    #[test]
    fn decode_inbound_ignores_garbage_and_other_types() {
        assert!(decode_inbound(b"not json", "ada").is_none());
        assert!(decode_inbound(br#"{"type":"presence","user":"bob"}"#, "ada").is_none());
    }

    #[test]
    fn default_settings_match_public_broker() {
        let settings = MqttSettings::default();
        assert_eq!(settings.host, "broker.emqx.io");
        assert_eq!(settings.port, 1883);
        assert_eq!(settings.reconnect_delay, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn publish_while_disconnected_is_dropped() {
        let settings = MqttSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            reconnect_delay: Duration::from_millis(10),
            ..MqttSettings::default()
        };
        let (transport, _inbound) =
            MqttTransport::connect(settings, UserIdentity::default(), "public");

        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
        transport.publish("public", "nobody hears this");
        transport.shutdown();
    }
}
