//! Shared chat transport trait.

use proto::ConnectionStatus;

/// Publish/subscribe relay for room chat (MQTT, loopback, ...).
///
/// Inbound messages are handed out by each implementation's constructor as an
/// `mpsc::Receiver<InboundChat>` that only carries messages from other users.
pub trait ChatTransport: Send + Sync {
    /// Best-effort send of `text` to `room`. Delivery is not reported back.
    fn publish(&self, room: &str, text: &str);

    /// Current broker connection state.
    fn status(&self) -> ConnectionStatus;
}
