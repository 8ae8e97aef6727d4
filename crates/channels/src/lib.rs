//! Chat transport interface and built-in transport implementations.

pub mod loopback;
pub mod mqtt;
pub mod transport;

/// In-process transport for offline sessions and tests.
pub use loopback::LoopbackTransport;
/// MQTT transport and its broker settings.
pub use mqtt::{MqttSettings, MqttTransport, topic_for};
/// Trait implemented by all chat transports.
pub use transport::ChatTransport;
