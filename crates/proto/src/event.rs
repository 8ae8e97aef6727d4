use serde::{Deserialize, Serialize};

/// Broker connection state as seen by the chat transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Connected and subscribed to the room topic.
    Connected,
    /// Not connected; the transport is retrying in the background.
    #[default]
    Disconnected,
}

impl ConnectionStatus {
    /// Returns `true` for [`ConnectionStatus::Connected`].
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}
