//! In-process transport used for offline sessions and tests.

use std::collections::VecDeque;

use parking_lot::Mutex;
use proto::{ConnectionStatus, InboundChat};
use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::ChatTransport;

/// Most recent publishes kept for inspection.
const PUBLISHED_HISTORY: usize = 256;

/// Transport that never leaves the process.
///
/// The most recent publishes are recorded; peers can be simulated by pushing
/// [`InboundChat`] values through [`LoopbackTransport::inject`].
pub struct LoopbackTransport {
    published: Mutex<VecDeque<(String, String)>>,
    status: Mutex<ConnectionStatus>,
    inbound_tx: mpsc::Sender<InboundChat>,
}

impl LoopbackTransport {
    /// Creates a connected loopback transport and its inbound receiver.
    pub fn new() -> (Self, mpsc::Receiver<InboundChat>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let transport = Self {
            published: Mutex::new(VecDeque::new()),
            status: Mutex::new(ConnectionStatus::Connected),
            inbound_tx,
        };
        (transport, inbound_rx)
    }

    /// Returns the recorded `(room, text)` pairs, oldest first.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().iter().cloned().collect()
    }

    /// Overrides the reported connection status.
    pub fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock() = status;
    }

    /// Delivers a simulated peer message to the inbound receiver.
    pub async fn inject(&self, inbound: InboundChat) -> bool {
        self.inbound_tx.send(inbound).await.is_ok()
    }
}

impl ChatTransport for LoopbackTransport {
    fn publish(&self, room: &str, text: &str) {
        debug!(room, chars = text.len(), "Loopback publish");
        let mut published = self.published.lock();
        if published.len() == PUBLISHED_HISTORY {
            published.pop_front();
        }
        published.push_back((room.to_string(), text.to_string()));
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }
}
