//! Event channel to the reporting collaborator
//!
//! Fire-and-forget: emitting never blocks and never fails, even when nobody
//! is listening any more.

use serde::Serialize;
use tokio::sync::mpsc;

/// Event emitted by a scenario run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Connection established, run beginning
    Started,
    /// A send step has issued a request
    Request,
    /// A send step received a response
    Response {
        /// Round-trip time in nanoseconds
        latency_ns: u64,
        /// Received bytes, hex-encoded
        payload_hex: String,
        /// Identifier of the run that received it
        run_id: String,
    },
    /// Any failure (connection error, close, write failure)
    Error { message: String },
}

impl EngineEvent {
    /// Build an error event from any displayable error
    pub fn error(error: &impl std::fmt::Display) -> Self {
        Self::Error {
            message: error.to_string(),
        }
    }

    /// Short name of the event kind
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Request => "request",
            Self::Response { .. } => "response",
            Self::Error { .. } => "error",
        }
    }
}

/// Sending side of the event channel, cheap to clone
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    /// Emit an event
    pub fn emit(&self, event: EngineEvent) {
        tracing::trace!(event = event.name(), "emit");
        let _ = self.tx.send(event);
    }
}

/// Receiving side of the event channel
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EventStream {
    /// Wait for the next event; `None` once every sink is dropped
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }

    /// Take every event emitted so far without waiting
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Create a connected sink/stream pair
pub fn channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventStream { rx })
}
