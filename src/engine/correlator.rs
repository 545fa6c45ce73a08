//! Request/response correlator
//!
//! Compiles a `send` step: write one payload, then wait for the first of
//! data, error or close on the run's connection. At most one request is
//! outstanding per connection and there is no deadline on the wait.
//!
//! Data read before the write belongs to no request and is dropped. Data
//! read after the write is the response, matched by position rather than
//! by any identifier.

use std::time::Instant;

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::script::SendSpec;

use super::compiler::Step;
use super::connection::ConnectionEvent;
use super::context::ExecutionContext;
use super::events::{EngineEvent, EventSink};

/// Compiled `send` step
pub struct SendStep {
    spec: SendSpec,
    events: EventSink,
}

impl SendStep {
    pub fn new(spec: SendSpec, events: EventSink) -> Self {
        Self { spec, events }
    }

    /// Report a failure on the event channel and hand it back
    fn fail(&self, error: Error) -> Error {
        tracing::debug!(error = %error, "send error");
        self.events.emit(EngineEvent::error(&error));
        error
    }
}

#[async_trait]
impl Step for SendStep {
    async fn run(&self, context: &mut ExecutionContext) -> Result<()> {
        let buffer = self
            .spec
            .payload
            .to_bytes(self.spec.encoding)
            .map_err(|e| self.fail(e))?;

        let connection = context.connection_mut().map_err(|e| self.fail(e))?;
        let stale = connection.discard_stale();
        if stale > 0 {
            tracing::debug!(peer = connection.peer(), bytes = stale, "dropped unsolicited data");
        }

        self.events.emit(EngineEvent::Request);
        let started = Instant::now();

        if let Err(e) = connection.write(&buffer).await {
            return Err(self.fail(Error::WriteFailed(e)));
        }

        let data = match connection.next_event().await {
            ConnectionEvent::Data(data) => data,
            ConnectionEvent::Error(e) => return Err(self.fail(Error::Transport(e))),
            ConnectionEvent::Closed { had_error } => {
                return Err(self.fail(Error::SocketClosed {
                    with_error: had_error,
                }))
            }
        };

        let latency_ns = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        tracing::debug!(
            run_id = context.run_id(),
            latency_ns,
            bytes = data.len(),
            "response"
        );
        self.events.emit(EngineEvent::Response {
            latency_ns,
            payload_hex: hex::encode(&data),
            run_id: context.run_id().to_string(),
        });

        Ok(())
    }
}
