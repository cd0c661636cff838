//! Inbound half of a session: client requests to the handler.

use discovery_core::{ClientContext, DiscoveryHandler};
use discovery_protocol::{ClientMessage, InboundMessage};
use discovery_transport::{Broker, Incoming};
use futures_util::TryStreamExt;
use tracing::trace;

use crate::metrics;
use crate::session::SessionError;

/// Routes decoded client requests to the handler and acknowledges them.
pub struct ClientMessageDispatcher<'a> {
    broker: &'a dyn Broker,
    handler: &'a dyn DiscoveryHandler,
    context: &'a ClientContext,
}

impl<'a> ClientMessageDispatcher<'a> {
    /// Create a dispatcher for one session.
    #[must_use]
    pub fn new(
        broker: &'a dyn Broker,
        handler: &'a dyn DiscoveryHandler,
        context: &'a ClientContext,
    ) -> Self {
        Self {
            broker,
            handler,
            context,
        }
    }

    /// Handle one inbound message.
    ///
    /// Register and unregister requests are acknowledged once the handler
    /// has completed them. Heartbeats are never acknowledged and unknown
    /// messages are dropped.
    ///
    /// # Errors
    ///
    /// Returns the handler's failure (the message is then not acknowledged)
    /// or a transport failure from the acknowledgment.
    pub async fn dispatch(&self, message: InboundMessage) -> Result<(), SessionError> {
        trace!(
            id = message.correlation_id,
            kind = message.body.kind(),
            "Dispatching client message"
        );
        metrics::record_message(message.body.kind());

        match &message.body {
            ClientMessage::RegisterInterestSet { interests } => {
                self.handler
                    .register_interest_set(self.context, interests)
                    .await?;
            }
            ClientMessage::UnregisterInterestSet => {
                self.handler.unregister_interest_set(self.context).await?;
            }
            ClientMessage::Heartbeat => {
                self.handler.heartbeat(self.context).await?;
                return Ok(());
            }
            ClientMessage::Unknown => {
                return Ok(());
            }
        }

        self.broker.acknowledge(&message).await?;
        metrics::record_acknowledgement();
        Ok(())
    }

    /// Dispatch every inbound message, one at a time.
    ///
    /// The next message is only taken once the previous one has been handled
    /// and acknowledged. Resolves when `incoming` ends or on the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first transport or handler failure.
    pub async fn dispatch_all(&self, incoming: Incoming) -> Result<(), SessionError> {
        incoming
            .map_err(SessionError::from)
            .try_for_each(|message| self.dispatch(message))
            .await
    }
}
