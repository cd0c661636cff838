//! Per-connection session supervision.
//!
//! A session runs two halves concurrently: inbound requests flowing from the
//! broker to the handler, and outbound notifications flowing from the handler
//! to the broker. Whichever half finishes first, by running out or by
//! failing, ends the session. The other half is cancelled and the broker is
//! shut down exactly once.

use discovery_core::{ClientContext, DiscoveryHandler, HandlerError};
use discovery_transport::{Broker, TransportError};
use std::future::{self, Future};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, Instrument};

use crate::dispatcher::ClientMessageDispatcher;
use crate::forwarder::NotificationForwarder;
use crate::metrics::{self, SessionMetricsGuard};

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Broker I/O failure, decode failure, or shutdown mid-operation.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The handler failed a request.
    #[error("Handler failure: {0}")]
    Handler(#[from] HandlerError),
}

impl SessionError {
    /// Short name used in logs and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Transport(_) => "transport",
            SessionError::Handler(_) => "handler",
        }
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The client's inbound stream ended.
    InboundClosed,
    /// The handler's notification stream ended.
    OutboundClosed,
    /// The server is shutting down.
    Shutdown,
    /// Either half failed.
    Failed(SessionError),
}

impl SessionEnd {
    fn inbound(result: Result<(), SessionError>) -> Self {
        match result {
            Ok(()) => SessionEnd::InboundClosed,
            Err(e) => SessionEnd::Failed(e),
        }
    }

    fn outbound(result: Result<(), SessionError>) -> Self {
        match result {
            Ok(()) => SessionEnd::OutboundClosed,
            Err(e) => SessionEnd::Failed(e),
        }
    }

    /// Check whether the session ended with a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, SessionEnd::Failed(_))
    }
}

/// Drives one accepted connection from start to close.
pub struct ConnectionSupervisor {
    broker: Arc<dyn Broker>,
    handler: Arc<dyn DiscoveryHandler>,
    context: ClientContext,
}

impl ConnectionSupervisor {
    /// Create a supervisor with a fresh client context.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, handler: Arc<dyn DiscoveryHandler>) -> Self {
        Self {
            broker,
            handler,
            context: ClientContext::new(),
        }
    }

    /// The context handed to every handler call of this session.
    #[must_use]
    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// Run the session until either half finishes.
    pub async fn run(self) -> SessionEnd {
        self.run_until(future::pending()).await
    }

    /// Run the session until either half finishes or `shutdown` resolves.
    pub async fn run_until<S>(self, shutdown: S) -> SessionEnd
    where
        S: Future<Output = ()>,
    {
        let span = tracing::debug_span!(
            "session",
            context = %self.context,
            remote = self.broker.remote_addr().as_deref().unwrap_or("-"),
        );

        self.supervise(shutdown).instrument(span).await
    }

    async fn supervise<S>(self, shutdown: S) -> SessionEnd
    where
        S: Future<Output = ()>,
    {
        let _metrics_guard = SessionMetricsGuard::new();
        debug!("Session started");

        let end = {
            let forwarder = NotificationForwarder::new(self.broker.as_ref());
            let dispatcher = ClientMessageDispatcher::new(
                self.broker.as_ref(),
                self.handler.as_ref(),
                &self.context,
            );

            let outbound = forwarder.forward_all(self.handler.updates(&self.context));
            let inbound = dispatcher.dispatch_all(self.broker.incoming());

            // The losing halves are dropped, and so cancelled, when the select completes
            tokio::select! {
                result = outbound => SessionEnd::outbound(result),
                result = inbound => SessionEnd::inbound(result),
                () = shutdown => SessionEnd::Shutdown,
            }
        };

        self.broker.shutdown().await;

        match &end {
            SessionEnd::Failed(e) => {
                metrics::record_session_failure(e.kind());
                debug!(kind = e.kind(), error = %e, "Session failed");
            }
            other => debug!(reason = ?other, "Session closed"),
        }

        end
    }
}
