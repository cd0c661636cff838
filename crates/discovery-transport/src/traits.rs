//! Transport abstraction traits for the discovery server.
//!
//! These traits define the interface that all broker implementations must
//! provide, allowing the server to be transport-agnostic.

use async_trait::async_trait;
use discovery_protocol::{InboundMessage, InterestSetNotification};
use futures_util::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] discovery_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Stream of decoded client requests.
pub type Incoming = BoxStream<'static, Result<InboundMessage, TransportError>>;

/// Stream of newly accepted brokers.
pub type ClientConnections = BoxStream<'static, Result<Arc<dyn Broker>, TransportError>>;

/// A duplex message channel to a single client.
///
/// One `submit` and one `acknowledge` may be in flight at the same time.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Take the stream of inbound messages.
    ///
    /// The stream ends when the peer closes, the broker is shut down, or a
    /// frame cannot be decoded (yielded as a final `Err`). Only the first call
    /// yields messages; later calls get an empty stream.
    fn incoming(&self) -> Incoming;

    /// Queue a notification for transmission.
    async fn submit(&self, notification: InterestSetNotification) -> Result<(), TransportError>;

    /// Signal that `message` has been processed.
    async fn acknowledge(&self, message: &InboundMessage) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    ///
    /// Pending `submit` and `acknowledge` calls fail with
    /// [`TransportError::ConnectionClosed`].
    async fn shutdown(&self);

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// A server producing one [`Broker`] per accepted connection.
#[async_trait]
pub trait BrokerServer: Send + Sync {
    /// Stream of accepted connections.
    ///
    /// Ends on [`BrokerServer::shutdown`]; an `Err` item is terminal.
    fn client_connections(&self) -> ClientConnections;

    /// Stop accepting and close every outstanding broker. Idempotent.
    async fn shutdown(&self);

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;
}
