//! # discovery-transport
//!
//! Broker abstraction layer for the discovery server.
//!
//! A [`BrokerServer`] produces one [`Broker`] per accepted connection. A broker
//! is a duplex channel to a single client: it yields decoded requests, accepts
//! outbound notifications, and acknowledges requests once they are processed.
//!
//! ```rust,ignore
//! use discovery_transport::{Broker, BrokerServer};
//! use futures_util::StreamExt;
//!
//! async fn serve(server: &dyn BrokerServer) {
//!     let mut connections = server.client_connections();
//!     while let Some(Ok(broker)) = connections.next().await {
//!         let mut incoming = broker.incoming();
//!         while let Some(Ok(message)) = incoming.next().await {
//!             let _ = broker.acknowledge(&message).await;
//!         }
//!         broker.shutdown().await;
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Broker, BrokerServer, ClientConnections, Incoming, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketBroker, WebSocketBrokerServer, WebSocketConfig};
