//! # discovery-server
//!
//! Server-side transport adapter for the discovery service.
//!
//! Every connection accepted by a [`BrokerServer`](discovery_transport::BrokerServer)
//! gets its own [`ConnectionSupervisor`], which runs two halves until either
//! one ends:
//!
//! - **ClientMessageDispatcher** - client requests to the handler, one at a
//!   time, acknowledging registrations
//! - **NotificationForwarder** - handler notifications to the client, in order
//!
//! ```text
//!                    ┌────────────────────────────┐
//!  client ──frames──▶│ Broker ──▶ Dispatcher ─────┼──▶ DiscoveryHandler
//!         ◀─frames───│ Broker ◀── Forwarder ◀─────┼─── updates(ctx)
//!                    └──────── Supervisor ────────┘
//! ```

pub mod admin;
pub mod config;
pub mod dispatcher;
pub mod forwarder;
pub mod metrics;
pub mod server;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use dispatcher::ClientMessageDispatcher;
pub use forwarder::NotificationForwarder;
pub use server::{DiscoveryServer, ServerHandle};
pub use session::{ConnectionSupervisor, SessionEnd, SessionError};
