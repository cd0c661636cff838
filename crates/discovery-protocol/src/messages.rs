//! Discovery messages exchanged with a client.

use serde::{Deserialize, Serialize};

use crate::interest::{InstanceInfo, Interest};

/// A request sent by a client.
///
/// Variants this version does not know decode into [`ClientMessage::Unknown`]
/// so that newer clients can talk to older servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the connection's interest set.
    RegisterInterestSet {
        /// Interests in registration order.
        interests: Vec<Interest>,
    },
    /// Drop the connection's interest set.
    UnregisterInterestSet,
    /// Liveness ping.
    Heartbeat,
    /// Any variant not recognized by this protocol version.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Create a register request.
    #[must_use]
    pub fn register(interests: impl Into<Vec<Interest>>) -> Self {
        ClientMessage::RegisterInterestSet {
            interests: interests.into(),
        }
    }

    /// Short name used in logs and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::RegisterInterestSet { .. } => "register_interest_set",
            ClientMessage::UnregisterInterestSet => "unregister_interest_set",
            ClientMessage::Heartbeat => "heartbeat",
            ClientMessage::Unknown => "unknown",
        }
    }
}

/// A decoded client request together with the broker's correlation id.
///
/// The correlation id is what the broker echoes back when the request is
/// acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Broker-level correlation id.
    pub correlation_id: u64,
    /// The request itself.
    pub body: ClientMessage,
}

impl InboundMessage {
    /// Create a new inbound message.
    #[must_use]
    pub fn new(correlation_id: u64, body: ClientMessage) -> Self {
        Self {
            correlation_id,
            body,
        }
    }
}

/// A change in the set of instances matched by a client's interests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum InterestSetNotification {
    /// An instance started matching.
    Add { instance: InstanceInfo },
    /// A matching instance changed.
    Update { instance: InstanceInfo },
    /// A matching instance went away.
    Delete { instance: InstanceInfo },
}

impl InterestSetNotification {
    /// The instance this notification is about.
    #[must_use]
    pub fn instance(&self) -> &InstanceInfo {
        match self {
            InterestSetNotification::Add { instance }
            | InterestSetNotification::Update { instance }
            | InterestSetNotification::Delete { instance } => instance,
        }
    }
}
