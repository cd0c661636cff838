//! Frame types for the discovery protocol.
//!
//! Frames are the unit the broker puts on the wire. Each frame is
//! serialized using MessagePack for efficient binary encoding.

use serde::{Deserialize, Serialize};

use crate::messages::{ClientMessage, InboundMessage, InterestSetNotification};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Request,
    Notification,
    Ack,
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client request awaiting acknowledgment.
    Request {
        /// Correlation id echoed by the matching `Ack`.
        id: u64,
        /// The request.
        message: ClientMessage,
    },

    /// Server push of an interest set change.
    Notification {
        notification: InterestSetNotification,
    },

    /// Acknowledgment of a processed request.
    Ack {
        /// Id of the acknowledged request.
        id: u64,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Request { .. } => FrameType::Request,
            Frame::Notification { .. } => FrameType::Notification,
            Frame::Ack { .. } => FrameType::Ack,
        }
    }

    /// Create a new Request frame.
    #[must_use]
    pub fn request(id: u64, message: ClientMessage) -> Self {
        Frame::Request { id, message }
    }

    /// Create a new Notification frame.
    #[must_use]
    pub fn notification(notification: InterestSetNotification) -> Self {
        Frame::Notification { notification }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Convert a request frame into the inbound message it carries.
    ///
    /// Returns the frame unchanged if it is not a request.
    pub fn into_inbound(self) -> Result<InboundMessage, Frame> {
        match self {
            Frame::Request { id, message } => Ok(InboundMessage::new(id, message)),
            other => Err(other),
        }
    }
}
