//! # discovery-protocol
//!
//! Wire protocol definitions for the discovery transport.
//!
//! This crate defines the messages a discovery client and server exchange,
//! the frames that carry them, and the codec that puts frames on the wire.
//!
//! ## Frame Types
//!
//! - `Request` - A client message (`RegisterInterestSet`, `UnregisterInterestSet`, `Heartbeat`)
//! - `Notification` - A change in the instances matched by the client's interests
//! - `Ack` - Acknowledgment of a processed request
//!
//! ## Example
//!
//! ```rust
//! use discovery_protocol::{codec, ClientMessage, Frame, Interest};
//!
//! let frame = Frame::request(1, ClientMessage::register(vec![Interest::application("billing")]));
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod interest;
pub mod messages;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{Frame, FrameType};
pub use interest::{InstanceInfo, InstanceStatus, Interest};
pub use messages::{ClientMessage, InboundMessage, InterestSetNotification};
