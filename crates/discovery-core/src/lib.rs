//! # discovery-core
//!
//! Domain types for the discovery server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ClientContext** - Anonymous per-connection identity
//! - **DiscoveryHandler** - The per-client subscription contract
//! - **InterestRegistry** - An in-process handler that fans notifications out
//!   to the clients whose interests match
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │  Connection │────▶│ DiscoveryHandler │────▶│ InterestRegistry │
//! └─────────────┘     └──────────────────┘     └──────────────────┘
//!        │                                              │
//!        └──────────── ClientContext / ContextKey ──────┘
//! ```

pub mod context;
pub mod handler;
pub mod registry;

pub use context::{ClientContext, ContextKey};
pub use handler::{DiscoveryHandler, HandlerError};
pub use registry::{InterestRegistry, RegistryConfig, RegistryStats};
