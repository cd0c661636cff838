//! The discovery handler contract.

use async_trait::async_trait;
use discovery_protocol::{Interest, InterestSetNotification};
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::context::ClientContext;

/// Handler errors.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// An interest in the set is not recognized.
    #[error("Invalid interest: {0}")]
    InvalidInterest(String),

    /// The interest set exceeds the configured limit.
    #[error("Too many interests: {count} (max: {max})")]
    TooManyInterests { count: usize, max: usize },

    /// The handler has invalidated the client's session.
    #[error("Session invalidated")]
    SessionInvalidated,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Per-client subscription engine.
///
/// Every call for one connection receives the same [`ClientContext`]. Calls
/// for one context are never issued concurrently.
#[async_trait]
pub trait DiscoveryHandler: Send + Sync {
    /// Replace the client's interest set.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::InvalidInterest`] if any interest is not
    /// recognized.
    async fn register_interest_set(
        &self,
        context: &ClientContext,
        interests: &[Interest],
    ) -> Result<(), HandlerError>;

    /// Drop the client's interest set. Idempotent.
    async fn unregister_interest_set(&self, context: &ClientContext) -> Result<(), HandlerError>;

    /// Record a liveness ping.
    ///
    /// # Errors
    ///
    /// A failure means the handler has invalidated the session.
    async fn heartbeat(&self, context: &ClientContext) -> Result<(), HandlerError>;

    /// Notifications for the client, in the order they should be delivered.
    ///
    /// Dropping the stream cancels it; the handler must then release
    /// whatever it holds for `context`.
    fn updates(&self, context: &ClientContext) -> BoxStream<'static, InterestSetNotification>;
}
