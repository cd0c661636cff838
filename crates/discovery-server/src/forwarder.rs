//! Outbound half of a session: handler notifications to the broker.

use discovery_protocol::InterestSetNotification;
use discovery_transport::Broker;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use tracing::trace;

use crate::metrics;
use crate::session::SessionError;

/// Submits handler notifications to a broker.
pub struct NotificationForwarder<'a> {
    broker: &'a dyn Broker,
}

impl<'a> NotificationForwarder<'a> {
    /// Create a forwarder for one session's broker.
    #[must_use]
    pub fn new(broker: &'a dyn Broker) -> Self {
        Self { broker }
    }

    /// Submit a single notification.
    ///
    /// # Errors
    ///
    /// Returns a transport failure if the broker rejects the submit.
    pub async fn forward(&self, notification: InterestSetNotification) -> Result<(), SessionError> {
        trace!(instance = %notification.instance().id, "Forwarding notification");
        self.broker.submit(notification).await?;
        metrics::record_notification();
        Ok(())
    }

    /// Forward every notification in order, one submit at a time.
    ///
    /// Resolves when `updates` ends or on the first failed submit.
    ///
    /// # Errors
    ///
    /// Returns the first transport failure.
    pub async fn forward_all(
        &self,
        updates: BoxStream<'static, InterestSetNotification>,
    ) -> Result<(), SessionError> {
        updates
            .map(Ok::<_, SessionError>)
            .try_for_each(|notification| self.forward(notification))
            .await
    }
}
