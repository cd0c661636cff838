//! In-process interest registry.
//!
//! The registry keeps each connected client's interest set and fans
//! published notifications out to the clients whose interests match.

use crate::context::{ClientContext, ContextKey};
use crate::handler::{DiscoveryHandler, HandlerError};
use async_trait::async_trait;
use dashmap::DashMap;
use discovery_protocol::{Interest, InterestSetNotification};
use futures_util::stream::{BoxStream, Stream};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of interests in one set.
    pub max_interests_per_set: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_interests_per_set: 256,
        }
    }
}

#[derive(Default)]
struct SessionEntry {
    interests: Vec<Interest>,
    sender: Option<mpsc::UnboundedSender<InterestSetNotification>>,
    last_heartbeat: Option<Instant>,
    invalidated: bool,
}

impl SessionEntry {
    fn matches(&self, notification: &InterestSetNotification) -> bool {
        let instance = notification.instance();
        self.interests.iter().any(|i| i.matches(instance))
    }
}

struct RegistryInner {
    sessions: DashMap<ContextKey, SessionEntry>,
    config: RegistryConfig,
}

/// Interest registry implementing [`DiscoveryHandler`].
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct InterestRegistry {
    inner: Arc<RegistryInner>,
}

impl InterestRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating interest registry with config: {:?}", config);
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                config,
            }),
        }
    }

    /// Deliver a notification to every client whose interests match it.
    ///
    /// Returns the number of clients it was delivered to.
    pub fn publish(&self, notification: &InterestSetNotification) -> usize {
        let mut count = 0;

        for entry in self.inner.sessions.iter() {
            if !entry.key().is_live() || !entry.matches(notification) {
                continue;
            }
            if let Some(sender) = &entry.sender {
                if sender.send(notification.clone()).is_ok() {
                    count += 1;
                }
            }
        }

        trace!(
            instance = %notification.instance().id,
            recipients = count,
            "Published notification"
        );
        count
    }

    /// Invalidate a client's session; its next heartbeat fails.
    ///
    /// Returns `false` if the client is unknown.
    pub fn invalidate(&self, key: &ContextKey) -> bool {
        match self.inner.sessions.get_mut(key) {
            Some(mut entry) => {
                entry.invalidated = true;
                debug!(context = %key, "Session invalidated");
                true
            }
            None => false,
        }
    }

    /// Get the interest set currently registered for a client.
    #[must_use]
    pub fn interests(&self, key: &ContextKey) -> Vec<Interest> {
        self.inner
            .sessions
            .get(key)
            .map(|e| e.interests.clone())
            .unwrap_or_default()
    }

    /// Time of the client's most recent heartbeat.
    #[must_use]
    pub fn last_heartbeat(&self, key: &ContextKey) -> Option<Instant> {
        self.inner.sessions.get(key).and_then(|e| e.last_heartbeat)
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.inner.sessions.iter() {
            stats.session_count += 1;
            if !entry.interests.is_empty() {
                stats.registered_count += 1;
                stats.total_interests += entry.interests.len();
            }
        }
        stats
    }

    fn check_valid(&self, key: &ContextKey) -> Result<(), HandlerError> {
        match self.inner.sessions.get(key) {
            Some(entry) if entry.invalidated => Err(HandlerError::SessionInvalidated),
            _ => Ok(()),
        }
    }
}

impl Default for InterestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryHandler for InterestRegistry {
    async fn register_interest_set(
        &self,
        context: &ClientContext,
        interests: &[Interest],
    ) -> Result<(), HandlerError> {
        let max = self.inner.config.max_interests_per_set;
        if interests.len() > max {
            return Err(HandlerError::TooManyInterests {
                count: interests.len(),
                max,
            });
        }

        for interest in interests {
            interest
                .validate()
                .map_err(|reason| HandlerError::InvalidInterest(format!("{interest:?}: {reason}")))?;
        }

        let key = context.key();
        self.check_valid(&key)?;

        let mut entry = self.inner.sessions.entry(key).or_default();
        entry.interests = interests.to_vec();

        debug!(context = %context, interests = interests.len(), "Registered interest set");
        Ok(())
    }

    async fn unregister_interest_set(&self, context: &ClientContext) -> Result<(), HandlerError> {
        if let Some(mut entry) = self.inner.sessions.get_mut(&context.key()) {
            entry.interests.clear();
        }

        debug!(context = %context, "Unregistered interest set");
        Ok(())
    }

    async fn heartbeat(&self, context: &ClientContext) -> Result<(), HandlerError> {
        let mut entry = self.inner.sessions.entry(context.key()).or_default();
        if entry.invalidated {
            return Err(HandlerError::SessionInvalidated);
        }
        entry.last_heartbeat = Some(Instant::now());

        trace!(context = %context, "Heartbeat");
        Ok(())
    }

    fn updates(&self, context: &ClientContext) -> BoxStream<'static, InterestSetNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = context.key();

        self.inner.sessions.entry(key.clone()).or_default().sender = Some(tx);
        debug!(context = %context, "Opened update stream");

        Box::pin(UpdateStream {
            rx,
            key,
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Notification stream for one client.
///
/// Dropping it removes the client from the registry.
struct UpdateStream {
    rx: mpsc::UnboundedReceiver<InterestSetNotification>,
    key: ContextKey,
    inner: Arc<RegistryInner>,
}

impl Stream for UpdateStream {
    type Item = InterestSetNotification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for UpdateStream {
    fn drop(&mut self) {
        self.inner.sessions.remove(&self.key);
        debug!(context = %self.key, "Released client session");
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    /// Number of known clients.
    pub session_count: usize,
    /// Number of clients with a non-empty interest set.
    pub registered_count: usize,
    /// Total number of registered interests.
    pub total_interests: usize,
}
