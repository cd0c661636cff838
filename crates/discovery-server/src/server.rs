//! The discovery server: one supervised session per accepted connection.

use discovery_core::DiscoveryHandler;
use discovery_transport::{Broker, BrokerServer};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::session::{ConnectionSupervisor, SessionEnd};

/// Resolve once `rx` reads `true` or its sender is gone.
async fn wait_stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

struct ServerInner {
    broker_server: Arc<dyn BrokerServer>,
    stopped: watch::Sender<bool>,
    active_sessions: AtomicUsize,
}

impl ServerInner {
    async fn shutdown(&self) {
        if self.stopped.send_replace(true) {
            return; // Already shutting down
        }

        info!(transport = self.broker_server.name(), "Shutting down discovery server");
        self.broker_server.shutdown().await;
    }
}

/// Counts a session as active for as long as it lives.
struct ActiveSession {
    inner: Arc<ServerInner>,
}

impl ActiveSession {
    fn new(inner: Arc<ServerInner>) -> Self {
        inner.active_sessions.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.inner.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cloneable handle to a running [`DiscoveryServer`].
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<ServerInner>,
}

impl ServerHandle {
    /// Stop accepting and tear down every live session. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Resolve once the server has begun shutting down, for any reason.
    pub async fn stopped(&self) {
        let mut stopped = self.inner.stopped.subscribe();
        wait_stopped(&mut stopped).await;
    }

    /// Number of sessions currently running.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.inner.active_sessions.load(Ordering::SeqCst)
    }
}

/// Server bridging a [`BrokerServer`] and a [`DiscoveryHandler`].
pub struct DiscoveryServer {
    inner: Arc<ServerInner>,
    accept_task: JoinHandle<()>,
}

impl DiscoveryServer {
    /// Start accepting connections.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(broker_server: Arc<dyn BrokerServer>, handler: Arc<dyn DiscoveryHandler>) -> Self {
        let (stopped, _) = watch::channel(false);
        let inner = Arc::new(ServerInner {
            broker_server,
            stopped,
            active_sessions: AtomicUsize::new(0),
        });

        let accept_task = tokio::spawn(accept_loop(Arc::clone(&inner), handler));

        Self { inner, accept_task }
    }

    /// Get a cloneable handle to this server.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Stop accepting and tear down every live session. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Resolve once the server has begun shutting down, for any reason.
    pub async fn stopped(&self) {
        self.handle().stopped().await;
    }

    /// Number of sessions currently running.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.inner.active_sessions.load(Ordering::SeqCst)
    }

    /// Wait for the accept loop and every session to finish.
    pub async fn wait(self) {
        if let Err(e) = self.accept_task.await {
            error!(error = %e, "Accept loop panicked");
        }
    }
}

async fn accept_loop(inner: Arc<ServerInner>, handler: Arc<dyn DiscoveryHandler>) {
    let mut connections = inner.broker_server.client_connections();
    let mut stopped = inner.stopped.subscribe();
    let mut sessions = JoinSet::new();

    info!(transport = inner.broker_server.name(), "Accepting connections");

    loop {
        tokio::select! {
            accepted = connections.next() => match accepted {
                Some(Ok(broker)) => {
                    spawn_session(&mut sessions, &inner, broker, Arc::clone(&handler));
                }
                Some(Err(e)) => {
                    error!(error = %e, "Accept failed");
                    metrics::record_accept_failure();
                    break;
                }
                None => {
                    debug!("Accept stream ended");
                    break;
                }
            },
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                reap_session(joined);
            }
            () = wait_stopped(&mut stopped) => break,
        }
    }

    drop(connections);
    inner.shutdown().await;

    while let Some(joined) = sessions.join_next().await {
        reap_session(joined);
    }

    info!("Discovery server stopped");
}

fn spawn_session(
    sessions: &mut JoinSet<SessionEnd>,
    inner: &Arc<ServerInner>,
    broker: Arc<dyn Broker>,
    handler: Arc<dyn DiscoveryHandler>,
) {
    let active = ActiveSession::new(Arc::clone(inner));
    let mut stopped = inner.stopped.subscribe();
    let supervisor = ConnectionSupervisor::new(broker, handler);

    sessions.spawn(async move {
        let _active = active;
        supervisor
            .run_until(async move { wait_stopped(&mut stopped).await })
            .await
    });
}

fn reap_session(joined: Result<SessionEnd, JoinError>) {
    match joined {
        Ok(end) if end.is_failure() => debug!(end = ?end, "Session ended with failure"),
        Ok(end) => debug!(end = ?end, "Session ended"),
        Err(e) => warn!(error = %e, "Session task aborted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bad_interest, mock_broker, mock_broker_server, within, MockHandler};
    use discovery_protocol::{ClientMessage, Interest};
    use discovery_transport::TransportError;

    fn start(
        handler: &Arc<MockHandler>,
    ) -> (DiscoveryServer, Arc<crate::testing::MockBrokerServer>, crate::testing::MockAcceptor) {
        let (broker_server, acceptor) = mock_broker_server();
        let server = DiscoveryServer::start(broker_server.clone(), handler.clone());
        (server, broker_server, acceptor)
    }

    async fn wait_for_active(server: &DiscoveryServer, count: usize) {
        within(async {
            while server.active_sessions() != count {
                tokio::task::yield_now().await;
            }
        })
        .await;
    }

    #[tokio::test]
    async fn test_each_connection_gets_its_own_context() {
        let handler = Arc::new(MockHandler::new());
        let (server, _broker_server, acceptor) = start(&handler);

        let (first, mut first_peer) = mock_broker();
        let (second, mut second_peer) = mock_broker();
        acceptor.accept(first.clone());
        acceptor.accept(second.clone());
        handler.wait_for_sessions(2).await;

        let keys = handler.session_keys();
        assert_ne!(keys[0], keys[1]);
        wait_for_active(&server, 2).await;

        let a = first_peer.send(ClientMessage::register(vec![Interest::application("a")]));
        let b = second_peer.send(ClientMessage::register(vec![Interest::application("b")]));
        first.wait_until(|events| !events.is_empty()).await;
        second.wait_until(|events| !events.is_empty()).await;
        assert_eq!(first.acknowledged(), vec![a]);
        assert_eq!(second.acknowledged(), vec![b]);
    }

    #[tokio::test]
    async fn test_session_failure_is_isolated() {
        let handler = Arc::new(MockHandler::new());
        let (server, _broker_server, acceptor) = start(&handler);

        let (failing, mut failing_peer) = mock_broker();
        let (healthy, mut healthy_peer) = mock_broker();
        acceptor.accept(failing.clone());
        acceptor.accept(healthy.clone());
        handler.wait_for_sessions(2).await;

        failing_peer.send(ClientMessage::register(vec![bad_interest()]));
        failing.wait_for_shutdown().await;

        // The accept stream and the other session are unaffected
        let (late, _late_peer) = mock_broker();
        acceptor.accept(late);
        handler.wait_for_sessions(3).await;

        let message = healthy_peer.send(ClientMessage::UnregisterInterestSet);
        healthy.wait_until(|events| !events.is_empty()).await;
        assert_eq!(healthy.acknowledged(), vec![message]);
        assert_eq!(healthy.shutdown_count(), 0);
        assert_eq!(failing.shutdown_count(), 1);

        handler.wait_for_cancelled(1).await;
        wait_for_active(&server, 2).await;
    }

    #[tokio::test]
    async fn test_accept_stream_end_shuts_down_once() {
        let handler = Arc::new(MockHandler::new());
        let (server, broker_server, mut acceptor) = start(&handler);

        let (broker, _peer) = mock_broker();
        acceptor.accept(broker.clone());
        handler.wait_for_sessions(1).await;

        acceptor.close();
        within(server.wait()).await;

        assert_eq!(broker_server.shutdown_count(), 1);
        assert_eq!(broker.shutdown_count(), 1);
        assert_eq!(handler.cancelled_updates(), 1);
    }

    #[tokio::test]
    async fn test_accept_failure_is_terminal() {
        let handler = Arc::new(MockHandler::new());
        let (server, broker_server, mut acceptor) = start(&handler);

        acceptor.fail(TransportError::Other("listener failed".into()));
        within(server.stopped()).await;
        within(server.wait()).await;

        assert_eq!(broker_server.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let handler = Arc::new(MockHandler::new());
        let (server, broker_server, acceptor) = start(&handler);

        let (first, _first_peer) = mock_broker();
        let (second, _second_peer) = mock_broker();
        acceptor.accept(first.clone());
        acceptor.accept(second.clone());
        handler.wait_for_sessions(2).await;

        server.shutdown().await;
        server.handle().shutdown().await;
        within(server.wait()).await;

        assert_eq!(broker_server.shutdown_count(), 1);
        assert_eq!(first.shutdown_count(), 1);
        assert_eq!(second.shutdown_count(), 1);
        assert_eq!(handler.cancelled_updates(), 2);
    }

    #[tokio::test]
    async fn test_peer_close_ends_only_its_session() {
        let handler = Arc::new(MockHandler::new());
        let (server, _broker_server, acceptor) = start(&handler);

        let (closing, mut closing_peer) = mock_broker();
        let (staying, _staying_peer) = mock_broker();
        acceptor.accept(closing.clone());
        acceptor.accept(staying.clone());
        handler.wait_for_sessions(2).await;

        closing_peer.close();
        closing.wait_for_shutdown().await;
        handler.wait_for_cancelled(1).await;

        assert_eq!(staying.shutdown_count(), 0);
        wait_for_active(&server, 1).await;
    }
}
