//! Recording test doubles for brokers and handlers.

use async_trait::async_trait;
use discovery_core::{ClientContext, ContextKey, DiscoveryHandler, HandlerError};
use discovery_protocol::{ClientMessage, InboundMessage, Interest, InterestSetNotification};
use discovery_transport::{Broker, BrokerServer, ClientConnections, Incoming, TransportError};
use futures_util::stream::{self, Stream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify, Semaphore};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Await `future`, failing the test if it takes too long.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("timed out")
}

/// Wait until `condition` holds, re-checking whenever `changed` fires.
async fn wait_on(changed: &Notify, condition: impl Fn() -> bool) {
    within(async {
        loop {
            let notified = changed.notified();
            if condition() {
                return;
            }
            notified.await;
        }
    })
    .await;
}

async fn wait_stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Submit(InterestSetNotification),
    Acknowledge(InboundMessage),
    Shutdown,
}

type InboundItem = Result<InboundMessage, TransportError>;

pub struct MockBroker {
    incoming: Mutex<Option<mpsc::UnboundedReceiver<InboundItem>>>,
    events: Mutex<Vec<BrokerEvent>>,
    fail_submits: AtomicBool,
    changed: Notify,
}

/// Client side of a [`MockBroker`].
pub struct MockPeer {
    tx: Option<mpsc::UnboundedSender<InboundItem>>,
    next_id: u64,
}

pub fn mock_broker() -> (Arc<MockBroker>, MockPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let broker = MockBroker {
        incoming: Mutex::new(Some(rx)),
        events: Mutex::new(Vec::new()),
        fail_submits: AtomicBool::new(false),
        changed: Notify::new(),
    };
    let peer = MockPeer {
        tx: Some(tx),
        next_id: 1,
    };
    (Arc::new(broker), peer)
}

impl MockBroker {
    pub fn fail_submits(&self) {
        self.fail_submits.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn acknowledged(&self) -> Vec<InboundMessage> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BrokerEvent::Acknowledge(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn submitted(&self) -> Vec<InterestSetNotification> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BrokerEvent::Submit(notification) => Some(notification),
                _ => None,
            })
            .collect()
    }

    pub fn shutdown_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == BrokerEvent::Shutdown)
            .count()
    }

    pub async fn wait_until(&self, condition: impl Fn(&[BrokerEvent]) -> bool) {
        wait_on(&self.changed, || condition(&self.events())).await;
    }

    pub async fn wait_for_shutdown(&self) {
        self.wait_until(|events| events.contains(&BrokerEvent::Shutdown))
            .await;
    }

    fn record(&self, event: BrokerEvent) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_waiters();
    }
}

#[async_trait]
impl Broker for MockBroker {
    fn incoming(&self) -> Incoming {
        match self.incoming.lock().unwrap().take() {
            Some(rx) => Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })),
            None => Box::pin(stream::empty()),
        }
    }

    async fn submit(&self, notification: InterestSetNotification) -> Result<(), TransportError> {
        if self.fail_submits.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("injected".into()));
        }
        self.record(BrokerEvent::Submit(notification));
        Ok(())
    }

    async fn acknowledge(&self, message: &InboundMessage) -> Result<(), TransportError> {
        self.record(BrokerEvent::Acknowledge(message.clone()));
        Ok(())
    }

    async fn shutdown(&self) {
        self.record(BrokerEvent::Shutdown);
    }
}

impl MockPeer {
    /// Send a request and return the message the broker will yield.
    pub fn send(&mut self, body: ClientMessage) -> InboundMessage {
        let message = InboundMessage::new(self.next_id, body);
        self.next_id += 1;
        if let Some(tx) = &self.tx {
            let _ = tx.send(Ok(message.clone()));
        }
        message
    }

    /// Fail the inbound stream.
    pub fn fail(&mut self, error: TransportError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(error));
        }
    }

    /// End the inbound stream.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerCall {
    Register(ContextKey, Vec<Interest>),
    Unregister(ContextKey),
    Heartbeat(ContextKey),
}

impl HandlerCall {
    pub fn key(&self) -> &ContextKey {
        match self {
            HandlerCall::Register(key, _) | HandlerCall::Unregister(key) | HandlerCall::Heartbeat(key) => {
                key
            }
        }
    }
}

pub fn bad_interest() -> Interest {
    Interest::application("bad")
}

#[derive(Default)]
pub struct MockHandler {
    calls: Mutex<Vec<HandlerCall>>,
    sessions: Mutex<Vec<(ContextKey, mpsc::UnboundedSender<InterestSetNotification>)>>,
    in_flight: Mutex<HashMap<ContextKey, usize>>,
    overlapped: AtomicBool,
    cancelled: Arc<AtomicUsize>,
    end_updates: AtomicBool,
    fail_heartbeats: AtomicBool,
    register_gate: Option<Arc<Semaphore>>,
    changed: Arc<Notify>,
}

impl MockHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers block until a permit is added to the returned semaphore.
    pub fn with_register_gate() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let handler = Self {
            register_gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (handler, gate)
    }

    /// Update streams end immediately instead of staying open.
    pub fn with_finite_updates() -> Self {
        let handler = Self::default();
        handler.end_updates.store(true, Ordering::SeqCst);
        handler
    }

    pub fn fail_heartbeats(&self) {
        self.fail_heartbeats.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<HandlerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn session_keys(&self) -> Vec<ContextKey> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn cancelled_updates(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    /// Emit a notification on the `index`-th update stream opened.
    pub fn notify(&self, index: usize, notification: InterestSetNotification) {
        let sessions = self.sessions.lock().unwrap();
        let _ = sessions[index].1.send(notification);
    }

    pub async fn wait_for_sessions(&self, count: usize) {
        wait_on(&self.changed, || self.sessions.lock().unwrap().len() >= count).await;
    }

    pub async fn wait_for_calls(&self, count: usize) {
        wait_on(&self.changed, || self.calls.lock().unwrap().len() >= count).await;
    }

    pub async fn wait_for_cancelled(&self, count: usize) {
        wait_on(&self.changed, || self.cancelled_updates() >= count).await;
    }

    async fn call(&self, call: HandlerCall) {
        let key = call.key().clone();
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let count = in_flight.entry(key.clone()).or_default();
            if *count > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            *count += 1;
        }
        self.calls.lock().unwrap().push(call);
        self.changed.notify_waiters();

        tokio::task::yield_now().await;

        if let Some(count) = self.in_flight.lock().unwrap().get_mut(&key) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl DiscoveryHandler for MockHandler {
    async fn register_interest_set(
        &self,
        context: &ClientContext,
        interests: &[Interest],
    ) -> Result<(), HandlerError> {
        self.call(HandlerCall::Register(context.key(), interests.to_vec()))
            .await;

        if let Some(gate) = &self.register_gate {
            gate.acquire()
                .await
                .map_err(|e| HandlerError::Internal(e.to_string()))?
                .forget();
        }

        if interests.contains(&bad_interest()) {
            return Err(HandlerError::InvalidInterest("bad".into()));
        }
        Ok(())
    }

    async fn unregister_interest_set(&self, context: &ClientContext) -> Result<(), HandlerError> {
        self.call(HandlerCall::Unregister(context.key())).await;
        Ok(())
    }

    async fn heartbeat(&self, context: &ClientContext) -> Result<(), HandlerError> {
        self.call(HandlerCall::Heartbeat(context.key())).await;
        if self.fail_heartbeats.load(Ordering::SeqCst) {
            return Err(HandlerError::SessionInvalidated);
        }
        Ok(())
    }

    fn updates(
        &self,
        context: &ClientContext,
    ) -> futures_util::stream::BoxStream<'static, InterestSetNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.end_updates.load(Ordering::SeqCst) {
            drop(tx);
        } else {
            self.sessions.lock().unwrap().push((context.key(), tx));
        }
        self.changed.notify_waiters();

        Box::pin(MockUpdates {
            rx,
            cancelled: Arc::clone(&self.cancelled),
            changed: Arc::clone(&self.changed),
        })
    }
}

struct MockUpdates {
    rx: mpsc::UnboundedReceiver<InterestSetNotification>,
    cancelled: Arc<AtomicUsize>,
    changed: Arc<Notify>,
}

impl Stream for MockUpdates {
    type Item = InterestSetNotification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for MockUpdates {
    fn drop(&mut self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }
}

type AcceptItem = Result<Arc<dyn Broker>, TransportError>;

pub struct MockBrokerServer {
    connections: Mutex<Option<mpsc::UnboundedReceiver<AcceptItem>>>,
    shutdowns: AtomicUsize,
    stopped: watch::Sender<bool>,
}

/// Feeds accepted brokers into a [`MockBrokerServer`].
pub struct MockAcceptor {
    tx: Option<mpsc::UnboundedSender<AcceptItem>>,
}

pub fn mock_broker_server() -> (Arc<MockBrokerServer>, MockAcceptor) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (stopped, _) = watch::channel(false);
    let server = MockBrokerServer {
        connections: Mutex::new(Some(rx)),
        shutdowns: AtomicUsize::new(0),
        stopped,
    };
    (Arc::new(server), MockAcceptor { tx: Some(tx) })
}

impl MockBrokerServer {
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerServer for MockBrokerServer {
    fn client_connections(&self) -> ClientConnections {
        let Some(rx) = self.connections.lock().unwrap().take() else {
            return Box::pin(stream::empty());
        };
        let stopped = self.stopped.subscribe();

        Box::pin(stream::unfold((rx, stopped), |(mut rx, mut stopped)| async move {
            tokio::select! {
                biased;
                () = wait_stopped(&mut stopped) => None,
                item = rx.recv() => item.map(|item| (item, (rx, stopped))),
            }
        }))
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.stopped.send_replace(true);
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl MockAcceptor {
    pub fn accept(&self, broker: Arc<MockBroker>) {
        let broker: Arc<dyn Broker> = broker;
        if let Some(tx) = &self.tx {
            let _ = tx.send(Ok(broker));
        }
    }

    pub fn fail(&mut self, error: TransportError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(error));
        }
    }

    pub fn close(&mut self) {
        self.tx = None;
    }
}
