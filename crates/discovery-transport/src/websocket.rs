//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based broker using tokio-tungstenite.
//! Every WebSocket message carries one or more length-prefixed frames.

use async_trait::async_trait;
use bytes::BytesMut;
use discovery_protocol::{codec, Frame, InboundMessage, InterestSetNotification, ProtocolError};
use futures_util::stream::{self, SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, info, trace, warn};

use crate::traits::{Broker, BrokerServer, ClientConnections, Incoming, TransportError};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// How long a client may take to complete the WebSocket handshake.
    pub handshake_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7002)),
            max_message_size: 64 * 1024, // 64 KB
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Resolve once `rx` reads `true` or its sender is gone.
async fn wait_stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// WebSocket broker server.
pub struct WebSocketBrokerServer {
    listener: Arc<TcpListener>,
    config: WebSocketConfig,
    shutdown: watch::Sender<bool>,
}

impl WebSocketBrokerServer {
    /// Create a new WebSocket broker server.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            listener: Arc::new(listener),
            config,
            shutdown,
        })
    }

    /// Create a new WebSocket broker server with default limits.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this server is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl BrokerServer for WebSocketBrokerServer {
    fn client_connections(&self) -> ClientConnections {
        let acceptor = Acceptor {
            listener: Arc::clone(&self.listener),
            max_message_size: self.config.max_message_size,
            handshake_timeout: self.config.handshake_timeout,
            shutdown: self.shutdown.subscribe(),
            handshakes: JoinSet::new(),
            done: false,
        };

        Box::pin(stream::unfold(acceptor, |mut acceptor| async move {
            let item = acceptor.next_broker().await?;
            Some((item, acceptor))
        }))
    }

    async fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("WebSocket transport shutting down");
        }
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

type Handshake = Option<(WebSocketStream<TcpStream>, SocketAddr)>;

/// Accepts TCP connections and completes their handshakes concurrently.
///
/// Pending handshakes are aborted when the acceptor is dropped.
struct Acceptor {
    listener: Arc<TcpListener>,
    max_message_size: usize,
    handshake_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    handshakes: JoinSet<Handshake>,
    done: bool,
}

impl Acceptor {
    async fn next_broker(&mut self) -> Option<Result<Arc<dyn Broker>, TransportError>> {
        if self.done {
            return None;
        }

        loop {
            tokio::select! {
                biased;
                () = wait_stopped(&mut self.shutdown) => return None,
                Some(joined) = self.handshakes.join_next(), if !self.handshakes.is_empty() => {
                    match joined {
                        Ok(Some((ws_stream, addr))) => {
                            let broker = WebSocketBroker::new(
                                ws_stream,
                                addr,
                                self.max_message_size,
                                self.shutdown.clone(),
                            );
                            return Some(Ok(Arc::new(broker)));
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Handshake task failed: {}", e),
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted TCP connection from {}", addr);
                        self.handshakes
                            .spawn(handshake(stream, addr, self.handshake_timeout));
                    }
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        self.done = true;
                        return Some(Err(TransportError::Io(e)));
                    }
                },
            }
        }
    }
}

async fn handshake(stream: TcpStream, addr: SocketAddr, timeout: Duration) -> Handshake {
    match tokio::time::timeout(timeout, accept_async(stream)).await {
        Ok(Ok(ws_stream)) => {
            debug!("WebSocket handshake completed with {}", addr);
            Some((ws_stream, addr))
        }
        Ok(Err(e)) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            None
        }
        Err(_) => {
            warn!("WebSocket handshake with {} timed out after {:?}", addr, timeout);
            None
        }
    }
}

/// A broker over one WebSocket connection.
pub struct WebSocketBroker {
    sink: Mutex<WsSink>,
    source: StdMutex<Option<WsSource>>,
    remote_addr: SocketAddr,
    max_message_size: usize,
    closed: watch::Sender<bool>,
    server_shutdown: watch::Receiver<bool>,
}

impl WebSocketBroker {
    fn new(
        stream: WebSocketStream<TcpStream>,
        remote_addr: SocketAddr,
        max_message_size: usize,
        server_shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (sink, source) = stream.split();
        let (closed, _) = watch::channel(false);

        Self {
            sink: Mutex::new(sink),
            source: StdMutex::new(Some(source)),
            remote_addr,
            max_message_size,
            closed,
            server_shutdown,
        }
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let data = codec::encode(frame)?;
        let mut closed = self.closed.subscribe();

        tokio::select! {
            biased;
            () = wait_stopped(&mut closed) => Err(TransportError::ConnectionClosed),
            result = async {
                let mut sink = self.sink.lock().await;
                sink.send(Message::Binary(data.to_vec())).await
            } => result.map_err(|e| TransportError::SendFailed(e.to_string())),
        }
    }
}

#[async_trait]
impl Broker for WebSocketBroker {
    fn incoming(&self) -> Incoming {
        let source = self.source.lock().ok().and_then(|mut source| source.take());
        let Some(source) = source else {
            warn!(remote = %self.remote_addr, "Incoming stream already taken");
            return Box::pin(stream::empty());
        };

        let reader = FrameReader {
            source,
            read_buffer: BytesMut::with_capacity(4096),
            max_message_size: self.max_message_size,
            closed: self.closed.subscribe(),
            server_shutdown: self.server_shutdown.clone(),
            done: false,
        };

        Box::pin(stream::unfold(reader, |mut reader| async move {
            let item = reader.next_message().await?;
            Some((item, reader))
        }))
    }

    async fn submit(&self, notification: InterestSetNotification) -> Result<(), TransportError> {
        self.send_frame(&Frame::notification(notification)).await
    }

    async fn acknowledge(&self, message: &InboundMessage) -> Result<(), TransportError> {
        self.send_frame(&Frame::ack(message.correlation_id)).await
    }

    async fn shutdown(&self) {
        if self.closed.send_replace(true) {
            return; // Already closed
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(remote = %self.remote_addr, error = %e, "Close failed");
        }
        debug!(remote = %self.remote_addr, "Broker shut down");
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }
}

/// Read side of a [`WebSocketBroker`].
struct FrameReader {
    source: WsSource,
    read_buffer: BytesMut,
    max_message_size: usize,
    closed: watch::Receiver<bool>,
    server_shutdown: watch::Receiver<bool>,
    done: bool,
}

impl FrameReader {
    async fn next_message(&mut self) -> Option<Result<InboundMessage, TransportError>> {
        if self.done {
            return None;
        }

        let result = self.read_message().await;
        if !matches!(result, Some(Ok(_))) {
            self.done = true;
        }
        result
    }

    fn buffer(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                data.len(),
                self.max_message_size
            );
            return Err(ProtocolError::FrameTooLarge(data.len()).into());
        }
        self.read_buffer.extend_from_slice(data);
        Ok(())
    }

    async fn read_message(&mut self) -> Option<Result<InboundMessage, TransportError>> {
        loop {
            // First, try to decode from the existing buffer
            match codec::decode_from(&mut self.read_buffer) {
                Ok(Some(frame)) => {
                    trace!(frame_type = ?frame.frame_type(), "Decoded frame");
                    return Some(frame.into_inbound().map_err(|frame| {
                        TransportError::Protocol(ProtocolError::UnexpectedFrame(frame.frame_type()))
                    }));
                }
                Ok(None) => {}
                Err(e) => return Some(Err(e.into())),
            }

            // Need more data - read from the WebSocket
            let message = tokio::select! {
                biased;
                () = wait_stopped(&mut self.closed) => return None,
                () = wait_stopped(&mut self.server_shutdown) => return None,
                message = self.source.next() => message,
            };

            match message {
                Some(Ok(Message::Binary(data))) => {
                    if let Err(e) = self.buffer(&data) {
                        return Some(Err(e));
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    // For compatibility, treat text as binary
                    if let Err(e) = self.buffer(text.as_bytes()) {
                        return Some(Err(e));
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return None;
                }
                Some(Ok(_)) => {
                    // Ping, pong and raw frames are handled by tungstenite
                }
                Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!("WebSocket stream ended");
                    return None;
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return Some(Err(TransportError::ReceiveFailed(e.to_string())));
                }
            }
        }
    }
}
