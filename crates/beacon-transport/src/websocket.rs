//! Persistent WebSocket stream transport

use async_trait::async_trait;
use crate::{MessageCallback, RetryPolicy, Transport, TransportError, TransportFactory};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Variant name reported in diagnostics
pub const WEBSOCKET_TRANSPORT: &str = "websocket";

/// Factory for [`WebSocketTransport`]
#[derive(Debug, Clone)]
pub struct WebSocketFactory {
    /// Endpoint, e.g. `ws://controller:8000/clients/ws/agent-1`
    url: String,
    /// Handshake deadline
    connect_timeout: Duration,
    /// Send retry while another send holds the writer
    retry: RetryPolicy,
}

impl WebSocketFactory {
    /// Create a factory for the given endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the handshake deadline
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Set the send retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Endpoint this factory connects to
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TransportFactory for WebSocketFactory {
    fn name(&self) -> &str {
        WEBSOCKET_TRANSPORT
    }

    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        debug!("Connecting WebSocket transport to {}", self.url);

        let (stream, _response) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        info!("WebSocket transport connected to {}", self.url);
        Ok(Box::new(WebSocketTransport::from_stream(stream, self.retry)))
    }
}

/// Bidirectional stream transport with true push delivery
pub struct WebSocketTransport {
    /// Write half, `None` once torn down
    sink: Arc<Mutex<Option<WsSink>>>,
    /// Read half, moved into the reader task by `on_message`
    source: Option<WsSource>,
    /// Cleared when the reader sees the peer go away or on teardown
    open: Arc<AtomicBool>,
    /// Task forwarding inbound frames to the callback
    reader: Option<JoinHandle<()>>,
    /// Send retry policy
    retry: RetryPolicy,
    /// Set by `teardown`
    closed: bool,
}

impl WebSocketTransport {
    /// Wrap an already-established WebSocket stream
    pub fn from_stream(stream: WsStream, retry: RetryPolicy) -> Self {
        let (sink, source) = stream.split();
        Self {
            sink: Arc::new(Mutex::new(Some(sink))),
            source: Some(source),
            open: Arc::new(AtomicBool::new(true)),
            reader: None,
            retry,
            closed: false,
        }
    }

    /// Check whether the peer has not closed the socket
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &str {
        WEBSOCKET_TRANSPORT
    }

    fn on_message(&mut self, callback: MessageCallback) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut source = self.source.take()
            .ok_or(TransportError::CallbackAlreadyRegistered)?;
        let open = Arc::clone(&self.open);

        self.reader = Some(tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => callback(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => callback(text),
                        Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!("WebSocket closed by peer: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket read error: {}", e);
                        break;
                    }
                }
            }
            open.store(false, Ordering::Release);
            debug!("WebSocket reader stopped");
        }));

        Ok(())
    }

    /// Write one frame.
    ///
    /// A closed socket fails at once. While another send is still flushing
    /// the writer, the attempt is retried per the [`RetryPolicy`].
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        let mut attempts = 0;
        loop {
            if self.closed || !self.is_open() {
                return Err(TransportError::Closed);
            }
            attempts += 1;
            if let Ok(mut guard) = self.sink.try_lock() {
                return match guard.as_mut() {
                    Some(sink) => sink.send(Message::Text(frame)).await
                        .map_err(|e| TransportError::Send(e.to_string())),
                    None => Err(TransportError::Closed),
                };
            }

            debug!("WebSocket writer busy (attempt {})", attempts);
            if attempts >= self.retry.max_attempts {
                warn!("WebSocket send gave up after {} attempts", attempts);
                return Err(TransportError::NotReady { attempts });
            }
            sleep(self.retry.delay).await;
        }
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.open.store(false, Ordering::Release);
        debug!("Tearing down WebSocket transport");

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.source = None;

        let sink = Arc::clone(&self.sink);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(mut sink) = sink.lock().await.take() {
                        let _ = sink.close().await;
                    }
                });
            }
            Err(_) => {
                if let Ok(mut guard) = sink.try_lock() {
                    guard.take();
                }
            }
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
