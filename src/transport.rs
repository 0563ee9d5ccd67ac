//! WebSocket transport for the speech/NLU service.
//!
//! The transport owns the socket and nothing else: it connects, moves one
//! structured message or one binary frame at a time, and closes. Protocol
//! semantics live in [`crate::session`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{NcsError, Result};
use crate::message::Message;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Structured message exchange used by sessions and transactions
///
/// Implementations allow one in-flight operation per direction; sends and
/// receives may overlap but two concurrent sends never do.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Open the underlying connection
    async fn connect(&self) -> Result<()>;

    /// Send one structured message
    async fn send_message(&self, message: &Message) -> Result<()>;

    /// Receive one structured message, failing with [`NcsError::Timeout`]
    /// when `timeout` elapses first
    async fn receive_message(&self, timeout: Option<Duration>) -> Result<Message>;

    /// Send one binary frame (encoded audio)
    async fn send_bytes(&self, data: &[u8]) -> Result<()>;

    /// Close the connection. Safe to call repeatedly or before `connect`.
    async fn close(&self) -> Result<()>;
}

/// Direction of an observed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub fn marker(&self) -> &'static str {
        match self {
            Direction::Sent => ">>>>",
            Direction::Received => "<<<<",
        }
    }
}

/// Hook invoked for every message crossing the transport
pub trait MessageObserver: Send + Sync {
    fn on_message(&self, direction: Direction, message: &Message);

    fn on_bytes(&self, _len: usize) {}
}

/// Writes every message to the log as pretty-printed JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl MessageObserver for LoggingObserver {
    fn on_message(&self, direction: Direction, message: &Message) {
        let rendered = serde_json::to_string_pretty(&message.to_json())
            .unwrap_or_else(|_| message.kind().to_string());
        info!("{}\n{}", direction.marker(), rendered);
    }

    fn on_bytes(&self, len: usize) {
        trace!("{} {} bytes of audio", Direction::Sent.marker(), len);
    }
}

/// Service address and credentials
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub app_id: String,
    pub app_key: String,
}

impl TransportConfig {
    /// Service URL with the authentication parameters appended
    pub fn handshake_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| NcsError::protocol(format!("invalid service url {}: {}", self.url, e)))?;
        url.query_pairs_mut()
            .append_pair("app_id", &self.app_id)
            .append_pair("app_key", &self.app_key)
            .append_pair("algorithm", "key");
        Ok(url)
    }
}

/// [`MessageTransport`] over a tokio-tungstenite client connection
pub struct WebSocketTransport {
    config: TransportConfig,
    writer: Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    reader: Mutex<Option<SplitStream<WsStream>>>,
    observer: Arc<dyn MessageObserver>,
}

impl WebSocketTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self::with_observer(config, Arc::new(LoggingObserver))
    }

    pub fn with_observer(config: TransportConfig, observer: Arc<dyn MessageObserver>) -> Self {
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            observer,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub async fn is_open(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    async fn read_next(&self) -> Result<Message> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(NcsError::Closed)?;

        loop {
            match reader.next().await {
                Some(Ok(WsMessage::Text(text))) => return Message::from_text(&text),
                Some(Ok(WsMessage::Binary(data))) => {
                    return Err(NcsError::protocol(format!(
                        "unexpected binary frame of {} bytes",
                        data.len()
                    )));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("Server closed the connection: {:?}", frame);
                    return Err(NcsError::protocol("connection closed by server"));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(NcsError::protocol("connection closed by server")),
            }
        }
    }

    async fn write(&self, frame: WsMessage) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(NcsError::Closed)?;
        writer.send(frame).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for WebSocketTransport {
    async fn connect(&self) -> Result<()> {
        let url = self.config.handshake_url()?;
        info!("Connecting to {}", self.config.url);

        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(classify_handshake_error)?;
        debug!("Handshake completed with status {}", response.status());

        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.reader.lock().await = Some(reader);
        Ok(())
    }

    async fn send_message(&self, message: &Message) -> Result<()> {
        self.observer.on_message(Direction::Sent, message);
        self.write(WsMessage::Text(message.to_text()?)).await
    }

    async fn receive_message(&self, timeout: Option<Duration>) -> Result<Message> {
        let message = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_next())
                .await
                .map_err(|_| NcsError::Timeout(limit))??,
            None => self.read_next().await?,
        };
        self.observer.on_message(Direction::Received, &message);
        Ok(message)
    }

    async fn send_bytes(&self, data: &[u8]) -> Result<()> {
        self.observer.on_bytes(data.len());
        self.write(WsMessage::Binary(data.to_vec())).await
    }

    async fn close(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            debug!("Closing connection to {}", self.config.url);
            if let Err(e) = writer.close().await {
                warn!("Error while closing websocket: {}", e);
            }
        }
        self.reader.lock().await.take();
        Ok(())
    }
}

/// Map a failed connection attempt onto the error taxonomy
///
/// 401 is an authorization failure, 5xx a server failure, and every other
/// rejected handshake a protocol error. Failures that never reached an HTTP
/// response (DNS, TCP, TLS) stay websocket errors.
pub fn classify_handshake_error(error: tungstenite::Error) -> NcsError {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        value.to_str().unwrap_or("<binary>").to_string(),
                    )
                })
                .collect();
            match status {
                401 => NcsError::Authentication { status, headers },
                500..=599 => NcsError::Server { status, headers },
                _ => NcsError::Protocol(format!("handshake rejected with status {}", status)),
            }
        }
        other => NcsError::WebSocket(other),
    }
}
