//! Session and transaction state machines.
//!
//! A [`Session`] performs the connect handshake and hands out identifiers.
//! Transactions and audio transfers share one begin/end state machine,
//! [`Exchange`], and differ only in their message names and id field.

use std::marker::PhantomData;
use std::time::Duration;

use log::{debug, info};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::error::{NcsError, Result};
use crate::message::{AUDIO_ID, Message, MessageKind, TRANSACTION_ID};
use crate::transport::MessageTransport;

/// Monotonic identifier generator, starts at 1 and never reuses a value
#[derive(Debug, Clone)]
pub struct IdSequence {
    next: u64,
}

impl IdSequence {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection-scoped context established by the `connect` handshake
///
/// The session borrows its transport; the caller owns the transport's
/// lifetime and is responsible for closing it.
pub struct Session<'t, T: MessageTransport + ?Sized> {
    id: Option<String>,
    transport: &'t T,
    transaction_ids: IdSequence,
    audio_ids: IdSequence,
    receive_timeout: Option<Duration>,
}

impl<'t, T: MessageTransport + ?Sized> Session<'t, T> {
    pub fn new(transport: &'t T) -> Self {
        Self {
            id: None,
            transport,
            transaction_ids: IdSequence::new(),
            audio_ids: IdSequence::new(),
            receive_timeout: None,
        }
    }

    /// Bound the wait for the `connected` reply
    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Construct and initiate a session in one step
    pub async fn open(
        transport: &'t T,
        user_id: &str,
        device_id: &str,
        extra: Map<String, Value>,
    ) -> Result<Self> {
        let mut session = Self::new(transport);
        session.initiate(user_id, device_id, extra).await?;
        Ok(session)
    }

    /// Server-issued identifier, present once `initiate` succeeded
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn transport(&self) -> &'t T {
        self.transport
    }

    /// Send `connect` and wait for exactly one reply
    ///
    /// A session is initiated once; build a fresh one for every attempt.
    pub async fn initiate(
        &mut self,
        user_id: &str,
        device_id: &str,
        extra: Map<String, Value>,
    ) -> Result<()> {
        if self.id.is_some() {
            return Err(NcsError::protocol("session already initiated"));
        }

        let mut connect = Message::new(MessageKind::Connect);
        connect.insert("device_id", device_id).insert("user_id", user_id);
        connect.merge(extra);
        self.transport.send_message(&connect).await?;

        let reply = self.transport.receive_message(self.receive_timeout).await?;
        if *reply.kind() != MessageKind::Connected {
            return Err(NcsError::protocol("invalid session connection message"));
        }

        let session_id = reply
            .session_id()
            .ok_or_else(|| NcsError::protocol("connected message carries no session_id"))?;
        info!("Session {} established", session_id);
        self.id = Some(session_id.to_string());
        Ok(())
    }

    pub fn next_transaction_id(&mut self) -> u64 {
        self.transaction_ids.next_id()
    }

    pub fn next_audio_id(&mut self) -> u64 {
        self.audio_ids.next_id()
    }

    /// Allocate a transaction id and bind a not-yet-begun transaction to it
    pub fn create_transaction(&mut self) -> Transaction<'t, T> {
        Exchange::new(self.next_transaction_id(), self.transport)
    }

    /// Allocate a transaction and send its `query_begin`
    pub async fn begin_transaction(&mut self, fields: Map<String, Value>) -> Result<Transaction<'t, T>> {
        let mut transaction = self.create_transaction();
        transaction.begin(fields).await?;
        Ok(transaction)
    }

    /// Allocate an audio id and bind a not-yet-begun audio transfer to it
    pub fn create_audio_transfer(&mut self) -> AudioTransfer<'t, T> {
        Exchange::new(self.next_audio_id(), self.transport)
    }
}

/// Marker describing the wire names of one exchange flavour
pub trait ExchangeKind {
    const BEGIN: MessageKind;
    const END: MessageKind;
    const ID_FIELD: &'static str;
}

/// `query_begin` / `query_parameter` / `query_end` exchange
#[derive(Debug)]
pub enum Query {}

impl ExchangeKind for Query {
    const BEGIN: MessageKind = MessageKind::QueryBegin;
    const END: MessageKind = MessageKind::QueryEnd;
    const ID_FIELD: &'static str = TRANSACTION_ID;
}

/// `audio` / binary frames / `audio_end` exchange
#[derive(Debug)]
pub enum AudioStream {}

impl ExchangeKind for AudioStream {
    const BEGIN: MessageKind = MessageKind::Audio;
    const END: MessageKind = MessageKind::AudioEnd;
    const ID_FIELD: &'static str = AUDIO_ID;
}

/// Lifecycle of an exchange; `Ended` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Created,
    Began,
    Ended,
}

/// Begin/end exchange scoped to a session
pub struct Exchange<'t, T: MessageTransport + ?Sized, K: ExchangeKind> {
    id: u64,
    state: ExchangeState,
    transport: &'t T,
    kind: PhantomData<K>,
}

/// One begin/parameter/end request cycle
pub type Transaction<'t, T> = Exchange<'t, T, Query>;

/// Exchange that streams encoded audio bytes for a transaction
pub type AudioTransfer<'t, T> = Exchange<'t, T, AudioStream>;

impl<'t, T: MessageTransport + ?Sized, K: ExchangeKind> Exchange<'t, T, K> {
    pub fn new(id: u64, transport: &'t T) -> Self {
        Self {
            id,
            state: ExchangeState::Created,
            transport,
            kind: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Send the begin message with caller fields merged in
    pub async fn begin(&mut self, fields: Map<String, Value>) -> Result<()> {
        self.require(ExchangeState::Created, "begin")?;
        self.send(Message::with_fields(K::BEGIN, fields)).await?;
        self.state = ExchangeState::Began;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.require(ExchangeState::Began, "end")?;
        self.send(Message::new(K::END)).await?;
        self.state = ExchangeState::Ended;
        Ok(())
    }

    async fn send(&self, mut message: Message) -> Result<()> {
        message.insert(K::ID_FIELD, self.id);
        self.transport.send_message(&message).await
    }

    fn require(&self, expected: ExchangeState, operation: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(NcsError::Protocol(format!(
                "cannot {} {} {} in state {:?}",
                operation,
                K::ID_FIELD,
                self.id,
                self.state
            )))
        }
    }
}

impl<'t, T: MessageTransport + ?Sized> Exchange<'t, T, Query> {
    /// Send a `query_parameter`; `value` is merged into the message body
    pub async fn send_parameter(
        &mut self,
        name: &str,
        parameter_type: &str,
        value: Map<String, Value>,
    ) -> Result<()> {
        self.require(ExchangeState::Began, "send a parameter on")?;
        let mut message = Message::new(MessageKind::QueryParameter);
        message
            .insert("parameter_name", name)
            .insert("parameter_type", parameter_type)
            .merge(value);
        self.send(message).await
    }

    /// Send `query_end`, optionally waiting for the terminal message
    ///
    /// Returns the terminal message when `wait` is true and `None` otherwise.
    pub async fn end(&mut self, wait: bool, timeout: Option<Duration>) -> Result<Option<Message>> {
        self.finish().await?;
        if wait {
            self.wait_for_query_end(timeout).await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Receive until a `query_end` or `disconnect` for this transaction
    ///
    /// Unrelated messages are discarded. A `query_error` for this transaction
    /// is surfaced as [`NcsError::Query`]. `timeout` bounds the whole wait,
    /// not each individual receive.
    pub async fn wait_for_query_end(&self, timeout: Option<Duration>) -> Result<Message> {
        if self.state == ExchangeState::Created {
            return Err(NcsError::protocol(format!(
                "transaction {} was never begun",
                self.id
            )));
        }

        // A spent deadline still polls once; an already-buffered reply wins.
        let deadline = timeout.map(|limit| Instant::now() + limit);
        loop {
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));

            let message = match self.transport.receive_message(remaining).await {
                Err(NcsError::Timeout(elapsed)) => {
                    return Err(NcsError::Timeout(timeout.unwrap_or(elapsed)));
                }
                other => other?,
            };

            match message.kind() {
                kind if kind.is_terminal() && self.concerns(&message) => return Ok(message),
                MessageKind::QueryError if self.concerns(&message) => {
                    return Err(NcsError::Query {
                        reason: message.reason().unwrap_or("unknown").to_string(),
                    });
                }
                kind => debug!("Transaction {} discarding {} message", self.id, kind),
            }
        }
    }

    fn concerns(&self, message: &Message) -> bool {
        match message.transaction_id() {
            Some(id) => id == self.id,
            None => *message.kind() != MessageKind::QueryEnd,
        }
    }
}

impl<'t, T: MessageTransport + ?Sized> Exchange<'t, T, AudioStream> {
    /// Descriptor the owning transaction sends as its `AUDIO_INFO` value
    pub fn info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert(AUDIO_ID.to_string(), Value::from(self.id));
        info
    }

    /// Forward one encoded packet
    pub async fn send_bytes(&self, data: &[u8]) -> Result<()> {
        self.require(ExchangeState::Began, "send bytes on")?;
        self.transport.send_bytes(data).await
    }

    /// Send `audio_end` without waiting; completion arrives on the transaction
    pub async fn end(&mut self) -> Result<()> {
        self.finish().await
    }
}
