//! Shared test doubles: an in-memory transport, a counting encoder and a
//! scripted capture source.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::capture::{AudioFrame, AudioSource, CaptureFormat, CaptureQueue};
use crate::error::{NcsError, Result};
use crate::message::{Message, MessageKind, fields};
use crate::opus_codec::{EncodedPacket, FrameEncoder};
use crate::transport::MessageTransport;

pub mod opus_codec_tests;
pub mod session_tests;

/// Build a message from a JSON literal carrying its own discriminator
pub fn msg(value: Value) -> Message {
    Message::from_json(value).unwrap()
}

pub fn connected(session_id: &str) -> Message {
    let mut message = Message::new(MessageKind::Connected);
    message.insert("session_id", session_id);
    message
}

pub fn query_end(transaction_id: u64) -> Message {
    let mut message = Message::new(MessageKind::QueryEnd);
    message.insert("transaction_id", transaction_id);
    message
}

/// Everything written to a [`ScriptedTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Message(Message),
    Bytes(Vec<u8>),
}

impl Sent {
    pub fn message(&self) -> Option<&Message> {
        match self {
            Sent::Message(message) => Some(message),
            Sent::Bytes(_) => None,
        }
    }
}

/// In-memory transport replaying scripted replies
///
/// When the script runs dry a bounded receive sleeps out its timeout and
/// fails with `Timeout`. An unbounded receive fails with the idle timeout if
/// one is set, and with a protocol error otherwise, instead of hanging the
/// test.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Message>>,
    idle_timeout: Option<Duration>,
    sent: Mutex<Vec<Sent>>,
    connect_error: Mutex<Option<NcsError>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    /// Transport that reports its own read timeout once the script runs dry
    pub fn with_idle_timeout(replies: Vec<Message>, idle: Duration) -> Self {
        Self {
            idle_timeout: Some(idle),
            ..Self::new(replies)
        }
    }

    pub fn failing_connect(error: NcsError) -> Self {
        Self {
            connect_error: Mutex::new(Some(error)),
            ..Self::default()
        }
    }

    pub fn push_reply(&self, message: Message) {
        self.replies.lock().unwrap().push_back(message);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent().iter().filter_map(Sent::message).cloned().collect()
    }

    pub fn sent_kinds(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|sent| match sent {
                Sent::Message(message) => message.kind().to_string(),
                Sent::Bytes(_) => "<bytes>".to_string(),
            })
            .collect()
    }

    pub fn sent_bytes(&self) -> Vec<Vec<u8>> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Bytes(data) => Some(data),
                Sent::Message(_) => None,
            })
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.connect_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn send_message(&self, message: &Message) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Message(message.clone()));
        Ok(())
    }

    async fn receive_message(&self, timeout: Option<Duration>) -> Result<Message> {
        let next = self.replies.lock().unwrap().pop_front();
        match (next, timeout) {
            (Some(message), _) => Ok(message),
            (None, Some(limit)) => {
                tokio::time::sleep(limit).await;
                Err(NcsError::Timeout(limit))
            }
            (None, None) => match self.idle_timeout {
                Some(idle) => Err(NcsError::Timeout(idle)),
                None => Err(NcsError::protocol("no scripted reply left")),
            },
        }
    }

    async fn send_bytes(&self, data: &[u8]) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Bytes(data.to_vec()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Encoder that returns its input unchanged and counts calls
pub struct CountingEncoder {
    frame_size: usize,
    pub calls: usize,
}

impl CountingEncoder {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            calls: 0,
        }
    }
}

impl FrameEncoder for CountingEncoder {
    fn encode(&mut self, pcm: &[u8]) -> Result<EncodedPacket> {
        assert_eq!(pcm.len(), self.frame_size * 2, "encoder received a partial frame");
        self.calls += 1;
        Ok(EncodedPacket::new(pcm.to_vec()))
    }

    fn codec_descriptor(&self) -> String {
        "audio/L16;rate=16000".to_string()
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Capture source that enqueues preloaded frames when started
pub struct ScriptedSource {
    format: CaptureFormat,
    queue: CaptureQueue,
    on_start: Vec<AudioFrame>,
    pub starts: usize,
    pub stops: usize,
}

impl ScriptedSource {
    pub fn new(format: CaptureFormat, on_start: Vec<AudioFrame>) -> Self {
        Self {
            format,
            queue: CaptureQueue::new(),
            on_start,
            starts: 0,
            stops: 0,
        }
    }
}

impl AudioSource for ScriptedSource {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn queue(&self) -> CaptureQueue {
        self.queue.clone()
    }

    fn start(&mut self) -> Result<()> {
        self.starts += 1;
        for frame in self.on_start.drain(..) {
            self.queue.push(frame);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stops += 1;
        Ok(())
    }
}

/// Interleaved stereo PCM where left samples count up from 0 and right
/// samples count down from -1
pub fn stereo_frames(frames: usize) -> Vec<i16> {
    (0..frames as i16).flat_map(|i| [i, -1 - i]).collect()
}

/// Mono PCM counting up from `start`
pub fn mono_samples(start: i16, count: usize) -> Vec<i16> {
    (0..count as i16).map(|i| start.wrapping_add(i)).collect()
}

pub fn le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|sample| sample.to_le_bytes()).collect()
}

/// Field map from a JSON literal
pub fn body(value: Value) -> serde_json::Map<String, Value> {
    fields(value)
}
