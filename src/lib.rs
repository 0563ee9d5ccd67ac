//! # NCS Client
//!
//! Client for a cloud speech-recognition and natural-language-understanding
//! service spoken over a single WebSocket connection.
//!
//! ## Overview
//!
//! Every request follows the same shape: open the socket, establish a
//! session with `connect`/`connected`, run one transaction made of
//! `query_begin`, any number of `query_parameter` messages and `query_end`,
//! then wait for the server's terminal `query_end` and close. Voice requests
//! additionally stream encoded microphone audio through an audio transfer
//! tied to the transaction.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ncs_client::{understand_text, RequestSettings, TransportConfig, WebSocketTransport};
//!
//! #[tokio::main]
//! async fn main() -> ncs_client::Result<()> {
//!     let transport = WebSocketTransport::new(TransportConfig {
//!         url: "wss://ws.dev.nuance.com/v2".to_string(),
//!         app_id: "APP_ID".to_string(),
//!         app_key: "APP_KEY".to_string(),
//!     });
//!     let settings = RequestSettings {
//!         context_tag: Some("dicealpha".to_string()),
//!         ..RequestSettings::default()
//!     };
//!
//!     let reply = understand_text(&transport, &settings, "roll two dice").await?;
//!     println!("{}", reply.to_json());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`transport`]: WebSocket connection, handshake error mapping, message logging
//! - [`message`]: JSON wire messages discriminated by their `message` field
//! - [`session`]: session handshake, transaction and audio transfer state machines
//! - [`capture`]: capture format, lock-free capture queue, cancellation signal
//! - [`recorder`]: microphone capture through cpal
//! - [`opus_codec`]: fixed-frame Opus encoding
//! - [`pipeline`]: downmix, frame assembly, encode and stream with cooperative cancellation
//! - [`client`]: text, voice and concept data workflows
//! - [`interpretation`]: lenient reading of NLU results
//! - [`dice`]: dice rolls described by an interpretation
//! - [`config`]: configuration files and defaults
//!
//! ## Audio Pipeline
//!
//! 1. **Capture**: the device callback pushes interleaved 16-bit PCM onto a queue
//! 2. **Downmix**: bounded chunks are reduced to the first channel
//! 3. **Framing**: mono samples are cut into fixed 20 ms frames
//! 4. **Encoding**: each frame becomes one Opus packet
//! 5. **Transfer**: packets are sent as binary frames, then `audio_end`

/// Error taxonomy shared by the protocol core and the audio pipeline
pub mod error;

/// JSON wire message model
pub mod message;

/// WebSocket transport and message observation
pub mod transport;

/// Session, transaction and audio transfer state machines
pub mod session;

/// Capture format, capture queue and cancellation
pub mod capture;

/// Microphone capture through cpal
pub mod recorder;

/// Opus audio codec integration for speech upload
pub mod opus_codec;

/// Capture to transfer streaming loop
pub mod pipeline;

/// Request workflows built on sessions and transactions
pub mod client;

/// NLU result extraction
pub mod interpretation;

/// Dice rolls read from `dicealpha` interpretations
pub mod dice;

/// Configuration management with persistence and validation
pub mod config;

#[cfg(test)]
pub mod tests;

// Re-export main types for convenience
pub use capture::{AudioSource, CancelSignal, CaptureFormat};
pub use client::{
    understand_audio, understand_text, upload_concept_data, wipe_concept_data, AudioOutcome,
    RequestSettings,
};
pub use config::{AppConfig, ConfigManager};
pub use dice::{DiceRoll, RollOutcome};
pub use error::{NcsError, Result};
pub use interpretation::Interpretation;
pub use message::{Message, MessageKind};
pub use session::{AudioTransfer, Session, Transaction};
pub use transport::{MessageTransport, TransportConfig, WebSocketTransport};
