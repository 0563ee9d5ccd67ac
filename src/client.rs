//! Request workflows: one connect → session → transaction → close cycle each.
//!
//! Every workflow closes the transport on every exit path before returning.

use std::time::Duration;

use log::{info, warn};
use serde_json::{Map, Value, json};

use crate::capture::{AudioSource, CancelSignal};
use crate::error::{NcsError, Result};
use crate::message::{Message, fields};
use crate::opus_codec::FrameEncoder;
use crate::pipeline::{AudioPipeline, PipelineStats};
use crate::session::Session;
use crate::transport::MessageTransport;

pub const TEXT_COMMAND: &str = "NDSP_APP_CMD";
pub const AUDIO_COMMAND: &str = "NDSP_ASR_APP_CMD";
pub const CONCEPT_UPLOAD_COMMAND: &str = "NDSP_CONCEPT_UPLOAD_FULL_CMD";
pub const CONCEPT_WIPE_COMMAND: &str = "NDSP_DELETE_ALL_CONCEPTS_DATA_CMD";

/// Maximum concept items carried by one `CONTENT_DATA` parameter
pub const MAX_ITEMS_PER_PAYLOAD: usize = 100;

pub const DEFAULT_DEVICE_ID: &str = "MIX_WS_RUST_SAMPLE_APP";
pub const DEFAULT_LANGUAGE: &str = "eng-USA";

/// Per-request parameters shared by every workflow
#[derive(Debug, Clone)]
pub struct RequestSettings {
    pub user_id: String,
    pub device_id: String,
    pub context_tag: Option<String>,
    pub language: String,
    /// Bound on each wait for a server reply; unbounded when `None`
    pub receive_timeout: Option<Duration>,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            user_id: "user1".to_string(),
            device_id: DEFAULT_DEVICE_ID.to_string(),
            context_tag: None,
            language: DEFAULT_LANGUAGE.to_string(),
            receive_timeout: None,
        }
    }
}

impl RequestSettings {
    fn query_fields(&self, command: &str) -> Map<String, Value> {
        let mut query = Map::new();
        query.insert("command".to_string(), Value::from(command));
        query.insert("language".to_string(), Value::from(self.language.as_str()));
        if let Some(tag) = &self.context_tag {
            query.insert("context_tag".to_string(), Value::from(tag.as_str()));
        }
        query
    }

    async fn open_session<'t, T: MessageTransport + ?Sized>(
        &self,
        transport: &'t T,
        extra: Map<String, Value>,
    ) -> Result<Session<'t, T>> {
        transport.connect().await?;
        let mut session = Session::new(transport).with_receive_timeout(self.receive_timeout);
        session.initiate(&self.user_id, &self.device_id, extra).await?;
        Ok(session)
    }
}

/// Result of a voice request
#[derive(Debug, Clone)]
pub struct AudioOutcome {
    pub message: Message,
    pub stats: PipelineStats,
}

/// One `CONTENT_DATA` parameter of a concept upload
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptChunk {
    pub parameter_type: &'static str,
    pub value: Map<String, Value>,
}

/// Close `transport` and return `outcome`, keeping the first error
async fn close_after<T, R>(transport: &T, outcome: Result<R>) -> Result<R>
where
    T: MessageTransport + ?Sized,
{
    let closed = transport.close().await;
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Err(close_error)) => {
            warn!("Failed to close transport after error: {}", close_error);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}

fn terminal(message: Option<Message>) -> Result<Message> {
    message.ok_or_else(|| NcsError::protocol("transaction ended without a terminal message"))
}

/// Run natural-language understanding on a sentence
pub async fn understand_text<T>(transport: &T, settings: &RequestSettings, text: &str) -> Result<Message>
where
    T: MessageTransport + ?Sized,
{
    let outcome = async {
        let mut session = settings.open_session(transport, Map::new()).await?;
        let mut transaction = session
            .begin_transaction(settings.query_fields(TEXT_COMMAND))
            .await?;
        let request_info = fields(json!({
            "dictionary": {
                "application_data": {
                    "text_input": text,
                },
            },
        }));
        transaction
            .send_parameter("REQUEST_INFO", "dictionary", request_info)
            .await?;
        terminal(transaction.end(true, settings.receive_timeout).await?)
    }
    .await;
    close_after(transport, outcome).await
}

/// Stream microphone audio for speech recognition and understanding
///
/// Audio flows until `cancel` is raised. The transaction is ended before
/// streaming starts; its `query_end` only arrives once the server has
/// processed the whole transfer.
pub async fn understand_audio<T, S, E>(
    transport: &T,
    settings: &RequestSettings,
    source: &mut S,
    encoder: &mut E,
    cancel: &CancelSignal,
) -> Result<AudioOutcome>
where
    T: MessageTransport + ?Sized,
    S: AudioSource + ?Sized,
    E: FrameEncoder + ?Sized,
{
    let outcome = async {
        let mut pipeline = AudioPipeline::new(source.format(), encoder.frame_size())?;

        let mut extra = Map::new();
        extra.insert("codec".to_string(), Value::from(encoder.codec_descriptor()));
        let mut session = settings.open_session(transport, extra).await?;

        let mut transaction = session
            .begin_transaction(settings.query_fields(AUDIO_COMMAND))
            .await?;
        let mut transfer = session.create_audio_transfer();
        transaction
            .send_parameter("AUDIO_INFO", "audio", transfer.info())
            .await?;
        transaction.end(false, None).await?;
        transfer.begin(Map::new()).await?;

        let stats = pipeline.run(source, encoder, &mut transfer, cancel).await?;
        info!("Waiting for transaction {} to complete", transaction.id());
        let message = transaction
            .wait_for_query_end(settings.receive_timeout)
            .await?;
        Ok(AudioOutcome { message, stats })
    }
    .await;
    close_after(transport, outcome).await
}

/// Validate a concept data document: a JSON array of objects
pub fn parse_concept_data(document: Value) -> Result<Vec<Value>> {
    let Value::Array(items) = document else {
        return Err(NcsError::InvalidInput(
            "concept data must be a list of objects with 'literal' and 'value'".to_string(),
        ));
    };
    if let Some(position) = items.iter().position(|item| !item.is_object()) {
        return Err(NcsError::InvalidInput(format!(
            "concept data item {} is not an object",
            position
        )));
    }
    Ok(items)
}

/// Split concept items into upload parameters
///
/// A single chunk is sent as `dictionary`. Several chunks are marked
/// `sequence_start`, `sequence_chunk`..., `sequence_end`.
pub fn concept_chunks(items: &[Value]) -> Vec<ConceptChunk> {
    let wrap = |slice: &[Value]| fields(json!({ "dictionary": { "items": slice } }));

    if items.len() <= MAX_ITEMS_PER_PAYLOAD {
        return vec![ConceptChunk {
            parameter_type: "dictionary",
            value: wrap(items),
        }];
    }

    let slices: Vec<&[Value]> = items.chunks(MAX_ITEMS_PER_PAYLOAD).collect();
    let last = slices.len() - 1;
    slices
        .into_iter()
        .enumerate()
        .map(|(index, slice)| ConceptChunk {
            parameter_type: match index {
                0 => "sequence_start",
                i if i == last => "sequence_end",
                _ => "sequence_chunk",
            },
            value: wrap(slice),
        })
        .collect()
}

/// Upload per-user data for a dynamic list concept
pub async fn upload_concept_data<T>(
    transport: &T,
    settings: &RequestSettings,
    concept_id: &str,
    items: &[Value],
) -> Result<Message>
where
    T: MessageTransport + ?Sized,
{
    let chunks = concept_chunks(items);
    let outcome = async {
        let mut session = settings.open_session(transport, Map::new()).await?;
        let mut query = Map::new();
        query.insert("command".to_string(), Value::from(CONCEPT_UPLOAD_COMMAND));
        query.insert("concept_id".to_string(), Value::from(concept_id));
        let mut transaction = session.begin_transaction(query).await?;
        for chunk in chunks {
            transaction
                .send_parameter("CONTENT_DATA", chunk.parameter_type, chunk.value)
                .await?;
        }
        terminal(transaction.end(true, settings.receive_timeout).await?)
    }
    .await;
    close_after(transport, outcome).await
}

/// Remove the user's data for every dynamic list concept
pub async fn wipe_concept_data<T>(transport: &T, settings: &RequestSettings) -> Result<Message>
where
    T: MessageTransport + ?Sized,
{
    let outcome = async {
        let mut session = settings.open_session(transport, Map::new()).await?;
        let mut query = Map::new();
        query.insert("command".to_string(), Value::from(CONCEPT_WIPE_COMMAND));
        let mut transaction = session.begin_transaction(query).await?;
        terminal(transaction.end(true, settings.receive_timeout).await?)
    }
    .await;
    close_after(transport, outcome).await
}
