//! Hand-written collaborator mocks. Everything completes instantly unless a
//! mock is told to stall.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use parley_core::{
    AudioFormat, CallbackAudioOutput, ChatMessage, ChatRole, EncodingInfo, LlmChunk, LlmChunkStream,
    MarkPlayed, ModelResponse, PromptModel, SpeechCallbacks, SpeechGenerator,
    SpeechGeneratorClient, StreamingModel, ToolCall, ToolExecutor,
};

// ── Language models ────────────────────────────────────────────────

/// Returns canned responses in order, then empty ones. Records every
/// message list it was called with.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PromptModel for ScriptedModel {
    async fn prompt(&self, messages: &[ChatMessage]) -> anyhow::Result<ModelResponse> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

/// Always asks for the same tool.
pub struct ToolHungryModel;

#[async_trait]
impl PromptModel for ToolHungryModel {
    async fn prompt(&self, messages: &[ChatMessage]) -> anyhow::Result<ModelResponse> {
        Ok(ModelResponse {
            content: String::new(),
            tool_calls: vec![ToolCall::new(
                format!("call-{}", messages.len()),
                "lookup",
                serde_json::json!({ "q": "again" }),
            )],
        })
    }
}

pub struct PanickingModel;

#[async_trait]
impl PromptModel for PanickingModel {
    async fn prompt(&self, _messages: &[ChatMessage]) -> anyhow::Result<ModelResponse> {
        panic!("model exploded")
    }
}

pub struct FailingModel;

#[async_trait]
impl PromptModel for FailingModel {
    async fn prompt(&self, _messages: &[ChatMessage]) -> anyhow::Result<ModelResponse> {
        anyhow::bail!("rate limited")
    }
}

/// Streams a reply to the latest user message.
///
/// Messages starting with `"wait"` get a first sentence and then a stream
/// that never ends, so the turn stays active until cancelled.
pub struct ChattyModel;

fn last_user_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[async_trait]
impl StreamingModel for ChattyModel {
    async fn stream(&self, messages: &[ChatMessage]) -> anyhow::Result<LlmChunkStream> {
        let text = last_user_text(messages);
        if text.starts_with("wait") {
            let first = stream::iter(vec![Ok(LlmChunk::Content("Working on it. ".into()))]);
            return Ok(Box::pin(first.chain(stream::pending())));
        }
        let chunks = vec![
            Ok(LlmChunk::Content("You said ".into())),
            Ok(LlmChunk::Content(format!("{text}. Bye"))),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}

// ── Tools ──────────────────────────────────────────────────────────

/// Echoes the call back as `name(arguments)`.
pub struct EchoTools;

#[async_trait]
impl ToolExecutor for EchoTools {
    async fn execute(&self, call: &ToolCall) -> anyhow::Result<String> {
        Ok(format!("{}({})", call.name, call.arguments))
    }
}

// ── Text-to-speech ─────────────────────────────────────────────────

/// What the speech generator saw.
#[derive(Default)]
pub struct SpeechLog {
    pub texts: Mutex<Vec<String>>,
    pub marks: Mutex<Vec<String>>,
    pub opened: AtomicUsize,
    pub cancels: AtomicUsize,
    pub closes: AtomicUsize,
}

impl SpeechLog {
    pub fn spoken(&self) -> String {
        self.texts.lock().unwrap().concat()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Generator that "synthesizes" two bytes per character and reports marks
/// and end of speech synchronously.
#[derive(Default)]
pub struct InstantSpeech {
    pub log: Arc<SpeechLog>,
}

struct InstantGenerator {
    callbacks: SpeechCallbacks,
    log: Arc<SpeechLog>,
}

#[async_trait]
impl SpeechGeneratorClient for InstantSpeech {
    async fn new_speech_generator(
        &self,
        _encoding: EncodingInfo,
        callbacks: SpeechCallbacks,
    ) -> anyhow::Result<Box<dyn SpeechGenerator>> {
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InstantGenerator {
            callbacks,
            log: Arc::clone(&self.log),
        }))
    }
}

#[async_trait]
impl SpeechGenerator for InstantGenerator {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        self.log.texts.lock().unwrap().push(text.to_string());
        (self.callbacks.on_audio)(Bytes::from(vec![0u8; text.chars().count() * 2]));
        Ok(())
    }

    async fn mark(&self, id: &str) -> anyhow::Result<()> {
        self.log.marks.lock().unwrap().push(id.to_string());
        (self.callbacks.on_mark)(id.to_string());
        Ok(())
    }

    async fn end_of_text(&self) -> anyhow::Result<()> {
        (self.callbacks.on_speech_ended)();
        Ok(())
    }

    async fn cancel(&self) -> anyhow::Result<()> {
        self.log.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Audio output ───────────────────────────────────────────────────

/// Callback output that plays everything instantly.
#[derive(Default)]
pub struct InstantOutput {
    pub frames: Mutex<Vec<usize>>,
    pub marks: Mutex<Vec<String>>,
    pub clears: AtomicUsize,
}

impl InstantOutput {
    pub fn bytes_played(&self) -> usize {
        self.frames.lock().unwrap().iter().sum()
    }
}

#[async_trait]
impl CallbackAudioOutput for InstantOutput {
    fn encoding_info(&self) -> EncodingInfo {
        EncodingInfo::default()
    }

    async fn send_audio(&self, audio: Bytes) -> anyhow::Result<()> {
        self.frames.lock().unwrap().push(audio.len());
        Ok(())
    }

    async fn clear_buffer(&self) -> anyhow::Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark(&self, id: &str, on_played: MarkPlayed) -> anyhow::Result<()> {
        self.marks.lock().unwrap().push(id.to_string());
        on_played(Ok(()));
        Ok(())
    }
}

/// Callback output with a real playback rate: marks wait in a queue until
/// the test plays them, and a clear drops every queued mark with an error.
pub struct QueuedOutput {
    encoding: EncodingInfo,
    pending: Mutex<VecDeque<(String, MarkPlayed)>>,
    pub frames: AtomicUsize,
    pub clears: AtomicUsize,
}

impl QueuedOutput {
    /// Linear16 at `sample_rate`, so one second is `2 * sample_rate` bytes.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            encoding: EncodingInfo::new(sample_rate, AudioFormat::Linear16),
            pending: Mutex::new(VecDeque::new()),
            frames: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
        }
    }

    pub fn pending_marks(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Report the oldest queued mark as played. Returns its ID.
    pub fn play_next(&self) -> Option<String> {
        let (id, on_played) = self.pending.lock().unwrap().pop_front()?;
        on_played(Ok(()));
        Some(id)
    }

    /// Report every queued mark as played, in order.
    pub fn play_all(&self) -> usize {
        let mut played = 0;
        while self.play_next().is_some() {
            played += 1;
        }
        played
    }
}

#[async_trait]
impl CallbackAudioOutput for QueuedOutput {
    fn encoding_info(&self) -> EncodingInfo {
        self.encoding
    }

    async fn send_audio(&self, _audio: Bytes) -> anyhow::Result<()> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear_buffer(&self) -> anyhow::Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        let dropped: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for (_, on_played) in dropped {
            on_played(Err(anyhow::anyhow!("cleared")));
        }
        Ok(())
    }

    async fn mark(&self, id: &str, on_played: MarkPlayed) -> anyhow::Result<()> {
        self.pending
            .lock()
            .unwrap()
            .push_back((id.to_string(), on_played));
        Ok(())
    }
}
