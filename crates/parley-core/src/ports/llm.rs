//! Language model and tool execution ports.
//!
//! Two generations of model client exist: a prompt client that returns the
//! whole response at once, and a streaming client that yields content and
//! tool-call chunks. [`LanguageModel`] records which one is configured so the
//! pipeline never has to probe the client at call time.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::domain::ToolCall;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the model context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Tool` messages, the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Complete response of a prompt-based model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// One item of a streaming model response.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmChunk {
    Content(String),
    ToolCall(ToolCall),
}

/// Stream of chunks returned by [`StreamingModel::stream`].
pub type LlmChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<LlmChunk>> + Send>>;

/// Model client returning a full response per call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PromptModel: Send + Sync {
    async fn prompt(&self, messages: &[ChatMessage]) -> anyhow::Result<ModelResponse>;
}

/// Model client yielding content and tool calls incrementally.
#[async_trait]
pub trait StreamingModel: Send + Sync {
    async fn stream(&self, messages: &[ChatMessage]) -> anyhow::Result<LlmChunkStream>;
}

/// A configured model client, tagged by protocol.
#[derive(Clone)]
pub enum LanguageModel {
    Prompt(Arc<dyn PromptModel>),
    Streaming(Arc<dyn StreamingModel>),
}

impl LanguageModel {
    #[must_use]
    pub const fn protocol_name(&self) -> &'static str {
        match self {
            Self::Prompt(_) => "prompt",
            Self::Streaming(_) => "streaming",
        }
    }
}

impl std::fmt::Debug for LanguageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LanguageModel")
            .field(&self.protocol_name())
            .finish()
    }
}

/// Executes tool calls requested by the model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> anyhow::Result<String>;
}
