//! Tool calls requested by the language model.

use serde::{Deserialize, Serialize};

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Model-assigned call ID, echoed back with the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// JSON arguments.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of executing a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "output", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The tool ran and produced output.
    Completed(String),
    /// The tool failed; the message is fed back to the model.
    Failed(String),
}

impl ToolOutcome {
    /// Text handed back to the model for this outcome.
    #[must_use]
    pub fn as_model_input(&self) -> String {
        match self {
            Self::Completed(output) => output.clone(),
            Self::Failed(message) => format!("error: {message}"),
        }
    }
}

/// A tool call together with its outcome, as recorded on a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub call: ToolCall,
    pub outcome: ToolOutcome,
}
