//! Generate worker: model calls, streaming text into the speech player and
//! the tool loop.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use parley_core::{
    ChatMessage, LanguageModel, LlmChunk, ModelResponse, PromptModel, StreamingModel, ToolCall,
    ToolCallRecord, ToolExecutor, ToolOutcome, Trigger, TriggerKind, Turn, TurnEvent, TurnEvents,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::workers::GENERATE;
use crate::error::PipelineError;
use crate::speech_player::SpeechPlayer;

/// Everything the generate worker needs for one turn.
pub struct Generation {
    pub llm: Option<LanguageModel>,
    pub tools: Option<Arc<dyn ToolExecutor>>,
    pub max_tool_iterations: u32,
    pub player: SpeechPlayer,
    pub events: Arc<dyn TurnEvents>,
    pub turn: Arc<Mutex<Turn>>,
}

fn model_err(source: anyhow::Error) -> PipelineError {
    PipelineError::Worker {
        worker: GENERATE,
        source,
    }
}

/// Model context for a turn: system prompt, prior turns, then the trigger.
///
/// Prior turns contribute what the user actually heard when they were cut
/// short, and the full response otherwise.
pub fn build_messages(
    system_prompt: Option<&str>,
    history: &[Turn],
    trigger: &Trigger,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
        messages.push(ChatMessage {
            role: parley_core::ChatRole::System,
            content: prompt.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        });
    }

    for turn in history {
        messages.push(ChatMessage::user(trigger_content(&turn.trigger)));
        let reply = if turn.cancelled {
            turn.spoken_text.clone()
        } else {
            turn.response_text()
        };
        if !reply.is_empty() {
            messages.push(ChatMessage::assistant(reply, Vec::new()));
        }
    }

    messages.push(ChatMessage::user(trigger_content(trigger)));
    messages
}

fn trigger_content(trigger: &Trigger) -> String {
    match trigger.kind {
        TriggerKind::ToolResult => format!("[{}] {}", trigger.source, trigger.text),
        _ => trigger.text.clone(),
    }
}

impl Generation {
    fn turn_id(&self) -> Uuid {
        self.player.turn_id()
    }

    fn with_turn(&self, f: impl FnOnce(&mut Turn)) {
        f(&mut self.turn.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn speak(&self, text: String) {
        if text.is_empty() {
            return;
        }
        self.player.add_text_chunk(text.as_str());
        self.events.emit(TurnEvent::ResponseTextSegment {
            turn_id: self.turn_id(),
            text,
        });
    }

    async fn prompt_round(
        &self,
        model: &dyn PromptModel,
        messages: &[ChatMessage],
    ) -> Result<ModelResponse, PipelineError> {
        let response = model.prompt(messages).await.map_err(model_err)?;
        self.speak(response.content.clone());
        Ok(response)
    }

    async fn stream_round(
        &self,
        model: &dyn StreamingModel,
        messages: &[ChatMessage],
    ) -> Result<ModelResponse, PipelineError> {
        let mut chunks = model.stream(messages).await.map_err(model_err)?;
        let mut response = ModelResponse::default();
        while let Some(chunk) = chunks.next().await {
            match chunk.map_err(model_err)? {
                LlmChunk::Content(text) => {
                    response.content.push_str(&text);
                    self.speak(text);
                }
                LlmChunk::ToolCall(call) => response.tool_calls.push(call),
            }
        }
        Ok(response)
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        let turn_id = self.turn_id();
        self.events.emit(TurnEvent::ToolCallStarted {
            turn_id,
            call_id: call.id.clone(),
            name: call.name.clone(),
        });

        let result = match &self.tools {
            Some(tools) => tools.execute(call).await,
            None => Err(anyhow::anyhow!("no tool executor configured")),
        };

        match result {
            Ok(output) => {
                self.events.emit(TurnEvent::ToolCallCompleted {
                    turn_id,
                    call_id: call.id.clone(),
                    output: output.clone(),
                });
                ToolOutcome::Completed(output)
            }
            Err(e) => {
                warn!(%turn_id, tool = %call.name, error = %e, "Tool call failed");
                self.events.emit(TurnEvent::ToolCallFailed {
                    turn_id,
                    call_id: call.id.clone(),
                    error: e.to_string(),
                });
                ToolOutcome::Failed(e.to_string())
            }
        }
    }

    /// Call the model until it stops requesting tools, then close the text.
    ///
    /// Without a model the turn has nothing to say: the text is closed
    /// immediately.
    pub async fn run(self, mut messages: Vec<ChatMessage>) -> Result<(), PipelineError> {
        let Some(llm) = self.llm.clone() else {
            debug!(turn_id = %self.turn_id(), "No language model configured");
            self.player.end_of_text();
            return Ok(());
        };

        for round in 1..=self.max_tool_iterations {
            let response = match &llm {
                LanguageModel::Prompt(model) => self.prompt_round(model.as_ref(), &messages).await?,
                LanguageModel::Streaming(model) => {
                    self.stream_round(model.as_ref(), &messages).await?
                }
            };

            self.events.emit(TurnEvent::ResponseFinal {
                turn_id: self.turn_id(),
                text: response.content.clone(),
            });
            self.with_turn(|turn| turn.responses.push(response.content.clone()));

            if response.tool_calls.is_empty() {
                debug!(turn_id = %self.turn_id(), round, "Generation finished");
                self.player.end_of_text();
                return Ok(());
            }
            if round == self.max_tool_iterations {
                break;
            }

            debug!(
                turn_id = %self.turn_id(),
                round,
                calls = response.tool_calls.len(),
                "Model requested tools"
            );
            messages.push(ChatMessage::assistant(
                response.content,
                response.tool_calls.clone(),
            ));
            for call in response.tool_calls {
                let outcome = self.execute(&call).await;
                messages.push(ChatMessage::tool(&call.id, outcome.as_model_input()));
                self.with_turn(|turn| turn.tool_calls.push(ToolCallRecord { call, outcome }));
            }
        }

        Err(PipelineError::ToolLoopExhausted(self.max_tool_iterations))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn history_uses_heard_text_for_cancelled_turns() {
        let mut done = Turn::new(Trigger::manual("first"));
        done.responses.push("full answer".into());
        done.finalized = true;

        let mut cut = Turn::new(Trigger::transcript("second"));
        cut.responses.push("a long answer that was cut".into());
        cut.spoken_text = "a long".into();
        cut.cancelled = true;
        cut.finished_at = Some(Utc::now());

        let messages = build_messages(
            Some("be brief"),
            &[done, cut],
            &Trigger::tool_result("weather", "sunny"),
        );
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "be brief",
                "first",
                "full answer",
                "second",
                "a long",
                "[tool:weather] sunny"
            ]
        );
    }

    #[test]
    fn empty_system_prompt_is_skipped() {
        let messages = build_messages(Some(""), &[], &Trigger::manual("hi"));
        assert_eq!(messages, vec![ChatMessage::user("hi")]);
    }
}
