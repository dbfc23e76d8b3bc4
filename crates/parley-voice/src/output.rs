//! `AudioOutput` facade over the two output client protocols.
//!
//! Marks always complete through a callback: the callback protocol is
//! delegated, the blocking `await_mark` protocol is awaited on a background
//! task, and without a client the callback fires immediately so a turn can
//! still run to completion text-only.

use bytes::Bytes;
use parley_core::{AudioOutputClient, EncodingInfo, MarkPlayed};
use tracing::trace;

use crate::error::FacadeError;

/// Per-turn audio output facade.
#[derive(Debug, Clone)]
pub struct AudioOutput {
    client: Option<AudioOutputClient>,
    fallback_encoding: EncodingInfo,
}

fn output_err(operation: &'static str) -> impl FnOnce(anyhow::Error) -> FacadeError {
    move |source| FacadeError::Output { operation, source }
}

impl AudioOutput {
    /// `fallback_encoding` is reported when no client is configured.
    pub const fn new(client: Option<AudioOutputClient>, fallback_encoding: EncodingInfo) -> Self {
        Self {
            client,
            fallback_encoding,
        }
    }

    pub const fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    /// Whether marks are reported through callbacks.
    pub const fn supports_callback_marks(&self) -> bool {
        matches!(self.client, Some(AudioOutputClient::Callback(_)))
    }

    pub fn encoding_info(&self) -> EncodingInfo {
        self.client
            .as_ref()
            .map_or(self.fallback_encoding, AudioOutputClient::encoding_info)
    }

    pub async fn send_audio(&self, audio: Bytes) -> Result<(), FacadeError> {
        match &self.client {
            None => {
                trace!(bytes = audio.len(), "No output client, audio dropped");
                Ok(())
            }
            Some(AudioOutputClient::Legacy(client)) => client.send_audio(audio).await,
            Some(AudioOutputClient::Callback(client)) => client.send_audio(audio).await,
        }
        .map_err(output_err("send_audio"))
    }

    /// Drop audio queued in the output.
    pub async fn clear(&self) -> Result<(), FacadeError> {
        match &self.client {
            None => Ok(()),
            Some(AudioOutputClient::Legacy(client)) => client.clear_buffer().await,
            Some(AudioOutputClient::Callback(client)) => client.clear_buffer().await,
        }
        .map_err(output_err("clear"))
    }

    /// Insert a mark; `on_played` runs exactly once, when the output has
    /// played everything before the mark or has dropped it.
    pub async fn mark(&self, id: &str, on_played: MarkPlayed) -> Result<(), FacadeError> {
        match &self.client {
            None => {
                on_played(Ok(()));
                Ok(())
            }
            Some(AudioOutputClient::Callback(client)) => client
                .mark(id, on_played)
                .await
                .map_err(output_err("mark")),
            Some(AudioOutputClient::Legacy(client)) => {
                let client = client.clone();
                let id = id.to_string();
                tokio::spawn(async move {
                    let result = client.await_mark(&id).await;
                    on_played(result);
                });
                Ok(())
            }
        }
    }
}
