use std::time::Duration;

use async_trait::async_trait;
use chatgpt::prelude::*;
use chatgpt::types::CompletionResponse;
use log::debug;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("ChatGPT backend error: {0}")]
    Backend(#[from] chatgpt::err::Error),

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),
}

/// Text-in/text-out access to a language model.
///
/// Implementations turn whatever the provider returns into either a
/// non-empty completion or `None`; callers never inspect provider types.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> std::result::Result<Option<String>, LlmError>;
}

pub struct QuizHelper {
    chat_gpt: ChatGPT,
}

impl QuizHelper {
    pub fn new(chat_gpt: ChatGPT) -> Self {
        Self { chat_gpt }
    }
}

#[async_trait]
impl LlmClient for QuizHelper {
    async fn complete(&self, prompt: &str) -> std::result::Result<Option<String>, LlmError> {
        debug!("Sending prompt ({} chars)", prompt.len());

        let response: CompletionResponse = self.chat_gpt.send_message(prompt).await?;

        let content = extract_content(&response);
        debug!("Completion: {:?}", content);

        Ok(content)
    }
}

fn extract_content(response: &CompletionResponse) -> Option<String> {
    response
        .message_choices
        .first()
        .map(|choice| choice.message.content.trim().to_string())
        .filter(|content| !content.is_empty())
}
