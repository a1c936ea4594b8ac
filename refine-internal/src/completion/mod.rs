//! Text completion collaborators.
//!
//! The refinement pipeline only needs a chat-style text completion with token
//! accounting; everything provider-specific lives behind [`CompletionService`].

pub mod anthropic;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub use anthropic::AnthropicClient;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// An opaque text completion service.
///
/// Any failure to obtain a completion must surface as
/// `ErrorDetails::CompletionUnavailable` so callers can tell it apart from
/// output that arrived but was unusable.
#[async_trait]
pub trait CompletionService: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, Error>;
}
