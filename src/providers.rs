//! Provider adapters: normalized requests/responses behind uniform traits.
//!
//! All provider-specific request/response shape knowledge lives below
//! this module. Adapters classify every failure into a
//! [`ProviderError`](crate::error::ProviderError) before it reaches the
//! orchestrator.

pub mod deepseek;
pub mod vision;

pub use deepseek::DeepSeekChat;
pub use vision::{VisionAnalysis, VisionRouter};

use crate::credentials::ProviderId;
use crate::error::ProviderError;
use crate::{Turn, TurnRole};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of history turns included in an outgoing request.
/// Older turns are dropped silently — a truncation policy, not an error.
pub const HISTORY_WINDOW: usize = 10;

/// Role tag on an outgoing chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One role-tagged message in a normalized chat request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Normalized text-chat input, provider-agnostic.
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Leading system/preamble instruction.
    pub preamble: String,
    /// Windowed prior turns, oldest first.
    pub history: Vec<ChatMessage>,
    /// The new user message.
    pub message: String,
}

/// Normalized text-chat output.
#[derive(Debug, Clone)]
pub struct ChatOutput {
    pub content: String,
}

/// Text-chat capability contract.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn has_credential(&self) -> bool;

    /// Provider-agnostic tutoring instruction for a context. Embeds a
    /// bounded excerpt of the current concept body and the target
    /// difficulty.
    fn build_system_preamble(&self, context: &crate::context::KnowledgeContext) -> String;

    /// Send a normalized request. The adapter enforces its own hard
    /// timeout (`budget`) with a cancellation-safe race, independent of
    /// any caller-level timeout.
    async fn send(&self, input: ChatInput, budget: Duration) -> Result<ChatOutput, ProviderError>;
}

/// Normalized vision (image understanding) input.
#[derive(Debug, Clone)]
pub struct VisionInput {
    /// Base64-encoded image payload, inlined into the request.
    pub image_base64: String,
    /// Analysis instruction merged by the orchestrator.
    pub prompt: String,
}

/// Image-understanding capability contract. Members of the vision family
/// are interchangeable; selection is by fixed priority order in
/// [`VisionRouter`].
#[async_trait]
pub trait VisionProvider: Send + Sync {
    fn provider(&self) -> ProviderId;

    fn has_credential(&self) -> bool;

    async fn analyze(
        &self,
        input: &VisionInput,
        budget: Duration,
    ) -> Result<VisionAnalysis, ProviderError>;
}

/// Convert the most recent turns into outgoing chat messages.
///
/// Keeps at most [`HISTORY_WINDOW`] turns (oldest dropped), oldest first,
/// and only user/assistant roles — system turns and attachments never
/// travel in history.
pub fn window_history(turns: &[Turn]) -> Vec<ChatMessage> {
    let eligible: Vec<&Turn> = turns
        .iter()
        .filter(|t| matches!(t.role, TurnRole::User | TurnRole::Assistant))
        .collect();
    let start = eligible.len().saturating_sub(HISTORY_WINDOW);
    eligible[start..]
        .iter()
        .map(|t| ChatMessage {
            role: match t.role {
                TurnRole::User => ChatRole::User,
                _ => ChatRole::Assistant,
            },
            content: t.content.clone(),
        })
        .collect()
}
