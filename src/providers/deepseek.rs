//! DeepSeek text-chat adapter.

use crate::context::{EXCERPT_CAP, KnowledgeContext, truncate_chars};
use crate::credentials::{CredentialStore, ProviderId};
use crate::error::ProviderError;
use crate::providers::{ChatInput, ChatMessage, ChatOutput, ChatProvider, ChatRole};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_MODEL: &str = "deepseek-chat";

/// Hard cap the adapter enforces on every request, independent of any
/// orchestrator-level timeout.
pub const TEXT_TIMEOUT: Duration = Duration::from_secs(30);

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 2048;
const TOP_P: f32 = 0.9;

/// Text-chat adapter for the DeepSeek chat-completions API.
pub struct DeepSeekChat {
    credentials: Arc<CredentialStore>,
    http: reqwest::Client,
    base_url: String,
}

impl DeepSeekChat {
    pub fn new(credentials: Arc<CredentialStore>, http: reqwest::Client) -> Self {
        Self {
            credentials,
            http,
            base_url: DEEPSEEK_BASE_URL.to_string(),
        }
    }

    /// Point the adapter at a different endpoint (testing, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Assemble the outgoing role-tagged message list: preamble first,
    /// windowed history next, the new user message last.
    fn build_messages(input: &ChatInput) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(input.history.len() + 2);
        messages.push(ChatMessage {
            role: ChatRole::System,
            content: input.preamble.clone(),
        });
        messages.extend(input.history.iter().cloned());
        messages.push(ChatMessage {
            role: ChatRole::User,
            content: input.message.clone(),
        });
        messages
    }
}

/// Build the tutoring system preamble for a knowledge context.
///
/// States the assistant's role, embeds a bounded excerpt of the current
/// concept body, and names the target difficulty so response complexity
/// can be modulated.
pub fn build_system_preamble(context: &KnowledgeContext) -> String {
    let mut preamble = String::from(
        "你是一个专业的AI学习助手，专门帮助学生学习高中数学、物理、化学、生物等学科。\n\n\
         你的特点：\n\
         1. 耐心细致，善于用简单易懂的语言解释复杂概念\n\
         2. 能够提供具体的例子和练习题\n\
         3. 会根据学生的理解程度调整解释的深度\n\
         4. 鼓励学生思考，引导学生找到解题思路\n\
         5. 回答简洁明了，重点突出\n\n\
         请用中文回答所有问题。",
    );

    if let Some(concept) = &context.concept {
        preamble.push_str(&format!(
            "\n\n当前学习的知识点：{}\n难度等级：{}\n知识点内容：{}",
            concept.title,
            concept.difficulty,
            truncate_chars(&concept.body_excerpt, EXCERPT_CAP),
        ));
    }

    if let Some(difficulty) = context.difficulty {
        preamble.push_str(&format!(
            "\n\n请根据学生的水平（{difficulty}）调整回答的深度和复杂程度。"
        ));
    }

    preamble
}

#[async_trait]
impl ChatProvider for DeepSeekChat {
    fn has_credential(&self) -> bool {
        self.credentials.has(ProviderId::DeepSeek)
    }

    fn build_system_preamble(&self, context: &KnowledgeContext) -> String {
        build_system_preamble(context)
    }

    async fn send(&self, input: ChatInput, budget: Duration) -> Result<ChatOutput, ProviderError> {
        let Some(api_key) = self.credentials.secret(ProviderId::DeepSeek) else {
            return Err(ProviderError::Unauthorized(
                "no DeepSeek credential configured".into(),
            ));
        };

        let budget_ms = budget.as_millis() as u64;
        let body = serde_json::json!({
            "model": DEEPSEEK_MODEL,
            "messages": Self::build_messages(&input),
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
            "stream": false,
            "top_p": TOP_P,
        });

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        tracing::debug!(history_len = input.history.len(), "sending chat request");

        let request = self
            .http
            .post(&url)
            .bearer_auth(&api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let response = tokio::time::timeout(budget, request)
            .await
            .map_err(|_| ProviderError::Timeout { budget_ms })?
            .map_err(|e| ProviderError::from_transport(&e, budget_ms))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or_else(|| text.clone());
            return Err(ProviderError::from_status(status.as_u16(), detail));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::MalformedResponse(format!("invalid JSON: {e}")))?;

        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ProviderError::MalformedResponse("response carries no completion content".into())
            })?;

        Ok(ChatOutput {
            content: content.to_string(),
        })
    }
}
